use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Live environment facts, keyed like `Contract::locked_fields`.
pub type EnvironmentSnapshot = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub version: semver::Version,
    pub locked_fields: BTreeMap<String, serde_json::Value>,
}

/// Explicitly authorized replacement of the locked fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractBump {
    pub version: semver::Version,
    pub locked_fields: BTreeMap<String, serde_json::Value>,
    pub authorized_by: String,
    pub reason: String,
}

/// Evidence of a contract version change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_version: Option<semver::Version>,
    pub contract: Contract,
    pub changed_fields: Vec<String>,
    pub authorized_by: String,
    pub reason: String,
    pub evidence_ref: String,
    pub recorded_at: String,
}
