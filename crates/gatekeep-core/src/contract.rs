use std::collections::BTreeSet;

use crate::error::{ContractDriftError, GatekeepError, Result};
use crate::models::{Contract, ContractBump, ContractChange, EnvironmentSnapshot};

pub const INITIAL_CONTRACT_AUTHORITY: &str = "pipeline-config";

/// Reads the live values of the locked contract fields.
pub trait EnvironmentProbe: Send + Sync {
    /// `fields` are the names the contract locks; probes may return more.
    fn snapshot(&self, fields: &[String]) -> Result<EnvironmentSnapshot>;
}

/// Probe over a fixed snapshot.
#[derive(Debug, Clone, Default)]
pub struct StaticEnvironment(pub EnvironmentSnapshot);

impl EnvironmentProbe for StaticEnvironment {
    fn snapshot(&self, _fields: &[String]) -> Result<EnvironmentSnapshot> {
        Ok(self.0.clone())
    }
}

#[must_use]
pub fn contract_evidence_key(version: &semver::Version) -> String {
    format!("contract/v{version}.json")
}

/// Holds the active contract and compares live environments against it.
#[derive(Debug, Clone)]
pub struct ContractGuard {
    contract: Contract,
}

impl ContractGuard {
    #[must_use]
    pub const fn new(contract: Contract) -> Self {
        Self { contract }
    }

    #[must_use]
    pub const fn contract(&self) -> &Contract {
        &self.contract
    }

    #[must_use]
    pub fn locked_field_names(&self) -> Vec<String> {
        self.contract.locked_fields.keys().cloned().collect()
    }

    /// Fails on the first locked field (in name order) whose live value differs.
    pub fn verify(&self, live: &EnvironmentSnapshot) -> std::result::Result<(), ContractDriftError> {
        match self.drift(live).into_iter().next() {
            Some(drift) => Err(drift),
            None => Ok(()),
        }
    }

    /// Every drifting field, for reporting.
    #[must_use]
    pub fn drift(&self, live: &EnvironmentSnapshot) -> Vec<ContractDriftError> {
        self.contract
            .locked_fields
            .iter()
            .filter_map(|(field, expected)| match live.get(field) {
                Some(actual) if actual == expected => None,
                actual => Some(ContractDriftError {
                    field: field.clone(),
                    expected: expected.clone(),
                    actual: actual.cloned(),
                }),
            })
            .collect()
    }

    /// Checks a bump and describes the change without applying it.
    pub fn prepare_bump(&self, bump: &ContractBump, recorded_at: &str) -> Result<ContractChange> {
        if bump.authorized_by.trim().is_empty() {
            return Err(GatekeepError::Validation(
                "contract bump requires an authorizer".to_string(),
            ));
        }
        if bump.reason.trim().is_empty() {
            return Err(GatekeepError::Validation(
                "contract bump requires a reason".to_string(),
            ));
        }
        if bump.version <= self.contract.version {
            return Err(GatekeepError::Validation(format!(
                "contract version must increase: {} is not greater than {}",
                bump.version, self.contract.version
            )));
        }

        let keys = self
            .contract
            .locked_fields
            .keys()
            .chain(bump.locked_fields.keys())
            .collect::<BTreeSet<_>>();
        let changed_fields = keys
            .into_iter()
            .filter(|key| self.contract.locked_fields.get(*key) != bump.locked_fields.get(*key))
            .cloned()
            .collect();

        Ok(ContractChange {
            from_version: Some(self.contract.version.clone()),
            contract: Contract {
                version: bump.version.clone(),
                locked_fields: bump.locked_fields.clone(),
            },
            changed_fields,
            authorized_by: bump.authorized_by.trim().to_string(),
            reason: bump.reason.trim().to_string(),
            evidence_ref: contract_evidence_key(&bump.version),
            recorded_at: recorded_at.to_string(),
        })
    }

    pub fn adopt(&mut self, contract: Contract) {
        self.contract = contract;
    }

    /// The change entry recorded when a pipeline first runs under a contract.
    #[must_use]
    pub fn initial_change(contract: &Contract, recorded_at: &str) -> ContractChange {
        ContractChange {
            from_version: None,
            contract: contract.clone(),
            changed_fields: contract.locked_fields.keys().cloned().collect(),
            authorized_by: INITIAL_CONTRACT_AUTHORITY.to_string(),
            reason: "initial contract".to_string(),
            evidence_ref: contract_evidence_key(&contract.version),
            recorded_at: recorded_at.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn guard() -> ContractGuard {
        ContractGuard::new(Contract {
            version: semver::Version::new(1, 0, 0),
            locked_fields: [
                ("gateway_port".to_string(), json!(8080)),
                ("runtime".to_string(), json!("python-3.11")),
            ]
            .into_iter()
            .collect(),
        })
    }

    fn live(port: serde_json::Value, runtime: Option<&str>) -> EnvironmentSnapshot {
        let mut snapshot = EnvironmentSnapshot::new();
        snapshot.insert("gateway_port".to_string(), port);
        if let Some(runtime) = runtime {
            snapshot.insert("runtime".to_string(), json!(runtime));
        }
        snapshot.insert("hostname".to_string(), json!("ci-7"));
        snapshot
    }

    #[test]
    fn matching_environment_passes_and_extra_fields_are_ignored() {
        guard()
            .verify(&live(json!(8080), Some("python-3.11")))
            .expect("no drift");
    }

    #[test]
    fn changed_value_reports_field_expected_and_actual() {
        let drift = guard()
            .verify(&live(json!(8080), Some("python-3.12")))
            .expect_err("drift");
        assert_eq!(drift.field, "runtime");
        assert_eq!(drift.expected, json!("python-3.11"));
        assert_eq!(drift.actual, Some(json!("python-3.12")));
    }

    #[test]
    fn equality_is_type_strict_and_missing_fields_drift() {
        let drifts = guard().drift(&live(json!("8080"), None));
        assert_eq!(drifts.len(), 2);
        assert_eq!(drifts[0].field, "gateway_port");
        assert_eq!(drifts[1].actual, None);
    }

    #[test]
    fn bump_requires_authorization_and_a_greater_version() {
        let guard = guard();
        let mut bump = ContractBump {
            version: semver::Version::new(1, 1, 0),
            locked_fields: [
                ("gateway_port".to_string(), json!(8080)),
                ("runtime".to_string(), json!("python-3.12")),
                ("tls".to_string(), json!(true)),
            ]
            .into_iter()
            .collect(),
            authorized_by: String::new(),
            reason: "runtime upgrade".to_string(),
        };
        assert!(guard.prepare_bump(&bump, "2026-10-19T00:00:00Z").is_err());

        bump.authorized_by = "release-manager".to_string();
        bump.version = semver::Version::new(1, 0, 0);
        assert!(guard.prepare_bump(&bump, "2026-10-19T00:00:00Z").is_err());

        bump.version = semver::Version::new(1, 1, 0);
        let change = guard
            .prepare_bump(&bump, "2026-10-19T00:00:00Z")
            .expect("bump");
        assert_eq!(change.changed_fields, vec!["runtime", "tls"]);
        assert_eq!(change.evidence_ref, "contract/v1.1.0.json");
        assert_eq!(change.from_version, Some(semver::Version::new(1, 0, 0)));
        // preparing a bump never changes the active contract
        assert_eq!(guard.contract().version, semver::Version::new(1, 0, 0));
    }
}
