use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::GatekeepError;

/// Pinned configuration that makes two runs of a suite comparable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterminismPin {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default)]
    pub randomization_disabled: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub frozen_inputs: BTreeMap<String, String>,
}

impl DeterminismPin {
    /// A pin is only meaningful if it fixes something.
    #[must_use]
    pub fn is_effective(&self) -> bool {
        self.seed.is_some() || self.randomization_disabled || !self.frozen_inputs.is_empty()
    }

    /// Stable blake3 fingerprint over the canonical JSON form.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&canonical).to_hex().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterminismRun {
    pub run_index: u8,
    pub pass_count: u64,
    pub fail_count: u64,
    #[serde(default)]
    pub failing_ids: BTreeSet<String>,
    pub config_fingerprint: String,
    /// Caller's assertion that the pin was active for this run.
    pub pinned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterminismVerdict {
    pub deterministic: bool,
    pub config_fingerprint: String,
    pub run1: DeterminismRun,
    pub run2: DeterminismRun,
    pub mismatches: Vec<String>,
}

impl DeterminismVerdict {
    /// A mismatch fails the gate identified by `gate_id`.
    pub fn ensure_deterministic(&self, gate_id: &str) -> Result<(), GatekeepError> {
        if self.deterministic {
            return Ok(());
        }
        Err(GatekeepError::GateFailed {
            gate_id: gate_id.to_string(),
            reason: format!("runs are not deterministic: {}", self.mismatches.join("; ")),
        })
    }
}
