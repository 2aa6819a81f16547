use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{CheckReport, CheckSpec, DeterminismPin};

/// Gate-level pass rule evaluated over a [`CheckResult`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum PredicateSpec {
    /// Every hard check passed; soft checks never count.
    #[default]
    AllHardChecks,
    /// Up to `max_failed_hard_checks` hard checks may fail. Zero is the default rule.
    HardChecksWithBudget { max_failed_hard_checks: usize },
    /// A predicate registered on the runner under this name.
    Named { name: String },
}

/// One ordered stage of the promotion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    pub id: String,
    pub sequence_index: u32,
    pub name: String,
    #[serde(default)]
    pub objective: String,
    pub checks: Vec<CheckSpec>,
    #[serde(default)]
    pub predicate: PredicateSpec,
    /// Present on determinism gates: the checks run twice under this pin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub determinism: Option<DeterminismPin>,
}

impl Gate {
    #[must_use]
    pub fn new(id: &str, sequence_index: u32, name: &str, checks: Vec<CheckSpec>) -> Self {
        Self {
            id: id.to_string(),
            sequence_index,
            name: name.to_string(),
            objective: String::new(),
            checks,
            predicate: PredicateSpec::AllHardChecks,
            determinism: None,
        }
    }

    #[must_use]
    pub fn with_objective(mut self, objective: &str) -> Self {
        self.objective = objective.to_string();
        self
    }

    #[must_use]
    pub fn with_predicate(mut self, predicate: PredicateSpec) -> Self {
        self.predicate = predicate;
        self
    }

    #[must_use]
    pub fn with_determinism(mut self, pin: DeterminismPin) -> Self {
        self.determinism = Some(pin);
        self
    }

    #[must_use]
    pub fn is_determinism_gate(&self) -> bool {
        self.determinism.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Passed,
    Failed,
}

impl GateStatus {
    #[must_use]
    pub const fn from_passed(passed: bool) -> Self {
        if passed { Self::Passed } else { Self::Failed }
    }

    #[must_use]
    pub const fn is_passed(self) -> bool {
        matches!(self, Self::Passed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
        }
    }
}

/// Aggregated result of one gate attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub gate_id: String,
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub status: GateStatus,
    pub predicate: String,
    pub checks: Vec<CheckReport>,
    pub detail: BTreeMap<String, serde_json::Value>,
    pub started_at: String,
    pub ended_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl CheckResult {
    pub fn hard_checks(&self) -> impl Iterator<Item = &CheckReport> {
        self.checks.iter().filter(|check| check.hard)
    }

    #[must_use]
    pub fn failed_hard_checks(&self) -> Vec<&str> {
        self.hard_checks()
            .filter(|check| !check.met)
            .map(|check| check.name.as_str())
            .collect()
    }

    /// Result for an attempt that never reached its checks.
    #[must_use]
    pub fn aborted_before_start(gate_id: &str, reason: &str, at: &str) -> Self {
        Self {
            gate_id: gate_id.to_string(),
            total: 0,
            passed: 0,
            failed: 0,
            status: GateStatus::Failed,
            predicate: "aborted".to_string(),
            checks: Vec::new(),
            detail: BTreeMap::new(),
            started_at: at.to_string(),
            ended_at: at.to_string(),
            aborted: Some(reason.to_string()),
        }
    }
}
