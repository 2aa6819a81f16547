use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GatekeepError;

pub const DEFAULT_SUBJECT: &str = "default";

const CUSTOM_KIND_PREFIX: &str = "custom:";

/// Class of verification a collaborator performs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CheckKind {
    ProcessCycle,
    Soak,
    Security,
    Restore,
    Integration,
    Custom(String),
}

impl CheckKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::ProcessCycle => "process_cycle",
            Self::Soak => "soak",
            Self::Security => "security",
            Self::Restore => "restore",
            Self::Integration => "integration",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(name) => write!(f, "{CUSTOM_KIND_PREFIX}{name}"),
            other => f.write_str(other.as_str()),
        }
    }
}

impl FromStr for CheckKind {
    type Err = GatekeepError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw.trim();
        match value {
            "process_cycle" => Ok(Self::ProcessCycle),
            "soak" => Ok(Self::Soak),
            "security" => Ok(Self::Security),
            "restore" => Ok(Self::Restore),
            "integration" => Ok(Self::Integration),
            _ => match value.strip_prefix(CUSTOM_KIND_PREFIX) {
                Some(name) if !name.trim().is_empty() => Ok(Self::Custom(name.trim().to_string())),
                _ => Err(GatekeepError::Validation(format!(
                    "unknown check kind '{value}' (expected process_cycle, soak, security, restore, integration or custom:<name>)"
                ))),
            },
        }
    }
}

impl TryFrom<String> for CheckKind {
    type Error = GatekeepError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CheckKind> for String {
    fn from(value: CheckKind) -> Self {
        value.to_string()
    }
}

/// Explicit numeric budget that replaces the zero-failure rule for one check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckThreshold {
    /// Failure rate (failed / total, in percent) must stay strictly below the value.
    MaxFailureRatePct(f64),
    MaxFailures(u64),
}

impl CheckThreshold {
    #[must_use]
    pub fn is_met(&self, total: u64, failed: u64) -> bool {
        match *self {
            Self::MaxFailureRatePct(limit) => {
                if total == 0 {
                    return false;
                }
                #[allow(clippy::cast_precision_loss, reason = "counts stay far below 2^52")]
                let rate = failed as f64 * 100.0 / total as f64;
                rate < limit
            }
            Self::MaxFailures(limit) => failed <= limit,
        }
    }

    pub fn validate(&self) -> Result<(), GatekeepError> {
        match *self {
            Self::MaxFailureRatePct(limit) if !(0.0..=100.0).contains(&limit) || limit.is_nan() => {
                Err(GatekeepError::Validation(format!(
                    "max_failure_rate_pct must be within 0..=100, got {limit}"
                )))
            }
            _ => Ok(()),
        }
    }
}

fn default_hard() -> bool {
    true
}

/// One declared check of a gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckSpec {
    pub name: String,
    pub kind: CheckKind,
    #[serde(default = "default_hard")]
    pub hard: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<CheckThreshold>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
}

impl CheckSpec {
    #[must_use]
    pub fn hard(name: &str, kind: CheckKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            hard: true,
            timeout_ms: None,
            subjects: Vec::new(),
            threshold: None,
            params: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn informational(name: &str, kind: CheckKind) -> Self {
        Self {
            hard: false,
            ..Self::hard(name, kind)
        }
    }

    #[must_use]
    pub fn with_subjects<I, S>(mut self, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subjects = subjects.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn with_threshold(mut self, threshold: CheckThreshold) -> Self {
        self.threshold = Some(threshold);
        self
    }

    #[must_use]
    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    #[must_use]
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Completed,
    TimedOut,
    Errored,
    Cancelled,
}

impl CheckStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::Errored => "errored",
            Self::Cancelled => "cancelled",
        }
    }

    const fn severity(self) -> u8 {
        match self {
            Self::Completed => 0,
            Self::Errored => 1,
            Self::TimedOut => 2,
            Self::Cancelled => 3,
        }
    }

    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectReport {
    pub status: CheckStatus,
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubjectReport {
    /// A subject that never produced counts is one observation, failed.
    #[must_use]
    pub fn unobserved(status: CheckStatus, error: impl Into<String>) -> Self {
        Self {
            status,
            total: 1,
            passed: 0,
            failed: 1,
            error: Some(error.into()),
        }
    }
}

/// Aggregated outcome of one CheckSpec across all of its subjects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckReport {
    pub name: String,
    pub kind: CheckKind,
    pub hard: bool,
    pub status: CheckStatus,
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<CheckThreshold>,
    pub met: bool,
    pub subjects: BTreeMap<String, SubjectReport>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub detail: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub failing_ids: BTreeSet<String>,
}

impl CheckReport {
    /// A check that never ran because the gate was aborted before reaching it.
    #[must_use]
    pub fn cancelled(spec: &CheckSpec, reason: &str) -> Self {
        let mut subjects = BTreeMap::new();
        subjects.insert(
            DEFAULT_SUBJECT.to_string(),
            SubjectReport::unobserved(CheckStatus::Cancelled, reason),
        );
        Self {
            name: spec.name.clone(),
            kind: spec.kind.clone(),
            hard: spec.hard,
            status: CheckStatus::Cancelled,
            total: 1,
            passed: 0,
            failed: 1,
            threshold: spec.threshold,
            met: false,
            subjects,
            detail: BTreeMap::new(),
            failing_ids: BTreeSet::new(),
        }
    }
}

/// Return shape of a check collaborator invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    #[serde(default)]
    pub detail: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub failing_ids: BTreeSet<String>,
    #[serde(skip)]
    pub artifacts: Vec<CheckArtifact>,
}

impl CheckOutcome {
    #[must_use]
    pub fn counts(total: u64, passed: u64, failed: u64) -> Self {
        Self {
            total,
            passed,
            failed,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_detail(mut self, key: &str, value: serde_json::Value) -> Self {
        self.detail.insert(key.to_string(), value);
        self
    }

    #[must_use]
    pub fn with_failing_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_artifact(mut self, name: &str, content: impl Into<Vec<u8>>) -> Self {
        self.artifacts.push(CheckArtifact::new(name, content));
        self
    }

    /// Returns the reason the counts cannot be trusted, if any.
    #[must_use]
    pub fn count_defect(&self) -> Option<String> {
        if self.total == 0 {
            return Some("collaborator reported zero observations".to_string());
        }
        if self.passed.checked_add(self.failed) != Some(self.total) {
            return Some(format!(
                "inconsistent counts: total={} passed={} failed={}",
                self.total, self.passed, self.failed
            ));
        }
        None
    }
}

/// Raw log or report produced as a byproduct of a check invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckArtifact {
    pub name: String,
    pub content: Vec<u8>,
}

impl CheckArtifact {
    #[must_use]
    pub fn new(name: &str, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.to_string(),
            content: content.into(),
        }
    }

    pub fn from_path(name: &str, path: &std::path::Path) -> std::io::Result<Self> {
        Ok(Self::new(name, std::fs::read(path)?))
    }
}
