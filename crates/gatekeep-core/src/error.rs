use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, GatekeepError>;

/// A locked contract field whose live value differs from the recorded one.
///
/// `actual` is `None` when the live environment does not expose the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractDriftError {
    pub field: String,
    pub expected: serde_json::Value,
    pub actual: Option<serde_json::Value>,
}

impl fmt::Display for ContractDriftError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.actual {
            Some(actual) => write!(
                f,
                "field '{}' expected {} but live value is {}",
                self.field, self.expected, actual
            ),
            None => write!(
                f,
                "field '{}' expected {} but live environment does not report it",
                self.field, self.expected
            ),
        }
    }
}

impl std::error::Error for ContractDriftError {}

/// A manifest digest that no longer matches the artifact it names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceIntegrityError {
    pub artifact: String,
    pub expected_hash: String,
    pub actual_hash: String,
}

impl fmt::Display for EvidenceIntegrityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "artifact '{}' expected sha256 {} but found {}",
            self.artifact, self.expected_hash, self.actual_hash
        )
    }
}

impl std::error::Error for EvidenceIntegrityError {}

#[derive(Debug, Error)]
pub enum GatekeepError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("path traversal is not allowed: {0}")]
    PathTraversal(String),

    #[error("contract drift: {0}")]
    ContractDrift(ContractDriftError),

    #[error("prerequisite blocker: {0}")]
    Prerequisite(String),

    #[error("evidence integrity violated: {0}")]
    EvidenceIntegrity(EvidenceIntegrityError),

    #[error("gate {gate_id} failed: {reason}")]
    GateFailed { gate_id: String, reason: String },

    #[error("sequence violation: {0}")]
    SequenceViolation(String),

    #[error("gate {gate_id} is blocked: {reason}")]
    BlockerUnresolved { gate_id: String, reason: String },

    #[error("pipeline halted after repeated failure of gate {gate_id}; record a remediation sprint first")]
    PipelineHalted { gate_id: String },

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Semver(#[from] semver::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ContractDriftError> for GatekeepError {
    fn from(value: ContractDriftError) -> Self {
        Self::ContractDrift(value)
    }
}

impl From<EvidenceIntegrityError> for GatekeepError {
    fn from(value: EvidenceIntegrityError) -> Self {
        Self::EvidenceIntegrity(value)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub operation: String,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl GatekeepError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::PathTraversal(_) => "PATH_TRAVERSAL",
            Self::ContractDrift(_) => "CONTRACT_DRIFT",
            Self::Prerequisite(_) => "PREREQUISITE_BLOCKER",
            Self::EvidenceIntegrity(_) => "EVIDENCE_INTEGRITY",
            Self::GateFailed { .. } => "GATE_FAILURE",
            Self::SequenceViolation(_) => "SEQUENCE_VIOLATION",
            Self::BlockerUnresolved { .. } => "BLOCKER_UNRESOLVED",
            Self::PipelineHalted { .. } => "PIPELINE_HALTED",
            Self::InvalidTransition(_) => "INVALID_TRANSITION",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Sqlite(_) => "SQLITE_ERROR",
            Self::Toml(_) => "TOML_ERROR",
            Self::Semver(_) => "SEMVER_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Gate named by the error, if any.
    #[must_use]
    pub fn gate_id(&self) -> Option<&str> {
        match self {
            Self::GateFailed { gate_id, .. }
            | Self::BlockerUnresolved { gate_id, .. }
            | Self::PipelineHalted { gate_id } => Some(gate_id),
            _ => None,
        }
    }

    pub fn to_payload(
        &self,
        operation: impl Into<String>,
        gate_id: Option<String>,
    ) -> ErrorPayload {
        let details = match self {
            Self::ContractDrift(drift) => serde_json::to_value(drift).ok(),
            Self::EvidenceIntegrity(integrity) => serde_json::to_value(integrity).ok(),
            Self::GateFailed { reason, .. } => Some(serde_json::json!({ "reason": reason })),
            _ => None,
        };
        ErrorPayload {
            code: self.code().to_string(),
            message: self.to_string(),
            operation: operation.into(),
            trace_id: Uuid::new_v4().to_string(),
            gate_id,
            details,
        }
    }
}
