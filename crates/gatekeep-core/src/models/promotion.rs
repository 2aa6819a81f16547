use serde::{Deserialize, Serialize};

use super::{Blocker, EvidenceRecord, GateStatus, PipelineHalt};
use crate::error::GatekeepError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Pending,
    Running,
    Blocked,
    Passed,
}

impl GateState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Blocked => "blocked",
            Self::Passed => "passed",
        }
    }
}

/// Pipeline position, as the release manager sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    Pending { gate_id: String },
    Running { gate_id: String },
    Blocked { gate_id: String },
    /// `gate_id` passed and the next gate has not started yet.
    Passed { gate_id: String },
    Halted { gate_id: String },
    AllPassed,
    ReleaseSigned,
    /// Signed, then an integrity failure withdrew the PROMOTE decision.
    Revoked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub gate_id: String,
    pub from: GateState,
    pub to: GateState,
    pub at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromotionStatus {
    #[serde(rename = "PROMOTE")]
    Promote,
    #[serde(rename = "HOLD")]
    Hold,
}

impl PromotionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Promote => "PROMOTE",
            Self::Hold => "HOLD",
        }
    }
}

/// Approval handed over by the external sign-off collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub approver: String,
    pub approved_at: String,
}

impl Approval {
    #[must_use]
    pub fn record_approval(approver: &str, approved_at: &str) -> Self {
        Self {
            approver: approver.to_string(),
            approved_at: approved_at.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignOffRow {
    pub gate_id: String,
    pub gate_name: String,
    pub objective: String,
    pub result: GateStatus,
    pub evidence_ref: String,
    pub approver: String,
    pub approved_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionDecision {
    pub release_id: String,
    pub status: PromotionStatus,
    pub contract_version: semver::Version,
    pub gate_verdicts: Vec<EvidenceRecord>,
    pub sign_off: Vec<SignOffRow>,
    pub approver: String,
    pub approved_at: String,
    pub release_manifest_ref: String,
    pub decision_ref: String,
}

/// Withdrawal of a PROMOTE decision after signed evidence failed
/// re-verification. A revocation is permanent for its release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revocation {
    pub release_id: String,
    pub artifact: String,
    pub expected_hash: String,
    pub actual_hash: String,
    pub revoked_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateAttemptReport {
    pub gate_id: String,
    pub attempt: u32,
    pub status: GateStatus,
    pub state: GateState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<EvidenceRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocker: Option<Blocker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halt: Option<PipelineHalt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceReport {
    pub attempts: Vec<GateAttemptReport>,
    pub pipeline: PipelineState,
    pub decision: PromotionStatus,
}

impl GateAttemptReport {
    /// `GateFailed` for a failed attempt, carrying the blocker's description.
    pub fn ensure_passed(&self) -> Result<(), GatekeepError> {
        if self.status.is_passed() {
            return Ok(());
        }
        let reason = self.blocker.as_ref().map_or_else(
            || format!("attempt {} failed", self.attempt),
            |blocker| format!("attempt {}: {}", self.attempt, blocker.description),
        );
        Err(GatekeepError::GateFailed {
            gate_id: self.gate_id.clone(),
            reason,
        })
    }
}

impl SequenceReport {
    /// The sequence stops at its first failed attempt, so only the last
    /// attempt can fail.
    pub fn ensure_passed(&self) -> Result<(), GatekeepError> {
        self.attempts
            .last()
            .map_or(Ok(()), GateAttemptReport::ensure_passed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateStatusView {
    pub gate_id: String,
    pub sequence_index: u32,
    pub name: String,
    pub state: GateState,
    pub attempts: u32,
    pub consecutive_blocks: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_record_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocker: Option<Blocker>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub release_id: String,
    pub pipeline: PipelineState,
    pub decision: PromotionStatus,
    pub contract_version: semver::Version,
    pub gates: Vec<GateStatusView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halt: Option<PipelineHalt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation: Option<Revocation>,
}
