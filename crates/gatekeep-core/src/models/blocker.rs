use serde::{Deserialize, Serialize};

/// Why a gate attempt ended in `Blocked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    GateFailure,
    Prerequisite,
    ContractDrift,
    EvidenceWrite,
}

impl BlockKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GateFailure => "gate_failure",
            Self::Prerequisite => "prerequisite",
            Self::ContractDrift => "contract_drift",
            Self::EvidenceWrite => "evidence_write",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "gate_failure" => Some(Self::GateFailure),
            "prerequisite" => Some(Self::Prerequisite),
            "contract_drift" => Some(Self::ContractDrift),
            "evidence_write" => Some(Self::EvidenceWrite),
            _ => None,
        }
    }
}

/// Root-cause and fix record required before a failed gate may run again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blocker {
    pub id: i64,
    pub gate_id: String,
    pub attempt: u32,
    pub kind: BlockKind,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub root_cause: String,
    pub fix_description: String,
    pub resolved: bool,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<String>,
}

impl Blocker {
    #[must_use]
    pub fn clears_retry(&self) -> bool {
        self.resolved
            && !self.root_cause.trim().is_empty()
            && !self.fix_description.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationSprint {
    pub summary: String,
    pub owner: String,
    pub recorded_at: String,
}

/// Pipeline-wide stop raised when one gate blocks twice in succession.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineHalt {
    pub id: i64,
    pub gate_id: String,
    pub attempt: u32,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<RemediationSprint>,
}

impl PipelineHalt {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.remediation.is_none()
    }
}
