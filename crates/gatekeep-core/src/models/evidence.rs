use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{CheckResult, GateStatus, SubjectReport};

/// Immutable record of one gate attempt. Corrections are new records that
/// name the superseded one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub record_id: String,
    pub gate_id: String,
    pub attempt: u32,
    pub status: GateStatus,
    pub check_result: CheckResult,
    pub summary_ref: String,
    pub manifest_ref: String,
    pub manifest_sha256: String,
    pub artifact_refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction_reason: Option<String>,
    pub recorded_at: String,
}

/// Fixed-field summary written next to every manifest. Derived only from the
/// CheckResult, so rendering it twice yields identical bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSummary {
    pub gate_id: String,
    pub started_at: String,
    pub ended_at: String,
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub status: GateStatus,
    /// check name -> subject -> counts
    pub subjects: BTreeMap<String, BTreeMap<String, SubjectReport>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl EvidenceSummary {
    #[must_use]
    pub fn from_check_result(result: &CheckResult) -> Self {
        Self {
            gate_id: result.gate_id.clone(),
            started_at: result.started_at.clone(),
            ended_at: result.ended_at.clone(),
            total: result.total,
            passed: result.passed,
            failed: result.failed,
            status: result.status,
            subjects: result
                .checks
                .iter()
                .map(|check| (check.name.clone(), check.subjects.clone()))
                .collect(),
            aborted: result.aborted.clone(),
        }
    }
}
