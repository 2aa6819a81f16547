use chrono::DateTime;

use crate::error::{GatekeepError, Result};
use crate::models::{Approval, EvidenceRecord, Gate, SignOffRow};

/// Trims the approval and requires both fields. The timestamp must be RFC 3339.
pub(super) fn validate_approval(approval: &Approval) -> Result<Approval> {
    let approver = approval.approver.trim();
    if approver.is_empty() {
        return Err(GatekeepError::Validation(
            "sign-off requires an approver identity".to_string(),
        ));
    }
    let approved_at = approval.approved_at.trim();
    if approved_at.is_empty() {
        return Err(GatekeepError::Validation(
            "sign-off requires an approval timestamp".to_string(),
        ));
    }
    DateTime::parse_from_rfc3339(approved_at).map_err(|err| {
        GatekeepError::Validation(format!(
            "approval timestamp '{approved_at}' is not RFC 3339: {err}"
        ))
    })?;
    Ok(Approval::record_approval(approver, approved_at))
}

/// One row per gate, in pipeline order. Fails if any row would be incomplete.
pub(super) fn sign_off_rows(
    gates: &[Gate],
    records: &[EvidenceRecord],
    approval: &Approval,
) -> Result<Vec<SignOffRow>> {
    if gates.len() != records.len() {
        return Err(GatekeepError::Internal(format!(
            "{} gates but {} evidence records",
            gates.len(),
            records.len()
        )));
    }
    let mut rows = Vec::with_capacity(gates.len());
    for (gate, record) in gates.iter().zip(records) {
        if record.gate_id != gate.id {
            return Err(GatekeepError::Internal(format!(
                "evidence record {} does not belong to gate {}",
                record.record_id, gate.id
            )));
        }
        if !record.status.is_passed() {
            return Err(GatekeepError::InvalidTransition(format!(
                "latest evidence of gate {} is not passing",
                gate.id
            )));
        }
        let row = SignOffRow {
            gate_id: gate.id.clone(),
            gate_name: gate.name.clone(),
            objective: gate.objective.clone(),
            result: record.status,
            evidence_ref: record.manifest_ref.clone(),
            approver: approval.approver.clone(),
            approved_at: approval.approved_at.clone(),
        };
        if row.approver.is_empty() || row.approved_at.is_empty() || row.evidence_ref.is_empty() {
            return Err(GatekeepError::Validation(format!(
                "sign-off row for gate {} is incomplete",
                gate.id
            )));
        }
        rows.push(row);
    }
    Ok(rows)
}
