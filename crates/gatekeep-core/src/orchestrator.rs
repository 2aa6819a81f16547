use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::contract::{ContractGuard, EnvironmentProbe};
use crate::error::{GatekeepError, Result};
use crate::evidence::{EvidenceRecorder, release_decision_key};
use crate::ledger::SqliteLedger;
use crate::manifest::Manifest;
use crate::models::{
    Approval, BlockKind, Blocker, CheckResult, Contract, ContractBump, ContractChange,
    EvidenceRecord, Gate, GateAttemptReport, GateState, GateStatus, GateStatusView, PipelineHalt,
    PipelineState, PipelineStatus, PromotionDecision, PromotionStatus, Revocation, SequenceReport,
    Transition,
};
use crate::oplog::OperationLog;
use crate::runner::{GateRun, GateRunner};
use crate::store::LocalArtifactStore;

mod signoff;
mod state;

use state::{GateTrack, PipelineMachine};

pub const LEDGER_FILE: &str = "ledger.sqlite3";

/// Blocked outcomes in a row that halt the whole pipeline.
pub const ESCALATION_THRESHOLD: u32 = 2;

/// Sequences gates, gates retries on resolved blockers, escalates repeated
/// failures into a pipeline halt and produces the terminal sign-off.
pub struct PromotionOrchestrator {
    release_id: String,
    gates: Vec<Gate>,
    guard: ContractGuard,
    probe: Arc<dyn EnvironmentProbe>,
    runner: GateRunner,
    recorder: EvidenceRecorder,
    ledger: SqliteLedger,
    oplog: OperationLog,
    machine: PipelineMachine,
}

impl std::fmt::Debug for PromotionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromotionOrchestrator")
            .field("release_id", &self.release_id)
            .field("pipeline", &self.machine.pipeline_state())
            .finish_non_exhaustive()
    }
}

fn check_environment(guard: &ContractGuard, probe: &dyn EnvironmentProbe) -> Result<()> {
    let live = probe.snapshot(&guard.locked_field_names())?;
    guard.verify(&live).map_err(GatekeepError::from)
}

fn require_text(label: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(GatekeepError::Validation(format!("{label} must not be empty")));
    }
    Ok(())
}

impl PromotionOrchestrator {
    /// Opens the pipeline under `root`, restoring gate states, blockers,
    /// halts, contract version, sign-off and revocation from the ledger.
    pub fn open(
        config: &PipelineConfig,
        root: &Path,
        runner: GateRunner,
        probe: Arc<dyn EnvironmentProbe>,
    ) -> Result<Self> {
        config.validate()?;
        for gate in &config.gates {
            runner.validate(gate)?;
        }
        let store = LocalArtifactStore::open(root)?;
        let recorder = EvidenceRecorder::new(Arc::new(store), config.signer()?);
        let ledger = SqliteLedger::open(root.join(LEDGER_FILE))?;

        let contract = match ledger.latest_contract()? {
            Some(contract) => contract,
            None => {
                let contract = config.contract();
                let change = ContractGuard::initial_change(&contract, &Utc::now().to_rfc3339());
                if !recorder.store().exists(&change.evidence_ref)? {
                    recorder.write_contract_change(&change)?;
                }
                ledger.record_contract_change(&change)?;
                contract
            }
        };

        let release_id = config.pipeline.release_id.clone();
        let gates = config.gates.clone();
        let mut machine = PipelineMachine::new(gates.iter().map(|gate| gate.id.clone()).collect());
        let mut tracks = Vec::with_capacity(gates.len());
        for gate in &gates {
            tracks.push(restore_track(&ledger, &gate.id)?);
        }
        machine.restore(
            tracks,
            ledger.active_halt()?,
            ledger.sign_off(&release_id)?.is_some(),
            ledger.revocation(&release_id)?,
        )?;

        Ok(Self {
            release_id,
            gates,
            guard: ContractGuard::new(contract),
            probe,
            runner,
            recorder,
            ledger,
            oplog: OperationLog::under(root),
            machine,
        })
    }

    #[must_use]
    pub fn release_id(&self) -> &str {
        &self.release_id
    }

    #[must_use]
    pub fn gates(&self) -> &[Gate] {
        &self.gates
    }

    #[must_use]
    pub const fn contract(&self) -> &Contract {
        self.guard.contract()
    }

    #[must_use]
    pub const fn recorder(&self) -> &EvidenceRecorder {
        &self.recorder
    }

    #[must_use]
    pub const fn ledger(&self) -> &SqliteLedger {
        &self.ledger
    }

    #[must_use]
    pub const fn operation_log(&self) -> &OperationLog {
        &self.oplog
    }

    /// Transitions observed by this process, oldest first.
    #[must_use]
    pub fn transitions(&self) -> &[Transition] {
        self.machine.transitions()
    }

    #[must_use]
    pub fn pipeline_state(&self) -> PipelineState {
        self.machine.pipeline_state()
    }

    /// PROMOTE only once the release is signed and no integrity failure has
    /// revoked it; HOLD otherwise.
    #[must_use]
    pub const fn promotion_status(&self) -> PromotionStatus {
        if self.machine.promotes() {
            PromotionStatus::Promote
        } else {
            PromotionStatus::Hold
        }
    }

    #[must_use]
    pub const fn revocation(&self) -> Option<&Revocation> {
        self.machine.revocation()
    }

    #[must_use]
    pub fn gate_state(&self, gate_id: &str) -> Option<GateState> {
        self.gate_index(gate_id)
            .ok()
            .map(|index| self.machine.track(index).state)
    }

    fn gate_index(&self, gate_id: &str) -> Result<usize> {
        self.gates
            .iter()
            .position(|gate| gate.id == gate_id)
            .ok_or_else(|| GatekeepError::NotFound(format!("gate {gate_id}")))
    }

    fn log_outcome<T>(
        &self,
        request_id: String,
        operation: &str,
        started: Instant,
        gate_id: Option<&str>,
        outcome: &Result<T>,
        describe: impl FnOnce(&T) -> (String, Option<serde_json::Value>),
    ) {
        match outcome {
            Ok(value) => {
                let (status, details) = describe(value);
                self.oplog.log_status(
                    request_id,
                    operation,
                    &status,
                    started,
                    gate_id.map(ToString::to_string),
                    details,
                );
            }
            Err(err) => self.oplog.log_error(
                request_id,
                operation,
                started,
                gate_id.map(ToString::to_string),
                err,
                None,
            ),
        }
    }

    pub fn verify_contract(&self) -> Result<Contract> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let outcome = check_environment(&self.guard, self.probe.as_ref())
            .map(|()| self.guard.contract().clone());
        self.log_outcome(request_id, "contract.verify", started, None, &outcome, |contract| {
            (
                "ok".to_string(),
                Some(json!({ "version": contract.version.to_string() })),
            )
        });
        outcome
    }

    /// Runs one gate attempt. A failed attempt is a normal outcome: the
    /// returned report carries the blocker (and halt, on escalation).
    pub fn run_gate(&mut self, gate_id: &str) -> Result<GateAttemptReport> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let outcome = self
            .gate_index(gate_id)
            .and_then(|index| self.attempt_gate(index));
        self.log_outcome(request_id, "gate.run", started, Some(gate_id), &outcome, |report| {
            (
                report.status.as_str().to_string(),
                Some(json!({
                    "attempt": report.attempt,
                    "state": report.state.as_str(),
                    "record_id": report.record.as_ref().map(|record| record.record_id.clone()),
                    "halted": report.halt.is_some(),
                })),
            )
        });
        outcome
    }

    fn ensure_retry_allowed(&self, index: usize) -> Result<()> {
        if self.machine.track(index).state != GateState::Blocked {
            return Ok(());
        }
        let gate_id = &self.gates[index].id;
        match self.ledger.latest_blocker(gate_id)? {
            Some(blocker) if blocker.clears_retry() => Ok(()),
            Some(blocker) => Err(GatekeepError::BlockerUnresolved {
                gate_id: gate_id.clone(),
                reason: format!(
                    "blocker #{} ({}) needs a root cause and fix description",
                    blocker.id,
                    blocker.kind.as_str()
                ),
            }),
            None => Err(GatekeepError::BlockerUnresolved {
                gate_id: gate_id.clone(),
                reason: "no blocker recorded for the last failure".to_string(),
            }),
        }
    }

    /// Next attempt number of `gate_id`, above both the ledger and any
    /// evidence directory already on disk.
    fn next_attempt(&self, gate_id: &str) -> Result<u32> {
        let recorded = self
            .ledger
            .last_attempt(gate_id)?
            .max(self.recorder.last_attempt(gate_id)?);
        Ok(recorded + 1)
    }

    fn attempt_gate(&mut self, index: usize) -> Result<GateAttemptReport> {
        self.machine.ensure_can_start(index)?;
        self.ensure_retry_allowed(index)?;
        let gate = self.gates[index].clone();
        let attempt = self.next_attempt(&gate.id)?;

        if let Err(err) = check_environment(&self.guard, self.probe.as_ref()) {
            return self.block_before_start(index, attempt, &gate, &err);
        }

        let previous = self.machine.start(index)?;
        let run = {
            let guard = &self.guard;
            let probe = self.probe.as_ref();
            let precondition = || check_environment(guard, probe);
            self.runner.run_guarded(&gate, &precondition)
        };
        let written =
            self.recorder
                .record_attempt(&gate.id, attempt, run.result.clone(), &run.artifacts);
        let (record, write_error) = match written {
            Ok(record) => (Some(record), None),
            Err(err) => (None, Some(err)),
        };
        let passed = run.passed() && record.is_some();
        let record_id = record.as_ref().map(|record| record.record_id.clone());
        let status = GateStatus::from_passed(passed);

        if let Err(err) = self
            .ledger
            .record_attempt(&gate.id, attempt, status, record_id.as_deref())
        {
            self.machine.abandon(index, previous);
            return Err(err);
        }
        let consecutive = self.machine.finish(index, passed, record_id.clone())?;

        let (blocker, halt) = if passed {
            (None, None)
        } else {
            let (kind, description) = failure_cause(&run, write_error.as_ref());
            self.block(index, attempt, kind, &description, record_id.as_deref(), consecutive)?
        };

        Ok(GateAttemptReport {
            gate_id: gate.id,
            attempt,
            status,
            state: self.machine.track(index).state,
            record,
            blocker,
            halt,
        })
    }

    /// The contract guard (or the probe behind it) refused the gate: record
    /// an aborted attempt and block without entering Running.
    fn block_before_start(
        &mut self,
        index: usize,
        attempt: u32,
        gate: &Gate,
        err: &GatekeepError,
    ) -> Result<GateAttemptReport> {
        let (kind, mut description) = match err {
            GatekeepError::ContractDrift(drift) => {
                (BlockKind::ContractDrift, format!("contract drift: {drift}"))
            }
            other => (BlockKind::Prerequisite, other.to_string()),
        };
        let now = Utc::now().to_rfc3339();
        let mut result = CheckResult::aborted_before_start(&gate.id, &description, &now);
        result.detail.insert(
            "contract_version".to_string(),
            json!(self.guard.contract().version.to_string()),
        );
        if let GatekeepError::ContractDrift(drift) = err {
            result
                .detail
                .insert("drift".to_string(), serde_json::to_value(drift)?);
        }
        let record = match self.recorder.record_attempt(&gate.id, attempt, result, &[]) {
            Ok(record) => Some(record),
            Err(write_err) => {
                description = format!("{description}; evidence write failed: {write_err}");
                None
            }
        };
        let record_id = record.as_ref().map(|record| record.record_id.clone());

        self.ledger
            .record_attempt(&gate.id, attempt, GateStatus::Failed, record_id.as_deref())?;
        let consecutive = self.machine.block_before_start(index, record_id.clone())?;
        let (blocker, halt) = self.block(
            index,
            attempt,
            kind,
            &description,
            record_id.as_deref(),
            consecutive,
        )?;

        Ok(GateAttemptReport {
            gate_id: gate.id.clone(),
            attempt,
            status: GateStatus::Failed,
            state: self.machine.track(index).state,
            record,
            blocker,
            halt,
        })
    }

    fn block(
        &mut self,
        index: usize,
        attempt: u32,
        kind: BlockKind,
        description: &str,
        record_id: Option<&str>,
        consecutive: u32,
    ) -> Result<(Option<Blocker>, Option<PipelineHalt>)> {
        let gate_id = self.gates[index].id.clone();
        let blocker = self
            .ledger
            .open_blocker(&gate_id, attempt, kind, description, record_id)?;
        let halt = if consecutive >= ESCALATION_THRESHOLD {
            let halt = self.ledger.open_halt(&gate_id, attempt)?;
            self.machine.set_halt(halt.clone());
            Some(halt)
        } else {
            None
        };
        Ok((Some(blocker), halt))
    }

    /// Runs the remaining gates in order and stops at the first failure.
    pub fn run_sequence(&mut self) -> Result<SequenceReport> {
        let mut attempts = Vec::new();
        for index in 0..self.gates.len() {
            if self.machine.track(index).state == GateState::Passed {
                continue;
            }
            let gate_id = self.gates[index].id.clone();
            let report = self.run_gate(&gate_id)?;
            let passed = report.status.is_passed();
            attempts.push(report);
            if !passed {
                break;
            }
        }
        Ok(SequenceReport {
            attempts,
            pipeline: self.machine.pipeline_state(),
            decision: self.promotion_status(),
        })
    }

    pub fn resolve_blocker(
        &mut self,
        gate_id: &str,
        root_cause: &str,
        fix_description: &str,
    ) -> Result<Blocker> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let outcome = self.resolve_blocker_inner(gate_id, root_cause, fix_description);
        self.log_outcome(request_id, "blocker.resolve", started, Some(gate_id), &outcome, |blocker| {
            ("resolved".to_string(), Some(json!({ "blocker_id": blocker.id })))
        });
        outcome
    }

    fn resolve_blocker_inner(
        &self,
        gate_id: &str,
        root_cause: &str,
        fix_description: &str,
    ) -> Result<Blocker> {
        require_text("root cause", root_cause)?;
        require_text("fix description", fix_description)?;
        let index = self.gate_index(gate_id)?;
        if self.machine.track(index).state != GateState::Blocked {
            return Err(GatekeepError::InvalidTransition(format!(
                "gate {gate_id} is not blocked"
            )));
        }
        self.ledger
            .resolve_blocker(gate_id, root_cause.trim(), fix_description.trim())
    }

    /// Lifts a pipeline halt raised by `gate_id`.
    pub fn record_remediation(
        &mut self,
        gate_id: &str,
        summary: &str,
        owner: &str,
    ) -> Result<PipelineHalt> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let outcome = self.record_remediation_inner(gate_id, summary, owner);
        self.log_outcome(request_id, "remediation.record", started, Some(gate_id), &outcome, |halt| {
            ("recorded".to_string(), Some(json!({ "halt_id": halt.id })))
        });
        outcome
    }

    fn record_remediation_inner(
        &mut self,
        gate_id: &str,
        summary: &str,
        owner: &str,
    ) -> Result<PipelineHalt> {
        require_text("remediation summary", summary)?;
        require_text("remediation owner", owner)?;
        let index = self.gate_index(gate_id)?;
        let halt = self.machine.halt().cloned().ok_or_else(|| {
            GatekeepError::InvalidTransition("pipeline is not halted".to_string())
        })?;
        if halt.gate_id != gate_id {
            return Err(GatekeepError::Validation(format!(
                "pipeline was halted by gate {}, not {gate_id}",
                halt.gate_id
            )));
        }
        let remediated = self
            .ledger
            .record_remediation(halt.id, summary.trim(), owner.trim())?;
        self.machine.clear_halt(index);
        Ok(remediated)
    }

    pub fn bump_contract(&mut self, bump: &ContractBump) -> Result<ContractChange> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let outcome = self.bump_contract_inner(bump);
        self.log_outcome(request_id, "contract.bump", started, None, &outcome, |change| {
            (
                "recorded".to_string(),
                Some(json!({
                    "version": change.contract.version.to_string(),
                    "changed_fields": change.changed_fields,
                    "authorized_by": change.authorized_by,
                })),
            )
        });
        outcome
    }

    fn bump_contract_inner(&mut self, bump: &ContractBump) -> Result<ContractChange> {
        if self.machine.is_signed() {
            return Err(GatekeepError::InvalidTransition(
                "release is already signed".to_string(),
            ));
        }
        let change = self
            .guard
            .prepare_bump(bump, &Utc::now().to_rfc3339())?;
        self.recorder.write_contract_change(&change)?;
        self.ledger.record_contract_change(&change)?;
        self.guard.adopt(change.contract.clone());
        Ok(change)
    }

    /// Records the external approval and produces the PROMOTE decision.
    /// Every gate's evidence is re-verified first.
    pub fn sign_off(&mut self, approval: &Approval) -> Result<PromotionDecision> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let outcome = self.sign_off_inner(approval);
        self.log_outcome(request_id, "release.sign_off", started, None, &outcome, |decision| {
            (
                decision.status.as_str().to_string(),
                Some(json!({
                    "release_id": decision.release_id,
                    "approver": decision.approver,
                    "release_manifest_ref": decision.release_manifest_ref,
                })),
            )
        });
        outcome
    }

    fn sign_off_inner(&mut self, approval: &Approval) -> Result<PromotionDecision> {
        let approval = signoff::validate_approval(approval)?;
        if self.machine.is_signed() {
            return Err(GatekeepError::InvalidTransition(
                "release is already signed".to_string(),
            ));
        }
        if self.machine.halt().is_some() || !self.machine.all_passed() {
            return Err(GatekeepError::InvalidTransition(format!(
                "sign-off requires every gate to pass; pipeline is {:?}",
                self.machine.pipeline_state()
            )));
        }

        let (records, manifests) = self.verified_gate_evidence()?;
        let sign_off = signoff::sign_off_rows(&self.gates, &records, &approval)?;
        let release_manifest_ref = self
            .recorder
            .write_release_manifest(&self.release_id, &manifests)?;
        let decision = PromotionDecision {
            release_id: self.release_id.clone(),
            status: PromotionStatus::Promote,
            contract_version: self.guard.contract().version.clone(),
            gate_verdicts: records,
            sign_off,
            approver: approval.approver,
            approved_at: approval.approved_at,
            release_manifest_ref,
            decision_ref: release_decision_key(&self.release_id),
        };
        self.recorder.write_decision(&decision)?;
        self.ledger.record_sign_off(&decision)?;
        self.machine.mark_signed();
        Ok(decision)
    }

    fn verified_gate_evidence(&self) -> Result<(Vec<EvidenceRecord>, Vec<Manifest>)> {
        let mut records = Vec::with_capacity(self.gates.len());
        let mut manifests = Vec::with_capacity(self.gates.len());
        for (gate, track) in self.gates.iter().zip(self.machine.tracks()) {
            let record_id = track.latest_record_id.as_deref().ok_or_else(|| {
                GatekeepError::Internal(format!("gate {} has no evidence record", gate.id))
            })?;
            let record = self.recorder.load_record(record_id)?;
            manifests.push(self.recorder.verify_record(&record)?);
            records.push(record);
        }
        Ok((records, manifests))
    }

    /// Re-verifies the signed release bundle: the release manifest and every
    /// gate record behind it. An integrity failure revokes the PROMOTE
    /// decision for good.
    pub fn verify_release(&mut self) -> Result<PromotionDecision> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let outcome = self.verify_release_inner();
        let outcome = self.revoke_on_integrity_failure(outcome);
        self.log_outcome(request_id, "manifest.verify", started, None, &outcome, |decision| {
            (
                "ok".to_string(),
                Some(json!({ "release_manifest_ref": decision.release_manifest_ref })),
            )
        });
        outcome
    }

    fn verify_release_inner(&self) -> Result<PromotionDecision> {
        let decision = self
            .ledger
            .sign_off(&self.release_id)?
            .ok_or_else(|| GatekeepError::NotFound(format!("sign-off of release {}", self.release_id)))?;
        self.recorder.verify_key(&decision.release_manifest_ref)?;
        for record in &decision.gate_verdicts {
            self.recorder.verify_record(record)?;
        }
        Ok(decision)
    }

    /// Verifies one stored manifest. Once the release is signed, a failure
    /// revokes it and the whole bundle is re-verified.
    pub fn verify_manifest(&mut self, key: &str) -> Result<Manifest> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let outcome = self.recorder.verify_key(key);
        let failed_integrity = matches!(outcome, Err(GatekeepError::EvidenceIntegrity(_)));
        let outcome = self.revoke_on_integrity_failure(outcome);
        self.log_outcome(request_id, "manifest.verify", started, None, &outcome, |manifest| {
            (
                "ok".to_string(),
                Some(json!({ "key": key, "entries": manifest.entries.len() })),
            )
        });
        if failed_integrity && self.machine.is_signed() {
            // logged on its own; the caller gets this key's failure
            let _ = self.verify_release();
        }
        outcome
    }

    /// Persists a revocation when `outcome` is an integrity failure of a
    /// signed release. A revocation that cannot be stored replaces the
    /// outcome with the storage error.
    fn revoke_on_integrity_failure<T>(&mut self, outcome: Result<T>) -> Result<T> {
        let Err(GatekeepError::EvidenceIntegrity(integrity)) = &outcome else {
            return outcome;
        };
        if !self.machine.is_signed() {
            return outcome;
        }
        let revocation = self.ledger.record_revocation(&self.release_id, integrity)?;
        self.machine.mark_revoked(revocation);
        outcome
    }

    /// Every recorded contract version, oldest first.
    pub fn contract_history(&self) -> Result<Vec<ContractChange>> {
        self.ledger.contract_history()
    }

    pub fn latest_blocker(&self, gate_id: &str) -> Result<Option<Blocker>> {
        self.gate_index(gate_id)?;
        self.ledger.latest_blocker(gate_id)
    }

    pub fn status(&self) -> Result<PipelineStatus> {
        let mut gates = Vec::with_capacity(self.gates.len());
        for (gate, track) in self.gates.iter().zip(self.machine.tracks()) {
            gates.push(GateStatusView {
                gate_id: gate.id.clone(),
                sequence_index: gate.sequence_index,
                name: gate.name.clone(),
                state: track.state,
                attempts: track.attempts,
                consecutive_blocks: track.consecutive_blocks,
                latest_record_id: track.latest_record_id.clone(),
                blocker: self.ledger.latest_blocker(&gate.id)?,
            });
        }
        Ok(PipelineStatus {
            release_id: self.release_id.clone(),
            pipeline: self.machine.pipeline_state(),
            decision: self.promotion_status(),
            contract_version: self.guard.contract().version.clone(),
            gates,
            halt: self.machine.halt().cloned(),
            revocation: self.machine.revocation().cloned(),
        })
    }
}

fn restore_track(ledger: &SqliteLedger, gate_id: &str) -> Result<GateTrack> {
    let rows = ledger.list_attempts(gate_id)?;
    let remediated = ledger.last_remediated_attempt(gate_id)?.unwrap_or(0);
    let Some(last) = rows.last() else {
        return Ok(GateTrack::default());
    };
    let consecutive_blocks = rows
        .iter()
        .rev()
        .take_while(|row| row.status == GateStatus::Failed && row.attempt > remediated)
        .count();
    Ok(GateTrack {
        state: if last.status.is_passed() {
            GateState::Passed
        } else {
            GateState::Blocked
        },
        attempts: u32::try_from(rows.len()).unwrap_or(u32::MAX),
        consecutive_blocks: u32::try_from(consecutive_blocks).unwrap_or(u32::MAX),
        latest_record_id: rows.iter().rev().find_map(|row| row.record_id.clone()),
    })
}

fn failure_cause(run: &GateRun, write_error: Option<&GatekeepError>) -> (BlockKind, String) {
    let write_note = write_error.map(|err| format!("evidence write failed: {err}"));
    if run.passed() {
        return (
            BlockKind::EvidenceWrite,
            write_note.unwrap_or_else(|| "evidence write failed".to_string()),
        );
    }
    let (kind, mut description) = match &run.abort {
        Some(abort) => (abort.kind, abort.message.clone()),
        None => {
            let failed = run.result.failed_hard_checks();
            let description = if failed.is_empty() {
                format!("pass predicate {} rejected the result", run.result.predicate)
            } else {
                format!("hard checks failed: {}", failed.join(", "))
            };
            (BlockKind::GateFailure, description)
        }
    };
    if let Some(note) = write_note {
        description.push_str("; ");
        description.push_str(&note);
    }
    (kind, description)
}

#[cfg(test)]
mod tests;
