use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use proptest::prelude::*;
use serde_json::json;
use tempfile::tempdir;

use super::*;
use crate::collaborator::{CheckError, CheckInvocation, CollaboratorRegistry};
use crate::models::{CheckKind, CheckOutcome, EnvironmentSnapshot};
use crate::test_support::{Scripted, SwitchableEnvironment, outcome};

const PIPELINE: &str = r#"
[pipeline]
name = "edge-stack"
release_id = "2026.10.1"

[contract]
version = "1.0.0"
locked_fields = { runtime = "python-3.11" }

[[gates]]
id = "cycle"
sequence_index = 1
name = "Process cycle"
objective = "ten clean start/stop cycles"

[[gates.checks]]
name = "cycles"
kind = "process_cycle"
params = { cycles = 10 }

[[gates]]
id = "soak"
sequence_index = 2
name = "Soak"
objective = "error rate under budget for the soak window"

[[gates.checks]]
name = "error-rate"
kind = "soak"

[[gates]]
id = "restore"
sequence_index = 3
name = "Restore drill"
objective = "backup restores cleanly"

[[gates.checks]]
name = "drill"
kind = "restore"
"#;

fn config() -> PipelineConfig {
    PipelineConfig::parse(PIPELINE).expect("parse")
}

fn healthy_environment() -> Arc<SwitchableEnvironment> {
    let mut snapshot = EnvironmentSnapshot::new();
    snapshot.insert("runtime".to_string(), json!("python-3.11"));
    snapshot.insert("hostname".to_string(), json!("ci-runner-3"));
    SwitchableEnvironment::new(snapshot)
}

fn registry(cycle: Arc<Scripted>) -> CollaboratorRegistry {
    CollaboratorRegistry::new()
        .with(CheckKind::ProcessCycle, cycle)
        .with(CheckKind::Soak, Scripted::always(outcome(600, 0)))
        .with(CheckKind::Restore, Scripted::always(outcome(1, 0)))
}

fn open(root: &Path, cycle: Arc<Scripted>, probe: Arc<SwitchableEnvironment>) -> PromotionOrchestrator {
    PromotionOrchestrator::open(&config(), root, GateRunner::new(registry(cycle)), probe)
        .expect("open orchestrator")
}

fn failing_then_passing(failures: usize) -> Arc<Scripted> {
    Scripted::sequence(
        (0..failures).map(|_| Ok(outcome(10, 1))).collect(),
        Ok(outcome(10, 0)),
    )
}

fn approval() -> Approval {
    Approval::record_approval("release-manager@edge", "2026-10-19T09:30:00Z")
}

#[test]
fn full_sequence_passes_and_sign_off_promotes() {
    let temp = tempdir().expect("tempdir");
    let mut orchestrator = open(
        temp.path(),
        Scripted::always(outcome(10, 0)),
        healthy_environment(),
    );

    let report = orchestrator.run_sequence().expect("sequence");
    assert_eq!(report.attempts.len(), 3);
    assert_eq!(report.pipeline, PipelineState::AllPassed);
    assert_eq!(report.decision, PromotionStatus::Hold);

    let decision = orchestrator.sign_off(&approval()).expect("sign off");
    assert_eq!(decision.status, PromotionStatus::Promote);
    assert_eq!(decision.sign_off.len(), 3);
    assert_eq!(decision.sign_off[0].objective, "ten clean start/stop cycles");
    assert_eq!(decision.contract_version, semver::Version::new(1, 0, 0));
    assert!(temp.path().join(&decision.decision_ref).is_file());
    assert_eq!(orchestrator.pipeline_state(), PipelineState::ReleaseSigned);
    assert_eq!(orchestrator.promotion_status(), PromotionStatus::Promote);

    orchestrator.verify_release().expect("release verifies");
    assert!(matches!(
        orchestrator.run_gate("cycle"),
        Err(GatekeepError::InvalidTransition(_))
    ));
}

#[test]
fn empty_approver_is_rejected_even_when_every_gate_passed() {
    let temp = tempdir().expect("tempdir");
    let mut orchestrator = open(
        temp.path(),
        Scripted::always(outcome(10, 0)),
        healthy_environment(),
    );
    orchestrator.run_sequence().expect("sequence");
    assert_eq!(orchestrator.pipeline_state(), PipelineState::AllPassed);

    let rejected = orchestrator.sign_off(&Approval::record_approval("", "2026-10-19T09:30:00Z"));
    assert!(matches!(rejected, Err(GatekeepError::Validation(_))));
    assert_eq!(orchestrator.promotion_status(), PromotionStatus::Hold);
    assert!(
        !temp
            .path()
            .join(release_decision_key("2026.10.1"))
            .exists()
    );
}

#[test]
fn sign_off_before_all_gates_pass_is_refused() {
    let temp = tempdir().expect("tempdir");
    let mut orchestrator = open(
        temp.path(),
        Scripted::always(outcome(10, 0)),
        healthy_environment(),
    );
    orchestrator.run_gate("cycle").expect("cycle");
    assert!(matches!(
        orchestrator.sign_off(&approval()),
        Err(GatekeepError::InvalidTransition(_))
    ));
}

#[test]
fn leftover_handle_in_cycle_seven_blocks_the_pipeline() {
    let temp = tempdir().expect("tempdir");
    let cycles = Arc::new(|invocation: &CheckInvocation| {
        let cycles = invocation.params["cycles"].as_u64().unwrap_or(0);
        Ok::<_, CheckError>(
            CheckOutcome::counts(cycles, cycles - 1, 1)
                .with_failing_ids(["cycle-07"])
                .with_artifact("cycle.log", "cycle 7: leftover handle pid=4242"),
        )
    });
    let registry = CollaboratorRegistry::new()
        .with(CheckKind::ProcessCycle, cycles)
        .with(CheckKind::Soak, Scripted::always(outcome(600, 0)))
        .with(CheckKind::Restore, Scripted::always(outcome(1, 0)));
    let mut orchestrator = PromotionOrchestrator::open(
        &config(),
        temp.path(),
        GateRunner::new(registry),
        healthy_environment(),
    )
    .expect("open");

    let report = orchestrator.run_sequence().expect("sequence");
    assert_eq!(report.attempts.len(), 1);
    let attempt = &report.attempts[0];
    assert_eq!(attempt.status, GateStatus::Failed);
    assert_eq!(attempt.state, GateState::Blocked);
    let record = attempt.record.as_ref().expect("evidence record");
    assert_eq!(record.check_result.passed, 9);
    assert_eq!(record.check_result.failed, 1);
    assert_eq!(
        record.artifact_refs,
        vec!["evidence/cycle/attempt-0001/artifacts/cycles/default/cycle.log"]
    );
    let blocker = attempt.blocker.as_ref().expect("blocker");
    assert_eq!(blocker.kind, BlockKind::GateFailure);
    assert!(blocker.description.contains("cycles"));
    assert_eq!(
        report.pipeline,
        PipelineState::Blocked {
            gate_id: "cycle".to_string()
        }
    );
    assert_eq!(orchestrator.gate_state("soak"), Some(GateState::Pending));
}

#[test]
fn retry_requires_a_resolved_blocker_and_restarts_from_the_first_check() {
    let temp = tempdir().expect("tempdir");
    let cycle = failing_then_passing(1);
    let mut orchestrator = open(temp.path(), Arc::clone(&cycle), healthy_environment());

    let first = orchestrator.run_gate("cycle").expect("first attempt");
    assert_eq!(first.status, GateStatus::Failed);
    match first.ensure_passed() {
        Err(GatekeepError::GateFailed { gate_id, reason }) => {
            assert_eq!(gate_id, "cycle");
            assert!(reason.contains("hard checks failed: cycles"), "{reason}");
        }
        other => panic!("expected gate failure, got {other:?}"),
    }

    match orchestrator.run_gate("cycle") {
        Err(GatekeepError::BlockerUnresolved { gate_id, .. }) => assert_eq!(gate_id, "cycle"),
        other => panic!("expected unresolved blocker, got {other:?}"),
    }
    assert!(matches!(
        orchestrator.run_gate("soak"),
        Err(GatekeepError::SequenceViolation(_))
    ));
    assert!(matches!(
        orchestrator.resolve_blocker("cycle", "  ", "restart supervisor"),
        Err(GatekeepError::Validation(_))
    ));
    assert_eq!(cycle.calls(), 1);

    let resolved = orchestrator
        .resolve_blocker(
            "cycle",
            "supervisor leaked a pid file",
            "clean pid directory on stop",
        )
        .expect("resolve");
    assert!(resolved.clears_retry());

    let second = orchestrator.run_gate("cycle").expect("second attempt");
    assert_eq!(second.status, GateStatus::Passed);
    second.ensure_passed().expect("passed");
    assert_eq!(second.attempt, 2);
    assert_eq!(cycle.calls(), 2);
    assert_eq!(
        second.record.expect("record").record_id,
        "cycle/attempt-0002"
    );
}

#[test]
fn two_consecutive_blocks_halt_the_whole_pipeline() {
    let temp = tempdir().expect("tempdir");
    let mut orchestrator = open(temp.path(), failing_then_passing(3), healthy_environment());

    orchestrator.run_gate("cycle").expect("attempt 1");
    orchestrator
        .resolve_blocker("cycle", "stale socket", "unlink socket before start")
        .expect("resolve 1");
    let second = orchestrator.run_gate("cycle").expect("attempt 2");
    let halt = second.halt.expect("halt after second block");
    assert_eq!(halt.gate_id, "cycle");
    assert_eq!(
        orchestrator.pipeline_state(),
        PipelineState::Halted {
            gate_id: "cycle".to_string()
        }
    );

    orchestrator
        .resolve_blocker("cycle", "socket reused by sidecar", "move sidecar port")
        .expect("resolve 2");
    assert!(matches!(
        orchestrator.run_gate("cycle"),
        Err(GatekeepError::PipelineHalted { .. })
    ));
    assert!(matches!(
        orchestrator.record_remediation("soak", "sprint", "ops"),
        Err(GatekeepError::Validation(_))
    ));
    assert!(matches!(
        orchestrator.record_remediation("cycle", "", "ops"),
        Err(GatekeepError::Validation(_))
    ));

    let remediated = orchestrator
        .record_remediation("cycle", "rewrote process supervisor shutdown", "platform-team")
        .expect("remediation");
    assert!(!remediated.is_active());

    // counting starts over after remediation: one more failure does not halt
    let third = orchestrator.run_gate("cycle").expect("attempt 3");
    assert_eq!(third.status, GateStatus::Failed);
    assert!(third.halt.is_none());
    orchestrator
        .resolve_blocker("cycle", "flaky port probe", "probe with retry budget in harness")
        .expect("resolve 3");
    let fourth = orchestrator.run_gate("cycle").expect("attempt 4");
    assert_eq!(fourth.status, GateStatus::Passed);
}

#[test]
fn contract_drift_blocks_before_any_check_runs() {
    let temp = tempdir().expect("tempdir");
    let cycle = Scripted::always(outcome(10, 0));
    let probe = healthy_environment();
    let mut orchestrator = open(temp.path(), Arc::clone(&cycle), Arc::clone(&probe));

    probe.set("runtime", json!("python-3.12"));
    let report = orchestrator.run_gate("cycle").expect("drift attempt");
    assert_eq!(report.status, GateStatus::Failed);
    assert_eq!(cycle.calls(), 0);
    let blocker = report.blocker.expect("blocker");
    assert_eq!(blocker.kind, BlockKind::ContractDrift);
    let record = report.record.expect("aborted record");
    assert!(record.check_result.aborted.is_some());
    assert_eq!(record.check_result.detail["drift"]["field"], "runtime");

    match orchestrator.verify_contract() {
        Err(GatekeepError::ContractDrift(drift)) => {
            assert_eq!(drift.field, "runtime");
            assert_eq!(drift.expected, json!("python-3.11"));
            assert_eq!(drift.actual, Some(json!("python-3.12")));
        }
        other => panic!("expected drift, got {other:?}"),
    }

    let mut locked_fields = BTreeMap::new();
    locked_fields.insert("runtime".to_string(), json!("python-3.12"));
    let change = orchestrator
        .bump_contract(&ContractBump {
            version: semver::Version::new(1, 1, 0),
            locked_fields,
            authorized_by: "platform-lead".to_string(),
            reason: "runtime upgrade approved".to_string(),
        })
        .expect("bump");
    assert_eq!(change.changed_fields, vec!["runtime"]);
    assert!(temp.path().join(&change.evidence_ref).is_file());
    orchestrator.verify_contract().expect("contract holds after bump");

    orchestrator
        .resolve_blocker("cycle", "runtime upgraded on the runner", "bumped contract to 1.1.0")
        .expect("resolve");
    let retried = orchestrator.run_gate("cycle").expect("retry");
    assert_eq!(retried.status, GateStatus::Passed);
}

#[test]
fn failing_probe_is_a_prerequisite_blocker() {
    struct Unreachable;
    impl EnvironmentProbe for Unreachable {
        fn snapshot(&self, _fields: &[String]) -> Result<EnvironmentSnapshot> {
            Err(GatekeepError::Prerequisite(
                "port 8080 already has a listener".to_string(),
            ))
        }
    }

    let temp = tempdir().expect("tempdir");
    let mut orchestrator = PromotionOrchestrator::open(
        &config(),
        temp.path(),
        GateRunner::new(registry(Scripted::always(outcome(10, 0)))),
        Arc::new(Unreachable),
    )
    .expect("open");
    let report = orchestrator.run_gate("cycle").expect("attempt");
    let blocker = report.blocker.expect("blocker");
    assert_eq!(blocker.kind, BlockKind::Prerequisite);
    assert!(blocker.description.contains("8080"));
}

#[test]
fn reopening_restores_blocks_halts_and_contract() {
    let temp = tempdir().expect("tempdir");
    {
        let mut orchestrator = open(temp.path(), failing_then_passing(2), healthy_environment());
        orchestrator.run_gate("cycle").expect("attempt 1");
        orchestrator
            .resolve_blocker("cycle", "a", "b")
            .expect("resolve");
        orchestrator.run_gate("cycle").expect("attempt 2");
        let mut locked_fields = BTreeMap::new();
        locked_fields.insert("runtime".to_string(), json!("python-3.11"));
        locked_fields.insert("gateway_port".to_string(), json!(8080));
        orchestrator
            .bump_contract(&ContractBump {
                version: semver::Version::new(1, 0, 1),
                locked_fields,
                authorized_by: "platform-lead".to_string(),
                reason: "pin gateway port".to_string(),
            })
            .expect("bump");
    }

    let probe = healthy_environment();
    probe.set("gateway_port", json!(8080));
    let mut orchestrator = open(temp.path(), Scripted::always(outcome(10, 0)), probe);
    assert_eq!(orchestrator.contract().version, semver::Version::new(1, 0, 1));
    assert_eq!(
        orchestrator.pipeline_state(),
        PipelineState::Halted {
            gate_id: "cycle".to_string()
        }
    );
    let status = orchestrator.status().expect("status");
    assert_eq!(status.gates[0].attempts, 2);
    assert_eq!(status.gates[0].consecutive_blocks, 2);
    assert_eq!(status.decision, PromotionStatus::Hold);

    orchestrator
        .record_remediation("cycle", "supervisor rewrite", "platform-team")
        .expect("remediate");
    orchestrator
        .resolve_blocker("cycle", "double fork", "single fork supervisor")
        .expect("resolve");
    let third = orchestrator.run_gate("cycle").expect("attempt 3");
    assert_eq!(third.attempt, 3);
    assert_eq!(third.status, GateStatus::Passed);
    drop(orchestrator);

    let orchestrator = open(temp.path(), Scripted::always(outcome(10, 0)), healthy_environment());
    let status = orchestrator.status().expect("status");
    assert_eq!(status.gates[0].state, GateState::Passed);
    assert_eq!(status.gates[0].consecutive_blocks, 0);
    assert!(status.halt.is_none());
    assert_eq!(
        status.pipeline,
        PipelineState::Passed {
            gate_id: "cycle".to_string()
        }
    );
}

#[test]
fn tampered_gate_evidence_prevents_promotion() {
    let temp = tempdir().expect("tempdir");
    let mut orchestrator = open(
        temp.path(),
        Scripted::always(outcome(10, 0)),
        healthy_environment(),
    );
    let report = orchestrator.run_sequence().expect("sequence");
    let soak = report.attempts[1].record.as_ref().expect("soak record");
    fs::write(temp.path().join(&soak.summary_ref), "{\"status\":\"passed\"}\n").expect("tamper");

    match orchestrator.sign_off(&approval()) {
        Err(GatekeepError::EvidenceIntegrity(err)) => assert_eq!(err.artifact, soak.summary_ref),
        other => panic!("expected integrity error, got {other:?}"),
    }
    assert_eq!(orchestrator.promotion_status(), PromotionStatus::Hold);
}

#[test]
fn tampering_after_sign_off_fails_release_verification() {
    let temp = tempdir().expect("tempdir");
    let mut orchestrator = open(
        temp.path(),
        Scripted::always(outcome(10, 0)),
        healthy_environment(),
    );
    orchestrator.run_sequence().expect("sequence");
    let decision = orchestrator.sign_off(&approval()).expect("sign off");

    let restore = &decision.gate_verdicts[2];
    fs::write(temp.path().join(&restore.summary_ref), "edited\n").expect("tamper");
    assert!(matches!(
        orchestrator.verify_release(),
        Err(GatekeepError::EvidenceIntegrity(_))
    ));
    assert!(matches!(
        orchestrator.verify_manifest(&decision.release_manifest_ref),
        Err(GatekeepError::EvidenceIntegrity(_))
    ));
    assert_eq!(orchestrator.promotion_status(), PromotionStatus::Hold);
    assert_eq!(orchestrator.pipeline_state(), PipelineState::Revoked);
}

#[test]
fn integrity_failure_after_sign_off_revokes_the_promotion() {
    let temp = tempdir().expect("tempdir");
    let mut orchestrator = open(
        temp.path(),
        Scripted::always(outcome(10, 0)),
        healthy_environment(),
    );
    orchestrator.run_sequence().expect("sequence");
    let decision = orchestrator.sign_off(&approval()).expect("sign off");
    assert_eq!(orchestrator.status().expect("status").decision, PromotionStatus::Promote);

    let restore = &decision.gate_verdicts[2];
    fs::write(temp.path().join(&restore.summary_ref), "{\"status\":\"passed\"}\n")
        .expect("tamper");
    match orchestrator.verify_manifest(&restore.manifest_ref) {
        Err(GatekeepError::EvidenceIntegrity(err)) => assert_eq!(err.artifact, restore.summary_ref),
        other => panic!("expected integrity error, got {other:?}"),
    }

    let status = orchestrator.status().expect("status");
    assert_eq!(status.decision, PromotionStatus::Hold);
    assert_eq!(status.pipeline, PipelineState::Revoked);
    let revocation = status.revocation.expect("revocation");
    assert_eq!(revocation.artifact, restore.summary_ref);
    assert_eq!(revocation.release_id, "2026.10.1");

    let verifications = orchestrator
        .operation_log()
        .tail(10)
        .expect("tail")
        .into_iter()
        .filter(|entry| entry.operation == "manifest.verify")
        .count();
    assert_eq!(verifications, 2);
    assert!(matches!(
        orchestrator.sign_off(&approval()),
        Err(GatekeepError::InvalidTransition(_))
    ));
    drop(orchestrator);

    let reopened = open(temp.path(), Scripted::always(outcome(10, 0)), healthy_environment());
    assert_eq!(reopened.promotion_status(), PromotionStatus::Hold);
    assert_eq!(reopened.pipeline_state(), PipelineState::Revoked);
    assert_eq!(reopened.revocation(), Some(&revocation));
}

#[test]
fn integrity_failure_before_sign_off_does_not_revoke() {
    let temp = tempdir().expect("tempdir");
    let mut orchestrator = open(
        temp.path(),
        Scripted::always(outcome(10, 0)),
        healthy_environment(),
    );
    let report = orchestrator.run_gate("cycle").expect("cycle");
    let record = report.record.expect("record");
    fs::write(temp.path().join(&record.summary_ref), "edited\n").expect("tamper");

    assert!(orchestrator.verify_manifest(&record.manifest_ref).is_err());
    assert!(orchestrator.revocation().is_none());
    assert!(orchestrator.ledger().revocation("2026.10.1").expect("query").is_none());
}

#[test]
fn failed_ledger_write_leaves_the_gate_where_it_was() {
    let temp = tempdir().expect("tempdir");
    let mut orchestrator = open(
        temp.path(),
        Scripted::always(outcome(10, 0)),
        healthy_environment(),
    );
    let side = rusqlite::Connection::open(temp.path().join(LEDGER_FILE)).expect("side connection");
    side.execute_batch(
        "CREATE TRIGGER reject_attempts BEFORE INSERT ON gate_attempts \
         BEGIN SELECT RAISE(ABORT, 'ledger offline'); END;",
    )
    .expect("trigger");

    assert!(matches!(
        orchestrator.run_gate("cycle"),
        Err(GatekeepError::Sqlite(_))
    ));
    assert_eq!(orchestrator.gate_state("cycle"), Some(GateState::Pending));
    assert_eq!(
        orchestrator.pipeline_state(),
        PipelineState::Pending {
            gate_id: "cycle".to_string()
        }
    );

    side.execute_batch("DROP TRIGGER reject_attempts;").expect("drop trigger");
    let report = orchestrator.run_gate("cycle").expect("retry");
    assert_eq!(report.status, GateStatus::Passed);
    assert_eq!(report.attempt, 2);
    assert_eq!(
        report.record.as_ref().map(|record| record.record_id.as_str()),
        Some("cycle/attempt-0002")
    );
    let rows = orchestrator.ledger().list_attempts("cycle").expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].attempt, 2);
    assert_eq!(rows[0].record_id.as_deref(), Some("cycle/attempt-0002"));
}

#[test]
fn orphaned_evidence_directory_is_skipped_by_attempt_numbering() {
    let temp = tempdir().expect("tempdir");
    let orphan = temp.path().join("evidence/cycle/attempt-0001");
    fs::create_dir_all(&orphan).expect("orphan dir");
    fs::write(orphan.join("summary.json"), "{}\n").expect("orphan summary");
    let mut orchestrator = open(
        temp.path(),
        Scripted::always(outcome(10, 0)),
        healthy_environment(),
    );

    let report = orchestrator.run_gate("cycle").expect("cycle");
    assert_eq!(report.attempt, 2);
    let record = report.record.expect("record");
    assert_eq!(record.attempt, 2);
    let rows = orchestrator.ledger().list_attempts("cycle").expect("rows");
    assert_eq!(rows[0].attempt, record.attempt);
}

#[test]
fn operations_are_logged_with_status_and_errors() {
    let temp = tempdir().expect("tempdir");
    let mut orchestrator = open(temp.path(), failing_then_passing(1), healthy_environment());
    orchestrator.run_gate("cycle").expect("attempt");
    let _ = orchestrator.run_gate("cycle");
    let _ = orchestrator.run_gate("missing");

    let entries = orchestrator.operation_log().tail(10).expect("tail");
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].operation, "gate.run");
    assert_eq!(entries[0].status, "failed");
    assert_eq!(entries[0].gate_id.as_deref(), Some("cycle"));
    assert_eq!(entries[1].status, "error");
    assert_eq!(entries[1].error_code.as_deref(), Some("BLOCKER_UNRESOLVED"));
    assert_eq!(entries[2].error_code.as_deref(), Some("NOT_FOUND"));
}

#[derive(Debug, Clone)]
enum Op {
    Run { gate: usize, pass: bool },
    Resolve(usize),
    Remediate,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..3usize, any::<bool>()).prop_map(|(gate, pass)| Op::Run { gate, pass }),
        2 => (0..3usize).prop_map(Op::Resolve),
        1 => Just(Op::Remediate),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// No trace ever starts a gate whose predecessor has not passed.
    #[test]
    fn prop_gates_only_run_after_their_predecessor_passed(ops in prop::collection::vec(op(), 1..24)) {
        let temp = tempdir().expect("tempdir");
        let pass_next = Arc::new(AtomicBool::new(true));
        let switch = Arc::clone(&pass_next);
        let collaborator = Arc::new(move |_invocation: &CheckInvocation| {
            let failed = u64::from(!switch.load(Ordering::SeqCst));
            Ok::<_, CheckError>(outcome(4, failed))
        });
        let registry = CollaboratorRegistry::new()
            .with(CheckKind::ProcessCycle, collaborator.clone())
            .with(CheckKind::Soak, collaborator.clone())
            .with(CheckKind::Restore, collaborator);
        let mut orchestrator = PromotionOrchestrator::open(
            &config(),
            temp.path(),
            GateRunner::new(registry),
            healthy_environment(),
        )
        .expect("open");
        let ids = ["cycle", "soak", "restore"];

        for op in ops {
            match op {
                Op::Run { gate, pass } => {
                    pass_next.store(pass, Ordering::SeqCst);
                    let _ = orchestrator.run_gate(ids[gate]);
                }
                Op::Resolve(gate) => {
                    let _ = orchestrator.resolve_blocker(ids[gate], "cause", "fix");
                }
                Op::Remediate => {
                    if let Some(halt) = orchestrator.status().expect("status").halt {
                        let _ = orchestrator.record_remediation(&halt.gate_id, "sprint", "ops");
                    }
                }
            }
        }

        let mut replayed = vec![GateState::Pending; ids.len()];
        for transition in orchestrator.transitions() {
            let index = ids
                .iter()
                .position(|id| *id == transition.gate_id)
                .expect("known gate");
            prop_assert_eq!(replayed[index], transition.from);
            if transition.to == GateState::Running {
                prop_assert!(
                    replayed[..index].iter().all(|state| *state == GateState::Passed),
                    "{} started while an earlier gate was {:?}",
                    transition.gate_id,
                    replayed
                );
            }
            replayed[index] = transition.to;
        }
        for (index, state) in replayed.iter().enumerate() {
            if *state != GateState::Pending {
                prop_assert!(replayed[..index].iter().all(|state| *state == GateState::Passed));
            }
        }
    }
}
