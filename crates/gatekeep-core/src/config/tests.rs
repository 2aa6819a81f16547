use std::collections::BTreeMap;

use super::*;
use crate::models::{CheckKind, CheckThreshold, PredicateSpec};

const PIPELINE: &str = r#"
[pipeline]
name = "edge-stack"
release_id = "2026.10.1"

[execution]
default_timeout_ms = 5000
max_parallel_checks = 3

[contract]
version = "1.2.0"
locked_fields = { runtime = "python-3.11", gateway_port = 8080 }

[[gates]]
id = "cycle"
sequence_index = 1
name = "Process cycle"
objective = "ten clean start/stop cycles"

[[gates.checks]]
name = "cycles"
kind = "process_cycle"
subjects = ["gateway", "router"]
params = { cycles = 10 }

[[gates.checks]]
name = "startup-latency"
kind = "custom:latency"
hard = false

[[gates]]
id = "soak"
sequence_index = 2
name = "Soak"
predicate = { rule = "hard_checks_with_budget", max_failed_hard_checks = 0 }

[[gates.checks]]
name = "error-rate"
kind = "soak"
timeout_ms = 60000
threshold = { max_failure_rate_pct = 0.5 }

[[gates]]
id = "determinism"
sequence_index = 3
name = "Determinism"

[gates.determinism]
seed = 42
randomization_disabled = true

[[gates.checks]]
name = "suite"
kind = "integration"
"#;

fn parsed() -> PipelineConfig {
    PipelineConfig::parse(PIPELINE).expect("parse")
}

#[test]
fn parses_full_pipeline() {
    let config = parsed();
    config.validate().expect("valid");
    assert_eq!(config.pipeline.release_id, "2026.10.1");
    assert_eq!(config.execution.max_parallel_checks, 3);
    assert_eq!(config.contract.version, semver::Version::new(1, 2, 0));
    assert_eq!(config.contract.locked_fields["gateway_port"], 8080);
    assert_eq!(config.gates.len(), 3);

    let cycle = &config.gates[0];
    assert_eq!(cycle.checks[0].kind, CheckKind::ProcessCycle);
    assert!(cycle.checks[0].hard);
    assert_eq!(cycle.checks[0].subjects, vec!["gateway", "router"]);
    assert_eq!(cycle.checks[0].params["cycles"], 10);
    assert!(!cycle.checks[1].hard);
    assert_eq!(cycle.checks[1].kind, CheckKind::Custom("latency".to_string()));
    assert_eq!(cycle.predicate, PredicateSpec::AllHardChecks);

    let soak = &config.gates[1];
    assert_eq!(
        soak.predicate,
        PredicateSpec::HardChecksWithBudget {
            max_failed_hard_checks: 0
        }
    );
    assert_eq!(
        soak.checks[0].threshold,
        Some(CheckThreshold::MaxFailureRatePct(0.5))
    );
    assert_eq!(soak.checks[0].timeout_ms, Some(60_000));

    let pin = config.gates[2].determinism.as_ref().expect("pin");
    assert_eq!(pin.seed, Some(42));
}

#[test]
fn env_overrides_execution_and_signing() {
    let mut config = parsed();
    let env: BTreeMap<String, String> = [
        (ENV_CHECK_TIMEOUT_MS, "1500"),
        (ENV_MAX_PARALLEL_CHECKS, "0"),
        (ENV_SIGNING_KEY, "s3cret"),
        (ENV_SIGNING_KEY_ID, "release-2026"),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value.to_string()))
    .collect();
    config.apply_env(&env);

    assert_eq!(config.execution.default_timeout_ms, 1500);
    // below the minimum, so the file value stays
    assert_eq!(config.execution.max_parallel_checks, 3);
    let signer = config.signer().expect("signer").expect("configured");
    assert_eq!(signer.key_id(), "release-2026");
    assert!(!format!("{config:?}").contains("s3cret"));
}

#[test]
fn signer_is_absent_without_key() {
    let mut config = parsed();
    config.apply_env(&BTreeMap::<String, String>::new());
    assert!(config.signer().expect("signer").is_none());
}

#[test]
fn rejects_non_increasing_sequence_index() {
    let mut config = parsed();
    config.gates[1].sequence_index = 1;
    let err = config.validate().expect_err("must fail");
    assert!(err.to_string().contains("sequence_index"), "{err}");
}

#[test]
fn rejects_gate_without_hard_check() {
    let mut config = parsed();
    for check in &mut config.gates[0].checks {
        check.hard = false;
    }
    assert!(matches!(
        config.validate(),
        Err(GatekeepError::Validation(message)) if message.contains("no hard check")
    ));
}

#[test]
fn rejects_duplicate_ids_and_check_names() {
    let mut config = parsed();
    config.gates[1].id = "cycle".to_string();
    assert!(config.validate().is_err());

    let mut config = parsed();
    let duplicate = config.gates[0].checks[0].clone();
    config.gates[0].checks.push(duplicate);
    assert!(config.validate().is_err());
}

#[test]
fn rejects_ineffective_determinism_pin_and_bad_thresholds() {
    let mut config = parsed();
    config.gates[2].determinism = Some(crate::models::DeterminismPin::default());
    assert!(config.validate().is_err());

    let mut config = parsed();
    config.gates[1].checks[0].threshold = Some(CheckThreshold::MaxFailureRatePct(150.0));
    assert!(config.validate().is_err());
}

#[test]
fn rejects_path_like_identifiers() {
    let mut config = parsed();
    config.gates[0].id = "../cycle".to_string();
    assert!(config.validate().is_err());

    let mut config = parsed();
    config.gates[0].checks[0].subjects = vec!["api gateway".to_string()];
    assert!(config.validate().is_err());
}

#[test]
fn rejects_empty_pipeline_and_bad_toml() {
    let mut config = parsed();
    config.gates.clear();
    assert!(config.validate().is_err());
    assert!(matches!(
        PipelineConfig::parse("[pipeline]\nname = 1"),
        Err(GatekeepError::Toml(_))
    ));
}
