use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use gatekeep_core::GatekeepError;
use gatekeep_core::config::PipelineConfig;
use gatekeep_core::models::{Approval, ContractBump};
use gatekeep_core::runner::{GateRunner, RunnerSettings};
use gatekeep_core::{DeterminismComparator, PromotionOrchestrator};

use crate::cli::{
    BlockerCommand, Cli, Commands, ContractCommand, DeterminismCommand, GateCommand, LogCommand,
    ManifestCommand, RemediationCommand, SequenceCommand,
};
use crate::collaborators::{command_registry, probe_for};

mod support;

use self::support::{parse_fields, print_json, read_run};

pub(crate) fn run(cli: Cli) -> Result<()> {
    if let Commands::Determinism(args) = cli.command {
        return match args.command {
            DeterminismCommand::Compare { run1, run2, gate } => compare_runs(&run1, &run2, &gate),
        };
    }

    let config = PipelineConfig::load(&cli.config)
        .with_context(|| format!("failed to load pipeline config {}", cli.config.display()))?;
    let mut orchestrator = open_orchestrator(&config, &cli.root)?;
    run_with(&mut orchestrator, cli.command)
}

fn open_orchestrator(config: &PipelineConfig, root: &Path) -> Result<PromotionOrchestrator> {
    let runner = GateRunner::new(command_registry(config))
        .with_settings(RunnerSettings::from(config.execution));
    PromotionOrchestrator::open(config, root, runner, probe_for(config))
        .with_context(|| format!("failed to open evidence root {}", root.display()))
}

fn compare_runs(run1: &Path, run2: &Path, gate_id: &str) -> Result<()> {
    let verdict = DeterminismComparator::compare(read_run(run1)?, read_run(run2)?)?;
    print_json(&verdict)?;
    verdict.ensure_deterministic(gate_id)?;
    Ok(())
}

/// Writes the structured payload of a core error to stderr.
pub(crate) fn report_error(operation: &str, err: &anyhow::Error) {
    let Some(core) = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<GatekeepError>())
    else {
        return;
    };
    let payload = core.to_payload(operation, core.gate_id().map(ToString::to_string));
    if let Ok(rendered) = serde_json::to_string(&payload) {
        eprintln!("{rendered}");
    }
}

fn run_with(orchestrator: &mut PromotionOrchestrator, command: Commands) -> Result<()> {
    match command {
        Commands::Gate(args) => match args.command {
            GateCommand::Run { gate_id } => {
                let report = orchestrator.run_gate(&gate_id)?;
                print_json(&report)?;
                report.ensure_passed()?;
            }
        },
        Commands::Sequence(args) => match args.command {
            SequenceCommand::Run => {
                let report = orchestrator.run_sequence()?;
                print_json(&report)?;
                report.ensure_passed()?;
            }
        },
        Commands::Manifest(args) => match args.command {
            ManifestCommand::Verify { key } => {
                let manifest = orchestrator.verify_manifest(&key)?;
                print_json(&serde_json::json!({
                    "status": "ok",
                    "key": key,
                    "entries": manifest.entries.len(),
                    "signed": manifest.signature.is_some(),
                }))?;
            }
            ManifestCommand::VerifyRelease => {
                let decision = orchestrator.verify_release()?;
                print_json(&serde_json::json!({
                    "status": "ok",
                    "release_id": decision.release_id,
                    "decision": decision.status,
                    "release_manifest_ref": decision.release_manifest_ref,
                }))?;
            }
        },
        Commands::Blocker(args) => match args.command {
            BlockerCommand::Show { gate_id } => {
                print_json(&orchestrator.latest_blocker(&gate_id)?)?;
            }
            BlockerCommand::Resolve {
                gate_id,
                root_cause,
                fix,
            } => {
                print_json(&orchestrator.resolve_blocker(&gate_id, &root_cause, &fix)?)?;
            }
        },
        Commands::Remediation(args) => match args.command {
            RemediationCommand::Record {
                gate_id,
                summary,
                owner,
            } => {
                print_json(&orchestrator.record_remediation(&gate_id, &summary, &owner)?)?;
            }
        },
        Commands::Contract(args) => match args.command {
            ContractCommand::Verify => {
                print_json(&orchestrator.verify_contract()?)?;
            }
            ContractCommand::History => {
                print_json(&orchestrator.contract_history()?)?;
            }
            ContractCommand::Bump {
                version,
                fields,
                authorized_by,
                reason,
            } => {
                let version = semver::Version::parse(&version)
                    .with_context(|| format!("invalid contract version '{version}'"))?;
                let mut locked_fields = orchestrator.contract().locked_fields.clone();
                locked_fields.extend(parse_fields(&fields)?);
                let change = orchestrator.bump_contract(&ContractBump {
                    version,
                    locked_fields,
                    authorized_by,
                    reason,
                })?;
                print_json(&change)?;
            }
        },
        Commands::Status => {
            print_json(&orchestrator.status()?)?;
        }
        Commands::SignOff(args) => {
            let approved_at = args
                .approved_at
                .unwrap_or_else(|| Utc::now().to_rfc3339());
            let decision = orchestrator.sign_off(&Approval::record_approval(&args.approver, &approved_at))?;
            print_json(&decision)?;
        }
        Commands::Log(args) => match args.command {
            LogCommand::Tail { limit } => {
                print_json(&orchestrator.operation_log().tail(limit)?)?;
            }
        },
        Commands::Determinism(_) => {
            anyhow::bail!("determinism commands do not open an evidence root");
        }
    }
    Ok(())
}
