//! Process-backed check collaborators and environment probes.
//!
//! A check command prints one JSON object shaped like `CheckOutcome`
//! (`total`, `passed`, `failed`, optional `detail` and `failing_ids`) on
//! stdout. Its stdout and stderr are kept as evidence artifacts.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use gatekeep_core::collaborator::{CheckCollaborator, CheckError, CheckInvocation, CollaboratorRegistry};
use gatekeep_core::config::{EnvSource, PipelineConfig, ProcessEnv};
use gatekeep_core::contract::EnvironmentProbe;
use gatekeep_core::error::{GatekeepError, Result};
use gatekeep_core::models::{CheckOutcome, EnvironmentSnapshot};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const STDERR_TAIL_BYTES: usize = 512;

/// Prefix of the variables [`EnvVarProbe`] reads, e.g. `GATEKEEP_ENV_RUNTIME`.
pub(crate) const ENV_PROBE_PREFIX: &str = "GATEKEEP_ENV_";

fn command_argv(params: &serde_json::Value) -> std::result::Result<Vec<String>, CheckError> {
    let argv = params
        .get("command")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| {
            CheckError::Prerequisite("check params must carry a `command` argv array".to_string())
        })?
        .iter()
        .map(|value| value.as_str().map(ToString::to_string))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| CheckError::Prerequisite("`command` entries must be strings".to_string()))?;
    if argv.is_empty() {
        return Err(CheckError::Prerequisite("`command` is empty".to_string()));
    }
    Ok(argv)
}

fn drain<R: Read + Send + 'static>(reader: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        if let Some(mut reader) = reader {
            let _ = reader.read_to_end(&mut bytes);
        }
        bytes
    })
}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}

/// Waits for `child`, killing it as soon as the invocation is cancelled.
fn wait_or_kill(
    child: &mut Child,
    invocation: &CheckInvocation,
) -> std::result::Result<ExitStatus, CheckError> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if invocation.cancel.is_cancelled() => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CheckError::Failed("cancelled".to_string()));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(err) => return Err(CheckError::Transport(format!("wait failed: {err}"))),
        }
    }
}

/// Runs `params.command` once per invocation.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CommandCollaborator;

impl CommandCollaborator {
    fn command(argv: &[String], invocation: &CheckInvocation) -> Command {
        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("GATEKEEP_GATE", &invocation.gate_id)
            .env("GATEKEEP_CHECK", &invocation.check_name);
        if let Some(subject) = &invocation.subject {
            command.env("GATEKEEP_SUBJECT", subject);
        }
        if let Some(run_index) = invocation.run_index {
            command.env("GATEKEEP_RUN_INDEX", run_index.to_string());
        }
        if let Some(pin) = &invocation.determinism {
            if let Some(seed) = pin.seed {
                command.env("GATEKEEP_SEED", seed.to_string());
            }
            if pin.randomization_disabled {
                command.env("GATEKEEP_RANDOMIZATION", "off");
            }
            command.env("GATEKEEP_CONFIG_FINGERPRINT", pin.fingerprint());
        }
        command
    }
}

impl CheckCollaborator for CommandCollaborator {
    fn invoke(&self, invocation: &CheckInvocation) -> std::result::Result<CheckOutcome, CheckError> {
        let argv = command_argv(&invocation.params)?;
        let mut child = Self::command(&argv, invocation)
            .spawn()
            .map_err(|err| CheckError::Prerequisite(format!("failed to spawn {}: {err}", argv[0])))?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let status = wait_or_kill(&mut child, invocation)?;
        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        if !status.success() {
            return Err(CheckError::Failed(format!(
                "{} exited with {status}: {}",
                argv[0],
                stderr_tail(&stderr)
            )));
        }
        let outcome: CheckOutcome = serde_json::from_slice(&stdout).map_err(|err| {
            CheckError::Transport(format!("{} printed no outcome JSON: {err}", argv[0]))
        })?;
        let mut outcome = outcome.with_artifact("stdout.log", stdout);
        if !stderr.is_empty() {
            outcome = outcome.with_artifact("stderr.log", stderr);
        }
        Ok(outcome)
    }
}

/// One [`CommandCollaborator`] for every check kind the pipeline declares.
pub(crate) fn command_registry(config: &PipelineConfig) -> CollaboratorRegistry {
    let collaborator: Arc<dyn CheckCollaborator> = Arc::new(CommandCollaborator);
    let mut registry = CollaboratorRegistry::new();
    for check in config.gates.iter().flat_map(|gate| gate.checks.iter()) {
        registry.register(check.kind.clone(), Arc::clone(&collaborator));
    }
    registry
}

/// Runs the configured probe command; its stdout is a JSON object of live fields.
#[derive(Debug, Clone)]
pub(crate) struct CommandEnvironmentProbe {
    argv: Vec<String>,
}

impl CommandEnvironmentProbe {
    pub(crate) const fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

impl EnvironmentProbe for CommandEnvironmentProbe {
    fn snapshot(&self, _fields: &[String]) -> Result<EnvironmentSnapshot> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(GatekeepError::Validation("contract probe command is empty".to_string()));
        };
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| GatekeepError::Prerequisite(format!("failed to run probe {program}: {err}")))?;
        if !output.status.success() {
            return Err(GatekeepError::Prerequisite(format!(
                "probe {program} exited with {}: {}",
                output.status,
                stderr_tail(&output.stderr)
            )));
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

/// Reads each locked field from `GATEKEEP_ENV_<FIELD>`; values parse as JSON
/// when they can, else they are taken as strings.
#[derive(Debug, Clone, Default)]
pub(crate) struct EnvVarProbe<E = ProcessEnv> {
    env: E,
}

impl<E> EnvVarProbe<E> {
    pub(crate) const fn new(env: E) -> Self {
        Self { env }
    }
}

impl<E: EnvSource + Send + Sync> EnvironmentProbe for EnvVarProbe<E> {
    fn snapshot(&self, fields: &[String]) -> Result<EnvironmentSnapshot> {
        let mut snapshot = EnvironmentSnapshot::new();
        for field in fields {
            let name = format!("{ENV_PROBE_PREFIX}{}", field.to_ascii_uppercase());
            if let Some(raw) = self.env.var(&name) {
                snapshot.insert(field.clone(), parse_loose_value(&raw));
            }
        }
        Ok(snapshot)
    }
}

/// JSON when it parses, otherwise the raw string.
pub(crate) fn parse_loose_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

pub(crate) fn probe_for(config: &PipelineConfig) -> Arc<dyn EnvironmentProbe> {
    if config.contract.probe.is_empty() {
        Arc::new(EnvVarProbe::new(ProcessEnv))
    } else {
        Arc::new(CommandEnvironmentProbe::new(config.contract.probe.clone()))
    }
}
