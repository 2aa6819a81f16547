use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GatekeepError, Result};
use crate::manifest::ManifestSigner;
use crate::models::{Contract, Gate};

mod env;

pub use env::{EnvSource, ProcessEnv};

use env::{read_env_u64, read_env_usize, read_non_empty_env};

pub const ENV_CHECK_TIMEOUT_MS: &str = "GATEKEEP_CHECK_TIMEOUT_MS";
pub const ENV_MAX_PARALLEL_CHECKS: &str = "GATEKEEP_MAX_PARALLEL_CHECKS";
pub const ENV_SIGNING_KEY: &str = "GATEKEEP_SIGNING_KEY";
pub const ENV_SIGNING_KEY_ID: &str = "GATEKEEP_SIGNING_KEY_ID";

const DEFAULT_CHECK_TIMEOUT_MS: u64 = 300_000;
const DEFAULT_MAX_PARALLEL_CHECKS: usize = 4;
const DEFAULT_SIGNING_KEY_ID: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSection {
    pub name: String,
    pub release_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub default_timeout_ms: u64,
    pub max_parallel_checks: usize,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_CHECK_TIMEOUT_MS,
            max_parallel_checks: DEFAULT_MAX_PARALLEL_CHECKS,
        }
    }
}

impl ExecutionSettings {
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSection {
    pub version: semver::Version,
    #[serde(default)]
    pub locked_fields: BTreeMap<String, serde_json::Value>,
    /// argv of a command printing the live environment as a JSON object.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub probe: Vec<String>,
}

impl ContractSection {
    #[must_use]
    pub fn contract(&self) -> Contract {
        Contract {
            version: self.version.clone(),
            locked_fields: self.locked_fields.clone(),
        }
    }
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// Only ever populated from the environment.
    #[serde(skip)]
    key: Option<String>,
}

impl fmt::Debug for SigningSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningSection")
            .field("key_id", &self.key_id)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A pipeline definition as declared in `pipeline.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub execution: ExecutionSettings,
    pub contract: ContractSection,
    #[serde(default)]
    pub signing: SigningSection,
    #[serde(default)]
    pub gates: Vec<Gate>,
}

impl PipelineConfig {
    /// Reads, applies process-environment overrides and validates.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            GatekeepError::Validation(format!(
                "cannot read pipeline config {}: {err}",
                path.display()
            ))
        })?;
        let mut config = Self::parse(&raw)?;
        config.apply_env(&ProcessEnv);
        config.validate()?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply_env(&mut self, env: &dyn EnvSource) {
        if let Some(timeout_ms) = read_env_u64(env, ENV_CHECK_TIMEOUT_MS).filter(|ms| *ms > 0) {
            self.execution.default_timeout_ms = timeout_ms;
        }
        self.execution.max_parallel_checks = read_env_usize(
            env,
            ENV_MAX_PARALLEL_CHECKS,
            self.execution.max_parallel_checks,
            1,
        );
        if let Some(key_id) = read_non_empty_env(env, ENV_SIGNING_KEY_ID) {
            self.signing.key_id = Some(key_id);
        }
        self.signing.key = read_non_empty_env(env, ENV_SIGNING_KEY);
    }

    #[must_use]
    pub fn contract(&self) -> Contract {
        self.contract.contract()
    }

    /// Manifest signer, present only when a key was supplied through the environment.
    pub fn signer(&self) -> Result<Option<ManifestSigner>> {
        let Some(key) = self.signing.key.as_deref() else {
            return Ok(None);
        };
        let key_id = self
            .signing
            .key_id
            .as_deref()
            .unwrap_or(DEFAULT_SIGNING_KEY_ID);
        ManifestSigner::new(key_id, key.as_bytes()).map(Some)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.name.trim().is_empty() {
            return Err(GatekeepError::Validation("pipeline.name is empty".to_string()));
        }
        validate_segment("pipeline.release_id", &self.pipeline.release_id)?;
        if self.execution.default_timeout_ms == 0 {
            return Err(GatekeepError::Validation(
                "execution.default_timeout_ms must be positive".to_string(),
            ));
        }
        if self.execution.max_parallel_checks == 0 {
            return Err(GatekeepError::Validation(
                "execution.max_parallel_checks must be at least 1".to_string(),
            ));
        }
        if self.gates.is_empty() {
            return Err(GatekeepError::Validation(
                "pipeline declares no gates".to_string(),
            ));
        }

        let mut gate_ids = HashSet::new();
        let mut previous_index: Option<u32> = None;
        for gate in &self.gates {
            validate_segment("gate id", &gate.id)?;
            if !gate_ids.insert(gate.id.as_str()) {
                return Err(GatekeepError::Validation(format!(
                    "duplicate gate id: {}",
                    gate.id
                )));
            }
            if let Some(previous) = previous_index
                && gate.sequence_index <= previous
            {
                return Err(GatekeepError::Validation(format!(
                    "gate {} has sequence_index {} which does not increase on {}",
                    gate.id, gate.sequence_index, previous
                )));
            }
            previous_index = Some(gate.sequence_index);
            validate_gate(gate)?;
        }
        Ok(())
    }
}

fn validate_gate(gate: &Gate) -> Result<()> {
    if gate.checks.is_empty() {
        return Err(GatekeepError::Validation(format!(
            "gate {} declares no checks",
            gate.id
        )));
    }
    if !gate.checks.iter().any(|check| check.hard) {
        return Err(GatekeepError::Validation(format!(
            "gate {} declares no hard check",
            gate.id
        )));
    }
    let mut names = HashSet::new();
    for check in &gate.checks {
        validate_segment("check name", &check.name)?;
        if !names.insert(check.name.as_str()) {
            return Err(GatekeepError::Validation(format!(
                "gate {} declares check {} twice",
                gate.id, check.name
            )));
        }
        if check.timeout_ms == Some(0) {
            return Err(GatekeepError::Validation(format!(
                "check {}/{} has a zero timeout",
                gate.id, check.name
            )));
        }
        if let Some(threshold) = &check.threshold {
            threshold.validate()?;
        }
        let mut subjects = HashSet::new();
        for subject in &check.subjects {
            validate_segment("subject", subject)?;
            if !subjects.insert(subject.as_str()) {
                return Err(GatekeepError::Validation(format!(
                    "check {}/{} lists subject {} twice",
                    gate.id, check.name, subject
                )));
            }
        }
    }
    if let Some(pin) = &gate.determinism
        && !pin.is_effective()
    {
        return Err(GatekeepError::Validation(format!(
            "determinism gate {} pins nothing (set a seed, disable randomization or freeze inputs)",
            gate.id
        )));
    }
    Ok(())
}

/// Identifiers end up as path segments of evidence keys.
fn validate_segment(label: &str, value: &str) -> Result<()> {
    let valid = !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(GatekeepError::Validation(format!(
            "{label} '{value}' must be non-empty and use only [A-Za-z0-9._-]"
        )))
    }
}

#[cfg(test)]
mod tests;
