use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use gatekeep_core::models::DeterminismRun;

use crate::collaborators::parse_loose_value;

pub(super) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

pub(super) fn read_run(path: &Path) -> Result<DeterminismRun> {
    let raw = std::fs::read(path)
        .with_context(|| format!("failed to read determinism run {}", path.display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("invalid determinism run JSON in {}", path.display()))
}

/// Parses repeated `name=value` flags.
pub(super) fn parse_fields(values: &[String]) -> Result<BTreeMap<String, serde_json::Value>> {
    let mut fields = BTreeMap::new();
    for raw in values {
        let (name, value) = raw
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("invalid --field value '{raw}': expected name=value"))?;
        let name = name.trim();
        if name.is_empty() {
            anyhow::bail!("invalid --field value '{raw}': empty name");
        }
        if fields
            .insert(name.to_string(), parse_loose_value(value.trim()))
            .is_some()
        {
            anyhow::bail!("--field {name} given more than once");
        }
    }
    Ok(fields)
}
