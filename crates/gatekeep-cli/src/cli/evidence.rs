use std::path::PathBuf;

use clap::{Args, Subcommand};

#[derive(Debug, Args)]
pub struct DeterminismArgs {
    #[command(subcommand)]
    pub command: DeterminismCommand,
}

#[derive(Debug, Subcommand)]
pub enum DeterminismCommand {
    /// Compare two recorded runs; exits non-zero unless they agree exactly.
    Compare {
        #[arg(long)]
        run1: PathBuf,
        #[arg(long)]
        run2: PathBuf,
        /// Gate reported when the runs disagree.
        #[arg(long, default_value = "determinism")]
        gate: String,
    },
}

#[derive(Debug, Args)]
pub struct ManifestArgs {
    #[command(subcommand)]
    pub command: ManifestCommand,
}

#[derive(Debug, Subcommand)]
pub enum ManifestCommand {
    /// Re-hash every artifact listed in the manifest stored under `key`.
    Verify { key: String },
    /// Re-verify the signed release bundle.
    VerifyRelease,
}

#[derive(Debug, Args)]
pub struct ContractArgs {
    #[command(subcommand)]
    pub command: ContractCommand,
}

#[derive(Debug, Subcommand)]
pub enum ContractCommand {
    Verify,
    /// Every recorded contract version, oldest first.
    History,
    Bump {
        #[arg(long)]
        version: String,
        /// `name=value`; the value is read as JSON when it parses, else as a string.
        #[arg(long = "field")]
        fields: Vec<String>,
        #[arg(long)]
        authorized_by: String,
        #[arg(long)]
        reason: String,
    },
}

#[derive(Debug, Args)]
pub struct LogArgs {
    #[command(subcommand)]
    pub command: LogCommand,
}

#[derive(Debug, Subcommand)]
pub enum LogCommand {
    Tail {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}
