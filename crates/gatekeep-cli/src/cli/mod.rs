use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod evidence;
mod pipeline;


pub use evidence::{
    ContractArgs, ContractCommand, DeterminismArgs, DeterminismCommand, LogArgs, LogCommand,
    ManifestArgs, ManifestCommand,
};
pub use pipeline::{
    BlockerArgs, BlockerCommand, GateArgs, GateCommand, RemediationArgs, RemediationCommand,
    SequenceArgs, SequenceCommand, SignOffArgs,
};

#[derive(Debug, Parser)]
#[command(name = "gatekeep")]
#[command(about = "Release gates with verifiable evidence and a PROMOTE/HOLD decision", version)]
pub struct Cli {
    /// Evidence root: artifact store, ledger and operation log.
    #[arg(long, default_value = ".gatekeep")]
    pub root: PathBuf,

    #[arg(long, default_value = "pipeline.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Gate(GateArgs),
    Sequence(SequenceArgs),
    Determinism(DeterminismArgs),
    Manifest(ManifestArgs),
    Blocker(BlockerArgs),
    Remediation(RemediationArgs),
    Contract(ContractArgs),
    Status,
    SignOff(SignOffArgs),
    Log(LogArgs),
}

impl Commands {
    /// Operation name used in error payloads.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Gate(_) => "gate.run",
            Self::Sequence(_) => "sequence.run",
            Self::Determinism(_) => "determinism.compare",
            Self::Manifest(_) => "manifest.verify",
            Self::Blocker(args) => match args.command {
                BlockerCommand::Show { .. } => "blocker.show",
                BlockerCommand::Resolve { .. } => "blocker.resolve",
            },
            Self::Remediation(_) => "remediation.record",
            Self::Contract(args) => match args.command {
                ContractCommand::Verify => "contract.verify",
                ContractCommand::History => "contract.history",
                ContractCommand::Bump { .. } => "contract.bump",
            },
            Self::Status => "status",
            Self::SignOff(_) => "release.sign_off",
            Self::Log(_) => "log.tail",
        }
    }
}
