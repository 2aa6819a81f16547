use clap::{Args, Subcommand};

#[derive(Debug, Args)]
pub struct GateArgs {
    #[command(subcommand)]
    pub command: GateCommand,
}

#[derive(Debug, Subcommand)]
pub enum GateCommand {
    /// Run one gate from its first check.
    Run { gate_id: String },
}

#[derive(Debug, Args)]
pub struct SequenceArgs {
    #[command(subcommand)]
    pub command: SequenceCommand,
}

#[derive(Debug, Subcommand)]
pub enum SequenceCommand {
    /// Run the remaining gates in order, stopping at the first failure.
    Run,
}

#[derive(Debug, Args)]
pub struct BlockerArgs {
    #[command(subcommand)]
    pub command: BlockerCommand,
}

#[derive(Debug, Subcommand)]
pub enum BlockerCommand {
    Show {
        gate_id: String,
    },
    Resolve {
        gate_id: String,
        #[arg(long)]
        root_cause: String,
        #[arg(long)]
        fix: String,
    },
}

#[derive(Debug, Args)]
pub struct RemediationArgs {
    #[command(subcommand)]
    pub command: RemediationCommand,
}

#[derive(Debug, Subcommand)]
pub enum RemediationCommand {
    Record {
        gate_id: String,
        #[arg(long)]
        summary: String,
        #[arg(long)]
        owner: String,
    },
}

#[derive(Debug, Args)]
pub struct SignOffArgs {
    #[arg(long)]
    pub approver: String,
    /// RFC 3339; defaults to now.
    #[arg(long)]
    pub approved_at: Option<String>,
}
