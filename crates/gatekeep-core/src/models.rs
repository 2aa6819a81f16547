mod blocker;
mod check;
mod contract;
mod determinism;
mod evidence;
mod gate;
mod oplog;
mod promotion;

pub use blocker::{BlockKind, Blocker, PipelineHalt, RemediationSprint};
pub use check::{
    CheckArtifact, CheckKind, CheckOutcome, CheckReport, CheckSpec, CheckStatus, CheckThreshold,
    DEFAULT_SUBJECT, SubjectReport,
};
pub use contract::{Contract, ContractBump, ContractChange, EnvironmentSnapshot};
pub use determinism::{DeterminismPin, DeterminismRun, DeterminismVerdict};
pub use evidence::{EvidenceRecord, EvidenceSummary};
pub use gate::{CheckResult, Gate, GateStatus, PredicateSpec};
pub use oplog::OperationLogEntry;
pub use promotion::{
    Approval, GateAttemptReport, GateState, GateStatusView, PipelineState, PipelineStatus,
    PromotionDecision, PromotionStatus, Revocation, SequenceReport, SignOffRow, Transition,
};
