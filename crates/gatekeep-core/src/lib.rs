// Public fallible APIs in this crate share one error type (`GatekeepError`).
#![allow(
    clippy::missing_errors_doc,
    reason = "crate-wide fallible API uses one explicit error type; per-item boilerplate would duplicate contract"
)]

pub mod collaborator;
pub mod config;
pub mod contract;
pub mod determinism;
pub mod error;
pub mod evidence;
pub mod ledger;
pub mod manifest;
pub mod models;
pub mod oplog;
pub mod orchestrator;
pub mod runner;
pub mod store;

#[cfg(test)]
mod test_support;

pub use collaborator::{CancelToken, CheckCollaborator, CheckError, CheckInvocation, CollaboratorRegistry};
pub use config::PipelineConfig;
pub use contract::{ContractGuard, EnvironmentProbe, StaticEnvironment};
pub use determinism::DeterminismComparator;
pub use error::{ContractDriftError, EvidenceIntegrityError, GatekeepError, Result};
pub use evidence::EvidenceRecorder;
pub use manifest::{Manifest, ManifestSigner};
pub use orchestrator::PromotionOrchestrator;
pub use runner::{GateRunner, PassPredicate, RunnerSettings};
pub use store::{ArtifactStore, LocalArtifactStore};
