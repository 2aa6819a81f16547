use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;

use crate::error::ContractDriftError;
use crate::models::{CheckKind, CheckOutcome, DeterminismPin};

/// Cooperative cancellation flag. A child token observes its own flag and
/// every ancestor's.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    own: Arc<AtomicBool>,
    ancestors: Vec<Arc<AtomicBool>>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn child(&self) -> Self {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(Arc::clone(&self.own));
        Self {
            own: Arc::new(AtomicBool::new(false)),
            ancestors,
        }
    }

    pub fn cancel(&self) {
        self.own.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.own.load(Ordering::SeqCst)
            || self
                .ancestors
                .iter()
                .any(|flag| flag.load(Ordering::SeqCst))
    }
}

/// Everything a collaborator is told about one subject of one check.
#[derive(Debug, Clone)]
pub struct CheckInvocation {
    pub gate_id: String,
    pub check_name: String,
    pub kind: CheckKind,
    /// `None` when the check declares no subjects.
    pub subject: Option<String>,
    pub params: serde_json::Value,
    pub timeout: Duration,
    /// Set on determinism gates; the collaborator must honor it.
    pub determinism: Option<DeterminismPin>,
    pub run_index: Option<u8>,
    pub cancel: CancelToken,
}

#[derive(Debug, Clone, Error)]
pub enum CheckError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("check could not complete: {0}")]
    Failed(String),

    /// Fatal: aborts the whole gate.
    #[error("prerequisite not met: {0}")]
    Prerequisite(String),

    /// Fatal: aborts the whole gate.
    #[error("contract drift: {0}")]
    ContractDrift(ContractDriftError),
}

impl CheckError {
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Prerequisite(_) | Self::ContractDrift(_))
    }
}

/// One class of verification: cycle tester, soak generator, security suite,
/// restore drill, integration suite.
pub trait CheckCollaborator: Send + Sync {
    fn invoke(&self, invocation: &CheckInvocation) -> Result<CheckOutcome, CheckError>;
}

impl<F> CheckCollaborator for F
where
    F: Fn(&CheckInvocation) -> Result<CheckOutcome, CheckError> + Send + Sync,
{
    fn invoke(&self, invocation: &CheckInvocation) -> Result<CheckOutcome, CheckError> {
        self(invocation)
    }
}

#[derive(Clone, Default)]
pub struct CollaboratorRegistry {
    by_kind: HashMap<CheckKind, Arc<dyn CheckCollaborator>>,
}

impl fmt::Debug for CollaboratorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds = self.kinds();
        kinds.sort();
        f.debug_struct("CollaboratorRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

impl CollaboratorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: CheckKind, collaborator: Arc<dyn CheckCollaborator>) {
        self.by_kind.insert(kind, collaborator);
    }

    #[must_use]
    pub fn with(mut self, kind: CheckKind, collaborator: Arc<dyn CheckCollaborator>) -> Self {
        self.register(kind, collaborator);
        self
    }

    #[must_use]
    pub fn get(&self, kind: &CheckKind) -> Option<Arc<dyn CheckCollaborator>> {
        self.by_kind.get(kind).cloned()
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<CheckKind> {
        self.by_kind.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_observes_parent_cancellation_but_not_siblings() {
        let gate = CancelToken::new();
        let first = gate.child();
        let second = gate.child();
        first.cancel();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(!gate.is_cancelled());

        let grandchild = second.child();
        gate.cancel();
        assert!(second.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn closures_register_as_collaborators() {
        let registry = CollaboratorRegistry::new().with(
            CheckKind::Soak,
            Arc::new(|_: &CheckInvocation| {
                Ok::<_, CheckError>(CheckOutcome::counts(3, 3, 0))
            }),
        );
        let invocation = CheckInvocation {
            gate_id: "soak".to_string(),
            check_name: "error-rate".to_string(),
            kind: CheckKind::Soak,
            subject: None,
            params: serde_json::Value::Null,
            timeout: Duration::from_secs(1),
            determinism: None,
            run_index: None,
            cancel: CancelToken::new(),
        };
        let outcome = registry
            .get(&CheckKind::Soak)
            .expect("registered")
            .invoke(&invocation)
            .expect("invoke");
        assert_eq!(outcome.passed, 3);
        assert!(registry.get(&CheckKind::Restore).is_none());
    }

    #[test]
    fn only_prerequisite_and_drift_are_fatal() {
        assert!(CheckError::Prerequisite("port 8080 in use".to_string()).is_fatal());
        assert!(!CheckError::Transport("connection reset".to_string()).is_fatal());
        assert!(!CheckError::Failed("exit 2".to_string()).is_fatal());
    }
}
