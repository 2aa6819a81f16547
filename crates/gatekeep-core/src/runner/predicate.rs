use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{GatekeepError, Result};
use crate::models::{CheckResult, CheckStatus, PredicateSpec};

/// Gate-level pass rule. The runner ANDs every verdict with
/// [`zero_tolerance_floor`], so a predicate can only narrow what passes.
pub trait PassPredicate: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(&self, result: &CheckResult) -> bool;
}

/// Every hard check completed, and no more of them missed their pass
/// condition than an explicit `hard_checks_with_budget` allows.
pub(crate) fn zero_tolerance_floor(result: &CheckResult, spec: &PredicateSpec) -> bool {
    let budget = match spec {
        PredicateSpec::HardChecksWithBudget {
            max_failed_hard_checks,
        } => *max_failed_hard_checks,
        PredicateSpec::AllHardChecks | PredicateSpec::Named { .. } => 0,
    };
    result
        .hard_checks()
        .all(|check| check.status == CheckStatus::Completed)
        && result.failed_hard_checks().len() <= budget
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllHardChecks;

impl PassPredicate for AllHardChecks {
    fn name(&self) -> &str {
        "all_hard_checks"
    }

    fn evaluate(&self, result: &CheckResult) -> bool {
        result.hard_checks().all(|check| check.met)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HardChecksWithBudget {
    pub max_failed_hard_checks: usize,
}

impl PassPredicate for HardChecksWithBudget {
    fn name(&self) -> &str {
        "hard_checks_with_budget"
    }

    fn evaluate(&self, result: &CheckResult) -> bool {
        result.failed_hard_checks().len() <= self.max_failed_hard_checks
    }
}

#[derive(Clone, Default)]
pub struct PredicateRegistry {
    named: HashMap<String, Arc<dyn PassPredicate>>,
}

impl fmt::Debug for PredicateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.named.keys().collect::<Vec<_>>();
        names.sort();
        f.debug_struct("PredicateRegistry")
            .field("named", &names)
            .finish()
    }
}

impl PredicateRegistry {
    pub fn register(&mut self, predicate: Arc<dyn PassPredicate>) {
        self.named.insert(predicate.name().to_string(), predicate);
    }

    pub fn resolve(&self, spec: &PredicateSpec) -> Result<Arc<dyn PassPredicate>> {
        match spec {
            PredicateSpec::AllHardChecks => Ok(Arc::new(AllHardChecks)),
            PredicateSpec::HardChecksWithBudget {
                max_failed_hard_checks,
            } => Ok(Arc::new(HardChecksWithBudget {
                max_failed_hard_checks: *max_failed_hard_checks,
            })),
            PredicateSpec::Named { name } => self.named.get(name).cloned().ok_or_else(|| {
                GatekeepError::Validation(format!("unknown pass predicate: {name}"))
            }),
        }
    }
}
