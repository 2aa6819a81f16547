use crate::error::{GatekeepError, Result};
use crate::models::{DeterminismRun, DeterminismVerdict};

/// Exact comparison of two pinned runs of the same suite.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeterminismComparator;

impl DeterminismComparator {
    /// Runs may be passed in either order. A verdict exists only for exactly
    /// one run 1 and one run 2, both asserted pinned under one configuration.
    pub fn compare(run1: DeterminismRun, run2: DeterminismRun) -> Result<DeterminismVerdict> {
        let (run1, run2) = match (run1.run_index, run2.run_index) {
            (1, 2) => (run1, run2),
            (2, 1) => (run2, run1),
            (left, right) => {
                return Err(GatekeepError::Validation(format!(
                    "determinism runs must be indexed 1 and 2, got {left} and {right}"
                )));
            }
        };
        if !run1.pinned || !run2.pinned {
            return Err(GatekeepError::Validation(
                "determinism runs must assert a pinned configuration".to_string(),
            ));
        }
        if run1.config_fingerprint != run2.config_fingerprint {
            return Err(GatekeepError::Validation(format!(
                "determinism runs used different configurations: {} vs {}",
                run1.config_fingerprint, run2.config_fingerprint
            )));
        }

        let mut mismatches = Vec::new();
        if run1.pass_count != run2.pass_count {
            mismatches.push(format!(
                "pass_count {} != {}",
                run1.pass_count, run2.pass_count
            ));
        }
        if run1.fail_count != run2.fail_count {
            mismatches.push(format!(
                "fail_count {} != {}",
                run1.fail_count, run2.fail_count
            ));
        }
        let only_first = run1
            .failing_ids
            .difference(&run2.failing_ids)
            .cloned()
            .collect::<Vec<_>>();
        let only_second = run2
            .failing_ids
            .difference(&run1.failing_ids)
            .cloned()
            .collect::<Vec<_>>();
        if !only_first.is_empty() {
            mismatches.push(format!("failing only in run 1: {}", only_first.join(", ")));
        }
        if !only_second.is_empty() {
            mismatches.push(format!("failing only in run 2: {}", only_second.join(", ")));
        }

        Ok(DeterminismVerdict {
            deterministic: mismatches.is_empty(),
            config_fingerprint: run1.config_fingerprint.clone(),
            run1,
            run2,
            mismatches,
        })
    }
}
