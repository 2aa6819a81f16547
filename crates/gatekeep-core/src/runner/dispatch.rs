use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Instant;

use crate::collaborator::{CancelToken, CheckCollaborator, CheckError, CheckInvocation};
use crate::models::{CheckOutcome, CheckStatus, SubjectReport};

/// Result of invoking one subject of one check.
pub(super) struct SubjectRun {
    pub(super) subject: String,
    pub(super) report: SubjectReport,
    /// Present only when the collaborator returned trustworthy counts.
    pub(super) outcome: Option<CheckOutcome>,
    pub(super) fatal: Option<CheckError>,
}

impl SubjectRun {
    fn unobserved(subject: &str, status: CheckStatus, reason: impl Into<String>) -> Self {
        Self {
            subject: subject.to_string(),
            report: SubjectReport::unobserved(status, reason),
            outcome: None,
            fatal: None,
        }
    }

    fn from_result(subject: &str, result: Result<CheckOutcome, CheckError>) -> Self {
        match result {
            Ok(outcome) => match outcome.count_defect() {
                Some(defect) => Self::unobserved(subject, CheckStatus::Errored, defect),
                None => Self {
                    subject: subject.to_string(),
                    report: SubjectReport {
                        status: CheckStatus::Completed,
                        total: outcome.total,
                        passed: outcome.passed,
                        failed: outcome.failed,
                        error: None,
                    },
                    outcome: Some(outcome),
                    fatal: None,
                },
            },
            Err(err) => {
                let mut run = Self::unobserved(subject, CheckStatus::Errored, err.to_string());
                if err.is_fatal() {
                    run.fatal = Some(err);
                }
                run
            }
        }
    }
}

struct Slot {
    subject: String,
    cancel: CancelToken,
    run: Option<SubjectRun>,
}

/// Invokes `collaborator` once per subject, at most `max_parallel` at a time.
///
/// Every subject comes back with a status: nothing is left pending when this
/// returns. A fatal collaborator error cancels `template.cancel`, and every
/// subject not yet reported is recorded as cancelled.
pub(super) fn dispatch(
    collaborator: Option<Arc<dyn CheckCollaborator>>,
    template: &CheckInvocation,
    subjects: &[String],
    declared_subjects: bool,
    max_parallel: usize,
) -> Vec<SubjectRun> {
    let Some(collaborator) = collaborator else {
        let reason = format!("no collaborator registered for check kind {}", template.kind);
        return subjects
            .iter()
            .map(|subject| SubjectRun::unobserved(subject, CheckStatus::Errored, reason.clone()))
            .collect();
    };

    let mut runs = Vec::with_capacity(subjects.len());
    let mut pending = subjects.iter();
    loop {
        let batch = pending.by_ref().take(max_parallel.max(1)).collect::<Vec<_>>();
        if batch.is_empty() {
            break;
        }
        if template.cancel.is_cancelled() {
            runs.extend(batch.into_iter().map(|subject| {
                SubjectRun::unobserved(subject, CheckStatus::Cancelled, "gate cancelled")
            }));
            continue;
        }
        runs.extend(run_batch(&collaborator, template, &batch, declared_subjects));
    }
    runs
}

fn run_batch(
    collaborator: &Arc<dyn CheckCollaborator>,
    template: &CheckInvocation,
    batch: &[&String],
    declared_subjects: bool,
) -> Vec<SubjectRun> {
    let (tx, rx) = mpsc::channel::<(usize, Result<CheckOutcome, CheckError>)>();
    let deadline = Instant::now() + template.timeout;

    let mut slots = Vec::with_capacity(batch.len());
    for (index, subject) in batch.iter().enumerate() {
        let cancel = template.cancel.child();
        let invocation = CheckInvocation {
            subject: declared_subjects.then(|| (*subject).clone()),
            cancel: cancel.clone(),
            ..template.clone()
        };
        let collaborator = Arc::clone(collaborator);
        let tx = tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("gatekeep-check-{}", template.check_name))
            .spawn(move || {
                let result = collaborator.invoke(&invocation);
                let _ = tx.send((index, result));
            });
        let run = spawned.err().map(|err| {
            SubjectRun::unobserved(
                subject,
                CheckStatus::Errored,
                format!("failed to spawn check worker: {err}"),
            )
        });
        slots.push(Slot {
            subject: (*subject).clone(),
            cancel,
            run,
        });
    }
    drop(tx);

    let mut fatal_seen = false;
    let mut disconnected = false;
    while !fatal_seen && slots.iter().any(|slot| slot.run.is_none()) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        match rx.recv_timeout(deadline - now) {
            Ok((index, result)) => {
                let Some(slot) = slots.get_mut(index) else {
                    continue;
                };
                let run = SubjectRun::from_result(&slot.subject, result);
                if run.fatal.is_some() {
                    fatal_seen = true;
                    template.cancel.cancel();
                }
                slot.run = Some(run);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                disconnected = true;
                break;
            }
        }
    }

    let timeout_ms = template.timeout.as_millis();
    slots
        .into_iter()
        .map(|slot| {
            if let Some(run) = slot.run {
                return run;
            }
            slot.cancel.cancel();
            if fatal_seen {
                SubjectRun::unobserved(
                    &slot.subject,
                    CheckStatus::Cancelled,
                    "cancelled after a fatal failure in another subject",
                )
            } else if disconnected {
                SubjectRun::unobserved(
                    &slot.subject,
                    CheckStatus::Errored,
                    "check worker exited without reporting (panicked)",
                )
            } else {
                SubjectRun::unobserved(
                    &slot.subject,
                    CheckStatus::TimedOut,
                    format!("no result within {timeout_ms} ms"),
                )
            }
        })
        .collect()
}
