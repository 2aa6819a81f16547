//! In-process collaborators and probes with scripted behavior.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::collaborator::{CheckCollaborator, CheckError, CheckInvocation};
use crate::contract::EnvironmentProbe;
use crate::error::Result;
use crate::models::{CheckOutcome, EnvironmentSnapshot};

type Response = std::result::Result<CheckOutcome, CheckError>;

/// `total` observations, `failed` of them failing.
pub(crate) fn outcome(total: u64, failed: u64) -> CheckOutcome {
    CheckOutcome::counts(total, total - failed, failed)
}

/// Replays queued responses, then repeats the fallback forever.
pub(crate) struct Scripted {
    queue: Mutex<VecDeque<Response>>,
    fallback: Response,
    calls: AtomicUsize,
}

impl Scripted {
    pub(crate) fn always(outcome: CheckOutcome) -> Arc<Self> {
        Self::sequence(Vec::new(), Ok(outcome))
    }

    pub(crate) fn erroring(err: CheckError) -> Arc<Self> {
        Self::sequence(Vec::new(), Err(err))
    }

    pub(crate) fn sequence(queue: Vec<Response>, fallback: Response) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(queue.into()),
            fallback,
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CheckCollaborator for Scripted {
    fn invoke(&self, _invocation: &CheckInvocation) -> Response {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let queued = self
            .queue
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front());
        queued.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Sleeps for `duration` unless cancelled first.
pub(crate) struct Sleeper {
    duration: Duration,
    saw_cancel: AtomicBool,
}

impl Sleeper {
    pub(crate) fn new(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            duration,
            saw_cancel: AtomicBool::new(false),
        })
    }

    /// Waits up to `within` for the worker to observe cancellation.
    pub(crate) fn observed_cancel(&self, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if self.saw_cancel.load(Ordering::SeqCst) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        self.saw_cancel.load(Ordering::SeqCst)
    }
}

impl CheckCollaborator for Sleeper {
    fn invoke(&self, invocation: &CheckInvocation) -> Response {
        let deadline = Instant::now() + self.duration;
        while Instant::now() < deadline {
            if invocation.cancel.is_cancelled() {
                self.saw_cancel.store(true, Ordering::SeqCst);
                return Err(CheckError::Failed("cancelled".to_string()));
            }
            thread::sleep(Duration::from_millis(5));
        }
        Ok(CheckOutcome::counts(1, 1, 0))
    }
}

/// Probe whose snapshot tests can change between calls.
#[derive(Default)]
pub(crate) struct SwitchableEnvironment {
    snapshot: Mutex<EnvironmentSnapshot>,
    probes: AtomicUsize,
}

impl SwitchableEnvironment {
    pub(crate) fn new(snapshot: EnvironmentSnapshot) -> Arc<Self> {
        Arc::new(Self {
            snapshot: Mutex::new(snapshot),
            probes: AtomicUsize::new(0),
        })
    }

    pub(crate) fn set(&self, field: &str, value: serde_json::Value) {
        if let Ok(mut snapshot) = self.snapshot.lock() {
            snapshot.insert(field.to_string(), value);
        }
    }

    pub(crate) fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

impl EnvironmentProbe for SwitchableEnvironment {
    fn snapshot(&self, _fields: &[String]) -> Result<EnvironmentSnapshot> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .snapshot
            .lock()
            .map(|snapshot| snapshot.clone())
            .unwrap_or_default())
    }
}
