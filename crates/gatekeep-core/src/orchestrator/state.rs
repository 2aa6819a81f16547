use chrono::Utc;

use crate::error::{GatekeepError, Result};
use crate::models::{GateState, PipelineHalt, PipelineState, Revocation, Transition};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct GateTrack {
    pub(super) state: GateState,
    pub(super) attempts: u32,
    /// Blocked outcomes since the last pass or remediation sprint.
    pub(super) consecutive_blocks: u32,
    pub(super) latest_record_id: Option<String>,
}

impl Default for GateTrack {
    fn default() -> Self {
        Self {
            state: GateState::Pending,
            attempts: 0,
            consecutive_blocks: 0,
            latest_record_id: None,
        }
    }
}

/// Ordered gate states plus the pipeline-wide halt, sign-off and
/// revocation.
#[derive(Debug, Clone)]
pub(super) struct PipelineMachine {
    gate_ids: Vec<String>,
    tracks: Vec<GateTrack>,
    transitions: Vec<Transition>,
    halt: Option<PipelineHalt>,
    signed: bool,
    revocation: Option<Revocation>,
}

impl PipelineMachine {
    pub(super) fn new(gate_ids: Vec<String>) -> Self {
        let tracks = vec![GateTrack::default(); gate_ids.len()];
        Self {
            gate_ids,
            tracks,
            transitions: Vec::new(),
            halt: None,
            signed: false,
            revocation: None,
        }
    }

    pub(super) fn restore(
        &mut self,
        tracks: Vec<GateTrack>,
        halt: Option<PipelineHalt>,
        signed: bool,
        revocation: Option<Revocation>,
    ) -> Result<()> {
        if tracks.len() != self.gate_ids.len() {
            return Err(GatekeepError::Internal(format!(
                "restored {} gate tracks for {} gates",
                tracks.len(),
                self.gate_ids.len()
            )));
        }
        self.tracks = tracks;
        if revocation.is_some() && !signed {
            return Err(GatekeepError::Internal(
                "release revoked without a sign-off".to_string(),
            ));
        }
        self.halt = halt;
        self.signed = signed;
        self.revocation = revocation;
        Ok(())
    }

    pub(super) fn track(&self, index: usize) -> &GateTrack {
        &self.tracks[index]
    }

    pub(super) fn tracks(&self) -> &[GateTrack] {
        &self.tracks
    }

    pub(super) fn halt(&self) -> Option<&PipelineHalt> {
        self.halt.as_ref()
    }

    pub(super) const fn is_signed(&self) -> bool {
        self.signed
    }

    pub(super) const fn revocation(&self) -> Option<&Revocation> {
        self.revocation.as_ref()
    }

    /// Signed and not revoked.
    pub(super) const fn promotes(&self) -> bool {
        self.signed && self.revocation.is_none()
    }

    pub(super) fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub(super) fn all_passed(&self) -> bool {
        self.tracks
            .iter()
            .all(|track| track.state == GateState::Passed)
    }

    /// Checks that gate `index` may leave Pending or Blocked. Blocker
    /// resolution is checked by the caller, which owns the ledger.
    pub(super) fn ensure_can_start(&self, index: usize) -> Result<()> {
        let gate_id = &self.gate_ids[index];
        if self.signed {
            return Err(GatekeepError::InvalidTransition(
                "release is already signed".to_string(),
            ));
        }
        if let Some(halt) = &self.halt {
            return Err(GatekeepError::PipelineHalted {
                gate_id: halt.gate_id.clone(),
            });
        }
        if let Some(blocking) = self.tracks[..index]
            .iter()
            .position(|track| track.state != GateState::Passed)
        {
            return Err(GatekeepError::SequenceViolation(format!(
                "gate {gate_id} cannot start before gate {} has passed",
                self.gate_ids[blocking]
            )));
        }
        match self.tracks[index].state {
            GateState::Pending | GateState::Blocked => Ok(()),
            GateState::Running => Err(GatekeepError::InvalidTransition(format!(
                "gate {gate_id} is already running"
            ))),
            GateState::Passed => Err(GatekeepError::InvalidTransition(format!(
                "gate {gate_id} has already passed"
            ))),
        }
    }

    fn transition(&mut self, index: usize, to: GateState) {
        let from = self.tracks[index].state;
        self.tracks[index].state = to;
        self.transitions.push(Transition {
            gate_id: self.gate_ids[index].clone(),
            from,
            to,
            at: Utc::now().to_rfc3339(),
        });
    }

    /// Enters Running; returns the state the gate left.
    pub(super) fn start(&mut self, index: usize) -> Result<GateState> {
        self.ensure_can_start(index)?;
        let previous = self.tracks[index].state;
        self.transition(index, GateState::Running);
        Ok(previous)
    }

    /// Returns a running gate to `previous` when its attempt could not be
    /// persisted. Attempt counters stay unchanged.
    pub(super) fn abandon(&mut self, index: usize, previous: GateState) {
        if self.tracks[index].state == GateState::Running {
            self.transition(index, previous);
        }
    }

    /// Ends an attempt. Returns the number of consecutive blocks of the gate.
    pub(super) fn finish(
        &mut self,
        index: usize,
        passed: bool,
        record_id: Option<String>,
    ) -> Result<u32> {
        if self.tracks[index].state != GateState::Running {
            return Err(GatekeepError::InvalidTransition(format!(
                "gate {} is not running",
                self.gate_ids[index]
            )));
        }
        self.close_attempt(index, passed, record_id);
        Ok(self.tracks[index].consecutive_blocks)
    }

    /// A gate stopped by the contract guard before it could run.
    pub(super) fn block_before_start(&mut self, index: usize, record_id: Option<String>) -> Result<u32> {
        self.ensure_can_start(index)?;
        self.close_attempt(index, false, record_id);
        Ok(self.tracks[index].consecutive_blocks)
    }

    fn close_attempt(&mut self, index: usize, passed: bool, record_id: Option<String>) {
        let to = if passed {
            GateState::Passed
        } else {
            GateState::Blocked
        };
        self.transition(index, to);
        let track = &mut self.tracks[index];
        track.attempts += 1;
        if record_id.is_some() {
            track.latest_record_id = record_id;
        }
        track.consecutive_blocks = if passed {
            0
        } else {
            track.consecutive_blocks + 1
        };
    }

    pub(super) fn set_halt(&mut self, halt: PipelineHalt) {
        self.halt = Some(halt);
    }

    pub(super) fn clear_halt(&mut self, index: usize) {
        self.halt = None;
        self.tracks[index].consecutive_blocks = 0;
    }

    pub(super) fn mark_signed(&mut self) {
        self.signed = true;
    }

    pub(super) fn mark_revoked(&mut self, revocation: Revocation) {
        if self.signed && self.revocation.is_none() {
            self.revocation = Some(revocation);
        }
    }

    pub(super) fn pipeline_state(&self) -> PipelineState {
        if self.revocation.is_some() {
            return PipelineState::Revoked;
        }
        if self.signed {
            return PipelineState::ReleaseSigned;
        }
        if let Some(halt) = &self.halt {
            return PipelineState::Halted {
                gate_id: halt.gate_id.clone(),
            };
        }
        let Some(index) = self
            .tracks
            .iter()
            .position(|track| track.state != GateState::Passed)
        else {
            return PipelineState::AllPassed;
        };
        let gate_id = self.gate_ids[index].clone();
        match self.tracks[index].state {
            GateState::Running => PipelineState::Running { gate_id },
            GateState::Blocked => PipelineState::Blocked { gate_id },
            GateState::Pending | GateState::Passed => match index.checked_sub(1) {
                Some(previous) => PipelineState::Passed {
                    gate_id: self.gate_ids[previous].clone(),
                },
                None => PipelineState::Pending { gate_id },
            },
        }
    }
}
