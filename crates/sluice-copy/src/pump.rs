//! Shared pump vocabulary: directions, control commands, completion codes,
//! and the verdict types the pumps hand back to the engine.
//!
//! A pump never destroys itself and never touches the job table. Every
//! entry point returns a value describing what happened; the engine decides
//! what to do with the slot. That is what makes the mid-callback
//! use-after-free of self-deleting state machines impossible here.

use crate::error::ControlError;
use serde::Serialize;
use sluice_readiness::{EventLoop, Interest, Token};
use std::fmt;

// ─── Direction ──────────────────────────────────────────────────────────────

/// One transfer direction of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    /// Bytes flowing out of the descriptor into the engine.
    In,
    /// Bytes flowing from the engine into the descriptor.
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }

    /// The readiness bit this direction is driven by.
    pub fn interest(&self) -> Interest {
        match self {
            Direction::In => Interest::INPUT,
            Direction::Out => Interest::OUTPUT,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Control commands ───────────────────────────────────────────────────────

/// Lifecycle commands a client may issue against a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Start,
    /// Pause both directions.
    Stop,
    /// Pause only the input side.
    StopIn,
    /// Pause only the output side.
    StopOut,
    /// Resume both directions.
    Cont,
    ContIn,
    ContOut,
    /// Stop accepting input; keep draining anything already buffered.
    Term,
    /// End immediately, discarding buffered, undelivered bytes.
    Kill,
}

impl Control {
    pub fn as_str(&self) -> &'static str {
        match self {
            Control::Start => "start",
            Control::Stop => "stop",
            Control::StopIn => "stop-in",
            Control::StopOut => "stop-out",
            Control::Cont => "cont",
            Control::ContIn => "cont-in",
            Control::ContOut => "cont-out",
            Control::Term => "term",
            Control::Kill => "kill",
        }
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a control command did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Started,
    Stopped,
    Resumed,
    /// The job was already in the requested state.
    Already,
    /// Input closed; the job keeps draining buffered bytes.
    Terminating,
    /// The command ended the job; a completion event was queued.
    Finished,
}

// ─── Completion codes ───────────────────────────────────────────────────────

/// Why a job ended. Carried by exactly one completion event per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusCode {
    /// The requested byte cap was reached.
    LimitReached,
    /// The source reported end-of-input.
    EndOfInput,
    /// The buffer endpoint ran out of space or data (and promised no more).
    BufferDone,
    /// The destination accepted a zero-length write while bytes were
    /// pending. Tolerated as end-of-output; not a guaranteed EOF signal.
    EndOfOutput,
    /// Graceful `Term`: input closed, buffered bytes drained.
    Terminated,
    /// `Kill`, or forced teardown of a shared descriptor.
    Killed,
    /// The job's overall timeout fired.
    TimedOut,
    /// Read syscall failed (errno attached to the event).
    ReadFailed,
    /// Write syscall failed (errno attached to the event).
    WriteFailed,
    /// Write failed with EPIPE.
    BrokenPipe,
    /// The substrate flagged an error condition on a descriptor.
    PollError,
    /// The peer hung up on the destination side.
    HungUp,
    /// The registration no longer refers to an open descriptor.
    InvalidFd,
}

impl StatusCode {
    /// True for the codes that mean the copy ran to its natural end.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            StatusCode::LimitReached | StatusCode::EndOfInput | StatusCode::BufferDone
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::LimitReached => "limit-reached",
            StatusCode::EndOfInput => "end-of-input",
            StatusCode::BufferDone => "buffer-done",
            StatusCode::EndOfOutput => "end-of-output",
            StatusCode::Terminated => "terminated",
            StatusCode::Killed => "killed",
            StatusCode::TimedOut => "timed-out",
            StatusCode::ReadFailed => "read-failed",
            StatusCode::WriteFailed => "write-failed",
            StatusCode::BrokenPipe => "broken-pipe",
            StatusCode::PollError => "poll-error",
            StatusCode::HungUp => "hung-up",
            StatusCode::InvalidFd => "invalid-fd",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Pump state & verdicts ──────────────────────────────────────────────────

/// Coarse pump lifecycle state. Stop/flush conditions are sub-flags of
/// `Active` on the concrete pumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Inactive,
    Active,
}

/// Terminal result of a job, before it becomes a completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Finish {
    pub status: StatusCode,
    pub errno: Option<i32>,
}

impl Finish {
    pub fn new(status: StatusCode) -> Self {
        Finish {
            status,
            errno: None,
        }
    }

    pub fn with_errno(status: StatusCode, errno: Option<i32>) -> Self {
        Finish { status, errno }
    }
}

/// What a readiness delivery did to the pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// Still running; nothing for the engine to do.
    Continue,
    /// The buffer endpoint is exhausted but promised more; interest is
    /// withdrawn until the client installs a fresh region.
    NeedBuffer(Direction),
    /// The job ended; the engine must retire the slot and queue the event.
    Finish(Finish),
}

/// What a control command did to the pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ControlVerdict {
    pub outcome: ControlOutcome,
    pub finished: Option<Finish>,
}

impl ControlVerdict {
    pub(crate) fn running(outcome: ControlOutcome) -> Self {
        ControlVerdict {
            outcome,
            finished: None,
        }
    }

    pub(crate) fn finished(finish: Finish) -> Self {
        ControlVerdict {
            outcome: ControlOutcome::Finished,
            finished: Some(finish),
        }
    }
}

pub(crate) type ControlResult = Result<ControlVerdict, ControlError>;

// ─── Interest plumbing ──────────────────────────────────────────────────────

/// Flip interest bits on a registration the engine manages. Failures here
/// mean the substrate and the engine disagree about a token the engine
/// created; the job keeps running on whatever interest is actually armed.
pub(crate) fn set_bits<L: EventLoop>(lp: &mut L, token: Token, set: Interest, clear: Interest) {
    if let Err(err) = lp.set_interest(token, set, clear) {
        tracing::warn!(%token, %err, "interest update rejected by substrate");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_codes() {
        assert!(StatusCode::LimitReached.is_success());
        assert!(StatusCode::EndOfInput.is_success());
        assert!(StatusCode::BufferDone.is_success());
        assert!(!StatusCode::Killed.is_success());
        assert!(!StatusCode::Terminated.is_success());
        assert!(!StatusCode::EndOfOutput.is_success());
    }

    #[test]
    fn direction_interest_bits() {
        assert_eq!(Direction::In.interest(), Interest::INPUT);
        assert_eq!(Direction::Out.interest(), Interest::OUTPUT);
    }
}
