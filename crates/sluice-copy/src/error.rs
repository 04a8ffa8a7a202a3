//! Error taxonomy for the copy engine.
//!
//! Four families, mirroring how they propagate:
//!
//! - [`ConfigError`] — rejected at submit time, before anything is allocated
//! - [`SubmitError`] — configuration plus resource failures during setup;
//!   partial acquisition is unwound before the error is returned
//! - [`ControlError`] — protocol/usage mistakes on a live or finished job;
//!   surfaced as values, never accepted silently
//! - [`HookError`] — violations of the per-direction claim protocol
//!
//! Transport errors (failed reads/writes, poll exceptions) are not errors in
//! this sense: they end the job and travel through the completion event's
//! [`StatusCode`](crate::pump::StatusCode).

use crate::pump::{Control, Direction};
use sluice_readiness::{ReadinessError, Token};
use thiserror::Error;

// ─── Configuration ──────────────────────────────────────────────────────────

/// A request that can never be started.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("source and destination cannot both be memory buffers")]
    BadCombination,
    #[error("io buffer of {size} bytes is below the {min}-byte minimum")]
    BufferTooSmall { size: usize, min: usize },
    #[error("watermarks must be either all explicit or all defaulted")]
    PartialWatermarks,
    #[error("{which} watermarks out of range: low {low}, high {high}, buffer {size}")]
    BadWatermarks {
        which: &'static str,
        low: usize,
        high: usize,
        size: usize,
    },
}

// ─── Submit ─────────────────────────────────────────────────────────────────

/// Why `submit` refused a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("descriptor registration failed: {0}")]
    Registration(#[from] ReadinessError),
    #[error("descriptor direction already claimed: {0}")]
    Claim(#[from] HookError),
    #[error("job table full ({limit} jobs)")]
    Capacity { limit: usize },
}

// ─── Control / usage ────────────────────────────────────────────────────────

/// Protocol and usage errors on job handles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("stale job handle")]
    StaleHandle,
    #[error("job already finished")]
    Finished,
    #[error("job is already active")]
    AlreadyActive,
    #[error("job is not active")]
    NotActive,
    #[error("job is still running")]
    StillRunning,
    #[error("command {0} not supported by this job type")]
    Unsupported(Control),
    #[error("job is not waiting for a buffer")]
    NotStalled,
    #[error("buffer kind does not match the job's endpoint")]
    WrongBufferKind,
    #[error(transparent)]
    Hook(#[from] HookError),
    #[error(transparent)]
    Readiness(#[from] ReadinessError),
}

// ─── Hook protocol ──────────────────────────────────────────────────────────

/// Violations of the per-descriptor, per-direction claim protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    #[error("no hook for registration {0}")]
    UnknownHook(Token),
    #[error("{dir} direction of {token} is already owned")]
    DirectionBusy { token: Token, dir: Direction },
    #[error("caller does not own the {dir} direction of {token}")]
    NotOwner { token: Token, dir: Direction },
    #[error("{dir} direction of {token} still owned at teardown")]
    StillOwned { token: Token, dir: Direction },
}
