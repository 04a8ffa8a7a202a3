//! # sluice-readiness
//!
//! The interface between the sluice copy engine and whatever mechanism
//! actually waits on descriptors. The engine never polls: it registers
//! descriptors, flips interest bits, and is re-entered through
//! [`Notification`]s delivered by the owner of the event loop.
//!
//! ## Crate structure
//!
//! - [`interest`] — readiness bit set, registration and timer tokens
//! - [`EventLoop`] — registration, interest control, one-shot timers
//! - [`sim`] — deterministic scripted loop for tests
//!
//! A real backend (epoll, kqueue, poll) lives with the embedding
//! application; this crate only fixes the contract.

pub mod interest;
pub mod sim;

pub use interest::{Interest, TimerToken, Token};

use quanta::Instant;
use std::os::fd::RawFd;
use std::time::Duration;
use thiserror::Error;

// ─── Errors ─────────────────────────────────────────────────────────────────

/// Failures reported by the readiness substrate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadinessError {
    #[error("unknown registration {0}")]
    UnknownToken(Token),
    #[error("unknown timer {0}")]
    UnknownTimer(TimerToken),
    #[error("registration rejected: {0}")]
    Rejected(String),
}

// ─── Notification ───────────────────────────────────────────────────────────

/// One readiness delivery: some subset of a registration's armed bits (plus
/// any of the always-delivered exception bits) became ready.
#[derive(Debug, Clone, Copy)]
pub struct Notification {
    /// The registration this notification is for.
    pub token: Token,
    /// The descriptor behind the registration.
    pub fd: RawFd,
    /// The bits that are ready.
    pub ready: Interest,
    /// When the substrate observed the condition.
    pub at: Instant,
}

// ─── EventLoop ──────────────────────────────────────────────────────────────

/// Registration and timer services offered by the readiness substrate.
///
/// **Contract:**
/// - A registration starts with exactly the interest passed to `register`
///   and keeps its [`Token`] until `unregister`.
/// - `set_interest` applies `set` then `clear` atomically and returns the
///   bits that were armed before the call.
/// - [`Interest::ERROR`], [`Interest::HANGUP`] and [`Interest::INVALID`] are
///   delivered even when not armed.
/// - Timers fire exactly once; cancelling a fired or unknown timer is an
///   error.
pub trait EventLoop {
    /// Register a descriptor. The substrate does not take ownership of `fd`.
    fn register(&mut self, fd: RawFd, interest: Interest) -> Result<Token, ReadinessError>;

    /// Arm the bits in `set`, disarm the bits in `clear`, and return the
    /// previously armed bits.
    fn set_interest(
        &mut self,
        token: Token,
        set: Interest,
        clear: Interest,
    ) -> Result<Interest, ReadinessError>;

    /// The currently armed bits of a registration.
    fn interest(&self, token: Token) -> Result<Interest, ReadinessError>;

    /// Tear down a registration. Pending notifications for it are dropped.
    fn unregister(&mut self, token: Token) -> Result<(), ReadinessError>;

    /// Schedule a one-shot timer `after` from now.
    fn schedule(&mut self, after: Duration) -> Result<TimerToken, ReadinessError>;

    /// Cancel a timer that has not fired yet.
    fn cancel(&mut self, timer: TimerToken) -> Result<(), ReadinessError>;
}
