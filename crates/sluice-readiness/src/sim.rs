//! # Scripted event loop
//!
//! A deterministic [`EventLoop`] for tests: no syscalls, no waiting. The
//! test owns time — it decides which descriptor is "ready" and when a timer
//! "fires" by minting [`Notification`]s itself. The loop's job is to keep the
//! registration table honest: a notification is only produced for bits that
//! are actually armed (exception bits pass through unmasked, as a real
//! poller would deliver them).
//!
//! Every interest change is appended to [`SimLoop::interest_log`] so tests
//! can assert on the exact arm/disarm sequence a state machine produced.

use crate::{EventLoop, Interest, Notification, ReadinessError, TimerToken, Token};
use quanta::Instant;
use slab::Slab;
use std::os::fd::RawFd;
use std::time::Duration;

// ─── Registration record ────────────────────────────────────────────────────

/// One live registration inside the scripted loop.
#[derive(Debug, Clone, Copy)]
pub struct SimRegistration {
    pub fd: RawFd,
    pub interest: Interest,
}

#[derive(Debug, Clone, Copy)]
struct SimTimer {
    #[allow(dead_code)]
    after: Duration,
}

// ─── SimLoop ────────────────────────────────────────────────────────────────

/// Scripted readiness substrate.
#[derive(Debug, Default)]
pub struct SimLoop {
    regs: Slab<SimRegistration>,
    timers: Slab<SimTimer>,
    /// `(token, armed-bits-after-change)` for every successful `set_interest`.
    pub interest_log: Vec<(Token, Interest)>,
    /// Remaining successful `register` calls before one scripted failure.
    fail_after: Option<usize>,
}

impl SimLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live registrations. Used by leak checks.
    pub fn registered_count(&self) -> usize {
        self.regs.len()
    }

    pub fn is_registered(&self, token: Token) -> bool {
        self.regs.contains(token.0)
    }

    pub fn registration(&self, token: Token) -> Option<SimRegistration> {
        self.regs.get(token.0).copied()
    }

    /// Tokens of all live registrations, in slot order.
    pub fn tokens(&self) -> Vec<Token> {
        self.regs.iter().map(|(k, _)| Token(k)).collect()
    }

    /// Number of timers scheduled and not yet cancelled.
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Tokens of all pending timers, in slot order.
    pub fn scheduled_timers(&self) -> Vec<TimerToken> {
        self.timers.iter().map(|(k, _)| TimerToken(k)).collect()
    }

    /// Make the next `register` call fail, for setup-unwind tests.
    pub fn fail_next_register(&mut self) {
        self.fail_after = Some(0);
    }

    /// Let `successes` more `register` calls succeed, then fail one.
    pub fn fail_register_after(&mut self, successes: usize) {
        self.fail_after = Some(successes);
    }

    /// Offer readiness to a registration.
    ///
    /// Returns a [`Notification`] carrying the subset of `bits` the
    /// registration would actually be woken for: armed bits plus the
    /// always-delivered exception bits. `None` when nothing applies, which
    /// is also what an unknown token gets.
    pub fn notify(&self, token: Token, bits: Interest) -> Option<Notification> {
        let reg = self.regs.get(token.0)?;
        let ready = bits & reg.interest.with(Interest::ALWAYS);
        if ready.is_empty() {
            return None;
        }
        Some(Notification {
            token,
            fd: reg.fd,
            ready,
            at: Instant::now(),
        })
    }

    /// Consume a timer as if it fired. Returns `false` for unknown timers.
    pub fn fire_timer(&mut self, timer: TimerToken) -> bool {
        if self.timers.contains(timer.0) {
            self.timers.remove(timer.0);
            true
        } else {
            false
        }
    }
}

impl EventLoop for SimLoop {
    fn register(&mut self, fd: RawFd, interest: Interest) -> Result<Token, ReadinessError> {
        match self.fail_after {
            Some(0) => {
                self.fail_after = None;
                return Err(ReadinessError::Rejected("scripted failure".into()));
            }
            Some(n) => self.fail_after = Some(n - 1),
            None => {}
        }
        let key = self.regs.insert(SimRegistration { fd, interest });
        Ok(Token(key))
    }

    fn set_interest(
        &mut self,
        token: Token,
        set: Interest,
        clear: Interest,
    ) -> Result<Interest, ReadinessError> {
        let reg = self
            .regs
            .get_mut(token.0)
            .ok_or(ReadinessError::UnknownToken(token))?;
        let old = reg.interest;
        reg.interest = old.with(set).without(clear);
        self.interest_log.push((token, reg.interest));
        Ok(old)
    }

    fn interest(&self, token: Token) -> Result<Interest, ReadinessError> {
        self.regs
            .get(token.0)
            .map(|r| r.interest)
            .ok_or(ReadinessError::UnknownToken(token))
    }

    fn unregister(&mut self, token: Token) -> Result<(), ReadinessError> {
        if !self.regs.contains(token.0) {
            return Err(ReadinessError::UnknownToken(token));
        }
        self.regs.remove(token.0);
        Ok(())
    }

    fn schedule(&mut self, after: Duration) -> Result<TimerToken, ReadinessError> {
        let key = self.timers.insert(SimTimer { after });
        Ok(TimerToken(key))
    }

    fn cancel(&mut self, timer: TimerToken) -> Result<(), ReadinessError> {
        if !self.timers.contains(timer.0) {
            return Err(ReadinessError::UnknownTimer(timer));
        }
        self.timers.remove(timer.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_flip_interest() {
        let mut lp = SimLoop::new();
        let t = lp.register(3, Interest::NONE).unwrap();
        assert_eq!(lp.interest(t).unwrap(), Interest::NONE);

        let old = lp
            .set_interest(t, Interest::INPUT, Interest::NONE)
            .unwrap();
        assert_eq!(old, Interest::NONE);
        assert_eq!(lp.interest(t).unwrap(), Interest::INPUT);

        let old = lp
            .set_interest(t, Interest::OUTPUT, Interest::INPUT)
            .unwrap();
        assert_eq!(old, Interest::INPUT);
        assert_eq!(lp.interest(t).unwrap(), Interest::OUTPUT);
        assert_eq!(lp.interest_log.len(), 2);
    }

    #[test]
    fn notify_masks_by_armed_interest() {
        let mut lp = SimLoop::new();
        let t = lp.register(3, Interest::NONE).unwrap();

        // Nothing armed: plain input readiness is invisible.
        assert!(lp.notify(t, Interest::INPUT).is_none());

        lp.set_interest(t, Interest::INPUT, Interest::NONE).unwrap();
        let n = lp.notify(t, Interest::INPUT | Interest::OUTPUT).unwrap();
        assert_eq!(n.ready, Interest::INPUT);
        assert_eq!(n.fd, 3);
    }

    #[test]
    fn exception_bits_bypass_the_mask() {
        let mut lp = SimLoop::new();
        let t = lp.register(5, Interest::NONE).unwrap();
        let n = lp.notify(t, Interest::HANGUP).unwrap();
        assert_eq!(n.ready, Interest::HANGUP);
    }

    #[test]
    fn unregister_frees_the_slot() {
        let mut lp = SimLoop::new();
        let t = lp.register(3, Interest::NONE).unwrap();
        lp.unregister(t).unwrap();
        assert_eq!(lp.registered_count(), 0);
        assert_eq!(
            lp.unregister(t),
            Err(ReadinessError::UnknownToken(t)),
            "double unregister must be reported"
        );
    }

    #[test]
    fn timers_schedule_and_cancel() {
        let mut lp = SimLoop::new();
        let tm = lp.schedule(Duration::from_millis(50)).unwrap();
        assert_eq!(lp.pending_timers(), 1);
        lp.cancel(tm).unwrap();
        assert_eq!(lp.pending_timers(), 0);
        assert!(matches!(
            lp.cancel(tm),
            Err(ReadinessError::UnknownTimer(_))
        ));
    }

    #[test]
    fn scripted_register_failure_fires_once() {
        let mut lp = SimLoop::new();
        lp.fail_next_register();
        assert!(lp.register(3, Interest::NONE).is_err());
        assert!(lp.register(3, Interest::NONE).is_ok());
    }
}
