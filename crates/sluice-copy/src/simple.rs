//! # Simple pump
//!
//! Moves bytes in one direction between a descriptor and a memory buffer.
//! One bounded transfer per readiness delivery:
//!
//! ```text
//!   Inactive ──start──▶ Active ──EOF/limit/buffer-done──▶ Inactive
//!                        │  ▲
//!                     Stop  Cont        (interest withdrawn, accounting kept)
//!                        ▼  │
//!                       Stopped
//! ```
//!
//! A short transfer that does not exhaust the region is not terminal — the
//! pump stays armed and waits for the next delivery. A zero-length read is
//! end-of-input; an empty buffer region is the completion signal (or, with
//! `more` promised, a request for a fresh region).

use crate::endpoint::{BufferEndpoint, BufferStorage, DescriptorEndpoint};
use crate::engine::JobHandle;
use crate::error::ControlError;
use crate::hook::HookTable;
use crate::io::{self, IoOutcome};
use crate::pump::{
    set_bits, Control, ControlOutcome, ControlResult, ControlVerdict, Direction, Finish,
    PumpState, StatusCode, Verdict,
};
use sluice_readiness::{EventLoop, Interest};

/// One-direction descriptor ↔ buffer pump.
#[derive(Debug)]
pub struct SimplePump {
    dir: Direction,
    fd_ep: DescriptorEndpoint,
    buf_ep: BufferEndpoint,
    state: PumpState,
    stopped: bool,
    cap: Option<u64>,
}

impl SimplePump {
    pub(crate) fn new(
        dir: Direction,
        fd_ep: DescriptorEndpoint,
        buf_ep: BufferEndpoint,
        cap: Option<u64>,
    ) -> Self {
        SimplePump {
            dir,
            fd_ep,
            buf_ep,
            state: PumpState::Inactive,
            stopped: false,
            cap,
        }
    }

    pub(crate) fn direction(&self) -> Direction {
        self.dir
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state == PumpState::Active
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Bytes moved so far this run. One copy step, so both sides agree.
    pub(crate) fn transferred(&self) -> u64 {
        self.fd_ep.transferred()
    }

    /// Sink contents accumulated so far (empty for source buffers).
    pub(crate) fn sink_data(&self) -> &[u8] {
        self.buf_ep.filled()
    }

    pub(crate) fn buffer_is_source(&self) -> bool {
        self.buf_ep.is_source()
    }

    /// Swap in a replacement buffer region. Legal while stalled on `more`
    /// or while inactive; the engine enforces the phase.
    pub(crate) fn install_buffer(&mut self, storage: BufferStorage, more: bool) {
        self.buf_ep.install(storage, more);
    }

    /// Re-arm after a buffer refill.
    pub(crate) fn resume_after_refill<L: EventLoop>(&mut self, lp: &mut L) {
        if self.state == PumpState::Active && !self.stopped {
            set_bits(lp, self.fd_ep.token(), self.dir.interest(), Interest::NONE);
        }
    }

    /// Rewind counters and cursors for a persistent restart.
    pub(crate) fn reset_run(&mut self) {
        debug_assert_eq!(self.state, PumpState::Inactive);
        self.fd_ep.reset();
        self.buf_ep.reset();
        self.stopped = false;
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    pub(crate) fn start<L: EventLoop>(
        &mut self,
        lp: &mut L,
        hooks: &mut HookTable,
        me: JobHandle,
    ) -> Result<(), ControlError> {
        if self.state == PumpState::Active {
            return Err(ControlError::AlreadyActive);
        }
        let token = self.fd_ep.token();
        hooks.claim(token, self.dir, me)?;
        hooks.set_controlled(token, self.dir, me, self.dir.interest())?;
        if let Err(err) = lp.set_interest(token, self.dir.interest(), Interest::NONE) {
            hooks.release(token, self.dir, me);
            return Err(err.into());
        }
        self.fd_ep.set_active(true);
        self.state = PumpState::Active;
        self.stopped = false;
        Ok(())
    }

    /// End the job: withdraw the controlled bit, give the direction back,
    /// go inactive. Runs before the engine reports to the client.
    fn halt<L: EventLoop>(
        &mut self,
        lp: &mut L,
        hooks: &mut HookTable,
        me: JobHandle,
        finish: Finish,
    ) -> Finish {
        let token = self.fd_ep.token();
        set_bits(lp, token, Interest::NONE, self.dir.interest());
        hooks.release(token, self.dir, me);
        self.fd_ep.set_active(false);
        self.state = PumpState::Inactive;
        self.stopped = false;
        finish
    }

    /// Forced termination from outside the pump (kill, timeout, teardown).
    pub(crate) fn force_finish<L: EventLoop>(
        &mut self,
        lp: &mut L,
        hooks: &mut HookTable,
        me: JobHandle,
        status: StatusCode,
    ) -> Finish {
        self.halt(lp, hooks, me, Finish::new(status))
    }

    // ─── Readiness ──────────────────────────────────────────────────────

    pub(crate) fn on_ready<L: EventLoop>(
        &mut self,
        lp: &mut L,
        hooks: &mut HookTable,
        me: JobHandle,
        ready: Interest,
    ) -> Verdict {
        if self.state != PumpState::Active {
            return Verdict::Continue;
        }
        if ready.intersects(Interest::INVALID) {
            return Verdict::Finish(self.halt(lp, hooks, me, Finish::new(StatusCode::InvalidFd)));
        }
        if ready.intersects(Interest::ERROR) {
            return Verdict::Finish(self.halt(lp, hooks, me, Finish::new(StatusCode::PollError)));
        }
        if ready.intersects(Interest::HANGUP) {
            // A hangup on the reading side is the peer closing: same as a
            // clean end-of-input. On the writing side nobody is left to
            // accept our bytes.
            let status = match self.dir {
                Direction::In => StatusCode::EndOfInput,
                Direction::Out => StatusCode::HungUp,
            };
            return Verdict::Finish(self.halt(lp, hooks, me, Finish::new(status)));
        }
        if self.stopped || !ready.intersects(self.dir.interest()) {
            return Verdict::Continue;
        }

        let remaining = self.remaining_cap();
        if remaining == Some(0) {
            return Verdict::Finish(self.halt(
                lp,
                hooks,
                me,
                Finish::new(StatusCode::LimitReached),
            ));
        }
        let max = self.fd_ep.clamp(remaining.unwrap_or(usize::MAX));

        match self.dir {
            Direction::In => self.pump_in(lp, hooks, me, max),
            Direction::Out => self.pump_out(lp, hooks, me, max),
        }
    }

    fn remaining_cap(&self) -> Option<usize> {
        self.cap
            .map(|c| c.saturating_sub(self.fd_ep.transferred()) as usize)
    }

    fn cap_reached(&self) -> bool {
        self.cap == Some(self.fd_ep.transferred())
    }

    /// Descriptor readable: one bounded read into the buffer region.
    fn pump_in<L: EventLoop>(
        &mut self,
        lp: &mut L,
        hooks: &mut HookTable,
        me: JobHandle,
        max: usize,
    ) -> Verdict {
        let fd = self.fd_ep.fd();
        let region = self.buf_ep.write_region(max);
        if region.is_empty() {
            return self.region_exhausted(lp, hooks, me);
        }
        match io::read_fd(fd, region) {
            Ok(IoOutcome::Transferred(n)) => {
                self.buf_ep.advance(n);
                self.fd_ep.add_transferred(n);
                tracing::trace!(job = %me, n, "read chunk");
                if self.cap_reached() {
                    Verdict::Finish(self.halt(lp, hooks, me, Finish::new(StatusCode::LimitReached)))
                } else {
                    Verdict::Continue
                }
            }
            Ok(IoOutcome::WouldBlock) => Verdict::Continue,
            Ok(IoOutcome::Closed) => {
                Verdict::Finish(self.halt(lp, hooks, me, Finish::new(StatusCode::EndOfInput)))
            }
            Err(err) => Verdict::Finish(self.halt(
                lp,
                hooks,
                me,
                Finish::with_errno(StatusCode::ReadFailed, err.raw_os_error()),
            )),
        }
    }

    /// Descriptor writable: one bounded write from the buffer region.
    fn pump_out<L: EventLoop>(
        &mut self,
        lp: &mut L,
        hooks: &mut HookTable,
        me: JobHandle,
        max: usize,
    ) -> Verdict {
        let fd = self.fd_ep.fd();
        let region = self.buf_ep.read_region(max);
        if region.is_empty() {
            return self.region_exhausted(lp, hooks, me);
        }
        match io::write_fd(fd, region) {
            Ok(IoOutcome::Transferred(0)) => {
                tracing::warn!(job = %me, "zero-length write with data pending, ending output");
                Verdict::Finish(self.halt(lp, hooks, me, Finish::new(StatusCode::EndOfOutput)))
            }
            Ok(IoOutcome::Transferred(n)) => {
                self.buf_ep.advance(n);
                self.fd_ep.add_transferred(n);
                tracing::trace!(job = %me, n, "wrote chunk");
                if self.cap_reached() {
                    Verdict::Finish(self.halt(lp, hooks, me, Finish::new(StatusCode::LimitReached)))
                } else {
                    Verdict::Continue
                }
            }
            Ok(IoOutcome::WouldBlock) => Verdict::Continue,
            Ok(IoOutcome::Closed) => Verdict::Continue,
            Err(err) => {
                let status = if err.raw_os_error() == Some(libc::EPIPE) {
                    StatusCode::BrokenPipe
                } else {
                    StatusCode::WriteFailed
                };
                Verdict::Finish(self.halt(
                    lp,
                    hooks,
                    me,
                    Finish::with_errno(status, err.raw_os_error()),
                ))
            }
        }
    }

    /// The buffer region has no space (or data) left.
    fn region_exhausted<L: EventLoop>(
        &mut self,
        lp: &mut L,
        hooks: &mut HookTable,
        me: JobHandle,
    ) -> Verdict {
        if self.buf_ep.more() {
            // Park until the client installs a fresh region; the claim and
            // the accounting stay.
            set_bits(lp, self.fd_ep.token(), Interest::NONE, self.dir.interest());
            Verdict::NeedBuffer(self.dir)
        } else {
            Verdict::Finish(self.halt(lp, hooks, me, Finish::new(StatusCode::BufferDone)))
        }
    }

    // ─── Control ────────────────────────────────────────────────────────

    pub(crate) fn control<L: EventLoop>(
        &mut self,
        lp: &mut L,
        hooks: &mut HookTable,
        me: JobHandle,
        cmd: Control,
    ) -> ControlResult {
        match cmd {
            Control::Start => {
                self.start(lp, hooks, me)?;
                Ok(ControlVerdict::running(ControlOutcome::Started))
            }
            Control::Stop => self.stop(lp),
            Control::StopIn => self.directional(lp, Direction::In, cmd, true),
            Control::StopOut => self.directional(lp, Direction::Out, cmd, true),
            Control::Cont => self.cont(lp),
            Control::ContIn => self.directional(lp, Direction::In, cmd, false),
            Control::ContOut => self.directional(lp, Direction::Out, cmd, false),
            Control::Term => Ok(ControlVerdict::finished(self.halt(
                lp,
                hooks,
                me,
                Finish::new(StatusCode::Terminated),
            ))),
            Control::Kill => Ok(ControlVerdict::finished(self.halt(
                lp,
                hooks,
                me,
                Finish::new(StatusCode::Killed),
            ))),
        }
    }

    fn stop<L: EventLoop>(&mut self, lp: &mut L) -> ControlResult {
        if self.state != PumpState::Active {
            return Err(ControlError::NotActive);
        }
        if self.stopped {
            return Ok(ControlVerdict::running(ControlOutcome::Already));
        }
        self.stopped = true;
        set_bits(lp, self.fd_ep.token(), Interest::NONE, self.dir.interest());
        Ok(ControlVerdict::running(ControlOutcome::Stopped))
    }

    fn cont<L: EventLoop>(&mut self, lp: &mut L) -> ControlResult {
        if self.state != PumpState::Active {
            return Err(ControlError::NotActive);
        }
        if !self.stopped {
            return Ok(ControlVerdict::running(ControlOutcome::Already));
        }
        self.stopped = false;
        set_bits(lp, self.fd_ep.token(), self.dir.interest(), Interest::NONE);
        Ok(ControlVerdict::running(ControlOutcome::Resumed))
    }

    /// A direction-qualified stop/cont is only meaningful for the one
    /// direction this pump has.
    fn directional<L: EventLoop>(
        &mut self,
        lp: &mut L,
        dir: Direction,
        cmd: Control,
        stop: bool,
    ) -> ControlResult {
        if dir != self.dir {
            return Err(ControlError::Unsupported(cmd));
        }
        if stop { self.stop(lp) } else { self.cont(lp) }
    }
}
