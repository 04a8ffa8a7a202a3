//! # Descriptor-to-descriptor pump
//!
//! Reads and writes proceed independently, decoupled by a cyclic buffer and
//! four watermarks so neither side runs unbounded ahead of the other:
//!
//! ```text
//!              read armed                         write armed
//!            ┌────────────┐                     ┌────────────┐
//!   used ≤ low_read       used ≥ high_read      used ≥ high_write
//!            │            (or flushing)         (or flushing) │
//!            ▼                 │                     │        ▼
//!          ARMED ──────────────┘   used ≤ low_write ─┘      ARMED
//!                                  (and not flushing)
//! ```
//!
//! When input ends (EOF, byte cap, `Term`) with bytes still buffered, the
//! job enters the *flushing* sub-state: the source's claim is released and
//! the job stays alive until the buffer drains through the write side.
//! `Kill` is the only way to end it with buffered bytes undelivered.

use crate::endpoint::DescriptorEndpoint;
use crate::engine::JobHandle;
use crate::error::ControlError;
use crate::hook::HookTable;
use crate::io::{self, IoOutcome};
use crate::pump::{
    set_bits, Control, ControlOutcome, ControlResult, ControlVerdict, Direction, Finish,
    PumpState, StatusCode, Verdict,
};
use crate::ring::RingBuffer;
use crate::thresholds::Thresholds;
use sluice_readiness::{EventLoop, Interest};

/// Descriptor ↔ descriptor pump with watermark flow control.
#[derive(Debug)]
pub struct Fd2FdPump {
    src: DescriptorEndpoint,
    dst: DescriptorEndpoint,
    ring: RingBuffer,
    thresholds: Thresholds,
    state: PumpState,
    flushing: bool,
    stopped_in: bool,
    stopped_out: bool,
    read_armed: bool,
    write_armed: bool,
    /// Input side finished and its claim released.
    src_released: bool,
    /// Status to report once the buffer drains.
    eof_status: Option<StatusCode>,
    cap: Option<u64>,
}

impl Fd2FdPump {
    pub(crate) fn new(
        src: DescriptorEndpoint,
        dst: DescriptorEndpoint,
        ring: RingBuffer,
        thresholds: Thresholds,
        cap: Option<u64>,
    ) -> Self {
        Fd2FdPump {
            src,
            dst,
            ring,
            thresholds,
            state: PumpState::Inactive,
            flushing: false,
            stopped_in: false,
            stopped_out: false,
            read_armed: false,
            write_armed: false,
            src_released: false,
            eof_status: None,
            cap,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state == PumpState::Active
    }

    pub(crate) fn is_flushing(&self) -> bool {
        self.flushing
    }

    pub(crate) fn is_stopped_in(&self) -> bool {
        self.stopped_in
    }

    pub(crate) fn is_stopped_out(&self) -> bool {
        self.stopped_out
    }

    pub(crate) fn bytes_in(&self) -> u64 {
        self.src.transferred()
    }

    pub(crate) fn bytes_out(&self) -> u64 {
        self.dst.transferred()
    }

    pub(crate) fn buffered(&self) -> u64 {
        self.ring.used() as u64
    }

    /// Rewind for a persistent restart.
    pub(crate) fn reset_run(&mut self) {
        debug_assert_eq!(self.state, PumpState::Inactive);
        self.src.reset();
        self.dst.reset();
        self.ring.clear();
        self.flushing = false;
        self.stopped_in = false;
        self.stopped_out = false;
        self.read_armed = false;
        self.write_armed = false;
        self.src_released = false;
        self.eof_status = None;
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    /// Claim both directions and arm reads only — the buffer starts empty,
    /// so there is nothing to write yet.
    pub(crate) fn start<L: EventLoop>(
        &mut self,
        lp: &mut L,
        hooks: &mut HookTable,
        me: JobHandle,
    ) -> Result<(), ControlError> {
        if self.state == PumpState::Active {
            return Err(ControlError::AlreadyActive);
        }
        hooks.claim(self.src.token(), Direction::In, me)?;
        if let Err(err) = hooks.claim(self.dst.token(), Direction::Out, me) {
            hooks.release(self.src.token(), Direction::In, me);
            return Err(err.into());
        }
        hooks.set_controlled(self.src.token(), Direction::In, me, Interest::INPUT)?;
        hooks.set_controlled(self.dst.token(), Direction::Out, me, Interest::OUTPUT)?;
        if let Err(err) = lp.set_interest(self.src.token(), Interest::INPUT, Interest::NONE) {
            hooks.release(self.src.token(), Direction::In, me);
            hooks.release(self.dst.token(), Direction::Out, me);
            return Err(err.into());
        }
        self.read_armed = true;
        self.write_armed = false;
        self.src.set_active(true);
        self.dst.set_active(true);
        self.state = PumpState::Active;
        Ok(())
    }

    /// Full teardown: disarm everything, release both claims, discard any
    /// buffered bytes, go inactive.
    fn halt<L: EventLoop>(
        &mut self,
        lp: &mut L,
        hooks: &mut HookTable,
        me: JobHandle,
        finish: Finish,
    ) -> Finish {
        if !self.src_released {
            set_bits(lp, self.src.token(), Interest::NONE, Interest::INPUT);
            hooks.release(self.src.token(), Direction::In, me);
            self.src_released = true;
        }
        set_bits(lp, self.dst.token(), Interest::NONE, Interest::OUTPUT);
        hooks.release(self.dst.token(), Direction::Out, me);
        if !self.ring.is_empty() {
            tracing::debug!(
                job = %me,
                discarded = self.ring.used(),
                status = %finish.status,
                "buffered bytes discarded at teardown"
            );
        }
        self.ring.clear();
        self.read_armed = false;
        self.write_armed = false;
        self.src.set_active(false);
        self.dst.set_active(false);
        self.flushing = false;
        self.state = PumpState::Inactive;
        finish
    }

    pub(crate) fn force_finish<L: EventLoop>(
        &mut self,
        lp: &mut L,
        hooks: &mut HookTable,
        me: JobHandle,
        status: StatusCode,
    ) -> Finish {
        self.halt(lp, hooks, me, Finish::new(status))
    }

    /// Input is over (EOF, cap, hangup or `Term`). Release the source
    /// direction now; the destination keeps draining whatever is buffered.
    fn end_input<L: EventLoop>(
        &mut self,
        lp: &mut L,
        hooks: &mut HookTable,
        me: JobHandle,
        status: StatusCode,
    ) -> Verdict {
        if self.src_released {
            return Verdict::Continue;
        }
        set_bits(lp, self.src.token(), Interest::NONE, Interest::INPUT);
        self.read_armed = false;
        hooks.release(self.src.token(), Direction::In, me);
        self.src_released = true;
        self.src.set_active(false);

        if self.ring.is_empty() {
            return Verdict::Finish(self.halt(lp, hooks, me, Finish::new(status)));
        }
        self.eof_status = Some(status);
        self.flushing = true;
        tracing::debug!(job = %me, buffered = self.ring.used(), "input done, flushing");
        self.reconcile_interest(lp);
        Verdict::Continue
    }

    // ─── Flow control ───────────────────────────────────────────────────

    /// Re-evaluate readiness interest against the watermarks. Runs after
    /// every successful read or write and after every stop/cont change.
    fn reconcile_interest<L: EventLoop>(&mut self, lp: &mut L) {
        let used = self.ring.used();
        let t = self.thresholds;

        if self.read_armed {
            if used >= t.high_read || self.flushing || self.stopped_in {
                set_bits(lp, self.src.token(), Interest::NONE, Interest::INPUT);
                self.read_armed = false;
            }
        } else if !self.src_released
            && !self.flushing
            && !self.stopped_in
            && used <= t.low_read
        {
            set_bits(lp, self.src.token(), Interest::INPUT, Interest::NONE);
            self.read_armed = true;
        }

        if self.write_armed {
            if (used <= t.low_write && !self.flushing) || self.stopped_out {
                set_bits(lp, self.dst.token(), Interest::NONE, Interest::OUTPUT);
                self.write_armed = false;
            }
        } else if (used >= t.high_write || self.flushing) && !self.stopped_out {
            set_bits(lp, self.dst.token(), Interest::OUTPUT, Interest::NONE);
            self.write_armed = true;
        }

        // Never leave both directions idle with work pending: explicit
        // watermarks may put high_read below high_write, stranding the job
        // in between.
        if !self.read_armed && !self.write_armed {
            if used > 0 && !self.stopped_out {
                set_bits(lp, self.dst.token(), Interest::OUTPUT, Interest::NONE);
                self.write_armed = true;
            } else if used == 0 && !self.src_released && !self.flushing && !self.stopped_in {
                set_bits(lp, self.src.token(), Interest::INPUT, Interest::NONE);
                self.read_armed = true;
            }
        }
    }

    // ─── Readiness ──────────────────────────────────────────────────────

    pub(crate) fn on_ready<L: EventLoop>(
        &mut self,
        lp: &mut L,
        hooks: &mut HookTable,
        me: JobHandle,
        dir: Direction,
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
            return match dir {
                // The writer went away: clean end-of-input, drain the rest.
                Direction::In => self.end_input(lp, hooks, me, StatusCode::EndOfInput),
                // The reader went away: buffered bytes have nowhere to go.
                Direction::Out => {
                    Verdict::Finish(self.halt(lp, hooks, me, Finish::new(StatusCode::HungUp)))
                }
            };
        }
        match dir {
            Direction::In if ready.is_input() => self.on_readable(lp, hooks, me),
            Direction::Out if ready.is_output() => self.on_writable(lp, hooks, me),
            _ => Verdict::Continue,
        }
    }

    /// One bounded read into free ring space, clamped so a byte cap is hit
    /// exactly, never overshot.
    fn on_readable<L: EventLoop>(
        &mut self,
        lp: &mut L,
        hooks: &mut HookTable,
        me: JobHandle,
    ) -> Verdict {
        if self.stopped_in || self.flushing || self.src_released {
            return Verdict::Continue;
        }
        let remaining = self
            .cap
            .map(|c| c.saturating_sub(self.src.transferred()) as usize);
        if remaining == Some(0) {
            return self.end_input(lp, hooks, me, StatusCode::LimitReached);
        }
        let max = self.src.clamp(remaining.unwrap_or(usize::MAX));
        let fd = self.src.fd();

        let region = self.ring.writable();
        let take = region.len().min(max);
        if take == 0 {
            // Ring full; reads should not have been armed. Re-derive.
            self.reconcile_interest(lp);
            return Verdict::Continue;
        }
        match io::read_fd(fd, &mut region[..take]) {
            Ok(IoOutcome::Transferred(n)) => {
                self.ring.commit(n);
                self.src.add_transferred(n);
                tracing::trace!(job = %me, n, used = self.ring.used(), "ring fill");
                if self.cap == Some(self.src.transferred()) {
                    self.end_input(lp, hooks, me, StatusCode::LimitReached)
                } else {
                    self.reconcile_interest(lp);
                    Verdict::Continue
                }
            }
            Ok(IoOutcome::WouldBlock) => Verdict::Continue,
            Ok(IoOutcome::Closed) => self.end_input(lp, hooks, me, StatusCode::EndOfInput),
            Err(err) => Verdict::Finish(self.halt(
                lp,
                hooks,
                me,
                Finish::with_errno(StatusCode::ReadFailed, err.raw_os_error()),
            )),
        }
    }

    /// One bounded write from the oldest buffered bytes.
    fn on_writable<L: EventLoop>(
        &mut self,
        lp: &mut L,
        hooks: &mut HookTable,
        me: JobHandle,
    ) -> Verdict {
        if self.stopped_out {
            return Verdict::Continue;
        }
        let max = self.dst.clamp(usize::MAX);
        let fd = self.dst.fd();

        let data = self.ring.readable();
        let take = data.len().min(max);
        if take == 0 {
            if self.flushing {
                let status = self.eof_status.take().unwrap_or(StatusCode::EndOfInput);
                return Verdict::Finish(self.halt(lp, hooks, me, Finish::new(status)));
            }
            self.reconcile_interest(lp);
            return Verdict::Continue;
        }
        match io::write_fd(fd, &data[..take]) {
            Ok(IoOutcome::Transferred(0)) => {
                // Destination accepted nothing while bytes were pending.
                // Tolerated as end-of-output; see the status docs.
                tracing::warn!(
                    job = %me,
                    pending = self.ring.used(),
                    "zero-length write with data pending, ending output"
                );
                Verdict::Finish(self.halt(lp, hooks, me, Finish::new(StatusCode::EndOfOutput)))
            }
            Ok(IoOutcome::Transferred(n)) => {
                self.ring.consume(n);
                self.dst.add_transferred(n);
                tracing::trace!(job = %me, n, used = self.ring.used(), "ring drain");
                if self.ring.is_empty() && self.flushing {
                    let status = self.eof_status.take().unwrap_or(StatusCode::EndOfInput);
                    Verdict::Finish(self.halt(lp, hooks, me, Finish::new(status)))
                } else {
                    self.reconcile_interest(lp);
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

    // ─── Control ────────────────────────────────────────────────────────

    pub(crate) fn control<L: EventLoop>(
        &mut self,
        lp: &mut L,
        hooks: &mut HookTable,
        me: JobHandle,
        cmd: Control,
    ) -> ControlResult {
        if cmd != Control::Start && self.state != PumpState::Active {
            return Err(ControlError::NotActive);
        }
        match cmd {
            Control::Start => {
                self.start(lp, hooks, me)?;
                Ok(ControlVerdict::running(ControlOutcome::Started))
            }
            Control::Stop => {
                let already_in = self.stopped_in || self.flushing || self.src_released;
                if already_in && self.stopped_out {
                    return Ok(ControlVerdict::running(ControlOutcome::Already));
                }
                self.stopped_in = true;
                self.stopped_out = true;
                self.reconcile_interest(lp);
                Ok(ControlVerdict::running(ControlOutcome::Stopped))
            }
            Control::StopIn => {
                // Stopping input while flushing is a no-op: input is
                // already withdrawn for good.
                if self.stopped_in || self.flushing || self.src_released {
                    return Ok(ControlVerdict::running(ControlOutcome::Already));
                }
                self.stopped_in = true;
                self.reconcile_interest(lp);
                Ok(ControlVerdict::running(ControlOutcome::Stopped))
            }
            Control::StopOut => {
                if self.stopped_out {
                    return Ok(ControlVerdict::running(ControlOutcome::Already));
                }
                self.stopped_out = true;
                self.reconcile_interest(lp);
                Ok(ControlVerdict::running(ControlOutcome::Stopped))
            }
            Control::Cont => {
                if !self.stopped_in && !self.stopped_out {
                    return Ok(ControlVerdict::running(ControlOutcome::Already));
                }
                self.stopped_in = false;
                self.stopped_out = false;
                self.reconcile_interest(lp);
                Ok(ControlVerdict::running(ControlOutcome::Resumed))
            }
            Control::ContIn => {
                if !self.stopped_in {
                    return Ok(ControlVerdict::running(ControlOutcome::Already));
                }
                self.stopped_in = false;
                self.reconcile_interest(lp);
                Ok(ControlVerdict::running(ControlOutcome::Resumed))
            }
            Control::ContOut => {
                if !self.stopped_out {
                    return Ok(ControlVerdict::running(ControlOutcome::Already));
                }
                self.stopped_out = false;
                self.reconcile_interest(lp);
                Ok(ControlVerdict::running(ControlOutcome::Resumed))
            }
            Control::Term => {
                if self.flushing || self.src_released {
                    return Ok(ControlVerdict::running(ControlOutcome::Already));
                }
                match self.end_input(lp, hooks, me, StatusCode::Terminated) {
                    Verdict::Finish(finish) => Ok(ControlVerdict::finished(finish)),
                    _ => Ok(ControlVerdict::running(ControlOutcome::Terminating)),
                }
            }
            Control::Kill => Ok(ControlVerdict::finished(self.halt(
                lp,
                hooks,
                me,
                Finish::new(StatusCode::Killed),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_readiness::sim::SimLoop;
    use sluice_readiness::Token;

    // Exercises the interest logic without any real I/O: the ring is
    // filled and drained by hand.

    struct Rig {
        lp: SimLoop,
        hooks: HookTable,
        pump: Fd2FdPump,
        src_tok: Token,
        dst_tok: Token,
        me: JobHandle,
    }

    fn rig(thresholds: Thresholds, size: usize) -> Rig {
        let mut lp = SimLoop::new();
        let src_tok = lp.register(10, Interest::NONE).unwrap();
        let dst_tok = lp.register(11, Interest::NONE).unwrap();
        let mut hooks = HookTable::new();
        hooks.ensure(src_tok, 10);
        hooks.ensure(dst_tok, 11);

        let me = JobHandle::from_parts(0, 1);
        let mut pump = Fd2FdPump::new(
            DescriptorEndpoint::new(10, src_tok, None),
            DescriptorEndpoint::new(11, dst_tok, None),
            RingBuffer::new(size),
            thresholds,
            None,
        );
        pump.start(&mut lp, &mut hooks, me).unwrap();
        Rig {
            lp,
            hooks,
            pump,
            src_tok,
            dst_tok,
            me,
        }
    }

    fn scenario_thresholds() -> Thresholds {
        Thresholds {
            low_read: 256,
            high_read: 768,
            low_write: 128,
            high_write: 896,
        }
    }

    fn force_used(rig: &mut Rig, used: usize) {
        rig.pump.ring.clear();
        let region = rig.pump.ring.writable();
        assert!(region.len() >= used);
        rig.pump.ring.commit(used);
    }

    #[test]
    fn starts_with_reads_armed_only() {
        let rig = rig(scenario_thresholds(), 1024);
        assert!(rig.pump.read_armed);
        assert!(!rig.pump.write_armed);
        assert_eq!(rig.lp.interest(rig.src_tok).unwrap(), Interest::INPUT);
        assert_eq!(rig.lp.interest(rig.dst_tok).unwrap(), Interest::NONE);
    }

    #[test]
    fn high_read_disarms_reads_and_low_read_rearms() {
        let mut rig = rig(scenario_thresholds(), 1024);

        force_used(&mut rig, 768);
        rig.pump.reconcile_interest(&mut rig.lp);
        assert!(!rig.pump.read_armed, "reads off at high_read");

        // Hysteresis: the band between low_read and high_read does not
        // re-arm.
        force_used(&mut rig, 500);
        rig.pump.write_armed = true; // pretend writes are running
        rig.pump.reconcile_interest(&mut rig.lp);
        assert!(!rig.pump.read_armed);

        force_used(&mut rig, 256);
        rig.pump.reconcile_interest(&mut rig.lp);
        assert!(rig.pump.read_armed, "reads back on at low_read");
    }

    #[test]
    fn high_write_arms_and_low_write_disarms() {
        let mut rig = rig(scenario_thresholds(), 1024);

        force_used(&mut rig, 896);
        rig.pump.reconcile_interest(&mut rig.lp);
        assert!(rig.pump.write_armed, "writes on at high_write");

        force_used(&mut rig, 128);
        rig.pump.reconcile_interest(&mut rig.lp);
        assert!(!rig.pump.write_armed, "writes off at low_write");
    }

    #[test]
    fn liveness_clause_bridges_the_gap_between_high_read_and_high_write() {
        // high_read < high_write: the literal rules would strand the job
        // with both directions disarmed at used == high_read.
        let mut rig = rig(scenario_thresholds(), 1024);

        force_used(&mut rig, 768);
        rig.pump.reconcile_interest(&mut rig.lp);
        assert!(!rig.pump.read_armed);
        assert!(
            rig.pump.write_armed,
            "liveness clause must arm writes below high_write"
        );
    }

    #[test]
    fn flushing_withdraws_reads_and_forces_writes() {
        let mut rig = rig(scenario_thresholds(), 1024);
        force_used(&mut rig, 100);
        rig.pump.flushing = true;
        rig.pump.reconcile_interest(&mut rig.lp);
        assert!(!rig.pump.read_armed);
        assert!(rig.pump.write_armed, "flushing arms writes at any occupancy");
    }

    #[test]
    fn stopped_directions_never_arm() {
        let mut rig = rig(scenario_thresholds(), 1024);
        force_used(&mut rig, 1000);
        rig.pump.stopped_out = true;
        rig.pump.reconcile_interest(&mut rig.lp);
        assert!(!rig.pump.write_armed, "stop-out keeps writes off");

        rig.pump.stopped_in = true;
        force_used(&mut rig, 0);
        rig.pump.reconcile_interest(&mut rig.lp);
        assert!(!rig.pump.read_armed, "stop-in keeps reads off");
    }

    #[test]
    fn stop_and_cont_round_trip_with_idempotence() {
        let mut rig = rig(scenario_thresholds(), 1024);
        let Rig {
            lp, hooks, pump, me, ..
        } = &mut rig;

        let v = pump.control(lp, hooks, *me, Control::Stop).unwrap();
        assert_eq!(v.outcome, ControlOutcome::Stopped);
        let v = pump.control(lp, hooks, *me, Control::Stop).unwrap();
        assert_eq!(v.outcome, ControlOutcome::Already);

        let v = pump.control(lp, hooks, *me, Control::Cont).unwrap();
        assert_eq!(v.outcome, ControlOutcome::Resumed);
        assert!(pump.read_armed, "cont re-arms the read side");
        let v = pump.control(lp, hooks, *me, Control::Cont).unwrap();
        assert_eq!(v.outcome, ControlOutcome::Already);
    }

    #[test]
    fn kill_releases_both_claims_and_discards_the_ring() {
        let mut rig = rig(scenario_thresholds(), 1024);
        force_used(&mut rig, 512);
        let Rig {
            lp,
            hooks,
            pump,
            src_tok,
            dst_tok,
            me,
        } = &mut rig;

        let v = pump.control(lp, hooks, *me, Control::Kill).unwrap();
        assert_eq!(v.finished.unwrap().status, StatusCode::Killed);
        assert_eq!(pump.buffered(), 0, "kill discards buffered bytes");
        assert_eq!(hooks.owner(*src_tok, Direction::In), None);
        assert_eq!(hooks.owner(*dst_tok, Direction::Out), None);
        assert_eq!(lp.interest(*src_tok).unwrap(), Interest::NONE);
        assert_eq!(lp.interest(*dst_tok).unwrap(), Interest::NONE);
    }

    #[test]
    fn term_with_buffered_bytes_enters_flushing() {
        let mut rig = rig(scenario_thresholds(), 1024);
        force_used(&mut rig, 300);
        let Rig {
            lp,
            hooks,
            pump,
            src_tok,
            me,
            ..
        } = &mut rig;

        let v = pump.control(lp, hooks, *me, Control::Term).unwrap();
        assert_eq!(v.outcome, ControlOutcome::Terminating);
        assert!(pump.is_flushing());
        assert_eq!(
            hooks.owner(*src_tok, Direction::In),
            None,
            "source claim released at term"
        );
        assert!(pump.write_armed, "flush drives the write side");

        // A second term is a no-op.
        let v = pump.control(lp, hooks, *me, Control::Term).unwrap();
        assert_eq!(v.outcome, ControlOutcome::Already);
    }

    #[test]
    fn term_with_empty_ring_finishes_immediately() {
        let mut rig = rig(scenario_thresholds(), 1024);
        let Rig {
            lp, hooks, pump, me, ..
        } = &mut rig;
        let v = pump.control(lp, hooks, *me, Control::Term).unwrap();
        assert_eq!(v.finished.unwrap().status, StatusCode::Terminated);
    }
}
