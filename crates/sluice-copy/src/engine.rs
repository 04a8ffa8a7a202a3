//! # Copy engine
//!
//! The façade a client submits [`CopyRequest`]s to. The engine validates
//! and defaults the request, registers descriptors with the readiness
//! substrate, builds the right pump, and from then on routes readiness
//! notifications and control commands into it.
//!
//! Jobs live in a slab owned by the engine and are referenced only through
//! generation-checked [`JobHandle`]s: "destruction" is slot retirement after
//! the pump has already returned, so no state machine ever frees itself in
//! the middle of one of its own callbacks, and a stale handle is a typed
//! error rather than an aliased slot.
//!
//! Completion is reported exactly once per job through the event queue;
//! drain it with [`CopyEngine::drain_events`] (or
//! [`dispatch_events`](crate::client::dispatch_events)) after feeding the
//! engine notifications.

use crate::endpoint::{BufferEndpoint, BufferStorage, DescriptorEndpoint};
use crate::error::{ConfigError, ControlError, HookError, SubmitError};
use crate::fd2fd::Fd2FdPump;
use crate::hook::HookTable;
use crate::pump::{set_bits, Control, ControlOutcome, Direction, Finish, StatusCode, Verdict};
use crate::request::{CopyRequest, DestSpec, FdSpec, SourceSpec};
use crate::ring::RingBuffer;
use crate::simple::SimplePump;
use crate::stats::{EngineStats, JobFlags, JobProgress};
use crate::thresholds::{Thresholds, DEFAULT_IO_BUFFER, MIN_IO_BUFFER};
use bytes::{Bytes, BytesMut};
use slab::Slab;
use sluice_readiness::{
    EventLoop, Interest, Notification, ReadinessError, TimerToken, Token,
};
use std::collections::HashMap;
use std::fmt;
use std::os::fd::RawFd;
use std::time::Duration;

// ─── JobHandle ──────────────────────────────────────────────────────────────

/// Generation-checked reference to a job slot. Valid from `submit` until
/// `release`; operations on a recycled or released slot fail with
/// [`ControlError::StaleHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle {
    slot: usize,
    generation: u64,
}

impl JobHandle {
    pub(crate) fn from_parts(slot: usize, generation: u64) -> Self {
        JobHandle { slot, generation }
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "j{}.{}", self.slot, self.generation)
    }
}

// ─── Configuration ──────────────────────────────────────────────────────────

/// Engine tuning parameters.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on live jobs (including finished-but-unreleased ones).
    pub max_jobs: usize,
    /// Cyclic buffer size for fd-to-fd jobs that leave `io_buffer_size`
    /// at zero.
    pub io_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_jobs: 1024,
            io_buffer_size: DEFAULT_IO_BUFFER,
        }
    }
}

// ─── Events ─────────────────────────────────────────────────────────────────

/// Events the engine generates for the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyEvent {
    /// The job ended. Reported exactly once per run.
    Finished {
        job: JobHandle,
        status: StatusCode,
        errno: Option<i32>,
    },
    /// The job drained a buffer region that promised more; install a fresh
    /// one with [`CopyEngine::provide_buffer`] to resume.
    NeedBuffer { job: JobHandle, dir: Direction },
}

/// Replacement region for [`CopyEngine::provide_buffer`].
#[derive(Debug)]
pub enum BufferRegion {
    Source { data: Bytes, more: bool },
    Sink { capacity: usize, more: bool },
}

// ─── Job bookkeeping ────────────────────────────────────────────────────────

#[derive(Debug)]
enum PumpKind {
    Simple(SimplePump),
    Fd2Fd(Fd2FdPump),
}

/// One descriptor side's registration bookkeeping.
#[derive(Debug, Clone, Copy)]
struct RegSide {
    token: Token,
    #[allow(dead_code)]
    fd: RawFd,
    /// The engine registered this descriptor and owns the registration's
    /// lifecycle; client-registered descriptors are left standing.
    engine_registered: bool,
    /// Client interest bits parked while the job runs.
    saved_interest: Option<Interest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobPhase {
    Running,
    /// Waiting for the client to install a fresh buffer region.
    Stalled(Direction),
    Finished,
}

#[derive(Debug)]
struct Job {
    generation: u64,
    pump: PumpKind,
    src_reg: Option<RegSide>,
    dst_reg: Option<RegSide>,
    timer: Option<TimerToken>,
    timeout: Option<Duration>,
    persistent: bool,
    phase: JobPhase,
    finish: Option<Finish>,
}

// ─── Setup rollback ─────────────────────────────────────────────────────────

/// Undo ledger for the submit path. Everything acquired from the substrate
/// goes through this guard; dropping it armed releases in reverse order, so
/// an early `?` return leaves nothing behind.
struct Rollback<'a, L: EventLoop> {
    lp: &'a mut L,
    registered: Vec<Token>,
    suppressed: Vec<(Token, Interest)>,
    timers: Vec<TimerToken>,
    armed: bool,
}

impl<'a, L: EventLoop> Rollback<'a, L> {
    fn new(lp: &'a mut L) -> Self {
        Rollback {
            lp,
            registered: Vec::new(),
            suppressed: Vec::new(),
            timers: Vec::new(),
            armed: true,
        }
    }

    fn register(&mut self, fd: RawFd) -> Result<Token, ReadinessError> {
        let token = self.lp.register(fd, Interest::NONE)?;
        self.registered.push(token);
        Ok(token)
    }

    /// Park the client's interest on a shared registration, leaving any
    /// bits another pump currently controls untouched.
    fn suppress(&mut self, token: Token, clearable: Interest) -> Result<Interest, ReadinessError> {
        let old = self.lp.set_interest(token, Interest::NONE, clearable)?;
        let parked = old & clearable;
        self.suppressed.push((token, parked));
        Ok(parked)
    }

    fn schedule(&mut self, after: Duration) -> Result<TimerToken, ReadinessError> {
        let timer = self.lp.schedule(after)?;
        self.timers.push(timer);
        Ok(timer)
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<L: EventLoop> Drop for Rollback<'_, L> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for timer in self.timers.drain(..).rev() {
            if let Err(err) = self.lp.cancel(timer) {
                tracing::warn!(%timer, %err, "setup rollback: timer cancel failed");
            }
        }
        for (token, bits) in self.suppressed.drain(..).rev() {
            if let Err(err) = self.lp.set_interest(token, bits, Interest::NONE) {
                tracing::warn!(%token, %err, "setup rollback: interest restore failed");
            }
        }
        for token in self.registered.drain(..).rev() {
            if let Err(err) = self.lp.unregister(token) {
                tracing::warn!(%token, %err, "setup rollback: unregister failed");
            }
        }
    }
}

// ─── CopyEngine ─────────────────────────────────────────────────────────────

/// The copy job façade. One instance per client context; there is no
/// process-wide engine.
#[derive(Debug)]
pub struct CopyEngine {
    config: EngineConfig,
    jobs: Slab<Job>,
    hooks: HookTable,
    events: Vec<CopyEvent>,
    timers: HashMap<TimerToken, JobHandle>,
    next_generation: u64,
    stats: EngineStats,
}

impl CopyEngine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        CopyEngine {
            jobs: Slab::with_capacity(config.max_jobs.min(64)),
            config,
            hooks: HookTable::new(),
            events: Vec::new(),
            timers: HashMap::new(),
            next_generation: 1,
            stats: EngineStats::default(),
        }
    }

    /// Jobs currently occupying slots (running, stalled or unreleased).
    pub fn jobs_live(&self) -> usize {
        self.jobs.len()
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Drain pending completion / need-buffer events.
    pub fn drain_events(&mut self) -> std::vec::Drain<'_, CopyEvent> {
        self.events.drain(..)
    }

    /// The job currently owning one direction of a managed descriptor.
    pub fn direction_owner(&self, token: Token, dir: Direction) -> Option<JobHandle> {
        self.hooks.owner(token, dir)
    }

    /// Whether a registration is currently drawn into managed copying.
    pub fn is_managed(&self, token: Token) -> bool {
        self.hooks.contains(token)
    }

    // ─── Submit ─────────────────────────────────────────────────────────

    /// Validate a request, acquire its resources, and start the job.
    ///
    /// Configuration errors are rejected before anything is allocated;
    /// resource failures unwind whatever was already acquired, in reverse
    /// order, before returning.
    pub fn submit<L: EventLoop>(
        &mut self,
        lp: &mut L,
        request: CopyRequest,
    ) -> Result<JobHandle, SubmitError> {
        if self.jobs.len() >= self.config.max_jobs {
            return Err(SubmitError::Capacity {
                limit: self.config.max_jobs,
            });
        }

        let cap = request.cap();
        let CopyRequest {
            source,
            dest,
            len: _,
            timeout,
            io_buffer_size,
            watermarks,
            max_read_len,
            max_write_len,
            persistent,
            suppress_client_interest,
        } = request;

        // Shape resolution and all pure validation come first, so a bad
        // request allocates nothing.
        enum Shape {
            Fd2Fd {
                src: FdSpec,
                dst: FdSpec,
                size: usize,
                thresholds: Thresholds,
            },
            SimpleIn {
                src: FdSpec,
                capacity: usize,
                more: bool,
            },
            SimpleOut {
                data: Bytes,
                more: bool,
                dst: FdSpec,
            },
        }

        let shape = match (source, dest) {
            (SourceSpec::Buffer { .. }, DestSpec::Buffer { .. }) => {
                return Err(ConfigError::BadCombination.into());
            }
            (SourceSpec::Fd(src), DestSpec::Fd(dst)) => {
                let mut size = if io_buffer_size == 0 {
                    self.config.io_buffer_size
                } else {
                    io_buffer_size
                };
                // A cap smaller than the buffer shrinks the buffer to match.
                if let Some(c) = cap {
                    if (c as usize) < size {
                        size = (c as usize).max(MIN_IO_BUFFER);
                    }
                }
                let thresholds = Thresholds::compute(size, &watermarks)?;
                Shape::Fd2Fd {
                    src,
                    dst,
                    size,
                    thresholds,
                }
            }
            (SourceSpec::Fd(src), DestSpec::Buffer { capacity, more }) => Shape::SimpleIn {
                src,
                capacity,
                more,
            },
            (SourceSpec::Buffer { data, more }, DestSpec::Fd(dst)) => {
                Shape::SimpleOut { data, more, dst }
            }
        };

        let Self {
            jobs,
            hooks,
            timers,
            next_generation,
            stats,
            ..
        } = self;

        let mut rb = Rollback::new(lp);
        let mut created_hooks: Vec<Token> = Vec::new();

        let (pump, src_reg, dst_reg) = match shape {
            Shape::Fd2Fd {
                src,
                dst,
                size,
                thresholds,
            } => {
                let src_reg = stage_fd(&mut rb, hooks, src, suppress_client_interest)?;
                let dst_reg = stage_fd(&mut rb, hooks, dst, suppress_client_interest)?;
                let pump = Fd2FdPump::new(
                    DescriptorEndpoint::new(src.fd(), src_reg.token, max_read_len),
                    DescriptorEndpoint::new(dst.fd(), dst_reg.token, max_write_len),
                    RingBuffer::new(size),
                    thresholds,
                    cap,
                );
                (PumpKind::Fd2Fd(pump), Some(src_reg), Some(dst_reg))
            }
            Shape::SimpleIn {
                src,
                capacity,
                more,
            } => {
                let src_reg = stage_fd(&mut rb, hooks, src, suppress_client_interest)?;
                let pump = SimplePump::new(
                    Direction::In,
                    DescriptorEndpoint::new(src.fd(), src_reg.token, max_read_len),
                    BufferEndpoint::sink(capacity, more),
                    cap,
                );
                (PumpKind::Simple(pump), Some(src_reg), None)
            }
            Shape::SimpleOut { data, more, dst } => {
                let dst_reg = stage_fd(&mut rb, hooks, dst, suppress_client_interest)?;
                let pump = SimplePump::new(
                    Direction::Out,
                    DescriptorEndpoint::new(dst.fd(), dst_reg.token, max_write_len),
                    BufferEndpoint::source(data, more),
                    cap,
                );
                (PumpKind::Simple(pump), None, Some(dst_reg))
            }
        };

        let timer = match timeout {
            Some(after) => Some(rb.schedule(after)?),
            None => None,
        };

        for reg in [src_reg, dst_reg].into_iter().flatten() {
            if !hooks.contains(reg.token) {
                hooks.ensure(reg.token, reg.fd);
                created_hooks.push(reg.token);
            }
        }

        let generation = *next_generation;
        *next_generation += 1;
        let entry = jobs.vacant_entry();
        let handle = JobHandle::from_parts(entry.key(), generation);

        let mut job = Job {
            generation,
            pump,
            src_reg,
            dst_reg,
            timer,
            timeout,
            persistent,
            phase: JobPhase::Running,
            finish: None,
        };

        let started = match &mut job.pump {
            PumpKind::Simple(p) => p.start(&mut *rb.lp, hooks, handle),
            PumpKind::Fd2Fd(p) => p.start(&mut *rb.lp, hooks, handle),
        };
        if let Err(err) = started {
            for token in created_hooks {
                if let Err(err) = hooks.remove(token) {
                    tracing::warn!(%token, %err, "setup rollback: hook removal failed");
                }
            }
            return Err(match err {
                ControlError::Hook(e) => SubmitError::Claim(e),
                ControlError::Readiness(e) => SubmitError::Registration(e),
                // A freshly built pump can only fail to start in the two
                // ways above.
                other => SubmitError::Registration(ReadinessError::Rejected(other.to_string())),
            });
        }

        entry.insert(job);
        rb.disarm();
        if let Some(timer) = timer {
            timers.insert(timer, handle);
        }
        stats.jobs_submitted += 1;
        tracing::debug!(job = %handle, "job started");
        Ok(handle)
    }

    // ─── Dispatch ───────────────────────────────────────────────────────

    /// Route a readiness notification into the pumps owning the ready
    /// directions of that registration.
    pub fn handle_readiness<L: EventLoop>(&mut self, lp: &mut L, n: Notification) {
        let exception = n.ready & Interest::ALWAYS;
        let in_bits = (n.ready & Interest::INPUT).with(exception);
        let out_bits = (n.ready & Interest::OUTPUT).with(exception);

        if !in_bits.is_empty() {
            if let Some(owner) = self.hooks.owner(n.token, Direction::In) {
                self.drive(lp, owner, Direction::In, in_bits);
            }
        }
        // Re-resolved: driving the In owner may have torn the hook down.
        if !out_bits.is_empty() {
            if let Some(owner) = self.hooks.owner(n.token, Direction::Out) {
                self.drive(lp, owner, Direction::Out, out_bits);
            }
        }
    }

    fn drive<L: EventLoop>(
        &mut self,
        lp: &mut L,
        handle: JobHandle,
        dir: Direction,
        bits: Interest,
    ) {
        let Self {
            jobs,
            hooks,
            events,
            timers,
            stats,
            ..
        } = self;
        let Some(job) = jobs.get_mut(handle.slot) else {
            return;
        };
        if job.generation != handle.generation || job.phase != JobPhase::Running {
            return;
        }
        let verdict = match &mut job.pump {
            PumpKind::Simple(p) => p.on_ready(lp, hooks, handle, bits),
            PumpKind::Fd2Fd(p) => p.on_ready(lp, hooks, handle, dir, bits),
        };
        match verdict {
            Verdict::Continue => {}
            Verdict::NeedBuffer(d) => {
                job.phase = JobPhase::Stalled(d);
                events.push(CopyEvent::NeedBuffer {
                    job: handle,
                    dir: d,
                });
            }
            Verdict::Finish(finish) => {
                Self::finalize(lp, hooks, events, timers, stats, job, handle, finish);
            }
        }
    }

    /// An overall-timeout timer fired: kill the job with a timed-out
    /// status.
    pub fn handle_timer<L: EventLoop>(&mut self, lp: &mut L, timer: TimerToken) {
        let Some(handle) = self.timers.remove(&timer) else {
            return;
        };
        let Self {
            jobs,
            hooks,
            events,
            timers,
            stats,
            ..
        } = self;
        let Some(job) = jobs.get_mut(handle.slot) else {
            return;
        };
        if job.generation != handle.generation || job.phase == JobPhase::Finished {
            return;
        }
        job.timer = None; // already consumed by firing
        tracing::debug!(job = %handle, "overall timeout fired");
        let finish = match &mut job.pump {
            PumpKind::Simple(p) => p.force_finish(lp, hooks, handle, StatusCode::TimedOut),
            PumpKind::Fd2Fd(p) => p.force_finish(lp, hooks, handle, StatusCode::TimedOut),
        };
        Self::finalize(lp, hooks, events, timers, stats, job, handle, finish);
    }

    // ─── Control ────────────────────────────────────────────────────────

    /// Apply a control command to a job.
    pub fn control<L: EventLoop>(
        &mut self,
        lp: &mut L,
        handle: JobHandle,
        cmd: Control,
    ) -> Result<ControlOutcome, ControlError> {
        let Self {
            jobs,
            hooks,
            events,
            timers,
            stats,
            ..
        } = self;
        let Some(job) = jobs.get_mut(handle.slot) else {
            return Err(ControlError::StaleHandle);
        };
        if job.generation != handle.generation {
            return Err(ControlError::StaleHandle);
        }

        if job.phase == JobPhase::Finished {
            if cmd == Control::Start && job.persistent {
                return Self::restart(lp, hooks, timers, job, handle);
            }
            return Err(ControlError::Finished);
        }

        let verdict = match &mut job.pump {
            PumpKind::Simple(p) => p.control(lp, hooks, handle, cmd)?,
            PumpKind::Fd2Fd(p) => p.control(lp, hooks, handle, cmd)?,
        };
        if let Some(finish) = verdict.finished {
            Self::finalize(lp, hooks, events, timers, stats, job, handle, finish);
        }
        Ok(verdict.outcome)
    }

    /// Recycle a finished persistent job in place: counters and cursors
    /// rewind, claims are re-taken, and the run starts over.
    fn restart<L: EventLoop>(
        lp: &mut L,
        hooks: &mut HookTable,
        timers: &mut HashMap<TimerToken, JobHandle>,
        job: &mut Job,
        handle: JobHandle,
    ) -> Result<ControlOutcome, ControlError> {
        let previous = job.finish.take();
        match &mut job.pump {
            PumpKind::Simple(p) => p.reset_run(),
            PumpKind::Fd2Fd(p) => p.reset_run(),
        }
        let started = match &mut job.pump {
            PumpKind::Simple(p) => p.start(lp, hooks, handle),
            PumpKind::Fd2Fd(p) => p.start(lp, hooks, handle),
        };
        if let Err(err) = started {
            job.finish = previous;
            return Err(err);
        }
        job.phase = JobPhase::Running;
        if let Some(after) = job.timeout {
            if let Ok(timer) = lp.schedule(after) {
                job.timer = Some(timer);
                timers.insert(timer, handle);
            }
        }
        tracing::debug!(job = %handle, "persistent job restarted");
        Ok(ControlOutcome::Started)
    }

    // ─── Progress & release ─────────────────────────────────────────────

    /// Transferred-byte counts and state flags, without side effects.
    /// Valid at any time, including after completion until `release`.
    pub fn query_progress(&self, handle: JobHandle) -> Result<JobProgress, ControlError> {
        let job = self.job(handle)?;
        let finished = job.phase == JobPhase::Finished;
        let progress = match &job.pump {
            PumpKind::Simple(p) => JobProgress {
                bytes_in: p.transferred(),
                bytes_out: p.transferred(),
                buffered: 0,
                flags: JobFlags {
                    running: p.is_active(),
                    flushing: false,
                    stopped_in: p.direction() == Direction::In && p.is_stopped(),
                    stopped_out: p.direction() == Direction::Out && p.is_stopped(),
                    finished,
                },
                status: job.finish.map(|f| f.status),
            },
            PumpKind::Fd2Fd(p) => JobProgress {
                bytes_in: p.bytes_in(),
                bytes_out: p.bytes_out(),
                buffered: p.buffered(),
                flags: JobFlags {
                    running: p.is_active(),
                    flushing: p.is_flushing(),
                    stopped_in: p.is_stopped_in(),
                    stopped_out: p.is_stopped_out(),
                    finished,
                },
                status: job.finish.map(|f| f.status),
            },
        };
        Ok(progress)
    }

    /// Bytes accumulated in the job's sink buffer so far.
    pub fn sink_data(&self, handle: JobHandle) -> Result<&[u8], ControlError> {
        match &self.job(handle)?.pump {
            PumpKind::Simple(p) if !p.buffer_is_source() => Ok(p.sink_data()),
            _ => Err(ControlError::WrongBufferKind),
        }
    }

    /// Free a finished job's slot. The handle is dead afterwards.
    pub fn release<L: EventLoop>(
        &mut self,
        lp: &mut L,
        handle: JobHandle,
    ) -> Result<(), ControlError> {
        {
            let job = self.job(handle)?;
            if job.phase != JobPhase::Finished {
                return Err(ControlError::StillRunning);
            }
        }
        let job = self.jobs.remove(handle.slot);
        if job.persistent {
            // Non-persistent jobs tore their registrations down at
            // completion; persistent ones keep them until the slot goes.
            Self::teardown_registrations(lp, &mut self.hooks, &job);
        }
        tracing::debug!(job = %handle, "job released");
        Ok(())
    }

    /// Install a fresh buffer region after a `NeedBuffer` event (or swap
    /// the region of a finished persistent job before restarting it).
    pub fn provide_buffer<L: EventLoop>(
        &mut self,
        lp: &mut L,
        handle: JobHandle,
        region: BufferRegion,
    ) -> Result<(), ControlError> {
        let Self { jobs, .. } = self;
        let Some(job) = jobs.get_mut(handle.slot) else {
            return Err(ControlError::StaleHandle);
        };
        if job.generation != handle.generation {
            return Err(ControlError::StaleHandle);
        }
        let resumable = match job.phase {
            JobPhase::Stalled(_) => true,
            JobPhase::Finished if job.persistent => false,
            _ => return Err(ControlError::NotStalled),
        };
        let PumpKind::Simple(pump) = &mut job.pump else {
            return Err(ControlError::WrongBufferKind);
        };
        match region {
            BufferRegion::Source { data, more } => {
                if !pump.buffer_is_source() {
                    return Err(ControlError::WrongBufferKind);
                }
                pump.install_buffer(BufferStorage::Source(data), more);
            }
            BufferRegion::Sink { capacity, more } => {
                if pump.buffer_is_source() {
                    return Err(ControlError::WrongBufferKind);
                }
                let mut sink = BytesMut::with_capacity(capacity);
                sink.resize(capacity, 0);
                pump.install_buffer(BufferStorage::Sink(sink), more);
            }
        }
        if resumable {
            pump.resume_after_refill(lp);
            job.phase = JobPhase::Running;
        }
        Ok(())
    }

    // ─── Registration teardown ──────────────────────────────────────────

    /// Tear down a managed registration: kill every pump still attached to
    /// its hook, then remove hook and registration. The completion events
    /// for killed jobs are queued before this returns.
    pub fn release_registration<L: EventLoop>(
        &mut self,
        lp: &mut L,
        token: Token,
    ) -> Result<(), ControlError> {
        if !self.hooks.contains(token) {
            return Err(HookError::UnknownHook(token).into());
        }
        for handle in self.hooks.attached(token) {
            let Self {
                jobs,
                hooks,
                events,
                timers,
                stats,
                ..
            } = self;
            let Some(job) = jobs.get_mut(handle.slot) else {
                continue;
            };
            if job.phase == JobPhase::Finished {
                continue;
            }
            tracing::warn!(job = %handle, %token, "killing job attached to departing descriptor");
            let finish = match &mut job.pump {
                PumpKind::Simple(p) => p.force_finish(lp, hooks, handle, StatusCode::Killed),
                PumpKind::Fd2Fd(p) => p.force_finish(lp, hooks, handle, StatusCode::Killed),
            };
            Self::finalize(lp, hooks, events, timers, stats, job, handle, finish);
        }
        if !self.hooks.contains(token) {
            // Finalizing an engine-registered job already removed both the
            // hook and the registration.
            return Ok(());
        }
        self.hooks.remove(token)?;
        lp.unregister(token)?;
        Ok(())
    }

    // ─── Internals ──────────────────────────────────────────────────────

    fn job(&self, handle: JobHandle) -> Result<&Job, ControlError> {
        match self.jobs.get(handle.slot) {
            Some(job) if job.generation == handle.generation => Ok(job),
            _ => Err(ControlError::StaleHandle),
        }
    }

    /// Retire a job run. The pump has already released its claims and
    /// controlled bits; here the engine cancels the timer, settles the
    /// registrations, updates the counters and queues the one completion
    /// event.
    #[allow(clippy::too_many_arguments)]
    fn finalize<L: EventLoop>(
        lp: &mut L,
        hooks: &mut HookTable,
        events: &mut Vec<CopyEvent>,
        timers: &mut HashMap<TimerToken, JobHandle>,
        stats: &mut EngineStats,
        job: &mut Job,
        handle: JobHandle,
        finish: Finish,
    ) {
        if let Some(timer) = job.timer.take() {
            timers.remove(&timer);
            if let Err(err) = lp.cancel(timer) {
                tracing::debug!(%timer, %err, "timer already gone at completion");
            }
        }
        if !job.persistent {
            Self::teardown_registrations(lp, hooks, job);
        }
        job.phase = JobPhase::Finished;
        job.finish = Some(finish);

        let (bytes_in, bytes_out) = match &job.pump {
            PumpKind::Simple(p) => (p.transferred(), p.transferred()),
            PumpKind::Fd2Fd(p) => (p.bytes_in(), p.bytes_out()),
        };
        stats.bytes_in += bytes_in;
        stats.bytes_out += bytes_out;
        match finish.status {
            s if s.is_success() => stats.jobs_completed += 1,
            StatusCode::Terminated | StatusCode::EndOfOutput => stats.jobs_completed += 1,
            StatusCode::Killed | StatusCode::TimedOut => stats.jobs_killed += 1,
            _ => stats.jobs_failed += 1,
        }

        tracing::debug!(job = %handle, status = %finish.status, bytes_in, bytes_out, "job finished");
        events.push(CopyEvent::Finished {
            job: handle,
            status: finish.status,
            errno: finish.errno,
        });
    }

    /// Unregister engine-owned registrations and restore suppressed client
    /// interest on shared ones.
    fn teardown_registrations<L: EventLoop>(lp: &mut L, hooks: &mut HookTable, job: &Job) {
        for reg in [job.src_reg, job.dst_reg].into_iter().flatten() {
            if reg.engine_registered {
                if let Err(err) = hooks.remove(reg.token) {
                    tracing::warn!(token = %reg.token, %err, "hook still owned at teardown");
                    continue;
                }
                if let Err(err) = lp.unregister(reg.token) {
                    tracing::warn!(token = %reg.token, %err, "unregister failed at teardown");
                }
            } else if let Some(saved) = reg.saved_interest {
                set_bits(lp, reg.token, saved, Interest::NONE);
            }
        }
    }
}

impl Default for CopyEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve one descriptor side against the substrate: register raw
/// descriptors, verify and (optionally) suppress client-registered ones.
fn stage_fd<L: EventLoop>(
    rb: &mut Rollback<'_, L>,
    hooks: &HookTable,
    spec: FdSpec,
    suppress: bool,
) -> Result<RegSide, SubmitError> {
    match spec {
        FdSpec::Raw(fd) => {
            let token = rb.register(fd)?;
            Ok(RegSide {
                token,
                fd,
                engine_registered: true,
                saved_interest: None,
            })
        }
        FdSpec::Registered { token, fd } => {
            rb.lp.interest(token)?; // fails on unknown tokens
            let saved = if suppress {
                // Don't disturb bits another pump controls on this shared
                // registration.
                let controlled = hooks
                    .controlled(token, Direction::In)
                    .with(hooks.controlled(token, Direction::Out));
                let clearable = (Interest::INPUT | Interest::OUTPUT).without(controlled);
                Some(rb.suppress(token, clearable)?)
            } else {
                None
            };
            Ok(RegSide {
                token,
                fd,
                engine_registered: false,
                saved_interest: saved,
            })
        }
    }
}
