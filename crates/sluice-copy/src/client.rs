//! # Client seam
//!
//! A component that owns descriptors and submits copy jobs implements
//! [`CopyCapable`]; [`dispatch_events`] routes the engine's drained events
//! into it. The engine itself never holds a reference to the client — the
//! client calls in, the events flow out.

use crate::engine::{CopyEngine, CopyEvent, JobHandle};
use crate::pump::{Direction, StatusCode};

/// Callbacks a copy-submitting component receives.
pub trait CopyCapable {
    /// Exactly one call per finished job run.
    fn on_job_finished(&mut self, job: JobHandle, status: StatusCode, errno: Option<i32>);

    /// The job drained a buffer region that promised more. Install a fresh
    /// region with [`CopyEngine::provide_buffer`] to resume it.
    fn on_need_buffer(&mut self, job: JobHandle, dir: Direction) {
        let _ = (job, dir);
    }
}

/// Drain the engine's event queue into a client. Returns the number of
/// events delivered.
pub fn dispatch_events<C: CopyCapable>(engine: &mut CopyEngine, client: &mut C) -> usize {
    let events: Vec<CopyEvent> = engine.drain_events().collect();
    let delivered = events.len();
    for event in events {
        match event {
            CopyEvent::Finished { job, status, errno } => {
                client.on_job_finished(job, status, errno);
            }
            CopyEvent::NeedBuffer { job, dir } => {
                client.on_need_buffer(job, dir);
            }
        }
    }
    delivered
}
