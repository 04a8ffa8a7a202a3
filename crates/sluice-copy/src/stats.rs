//! # Engine statistics and progress snapshots
//!
//! Side-effect-free views of job and engine state, shaped for JSON export
//! alongside the rest of the platform's telemetry.

use crate::pump::StatusCode;
use serde::Serialize;

// ─── Job progress ───────────────────────────────────────────────────────────

/// State flags of one job at snapshot time.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct JobFlags {
    /// The pump is active (possibly stopped or flushing).
    pub running: bool,
    /// Input is over; buffered bytes are draining to the destination.
    pub flushing: bool,
    pub stopped_in: bool,
    pub stopped_out: bool,
    pub finished: bool,
}

/// Transfer progress of one job. Valid at any time, including after
/// completion until the handle is released.
#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    /// Bytes consumed from the source.
    pub bytes_in: u64,
    /// Bytes delivered to the destination.
    pub bytes_out: u64,
    /// Bytes sitting in the cyclic buffer (fd-to-fd jobs only).
    pub buffered: u64,
    pub flags: JobFlags,
    /// Completion status, once the job has one.
    pub status: Option<StatusCode>,
}

// ─── Engine stats ───────────────────────────────────────────────────────────

/// Engine-wide counters across all jobs.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EngineStats {
    /// Requests accepted by `submit`.
    pub jobs_submitted: u64,
    /// Runs that ended in a success, terminate, or tolerated end-of-output.
    pub jobs_completed: u64,
    /// Runs ended by kill, teardown, or timeout.
    pub jobs_killed: u64,
    /// Runs ended by a transport error.
    pub jobs_failed: u64,
    /// Bytes consumed from sources, all jobs.
    pub bytes_in: u64,
    /// Bytes delivered to destinations, all jobs.
    pub bytes_out: u64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share of finished runs that ran to completion.
    pub fn completion_ratio(&self) -> f64 {
        let finished = self.jobs_completed + self.jobs_killed + self.jobs_failed;
        if finished == 0 {
            0.0
        } else {
            self.jobs_completed as f64 / finished as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_ratio_counts_all_terminal_classes() {
        let stats = EngineStats {
            jobs_submitted: 10,
            jobs_completed: 6,
            jobs_killed: 2,
            jobs_failed: 2,
            ..EngineStats::default()
        };
        assert!((stats.completion_ratio() - 0.6).abs() < f64::EPSILON);
        assert!((EngineStats::default().completion_ratio() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn progress_serializes_for_export() {
        let progress = JobProgress {
            bytes_in: 1500,
            bytes_out: 1400,
            buffered: 100,
            flags: JobFlags {
                running: true,
                flushing: true,
                ..JobFlags::default()
            },
            status: None,
        };
        let json = serde_json::to_value(&progress).unwrap();
        assert_eq!(json["bytes_in"], 1500);
        assert_eq!(json["flags"]["flushing"], true);
        assert_eq!(json["status"], serde_json::Value::Null);
    }
}
