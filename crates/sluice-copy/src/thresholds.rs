//! # Watermark arithmetic
//!
//! Pure numeric policy for the descriptor-to-descriptor pump, kept away
//! from the state machine so it can be validated on its own.
//!
//! The four thresholds gate readiness interest with hysteresis:
//!
//! ```text
//!   0 ───── low_write ── low_read ········ high_read ── high_write ── size
//!             │             │                  │             │
//!   write off ┘             └ read on     read off ┘         └ write on
//! ```
//!
//! Reads stay armed until occupancy climbs to `high_read` and re-arm once it
//! falls back to `low_read`; writes arm at `high_write` and disarm at
//! `low_write`. Distinct start/stop points per direction are what keep the
//! registration from flapping on every byte.

use crate::error::ConfigError;
use crate::request::WatermarkSpec;

/// Smallest cyclic buffer the engine will run with.
pub const MIN_IO_BUFFER: usize = 32;

/// Buffers below this are too small for staggered thresholds; the atomic
/// single-shot policy is forced instead.
pub const ATOMIC_CUTOFF: usize = 2 * MIN_IO_BUFFER;

/// Buffer size used when a request leaves `io_buffer_size` at zero.
pub const DEFAULT_IO_BUFFER: usize = 16 * 1024;

// ─── Thresholds ─────────────────────────────────────────────────────────────

/// Resolved watermark set for one job. Invariant after construction:
/// `low_read < high_read ≤ size` and `low_write < high_write ≤ size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Re-arm reads at or below this occupancy.
    pub low_read: usize,
    /// Disarm reads at or above this occupancy.
    pub high_read: usize,
    /// Disarm writes at or below this occupancy.
    pub low_write: usize,
    /// Arm writes at or above this occupancy.
    pub high_write: usize,
}

impl Thresholds {
    /// Resolve the thresholds for a buffer of `size` bytes.
    ///
    /// All four watermarks defaulted: standard policy (atomic policy below
    /// [`ATOMIC_CUTOFF`]). All four explicit: validated as-is. A mixture is
    /// rejected — half-specified hysteresis is almost always a bug in the
    /// caller.
    pub fn compute(size: usize, spec: &WatermarkSpec) -> Result<Thresholds, ConfigError> {
        if size < MIN_IO_BUFFER {
            return Err(ConfigError::BufferTooSmall {
                size,
                min: MIN_IO_BUFFER,
            });
        }

        let set = [
            spec.low_read.is_some(),
            spec.high_read.is_some(),
            spec.low_write.is_some(),
            spec.high_write.is_some(),
        ];
        let n_set = set.iter().filter(|s| **s).count();

        let thresholds = match n_set {
            0 if size < ATOMIC_CUTOFF => Self::atomic(size),
            0 => Self::defaults(size),
            4 => Thresholds {
                low_read: spec.low_read.unwrap_or(0),
                high_read: spec.high_read.unwrap_or(0),
                low_write: spec.low_write.unwrap_or(0),
                high_write: spec.high_write.unwrap_or(0),
            },
            _ => return Err(ConfigError::PartialWatermarks),
        };

        thresholds.validate(size)?;
        Ok(thresholds)
    }

    /// Standard defaulting policy.
    fn defaults(size: usize) -> Thresholds {
        Thresholds {
            low_read: size / 4,
            high_read: size - size / 4,
            low_write: size / 8,
            high_write: size - size / 8,
        }
    }

    /// Single-shot policy for tiny buffers: reads fill the whole buffer,
    /// writes drain it completely before reads resume.
    fn atomic(size: usize) -> Thresholds {
        Thresholds {
            low_read: size / 8,
            high_read: size,
            low_write: 0,
            high_write: size - size / 8,
        }
    }

    fn validate(&self, size: usize) -> Result<(), ConfigError> {
        if self.low_read >= self.high_read || self.high_read > size {
            return Err(ConfigError::BadWatermarks {
                which: "read",
                low: self.low_read,
                high: self.high_read,
                size,
            });
        }
        if self.low_write >= self.high_write || self.high_write > size {
            return Err(ConfigError::BadWatermarks {
                which: "write",
                low: self.low_write,
                high: self.high_write,
                size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unset() -> WatermarkSpec {
        WatermarkSpec::default()
    }

    fn explicit(lr: usize, hr: usize, lw: usize, hw: usize) -> WatermarkSpec {
        WatermarkSpec {
            low_read: Some(lr),
            high_read: Some(hr),
            low_write: Some(lw),
            high_write: Some(hw),
        }
    }

    // ─── Defaulting ─────────────────────────────────────────────────────

    #[test]
    fn defaults_for_1k_buffer() {
        let t = Thresholds::compute(1024, &unset()).unwrap();
        assert_eq!(t.low_read, 256);
        assert_eq!(t.high_read, 768);
        assert_eq!(t.low_write, 128);
        assert_eq!(t.high_write, 896);
    }

    #[test]
    fn defaults_stay_ordered_at_the_cutoff() {
        let t = Thresholds::compute(ATOMIC_CUTOFF, &unset()).unwrap();
        assert!(t.low_read < t.high_read);
        assert!(t.low_write < t.high_write);
        assert!(t.high_write <= ATOMIC_CUTOFF);
    }

    #[test]
    fn tiny_buffer_forces_atomic_policy() {
        let t = Thresholds::compute(32, &unset()).unwrap();
        assert_eq!(t.low_write, 0);
        assert_eq!(t.high_read, 32);
        assert_eq!(t.low_read, 4);
        assert_eq!(t.high_write, 28);
    }

    // ─── Validation ─────────────────────────────────────────────────────

    #[test]
    fn explicit_watermarks_pass_through() {
        let t = Thresholds::compute(1024, &explicit(256, 768, 128, 896)).unwrap();
        assert_eq!(t.high_write, 896);
    }

    #[test]
    fn inverted_read_watermarks_rejected() {
        let err = Thresholds::compute(1024, &explicit(768, 256, 128, 896)).unwrap_err();
        assert!(matches!(err, ConfigError::BadWatermarks { which: "read", .. }));
    }

    #[test]
    fn high_water_above_buffer_rejected() {
        let err = Thresholds::compute(1024, &explicit(256, 768, 128, 2048)).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::BadWatermarks { which: "write", .. }
        ));
    }

    #[test]
    fn mixed_explicit_and_defaulted_rejected() {
        let spec = WatermarkSpec {
            low_read: Some(10),
            ..WatermarkSpec::default()
        };
        assert_eq!(
            Thresholds::compute(1024, &spec).unwrap_err(),
            ConfigError::PartialWatermarks
        );
    }

    #[test]
    fn undersized_buffer_rejected() {
        assert!(matches!(
            Thresholds::compute(16, &unset()).unwrap_err(),
            ConfigError::BufferTooSmall { size: 16, min: 32 }
        ));
    }

    #[test]
    fn equal_low_and_high_rejected() {
        let err = Thresholds::compute(1024, &explicit(512, 512, 128, 896)).unwrap_err();
        assert!(matches!(err, ConfigError::BadWatermarks { which: "read", .. }));
    }
}
