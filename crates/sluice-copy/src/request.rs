//! Copy request construction and validation.
//!
//! A [`CopyRequest`] names exactly one source and one destination — the
//! enums make "both" and "neither" unrepresentable — plus the tuning the
//! engine resolves at submit time. The request is consumed by value;
//! the engine's resolved copy is authoritative from then on.

use bytes::Bytes;
use sluice_readiness::Token;
use std::os::fd::RawFd;
use std::time::Duration;

// ─── Descriptor specification ───────────────────────────────────────────────

/// How a descriptor side reaches the readiness substrate.
#[derive(Debug, Clone, Copy)]
pub enum FdSpec {
    /// The engine registers the descriptor itself and tears the
    /// registration down when the job ends.
    Raw(RawFd),
    /// The client already registered this descriptor; the engine shares the
    /// registration and leaves it standing at job end. With
    /// [`CopyRequest::suppress_client_interest`], the client's armed bits
    /// are saved at submit and restored when the job ends.
    Registered { token: Token, fd: RawFd },
}

impl FdSpec {
    pub fn fd(&self) -> RawFd {
        match self {
            FdSpec::Raw(fd) => *fd,
            FdSpec::Registered { fd, .. } => *fd,
        }
    }
}

// ─── Endpoint specifications ────────────────────────────────────────────────

/// Where the bytes come from.
#[derive(Debug, Clone)]
pub enum SourceSpec {
    Fd(FdSpec),
    /// Caller-supplied memory. `more` promises further regions will be
    /// installed once this one is drained.
    Buffer { data: Bytes, more: bool },
}

/// Where the bytes go.
#[derive(Debug, Clone)]
pub enum DestSpec {
    Fd(FdSpec),
    /// Engine-allocated sink of `capacity` bytes, readable by the client
    /// through the job handle. `more` promises a replacement region will be
    /// installed once this one fills.
    Buffer { capacity: usize, more: bool },
}

// ─── Watermarks ─────────────────────────────────────────────────────────────

/// Optional explicit watermarks for a descriptor-to-descriptor job.
///
/// Leave all four unset to take the engine's defaults; set all four to
/// override. A mixture is rejected at submit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatermarkSpec {
    pub low_read: Option<usize>,
    pub high_read: Option<usize>,
    pub low_write: Option<usize>,
    pub high_write: Option<usize>,
}

// ─── CopyRequest ────────────────────────────────────────────────────────────

/// One copy job, as submitted by a client.
#[derive(Debug, Clone)]
pub struct CopyRequest {
    pub source: SourceSpec,
    pub dest: DestSpec,
    /// Overall byte cap; 0 means unlimited.
    pub len: u64,
    /// Overall deadline; fires as a kill with a timed-out status.
    pub timeout: Option<Duration>,
    /// Cyclic buffer size for fd-to-fd jobs; 0 takes the engine default.
    pub io_buffer_size: usize,
    /// Watermarks for fd-to-fd jobs. Ignored when either side is a buffer.
    pub watermarks: WatermarkSpec,
    /// Per-call read cap.
    pub max_read_len: Option<usize>,
    /// Per-call write cap.
    pub max_write_len: Option<usize>,
    /// Recycle the job slot at completion instead of retiring it; the job
    /// can be started again and reports progress per run.
    pub persistent: bool,
    /// On [`FdSpec::Registered`] sides: park the client's own armed bits
    /// while the job runs and restore them afterwards.
    pub suppress_client_interest: bool,
}

impl CopyRequest {
    /// A request with default tuning. Fields are public; override with
    /// struct update syntax where needed.
    pub fn new(source: SourceSpec, dest: DestSpec) -> Self {
        CopyRequest {
            source,
            dest,
            len: 0,
            timeout: None,
            io_buffer_size: 0,
            watermarks: WatermarkSpec::default(),
            max_read_len: None,
            max_write_len: None,
            persistent: false,
            suppress_client_interest: false,
        }
    }

    /// The byte cap as an option, `None` meaning unlimited.
    pub(crate) fn cap(&self) -> Option<u64> {
        if self.len == 0 { None } else { Some(self.len) }
    }
}
