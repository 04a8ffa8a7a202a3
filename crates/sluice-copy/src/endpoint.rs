//! Endpoint state for the two sides of a copy job.
//!
//! A [`DescriptorEndpoint`] is a descriptor plus accounting; a
//! [`BufferEndpoint`] is a memory region plus a cursor. A pump owns exactly
//! the endpoints attached to it; nothing else reads or mutates them.

use bytes::{Bytes, BytesMut};
use sluice_readiness::Token;
use std::os::fd::RawFd;

// ─── DescriptorEndpoint ─────────────────────────────────────────────────────

/// One descriptor side of a job.
#[derive(Debug)]
pub struct DescriptorEndpoint {
    fd: RawFd,
    token: Token,
    transferred: u64,
    max_io_len: Option<usize>,
    active: bool,
}

impl DescriptorEndpoint {
    pub fn new(fd: RawFd, token: Token, max_io_len: Option<usize>) -> Self {
        DescriptorEndpoint {
            fd,
            token,
            transferred: 0,
            max_io_len,
            active: false,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// Bytes moved through this side so far. Monotonic within one run.
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn add_transferred(&mut self, n: usize) {
        self.transferred += n as u64;
    }

    /// Clamp a transfer length to the per-call cap.
    pub fn clamp(&self, len: usize) -> usize {
        match self.max_io_len {
            Some(cap) => len.min(cap),
            None => len,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Return to the idle state for a persistent restart.
    pub fn reset(&mut self) {
        self.transferred = 0;
        self.active = false;
    }
}

// ─── BufferEndpoint ─────────────────────────────────────────────────────────

/// Backing memory of a buffer endpoint.
#[derive(Debug)]
pub enum BufferStorage {
    /// Bytes to drain towards a descriptor.
    Source(Bytes),
    /// Region filling up from a descriptor. Sized to its limit up front so
    /// the write region is plain initialized memory.
    Sink(BytesMut),
}

/// One memory side of a job.
#[derive(Debug)]
pub struct BufferEndpoint {
    storage: BufferStorage,
    cursor: usize,
    more: bool,
}

impl BufferEndpoint {
    pub fn source(data: Bytes, more: bool) -> Self {
        BufferEndpoint {
            storage: BufferStorage::Source(data),
            cursor: 0,
            more,
        }
    }

    pub fn sink(capacity: usize, more: bool) -> Self {
        let mut region = BytesMut::with_capacity(capacity);
        region.resize(capacity, 0);
        BufferEndpoint {
            storage: BufferStorage::Sink(region),
            cursor: 0,
            more,
        }
    }

    pub fn is_source(&self) -> bool {
        matches!(self.storage, BufferStorage::Source(_))
    }

    /// Total size of the current region.
    pub fn limit(&self) -> usize {
        match &self.storage {
            BufferStorage::Source(data) => data.len(),
            BufferStorage::Sink(region) => region.len(),
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Whether further regions were promised after this one.
    pub fn more(&self) -> bool {
        self.more
    }

    pub fn exhausted(&self) -> bool {
        self.cursor >= self.limit()
    }

    /// Remaining data to drain, clamped to `max`. Empty when exhausted —
    /// the "no space" condition, which finishes the job rather than
    /// failing it.
    pub fn read_region(&self, max: usize) -> &[u8] {
        match &self.storage {
            BufferStorage::Source(data) => {
                let end = data.len().min(self.cursor + max);
                &data[self.cursor..end]
            }
            BufferStorage::Sink(_) => &[],
        }
    }

    /// Remaining space to fill, clamped to `max`.
    pub fn write_region(&mut self, max: usize) -> &mut [u8] {
        match &mut self.storage {
            BufferStorage::Sink(region) => {
                let end = region.len().min(self.cursor + max);
                &mut region[self.cursor..end]
            }
            BufferStorage::Source(_) => &mut [],
        }
    }

    /// Commit `n` bytes of progress through the current region.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.cursor + n <= self.limit(), "advance past region end");
        self.cursor += n;
    }

    /// Bytes accumulated in a sink region so far.
    pub fn filled(&self) -> &[u8] {
        match &self.storage {
            BufferStorage::Sink(region) => &region[..self.cursor],
            BufferStorage::Source(_) => &[],
        }
    }

    /// Swap in a replacement region (the `more` refill path, or a
    /// reconfigure while idle). The cursor restarts at zero.
    pub fn install(&mut self, storage: BufferStorage, more: bool) {
        self.storage = storage;
        self.cursor = 0;
        self.more = more;
    }

    /// Rewind for a persistent restart: same region, cursor back to zero.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}
