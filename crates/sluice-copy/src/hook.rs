//! Per-descriptor direction arbitration.
//!
//! Two jobs may share one descriptor — one reading, one writing — but each
//! direction has at most one owner at a time, and only the owner may touch
//! the readiness bits for its direction. The [`HookTable`] is the checked
//! ownership-transfer ledger that replaces ad hoc flag sharing: claims and
//! releases are explicit operations with typed results.
//!
//! Invariant: a direction's controlled-bits field is non-empty only while
//! that direction has an owner.

use crate::engine::JobHandle;
use crate::error::HookError;
use crate::pump::Direction;
use sluice_readiness::{Interest, Token};
use std::collections::HashMap;
use std::os::fd::RawFd;

// ─── DataHook ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
struct DirSlot {
    owner: Option<JobHandle>,
    controlled: Interest,
}

/// Shared per-descriptor record, one per live registration the engine has
/// drawn into managed copying.
#[derive(Debug)]
pub struct DataHook {
    fd: RawFd,
    slots: [DirSlot; 2],
}

impl DataHook {
    fn slot(&self, dir: Direction) -> &DirSlot {
        &self.slots[dir as usize]
    }

    fn slot_mut(&mut self, dir: Direction) -> &mut DirSlot {
        &mut self.slots[dir as usize]
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }
}

// ─── HookTable ──────────────────────────────────────────────────────────────

/// All hooks, keyed by registration token.
#[derive(Debug, Default)]
pub struct HookTable {
    hooks: HashMap<Token, DataHook>,
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the hook for a registration if it does not exist yet.
    pub fn ensure(&mut self, token: Token, fd: RawFd) {
        self.hooks.entry(token).or_insert(DataHook {
            fd,
            slots: [DirSlot::default(); 2],
        });
    }

    pub fn contains(&self, token: Token) -> bool {
        self.hooks.contains_key(&token)
    }

    /// Take ownership of one direction. Fails while any live job owns it.
    pub fn claim(&mut self, token: Token, dir: Direction, job: JobHandle) -> Result<(), HookError> {
        let hook = self
            .hooks
            .get_mut(&token)
            .ok_or(HookError::UnknownHook(token))?;
        let slot = hook.slot_mut(dir);
        if slot.owner.is_some() {
            return Err(HookError::DirectionBusy { token, dir });
        }
        slot.owner = Some(job);
        Ok(())
    }

    /// Give a direction back. Idempotent: a release by a non-owner (or of
    /// an unknown hook) does nothing. Clears the controlled bits with the
    /// ownership.
    pub fn release(&mut self, token: Token, dir: Direction, job: JobHandle) {
        if let Some(hook) = self.hooks.get_mut(&token) {
            let slot = hook.slot_mut(dir);
            if slot.owner == Some(job) {
                slot.owner = None;
                slot.controlled = Interest::NONE;
            }
        }
    }

    /// Record which readiness bits the owning job controls for `dir`.
    /// Only the owner may call this.
    pub fn set_controlled(
        &mut self,
        token: Token,
        dir: Direction,
        job: JobHandle,
        bits: Interest,
    ) -> Result<(), HookError> {
        let hook = self
            .hooks
            .get_mut(&token)
            .ok_or(HookError::UnknownHook(token))?;
        let slot = hook.slot_mut(dir);
        if slot.owner != Some(job) {
            return Err(HookError::NotOwner { token, dir });
        }
        slot.controlled = bits;
        Ok(())
    }

    /// The bits currently controlled for a direction.
    pub fn controlled(&self, token: Token, dir: Direction) -> Interest {
        self.hooks
            .get(&token)
            .map(|h| h.slot(dir).controlled)
            .unwrap_or(Interest::NONE)
    }

    /// The job owning a direction, if any.
    pub fn owner(&self, token: Token, dir: Direction) -> Option<JobHandle> {
        self.hooks.get(&token).and_then(|h| h.slot(dir).owner)
    }

    /// All jobs attached to a hook, deduplicated. Teardown kills these
    /// before the registration is removed.
    pub fn attached(&self, token: Token) -> Vec<JobHandle> {
        let Some(hook) = self.hooks.get(&token) else {
            return Vec::new();
        };
        let mut jobs = Vec::with_capacity(2);
        for dir in [Direction::In, Direction::Out] {
            if let Some(job) = hook.slot(dir).owner {
                if !jobs.contains(&job) {
                    jobs.push(job);
                }
            }
        }
        jobs
    }

    /// Remove a hook. Every attached job must already have released its
    /// claim — a claim surviving to this point is a contract violation.
    pub fn remove(&mut self, token: Token) -> Result<(), HookError> {
        let hook = self
            .hooks
            .get(&token)
            .ok_or(HookError::UnknownHook(token))?;
        for dir in [Direction::In, Direction::Out] {
            if hook.slot(dir).owner.is_some() {
                return Err(HookError::StillOwned { token, dir });
            }
        }
        self.hooks.remove(&token);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}
