// SPDX-License-Identifier: GPL-3.0-only

//! Quota id allocation
//!
//! Quota ids come from a reserved range well above real group ids. The set of
//! ids already in use is primed once from the accounting report, then kept in
//! memory; a cursor walks the range and wraps to the lower bound.

use std::collections::BTreeSet;
use std::sync::Mutex;

use tracing::{debug, info};

use crate::{Result, SysError};

pub const DEFAULT_ID_MIN: u32 = 20971521;
pub const DEFAULT_ID_MAX: u32 = 23068672;

type Primer = dyn Fn() -> Result<Vec<u32>> + Send + Sync;

#[derive(Debug, Default)]
struct AllocatorState {
    primed: bool,
    used: BTreeSet<u32>,
    cursor: Option<u32>,
}

/// Hands out unused ids from `min..=max`. All state sits behind one lock, so
/// concurrent callers never receive the same id.
pub struct QuotaIdAllocator {
    min: u32,
    max: u32,
    primer: Box<Primer>,
    state: Mutex<AllocatorState>,
}

impl std::fmt::Debug for QuotaIdAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaIdAllocator")
            .field("min", &self.min)
            .field("max", &self.max)
            .finish_non_exhaustive()
    }
}

impl QuotaIdAllocator {
    /// `primer` returns the ids already in use; it runs once, on first use.
    pub fn new<F>(min: u32, max: u32, primer: F) -> Self
    where
        F: Fn() -> Result<Vec<u32>> + Send + Sync + 'static,
    {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min,
            max,
            primer: Box::new(primer),
            state: Mutex::new(AllocatorState::default()),
        }
    }

    /// An allocator that starts with nothing in use.
    pub fn empty(min: u32, max: u32) -> Self {
        Self::new(min, max, || Ok(Vec::new()))
    }

    pub fn range(&self) -> (u32, u32) {
        (self.min, self.max)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AllocatorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn prime(&self, state: &mut AllocatorState) -> Result<()> {
        if state.primed {
            return Ok(());
        }

        let found = (self.primer)()?;
        for id in found.into_iter().filter(|id| (self.min..=self.max).contains(id)) {
            state.used.insert(id);
        }
        state.cursor = state.used.last().copied();
        state.primed = true;

        info!(
            "Quota id allocator primed with {} ids in use (range {}..={})",
            state.used.len(),
            self.min,
            self.max
        );
        Ok(())
    }

    fn next_after(&self, id: Option<u32>) -> u32 {
        match id {
            Some(id) if id < self.max => id + 1,
            _ => self.min,
        }
    }

    /// Allocate the next free id after the cursor.
    pub fn allocate(&self) -> Result<u32> {
        let mut state = self.lock();
        self.prime(&mut state)?;

        let span = u64::from(self.max - self.min) + 1;
        let mut candidate = self.next_after(state.cursor);
        for _ in 0..span {
            if state.used.insert(candidate) {
                state.cursor = Some(candidate);
                debug!("Allocated quota id {}", candidate);
                return Ok(candidate);
            }
            candidate = self.next_after(Some(candidate));
        }

        Err(SysError::QuotaIdsExhausted {
            min: self.min,
            max: self.max,
        })
    }

    /// Record an id found bound on disk (restore path).
    pub fn mark_used(&self, id: u32) -> Result<()> {
        let mut state = self.lock();
        self.prime(&mut state)?;
        if (self.min..=self.max).contains(&id) {
            state.used.insert(id);
        }
        Ok(())
    }

    /// Return an id to the pool once its directory is gone.
    pub fn release(&self, id: u32) {
        let mut state = self.lock();
        if state.used.remove(&id) {
            debug!("Released quota id {}", id);
        }
    }

    pub fn is_used(&self, id: u32) -> bool {
        self.lock().used.contains(&id)
    }
}
