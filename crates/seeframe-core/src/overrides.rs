//! Table of in-flight transient overrides.
//!
//! At most one override may exist per (signal, bit). Entries are added by the
//! main loop when a transient fires and removed by the restoration task that
//! owns them. Upsets never appear here: they are released immediately.

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::event::SignalId;

/// Set of (signal, bit) pairs currently forced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ActiveOverrides {
    active: HashSet<(SignalId, u32)>,
}

impl ActiveOverrides {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if `bit` of `signal` is currently overridden.
    pub fn contains(&self, signal: SignalId, bit: u32) -> bool {
        self.active.contains(&(signal, bit))
    }

    /// Register an override. Returns `false` if one already existed.
    pub fn insert(&mut self, signal: SignalId, bit: u32) -> bool {
        self.active.insert((signal, bit))
    }

    /// Remove an override. Returns `false` if none existed.
    pub fn remove(&mut self, signal: SignalId, bit: u32) -> bool {
        self.active.remove(&(signal, bit))
    }

    /// Number of overridden bits of `signal` among its `width` bits.
    pub fn busy_bits(&self, signal: SignalId, width: u32) -> u32 {
        (0..width).filter(|&bit| self.contains(signal, bit)).count() as u32
    }

    /// Number of active overrides.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Check if no override is active.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Shared handle to the override table.
///
/// Every mutation goes through one exclusive section; the lock is never held
/// across an await point.
#[derive(Debug, Clone, Default)]
pub struct OverrideTable {
    inner: Arc<Mutex<ActiveOverrides>>,
}

impl OverrideTable {
    /// Empty shared table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the table for a synchronous section.
    pub fn lock(&self) -> MutexGuard<'_, ActiveOverrides> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an override. Returns `false` if one already existed.
    pub fn insert(&self, signal: SignalId, bit: u32) -> bool {
        self.lock().insert(signal, bit)
    }

    /// Remove an override. Returns `false` if none existed.
    pub fn remove(&self, signal: SignalId, bit: u32) -> bool {
        self.lock().remove(signal, bit)
    }

    /// Number of active overrides.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if no override is active.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
