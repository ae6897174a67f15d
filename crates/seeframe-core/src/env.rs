//! Simulation environment abstraction.
//!
//! Decouples the injection engine from any particular simulator. The engine
//! only needs to resolve signals once, sample and force individual bits,
//! release forced bits back to their natural drivers, and suspend itself for
//! a span of simulated time. Deterministic harnesses implement this on a
//! virtual clock; simulator bindings implement it on top of their VPI/VHPI
//! layer.

use std::{future::Future, time::Duration};

use crate::error::AdapterError;

/// Four-state value of a single sampled bit, collapsed to what the engine
/// needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Logic {
    /// Logic low
    Zero,
    /// Logic high
    One,
    /// X or Z. Cannot be complemented.
    Unknown,
}

impl Logic {
    /// Boolean value, or `None` for X/Z.
    pub fn to_bool(self) -> Option<bool> {
        match self {
            Self::Zero => Some(false),
            Self::One => Some(true),
            Self::Unknown => None,
        }
    }
}

impl From<bool> for Logic {
    fn from(value: bool) -> Self {
        if value { Self::One } else { Self::Zero }
    }
}

/// Adapter to a running discrete-event simulation.
///
/// # Invariants
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `sleep(d)` resumes the caller exactly `d` of simulated time later
/// - `release_bit()` hands the bit back to the design's own drivers; a
///   storage element keeps the forced value until normal logic overwrites it
/// - Handles stay valid for the whole run once `resolve()` succeeded
pub trait SimAdapter: Clone + Send + Sync + 'static {
    /// Opaque signal handle, resolved once per candidate at construction.
    type Handle: Clone + Send + Sync + 'static;

    /// Resolve a hierarchical path (`top.u_core.state`) into a handle.
    fn resolve(&self, path: &str, width: u32) -> Result<Self::Handle, AdapterError>;

    /// Resolve a string-valued testbench signal.
    fn resolve_text(&self, path: &str) -> Result<Self::Handle, AdapterError>;

    /// Current simulated time since the start of simulation.
    fn now(&self) -> Duration;

    /// Sample one bit of a signal.
    fn read_bit(&self, handle: &Self::Handle, bit: u32) -> Result<Logic, AdapterError>;

    /// Override one bit with `value` until released.
    fn force_bit(&self, handle: &Self::Handle, bit: u32, value: bool) -> Result<(), AdapterError>;

    /// Return a forced bit to natural drive.
    fn release_bit(&self, handle: &Self::Handle, bit: u32) -> Result<(), AdapterError>;

    /// Deposit a plain value into a testbench signal.
    fn deposit(&self, handle: &Self::Handle, value: u64) -> Result<(), AdapterError>;

    /// Write a string into a signal obtained from `resolve_text()`.
    fn deposit_text(&self, handle: &Self::Handle, text: &str) -> Result<(), AdapterError>;

    /// Suspend the caller for `duration` of simulated time.
    ///
    /// This is the ONLY async method in the trait.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_has_no_boolean_value() {
        assert_eq!(Logic::Unknown.to_bool(), None);
        assert_eq!(Logic::One.to_bool(), Some(true));
        assert_eq!(Logic::from(false), Logic::Zero);
    }
}
