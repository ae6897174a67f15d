//! Deterministic simulation harness for seeframe campaigns.
//!
//! [`SimDesign`] implements the engine's `SimAdapter` on tokio's virtual
//! clock, so whole campaigns run in microseconds of wall time and replay
//! exactly under `#[tokio::test(start_paused = true)]` or inside a turmoil
//! simulation.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks what must hold after any campaign: event
//! ids count up, targets are eligible, transients are released exactly once
//! and on time, and no bit is ever overridden twice. Use
//! [`InvariantRegistry::standard()`] for the full set.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod invariants;
pub mod sim_design;

pub use invariants::{
    CampaignSnapshot, EventIdsMonotonic, ForcesBalanced, Invariant, InvariantRegistry,
    InvariantResult, NoOverlappingOverrides, PerNodeCapRespected, SignalSnapshot,
    TargetsEligible, TransientsReleasedOnce, Violation,
};
pub use sim_design::{Access, DesignHandle, SignalKind, SimDesign};
