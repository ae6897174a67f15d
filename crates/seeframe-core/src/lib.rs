//! Single-event-effect fault injection for digital circuit simulation.
//!
//! Flips bits in storage elements (SEU) and glitches combinational nets
//! (SET) inside a running simulation, to measure how a design tolerates
//! radiation-induced upsets.
//!
//! # Architecture
//!
//! ```text
//! Yosys JSON ──> CandidateRegistry ──> SignalFilter ──> EligibleSet
//!                                                          │
//!               TimingModel ─┐   InjectionStrategy ─┐      │
//!                            ▼                      ▼      ▼
//!                          FaultInjector ──> SimAdapter (simulator)
//!                            ▲
//!               InjectionGoal┘
//! ```
//!
//! The engine never talks to a simulator directly. Everything goes through
//! [`SimAdapter`], which the harness crate implements on a virtual clock and
//! simulator bindings implement on top of their signal access layer.

#![forbid(unsafe_code)]

pub mod env;
pub mod error;
pub mod event;
pub mod filter;
pub mod goal;
pub mod injector;
pub mod netlist;
pub mod overrides;
pub mod strategy;
pub mod timing;

pub use env::{Logic, SimAdapter};
pub use error::{
    AdapterError, AdapterOp, BuildError, ConfigError, ParseError, RunError, RunFailure,
};
pub use event::{
    FaultKind, FaultTarget, GoalState, InjectionEvent, OverrideRelease, RunReport, RunSummary,
    SignalId,
};
pub use filter::{DEFAULT_MAX_SIGNAL_WIDTH, EligibleSet, SignalFilter, filter};
pub use goal::{GoalSpec, InfiniteInjection, InjectionGoal, SeesPerNode, TotalSees};
pub use injector::{
    DEFAULT_BUSY_BACKOFF, DEFAULT_MAX_BUSY_RETRIES, FaultInjector, FaultInjectorBuilder,
    InjectorHandle, InjectorState, Verbosity,
};
pub use netlist::{CandidateRegistry, CandidateSignal, NetlistParser, SignalClass};
pub use overrides::{ActiveOverrides, OverrideTable};
pub use strategy::{
    InjectionStrategy, PoissonInjectionStrategy, RandomInjectionStrategy, Selection,
    SelectionContext, SequentialInjectionStrategy, StrategySpec,
};
pub use timing::{
    BoundedRandomTimer, FixedTimer, PoissonTimer, SimUnit, TimerSpec, TimingModel,
};
