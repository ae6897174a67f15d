//! Error types for the fault injection engine.
//!
//! Errors are split by the phase that raises them:
//!
//! - [`ParseError`]: netlist description is malformed (before any injection)
//! - [`ConfigError`]: filters, timers, strategy or goal make no sense
//! - [`AdapterError`]: the simulator refused to resolve, read or write a signal
//! - [`BuildError`]: anything that stops an injector from being constructed
//! - [`RunError`]: fatal conditions that abort a running campaign
//!
//! Construction-time errors mean `start()` is never reachable. Run-time errors
//! abort the campaign but never discard events that were already committed.

use std::{fmt, time::Duration};

use thiserror::Error;

use crate::event::RunReport;

/// Errors raised while interpreting a netlist description.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Input is not valid netlist JSON
    #[error("invalid netlist json: {0}")]
    Json(String),

    /// The requested top module is not defined
    #[error("top module '{0}' not found in netlist")]
    TopModuleNotFound(String),

    /// No top module was requested and none carries the `top` attribute
    #[error("no top module given and none marked with the 'top' attribute")]
    NoTopModule,

    /// A bit entry is neither a net id nor a known constant
    #[error("unresolvable bit '{bit}' in {module}.{net}")]
    UnresolvableBit {
        /// Module definition containing the net
        module: String,
        /// Net or cell connection name
        net: String,
        /// Offending bit value as written
        bit: String,
    },

    /// A cell connects a port its definition does not have
    #[error("cell {module}.{cell} has no port '{port}'")]
    MissingPort {
        /// Module definition containing the cell
        module: String,
        /// Cell instance name
        cell: String,
        /// Port that was expected or referenced
        port: String,
    },

    /// A module (transitively) instantiates itself
    #[error("recursive instantiation of module '{0}'")]
    RecursiveInstance(String),
}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Errors raised while validating injector configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// No candidate survived filtering
    #[error("no eligible signals: all {candidates} candidates were filtered out")]
    EmptyEligibleSet {
        /// Size of the registry before filtering
        candidates: usize,
    },

    /// Timer bounds are zero, inverted or not finite
    #[error("invalid timer: {0}")]
    InvalidTimer(String),

    /// Goal parameters make no sense (e.g. zero events)
    #[error("invalid goal: {0}")]
    InvalidGoal(String),

    /// A per-signal rate is not a positive finite number
    #[error("invalid rate {rate} for signal {path}")]
    InvalidRate {
        /// Signal the rate was configured for
        path: String,
        /// Offending rate
        rate: f64,
    },

    /// Strategy name is not one of the known strategies
    #[error("unknown injection strategy '{0}' (expected random, sequential or poisson)")]
    UnknownStrategy(String),

    /// A mandatory builder field was never set
    #[error("missing configuration: {0}")]
    Missing(&'static str),

    /// Combinational nets are eligible but nothing says how long a glitch lasts
    #[error("transient_duration_timer is required: {nets} combinational nets are eligible")]
    TransientTimerRequired {
        /// Number of eligible combinational nets
        nets: usize,
    },
}

/// Adapter operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterOp {
    /// Resolving a path into a handle
    Resolve,
    /// Sampling a bit
    Read,
    /// Forcing a bit
    Force,
    /// Releasing a forced bit
    Release,
    /// Depositing a value into a testbench signal
    Deposit,
}

impl fmt::Display for AdapterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::Resolve => "resolve",
            Self::Read => "read",
            Self::Force => "force",
            Self::Release => "release",
            Self::Deposit => "deposit",
        };
        f.write_str(op)
    }
}

/// The simulation adapter failed to act on a signal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("adapter failed to {op} {path}: {reason}")]
pub struct AdapterError {
    /// Operation that failed
    pub op: AdapterOp,
    /// Hierarchical path of the offending signal
    pub path: String,
    /// Simulator-provided reason
    pub reason: String,
}

impl AdapterError {
    /// Create an adapter error for `op` on `path`.
    pub fn new(op: AdapterOp, path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { op, path: path.into(), reason: reason.into() }
    }
}

/// Errors preventing an injector from being built.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A signal could not be resolved by the adapter
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// Fatal conditions that abort a running campaign.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// Strategy kept answering Busy past the retry budget
    #[error("selection stuck: no free candidate after {retries} retries at {at:?}")]
    SelectionStuck {
        /// Retries attempted before giving up
        retries: u32,
        /// Simulated time of the last attempt
        at: Duration,
    },

    /// Reading, forcing or releasing a signal failed
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// A restoration task panicked or was cancelled
    #[error("restoration task failed: {0}")]
    TaskFailed(String),

    /// Engine bookkeeping was violated (a strategy returned a busy bit)
    #[error("internal error: {0}")]
    Internal(String),
}

/// A campaign that aborted, with everything committed before the abort.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "campaign aborted after {injected} SEEs: {error}",
    injected = .report.summary.total_injected
)]
pub struct RunFailure {
    /// Fatal condition that ended the run
    #[source]
    pub error: RunError,
    /// Committed events and completed releases up to the abort
    pub report: RunReport,
}

impl RunError {
    /// Returns true if the error came from the simulator rather than the
    /// engine's own bookkeeping.
    pub fn is_adapter(&self) -> bool {
        matches!(self, Self::Adapter(_))
    }
}
