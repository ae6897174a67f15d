//! Stopping criteria, evaluated after every committed event.

use std::{fmt, str::FromStr};

use crate::{error::ConfigError, event::GoalState};

/// Decides whether injection should continue.
pub trait InjectionGoal: Send {
    /// Whether another event should be fired.
    fn should_continue(&self, state: &GoalState) -> bool;

    /// Per-signal cap strategies must respect, if any.
    fn node_cap(&self) -> Option<u64> {
        None
    }
}

/// Continue while fewer than `n` events fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotalSees {
    target: u64,
}

impl TotalSees {
    /// Stop after exactly `target` events.
    pub fn new(target: u64) -> Result<Self, ConfigError> {
        if target == 0 {
            return Err(ConfigError::InvalidGoal("total SEE count must be positive".to_string()));
        }
        Ok(Self { target })
    }
}

impl InjectionGoal for TotalSees {
    fn should_continue(&self, state: &GoalState) -> bool {
        state.total() < self.target
    }
}

/// Continue while some signal has fired fewer than `k` events.
///
/// Signals that reached `k` are excluded from selection through
/// [`InjectionGoal::node_cap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeesPerNode {
    per_node: u64,
}

impl SeesPerNode {
    /// Stop once every eligible signal fired `per_node` events.
    pub fn new(per_node: u64) -> Result<Self, ConfigError> {
        if per_node == 0 {
            return Err(ConfigError::InvalidGoal("SEEs per node must be positive".to_string()));
        }
        Ok(Self { per_node })
    }
}

impl InjectionGoal for SeesPerNode {
    fn should_continue(&self, state: &GoalState) -> bool {
        state.per_signal().iter().any(|&count| count < self.per_node)
    }

    fn node_cap(&self) -> Option<u64> {
        Some(self.per_node)
    }
}

/// Never stops on its own; only an external stop request ends the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InfiniteInjection;

impl InjectionGoal for InfiniteInjection {
    fn should_continue(&self, _state: &GoalState) -> bool {
        true
    }
}

/// Textual goal description: `total:N`, `per-node:K`, `infinite`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalSpec {
    /// [`TotalSees`]
    Total(u64),
    /// [`SeesPerNode`]
    PerNode(u64),
    /// [`InfiniteInjection`]
    Infinite,
}

impl GoalSpec {
    /// Instantiate the described goal.
    pub fn build(self) -> Result<Box<dyn InjectionGoal>, ConfigError> {
        Ok(match self {
            Self::Total(n) => Box::new(TotalSees::new(n)?),
            Self::PerNode(k) => Box::new(SeesPerNode::new(k)?),
            Self::Infinite => Box::new(InfiniteInjection),
        })
    }
}

impl fmt::Display for GoalSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Total(n) => write!(f, "total:{n}"),
            Self::PerNode(k) => write!(f, "per-node:{k}"),
            Self::Infinite => f.write_str("infinite"),
        }
    }
}

impl FromStr for GoalSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidGoal(format!("cannot parse goal '{s}'"));
        match s.split_once(':') {
            Some(("total", n)) => Ok(Self::Total(n.parse().map_err(|_| invalid())?)),
            Some(("per-node", k)) => Ok(Self::PerNode(k.parse().map_err(|_| invalid())?)),
            None if s == "infinite" => Ok(Self::Infinite),
            _ => Err(invalid()),
        }
    }
}
