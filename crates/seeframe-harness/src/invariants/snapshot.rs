//! Observable campaign state for invariant checking.

use seeframe_core::{
    EligibleSet, InjectionEvent, OverrideRelease, RunFailure, RunReport, SignalClass,
};

use crate::sim_design::Access;

/// Eligible signal as seen by invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalSnapshot {
    /// Dotted path
    pub path: String,
    /// Bit width
    pub width: u32,
    /// Injectability class
    pub class: SignalClass,
}

/// Everything a finished campaign left behind.
#[derive(Debug, Clone, Default)]
pub struct CampaignSnapshot {
    /// Eligible set, indexed by `SignalId`
    pub eligible: Vec<SignalSnapshot>,
    /// Committed events
    pub events: Vec<InjectionEvent>,
    /// Transient releases
    pub releases: Vec<OverrideRelease>,
    /// Writes recorded by the simulated design
    pub accesses: Vec<Access>,
    /// Per-signal cap of the goal, if any
    pub node_cap: Option<u64>,
}

impl CampaignSnapshot {
    /// Snapshot of a finished run.
    pub fn new(eligible: &EligibleSet, report: &RunReport) -> Self {
        Self {
            eligible: eligible
                .iter()
                .map(|(_, s)| SignalSnapshot {
                    path: s.path().to_string(),
                    width: s.width(),
                    class: s.class(),
                })
                .collect(),
            events: report.events.clone(),
            releases: report.releases.clone(),
            accesses: Vec::new(),
            node_cap: None,
        }
    }

    /// Snapshot of an aborted run.
    pub fn from_failure(eligible: &EligibleSet, failure: &RunFailure) -> Self {
        Self::new(eligible, &failure.report)
    }

    /// Attach the design's write log.
    #[must_use]
    pub fn with_accesses(mut self, accesses: Vec<Access>) -> Self {
        self.accesses = accesses;
        self
    }

    /// Attach the goal's per-node cap.
    #[must_use]
    pub fn with_node_cap(mut self, cap: Option<u64>) -> Self {
        self.node_cap = cap;
        self
    }
}
