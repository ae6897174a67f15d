//! Injection events, per-run counters and the final report.

use std::{fmt, time::Duration};

/// Index of a signal inside the [`crate::EligibleSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalId(pub usize);

/// Kind of single-event effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// SEU: bit-flip persisting in a storage element until overwritten
    Upset,
    /// SET: forced glitch on a net, released after a bounded duration
    Transient,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upset => f.write_str("SEU"),
            Self::Transient => f.write_str("SET"),
        }
    }
}

/// What a strategy picked: one bit of one eligible signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultTarget {
    /// Selected signal
    pub signal: SignalId,
    /// Selected bit, `0 <= bit < width`
    pub bit: u32,
    /// Fault kind (follows the signal class)
    pub kind: FaultKind,
}

/// A committed fault. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionEvent {
    /// Monotonically increasing id, starting at 1
    pub id: u64,
    /// Simulated time the fault fired
    pub at: Duration,
    /// Target signal
    pub signal: SignalId,
    /// Dotted path of the target signal
    pub path: String,
    /// Target bit
    pub bit: u32,
    /// Fault kind
    pub kind: FaultKind,
    /// Glitch length, transients only
    pub duration: Option<Duration>,
    /// False when the bit sampled as X/Z and was left untouched
    pub applied: bool,
}

impl InjectionEvent {
    /// Short label written to the SEE name signal: `SEU_top.state[3]`.
    pub fn label(&self) -> String {
        format!("{}_{}[{}]", self.kind, self.path, self.bit)
    }
}

impl fmt::Display for InjectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SEE ID {}: {} in {}[{}]", self.id, self.kind, self.path, self.bit)
    }
}

/// Release of a transient override by its restoration task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideRelease {
    /// Event that created the override
    pub event_id: u64,
    /// Released signal
    pub signal: SignalId,
    /// Released bit
    pub bit: u32,
    /// Simulated time of the release
    pub at: Duration,
}

/// Per-run counters consumed by goals and strategies.
///
/// Mutated only by the injector after an event commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalState {
    total: u64,
    per_signal: Vec<u64>,
}

impl GoalState {
    /// Zeroed counters for `signals` eligible signals.
    pub fn new(signals: usize) -> Self {
        Self { total: 0, per_signal: vec![0; signals] }
    }

    /// Record one committed event on `signal`.
    pub fn record(&mut self, signal: SignalId) {
        self.total += 1;
        if let Some(count) = self.per_signal.get_mut(signal.0) {
            *count += 1;
        }
    }

    /// Total events fired.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Events fired on `signal`.
    pub fn count(&self, signal: SignalId) -> u64 {
        self.per_signal.get(signal.0).copied().unwrap_or(0)
    }

    /// Per-signal counts, indexed by [`SignalId`].
    pub fn per_signal(&self) -> &[u64] {
        &self.per_signal
    }
}

/// Final campaign summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// SEEs committed
    pub total_injected: u64,
    /// Size of the eligible set
    pub eligible_candidates: usize,
    /// Committed upsets
    pub upsets: u64,
    /// Committed transients
    pub transients: u64,
    /// Committed events whose target bit was X/Z
    pub skipped_undefined: u64,
}

impl RunSummary {
    /// Summarize a committed event log.
    pub fn from_events(events: &[InjectionEvent], eligible_candidates: usize) -> Self {
        let mut summary = Self { eligible_candidates, ..Self::default() };
        for event in events {
            summary.total_injected += 1;
            match event.kind {
                FaultKind::Upset => summary.upsets += 1,
                FaultKind::Transient => summary.transients += 1,
            }
            if !event.applied {
                summary.skipped_undefined += 1;
            }
        }
        summary
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Injected {} SEEs into {} nodes.", self.total_injected, self.eligible_candidates)
    }
}

/// Everything a campaign produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Totals
    pub summary: RunSummary,
    /// Append-only event log, in commit order
    pub events: Vec<InjectionEvent>,
    /// Transient releases, in completion order
    pub releases: Vec<OverrideRelease>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: u64, kind: FaultKind, applied: bool) -> InjectionEvent {
        InjectionEvent {
            id,
            at: Duration::from_millis(id * 10),
            signal: SignalId(0),
            path: "top.q".to_string(),
            bit: 0,
            kind,
            duration: None,
            applied,
        }
    }

    #[test]
    fn summary_counts_by_kind() {
        let events = vec![
            event(1, FaultKind::Upset, true),
            event(2, FaultKind::Transient, true),
            event(3, FaultKind::Transient, false),
        ];
        let summary = RunSummary::from_events(&events, 7);

        assert_eq!(summary.total_injected, 3);
        assert_eq!(summary.upsets, 1);
        assert_eq!(summary.transients, 2);
        assert_eq!(summary.skipped_undefined, 1);
        assert_eq!(summary.to_string(), "Injected 3 SEEs into 7 nodes.");
    }

    #[test]
    fn event_line_names_kind_path_and_bit() {
        let mut e = event(4, FaultKind::Upset, true);
        e.bit = 3;
        assert_eq!(e.to_string(), "SEE ID 4: SEU in top.q[3]");
        assert_eq!(e.label(), "SEU_top.q[3]");
    }

    #[test]
    fn goal_state_counts_per_signal() {
        let mut state = GoalState::new(2);
        state.record(SignalId(1));
        state.record(SignalId(1));

        assert_eq!(state.total(), 2);
        assert_eq!(state.count(SignalId(0)), 0);
        assert_eq!(state.count(SignalId(1)), 2);
    }
}
