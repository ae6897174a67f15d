//! Invariant checking for fault injection campaigns.
//!
//! Invariants are properties every campaign must satisfy, whatever the
//! strategy, timers or goal. They run against a [`CampaignSnapshot`] taken
//! after the run: the committed event log, the transient releases and the
//! write log of the simulated design.
//!
//! # Usage
//!
//! ```ignore
//! let snapshot = CampaignSnapshot::new(injector.eligible(), &report)
//!     .with_accesses(design.accesses());
//! InvariantRegistry::standard().assert_all(&snapshot, "after scenario");
//! ```

mod checks;
mod snapshot;

pub use checks::{
    EventIdsMonotonic, ForcesBalanced, NoOverlappingOverrides, PerNodeCapRespected,
    TargetsEligible, TransientsReleasedOnce,
};
pub use snapshot::{CampaignSnapshot, SignalSnapshot};

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// What went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property checked against a finished campaign.
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant.
    fn check(&self, state: &CampaignSnapshot) -> InvariantResult;
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Registry with every standard campaign invariant.
    ///
    /// Includes:
    /// - [`EventIdsMonotonic`]: ids count up from 1, time never goes back
    /// - [`TargetsEligible`]: targets are eligible bits with the right kind
    /// - [`TransientsReleasedOnce`]: one release per transient, on time
    /// - [`NoOverlappingOverrides`]: one override per bit at a time
    /// - [`PerNodeCapRespected`]: per-node goals are never exceeded
    /// - [`ForcesBalanced`]: the design is left with nothing forced
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(EventIdsMonotonic);
        registry.add(TargetsEligible);
        registry.add(TransientsReleasedOnce);
        registry.add(NoOverlappingOverrides);
        registry.add(PerNodeCapRespected);
        registry.add(ForcesBalanced);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants. Returns every violation found.
    pub fn check_all(&self, state: &CampaignSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking with every violation.
    ///
    /// # Panics
    ///
    /// Panics if any invariant is violated.
    #[allow(clippy::panic, reason = "Test assertion helper")]
    pub fn assert_all(&self, state: &CampaignSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use seeframe_core::{FaultKind, InjectionEvent, OverrideRelease, SignalClass, SignalId};

    use super::*;

    fn snapshot() -> CampaignSnapshot {
        CampaignSnapshot {
            eligible: vec![SignalSnapshot {
                path: "top.w".to_string(),
                width: 2,
                class: SignalClass::CombinationalNet,
            }],
            ..CampaignSnapshot::default()
        }
    }

    fn transient(id: u64, at_ms: u64, bit: u32, duration_ms: u64) -> InjectionEvent {
        InjectionEvent {
            id,
            at: Duration::from_millis(at_ms),
            signal: SignalId(0),
            path: "top.w".to_string(),
            bit,
            kind: FaultKind::Transient,
            duration: Some(Duration::from_millis(duration_ms)),
            applied: true,
        }
    }

    fn release(event: &InjectionEvent) -> OverrideRelease {
        OverrideRelease {
            event_id: event.id,
            signal: event.signal,
            bit: event.bit,
            at: event.at + event.duration.unwrap_or_default(),
        }
    }

    #[test]
    fn standard_registry_has_invariants() {
        assert_eq!(InvariantRegistry::standard().len(), 6);
    }

    #[test]
    fn empty_campaign_passes() {
        assert!(InvariantRegistry::standard().check_all(&CampaignSnapshot::default()).is_ok());
    }

    #[test]
    fn well_formed_transients_pass() {
        let mut state = snapshot();
        state.events =
            vec![transient(1, 10, 0, 5), transient(2, 15, 0, 5), transient(3, 15, 1, 50)];
        state.releases = state.events.iter().map(release).collect();

        assert!(InvariantRegistry::standard().check_all(&state).is_ok());
    }

    #[test]
    fn overlapping_overrides_are_caught() {
        let mut state = snapshot();
        state.events = vec![transient(1, 10, 0, 20), transient(2, 15, 0, 5)];
        state.releases = state.events.iter().map(release).collect();

        let violations = InvariantRegistry::standard().check_all(&state).unwrap_err();
        assert!(violations.iter().any(|v| v.invariant == "NoOverlappingOverrides"));
    }

    #[test]
    fn missing_release_is_caught() {
        let mut state = snapshot();
        state.events = vec![transient(1, 10, 0, 5)];

        let violations = InvariantRegistry::standard().check_all(&state).unwrap_err();
        assert_eq!(violations[0].invariant, "TransientsReleasedOnce");
    }

    #[test]
    fn late_release_is_caught() {
        let mut state = snapshot();
        let event = transient(1, 10, 0, 5);
        let mut late = release(&event);
        late.at += Duration::from_millis(1);
        state.events = vec![event];
        state.releases = vec![late];

        assert!(TransientsReleasedOnce.check(&state).is_err());
    }

    #[test]
    fn cap_is_enforced_only_when_set() {
        let mut state = snapshot();
        state.events = vec![transient(1, 0, 0, 1), transient(2, 5, 1, 1)];
        state.releases = state.events.iter().map(release).collect();

        assert!(PerNodeCapRespected.check(&state).is_ok());
        state.node_cap = Some(1);
        assert!(PerNodeCapRespected.check(&state).is_err());
    }
}
