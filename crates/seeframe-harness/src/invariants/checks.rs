//! Standard campaign invariants.

use std::collections::{BTreeMap, HashMap};

use seeframe_core::{FaultKind, SignalClass, SignalId};

use super::{CampaignSnapshot, Invariant, InvariantResult, Violation};
use crate::sim_design::Access;

fn violation(invariant: &'static str, message: String) -> Violation {
    Violation { invariant, message }
}

/// Event ids are 1, 2, 3, ... and timestamps never go backwards.
pub struct EventIdsMonotonic;

impl Invariant for EventIdsMonotonic {
    fn name(&self) -> &'static str {
        "EventIdsMonotonic"
    }

    fn check(&self, state: &CampaignSnapshot) -> InvariantResult {
        for (i, event) in state.events.iter().enumerate() {
            let expected = i as u64 + 1;
            if event.id != expected {
                let message = format!("event #{i} has id {}, expected {expected}", event.id);
                return Err(violation(self.name(), message));
            }
        }
        for pair in state.events.windows(2) {
            if pair[1].at < pair[0].at {
                return Err(violation(
                    self.name(),
                    format!(
                        "event {} at {:?} precedes event {} at {:?}",
                        pair[1].id, pair[1].at, pair[0].id, pair[0].at
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Every event targets an eligible signal, an in-range bit, and the fault
/// kind matching the signal class.
pub struct TargetsEligible;

impl Invariant for TargetsEligible {
    fn name(&self) -> &'static str {
        "TargetsEligible"
    }

    fn check(&self, state: &CampaignSnapshot) -> InvariantResult {
        for event in &state.events {
            let Some(signal) = state.eligible.get(event.signal.0) else {
                let message = format!("event {} targets unknown {:?}", event.id, event.signal);
                return Err(violation(self.name(), message));
            };
            if signal.path != event.path {
                return Err(violation(
                    self.name(),
                    format!("event {} path {} != eligible {}", event.id, event.path, signal.path),
                ));
            }
            if event.bit >= signal.width {
                return Err(violation(
                    self.name(),
                    format!("event {} bit {} out of width {}", event.id, event.bit, signal.width),
                ));
            }
            let expected = match signal.class {
                SignalClass::StorageElement => FaultKind::Upset,
                SignalClass::CombinationalNet => FaultKind::Transient,
            };
            if event.kind != expected {
                let message =
                    format!("event {} is {} on a {:?}", event.id, event.kind, signal.class);
                return Err(violation(self.name(), message));
            }
        }
        Ok(())
    }
}

/// Each applied transient is released exactly once, at commit time plus its
/// duration. Nothing else is ever released.
pub struct TransientsReleasedOnce;

impl Invariant for TransientsReleasedOnce {
    fn name(&self) -> &'static str {
        "TransientsReleasedOnce"
    }

    fn check(&self, state: &CampaignSnapshot) -> InvariantResult {
        let mut released: HashMap<u64, Vec<_>> = HashMap::new();
        for release in &state.releases {
            released.entry(release.event_id).or_default().push(release);
        }

        for event in &state.events {
            let releases = released.remove(&event.id).unwrap_or_default();
            let needs_release = event.kind == FaultKind::Transient && event.applied;

            match (needs_release, releases.as_slice()) {
                (false, []) => {},
                (true, [release]) => {
                    let expected = event.at + event.duration.unwrap_or_default();
                    if release.at != expected {
                        return Err(violation(
                            self.name(),
                            format!(
                                "event {} released at {:?}, expected {expected:?}",
                                event.id, release.at
                            ),
                        ));
                    }
                    if (release.signal, release.bit) != (event.signal, event.bit) {
                        let message = format!("event {} released the wrong bit", event.id);
                        return Err(violation(self.name(), message));
                    }
                },
                (_, found) => {
                    return Err(violation(
                        self.name(),
                        format!("event {} ({}) has {} releases", event.id, event.kind, found.len()),
                    ));
                },
            }
        }

        if let Some(orphan) = released.keys().next() {
            return Err(violation(self.name(), format!("release for uncommitted event {orphan}")));
        }
        Ok(())
    }
}

/// Transient override windows on the same (signal, bit) never overlap.
pub struct NoOverlappingOverrides;

impl Invariant for NoOverlappingOverrides {
    fn name(&self) -> &'static str {
        "NoOverlappingOverrides"
    }

    fn check(&self, state: &CampaignSnapshot) -> InvariantResult {
        let mut windows: BTreeMap<(SignalId, u32), Vec<_>> = BTreeMap::new();
        for event in state.events.iter().filter(|e| e.kind == FaultKind::Transient && e.applied) {
            let end = event.at + event.duration.unwrap_or_default();
            windows.entry((event.signal, event.bit)).or_default().push((event.at, end, event.id));
        }

        for ((signal, bit), mut spans) in windows {
            spans.sort();
            for pair in spans.windows(2) {
                let ((_, end, first), (start, _, second)) = (pair[0], pair[1]);
                if start < end {
                    return Err(violation(
                        self.name(),
                        format!("events {first} and {second} overlap on {signal:?}[{bit}]"),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// No signal exceeds the goal's per-node cap.
pub struct PerNodeCapRespected;

impl Invariant for PerNodeCapRespected {
    fn name(&self) -> &'static str {
        "PerNodeCapRespected"
    }

    fn check(&self, state: &CampaignSnapshot) -> InvariantResult {
        let Some(cap) = state.node_cap else {
            return Ok(());
        };
        let mut counts: HashMap<SignalId, u64> = HashMap::new();
        for event in &state.events {
            *counts.entry(event.signal).or_default() += 1;
        }
        match counts.into_iter().find(|&(_, count)| count > cap) {
            Some((signal, count)) => {
                Err(violation(self.name(), format!("{signal:?} has {count} events, cap is {cap}")))
            },
            None => Ok(()),
        }
    }
}

/// At the design, forces and releases on a wire bit alternate, and nothing
/// is left forced once the run is over.
pub struct ForcesBalanced;

impl Invariant for ForcesBalanced {
    fn name(&self) -> &'static str {
        "ForcesBalanced"
    }

    fn check(&self, state: &CampaignSnapshot) -> InvariantResult {
        let mut forced: HashMap<(&str, u32), bool> = HashMap::new();
        for access in &state.accesses {
            match access {
                Access::Force { path, bit, at, .. } => {
                    if forced.insert((path.as_str(), *bit), true) == Some(true) {
                        let message = format!("{path}[{bit}] forced twice at {at:?}");
                        return Err(violation(self.name(), message));
                    }
                },
                Access::Release { path, bit, at } => {
                    if forced.insert((path.as_str(), *bit), false) != Some(true) {
                        let message = format!("{path}[{bit}] released while free at {at:?}");
                        return Err(violation(self.name(), message));
                    }
                },
                Access::Deposit { .. } | Access::DepositText { .. } => {},
            }
        }

        match forced.into_iter().find(|&(_, still)| still) {
            Some(((path, bit), _)) => {
                Err(violation(self.name(), format!("{path}[{bit}] left forced")))
            },
            None => Ok(()),
        }
    }
}
