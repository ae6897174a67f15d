//! Property-based tests for target selection.

use std::collections::HashSet;

use proptest::prelude::*;
use seeframe_core::{
    ActiveOverrides, CandidateRegistry, CandidateSignal, EligibleSet, FaultKind, GoalState,
    InjectionStrategy, Selection, SelectionContext, SequentialInjectionStrategy, SignalClass,
    SignalFilter, SignalId, StrategySpec,
};

/// Generate signal widths and storage flags.
fn signals() -> impl Strategy<Value = Vec<(u32, bool)>> {
    prop::collection::vec((1u32..6, any::<bool>()), 1..6)
}

fn eligible(signals: &[(u32, bool)]) -> EligibleSet {
    let registry = CandidateRegistry::from_signals(signals.iter().enumerate().map(
        |(index, &(width, storage))| {
            let class =
                if storage { SignalClass::StorageElement } else { SignalClass::CombinationalNet };
            CandidateSignal::new(vec!["top".to_string(), format!("s{index}")], width, class, "top")
        },
    ));
    SignalFilter::new().max_width(None).apply(&registry).unwrap()
}

fn strategy_spec() -> impl Strategy<Value = StrategySpec> {
    prop_oneof![
        Just(StrategySpec::Random),
        Just(StrategySpec::Sequential),
        Just(StrategySpec::Poisson),
    ]
}

proptest! {
    /// One full sequential cycle visits every (signal, bit) pair exactly once.
    #[test]
    fn prop_sequential_cycle_covers_every_bit_once(signals in signals()) {
        let eligible = eligible(&signals);
        let goal = GoalState::new(eligible.len());
        let active = ActiveOverrides::new();
        let ctx =
            SelectionContext { eligible: &eligible, goal: &goal, active: &active, node_cap: None };
        let pairs: usize = signals.iter().map(|&(width, _)| width as usize).sum();

        let mut strategy = SequentialInjectionStrategy::new();
        strategy.prepare(&eligible).unwrap();
        let mut seen = HashSet::new();
        for _ in 0..pairs {
            match strategy.select(&ctx) {
                Selection::Target(target) => prop_assert!(seen.insert((target.signal, target.bit))),
                Selection::Busy => prop_assert!(false, "busy with nothing overridden"),
            }
        }
        prop_assert_eq!(seen.len(), pairs);
    }

    /// No strategy ever picks an overridden bit or a saturated signal, and
    /// Busy is only reported when nothing is available.
    #[test]
    fn prop_selection_respects_overrides_and_caps(
        signals in signals(),
        overridden in prop::collection::vec((0usize..6, 0u32..6), 0..20),
        counts in prop::collection::vec(0u64..4, 6),
        node_cap in prop::option::of(1u64..4),
        spec in strategy_spec(),
        seed in any::<u64>(),
    ) {
        let eligible = eligible(&signals);
        let mut active = ActiveOverrides::new();
        for &(signal, bit) in &overridden {
            if signal < signals.len() && bit < signals[signal].0 {
                active.insert(SignalId(signal), bit);
            }
        }
        let mut goal = GoalState::new(eligible.len());
        for (index, &count) in counts.iter().take(eligible.len()).enumerate() {
            for _ in 0..count {
                goal.record(SignalId(index));
            }
        }
        let ctx = SelectionContext { eligible: &eligible, goal: &goal, active: &active, node_cap };
        let any_available = eligible.iter().any(|(id, _)| ctx.is_available(id));

        let mut strategy = spec.build(seed);
        strategy.prepare(&eligible).unwrap();
        for _ in 0..10 {
            match strategy.select(&ctx) {
                Selection::Target(target) => {
                    prop_assert!(!active.contains(target.signal, target.bit));
                    prop_assert!(!ctx.is_saturated(target.signal));
                    prop_assert!(target.bit < eligible[target.signal].width());
                    let expected = match eligible[target.signal].class() {
                        SignalClass::StorageElement => FaultKind::Upset,
                        SignalClass::CombinationalNet => FaultKind::Transient,
                    };
                    prop_assert_eq!(target.kind, expected);
                },
                Selection::Busy => prop_assert!(!any_available),
            }
        }
    }
}
