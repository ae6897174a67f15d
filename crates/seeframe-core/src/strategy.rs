//! Target selection strategies.
//!
//! A strategy picks the (signal, bit) receiving the next fault. It must never
//! return a pair under an active override, nor a signal that already reached
//! the goal's per-node cap. When nothing is free it answers
//! [`Selection::Busy`] and the injector backs off and retries.

use std::{collections::HashMap, fmt, str::FromStr};

use rand::{
    Rng, SeedableRng,
    distributions::{Distribution, WeightedIndex},
    seq::SliceRandom,
};
use rand_chacha::ChaCha8Rng;

use crate::{
    error::ConfigError,
    event::{FaultTarget, GoalState, SignalId},
    filter::EligibleSet,
    overrides::ActiveOverrides,
};

/// Outcome of a selection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Fault this target next
    Target(FaultTarget),
    /// Every candidate bit is overridden or saturated right now
    Busy,
}

/// Read-only view handed to strategies.
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    /// Frozen eligible set
    pub eligible: &'a EligibleSet,
    /// Committed event counters
    pub goal: &'a GoalState,
    /// In-flight transient overrides
    pub active: &'a ActiveOverrides,
    /// Per-signal event cap from the goal
    pub node_cap: Option<u64>,
}

impl SelectionContext<'_> {
    /// Check if `signal` reached the per-node cap.
    pub fn is_saturated(&self, signal: SignalId) -> bool {
        self.node_cap.is_some_and(|cap| self.goal.count(signal) >= cap)
    }

    /// Check if `bit` of `signal` exists, is not tied to a constant and is
    /// not overridden.
    pub fn is_free(&self, signal: SignalId, bit: u32) -> bool {
        self.eligible.get(signal).is_some_and(|s| bit < s.width() && !s.is_constant_bit(bit))
            && !self.active.contains(signal, bit)
    }

    /// Free bits of `signal`, ascending.
    pub fn free_bits(&self, signal: SignalId) -> impl Iterator<Item = u32> + '_ {
        let width = self.eligible.get(signal).map_or(0, |s| s.width());
        (0..width).filter(move |&bit| self.is_free(signal, bit))
    }

    /// Check if `signal` can take a fault now.
    pub fn is_available(&self, signal: SignalId) -> bool {
        !self.is_saturated(signal) && self.free_bits(signal).next().is_some()
    }

    fn target(&self, signal: SignalId, bit: u32) -> Selection {
        let kind = self.eligible[signal].class().fault_kind();
        Selection::Target(FaultTarget { signal, bit, kind })
    }
}

/// Picks the next fault target.
pub trait InjectionStrategy: Send {
    /// Called once with the frozen eligible set before the run starts.
    fn prepare(&mut self, _eligible: &EligibleSet) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Select the next target, or report that nothing is free.
    fn select(&mut self, ctx: &SelectionContext<'_>) -> Selection;
}

/// Uniform signal, then uniform free bit.
#[derive(Debug, Clone)]
pub struct RandomInjectionStrategy {
    rng: ChaCha8Rng,
}

impl RandomInjectionStrategy {
    /// Seeded random strategy.
    pub fn new(seed: u64) -> Self {
        Self { rng: ChaCha8Rng::seed_from_u64(seed) }
    }
}

impl InjectionStrategy for RandomInjectionStrategy {
    fn select(&mut self, ctx: &SelectionContext<'_>) -> Selection {
        let available: Vec<SignalId> =
            ctx.eligible.iter().map(|(id, _)| id).filter(|&id| ctx.is_available(id)).collect();

        let Some(&signal) = available.choose(&mut self.rng) else {
            return Selection::Busy;
        };
        let free: Vec<u32> = ctx.free_bits(signal).collect();
        match free.choose(&mut self.rng) {
            Some(&bit) => ctx.target(signal, bit),
            None => Selection::Busy,
        }
    }
}

/// Walks every (signal, bit) pair in eligible-set order, wrapping around.
#[derive(Debug, Clone, Default)]
pub struct SequentialInjectionStrategy {
    signal: usize,
    bit: u32,
}

impl SequentialInjectionStrategy {
    /// Strategy starting at the first bit of the first signal.
    pub fn new() -> Self {
        Self::default()
    }

    fn advance(&mut self, eligible: &EligibleSet) {
        self.bit += 1;
        if self.bit >= eligible.get(SignalId(self.signal)).map_or(0, |s| s.width()) {
            self.bit = 0;
            self.signal = (self.signal + 1) % eligible.len().max(1);
        }
    }
}

impl InjectionStrategy for SequentialInjectionStrategy {
    fn select(&mut self, ctx: &SelectionContext<'_>) -> Selection {
        if self.signal >= ctx.eligible.len() {
            self.signal = 0;
            self.bit = 0;
        }

        let pairs: usize = ctx.eligible.iter().map(|(_, s)| s.width() as usize).sum();
        for _ in 0..pairs {
            let (signal, bit) = (SignalId(self.signal), self.bit);
            self.advance(ctx.eligible);

            if !ctx.is_saturated(signal) && ctx.is_free(signal, bit) {
                return ctx.target(signal, bit);
            }
        }
        Selection::Busy
    }
}

/// Random selection weighted by a per-signal rate (default 1.0).
#[derive(Debug, Clone)]
pub struct PoissonInjectionStrategy {
    rates: HashMap<String, f64>,
    weights: Vec<f64>,
    rng: ChaCha8Rng,
}

impl PoissonInjectionStrategy {
    /// Seeded weighted strategy, uniform until rates are added.
    pub fn new(seed: u64) -> Self {
        Self { rates: HashMap::new(), weights: Vec::new(), rng: ChaCha8Rng::seed_from_u64(seed) }
    }

    /// Relative upset rate of the signal at `path`.
    #[must_use]
    pub fn with_rate(mut self, path: impl Into<String>, rate: f64) -> Self {
        self.rates.insert(path.into(), rate);
        self
    }
}

impl InjectionStrategy for PoissonInjectionStrategy {
    fn prepare(&mut self, eligible: &EligibleSet) -> Result<(), ConfigError> {
        for (path, &rate) in &self.rates {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(ConfigError::InvalidRate { path: path.clone(), rate });
            }
            if eligible.position(path).is_none() {
                tracing::warn!(path = %path, "rate configured for a signal that is not eligible");
            }
        }

        self.weights = eligible
            .iter()
            .map(|(_, s)| self.rates.get(s.path()).copied().unwrap_or(1.0))
            .collect();
        Ok(())
    }

    fn select(&mut self, ctx: &SelectionContext<'_>) -> Selection {
        let weights = ctx.eligible.iter().map(|(id, _)| {
            if ctx.is_available(id) { self.weights.get(id.0).copied().unwrap_or(1.0) } else { 0.0 }
        });

        // Fails only when every weight is zero, i.e. nothing is available.
        let Ok(index) = WeightedIndex::new(weights) else {
            return Selection::Busy;
        };
        let signal = SignalId(index.sample(&mut self.rng));

        let free: Vec<u32> = ctx.free_bits(signal).collect();
        if free.is_empty() {
            return Selection::Busy;
        }
        let bit = free[self.rng.gen_range(0..free.len())];
        ctx.target(signal, bit)
    }
}

/// Textual strategy name: `random`, `sequential`, `poisson`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategySpec {
    /// [`RandomInjectionStrategy`]
    #[default]
    Random,
    /// [`SequentialInjectionStrategy`]
    Sequential,
    /// [`PoissonInjectionStrategy`] with uniform rates
    Poisson,
}

impl StrategySpec {
    /// Instantiate the named strategy.
    pub fn build(self, seed: u64) -> Box<dyn InjectionStrategy> {
        match self {
            Self::Random => Box::new(RandomInjectionStrategy::new(seed)),
            Self::Sequential => Box::new(SequentialInjectionStrategy::new()),
            Self::Poisson => Box::new(PoissonInjectionStrategy::new(seed)),
        }
    }
}

impl fmt::Display for StrategySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Random => "random",
            Self::Sequential => "sequential",
            Self::Poisson => "poisson",
        };
        f.write_str(name)
    }
}

impl FromStr for StrategySpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(Self::Random),
            "sequential" => Ok(Self::Sequential),
            "poisson" => Ok(Self::Poisson),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::FaultKind,
        filter::filter,
        netlist::{CandidateRegistry, CandidateSignal, SignalClass},
    };

    fn eligible(widths: &[(u32, SignalClass)]) -> EligibleSet {
        let registry = CandidateRegistry::from_signals(widths.iter().enumerate().map(
            |(i, &(width, class))| {
                CandidateSignal::new(vec!["top".into(), format!("s{i}")], width, class, "top")
            },
        ));
        filter(&registry, &[], &[]).unwrap()
    }

    fn ctx<'a>(
        eligible: &'a EligibleSet,
        goal: &'a GoalState,
        active: &'a ActiveOverrides,
        node_cap: Option<u64>,
    ) -> SelectionContext<'a> {
        SelectionContext { eligible, goal, active, node_cap }
    }

    fn target(selection: Selection) -> FaultTarget {
        match selection {
            Selection::Target(t) => t,
            Selection::Busy => panic!("expected a target"),
        }
    }

    #[test]
    fn random_selection_is_uniform_over_signals() {
        let set = eligible(&[(1, SignalClass::CombinationalNet); 8]);
        let goal = GoalState::new(set.len());
        let active = ActiveOverrides::new();
        let mut strategy = RandomInjectionStrategy::new(11);

        let mut hits = [0u32; 8];
        for _ in 0..8000 {
            let t = target(strategy.select(&ctx(&set, &goal, &active, None)));
            hits[t.signal.0] += 1;
        }

        for (i, &h) in hits.iter().enumerate() {
            assert!((850..=1150).contains(&h), "signal {i} hit {h} times");
        }
    }

    #[test]
    fn fault_kind_follows_signal_class() {
        let set = eligible(&[(4, SignalClass::StorageElement), (4, SignalClass::CombinationalNet)]);
        let goal = GoalState::new(set.len());
        let active = ActiveOverrides::new();
        let mut strategy = RandomInjectionStrategy::new(0);

        for _ in 0..100 {
            let t = target(strategy.select(&ctx(&set, &goal, &active, None)));
            let expected =
                if t.signal.0 == 0 { FaultKind::Upset } else { FaultKind::Transient };
            assert_eq!(t.kind, expected);
            assert!(t.bit < 4);
        }
    }

    #[test]
    fn random_never_picks_active_bits() {
        let set =
            eligible(&[(2, SignalClass::CombinationalNet), (1, SignalClass::CombinationalNet)]);
        let goal = GoalState::new(set.len());
        let mut active = ActiveOverrides::new();
        active.insert(SignalId(0), 0);
        active.insert(SignalId(1), 0);
        let mut strategy = RandomInjectionStrategy::new(5);

        for _ in 0..100 {
            let t = target(strategy.select(&ctx(&set, &goal, &active, None)));
            assert_eq!((t.signal, t.bit), (SignalId(0), 1));
        }

        active.insert(SignalId(0), 1);
        assert_eq!(strategy.select(&ctx(&set, &goal, &active, None)), Selection::Busy);
    }

    #[test]
    fn sequential_walks_bits_in_order_and_wraps() {
        let set = eligible(&[(2, SignalClass::StorageElement), (1, SignalClass::StorageElement)]);
        let goal = GoalState::new(set.len());
        let active = ActiveOverrides::new();
        let mut strategy = SequentialInjectionStrategy::new();

        let picks: Vec<_> = (0..4)
            .map(|_| {
                let t = target(strategy.select(&ctx(&set, &goal, &active, None)));
                (t.signal.0, t.bit)
            })
            .collect();

        assert_eq!(picks, vec![(0, 0), (0, 1), (1, 0), (0, 0)]);
    }

    #[test]
    fn sequential_skips_busy_pairs() {
        let set = eligible(&[(2, SignalClass::CombinationalNet)]);
        let goal = GoalState::new(set.len());
        let mut active = ActiveOverrides::new();
        active.insert(SignalId(0), 0);
        let mut strategy = SequentialInjectionStrategy::new();

        let t = target(strategy.select(&ctx(&set, &goal, &active, None)));
        assert_eq!(t.bit, 1);

        active.insert(SignalId(0), 1);
        assert_eq!(strategy.select(&ctx(&set, &goal, &active, None)), Selection::Busy);
    }

    #[test]
    fn constant_bits_are_never_selected() {
        let registry = CandidateRegistry::from_signals([CandidateSignal::new(
            vec!["top".into(), "bus".into()],
            4,
            SignalClass::CombinationalNet,
            "top",
        )
        .with_constant_bits([0, 2])]);
        let set = filter(&registry, &[], &[]).unwrap();
        let goal = GoalState::new(set.len());
        let mut active = ActiveOverrides::new();

        let mut random = RandomInjectionStrategy::new(3);
        for _ in 0..100 {
            let bit = target(random.select(&ctx(&set, &goal, &active, None))).bit;
            assert!(bit == 1 || bit == 3, "picked tied bit {bit}");
        }

        let mut sequential = SequentialInjectionStrategy::new();
        let picks: Vec<_> = (0..3)
            .map(|_| target(sequential.select(&ctx(&set, &goal, &active, None))).bit)
            .collect();
        assert_eq!(picks, vec![1, 3, 1]);

        active.insert(SignalId(0), 1);
        active.insert(SignalId(0), 3);
        assert_eq!(random.select(&ctx(&set, &goal, &active, None)), Selection::Busy);
        assert_eq!(sequential.select(&ctx(&set, &goal, &active, None)), Selection::Busy);
    }

    #[test]
    fn saturated_signals_are_excluded() {
        let set = eligible(&[(1, SignalClass::StorageElement), (1, SignalClass::StorageElement)]);
        let mut goal = GoalState::new(set.len());
        goal.record(SignalId(0));
        let active = ActiveOverrides::new();

        let mut random = RandomInjectionStrategy::new(1);
        let mut sequential = SequentialInjectionStrategy::new();
        let mut poisson = PoissonInjectionStrategy::new(1);
        poisson.prepare(&set).unwrap();

        for _ in 0..50 {
            let c = ctx(&set, &goal, &active, Some(1));
            assert_eq!(target(random.select(&c)).signal, SignalId(1));
            assert_eq!(target(sequential.select(&c)).signal, SignalId(1));
            assert_eq!(target(poisson.select(&c)).signal, SignalId(1));
        }

        goal.record(SignalId(1));
        assert_eq!(random.select(&ctx(&set, &goal, &active, Some(1))), Selection::Busy);
    }

    #[test]
    fn poisson_weights_follow_rates() {
        let set = eligible(&[(1, SignalClass::StorageElement), (1, SignalClass::StorageElement)]);
        let goal = GoalState::new(set.len());
        let active = ActiveOverrides::new();
        let mut strategy = PoissonInjectionStrategy::new(9).with_rate("top.s0", 3.0);
        strategy.prepare(&set).unwrap();

        let hits = (0..8000)
            .filter(|_| target(strategy.select(&ctx(&set, &goal, &active, None))).signal.0 == 0)
            .count();

        assert!((5700..=6300).contains(&hits), "signal 0 hit {hits} times");
    }

    #[test]
    fn poisson_rejects_non_positive_rates() {
        let set = eligible(&[(1, SignalClass::StorageElement)]);
        let mut strategy = PoissonInjectionStrategy::new(0).with_rate("top.s0", 0.0);
        assert!(matches!(strategy.prepare(&set), Err(ConfigError::InvalidRate { .. })));
    }

    #[test]
    fn strategy_names_parse() {
        assert_eq!("sequential".parse::<StrategySpec>().unwrap(), StrategySpec::Sequential);
        assert_eq!(StrategySpec::Poisson.to_string(), "poisson");
        assert!("greedy".parse::<StrategySpec>().is_err());
    }
}
