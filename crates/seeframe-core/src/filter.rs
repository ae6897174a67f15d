//! Name-based filtering of the candidate registry.
//!
//! A candidate is eligible iff its full path contains at least one include
//! pattern (or there are none) AND contains no exclude pattern. Exclude always
//! wins. Scope, module and width rules narrow the set further.

use std::ops::Index;

use crate::{
    error::ConfigError,
    event::SignalId,
    netlist::{CandidateRegistry, CandidateSignal, SignalClass},
};

/// Signals wider than this are skipped unless configured otherwise.
pub const DEFAULT_MAX_SIGNAL_WIDTH: u32 = 128;

/// Include/exclude rules applied to a [`CandidateRegistry`].
#[derive(Debug, Clone)]
pub struct SignalFilter {
    include: Vec<String>,
    exclude: Vec<String>,
    exclude_modules: Vec<String>,
    root_scope: Option<String>,
    max_width: Option<u32>,
}

impl Default for SignalFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalFilter {
    /// Filter that accepts every signal up to [`DEFAULT_MAX_SIGNAL_WIDTH`].
    pub fn new() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            exclude_modules: Vec::new(),
            root_scope: None,
            max_width: Some(DEFAULT_MAX_SIGNAL_WIDTH),
        }
    }

    /// Path substrings of which at least one must match.
    #[must_use]
    pub fn include<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Path substrings of which none may match.
    #[must_use]
    pub fn exclude<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Module definitions whose signals are skipped.
    #[must_use]
    pub fn exclude_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_modules.extend(modules.into_iter().map(Into::into));
        self
    }

    /// Only keep signals at or below this dotted path.
    #[must_use]
    pub fn root_scope(mut self, scope: impl Into<String>) -> Self {
        self.root_scope = Some(scope.into());
        self
    }

    /// Width limit (`None` disables it).
    #[must_use]
    pub fn max_width(mut self, max_width: Option<u32>) -> Self {
        self.max_width = max_width;
        self
    }

    /// Check a single candidate against all rules.
    pub fn is_eligible(&self, signal: &CandidateSignal) -> bool {
        let path = signal.path();

        if self.exclude.iter().any(|p| path.contains(p.as_str())) {
            return false;
        }
        if !self.include.is_empty() && !self.include.iter().any(|p| path.contains(p.as_str())) {
            return false;
        }
        if self.exclude_modules.iter().any(|m| m == signal.module()) {
            return false;
        }
        if let Some(scope) = &self.root_scope {
            let below = path.strip_prefix(scope.as_str()).is_some_and(|rest| rest.starts_with('.'));
            if path != scope && !below {
                return false;
            }
        }
        self.max_width.is_none_or(|max| signal.width() <= max)
    }

    /// Build the eligible set. Fails if nothing survives.
    pub fn apply(&self, registry: &CandidateRegistry) -> Result<EligibleSet, ConfigError> {
        let signals: Vec<_> = registry.iter().filter(|s| self.is_eligible(s)).cloned().collect();

        if signals.is_empty() {
            tracing::error!(candidates = registry.len(), "no eligible signals after filtering");
            return Err(ConfigError::EmptyEligibleSet { candidates: registry.len() });
        }

        tracing::debug!(eligible = signals.len(), candidates = registry.len(), "signals filtered");
        Ok(EligibleSet { signals })
    }
}

/// Filter `registry` with plain include/exclude substring patterns.
pub fn filter(
    registry: &CandidateRegistry,
    include: &[&str],
    exclude: &[&str],
) -> Result<EligibleSet, ConfigError> {
    SignalFilter::new()
        .include(include.iter().copied())
        .exclude(exclude.iter().copied())
        .max_width(None)
        .apply(registry)
}

/// Candidates that survived filtering. Frozen for the run.
///
/// Order is the registry's path order and never changes, so
/// [`SignalId`]s are stable for the whole campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibleSet {
    signals: Vec<CandidateSignal>,
}

impl EligibleSet {
    /// Number of eligible signals.
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    /// Always false for a set produced by [`SignalFilter::apply`].
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Signal by id.
    pub fn get(&self, id: SignalId) -> Option<&CandidateSignal> {
        self.signals.get(id.0)
    }

    /// Signals with their ids, in stable order.
    pub fn iter(&self) -> impl Iterator<Item = (SignalId, &CandidateSignal)> {
        self.signals.iter().enumerate().map(|(i, s)| (SignalId(i), s))
    }

    /// Id of the signal at `path`.
    pub fn position(&self, path: &str) -> Option<SignalId> {
        self.signals.iter().position(|s| s.path() == path).map(SignalId)
    }

    /// Number of eligible signals of `class`.
    pub fn count(&self, class: SignalClass) -> usize {
        self.signals.iter().filter(|s| s.class() == class).count()
    }
}

impl Index<SignalId> for EligibleSet {
    type Output = CandidateSignal;

    fn index(&self, id: SignalId) -> &Self::Output {
        &self.signals[id.0]
    }
}
