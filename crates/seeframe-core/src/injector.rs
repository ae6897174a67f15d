//! The fault injection orchestrator.
//!
//! A [`FaultInjector`] owns everything a campaign needs: the frozen eligible
//! set with its resolved handles, both timers, the strategy and the goal. Its
//! main loop waits for the MTTF delay, asks the strategy for a target, flips
//! the target bit and commits an [`InjectionEvent`].
//!
//! Transient faults spawn a restoration task on a [`JoinSet`]. Each task
//! sleeps for the glitch duration, releases the bit and removes its entry
//! from the [`OverrideTable`]. Restorations are never aborted: stopping only
//! prevents new iterations, and every run drains its restorations before it
//! reports.
//!
//! ```text
//! Idle --start()--> Running --stop()/goal--> Stopping --drained--> Stopped
//!                      \______________ fatal error ______________/
//! ```

use std::time::Duration;

use tokio::{
    sync::watch,
    task::{JoinError, JoinHandle, JoinSet},
};
use tracing::Instrument;

use crate::{
    env::SimAdapter,
    error::{AdapterError, BuildError, ConfigError, RunError, RunFailure},
    event::{
        FaultKind, FaultTarget, GoalState, InjectionEvent, OverrideRelease, RunReport, RunSummary,
        SignalId,
    },
    filter::{EligibleSet, SignalFilter},
    goal::InjectionGoal,
    netlist::{CandidateRegistry, SignalClass},
    overrides::OverrideTable,
    strategy::{InjectionStrategy, Selection, SelectionContext},
    timing::TimingModel,
};

/// Backoff between selection attempts while every candidate is busy.
pub const DEFAULT_BUSY_BACKOFF: Duration = Duration::from_millis(1);

/// Busy answers tolerated before a run is declared stuck.
pub const DEFAULT_MAX_BUSY_RETRIES: u32 = 1000;

/// Width assumed for the SEE counter signal.
const SEE_COUNTER_WIDTH: u32 = 32;

/// Lifecycle of an injector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectorState {
    /// Built, not started
    Idle,
    /// Main loop active
    Running,
    /// No new events; waiting for in-flight transients
    Stopping,
    /// Done; every override released
    Stopped,
}

/// Which injector lines are emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Final summary line only
    Summary,
    /// Summary plus one line per event
    #[default]
    Events,
    /// Also releases, busy backoffs and the eligible set
    Trace,
}

/// Configures and validates a [`FaultInjector`].
pub struct FaultInjectorBuilder<'r, A: SimAdapter> {
    adapter: A,
    registry: &'r CandidateRegistry,
    name: String,
    filter: SignalFilter,
    mttf_timer: Option<Box<dyn TimingModel>>,
    transient_timer: Option<Box<dyn TimingModel>>,
    strategy: Option<Box<dyn InjectionStrategy>>,
    goal: Option<Box<dyn InjectionGoal>>,
    busy_backoff: Duration,
    max_busy_retries: u32,
    see_counter: Option<String>,
    see_names: Option<String>,
    enabled: bool,
    verbosity: Verbosity,
}

impl<'r, A: SimAdapter> FaultInjectorBuilder<'r, A> {
    /// Name of the run, carried by every log line of the injector span.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace the whole signal filter.
    #[must_use]
    pub fn filter(mut self, filter: SignalFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Path substrings of which at least one must match.
    #[must_use]
    pub fn include_names<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter = self.filter.include(patterns);
        self
    }

    /// Path substrings of which none may match.
    #[must_use]
    pub fn exclude_names<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter = self.filter.exclude(patterns);
        self
    }

    /// Only inject at or below this dotted path.
    #[must_use]
    pub fn root_scope(mut self, scope: impl Into<String>) -> Self {
        self.filter = self.filter.root_scope(scope);
        self
    }

    /// Delay between injections.
    #[must_use]
    pub fn mttf_timer(mut self, timer: Box<dyn TimingModel>) -> Self {
        self.mttf_timer = Some(timer);
        self
    }

    /// Glitch length for transients. Required when nets are eligible.
    #[must_use]
    pub fn transient_duration_timer(mut self, timer: Box<dyn TimingModel>) -> Self {
        self.transient_timer = Some(timer);
        self
    }

    /// Target selection.
    #[must_use]
    pub fn strategy(mut self, strategy: Box<dyn InjectionStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Stopping criterion.
    #[must_use]
    pub fn goal(mut self, goal: Box<dyn InjectionGoal>) -> Self {
        self.goal = Some(goal);
        self
    }

    /// Wait between selection attempts while everything is busy.
    #[must_use]
    pub fn busy_backoff(mut self, backoff: Duration) -> Self {
        self.busy_backoff = backoff;
        self
    }

    /// Busy answers tolerated before [`RunError::SelectionStuck`].
    #[must_use]
    pub fn max_busy_retries(mut self, retries: u32) -> Self {
        self.max_busy_retries = retries;
        self
    }

    /// Testbench signal receiving the id of every committed event.
    #[must_use]
    pub fn see_counter(mut self, path: impl Into<String>) -> Self {
        self.see_counter = Some(path.into());
        self
    }

    /// Testbench string signal receiving the label of every committed event.
    #[must_use]
    pub fn see_names(mut self, path: impl Into<String>) -> Self {
        self.see_names = Some(path.into());
        self
    }

    /// A disabled injector completes immediately without touching the design.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Log verbosity.
    #[must_use]
    pub fn verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Validate the configuration and resolve every eligible signal.
    ///
    /// # Errors
    ///
    /// - `BuildError::Config` if filtering leaves nothing, a mandatory part
    ///   is missing, or nets are eligible without a transient timer
    /// - `BuildError::Adapter` if the simulator cannot resolve a signal
    pub fn build(self) -> Result<FaultInjector<A>, BuildError> {
        let name = self.name.clone();
        self.try_build().inspect_err(|err| {
            tracing::error!(run = %name, error = %err, "fault injector rejected");
        })
    }

    fn try_build(self) -> Result<FaultInjector<A>, BuildError> {
        let eligible = self.filter.apply(self.registry)?;
        let mttf_timer = self.mttf_timer.ok_or(ConfigError::Missing("mttf_timer"))?;
        let mut strategy = self.strategy.ok_or(ConfigError::Missing("injection_strategy"))?;
        let goal = self.goal.ok_or(ConfigError::Missing("injection_goal"))?;

        let nets = eligible.count(SignalClass::CombinationalNet);
        if nets > 0 && self.transient_timer.is_none() {
            return Err(ConfigError::TransientTimerRequired { nets }.into());
        }

        strategy.prepare(&eligible)?;

        let handles = eligible
            .iter()
            .map(|(_, signal)| self.adapter.resolve(signal.path(), signal.width()))
            .collect::<Result<Vec<_>, AdapterError>>()?;
        let see_counter = self
            .see_counter
            .map(|path| self.adapter.resolve(&path, SEE_COUNTER_WIDTH))
            .transpose()?;
        let see_names =
            self.see_names.map(|path| self.adapter.resolve_text(&path)).transpose()?;

        if self.verbosity >= Verbosity::Trace {
            for (id, signal) in eligible.iter() {
                tracing::debug!(
                    run = %self.name,
                    id = id.0,
                    path = signal.path(),
                    width = signal.width(),
                    class = ?signal.class(),
                    "eligible"
                );
            }
        }
        tracing::info!(
            run = %self.name,
            eligible = eligible.len(),
            storage = eligible.count(SignalClass::StorageElement),
            nets,
            "fault injector ready"
        );

        let (state, _) = watch::channel(InjectorState::Idle);
        Ok(FaultInjector {
            adapter: self.adapter,
            name: self.name,
            eligible,
            handles,
            mttf_timer,
            transient_timer: self.transient_timer,
            strategy,
            goal,
            busy_backoff: self.busy_backoff,
            max_busy_retries: self.max_busy_retries,
            see_counter,
            see_names,
            enabled: self.enabled,
            verbosity: self.verbosity,
            overrides: OverrideTable::new(),
            state,
        })
    }
}

/// Drives SEU/SET injection against a simulation.
pub struct FaultInjector<A: SimAdapter> {
    adapter: A,
    name: String,
    eligible: EligibleSet,
    handles: Vec<A::Handle>,
    mttf_timer: Box<dyn TimingModel>,
    transient_timer: Option<Box<dyn TimingModel>>,
    strategy: Box<dyn InjectionStrategy>,
    goal: Box<dyn InjectionGoal>,
    busy_backoff: Duration,
    max_busy_retries: u32,
    see_counter: Option<A::Handle>,
    see_names: Option<A::Handle>,
    enabled: bool,
    verbosity: Verbosity,
    overrides: OverrideTable,
    state: watch::Sender<InjectorState>,
}

/// Why a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Elapsed,
    Stopped,
}

type Restoration = Result<OverrideRelease, RunError>;

/// Mutable state of one run.
struct Campaign {
    events: Vec<InjectionEvent>,
    releases: Vec<OverrideRelease>,
    goal_state: GoalState,
    restorations: JoinSet<Restoration>,
}

impl Campaign {
    fn new(signals: usize) -> Self {
        Self {
            events: Vec::new(),
            releases: Vec::new(),
            goal_state: GoalState::new(signals),
            restorations: JoinSet::new(),
        }
    }

    fn collect(&mut self, joined: Result<Restoration, JoinError>) -> Result<(), RunError> {
        match joined {
            Ok(Ok(release)) => {
                self.releases.push(release);
                Ok(())
            },
            Ok(Err(err)) => Err(err),
            Err(err) => {
                tracing::error!(error = %err, "restoration task did not complete");
                Err(RunError::TaskFailed(err.to_string()))
            },
        }
    }

    /// Await every outstanding restoration. Keeps the first failure.
    async fn drain(&mut self) -> Result<(), RunError> {
        let mut outcome = Ok(());
        while let Some(joined) = self.restorations.join_next().await {
            if let Err(err) = self.collect(joined) {
                if outcome.is_ok() {
                    outcome = Err(err);
                }
            }
        }
        outcome
    }

    fn report(self, eligible: usize) -> RunReport {
        RunReport {
            summary: RunSummary::from_events(&self.events, eligible),
            events: self.events,
            releases: self.releases,
        }
    }
}

/// Resolves once stop is requested. Never resolves if the sender is gone.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let closed = stop.wait_for(|&requested| requested).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

impl<A: SimAdapter> FaultInjector<A> {
    /// Start configuring an injector over `registry`.
    pub fn builder(adapter: A, registry: &CandidateRegistry) -> FaultInjectorBuilder<'_, A> {
        FaultInjectorBuilder {
            adapter,
            registry,
            name: "seeframe".to_string(),
            filter: SignalFilter::new(),
            mttf_timer: None,
            transient_timer: None,
            strategy: None,
            goal: None,
            busy_backoff: DEFAULT_BUSY_BACKOFF,
            max_busy_retries: DEFAULT_MAX_BUSY_RETRIES,
            see_counter: None,
            see_names: None,
            enabled: true,
            verbosity: Verbosity::default(),
        }
    }

    /// Frozen eligible set.
    pub fn eligible(&self) -> &EligibleSet {
        &self.eligible
    }

    /// Run name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Watch lifecycle transitions.
    pub fn state(&self) -> watch::Receiver<InjectorState> {
        self.state.subscribe()
    }

    /// Spawn the run as a background task on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(self) -> InjectorHandle {
        let (stop, stop_rx) = watch::channel(false);
        let state = self.state();
        self.state.send_replace(InjectorState::Running);
        let task = tokio::spawn(self.run(stop_rx));
        InjectorHandle { stop, state, task }
    }

    /// Run to completion on the current task.
    ///
    /// Sending `true` on the stop channel ends the run gracefully.
    ///
    /// # Errors
    ///
    /// `RunFailure` carrying the fatal [`RunError`] and the partial report.
    pub async fn run(self, stop: watch::Receiver<bool>) -> Result<RunReport, RunFailure> {
        let span = tracing::info_span!("injector", run = %self.name);
        self.run_inner(stop).instrument(span).await
    }

    async fn run_inner(mut self, mut stop: watch::Receiver<bool>) -> Result<RunReport, RunFailure> {
        let mut campaign = Campaign::new(self.eligible.len());

        if !self.enabled {
            tracing::info!("SEE injection disabled");
            self.state.send_replace(InjectorState::Stopped);
            return Ok(campaign.report(self.eligible.len()));
        }

        self.state.send_replace(InjectorState::Running);
        let outcome = self.main_loop(&mut campaign, &mut stop).await;

        if outcome.is_ok() {
            self.state.send_replace(InjectorState::Stopping);
        }
        let in_flight = campaign.restorations.len();
        if in_flight > 0 {
            tracing::debug!(in_flight, "waiting for transients to release");
        }
        let drained = campaign.drain().await;
        self.state.send_replace(InjectorState::Stopped);

        let report = campaign.report(self.eligible.len());
        tracing::info!("{}", report.summary);

        match outcome.and(drained) {
            Ok(()) => Ok(report),
            Err(error) => {
                tracing::error!(%error, "campaign aborted");
                Err(RunFailure { error, report })
            },
        }
    }

    async fn main_loop(
        &mut self,
        campaign: &mut Campaign,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<(), RunError> {
        loop {
            let requested = *stop.borrow();
            if requested {
                tracing::info!("stop requested");
                return Ok(());
            }
            if !self.goal.should_continue(&campaign.goal_state) {
                tracing::debug!(total = campaign.goal_state.total(), "injection goal reached");
                return Ok(());
            }

            let delay = self.mttf_timer.next_delay(self.adapter.now());
            if self.wait(campaign, stop, delay).await? == Wake::Stopped {
                tracing::info!("stop requested");
                return Ok(());
            }

            let Some(target) = self.acquire_target(campaign, stop).await? else {
                tracing::info!("stop requested");
                return Ok(());
            };
            self.fire(campaign, target)?;
        }
    }

    /// Sleep `duration` of simulated time while collecting finished
    /// restorations and watching for stop.
    async fn wait(
        &mut self,
        campaign: &mut Campaign,
        stop: &mut watch::Receiver<bool>,
        duration: Duration,
    ) -> Result<Wake, RunError> {
        let adapter = self.adapter.clone();
        let sleep = adapter.sleep(duration);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep => return Ok(Wake::Elapsed),
                () = stop_requested(stop) => return Ok(Wake::Stopped),
                Some(joined) = campaign.restorations.join_next() => campaign.collect(joined)?,
            }
        }
    }

    /// Ask the strategy for a target, backing off while everything is busy.
    /// Returns `None` if stop was requested during a backoff.
    async fn acquire_target(
        &mut self,
        campaign: &mut Campaign,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<Option<FaultTarget>, RunError> {
        let mut retries = 0u32;
        loop {
            match self.select(campaign) {
                Selection::Target(target) => return Ok(Some(target)),
                Selection::Busy if retries >= self.max_busy_retries => {
                    let err = RunError::SelectionStuck { retries, at: self.adapter.now() };
                    let active = self.overrides.len();
                    tracing::error!(error = %err, active, "no free candidate");
                    return Err(err);
                },
                Selection::Busy => {
                    retries += 1;
                    if self.verbosity >= Verbosity::Trace {
                        tracing::debug!(retries, "all candidates busy, backing off");
                    }
                    if self.wait(campaign, stop, self.busy_backoff).await? == Wake::Stopped {
                        return Ok(None);
                    }
                },
            }
        }
    }

    fn select(&mut self, campaign: &Campaign) -> Selection {
        let active = self.overrides.lock();
        let ctx = SelectionContext {
            eligible: &self.eligible,
            goal: &campaign.goal_state,
            active: &active,
            node_cap: self.goal.node_cap(),
        };
        self.strategy.select(&ctx)
    }

    /// Apply `target` through the adapter, then commit the event.
    fn fire(&mut self, campaign: &mut Campaign, target: FaultTarget) -> Result<(), RunError> {
        let FaultTarget { signal, bit, kind } = target;
        let selected = (self.eligible.get(signal), self.handles.get(signal.0));
        let (Some(candidate), Some(handle)) = selected else {
            let err = RunError::Internal(format!("strategy selected unknown signal {}", signal.0));
            tracing::error!(error = %err, eligible = self.eligible.len(), "invalid selection");
            return Err(err);
        };
        let path = candidate.path().to_string();

        if bit >= candidate.width() || candidate.is_constant_bit(bit) {
            let err =
                RunError::Internal(format!("strategy selected uninjectable bit {path}[{bit}]"));
            tracing::error!(error = %err, width = candidate.width(), "invalid selection");
            return Err(err);
        }
        if kind != candidate.class().fault_kind() {
            let err = RunError::Internal(format!("strategy selected {kind} for {path}"));
            tracing::error!(error = %err, class = ?candidate.class(), "invalid selection");
            return Err(err);
        }
        if self.overrides.lock().contains(signal, bit) {
            let err = RunError::Internal(format!("strategy selected overridden bit {path}[{bit}]"));
            tracing::error!(error = %err, "selection violated override exclusivity");
            return Err(err);
        }

        let at = self.adapter.now();
        let id = campaign.events.len() as u64 + 1;
        let sampled = self.adapter.read_bit(handle, bit).inspect_err(log_adapter_error)?;

        let (applied, duration) = match (sampled.to_bool(), kind) {
            (None, _) => {
                tracing::warn!(id, path = %path, bit, "target bit is undefined, fault not applied");
                (false, None)
            },
            (Some(value), FaultKind::Upset) => {
                self.adapter.force_bit(handle, bit, !value).inspect_err(log_adapter_error)?;
                self.adapter.release_bit(handle, bit).inspect_err(log_adapter_error)?;
                (true, None)
            },
            (Some(value), FaultKind::Transient) => {
                let Some(timer) = self.transient_timer.as_mut() else {
                    let err = RunError::Internal(format!("no transient duration timer for {path}"));
                    tracing::error!(error = %err, "transient selected without a duration timer");
                    return Err(err);
                };
                let duration = timer.transient_duration();

                self.adapter.force_bit(handle, bit, !value).inspect_err(log_adapter_error)?;
                self.overrides.insert(signal, bit);
                self.spawn_restoration(campaign, id, signal, bit, duration);
                (true, Some(duration))
            },
        };

        let event = InjectionEvent { id, at, signal, path, bit, kind, duration, applied };
        if self.verbosity >= Verbosity::Events {
            tracing::info!(target: "seeframe::see", "{event}");
        }
        let label = self.see_names.as_ref().map(|_| event.label());
        campaign.events.push(event);
        campaign.goal_state.record(signal);

        if let Some(counter) = &self.see_counter {
            self.adapter.deposit(counter, id).inspect_err(log_adapter_error)?;
        }
        if let (Some(names), Some(label)) = (&self.see_names, label) {
            self.adapter.deposit_text(names, &label).inspect_err(log_adapter_error)?;
        }
        Ok(())
    }

    fn spawn_restoration(
        &self,
        campaign: &mut Campaign,
        event_id: u64,
        signal: SignalId,
        bit: u32,
        duration: Duration,
    ) {
        let adapter = self.adapter.clone();
        let handle = self.handles[signal.0].clone();
        let overrides = self.overrides.clone();
        let trace = self.verbosity >= Verbosity::Trace;

        let task = async move {
            adapter.sleep(duration).await;

            let released = adapter.release_bit(&handle, bit);
            // The entry goes even on failure; the run aborts anyway.
            overrides.remove(signal, bit);
            if let Err(err) = released {
                log_adapter_error(&err);
                return Err(RunError::from(err));
            }

            let at = adapter.now();
            if trace {
                tracing::debug!(event_id, bit, at = ?at, "transient released");
            }
            Ok(OverrideRelease { event_id, signal, bit, at })
        };
        campaign.restorations.spawn(task.in_current_span());
    }
}

fn log_adapter_error(err: &AdapterError) {
    tracing::error!(
        op = %err.op,
        path = %err.path,
        reason = %err.reason,
        "simulation adapter failed"
    );
}

/// Control surface of a started injector.
#[derive(Debug)]
pub struct InjectorHandle {
    stop: watch::Sender<bool>,
    state: watch::Receiver<InjectorState>,
    task: JoinHandle<Result<RunReport, RunFailure>>,
}

impl InjectorHandle {
    /// Request graceful termination. In-flight transients still release.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> InjectorState {
        *self.state.borrow()
    }

    /// Wait until the run reaches [`InjectorState::Stopped`].
    pub async fn stopped(&mut self) {
        let _ = self.state.wait_for(|state| *state == InjectorState::Stopped).await;
    }

    /// Wait for the run to finish.
    ///
    /// # Errors
    ///
    /// `RunFailure` if the run aborted or its task panicked.
    pub async fn join(self) -> Result<RunReport, RunFailure> {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = %err, "injector task failed");
                Err(RunFailure {
                    error: RunError::TaskFailed(err.to_string()),
                    report: RunReport::default(),
                })
            },
        }
    }
}
