//! Netlist listing and campaign rehearsal.
//!
//! A rehearsal runs the real injector against an in-memory copy of the
//! design on a paused clock: it validates a configuration and shows which
//! faults a campaign with that seed would inject, without a simulator.

use std::{io::Write, path::PathBuf};

use seeframe_core::{
    BuildError, CandidateRegistry, ConfigError, FaultInjector, GoalSpec, NetlistParser,
    ParseError, RunFailure, RunReport, SignalFilter, SimUnit, StrategySpec, TimerSpec, Verbosity,
};
use seeframe_harness::SimDesign;
use thiserror::Error;

/// Errors surfaced by the command line tool.
#[derive(Debug, Error)]
pub enum CliError {
    /// Netlist file could not be read or written
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Netlist is malformed
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Options make no sense together
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Injector could not be built
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Campaign aborted
    #[error(transparent)]
    Run(#[from] RunFailure),
}

/// Everything needed to rehearse one campaign.
#[derive(Debug, Clone)]
pub struct CampaignConfig {
    /// Yosys JSON netlist
    pub netlist: PathBuf,
    /// Top module, if not marked in the netlist
    pub top: Option<String>,
    /// Run name
    pub name: String,
    /// Include patterns
    pub include: Vec<String>,
    /// Exclude patterns
    pub exclude: Vec<String>,
    /// Excluded module definitions
    pub exclude_modules: Vec<String>,
    /// Root scope
    pub scope: Option<String>,
    /// Width limit, `None` for unlimited
    pub max_width: Option<u32>,
    /// Timer unit
    pub unit: SimUnit,
    /// Delay between injections
    pub mttf: TimerSpec,
    /// Glitch length
    pub transient: TimerSpec,
    /// Target selection
    pub strategy: StrategySpec,
    /// Stopping criterion
    pub goal: GoalSpec,
    /// RNG seed
    pub seed: u64,
    /// Stop after this many units
    pub duration: Option<u64>,
    /// Injection enabled
    pub enabled: bool,
    /// Injector log lines
    pub verbosity: Verbosity,
}

impl CampaignConfig {
    fn filter(&self) -> SignalFilter {
        let mut filter = SignalFilter::new()
            .include(self.include.iter().cloned())
            .exclude(self.exclude.iter().cloned())
            .exclude_modules(self.exclude_modules.iter().cloned())
            .max_width(self.max_width);
        if let Some(scope) = &self.scope {
            filter = filter.root_scope(scope.clone());
        }
        filter
    }

    /// Parse the configured netlist.
    pub fn load_registry(&self) -> Result<CandidateRegistry, CliError> {
        let json = std::fs::read(&self.netlist)?;
        let mut parser = NetlistParser::new();
        if let Some(top) = &self.top {
            parser = parser.with_top(top.clone());
        }
        Ok(parser.parse_slice(&json)?)
    }
}

/// Write every eligible candidate, one per line.
pub fn list(config: &CampaignConfig, out: &mut impl Write) -> Result<usize, CliError> {
    let registry = config.load_registry()?;
    let eligible = config.filter().apply(&registry)?;

    for (_, signal) in eligible.iter() {
        writeln!(out, "{}\t{}\t{:?}", signal.path(), signal.width(), signal.class())?;
    }
    Ok(eligible.len())
}

/// Run the campaign against an in-memory design on the current (paused)
/// runtime.
pub async fn rehearse(config: &CampaignConfig) -> Result<RunReport, CliError> {
    if matches!(config.goal, GoalSpec::Infinite) && config.duration.is_none() {
        return Err(ConfigError::InvalidGoal(
            "an infinite goal needs --duration to end the rehearsal".to_string(),
        )
        .into());
    }

    let registry = config.load_registry()?;
    let design = SimDesign::from_registry(&registry);

    let injector = FaultInjector::builder(design, &registry)
        .name(config.name.clone())
        .filter(config.filter())
        .mttf_timer(config.mttf.build(config.unit, config.seed)?)
        .transient_duration_timer(config.transient.build(config.unit, config.seed.wrapping_add(1))?)
        .strategy(config.strategy.build(config.seed))
        .goal(config.goal.build()?)
        .enabled(config.enabled)
        .verbosity(config.verbosity)
        .build()?;

    let mut handle = injector.start();
    if let Some(units) = config.duration {
        let limit = config.unit.duration(units);
        tokio::select! {
            () = tokio::time::sleep(limit) => {
                tracing::info!(?limit, "rehearsal duration reached");
                handle.stop();
            }
            () = handle.stopped() => {}
        }
    }
    Ok(handle.join().await?)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    const NETLIST: &str = r#"{
        "modules": {
            "top": {
                "attributes": { "top": 1 },
                "ports": { "clk": { "direction": "input", "bits": [2] } },
                "cells": {
                    "$procdff$1": {
                        "type": "$dff",
                        "connections": { "CLK": [2], "D": [4], "Q": [3] }
                    },
                    "$not$2": { "type": "$not", "connections": { "A": [3], "Y": [4] } }
                },
                "netnames": {
                    "clk": { "bits": [2] },
                    "q": { "bits": [3] },
                    "d": { "bits": [4] }
                }
            }
        }
    }"#;

    fn config(netlist: PathBuf) -> CampaignConfig {
        CampaignConfig {
            netlist,
            top: None,
            name: "test".to_string(),
            include: Vec::new(),
            exclude: Vec::new(),
            exclude_modules: Vec::new(),
            scope: None,
            max_width: Some(128),
            unit: SimUnit::Ms,
            mttf: TimerSpec::Fixed(5),
            transient: TimerSpec::Fixed(2),
            strategy: StrategySpec::Sequential,
            goal: GoalSpec::Total(4),
            seed: 0,
            duration: None,
            enabled: true,
            verbosity: Verbosity::Summary,
        }
    }

    fn netlist_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(NETLIST.as_bytes()).unwrap();
        file
    }

    #[test]
    fn list_prints_eligible_candidates() {
        let file = netlist_file();
        let mut out = Vec::new();

        let count = list(&config(file.path().to_path_buf()), &mut out).unwrap();

        assert_eq!(count, 2);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("top.q\t1\tStorageElement"));
        assert!(text.contains("top.d\t1\tCombinationalNet"));
    }

    #[tokio::test(start_paused = true)]
    async fn rehearsal_reaches_the_goal() {
        let file = netlist_file();

        let report = rehearse(&config(file.path().to_path_buf())).await.unwrap();

        assert_eq!(report.summary.total_injected, 4);
        assert_eq!(report.summary.eligible_candidates, 2);
        assert_eq!(report.releases.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn duration_stops_an_infinite_rehearsal() {
        let file = netlist_file();
        let mut cfg = config(file.path().to_path_buf());
        cfg.goal = GoalSpec::Infinite;
        cfg.duration = Some(52);

        let report = rehearse(&cfg).await.unwrap();

        assert_eq!(report.summary.total_injected, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn infinite_without_duration_is_rejected() {
        let file = netlist_file();
        let mut cfg = config(file.path().to_path_buf());
        cfg.goal = GoalSpec::Infinite;

        assert!(matches!(rehearse(&cfg).await, Err(CliError::Config(ConfigError::InvalidGoal(_)))));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_netlist_is_an_io_error() {
        let cfg = config(PathBuf::from("/nonexistent/netlist.json"));
        assert!(matches!(rehearse(&cfg).await, Err(CliError::Io(_))));
    }
}
