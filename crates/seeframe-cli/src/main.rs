//! Seeframe command line tool.
//!
//! # Usage
//!
//! ```bash
//! # List the signals a campaign would target
//! seeframe design.json --exclude CLK --list
//!
//! # Rehearse 20 SEEs with a 10-50 us MTTF window
//! seeframe design.json --unit us --mttf uniform:10:50 --goal total:20 --seed 7
//!
//! # Disable injection through the environment
//! SEE=0 seeframe design.json
//! ```

mod campaign;

use std::path::PathBuf;

use clap::{ArgAction, Parser, builder::BoolishValueParser};
use seeframe_core::{
    DEFAULT_MAX_SIGNAL_WIDTH, GoalSpec, SimUnit, StrategySpec, TimerSpec, Verbosity,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::campaign::{CampaignConfig, CliError};

/// Seeframe SEE fault injection
#[derive(Parser, Debug)]
#[command(name = "seeframe")]
#[command(about = "Inspect netlists and rehearse single-event-effect injection campaigns")]
#[command(version)]
struct Args {
    /// Yosys JSON netlist (`write_json`)
    netlist: PathBuf,

    /// Top module (defaults to the one marked `top` in the netlist)
    #[arg(long)]
    top: Option<String>,

    /// Run name used in log lines
    #[arg(long, default_value = "seeframe")]
    name: String,

    /// Only inject into paths containing one of these substrings
    #[arg(short, long)]
    include: Vec<String>,

    /// Never inject into paths containing these substrings
    #[arg(short = 'x', long)]
    exclude: Vec<String>,

    /// Skip every signal of these module definitions
    #[arg(long = "exclude-module")]
    exclude_module: Vec<String>,

    /// Only inject at or below this dotted path
    #[arg(long)]
    scope: Option<String>,

    /// Skip signals wider than this (0 disables the limit)
    #[arg(long, default_value_t = DEFAULT_MAX_SIGNAL_WIDTH)]
    max_width: u32,

    /// Simulator time unit (ns, us, ms, s)
    #[arg(long, default_value = "ns")]
    unit: SimUnit,

    /// Delay between injections (fixed:N, uniform:MIN:MAX, poisson:MEAN)
    #[arg(long, default_value = "uniform:10:100")]
    mttf: TimerSpec,

    /// Transient glitch length (fixed:N, uniform:MIN:MAX, poisson:MEAN)
    #[arg(long, default_value = "uniform:1:10")]
    transient: TimerSpec,

    /// Target selection (random, sequential, poisson)
    #[arg(long, default_value = "random")]
    strategy: StrategySpec,

    /// Stopping criterion (total:N, per-node:K, infinite)
    #[arg(long, default_value = "total:10")]
    goal: GoalSpec,

    /// Seed for timers and strategies
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Stop the rehearsal after this many time units
    #[arg(long)]
    duration: Option<u64>,

    /// List eligible signals and exit
    #[arg(long)]
    list: bool,

    /// Enable injection (SEE=0 disables it)
    #[arg(
        long = "see",
        env = "SEE",
        default_value = "1",
        value_parser = BoolishValueParser::new(),
        action = ArgAction::Set
    )]
    enabled: bool,

    /// Also log releases, busy backoffs and the eligible set
    #[arg(long)]
    trace: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn campaign(&self) -> CampaignConfig {
        CampaignConfig {
            netlist: self.netlist.clone(),
            top: self.top.clone(),
            name: self.name.clone(),
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            exclude_modules: self.exclude_module.clone(),
            scope: self.scope.clone(),
            max_width: (self.max_width > 0).then_some(self.max_width),
            unit: self.unit,
            mttf: self.mttf,
            transient: self.transient,
            strategy: self.strategy,
            goal: self.goal,
            seed: self.seed,
            duration: self.duration,
            enabled: self.enabled,
            verbosity: if self.trace { Verbosity::Trace } else { Verbosity::Events },
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = args.campaign();

    if args.list {
        let count = campaign::list(&config, &mut std::io::stdout().lock())?;
        tracing::info!(eligible = count, "listed eligible signals");
        return Ok(());
    }

    // Rehearsals run in simulated time: the paused clock jumps straight to
    // the next timer instead of waiting for it.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()?;

    match runtime.block_on(campaign::rehearse(&config)) {
        Ok(report) => {
            tracing::info!(
                upsets = report.summary.upsets,
                transients = report.summary.transients,
                skipped_undefined = report.summary.skipped_undefined,
                "rehearsal complete"
            );
            Ok(())
        },
        Err(CliError::Run(failure)) => {
            tracing::error!(committed = failure.report.events.len(), "rehearsal aborted");
            Err(failure.into())
        },
        Err(err) => Err(err.into()),
    }
}
