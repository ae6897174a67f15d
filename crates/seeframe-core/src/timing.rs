//! Timing models: inter-event delays and transient durations.
//!
//! All timers count in whole simulator units, like a simulator `Timer(n,
//! units)`. The same shapes serve both as the MTTF timer (delay until the
//! next injection) and as the transient-duration timer; the injector holds
//! two independently configured instances.

use std::{fmt, str::FromStr, time::Duration};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::ConfigError;

/// Simulator time unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimUnit {
    /// Nanoseconds
    #[default]
    Ns,
    /// Microseconds
    Us,
    /// Milliseconds
    Ms,
    /// Seconds
    S,
}

impl SimUnit {
    /// `count` units as a [`Duration`].
    pub fn duration(self, count: u64) -> Duration {
        match self {
            Self::Ns => Duration::from_nanos(count),
            Self::Us => Duration::from_micros(count),
            Self::Ms => Duration::from_millis(count),
            Self::S => Duration::from_secs(count),
        }
    }
}

impl fmt::Display for SimUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self {
            Self::Ns => "ns",
            Self::Us => "us",
            Self::Ms => "ms",
            Self::S => "s",
        };
        f.write_str(unit)
    }
}

impl FromStr for SimUnit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ns" => Ok(Self::Ns),
            "us" => Ok(Self::Us),
            "ms" => Ok(Self::Ms),
            "s" => Ok(Self::S),
            other => Err(ConfigError::InvalidTimer(format!("unknown time unit '{other}'"))),
        }
    }
}

/// Source of event timing.
pub trait TimingModel: Send {
    /// Time until the next injection attempt.
    fn next_delay(&mut self, now: Duration) -> Duration;

    /// Length of a transient glitch.
    fn transient_duration(&mut self) -> Duration {
        self.next_delay(Duration::ZERO)
    }
}

/// Constant delay.
#[derive(Debug, Clone)]
pub struct FixedTimer {
    delay: Duration,
}

impl FixedTimer {
    /// Timer firing every `count` units.
    pub fn new(count: u64, unit: SimUnit) -> Result<Self, ConfigError> {
        if count == 0 {
            return Err(ConfigError::InvalidTimer("fixed delay must be positive".to_string()));
        }
        Ok(Self { delay: unit.duration(count) })
    }
}

impl TimingModel for FixedTimer {
    fn next_delay(&mut self, _now: Duration) -> Duration {
        self.delay
    }
}

/// Delay drawn uniformly from `[min, max]` units, both ends inclusive.
#[derive(Debug, Clone)]
pub struct BoundedRandomTimer {
    min: u64,
    max: u64,
    unit: SimUnit,
    rng: ChaCha8Rng,
}

impl BoundedRandomTimer {
    /// Uniform timer over `[min, max]` units.
    pub fn new(min: u64, max: u64, unit: SimUnit, seed: u64) -> Result<Self, ConfigError> {
        if min == 0 {
            let reason = "uniform lower bound must be positive".to_string();
            return Err(ConfigError::InvalidTimer(reason));
        }
        if max < min {
            return Err(ConfigError::InvalidTimer(format!(
                "uniform bounds inverted: min {min} > max {max}"
            )));
        }
        Ok(Self { min, max, unit, rng: ChaCha8Rng::seed_from_u64(seed) })
    }
}

impl TimingModel for BoundedRandomTimer {
    fn next_delay(&mut self, _now: Duration) -> Duration {
        self.unit.duration(self.rng.gen_range(self.min..=self.max))
    }
}

/// Exponentially distributed delay, approximating Poisson arrivals.
///
/// Draws are rounded to the nearest whole unit and never shorter than one.
#[derive(Debug, Clone)]
pub struct PoissonTimer {
    mean: f64,
    unit: SimUnit,
    rng: ChaCha8Rng,
}

impl PoissonTimer {
    /// Timer with `mean` units between events.
    pub fn with_mean(mean: f64, unit: SimUnit, seed: u64) -> Result<Self, ConfigError> {
        if !mean.is_finite() || mean <= 0.0 {
            let reason = format!("poisson mean must be positive, got {mean}");
            return Err(ConfigError::InvalidTimer(reason));
        }
        Ok(Self { mean, unit, rng: ChaCha8Rng::seed_from_u64(seed) })
    }

    /// Timer with `rate` events per unit.
    pub fn with_rate(rate: f64, unit: SimUnit, seed: u64) -> Result<Self, ConfigError> {
        if !rate.is_finite() || rate <= 0.0 {
            let reason = format!("poisson rate must be positive, got {rate}");
            return Err(ConfigError::InvalidTimer(reason));
        }
        Self::with_mean(1.0 / rate, unit, seed)
    }

    /// Configured mean, in units.
    pub fn mean(&self) -> f64 {
        self.mean
    }
}

impl TimingModel for PoissonTimer {
    fn next_delay(&mut self, _now: Duration) -> Duration {
        // Inverse CDF; 1 - u keeps ln() away from zero.
        let u: f64 = self.rng.r#gen();
        let sample = -self.mean * (1.0 - u).ln();
        let units = sample.round().max(1.0) as u64;
        self.unit.duration(units)
    }
}

/// Textual timer description, as accepted on the command line.
///
/// `fixed:N`, `uniform:MIN:MAX`, `poisson:MEAN`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimerSpec {
    /// [`FixedTimer`]
    Fixed(u64),
    /// [`BoundedRandomTimer`]
    Uniform {
        /// Lower bound, units
        min: u64,
        /// Upper bound, units
        max: u64,
    },
    /// [`PoissonTimer`]
    Poisson {
        /// Mean, units
        mean: f64,
    },
}

impl TimerSpec {
    /// Instantiate the described timer.
    pub fn build(self, unit: SimUnit, seed: u64) -> Result<Box<dyn TimingModel>, ConfigError> {
        Ok(match self {
            Self::Fixed(count) => Box::new(FixedTimer::new(count, unit)?),
            Self::Uniform { min, max } => Box::new(BoundedRandomTimer::new(min, max, unit, seed)?),
            Self::Poisson { mean } => Box::new(PoissonTimer::with_mean(mean, unit, seed)?),
        })
    }
}

impl FromStr for TimerSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidTimer(format!("cannot parse timer '{s}'"));
        let parts: Vec<&str> = s.split(':').collect();

        match parts.as_slice() {
            ["fixed", n] => Ok(Self::Fixed(n.parse().map_err(|_| invalid())?)),
            ["uniform", min, max] => Ok(Self::Uniform {
                min: min.parse().map_err(|_| invalid())?,
                max: max.parse().map_err(|_| invalid())?,
            }),
            ["poisson", mean] => Ok(Self::Poisson { mean: mean.parse().map_err(|_| invalid())? }),
            _ => Err(invalid()),
        }
    }
}
