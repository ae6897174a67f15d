//! In-memory design driven by tokio's virtual clock.
//!
//! [`SimDesign`] implements [`SimAdapter`] for deterministic tests. Signals
//! are either registers or wires:
//!
//! - A register keeps whatever was last written. Releasing a forced bit keeps
//!   the forced value until the testbench drives the register again, which is
//!   exactly how an SEU persists until overwritten.
//! - A wire always shows its driven value unless forced. Releasing a forced
//!   bit makes the glitch disappear.
//! - A text signal holds a string written by the testbench or injector. It
//!   has no bits.
//!
//! Every force, release and deposit is recorded with its simulated time so
//! invariant checks can replay what the engine did to the design. Failures
//! can be injected per (operation, path) or at random with a seeded rate.

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use seeframe_core::{
    AdapterError, AdapterOp, CandidateRegistry, Logic, SignalClass, SimAdapter,
};
use tokio::time::Instant;

/// How a signal behaves once a force is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Holds the last written value
    Register,
    /// Follows its driver
    Wire,
    /// String-valued, not bit-addressable
    Text,
}

/// One recorded write to the design.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// A bit was forced
    Force {
        /// Simulated time
        at: Duration,
        /// Signal path
        path: String,
        /// Forced bit
        bit: u32,
        /// Forced value
        value: bool,
    },
    /// A forced bit was released
    Release {
        /// Simulated time
        at: Duration,
        /// Signal path
        path: String,
        /// Released bit
        bit: u32,
    },
    /// A value was deposited
    Deposit {
        /// Simulated time
        at: Duration,
        /// Signal path
        path: String,
        /// Deposited value
        value: u64,
    },
    /// A string was written to a text signal
    DepositText {
        /// Simulated time
        at: Duration,
        /// Signal path
        path: String,
        /// Written text
        text: String,
    },
}

/// Handle returned by [`SimDesign::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesignHandle(usize);

#[derive(Debug, Clone)]
struct Signal {
    path: String,
    kind: SignalKind,
    width: u32,
    /// Register contents or wire driver
    value: u64,
    forced_mask: u64,
    forced_value: u64,
    unknown_mask: u64,
    text: String,
}

impl Signal {
    fn observed(&self) -> u64 {
        (self.value & !self.forced_mask) | (self.forced_value & self.forced_mask)
    }
}

#[derive(Debug)]
struct DesignState {
    signals: Vec<Signal>,
    index: HashMap<String, usize>,
    accesses: Vec<Access>,
    failures: Vec<(AdapterOp, String)>,
    chaos: Option<(f64, ChaCha8Rng)>,
}

impl DesignState {
    fn check_failure(&mut self, op: AdapterOp, path: &str) -> Result<(), AdapterError> {
        let scripted = self
            .failures
            .iter()
            .any(|(fail_op, pattern)| *fail_op == op && path.contains(pattern.as_str()));
        if scripted {
            tracing::debug!(%op, path, "scripted adapter failure");
            return Err(AdapterError::new(op, path, "injected failure"));
        }
        if let Some((rate, rng)) = &mut self.chaos {
            if matches!(op, AdapterOp::Force | AdapterOp::Release) && rng.r#gen::<f64>() < *rate {
                tracing::debug!(%op, path, "chaotic adapter failure");
                return Err(AdapterError::new(op, path, "chaotic failure"));
            }
        }
        Ok(())
    }

    fn signal(&self, handle: DesignHandle) -> &Signal {
        &self.signals[handle.0]
    }

    fn signal_mut(&mut self, handle: DesignHandle) -> &mut Signal {
        &mut self.signals[handle.0]
    }
}

/// Simulated design implementing [`SimAdapter`].
///
/// Cheap to clone; clones share the same design. Create it inside the tokio
/// runtime (or turmoil host) whose clock it should follow.
#[derive(Debug, Clone)]
pub struct SimDesign {
    state: Arc<Mutex<DesignState>>,
    origin: Instant,
}

impl Default for SimDesign {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDesign {
    /// Empty design. Time zero is now.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DesignState {
                signals: Vec::new(),
                index: HashMap::new(),
                accesses: Vec::new(),
                failures: Vec::new(),
                chaos: None,
            })),
            origin: Instant::now(),
        }
    }

    /// Design holding every candidate: storage elements as registers, nets
    /// as wires, all zero.
    pub fn from_registry(registry: &CandidateRegistry) -> Self {
        let design = Self::new();
        for signal in registry.iter() {
            let kind = match signal.class() {
                SignalClass::StorageElement => SignalKind::Register,
                SignalClass::CombinationalNet => SignalKind::Wire,
            };
            design.declare(signal.path(), signal.width(), kind);
        }
        design
    }

    fn lock(&self) -> MutexGuard<'_, DesignState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a signal. Redeclaring a path replaces it.
    pub fn declare(&self, path: &str, width: u32, kind: SignalKind) {
        let mut state = self.lock();
        let signal = Signal {
            path: path.to_string(),
            kind,
            width,
            value: 0,
            forced_mask: 0,
            forced_value: 0,
            unknown_mask: 0,
            text: String::new(),
        };
        match state.index.get(path).copied() {
            Some(i) => state.signals[i] = signal,
            None => {
                let i = state.signals.len();
                state.signals.push(signal);
                state.index.insert(path.to_string(), i);
            },
        }
    }

    /// Drive a signal from the testbench: new register contents or new wire
    /// driver value. Clears unknown bits.
    pub fn drive(&self, path: &str, value: u64) {
        let mut state = self.lock();
        if let Some(&i) = state.index.get(path) {
            let signal = &mut state.signals[i];
            signal.value = value & mask(signal.width);
            signal.unknown_mask = 0;
        }
    }

    /// Add an empty text signal, e.g. a testbench label.
    pub fn declare_text(&self, path: &str) {
        self.declare(path, 0, SignalKind::Text);
    }

    /// Current contents of a text signal.
    pub fn text(&self, path: &str) -> Option<String> {
        let state = self.lock();
        state.index.get(path).map(|&i| state.signals[i].text.clone())
    }

    /// Mark a bit as X until the next drive.
    pub fn set_unknown(&self, path: &str, bit: u32) {
        let mut state = self.lock();
        if let Some(&i) = state.index.get(path) {
            state.signals[i].unknown_mask |= 1 << bit;
        }
    }

    /// Value currently seen by the design, forces included.
    pub fn value(&self, path: &str) -> Option<u64> {
        let state = self.lock();
        state.index.get(path).map(|&i| state.signals[i].observed())
    }

    /// Check if a bit is currently forced.
    pub fn is_forced(&self, path: &str, bit: u32) -> bool {
        let state = self.lock();
        state.index.get(path).is_some_and(|&i| state.signals[i].forced_mask & (1 << bit) != 0)
    }

    /// Number of bits forced across the design.
    pub fn forced_bits(&self) -> u32 {
        self.lock().signals.iter().map(|s| s.forced_mask.count_ones()).sum()
    }

    /// Fail every `op` on paths containing `pattern`.
    pub fn fail_on(&self, op: AdapterOp, pattern: impl Into<String>) {
        self.lock().failures.push((op, pattern.into()));
    }

    /// Fail forces and releases at random with probability `rate`.
    ///
    /// # Panics
    ///
    /// Panics if `rate` is not in `[0.0, 1.0]`
    pub fn with_chaos(self, rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&rate),
            "failure rate must be between 0.0 and 1.0, got {rate}"
        );
        self.lock().chaos = Some((rate, ChaCha8Rng::seed_from_u64(seed)));
        self
    }

    /// Every recorded write, in order.
    pub fn accesses(&self) -> Vec<Access> {
        self.lock().accesses.clone()
    }

    fn elapsed(&self) -> Duration {
        Instant::now().saturating_duration_since(self.origin)
    }
}

fn mask(width: u32) -> u64 {
    if width >= 64 { u64::MAX } else { (1u64 << width) - 1 }
}

fn out_of_range(op: AdapterOp, signal: &Signal, bit: u32) -> Result<(), AdapterError> {
    if bit >= signal.width || bit >= 64 {
        return Err(AdapterError::new(
            op,
            &signal.path,
            format!("bit {bit} out of range for width {}", signal.width),
        ));
    }
    Ok(())
}

impl SimAdapter for SimDesign {
    type Handle = DesignHandle;

    fn resolve(&self, path: &str, width: u32) -> Result<Self::Handle, AdapterError> {
        let state = self.lock();
        let Some(&i) = state.index.get(path) else {
            return Err(AdapterError::new(AdapterOp::Resolve, path, "no such signal"));
        };
        let signal = &state.signals[i];
        if signal.kind == SignalKind::Text {
            return Err(AdapterError::new(AdapterOp::Resolve, path, "text signal has no bits"));
        }
        if signal.width != width {
            return Err(AdapterError::new(
                AdapterOp::Resolve,
                path,
                format!("width mismatch: design has {}, expected {width}", signal.width),
            ));
        }
        Ok(DesignHandle(i))
    }

    fn resolve_text(&self, path: &str) -> Result<Self::Handle, AdapterError> {
        let state = self.lock();
        match state.index.get(path) {
            Some(&i) if state.signals[i].kind == SignalKind::Text => Ok(DesignHandle(i)),
            Some(_) => Err(AdapterError::new(AdapterOp::Resolve, path, "not a text signal")),
            None => Err(AdapterError::new(AdapterOp::Resolve, path, "no such signal")),
        }
    }

    fn now(&self) -> Duration {
        self.elapsed()
    }

    fn read_bit(&self, handle: &Self::Handle, bit: u32) -> Result<Logic, AdapterError> {
        let mut state = self.lock();
        let path = state.signal(*handle).path.clone();
        state.check_failure(AdapterOp::Read, &path)?;

        let signal = state.signal(*handle);
        out_of_range(AdapterOp::Read, signal, bit)?;
        let forced = signal.forced_mask & (1 << bit) != 0;
        if !forced && signal.unknown_mask & (1 << bit) != 0 {
            return Ok(Logic::Unknown);
        }
        Ok(Logic::from(signal.observed() & (1 << bit) != 0))
    }

    fn force_bit(&self, handle: &Self::Handle, bit: u32, value: bool) -> Result<(), AdapterError> {
        let at = self.elapsed();
        let mut state = self.lock();
        let path = state.signal(*handle).path.clone();
        state.check_failure(AdapterOp::Force, &path)?;
        out_of_range(AdapterOp::Force, state.signal(*handle), bit)?;

        let signal = state.signal_mut(*handle);
        signal.forced_mask |= 1 << bit;
        if value {
            signal.forced_value |= 1 << bit;
        } else {
            signal.forced_value &= !(1 << bit);
        }

        state.accesses.push(Access::Force { at, path, bit, value });
        Ok(())
    }

    fn release_bit(&self, handle: &Self::Handle, bit: u32) -> Result<(), AdapterError> {
        let at = self.elapsed();
        let mut state = self.lock();
        let path = state.signal(*handle).path.clone();
        state.check_failure(AdapterOp::Release, &path)?;
        out_of_range(AdapterOp::Release, state.signal(*handle), bit)?;

        let signal = state.signal_mut(*handle);
        if signal.kind == SignalKind::Register {
            // Register keeps the forced value until driven again.
            let kept = signal.forced_value & (1 << bit);
            signal.value = (signal.value & !(1 << bit)) | kept;
            signal.unknown_mask &= !(1 << bit);
        }
        signal.forced_mask &= !(1 << bit);

        state.accesses.push(Access::Release { at, path, bit });
        Ok(())
    }

    fn deposit(&self, handle: &Self::Handle, value: u64) -> Result<(), AdapterError> {
        let at = self.elapsed();
        let mut state = self.lock();
        let path = state.signal(*handle).path.clone();
        state.check_failure(AdapterOp::Deposit, &path)?;

        let signal = state.signal_mut(*handle);
        signal.value = value & mask(signal.width);
        signal.unknown_mask = 0;

        state.accesses.push(Access::Deposit { at, path, value });
        Ok(())
    }

    fn deposit_text(&self, handle: &Self::Handle, text: &str) -> Result<(), AdapterError> {
        let at = self.elapsed();
        let mut state = self.lock();
        let path = state.signal(*handle).path.clone();
        state.check_failure(AdapterOp::Deposit, &path)?;

        let signal = state.signal_mut(*handle);
        if signal.kind != SignalKind::Text {
            return Err(AdapterError::new(AdapterOp::Deposit, &path, "not a text signal"));
        }
        signal.text = text.to_string();

        state.accesses.push(Access::DepositText { at, path, text: text.to_string() });
        Ok(())
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn register_keeps_released_value() {
        let design = SimDesign::new();
        design.declare("top.q", 4, SignalKind::Register);
        let q = design.resolve("top.q", 4).unwrap();

        design.force_bit(&q, 2, true).unwrap();
        design.release_bit(&q, 2).unwrap();
        assert_eq!(design.value("top.q"), Some(0b0100));

        design.drive("top.q", 0);
        assert_eq!(design.value("top.q"), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn wire_reverts_to_driver() {
        let design = SimDesign::new();
        design.declare("top.w", 1, SignalKind::Wire);
        design.drive("top.w", 1);
        let w = design.resolve("top.w", 1).unwrap();

        design.force_bit(&w, 0, false).unwrap();
        assert_eq!(design.read_bit(&w, 0).unwrap(), Logic::Zero);
        design.release_bit(&w, 0).unwrap();
        assert_eq!(design.read_bit(&w, 0).unwrap(), Logic::One);
    }

    #[tokio::test(start_paused = true)]
    async fn clock_follows_tokio_time() {
        let design = SimDesign::new();
        design.sleep(Duration::from_millis(42)).await;
        assert_eq!(design.now(), Duration::from_millis(42));
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_checks_path_and_width() {
        let design = SimDesign::new();
        design.declare("top.q", 4, SignalKind::Register);

        assert_eq!(design.resolve("top.nope", 1).unwrap_err().op, AdapterOp::Resolve);
        assert!(design.resolve("top.q", 3).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn injected_failures_fire_per_op() {
        let design = SimDesign::new();
        design.declare("top.q", 1, SignalKind::Register);
        design.fail_on(AdapterOp::Release, "q");
        let q = design.resolve("top.q", 1).unwrap();

        assert!(design.force_bit(&q, 0, true).is_ok());
        assert_eq!(design.release_bit(&q, 0).unwrap_err().op, AdapterOp::Release);
        assert_eq!(design.accesses().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn chaos_fails_forces_and_releases_at_its_rate() {
        let always = SimDesign::new().with_chaos(1.0, 7);
        always.declare("top.w", 1, SignalKind::Wire);
        let w = always.resolve("top.w", 1).unwrap();
        assert_eq!(always.force_bit(&w, 0, true).unwrap_err().reason, "chaotic failure");
        assert!(always.read_bit(&w, 0).is_ok());
        assert!(always.accesses().is_empty());

        let never = SimDesign::new().with_chaos(0.0, 7);
        never.declare("top.w", 1, SignalKind::Wire);
        let w = never.resolve("top.w", 1).unwrap();
        for _ in 0..100 {
            never.force_bit(&w, 0, true).unwrap();
            never.release_bit(&w, 0).unwrap();
        }
        assert_eq!(never.accesses().len(), 200);
    }

    #[tokio::test(start_paused = true)]
    async fn text_signals_hold_strings_only() {
        let design = SimDesign::new();
        design.declare_text("tb.see_name");
        design.declare("top.q", 1, SignalKind::Register);

        let name = design.resolve_text("tb.see_name").unwrap();
        design.deposit_text(&name, "SEU_top.q[0]").unwrap();
        assert_eq!(design.text("tb.see_name").as_deref(), Some("SEU_top.q[0]"));

        assert!(design.resolve("tb.see_name", 0).is_err());
        assert!(design.resolve_text("top.q").is_err());
        let q = design.resolve("top.q", 1).unwrap();
        assert!(design.deposit_text(&q, "nope").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_bits_read_as_unknown_until_driven() {
        let design = SimDesign::new();
        design.declare("top.q", 2, SignalKind::Register);
        design.set_unknown("top.q", 1);
        let q = design.resolve("top.q", 2).unwrap();

        assert_eq!(design.read_bit(&q, 1).unwrap(), Logic::Unknown);
        assert_eq!(design.read_bit(&q, 0).unwrap(), Logic::Zero);
        design.drive("top.q", 0b10);
        assert_eq!(design.read_bit(&q, 1).unwrap(), Logic::One);
    }
}
