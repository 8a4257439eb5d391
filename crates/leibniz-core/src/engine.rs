//! The calculation engine: command handling and the periodic step.
//!
//! [`CalculationEngine`] is the single owner of the in-memory
//! [`CalculationSnapshot`] and the pi/4 accumulator. Commands and the
//! periodic step are critical sections on one [`tokio::sync::Mutex`], and
//! every state change is written through to the [`SnapshotStore`] before
//! the lock is released.
//!
//! # State machine
//!
//! | Command | From `stopped` | From `running` | From `paused` |
//! |---------|----------------|----------------|---------------|
//! | `start` | fresh run, one immediate step, arm | re-assert `running` | resume, one immediate step, arm |
//! | `pause` | status `paused` | disarm, `paused` | no-op |
//! | `stop`  | no-op | disarm, `stopped` | disarm, `stopped` |
//! | `reset` | defaults | disarm, defaults | disarm, defaults |
//!
//! # Timer
//!
//! The periodic step is a spawned task. Each armed task is tagged with a
//! generation number and re-checks it under the lock before stepping, so
//! once a command disarms the timer no stale step can run. The task holds
//! only a [`Weak`] reference and ends when the engine is dropped.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::series::{leibniz_term, partial_sum_from_pi_text, render_pi, SeriesError};
use crate::snapshot::{CalculationSnapshot, CalculationStatus, Command};
use crate::store::SnapshotStore;

/// Shortest accepted step interval.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// The periodic step task currently armed.
#[derive(Debug)]
struct ArmedTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Mutable engine state guarded by the engine lock.
#[derive(Debug)]
struct EngineState {
    snapshot: CalculationSnapshot,
    /// Running value of pi/4.
    partial_sum: f64,
    timer: Option<ArmedTimer>,
    next_generation: u64,
}

impl EngineState {
    fn from_snapshot(snapshot: CalculationSnapshot) -> Self {
        let partial_sum = partial_sum_from_pi_text(&snapshot.pi_text);
        Self {
            snapshot,
            partial_sum,
            timer: None,
            next_generation: 0,
        }
    }

    const fn is_armed(&self) -> bool {
        self.timer.is_some()
    }

    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.timer
            .as_ref()
            .is_some_and(|t| t.generation == generation)
    }

    /// Fold the next Leibniz term into the accumulator.
    ///
    /// On error nothing is modified.
    fn advance(&mut self) -> Result<(), SeriesError> {
        let k = self.snapshot.iteration;
        let term = leibniz_term(k)?;
        let next_iteration = k
            .checked_add(1)
            .ok_or(SeriesError::IndexOverflow { index: k })?;

        let partial_sum = self.partial_sum + term;
        let pi = partial_sum * 4.0;
        if !pi.is_finite() {
            return Err(SeriesError::NonFinite { index: k });
        }

        self.partial_sum = partial_sum;
        self.snapshot.iteration = next_iteration;
        self.snapshot.pi_text = render_pi(pi);
        Ok(())
    }

    fn clear(&mut self) {
        self.snapshot = CalculationSnapshot::default();
        self.partial_sum = 0.0;
    }
}

/// State shared between the engine handle and its timer task.
struct Shared {
    state: Mutex<EngineState>,
    store: Arc<dyn SnapshotStore>,
    interval: Duration,
}

impl Shared {
    /// Write the snapshot through. Failures are logged, never propagated.
    fn persist(&self, state: &EngineState) {
        if let Err(e) = self.store.save(&state.snapshot) {
            warn!(
                error = %e,
                status = %state.snapshot.status,
                iteration = state.snapshot.iteration,
                "failed to persist snapshot, in-memory state remains authoritative"
            );
        }
    }

    /// Run one advancement step and persist the result.
    ///
    /// A failed step disarms the timer, moves to `paused`, and persists
    /// that instead. Returns whether the step succeeded.
    fn step(&self, state: &mut EngineState) -> bool {
        match state.advance() {
            Ok(()) => {
                debug!(
                    iteration = state.snapshot.iteration,
                    pi = %state.snapshot.pi_text,
                    "series advanced"
                );
                self.persist(state);
                true
            }
            Err(e) => {
                error!(
                    error = %e,
                    iteration = state.snapshot.iteration,
                    "advancement step failed, pausing calculation"
                );
                state.disarm();
                state.snapshot.status = CalculationStatus::Paused;
                self.persist(state);
                false
            }
        }
    }

    /// Arm the periodic step unless one is already armed.
    fn arm(this: &Arc<Self>, state: &mut EngineState) {
        if state.is_armed() {
            return;
        }
        let Some(first_tick) = Instant::now().checked_add(this.interval) else {
            warn!(interval_ms = this.interval.as_millis(), "interval too large to schedule");
            return;
        };
        let generation = state.next_generation;
        state.next_generation = generation.wrapping_add(1);

        let handle = tokio::spawn(run_timer(
            Arc::downgrade(this),
            generation,
            first_tick,
            this.interval,
        ));
        state.timer = Some(ArmedTimer { generation, handle });
        debug!(generation, interval_ms = this.interval.as_millis(), "step timer armed");
    }
}

/// Body of the periodic step task.
///
/// Ticks are scheduled from `first_tick`, fixed when the timer was armed,
/// not from when the task first runs.
async fn run_timer(shared: Weak<Shared>, generation: u64, first_tick: Instant, period: Duration) {
    let mut ticker = tokio::time::interval_at(first_tick, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(shared) = shared.upgrade() else {
            return;
        };
        let mut state = shared.state.lock().await;
        if !state.is_current(generation) {
            return;
        }
        if !shared.step(&mut state) {
            return;
        }
    }
}

/// Owner of the calculation state and its periodic advancement.
///
/// Construct with [`CalculationEngine::new`] inside a Tokio runtime. The
/// engine is typically wrapped in an [`Arc`] and shared with the HTTP
/// layer.
pub struct CalculationEngine {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for CalculationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalculationEngine")
            .field("interval", &self.shared.interval)
            .finish_non_exhaustive()
    }
}

impl CalculationEngine {
    /// Load the persisted snapshot and auto-resume a `running` record.
    ///
    /// Auto-resume continues from the persisted iteration; the first step
    /// happens one `interval` later. An interval below [`MIN_INTERVAL`] is
    /// raised to it.
    pub async fn new(store: Arc<dyn SnapshotStore>, interval: Duration) -> Self {
        let snapshot = store.load();
        let resume = snapshot.status == CalculationStatus::Running;
        info!(
            status = %snapshot.status,
            iteration = snapshot.iteration,
            pi = %snapshot.pi_text,
            "calculation snapshot loaded"
        );

        let engine = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState::from_snapshot(snapshot)),
                store,
                interval: interval.max(MIN_INTERVAL),
            }),
        };

        if resume {
            let mut state = engine.shared.state.lock().await;
            Shared::arm(&engine.shared, &mut state);
            info!(iteration = state.snapshot.iteration, "resuming interrupted calculation");
        }

        engine
    }

    /// The configured step interval.
    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    /// Start a fresh run from `stopped`, or resume from `paused`.
    ///
    /// Performs one step immediately and arms the timer. On an already
    /// running engine this only re-asserts the status.
    pub async fn start(&self) -> CalculationSnapshot {
        let mut state = self.shared.state.lock().await;

        if state.is_armed() {
            state.snapshot.status = CalculationStatus::Running;
            self.shared.persist(&state);
            return state.snapshot.clone();
        }

        let from = state.snapshot.status;
        if from == CalculationStatus::Stopped {
            state.clear();
        }
        state.snapshot.status = CalculationStatus::Running;
        self.shared.persist(&state);

        if self.shared.step(&mut state) {
            Shared::arm(&self.shared, &mut state);
        }

        info!(
            from = %from,
            status = %state.snapshot.status,
            iteration = state.snapshot.iteration,
            "start command applied"
        );
        state.snapshot.clone()
    }

    /// Halt the periodic step, keeping progress resumable.
    pub async fn pause(&self) -> CalculationSnapshot {
        let mut state = self.shared.state.lock().await;
        state.disarm();
        state.snapshot.status = CalculationStatus::Paused;
        self.shared.persist(&state);
        info!(iteration = state.snapshot.iteration, "pause command applied");
        state.snapshot.clone()
    }

    /// Halt the periodic step; pi text and iteration are kept.
    pub async fn stop(&self) -> CalculationSnapshot {
        let mut state = self.shared.state.lock().await;
        state.disarm();
        state.snapshot.status = CalculationStatus::Stopped;
        self.shared.persist(&state);
        info!(iteration = state.snapshot.iteration, "stop command applied");
        state.snapshot.clone()
    }

    /// Halt the periodic step and return to the default snapshot.
    pub async fn reset(&self) -> CalculationSnapshot {
        let mut state = self.shared.state.lock().await;
        state.disarm();
        state.clear();
        self.shared.persist(&state);
        info!("reset command applied");
        state.snapshot.clone()
    }

    /// Apply `command` and return the resulting snapshot.
    pub async fn execute(&self, command: Command) -> CalculationSnapshot {
        match command {
            Command::Start => self.start().await,
            Command::Pause => self.pause().await,
            Command::Stop => self.stop().await,
            Command::Reset => self.reset().await,
        }
    }

    /// The current in-memory snapshot. Never touches the store.
    pub async fn status(&self) -> CalculationSnapshot {
        self.shared.state.lock().await.snapshot.clone()
    }

    /// Whether the periodic step is currently armed.
    pub async fn is_armed(&self) -> bool {
        self.shared.state.lock().await.is_armed()
    }

    /// Disarm the timer for process exit.
    ///
    /// The status is neither changed nor persisted, so a `running` record
    /// resumes on the next start-up.
    pub async fn shutdown(&self) {
        let mut state = self.shared.state.lock().await;
        state.disarm();
        info!(
            status = %state.snapshot.status,
            iteration = state.snapshot.iteration,
            "calculation engine shut down"
        );
    }
}

impl Drop for CalculationEngine {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.state.try_lock() {
            state.disarm();
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::float_cmp,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;
    use crate::store::MemorySnapshotStore;

    const INTERVAL: Duration = Duration::from_millis(100);

    fn snapshot(status: CalculationStatus, iteration: u64, pi_text: &str) -> CalculationSnapshot {
        CalculationSnapshot {
            pi_text: pi_text.to_owned(),
            status,
            iteration,
        }
    }

    async fn engine_with(
        initial: Option<CalculationSnapshot>,
    ) -> (CalculationEngine, Arc<MemorySnapshotStore>) {
        let store = Arc::new(initial.map_or_else(
            MemorySnapshotStore::new,
            MemorySnapshotStore::with_snapshot,
        ));
        let engine = CalculationEngine::new(Arc::clone(&store) as Arc<dyn SnapshotStore>, INTERVAL)
            .await;
        (engine, store)
    }

    /// Sleep until `n` timer ticks have passed since `armed_at`.
    async fn past_ticks(armed_at: Instant, n: u32) {
        tokio::time::sleep_until(armed_at + INTERVAL * n + INTERVAL / 2).await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_from_stopped_takes_immediate_step() {
        let (engine, store) = engine_with(None).await;

        let after = engine.start().await;
        assert_eq!(after, snapshot(CalculationStatus::Running, 1, "4.0"));
        // One write for the status change, one for the step.
        assert_eq!(store.writes(), 2);
        assert_eq!(store.record().unwrap(), after);
        assert!(engine.is_armed().await);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_advances_one_term_per_interval() {
        let t0 = Instant::now();
        let (engine, store) = engine_with(None).await;
        engine.start().await;

        past_ticks(t0, 1).await;
        assert_eq!(engine.status().await.iteration, 2);

        past_ticks(t0, 3).await;
        let status = engine.status().await;
        assert_eq!(status.iteration, 4);
        assert_eq!(store.record().unwrap(), status);

        let expected = (1.0 - 1.0 / 3.0 + 1.0 / 5.0 - 1.0 / 7.0) * 4.0;
        let parsed: f64 = status.pi_text.parse().unwrap();
        assert!((parsed - expected).abs() < 1e-12);
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_is_one_interval_after_arming() {
        let t0 = Instant::now();
        let (engine, _store) = engine_with(None).await;
        engine.start().await;

        // The timer task has not run yet when the clock moves on.
        tokio::time::advance(INTERVAL / 2).await;
        tokio::time::sleep_until(t0 + INTERVAL + INTERVAL / 5).await;
        assert_eq!(engine.status().await.iteration, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_halts_and_is_idempotent() {
        let (engine, store) = engine_with(None).await;
        engine.start().await;

        let first = engine.pause().await;
        assert_eq!(first.status, CalculationStatus::Paused);
        assert!(!engine.is_armed().await);

        let second = engine.pause().await;
        assert_eq!(first, second);

        past_ticks(Instant::now(), 5).await;
        assert_eq!(engine.status().await, first);
        assert_eq!(store.record().unwrap(), first);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_from_stopped_is_idempotent() {
        let initial = snapshot(CalculationStatus::Stopped, 7, "3.2837384837384844");
        let (engine, _store) = engine_with(Some(initial.clone())).await;

        let first = engine.stop().await;
        let second = engine.stop().await;
        assert_eq!(first, initial);
        assert_eq!(second, initial);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_keeps_progress() {
        let t0 = Instant::now();
        let (engine, store) = engine_with(None).await;
        engine.start().await;
        past_ticks(t0, 2).await;

        let stopped = engine.stop().await;
        assert_eq!(stopped.status, CalculationStatus::Stopped);
        assert_eq!(stopped.iteration, 3);
        assert_ne!(stopped.pi_text, "0");
        assert_eq!(store.record().unwrap(), stopped);

        past_ticks(t0, 5).await;
        assert_eq!(engine.status().await.iteration, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn start_after_stop_begins_fresh_run() {
        let initial = snapshot(CalculationStatus::Paused, 50, "3.1");
        let (engine, _store) = engine_with(Some(initial)).await;

        engine.stop().await;
        let started = engine.start().await;
        assert_eq!(started, snapshot(CalculationStatus::Running, 1, "4.0"));
    }

    #[tokio::test(start_paused = true)]
    async fn start_from_paused_resumes_series() {
        let pi_text = "3.121594652591011";
        let initial = snapshot(CalculationStatus::Paused, 50, pi_text);
        let (engine, _store) = engine_with(Some(initial)).await;

        let resumed = engine.start().await;
        assert_eq!(resumed.status, CalculationStatus::Running);
        assert_eq!(resumed.iteration, 51);

        let base: f64 = pi_text.parse().unwrap();
        let expected = render_pi((base / 4.0 + leibniz_term(50).unwrap()) * 4.0);
        assert_eq!(resumed.pi_text, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_from_stopped_then_start_keeps_progress() {
        let initial = snapshot(CalculationStatus::Stopped, 5, "3.3396825396825403");
        let (engine, _store) = engine_with(Some(initial)).await;

        let paused = engine.pause().await;
        assert_eq!(paused.status, CalculationStatus::Paused);
        assert_eq!(paused.iteration, 5);

        assert_eq!(engine.start().await.iteration, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn start_while_running_arms_single_timer() {
        let t0 = Instant::now();
        let (engine, store) = engine_with(None).await;
        engine.start().await;

        let again = engine.start().await;
        assert_eq!(again.iteration, 1);
        assert_eq!(again.status, CalculationStatus::Running);
        assert_eq!(store.writes(), 3);

        past_ticks(t0, 1).await;
        assert_eq!(engine.status().await.iteration, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn running_record_auto_resumes_on_construction() {
        let initial = snapshot(CalculationStatus::Running, 10, "3.0418396189294032");
        let t0 = Instant::now();
        let (engine, _store) = engine_with(Some(initial.clone())).await;

        // Before any timer fires.
        assert_eq!(engine.status().await, initial);
        assert!(engine.is_armed().await);

        past_ticks(t0, 1).await;
        let status = engine.status().await;
        assert_eq!(status.status, CalculationStatus::Running);
        assert_eq!(status.iteration, 11);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_record_does_not_resume() {
        let initial = snapshot(CalculationStatus::Paused, 10, "3.0418396189294032");
        let (engine, _store) = engine_with(Some(initial.clone())).await;

        past_ticks(Instant::now(), 3).await;
        assert_eq!(engine.status().await, initial);
        assert!(!engine.is_armed().await);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_everything() {
        for initial in [
            snapshot(CalculationStatus::Running, 10, "3.0418396189294032"),
            snapshot(CalculationStatus::Paused, 10, "3.0418396189294032"),
            snapshot(CalculationStatus::Stopped, 10, "3.0418396189294032"),
        ] {
            let (engine, store) = engine_with(Some(initial)).await;
            let writes_before = store.writes();

            let after = engine.reset().await;
            assert_eq!(after, CalculationSnapshot::default());
            assert_eq!(store.writes(), writes_before + 1);
            assert_eq!(store.record().unwrap(), CalculationSnapshot::default());

            past_ticks(Instant::now(), 2).await;
            assert_eq!(engine.status().await, CalculationSnapshot::default());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_immediate_step_pauses_without_timer() {
        let initial = snapshot(CalculationStatus::Paused, u64::MAX, "3.14");
        let (engine, store) = engine_with(Some(initial)).await;

        let after = engine.start().await;
        assert_eq!(after.status, CalculationStatus::Paused);
        assert_eq!(after.iteration, u64::MAX);
        assert_eq!(after.pi_text, "3.14");
        assert!(!engine.is_armed().await);
        assert_eq!(store.record().unwrap(), after);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_timer_step_disarms_and_pauses() {
        // The next term index has no representable denominator.
        let initial = snapshot(CalculationStatus::Running, u64::MAX / 2 + 1, "3.14");
        let t0 = Instant::now();
        let (engine, store) = engine_with(Some(initial.clone())).await;
        assert!(engine.is_armed().await);

        past_ticks(t0, 1).await;
        let status = engine.status().await;
        assert_eq!(status.status, CalculationStatus::Paused);
        assert_eq!(status.iteration, initial.iteration);
        assert!(!engine.is_armed().await);
        assert_eq!(store.record().unwrap().status, CalculationStatus::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_writes_do_not_block_progress() {
        let t0 = Instant::now();
        let (engine, store) = engine_with(None).await;
        store.set_fail_writes(true);

        let started = engine.start().await;
        assert_eq!(started.iteration, 1);
        past_ticks(t0, 2).await;
        assert_eq!(engine.status().await.iteration, 3);
        assert_eq!(store.record().unwrap(), CalculationSnapshot::default());

        store.set_fail_writes(false);
        past_ticks(t0, 3).await;
        assert_eq!(store.record().unwrap().iteration, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_keeps_running_status() {
        let t0 = Instant::now();
        let (engine, store) = engine_with(None).await;
        engine.start().await;
        engine.shutdown().await;

        past_ticks(t0, 3).await;
        let status = engine.status().await;
        assert_eq!(status.status, CalculationStatus::Running);
        assert_eq!(status.iteration, 1);
        assert_eq!(store.record().unwrap().status, CalculationStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn execute_dispatches_commands() {
        let (engine, _store) = engine_with(None).await;
        assert_eq!(engine.execute(Command::Start).await.status, CalculationStatus::Running);
        assert_eq!(engine.execute(Command::Pause).await.status, CalculationStatus::Paused);
        assert_eq!(engine.execute(Command::Stop).await.status, CalculationStatus::Stopped);
        assert_eq!(engine.execute(Command::Reset).await, CalculationSnapshot::default());
    }

    #[tokio::test]
    async fn zero_interval_is_clamped() {
        let store: Arc<dyn SnapshotStore> = Arc::new(MemorySnapshotStore::new());
        let engine = CalculationEngine::new(store, Duration::ZERO).await;
        assert_eq!(engine.interval(), MIN_INTERVAL);
    }

    #[test]
    fn advance_applies_alternating_terms() {
        let mut state = EngineState::from_snapshot(CalculationSnapshot::default());
        let expected = [1.0, 1.0 - 1.0 / 3.0, 1.0 - 1.0 / 3.0 + 1.0 / 5.0];
        for (i, want) in expected.iter().enumerate() {
            state.advance().unwrap();
            assert!((state.partial_sum - want).abs() < 1e-15, "step {i}");
        }
        assert_eq!(state.snapshot.iteration, 3);
    }

    #[test]
    fn more_terms_land_closer_to_pi() {
        let mut state = EngineState::from_snapshot(CalculationSnapshot::default());
        for _ in 0..10 {
            state.advance().unwrap();
        }
        let after_10: f64 = state.snapshot.pi_text.parse().unwrap();
        for _ in 10..1000 {
            state.advance().unwrap();
        }
        let after_1000: f64 = state.snapshot.pi_text.parse().unwrap();

        let pi = std::f64::consts::PI;
        assert!((after_1000 - pi).abs() < (after_10 - pi).abs());
        assert_eq!(state.snapshot.iteration, 1000);
    }

    #[test]
    fn failed_advance_leaves_state_untouched() {
        let mut state =
            EngineState::from_snapshot(snapshot(CalculationStatus::Running, u64::MAX, "3.14"));
        let before = state.snapshot.clone();
        let sum_before = state.partial_sum;

        assert!(state.advance().is_err());
        assert_eq!(state.snapshot, before);
        assert_eq!(state.partial_sum, sum_before);
    }
}
