//! Fixed-timestep loop driver.
//!
//! Wall-clock scheduling is decoupled from simulation ticks with an
//! accumulator: each scheduler callback adds the elapsed wall time, and one
//! tick is due for every whole tick duration accumulated. Slow callbacks run
//! several ticks back-to-back; the step size never varies.
//!
//! The driver only counts. Which timer produces the callbacks is a
//! [`Scheduler`] concern.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Loop state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    Running,
}

/// Time base for a loop run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoopOptions {
    /// Wall-clock time of the session's origin. A client resuming mid-session
    /// passes the authoritative origin so elapsed time lines up.
    pub origin_time: Option<DateTime<Utc>>,
    /// Simulation time already covered by the loaded states, in seconds.
    pub simulation_time: Option<f64>,
}

/// Accumulator over wall time.
#[derive(Debug, Clone)]
pub struct LoopDriver {
    tick: Duration,
    state: LoopState,
    last_frame: Option<Instant>,
    accumulator: Duration,
    origin_time: DateTime<Utc>,
}

impl LoopDriver {
    pub fn new(tick_hz: u32) -> Self {
        Self {
            tick: tick_duration(tick_hz),
            state: LoopState::Stopped,
            last_frame: None,
            accumulator: Duration::ZERO,
            origin_time: Utc::now(),
        }
    }

    /// Starts (or restarts) the loop with a fresh time base.
    pub fn start(&mut self, opts: LoopOptions, now: Instant, wall_now: DateTime<Utc>) {
        self.state = LoopState::Running;
        self.rebase(opts, now, wall_now);
    }

    /// Idempotent.
    pub fn stop(&mut self) {
        if self.state == LoopState::Running {
            debug!(accumulator_ms = self.accumulator.as_millis() as u64, "loop stopped");
        }
        self.state = LoopState::Stopped;
        self.last_frame = None;
    }

    /// Resets the time base without changing the loop state.
    ///
    /// With an origin, the accumulator is pre-charged with the wall time the
    /// session has run beyond `simulation_time`, so the next callback catches up.
    pub fn rebase(&mut self, opts: LoopOptions, now: Instant, wall_now: DateTime<Utc>) {
        self.last_frame = Some(now);
        self.accumulator = Duration::ZERO;
        match opts.origin_time {
            Some(origin) => {
                self.origin_time = origin;
                let since_origin = (wall_now - origin).to_std().unwrap_or(Duration::ZERO);
                let covered = opts
                    .simulation_time
                    .filter(|t| t.is_finite() && *t >= 0.0)
                    .map(Duration::from_secs_f64)
                    .unwrap_or(Duration::ZERO);
                self.accumulator = since_origin.saturating_sub(covered);
            }
            None => self.origin_time = wall_now,
        }
    }

    /// Adds the wall time since the previous callback and returns how many
    /// whole ticks are now due. Zero while stopped.
    pub fn accumulate(&mut self, now: Instant) -> u32 {
        if self.state == LoopState::Stopped {
            return 0;
        }
        let last = self.last_frame.replace(now).unwrap_or(now);
        self.accumulator += now.saturating_duration_since(last);

        let mut due = 0;
        while self.accumulator >= self.tick {
            self.accumulator -= self.tick;
            due += 1;
        }
        due
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == LoopState::Running
    }

    pub fn tick_duration(&self) -> Duration {
        self.tick
    }

    /// Wall time carried over to the next callback.
    pub fn accumulator(&self) -> Duration {
        self.accumulator
    }

    pub fn origin_time(&self) -> DateTime<Utc> {
        self.origin_time
    }
}

/// Duration of one tick at `tick_hz`; zero rates are clamped to 1 Hz.
pub fn tick_duration(tick_hz: u32) -> Duration {
    Duration::from_nanos(1_000_000_000 / u64::from(tick_hz.max(1)))
}

/// Source of scheduler callbacks.
#[async_trait]
pub trait Scheduler: Send {
    /// Waits for the next callback and returns its timestamp.
    async fn next_frame(&mut self) -> Instant;
}

/// Tokio interval scheduler. Missed callbacks are skipped, not bursted; the
/// accumulator already accounts for the lost time.
#[derive(Debug)]
pub struct IntervalScheduler {
    interval: tokio::time::Interval,
}

impl IntervalScheduler {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

#[async_trait]
impl Scheduler for IntervalScheduler {
    async fn next_frame(&mut self) -> Instant {
        self.interval.tick().await.into_std()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn accumulator_runs_whole_ticks_and_keeps_remainder() {
        let t0 = Instant::now();
        let mut d = LoopDriver::new(10);
        d.start(LoopOptions::default(), t0, Utc::now());

        assert_eq!(d.accumulate(t0 + ms(350)), 3);
        assert_eq!(d.accumulator(), ms(50));
        assert_eq!(d.accumulate(t0 + ms(400)), 1);
        assert_eq!(d.accumulator(), ms(0));
        assert_eq!(d.accumulate(t0 + ms(430)), 0);
        assert_eq!(d.accumulator(), ms(30));
    }

    #[test]
    fn stopped_driver_never_advances() {
        let t0 = Instant::now();
        let mut d = LoopDriver::new(10);
        assert_eq!(d.accumulate(t0 + ms(1000)), 0);

        d.start(LoopOptions::default(), t0, Utc::now());
        d.stop();
        d.stop();
        assert_eq!(d.state(), LoopState::Stopped);
        assert_eq!(d.accumulate(t0 + ms(1000)), 0);
    }

    #[test]
    fn origin_precharges_accumulator() {
        let t0 = Instant::now();
        let wall = Utc::now();
        let origin = wall - chrono::Duration::milliseconds(1_000);
        let mut d = LoopDriver::new(10);
        d.start(
            LoopOptions {
                origin_time: Some(origin),
                simulation_time: Some(0.75),
            },
            t0,
            wall,
        );
        assert_eq!(d.origin_time(), origin);
        // 1000ms elapsed, 750ms already simulated: 2 ticks due, 50ms left.
        assert_eq!(d.accumulate(t0), 2);
        assert_eq!(d.accumulator(), ms(50));
    }

    #[test]
    fn future_origin_does_not_underflow() {
        let t0 = Instant::now();
        let wall = Utc::now();
        let mut d = LoopDriver::new(10);
        d.start(
            LoopOptions {
                origin_time: Some(wall + chrono::Duration::seconds(5)),
                simulation_time: None,
            },
            t0,
            wall,
        );
        assert_eq!(d.accumulate(t0), 0);
    }

    #[tokio::test]
    async fn interval_scheduler_yields_increasing_instants() {
        let mut s = IntervalScheduler::new(ms(1));
        let a = s.next_frame().await;
        let b = s.next_frame().await;
        assert!(b >= a);
    }
}
