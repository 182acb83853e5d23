//! Rollback engine.
//!
//! Owns one history window, one pending queue, one loop driver and one observer
//! registry. All mutation goes through [`RollbackEngine::run`], which either
//! advances a tick or replays a suffix of the window after corrections.
//!
//! Reconciliation coalesces every drained correction into a single replay pass
//! starting at the oldest corrected tick:
//! - the oldest corrected tick only has its input record rewritten; its payload
//!   was computed from its predecessor and stays as it is,
//! - every later tick keeps the other participants' records, takes the
//!   correction wherever the corrected participant's record was just the
//!   replaced value held over, and has its payload recomputed from the
//!   corrected predecessor.

use std::{collections::BTreeMap, sync::Arc, time::Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::{
    config::{EngineConfig, ReconcileMode, ReplayPolicy},
    driver::{LoopDriver, LoopOptions},
    error::{Result, RollbackError},
    history::History,
    observe::{ObserverHandle, Observers},
    queue::PendingQueue,
    random::SeededRandom,
    sim::{Simulation, StepContext},
    tick::{Correction, ParticipantId, Snapshot, TickId, TickState},
};

/// State type produced by simulation `S`.
pub type StateOf<S> = TickState<<S as Simulation>::Payload, <S as Simulation>::Input>;
/// Snapshot type produced by simulation `S`.
pub type SnapshotOf<S> = Snapshot<<S as Simulation>::Payload, <S as Simulation>::Input>;

/// Instant plus wall-clock time of a scheduling event.
#[derive(Debug, Clone, Copy)]
pub struct FrameTime {
    pub instant: Instant,
    pub wall: DateTime<Utc>,
}

impl FrameTime {
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            wall: Utc::now(),
        }
    }
}

/// The two ways history changes.
#[derive(Debug, Clone)]
pub enum Step<I> {
    /// Produce one new tick from the latest.
    AdvanceTick,
    /// Rewrite the window from `index` on, applying `corrections` (ascending by
    /// target, all inside the window, none before `index`).
    ReplayFromIndex {
        index: usize,
        corrections: Vec<Correction<I>>,
    },
}

/// What happened to a remote input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Waiting for the next drain.
    Queued,
    /// Already reconciled into history.
    Applied,
}

/// Result of one drain of the pending queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Corrections applied.
    pub applied: usize,
    /// Oldest tick rewritten, if any.
    pub replayed_from: Option<TickId>,
    /// Ticks advanced to reach corrections ahead of the window.
    pub fast_forwarded: u32,
}

/// Result of one scheduler callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Loop is stopped; nothing happened.
    Stopped,
    /// Less than one tick accumulated.
    Idle,
    /// Ticks advanced, queue drained once, observers notified once.
    Advanced {
        ticks: u32,
        latest: TickId,
        reconciled: ReconcileReport,
    },
}

/// Deterministic rollback engine for simulation `S`.
pub struct RollbackEngine<S: Simulation> {
    sim: S,
    config: EngineConfig,
    simulation_id: String,
    history: History<S::Payload, S::Input>,
    queue: PendingQueue<S::Input>,
    driver: LoopDriver,
    observers: Observers<StateOf<S>>,
}

impl<S: Simulation> RollbackEngine<S> {
    /// Creates an engine holding the genesis state under a fresh simulation id.
    pub fn new(sim: S, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let genesis = TickState::genesis(sim.genesis(), 0.0);
        let history = History::new(genesis, config.history_capacity())?;
        let driver = LoopDriver::new(config.tick_hz);
        Ok(Self {
            sim,
            simulation_id: Uuid::new_v4().to_string(),
            history,
            queue: PendingQueue::new(),
            driver,
            observers: Observers::default(),
            config,
        })
    }

    /// Uses `id` instead of a generated simulation id. Every participant of a
    /// session must agree on it; the seeded random streams derive from it.
    pub fn with_simulation_id(mut self, id: impl Into<String>) -> Self {
        self.simulation_id = id.into();
        self
    }

    /// Single dispatch point for every history mutation.
    pub fn run(&mut self, step: Step<S::Input>) -> Result<()> {
        match step {
            Step::AdvanceTick => self.advance(),
            Step::ReplayFromIndex { index, corrections } => self.replay_from(index, corrections),
        }
    }

    fn advance(&mut self) -> Result<()> {
        let prior = self.history.latest();
        let tick = prior.tick.next();
        let dt = self.config.dt();
        let time = prior.simulation_time + dt;
        let payload = self.compute(prior, tick, time, dt);
        let next = TickState {
            tick,
            simulation_time: time,
            delta_time: dt,
            inputs: prior.inputs.clone(),
            payload: Arc::new(payload),
        };
        trace!(tick = %tick, "advanced");
        self.history.append(next)
    }

    fn replay_from(&mut self, index: usize, corrections: Vec<Correction<S::Input>>) -> Result<()> {
        let start = self.history.get(index).map(|s| s.tick).ok_or_else(|| {
            RollbackError::HistoryShape(format!("replay index {index} outside window"))
        })?;
        let latest = self.history.latest_tick();

        let mut by_tick: BTreeMap<TickId, Vec<Correction<S::Input>>> = BTreeMap::new();
        for c in corrections {
            if c.target < start || c.target > latest {
                return Err(RollbackError::HistoryShape(format!(
                    "correction for tick {} outside replay range {start}..={latest}",
                    c.target
                )));
            }
            by_tick.entry(c.target).or_default().push(c);
        }

        let carry = self.config.replay_policy == ReplayPolicy::CarryForward;
        // Per participant: the record the correction replaced, and the corrected input.
        let mut carried: BTreeMap<ParticipantId, (Option<S::Input>, S::Input)> = BTreeMap::new();
        let mut rebuilt: Vec<StateOf<S>> = Vec::with_capacity(self.history.len() - index);

        for old in self.history.iter().skip(index) {
            let mut inputs = old.inputs.clone();
            // Under PreserveRecorded a correction only follows its participant
            // while the later record is the replaced value held over.
            carried.retain(|p, (replaced, input)| {
                if carry || old.inputs.get(p) == replaced.as_ref() {
                    inputs.insert(p.clone(), input.clone());
                    true
                } else {
                    false
                }
            });
            for c in by_tick.remove(&old.tick).unwrap_or_default() {
                let replaced = old.inputs.get(&c.participant).cloned();
                carried.insert(c.participant.clone(), (replaced, c.input.clone()));
                inputs.insert(c.participant, c.input);
            }

            let payload = match rebuilt.last() {
                // First tick of the pass: only the record changes.
                None => old.payload.clone(),
                Some(prev) => Arc::new(self.compute(
                    prev,
                    old.tick,
                    old.simulation_time,
                    old.delta_time,
                )),
            };
            rebuilt.push(TickState {
                tick: old.tick,
                simulation_time: old.simulation_time,
                delta_time: old.delta_time,
                inputs,
                payload,
            });
        }

        debug!(from = %start, to = %latest, ticks = rebuilt.len(), "replayed history");
        self.history.replace_from(index, rebuilt)
    }

    fn compute(&self, prior: &StateOf<S>, tick: TickId, time: f64, dt: f64) -> S::Payload {
        let mut rng = SeededRandom::derive(&self.simulation_id, tick);
        let ctx = StepContext {
            prior: prior.payload.as_ref(),
            inputs: &prior.inputs,
            tick,
            time,
            dt,
        };
        self.sim.step(&ctx, &mut rng)
    }

    fn validate(&self, participant: &ParticipantId, input: &S::Input) -> Result<()> {
        self.sim
            .validate_input(input)
            .map_err(|reason| RollbackError::MalformedInput {
                participant: participant.clone(),
                reason,
            })
    }

    /// Applies local input to the latest tick; it takes effect from the next
    /// transition. Returns the tick the input was recorded on.
    pub fn submit_local_input(
        &mut self,
        participant: ParticipantId,
        input: S::Input,
    ) -> Result<TickId> {
        self.validate(&participant, &input)?;
        let latest = self.history.latest_mut();
        latest.inputs.insert(participant, input);
        Ok(latest.tick)
    }

    /// Accepts a remote input destined for `target`.
    ///
    /// Targets older than the window are a desync and leave the engine
    /// untouched. Everything else is queued (last writer wins per participant
    /// and tick) and, in immediate mode, reconciled right away.
    pub fn submit_remote_input(
        &mut self,
        participant: ParticipantId,
        input: S::Input,
        target: TickId,
    ) -> Result<Submission> {
        self.validate(&participant, &input)?;
        let oldest = self.history.oldest_tick();
        if target < oldest {
            warn!(participant = %participant, target = %target, oldest = %oldest, "correction arrived too late");
            return Err(RollbackError::Desync { target, oldest });
        }

        if let Some(prev) = self.queue.enqueue(Correction::new(participant, input, target)) {
            debug!(participant = %prev.participant, target = %target, "replaced queued correction");
        }

        match self.config.reconcile {
            ReconcileMode::Batched => Ok(Submission::Queued),
            ReconcileMode::Immediate => {
                self.reconcile_pending()?;
                if target <= self.history.latest_tick() {
                    Ok(Submission::Applied)
                } else {
                    Ok(Submission::Queued)
                }
            }
        }
    }

    /// Drains the pending queue against the latest tick and replays once.
    ///
    /// Corrections that fell out of the window while queued are reported as a
    /// desync after the applicable ones have been applied.
    pub fn reconcile_pending(&mut self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        if self.config.fast_forward_limit > 0 {
            if let Some(max) = self.queue.max_target() {
                let ahead = max.0.saturating_sub(self.history.latest_tick().0);
                let steps = ahead.min(u64::from(self.config.fast_forward_limit)) as u32;
                if steps > 0 {
                    debug!(steps, target = %max, "fast-forwarding to queued correction");
                }
                for _ in 0..steps {
                    self.run(Step::AdvanceTick)?;
                }
                report.fast_forwarded = steps;
            }
        }

        let oldest = self.history.oldest_tick();
        let stale = self.queue.take_stale(oldest);
        let ready = self.queue.drain(self.history.latest_tick());

        if let Some(first) = ready.first().map(|c| c.target) {
            let index = self.history.index_of(first).ok_or_else(|| {
                RollbackError::HistoryShape(format!("drained tick {first} not in window"))
            })?;
            report.applied = ready.len();
            report.replayed_from = Some(first);
            self.run(Step::ReplayFromIndex {
                index,
                corrections: ready,
            })?;
        }

        if let Some(first) = stale.first() {
            warn!(
                dropped = stale.len(),
                target = %first.target,
                oldest = %oldest,
                "queued corrections evicted before reconciliation"
            );
            return Err(RollbackError::Desync {
                target: first.target,
                oldest,
            });
        }
        Ok(report)
    }

    /// Starts the fixed-timestep loop.
    pub fn start(&mut self, opts: LoopOptions, at: FrameTime) {
        info!(
            simulation_id = %self.simulation_id,
            tick_hz = self.config.tick_hz,
            latest = %self.history.latest_tick(),
            "loop started"
        );
        self.driver.start(opts, at.instant, at.wall);
    }

    /// Stops the loop. Callbacks already scheduled become no-ops.
    pub fn stop(&mut self) {
        self.driver.stop();
    }

    pub fn is_running(&self) -> bool {
        self.driver.is_running()
    }

    /// Scheduler callback: advance every due tick, drain the queue once, notify
    /// observers once.
    pub fn frame(&mut self, now: Instant) -> Result<FrameOutcome> {
        if !self.driver.is_running() {
            return Ok(FrameOutcome::Stopped);
        }
        let due = self.driver.accumulate(now);
        if due == 0 {
            return Ok(FrameOutcome::Idle);
        }
        for _ in 0..due {
            self.run(Step::AdvanceTick)?;
        }
        let reconciled = self.reconcile_pending();
        self.observers.notify(self.history.latest());
        Ok(FrameOutcome::Advanced {
            ticks: due,
            latest: self.history.latest_tick(),
            reconciled: reconciled?,
        })
    }

    /// Full transferable window.
    pub fn snapshot(&self) -> SnapshotOf<S> {
        Snapshot {
            simulation_id: self.simulation_id.clone(),
            origin_time: self.driver.origin_time(),
            simulation_time: self.history.latest().simulation_time,
            states: self.history.to_vec(),
        }
    }

    /// Replaces history wholesale and resets the loop's time base.
    ///
    /// Queued corrections from another session, or older than the loaded
    /// window, are discarded: the snapshot supersedes them.
    pub fn load_from_snapshot(&mut self, snapshot: SnapshotOf<S>, at: FrameTime) -> Result<()> {
        self.history.reset(snapshot.states)?;

        if snapshot.simulation_id != self.simulation_id {
            self.queue.clear();
        } else {
            let discarded = self.queue.take_stale(self.history.oldest_tick()).len();
            if discarded > 0 {
                debug!(discarded, "discarded corrections superseded by snapshot");
            }
        }
        self.simulation_id = snapshot.simulation_id;
        self.driver.rebase(
            LoopOptions {
                origin_time: Some(snapshot.origin_time),
                simulation_time: Some(snapshot.simulation_time),
            },
            at.instant,
            at.wall,
        );
        info!(
            simulation_id = %self.simulation_id,
            oldest = %self.history.oldest_tick(),
            latest = %self.history.latest_tick(),
            "loaded snapshot"
        );
        Ok(())
    }

    /// Starts a brand new session: new id, genesis state, empty queue.
    pub fn reset(&mut self, at: FrameTime) -> Result<()> {
        self.simulation_id = Uuid::new_v4().to_string();
        self.history
            .reset(vec![TickState::genesis(self.sim.genesis(), 0.0)])?;
        self.queue.clear();
        self.driver.rebase(LoopOptions::default(), at.instant, at.wall);
        info!(simulation_id = %self.simulation_id, "session reset");
        Ok(())
    }

    /// Registers a callback invoked once per advancing scheduler callback.
    pub fn observe_ticks(
        &mut self,
        callback: impl FnMut(&StateOf<S>) + Send + 'static,
    ) -> ObserverHandle {
        self.observers.subscribe(callback)
    }

    pub fn unobserve(&mut self, handle: ObserverHandle) -> bool {
        self.observers.unsubscribe(handle)
    }

    pub fn latest(&self) -> &StateOf<S> {
        self.history.latest()
    }

    pub fn history(&self) -> &History<S::Payload, S::Input> {
        &self.history
    }

    pub fn simulation_id(&self) -> &str {
        &self.simulation_id
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn simulation(&self) -> &S {
        &self.sim
    }

    pub fn driver(&self) -> &LoopDriver {
        &self.driver
    }
}

impl<S: Simulation> std::fmt::Debug for RollbackEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackEngine")
            .field("simulation_id", &self.simulation_id)
            .field("oldest", &self.history.oldest_tick())
            .field("latest", &self.history.latest_tick())
            .field("pending", &self.queue.len())
            .field("loop", &self.driver.state())
            .finish()
    }
}
