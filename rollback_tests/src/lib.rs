//! Shared fixtures for the scenario and socket tests.

use std::time::Duration;

use rand::RngCore;
use rollback_client::GameClient;
use rollback_shared::{
    config::EngineConfig,
    engine::{RollbackEngine, StateOf, Step},
    random::SeededRandom,
    sim::{Simulation, StepContext},
    tick::ParticipantId,
};
use serde::{Deserialize, Serialize};

/// Running total of all inputs plus one seeded draw per tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    pub total: i64,
    pub draw: u32,
}

/// Integer-input simulation. Small enough to reason about tick by tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tally;

impl Simulation for Tally {
    type Input = i64;
    type Payload = Ledger;

    fn genesis(&self) -> Ledger {
        Ledger::default()
    }

    fn validate_input(&self, input: &i64) -> Result<(), String> {
        if input.abs() > 1_000 {
            return Err(format!("{input} out of range"));
        }
        Ok(())
    }

    fn step(&self, ctx: &StepContext<'_, Ledger, i64>, rng: &mut SeededRandom) -> Ledger {
        Ledger {
            total: ctx.prior.total + ctx.inputs.values().sum::<i64>(),
            draw: rng.next_u32(),
        }
    }
}

pub const SIM_ID: &str = "scenario";

pub fn config(tick_hz: u32, retention_secs: u32) -> EngineConfig {
    EngineConfig {
        tick_hz,
        retention_secs,
        ..Default::default()
    }
}

/// Engine with a fixed simulation id so independent engines share seeds.
pub fn engine_with<S: Simulation>(sim: S, cfg: EngineConfig) -> anyhow::Result<RollbackEngine<S>> {
    Ok(RollbackEngine::new(sim, cfg)?.with_simulation_id(SIM_ID))
}

pub fn tally(tick_hz: u32, retention_secs: u32) -> anyhow::Result<RollbackEngine<Tally>> {
    engine_with(Tally, config(tick_hz, retention_secs))
}

pub fn advance<S: Simulation>(engine: &mut RollbackEngine<S>, ticks: u32) -> anyhow::Result<()> {
    for _ in 0..ticks {
        engine.run(Step::AdvanceTick)?;
    }
    Ok(())
}

/// Recomputes every payload after the oldest from the recorded inputs alone,
/// exactly as a fresh forward pass would.
pub fn recompute_from_records<S: Simulation>(
    sim: &S,
    simulation_id: &str,
    states: &[StateOf<S>],
) -> Vec<S::Payload> {
    let Some(first) = states.first() else {
        return Vec::new();
    };
    let mut out = vec![first.payload.as_ref().clone()];
    for pair in states.windows(2) {
        let (prior, cur) = (&pair[0], &pair[1]);
        let ctx = StepContext {
            prior: &out[out.len() - 1],
            inputs: &prior.inputs,
            tick: cur.tick,
            time: cur.simulation_time,
            dt: cur.delta_time,
        };
        let next = sim.step(&ctx, &mut SeededRandom::derive(simulation_id, cur.tick));
        out.push(next);
    }
    out
}

pub fn pid(s: &str) -> ParticipantId {
    ParticipantId::from(s)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Polls `client` until `done` holds or `timeout` elapses.
pub async fn pump_until<S: Simulation>(
    client: &mut GameClient<S>,
    timeout: Duration,
    mut done: impl FnMut(&GameClient<S>) -> bool,
) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    while !done(client) {
        anyhow::ensure!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within {timeout:?}"
        );
        client.poll_network(Duration::from_millis(20)).await?;
    }
    Ok(())
}

/// Polls `client` until nothing arrives for `quiet`.
pub async fn drain<S: Simulation>(client: &mut GameClient<S>, quiet: Duration) -> anyhow::Result<()> {
    while client.poll_network(quiet).await? {}
    Ok(())
}
