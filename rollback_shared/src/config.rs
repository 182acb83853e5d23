//! Configuration system.
//!
//! Loads engine configuration from JSON strings/files (file IO left to app).

use serde::{Deserialize, Serialize};

use crate::error::{Result, RollbackError};

/// When queued remote corrections get reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileMode {
    /// Drained once per loop callback.
    #[default]
    Batched,
    /// Drained as soon as a correction is submitted.
    Immediate,
}

/// What replay does with the corrected participant's later inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayPolicy {
    /// The corrected input replaces that participant's record on later ticks
    /// only while the record still holds the value it replaced. The first tick
    /// where the participant recorded something else, and every tick after it,
    /// keep their records.
    #[default]
    PreserveRecorded,
    /// The corrected input overwrites that participant's input on every later
    /// tick, up to the next correction for the same participant.
    CarryForward,
}

/// Root configuration shared by client/server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Relay listen/connect address, e.g. `127.0.0.1:40000`.
    pub server_addr: String,
    /// Fixed simulation tick rate.
    pub tick_hz: u32,
    /// Seconds of history kept for reconciliation.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u32,
    /// Local participant name (client only).
    #[serde(default = "default_participant")]
    pub participant: String,
    #[serde(default)]
    pub reconcile: ReconcileMode,
    #[serde(default)]
    pub replay_policy: ReplayPolicy,
    /// Ticks the engine may advance to reach a correction that targets a tick
    /// it has not produced yet. Zero disables fast-forward.
    #[serde(default)]
    pub fast_forward_limit: u32,
    /// Artificial delay before local input is sent (client only).
    #[serde(default)]
    pub simulated_lag_ms: u64,
    /// Units per second for the top-down sample simulation.
    #[serde(default = "default_move_speed")]
    pub move_speed: f64,
}

fn default_retention_secs() -> u32 {
    5
}

fn default_participant() -> String {
    "Player".to_string()
}

fn default_move_speed() -> f64 {
    100.0
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:40000".to_string(),
            tick_hz: 30,
            retention_secs: default_retention_secs(),
            participant: default_participant(),
            reconcile: ReconcileMode::default(),
            replay_policy: ReplayPolicy::default(),
            fast_forward_limit: 0,
            simulated_lag_ms: 0,
            move_speed: default_move_speed(),
        }
    }
}

impl EngineConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.tick_hz == 0 {
            return Err(RollbackError::InvalidConfig("tick_hz must be > 0".into()));
        }
        if self.retention_secs == 0 {
            return Err(RollbackError::InvalidConfig(
                "retention_secs must be > 0".into(),
            ));
        }
        if !self.move_speed.is_finite() {
            return Err(RollbackError::InvalidConfig(
                "move_speed must be finite".into(),
            ));
        }
        Ok(())
    }

    /// Number of states kept: one per tick over the retention period.
    pub fn history_capacity(&self) -> usize {
        let ticks = u64::from(self.tick_hz) * u64::from(self.retention_secs);
        usize::try_from(ticks).unwrap_or(usize::MAX).max(1)
    }

    /// Fixed step in seconds.
    pub fn dt(&self) -> f64 {
        1.0 / f64::from(self.tick_hz.max(1))
    }
}
