//! Error types for the rollback core.

use thiserror::Error;

use crate::tick::{ParticipantId, TickId};

/// Errors surfaced by the rollback engine.
///
/// None of these are swallowed internally: the caller that submitted the input
/// or drove the frame receives them and decides how to recover.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RollbackError {
    /// A correction or snapshot targets a tick that has already been evicted.
    /// Only a fresh snapshot can recover from this.
    #[error("desync: tick {target} is older than the oldest retained tick {oldest}")]
    Desync { target: TickId, oldest: TickId },

    /// Structurally invalid input rejected before it reached the simulation.
    #[error("malformed input from {participant}: {reason}")]
    MalformedInput {
        participant: ParticipantId,
        reason: String,
    },

    /// Snapshot could not be loaded.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// Configuration rejected at construction.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Internal history invariant violated.
    #[error("history shape: {0}")]
    HistoryShape(String),
}

impl RollbackError {
    /// Whether recovery requires a full snapshot reload.
    pub fn is_desync(&self) -> bool {
        matches!(self, RollbackError::Desync { .. })
    }
}

pub type Result<T> = std::result::Result<T, RollbackError>;
