//! Tick-level data model.
//!
//! A `TickState` is the whole simulation at one discrete tick. Payloads are held
//! behind `Arc` so the history window shares them instead of deep-copying: a
//! state is never mutated after it is produced, only replaced.

use std::{collections::BTreeMap, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monotonic tick id assigned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TickId(pub u64);

impl TickId {
    pub const GENESIS: Self = TickId(0);

    pub fn next(self) -> Self {
        TickId(self.0 + 1)
    }

    /// Number of ticks from `base` to `self`, `None` if `self` precedes `base`.
    pub fn offset_from(self, base: TickId) -> Option<usize> {
        self.0
            .checked_sub(base.0)
            .and_then(|d| usize::try_from(d).ok())
    }
}

impl fmt::Display for TickId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a participant. Opaque to the engine beyond ordering/equality.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        ParticipantId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        ParticipantId(s.to_string())
    }
}

/// Inputs in effect at a tick, one per participant.
pub type RecordedInputs<I> = BTreeMap<ParticipantId, I>;

/// The simulation at one tick.
///
/// `inputs` are the inputs in effect from this tick onward; they drive the
/// transition that produces the next tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "P: Serialize, I: Serialize",
    deserialize = "P: Deserialize<'de>, I: Deserialize<'de>"
))]
pub struct TickState<P, I> {
    pub tick: TickId,
    /// Cumulative simulated seconds at this tick.
    pub simulation_time: f64,
    /// Seconds this tick advanced by.
    pub delta_time: f64,
    pub inputs: RecordedInputs<I>,
    pub payload: Arc<P>,
}

impl<P, I> TickState<P, I> {
    /// The genesis state: tick 0, no inputs.
    pub fn genesis(payload: P, simulation_time: f64) -> Self {
        Self {
            tick: TickId::GENESIS,
            simulation_time,
            delta_time: 0.0,
            inputs: RecordedInputs::new(),
            payload: Arc::new(payload),
        }
    }

    pub fn input_of(&self, participant: &ParticipantId) -> Option<&I> {
        self.inputs.get(participant)
    }
}

/// An input destined for a specific (possibly past) tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Correction<I> {
    pub participant: ParticipantId,
    pub input: I,
    pub target: TickId,
    pub received_at: DateTime<Utc>,
}

impl<I> Correction<I> {
    pub fn new(participant: ParticipantId, input: I, target: TickId) -> Self {
        Self {
            participant,
            input,
            target,
            received_at: Utc::now(),
        }
    }
}

/// Full transferable window, used to bootstrap or resynchronize a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "P: Serialize, I: Serialize",
    deserialize = "P: Deserialize<'de>, I: Deserialize<'de>"
))]
pub struct Snapshot<P, I> {
    pub simulation_id: String,
    /// Wall-clock time the session's tick 0 corresponds to.
    pub origin_time: DateTime<Utc>,
    /// Simulation time of the latest state in `states`.
    pub simulation_time: f64,
    pub states: Vec<TickState<P, I>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_offset_from() {
        assert_eq!(TickId(7).offset_from(TickId(3)), Some(4));
        assert_eq!(TickId(3).offset_from(TickId(3)), Some(0));
        assert_eq!(TickId(2).offset_from(TickId(3)), None);
    }

    #[test]
    fn cloned_state_shares_payload() {
        let s: TickState<Vec<u8>, u8> = TickState::genesis(vec![1, 2, 3], 0.0);
        let c = s.clone();
        assert!(Arc::ptr_eq(&s.payload, &c.payload));
    }

    #[test]
    fn participant_serializes_as_plain_string() {
        let json = serde_json::to_string(&ParticipantId::from("p1")).unwrap();
        assert_eq!(json, "\"p1\"");
    }
}
