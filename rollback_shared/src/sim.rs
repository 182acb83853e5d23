//! Simulation abstraction.
//!
//! A [`Simulation`] supplies the deterministic transition function the engine
//! advances and replays. Implementations must be pure: the output of
//! [`Simulation::step`] may depend only on the [`StepContext`] and the supplied
//! [`SeededRandom`]. No wall-clock reads, no global counters, no other source of
//! randomness. Anything else makes a replayed tick diverge from its first run
//! and breaks rollback.

use serde::{de::DeserializeOwned, Serialize};

use crate::{
    random::SeededRandom,
    tick::{RecordedInputs, TickId},
};

/// Everything a transition may read.
pub struct StepContext<'a, P, I> {
    /// Payload of the preceding tick.
    pub prior: &'a P,
    /// Inputs in effect for this transition (recorded on the preceding tick).
    pub inputs: &'a RecordedInputs<I>,
    /// Id of the tick being produced.
    pub tick: TickId,
    /// Simulation time of the tick being produced, in seconds.
    pub time: f64,
    /// Fixed step, in seconds.
    pub dt: f64,
}

/// Deterministic transition function plus its data types.
pub trait Simulation: Send + 'static {
    type Input: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;
    type Payload: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Payload of tick 0.
    fn genesis(&self) -> Self::Payload;

    /// Structural validation at the boundary. Rejected inputs never reach `step`.
    fn validate_input(&self, _input: &Self::Input) -> Result<(), String> {
        Ok(())
    }

    /// Produces the next payload.
    fn step(
        &self,
        ctx: &StepContext<'_, Self::Payload, Self::Input>,
        rng: &mut SeededRandom,
    ) -> Self::Payload;
}
