//! Top-down movement sample simulation.
//!
//! Each participant steers one entity with an axis input. Used by the client
//! binary and as a realistic workload in tests.

use serde::{Deserialize, Serialize};

use crate::{
    math::Vec2,
    random::SeededRandom,
    sim::{Simulation, StepContext},
    tick::ParticipantId,
};

/// Steering input; each axis component in `[-1, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct AxisInput {
    pub axis: Vec2,
}

impl AxisInput {
    pub const fn new(x: f64, y: f64) -> Self {
        Self {
            axis: Vec2::new(x, y),
        }
    }
}

/// One steered entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: ParticipantId,
    pub pos: Vec2,
}

/// Top-down world payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct World {
    /// Sorted by id.
    pub entities: Vec<Entity>,
    /// One seeded draw per tick, handy for spotting seed divergence.
    pub rand_number: f64,
}

impl World {
    pub fn entity(&self, id: &ParticipantId) -> Option<&Entity> {
        self.entities
            .binary_search_by(|e| e.id.cmp(id))
            .ok()
            .map(|i| &self.entities[i])
    }
}

/// Top-down simulation.
#[derive(Debug, Clone)]
pub struct TopDown {
    pub move_speed: f64,
}

impl Default for TopDown {
    fn default() -> Self {
        Self { move_speed: 50.0 }
    }
}

impl TopDown {
    pub fn new(move_speed: f64) -> Self {
        Self { move_speed }
    }
}

impl Simulation for TopDown {
    type Input = AxisInput;
    type Payload = World;

    fn genesis(&self) -> World {
        World::default()
    }

    fn validate_input(&self, input: &AxisInput) -> Result<(), String> {
        let a = input.axis;
        if !a.is_finite() {
            return Err("axis is not finite".into());
        }
        if a.x.abs() > 1.0 || a.y.abs() > 1.0 {
            return Err(format!("axis ({}, {}) outside [-1, 1]", a.x, a.y));
        }
        Ok(())
    }

    fn step(&self, ctx: &StepContext<'_, World, AxisInput>, rng: &mut SeededRandom) -> World {
        let mut world = ctx.prior.clone();
        // Inputs iterate in participant order, so spawning is deterministic.
        for (id, input) in ctx.inputs {
            let idx = match world.entities.binary_search_by(|e| e.id.cmp(id)) {
                Ok(i) => i,
                Err(i) => {
                    world.entities.insert(
                        i,
                        Entity {
                            id: id.clone(),
                            pos: Vec2::ZERO,
                        },
                    );
                    i
                }
            };
            let delta = input.axis.scale(ctx.dt * self.move_speed);
            world.entities[idx].pos = world.entities[idx].pos.add(delta);
        }
        world.rand_number = rng.next_f64();
        world
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick::{RecordedInputs, TickId};

    fn step(sim: &TopDown, prior: &World, inputs: &RecordedInputs<AxisInput>, tick: u64) -> World {
        let ctx = StepContext {
            prior,
            inputs,
            tick: TickId(tick),
            time: tick as f64 * 0.1,
            dt: 0.1,
        };
        sim.step(&ctx, &mut SeededRandom::derive("topdown", TickId(tick)))
    }

    #[test]
    fn spawns_and_moves_entities() {
        let sim = TopDown::new(10.0);
        let mut inputs = RecordedInputs::new();
        inputs.insert(ParticipantId::from("b"), AxisInput::new(1.0, 0.0));
        inputs.insert(ParticipantId::from("a"), AxisInput::new(0.0, -1.0));

        let w = step(&sim, &World::default(), &inputs, 1);
        assert_eq!(w.entities.len(), 2);
        assert_eq!(w.entities[0].id.as_str(), "a");
        assert_eq!(w.entity(&"b".into()).unwrap().pos, Vec2::new(1.0, 0.0));
        assert_eq!(w.entity(&"a".into()).unwrap().pos, Vec2::new(0.0, -1.0));
    }

    #[test]
    fn step_is_deterministic() {
        let sim = TopDown::default();
        let mut inputs = RecordedInputs::new();
        inputs.insert(ParticipantId::from("a"), AxisInput::new(0.5, 0.5));
        let prior = World::default();
        assert_eq!(step(&sim, &prior, &inputs, 7), step(&sim, &prior, &inputs, 7));
        assert_ne!(
            step(&sim, &prior, &inputs, 7).rand_number,
            step(&sim, &prior, &inputs, 8).rand_number
        );
    }

    #[test]
    fn rejects_out_of_range_axis() {
        let sim = TopDown::default();
        assert!(sim.validate_input(&AxisInput::new(1.0, -1.0)).is_ok());
        assert!(sim.validate_input(&AxisInput::new(1.5, 0.0)).is_err());
        assert!(sim.validate_input(&AxisInput::new(f64::NAN, 0.0)).is_err());
    }
}
