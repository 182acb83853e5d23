//! `rollback_shared`
//!
//! Shared libraries used by both client and server.
//!
//! The heart of the crate is the rollback engine: a fixed-timestep simulation
//! that accepts inputs for ticks already in the past and reconciles them by
//! replaying the affected history.
//!
//! Design goals:
//! - Deterministic: a tick replayed during reconciliation is computed exactly
//!   like the first time (same transition, same seeded random stream).
//! - Clear separation of concerns (history, queue, driver, engine, net).
//! - Traits at the seams: [`sim::Simulation`] for the transition function,
//!   [`driver::Scheduler`] for the timer.
//! - No `unsafe`.

pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod history;
pub mod math;
pub mod net;
pub mod observe;
pub mod queue;
pub mod random;
pub mod sim;
pub mod tick;
pub mod topdown;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::driver::{IntervalScheduler, LoopOptions, LoopState, Scheduler};
    pub use crate::engine::*;
    pub use crate::error::RollbackError;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::observe::ObserverHandle;
    pub use crate::random::SeededRandom;
    pub use crate::sim::*;
    pub use crate::tick::*;
}
