//! `rollback_server`
//!
//! Relay for rollback participants:
//! - Identification handshake (`Hello` / `Welcome`)
//! - Fan-out of inputs and session messages to every other participant
//! - Join/leave announcements
//!
//! The relay never simulates. Consistency is the participants' job: each runs
//! its own rollback engine and reconciles whatever arrives, in whatever order.

pub mod server;

pub use server::{RelayHandle, RelayServer};
