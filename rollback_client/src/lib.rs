//! `rollback_client`
//!
//! Client-side systems:
//! - Relay connection and handshake
//! - Local input capture and publication
//! - A rollback engine per session, reconciled against peer inputs
//! - Resync by snapshot when a peer input arrives too late

pub mod client;
pub mod input;

pub use client::{ClientState, GameClient};
pub use input::{ClientCommand, InputState, ScriptedInput};
