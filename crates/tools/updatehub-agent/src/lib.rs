//! Agent installing over-the-air updates from an UpdateHub server.
//!
//! The agent is a state machine ([`states`]) driven by a [`controller::Controller`]
//! which is in turn driven by the [`daemon::Daemon`] loop. All interactions with the
//! system and the server go through the collaborators in [`backends`].

pub mod active_inactive;
pub mod backends;
pub mod cli;
pub mod controller;
pub mod daemon;
pub mod error;
pub mod firmware;
pub mod hub;
pub mod metadata;
pub mod modes;
pub mod polling;
pub mod progress;
pub mod states;
