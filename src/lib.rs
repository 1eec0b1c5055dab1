//! warden - a service supervision daemon
//!
//! Services are checked once per poll cycle. Every check result is posted as
//! a raw sample to an [`event::Event`], debounced against the rule's
//! threshold, fanned out to the alert and remote transports, and escalated to
//! dependency-aware control actions (start, stop, restart, monitor,
//! unmonitor). Deliveries that fail are kept in an on-disk queue and retried
//! at the start of the next cycle.

pub mod action;
pub mod actors;
pub mod alerts;
pub mod check;
pub mod config;
pub mod discord;
pub mod engine;
pub mod error;
pub mod event;
pub mod monitors;
pub mod remote;
pub mod service;
pub mod spawn;
pub mod storage;
pub mod transport;

pub use engine::Engine;
pub use error::{ConfigError, SpawnError, TransportError};
