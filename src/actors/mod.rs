//! Actor wrapper around the engine
//!
//! ```text
//!   control server / CLI ──→ EngineHandle ──mpsc──→ EngineActor ──owns──→ Engine
//!                                 ↑                      │
//!                                 └──────oneshot─────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: the actor has one mpsc command channel
//! 2. **Request/Response**: oneshot channels for replies
//! 3. **Timer**: the poll cycle runs on a `tokio::time::interval`

pub mod engine;
pub mod messages;
