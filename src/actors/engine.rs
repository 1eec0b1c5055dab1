//! EngineActor - Owns the engine and drives the poll cycle
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick ─→ poll_cycle ─→ replay queue → scheduled actions → checks → dispatch
//!     ↑
//!     └─── Commands (PollNow, Control, RequestAction, Status, Shutdown)
//! ```
//!
//! Commands are handled between two cycles, so a caller never observes a
//! half-finished cycle.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::action::ActionKind;
use crate::engine::Engine;

use super::messages::{EngineCommand, ServiceStatus};

/// Actor running the poll loop of one engine
pub struct EngineActor {
    engine: Engine,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<EngineCommand>,

    /// Time between two poll cycles
    interval_duration: Duration,

    shutdown: CancellationToken,
}

impl EngineActor {
    pub fn new(
        engine: Engine,
        command_rx: mpsc::Receiver<EngineCommand>,
        interval_duration: Duration,
    ) -> Self {
        let shutdown = engine.shutdown_token().clone();
        Self {
            engine,
            command_rx,
            interval_duration,
            shutdown,
        }
    }

    /// Run the actor's main loop
    ///
    /// Exits on a Shutdown command, a closed command channel, or when the
    /// shutdown token is cancelled.
    #[instrument(skip(self), fields(host = %self.engine.host()))]
    pub async fn run(mut self) {
        debug!("starting engine actor");
        self.engine.announce(true).await;

        let mut ticker = interval(self.interval_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("shutdown requested");
                    break;
                }

                _ = ticker.tick() => {
                    self.engine.poll_cycle().await;
                }

                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        warn!("command channel closed, shutting down");
                        break;
                    };
                    match cmd {
                        EngineCommand::PollNow { respond_to } => {
                            debug!("received PollNow command");
                            self.engine.poll_cycle().await;
                            let _ = respond_to.send(());
                        }

                        EngineCommand::Control { service, action, respond_to } => {
                            debug!("received Control command: {action} {service}");
                            let done = self.engine.control(&service, action).await;
                            // traversal marks only live for one cascade outside a cycle
                            self.engine.reset_depend();
                            let _ = respond_to.send(done);
                        }

                        EngineCommand::RequestAction { service, action, respond_to } => {
                            let accepted = self.engine.request_action(&service, action);
                            let _ = respond_to.send(accepted);
                        }

                        EngineCommand::Status { respond_to } => {
                            let _ = respond_to.send(self.engine.status());
                        }

                        EngineCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }
            }
        }

        self.engine.announce(false).await;
        debug!("engine actor stopped");
    }
}

/// Handle for talking to an EngineActor
///
/// Cheap to clone; every clone talks to the same actor.
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    /// Spawn the actor on the current runtime
    pub fn spawn(engine: Engine, interval_duration: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = EngineActor::new(engine, cmd_rx, interval_duration);
        tokio::spawn(actor.run());
        Self { sender: cmd_tx }
    }

    /// Run a poll cycle now and wait for it to finish
    pub async fn poll_now(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::PollNow { respond_to: tx })
            .await
            .context("failed to send PollNow command")?;
        rx.await.context("failed to receive response")
    }

    /// Run a control action right away
    pub async fn control(&self, service: &str, action: ActionKind) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::Control {
                service: service.to_string(),
                action,
                respond_to: tx,
            })
            .await
            .context("failed to send Control command")?;
        rx.await.context("failed to receive response")
    }

    /// Run a control action given by name; unknown names are refused
    pub async fn control_str(&self, service: &str, action: &str) -> Result<bool> {
        match action.parse::<ActionKind>() {
            Ok(kind) => self.control(service, kind).await,
            Err(e) => {
                warn!("service '{service}' -- {e}");
                Ok(false)
            }
        }
    }

    /// Schedule an action for the next poll cycle
    pub async fn request_action(&self, service: &str, action: ActionKind) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::RequestAction {
                service: service.to_string(),
                action,
                respond_to: tx,
            })
            .await
            .context("failed to send RequestAction command")?;
        rx.await.context("failed to receive response")
    }

    pub async fn status(&self) -> Result<Vec<ServiceStatus>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::Status { respond_to: tx })
            .await
            .context("failed to send Status command")?;
        rx.await.context("failed to receive response")
    }

    /// Ask the actor to stop after the cycle in flight
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(EngineCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }

    /// Resolves once the actor has exited
    pub async fn closed(&self) {
        self.sender.closed().await;
    }
}
