//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to the engine actor via mpsc
//! 2. **Snapshots**: Status replies are owned copies, never references into the registry

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::action::ActionKind;
use crate::event::{Event, EventKind, EventKinds, EventState};
use crate::monitors::process::ProcessInfo;
use crate::service::{MonitorMode, MonitorState, Service, ServiceKind};

/// Commands that can be sent to the EngineActor
#[derive(Debug)]
pub enum EngineCommand {
    /// Run a poll cycle now (bypassing the interval timer)
    PollNow { respond_to: oneshot::Sender<()> },

    /// Run a control action immediately, between two poll cycles
    Control {
        service: String,
        action: ActionKind,
        respond_to: oneshot::Sender<bool>,
    },

    /// Schedule an action for the start of the next poll cycle
    RequestAction {
        service: String,
        action: ActionKind,
        respond_to: oneshot::Sender<bool>,
    },

    /// Get a status snapshot of every service
    Status {
        respond_to: oneshot::Sender<Vec<ServiceStatus>>,
    },

    /// Gracefully shut down the engine actor
    ///
    /// The actor finishes the cycle in flight and then exits.
    Shutdown,
}

/// Summary of one live event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    pub kind: EventKind,
    pub state: EventState,
    pub count: u64,
    pub description: String,
    pub message: Option<String>,
}

impl From<&Event> for EventSummary {
    fn from(event: &Event) -> Self {
        Self {
            kind: event.kind,
            state: event.state,
            count: event.count,
            description: event.description().to_string(),
            message: event.message.clone(),
        }
    }
}

/// Status of one service, as rendered by the control interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub kind: ServiceKind,
    pub mode: MonitorMode,
    pub monitor: MonitorState,

    /// Error bitmap
    pub error: EventKinds,

    /// Error hint bitmap (set bits are "changed" rather than "failed")
    pub error_hint: EventKinds,

    /// Decoded names of the asserted error bits
    pub failing: Vec<EventKind>,

    pub pending_action: Option<ActionKind>,
    pub process: Option<ProcessInfo>,
    pub events: Vec<EventSummary>,
}

impl From<&Service> for ServiceStatus {
    fn from(service: &Service) -> Self {
        Self {
            name: service.name.clone(),
            kind: service.kind,
            mode: service.mode,
            monitor: service.monitor,
            error: service.error,
            error_hint: service.error_hint,
            failing: service.error.iter().collect(),
            pending_action: service.pending_action,
            process: service.info.clone(),
            events: service.events.iter().map(EventSummary::from).collect(),
        }
    }
}
