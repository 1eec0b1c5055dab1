//! Pluggable service checks
//!
//! A check inspects one aspect of a service and reports raw samples. The
//! engine posts every sample through the rule the check is bound to; the
//! debounce machinery decides what is worth reporting.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::event::{EventKind, EventState};
use crate::service::{Service, ServiceKind};

/// One raw pass/fail observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub kind: EventKind,
    pub state: EventState,
    pub message: String,
}

impl Sample {
    pub fn failed(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            state: EventState::Failed,
            message: message.into(),
        }
    }

    pub fn succeeded(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            state: EventState::Succeeded,
            message: message.into(),
        }
    }
}

/// What a check may know about the service it runs for
#[derive(Debug, Clone)]
pub struct CheckContext {
    pub service: String,
    pub kind: ServiceKind,
    pub path: Option<PathBuf>,
}

impl CheckContext {
    pub fn of(service: &Service) -> Self {
        Self {
            service: service.name.clone(),
            kind: service.kind,
            path: service.path.clone(),
        }
    }
}

#[async_trait]
pub trait Check: Send + Sync {
    fn name(&self) -> &str;

    /// Run the check once; I/O failures are reported as failed samples
    async fn run(&self, ctx: &CheckContext) -> Vec<Sample>;
}
