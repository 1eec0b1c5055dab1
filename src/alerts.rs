//! Alert notifications
//!
//! The [`Alerter`] decides which recipients are interested in an event,
//! renders subject and message from the configured templates and hands one
//! [`Notification`] per recipient to an [`AlertTransport`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, error, info, instrument};

use crate::error::TransportError;
use crate::event::{EventKinds, EventSnapshot, EventState};

pub const DEFAULT_SUBJECT: &str = "warden alert -- $EVENT $SERVICE";

pub const DEFAULT_MESSAGE: &str = "$EVENT Service $SERVICE \n\n\
\tDate:        $DATE\n\
\tAction:      $ACTION\n\
\tHost:        $HOST\n\
\tDescription: $DESCRIPTION\n\n\
Your faithful employee,\nwarden\n";

/// A rendered alert for one recipient
#[derive(Debug, Clone)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub message: String,
    pub event: EventSnapshot,
}

#[async_trait]
pub trait AlertTransport: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), TransportError>;
}

/// Someone who wants to hear about (some) events
#[derive(Debug, Clone)]
pub struct Recipient {
    pub name: String,
    pub events: EventKinds,
    /// Re-send every N cycles while the event is not succeeded
    pub reminder: Option<u64>,
}

impl Recipient {
    pub fn all(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            events: EventKinds::ALL,
            reminder: None,
        }
    }

    pub fn wants(&self, event: &EventSnapshot) -> bool {
        if !self.events.contains(event.kind) {
            return false;
        }
        if event.state_changed {
            return true;
        }
        match self.reminder {
            Some(reminder) if reminder > 0 => {
                event.state != EventState::Succeeded && event.count % reminder == 0
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Templates {
    pub subject: String,
    pub message: String,
}

impl Default for Templates {
    fn default() -> Self {
        Self {
            subject: DEFAULT_SUBJECT.to_string(),
            message: DEFAULT_MESSAGE.to_string(),
        }
    }
}

pub fn substitute(template: &str, event: &EventSnapshot, host: &str) -> String {
    template
        .replace("$SERVICE", &event.source)
        .replace("$EVENT", event.description())
        .replace("$DESCRIPTION", event.message.as_deref().unwrap_or_default())
        .replace("$ACTION", event.action.name())
        .replace("$DATE", &event.collected.to_rfc2822())
        .replace("$HOST", host)
}

pub struct Alerter {
    recipients: Vec<Recipient>,
    templates: Templates,
    transport: Arc<dyn AlertTransport>,
    host: String,
}

impl Alerter {
    pub fn new(
        recipients: Vec<Recipient>,
        templates: Templates,
        transport: Arc<dyn AlertTransport>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            recipients,
            templates,
            transport,
            host: host.into(),
        }
    }

    /// Recipients for a service: its own entries, then every global
    /// recipient the service does not override by name
    pub fn recipients<'a>(
        &'a self,
        local: &'a [Recipient],
    ) -> impl Iterator<Item = &'a Recipient> + 'a {
        let globals = self
            .recipients
            .iter()
            .filter(move |global| !local.iter().any(|own| own.name == global.name));
        local.iter().chain(globals)
    }

    /// Whether any recipient of the service wants this event
    pub fn is_wanted(&self, event: &EventSnapshot, local: &[Recipient]) -> bool {
        self.recipients(local).any(|recipient| recipient.wants(event))
    }

    /// Notify every interested recipient
    ///
    /// Succeeds when nobody is interested. Fails if any recipient could not be
    /// reached, so the event is retried for all interested recipients later.
    #[instrument(skip_all, fields(service = %event.source, event = %event.kind))]
    pub async fn deliver(
        &self,
        event: &EventSnapshot,
        local: &[Recipient],
    ) -> Result<(), TransportError> {
        let interested: Vec<&Recipient> = self
            .recipients(local)
            .filter(|recipient| recipient.wants(event))
            .collect();

        let mut failed = 0;
        for recipient in &interested {
            let notification = Notification {
                recipient: recipient.name.clone(),
                subject: substitute(&self.templates.subject, event, &self.host),
                message: substitute(&self.templates.message, event, &self.host),
                event: event.clone(),
            };

            debug!(
                "{} notification is sent to {}",
                event.description(),
                recipient.name
            );
            if let Err(e) = self.transport.send(&notification).await {
                error!("failed to notify {}: {e}", recipient.name);
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(TransportError::Recipients {
                failed,
                total: interested.len(),
            });
        }
        Ok(())
    }
}

/// Posts notifications as JSON to a generic webhook
#[derive(Debug, Clone)]
pub struct WebhookTransport {
    client: Client,
    url: String,
}

impl WebhookTransport {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl AlertTransport for WebhookTransport {
    #[instrument(skip_all, fields(url = %self.url))]
    async fn send(&self, notification: &Notification) -> Result<(), TransportError> {
        let event = &notification.event;
        let payload = json!({
            "recipient": notification.recipient,
            "subject": notification.subject,
            "message": notification.message,
            "service": event.source,
            "event": event.kind,
            "state": event.state,
            "action": event.action,
            "timestamp": Utc::now().to_rfc3339()
        });

        let response = self.client.post(&self.url).json(&payload).send().await?;
        if !response.status().is_success() {
            error!("webhook alert failed with status: {}", response.status());
            return Err(TransportError::Status(response.status()));
        }

        info!("successfully sent webhook alert");
        Ok(())
    }
}
