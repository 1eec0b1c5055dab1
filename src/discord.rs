use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{error, info, instrument};

use crate::alerts::{AlertTransport, Notification};
use crate::error::TransportError;
use crate::event::EventState;

const RED: u32 = 15158332;
const ORANGE: u32 = 15105570;
const GREEN: u32 = 3066993;
const LIGHT_BLUE: u32 = 5793266;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

/// Sends notifications as Discord embeds through a channel webhook
///
/// Recipients that are numeric Discord user ids get mentioned.
#[derive(Debug, Clone)]
pub struct DiscordTransport {
    client: Client,
    url: String,
}

fn mention(recipient: &str) -> Option<String> {
    (!recipient.is_empty() && recipient.chars().all(|c| c.is_ascii_digit()))
        .then(|| format!("<@{recipient}>"))
}

impl DiscordTransport {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn build_message(&self, notification: &Notification) -> Message {
        let event = &notification.event;

        let (emoji, color) = match event.state {
            EventState::Failed | EventState::Init => ("🔴", RED),
            EventState::Changed => ("🟠", ORANGE),
            EventState::Succeeded => ("✅", GREEN),
            EventState::ChangedNot => ("ℹ️", LIGHT_BLUE),
        };

        let embed = Embed {
            title: Some(format!("{emoji} {}", notification.subject)),
            description: Some(notification.message.clone()),
            color: Some(color),
            fields: vec![
                EmbedField {
                    name: "Service".to_string(),
                    value: event.source.clone(),
                    inline: true,
                },
                EmbedField {
                    name: "Event".to_string(),
                    value: event.description().to_string(),
                    inline: true,
                },
                EmbedField {
                    name: "Action".to_string(),
                    value: event.action.to_string(),
                    inline: true,
                },
            ],
            footer: Some(EmbedFooter {
                text: format!("{} service | {}", event.service_kind, event.kind),
            }),
            timestamp: Some(event.collected.to_rfc3339()),
        };

        let mut builder = MessageBuilder::new().add_embed(embed);
        if let Some(mention) = mention(&notification.recipient) {
            builder = builder.content(format!("{emoji} `{}` {mention}", event.source));
        }
        builder.build()
    }
}

#[async_trait]
impl AlertTransport for DiscordTransport {
    #[instrument(skip_all, fields(recipient = %notification.recipient))]
    async fn send(&self, notification: &Notification) -> Result<(), TransportError> {
        let message = self.build_message(notification);
        let response = self.client.post(&self.url).json(&message).send().await?;

        let status = response.status();
        if !status.is_success() {
            error!("Discord message failed with status: {status}");
            if let Ok(error_text) = response.text().await {
                error!("Discord API error response: {error_text}");
            }
            return Err(TransportError::Status(status));
        }

        info!("successfully sent Discord message");
        Ok(())
    }
}
