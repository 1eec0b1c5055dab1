//! JSON configuration of the daemon
//!
//! ```json
//! {
//!   "daemon": { "poll_interval": 30, "event_queue": { "directory": "/var/lib/warden/events", "slots": 100 } },
//!   "alert": { "via": { "discord": { "url": "https://discord.com/api/webhooks/..." } }, "recipients": [{ "name": "1234" }] },
//!   "services": [
//!     { "name": "db", "kind": "process", "pidfile": "/run/db.pid",
//!       "start": { "program": "/etc/init.d/db", "args": ["start"] },
//!       "stop": { "program": "/etc/init.d/db", "args": ["stop"] } },
//!     { "name": "web", "kind": "process", "pidfile": "/run/web.pid", "depends_on": ["db"],
//!       "restart_limits": [{ "count": 3, "cycles": 5, "action": "unmonitor" }] }
//!   ]
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::action::{Action, ActionKind, ActionPair, Command, Threshold};
use crate::alerts::{AlertTransport, Alerter, Recipient, Templates, WebhookTransport};
use crate::check::Check;
use crate::discord::DiscordTransport;
use crate::engine::Engine;
use crate::error::ConfigError;
use crate::event::{EventKind, EventKinds};
use crate::monitors::http::{HttpCheck, HttpMethod};
use crate::monitors::path::PathCheck;
use crate::remote::HttpCollector;
use crate::service::{
    BoundCheck, MonitorMode, MonitorState, Registry, RestartLimit, Service, ServiceKind,
};
use crate::storage::EventQueue;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,

    pub alert: Option<AlertConfig>,

    /// Remote status collector
    pub collector: Option<CollectorConfig>,

    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DaemonConfig {
    /// Seconds between two poll cycles
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// Host name used in notifications (defaults to the system host name)
    pub host: Option<String>,

    pub event_queue: Option<EventQueueConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            host: None,
            event_queue: None,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct EventQueueConfig {
    pub directory: PathBuf,
    /// Maximum number of queued records, unlimited when unset
    pub slots: Option<usize>,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alert {
    Discord(Discord),
    Webhook(Webhook),
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Webhook {
    pub url: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Discord {
    pub url: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AlertConfig {
    pub via: Alert,
    #[serde(default)]
    pub recipients: Vec<RecipientConfig>,
    pub subject: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RecipientConfig {
    pub name: String,
    /// Event kinds the recipient wants, all when unset
    pub events: Option<Vec<EventKind>>,
    pub reminder: Option<u64>,
}

impl From<&RecipientConfig> for Recipient {
    fn from(config: &RecipientConfig) -> Self {
        Recipient {
            name: config.name.clone(),
            events: config
                .events
                .as_ref()
                .map(|kinds| kinds.iter().copied().collect())
                .unwrap_or(EventKinds::ALL),
            reminder: config.reminder,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CollectorConfig {
    /// Collector endpoints, tried in order until one accepts
    pub urls: Vec<String>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    pub token: Option<String>,
    /// Also send the full status after every cycle
    #[serde(default)]
    pub status: bool,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CommandConfig {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// Seconds to wait for a process to come up or go away
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl From<&CommandConfig> for Command {
    fn from(config: &CommandConfig) -> Self {
        Command {
            program: config.program.clone(),
            args: config.args.clone(),
            uid: config.uid,
            gid: config.gid,
            timeout: Duration::from_secs(config.timeout),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ActionConfig {
    pub action: ActionKind,
    pub exec: Option<CommandConfig>,
    #[serde(default = "default_count")]
    pub count: u8,
    #[serde(default = "default_count")]
    pub cycles: u8,
}

impl ActionConfig {
    fn alert() -> Self {
        Self {
            action: ActionKind::Alert,
            exec: None,
            count: 1,
            cycles: 1,
        }
    }

    fn resolve(&self, service: &str) -> Result<Action, ConfigError> {
        let threshold = Threshold::new(self.count, self.cycles)?;
        let action = match (self.action, &self.exec) {
            (ActionKind::Exec, Some(command)) => Action::exec(command.into()),
            (ActionKind::Exec, None) => return Err(ConfigError::MissingExec(service.to_string())),
            (kind, _) => Action::new(kind),
        };
        Ok(action.with_threshold(threshold))
    }
}

/// Built-in rules a service can override
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleTarget {
    Nonexist,
    Exec,
    Action,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RuleConfig {
    pub on: RuleTarget,
    #[serde(default = "ActionConfig::alert")]
    pub failed: ActionConfig,
    #[serde(default = "ActionConfig::alert")]
    pub succeeded: ActionConfig,
}

fn resolve_pair(
    service: &str,
    failed: &ActionConfig,
    succeeded: &ActionConfig,
) -> Result<Arc<ActionPair>, ConfigError> {
    Ok(Arc::new(ActionPair::new(
        failed.resolve(service)?,
        succeeded.resolve(service)?,
    )))
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RestartLimitConfig {
    pub count: u32,
    pub cycles: u32,
    #[serde(default = "default_limit_action")]
    pub action: ActionKind,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct HttpCheckConfig {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    pub expected_status: Option<Vec<u16>>,
    pub body_pattern: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "ActionConfig::alert")]
    pub failed: ActionConfig,
    #[serde(default = "ActionConfig::alert")]
    pub succeeded: ActionConfig,
}

impl HttpCheckConfig {
    fn build(&self) -> Result<HttpCheck, ConfigError> {
        let mut check = HttpCheck::new(&self.url, Duration::from_secs(self.timeout))?
            .method(self.method);
        if let Some(codes) = &self.expected_status {
            check = check.expect_status(codes.clone());
        }
        if let Some(pattern) = &self.body_pattern {
            let regex = Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
            check = check.body_pattern(regex);
        }
        Ok(check)
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub kind: ServiceKind,
    #[serde(default)]
    pub mode: MonitorMode,
    pub pidfile: Option<PathBuf>,
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub start: Option<CommandConfig>,
    pub stop: Option<CommandConfig>,
    /// Check only every N-th cycle
    #[serde(default = "default_every")]
    pub every: u32,
    #[serde(default)]
    pub restart_limits: Vec<RestartLimitConfig>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub http: Vec<HttpCheckConfig>,
    /// Recipients for this service only
    #[serde(default)]
    pub alert: Vec<RecipientConfig>,
}

impl ServiceConfig {
    fn resolve(&self) -> Result<Service, ConfigError> {
        if self.kind == ServiceKind::Process && self.pidfile.is_none() {
            return Err(ConfigError::MissingPidfile(self.name.clone()));
        }

        let mut service = Service::new(&self.name, self.kind);
        service.mode = self.mode;
        if self.mode == MonitorMode::Manual {
            service.monitor = MonitorState::Disabled;
        }
        service.pidfile = self.pidfile.clone();
        service.path = self.path.clone();
        service.depends_on = self.depends_on.clone();
        service.start = self.start.as_ref().map(Command::from);
        service.stop = self.stop.as_ref().map(Command::from);
        service.every = self.every.max(1);
        service.recipients = self.alert.iter().map(Recipient::from).collect();

        for rule in &self.rules {
            let pair = resolve_pair(&self.name, &rule.failed, &rule.succeeded)?;
            match rule.on {
                RuleTarget::Nonexist => service.nonexist_rule = pair,
                RuleTarget::Exec => service.exec_rule = pair,
                RuleTarget::Action => service.action_rule = pair,
            }
        }

        for limit in &self.restart_limits {
            if limit.count == 0 || limit.cycles == 0 {
                return Err(ConfigError::InvalidRestartLimit {
                    service: self.name.clone(),
                    count: limit.count,
                    cycles: limit.cycles,
                });
            }
            let action = ActionConfig {
                action: limit.action,
                exec: None,
                count: 1,
                cycles: 1,
            };
            service.restart_limits.push(RestartLimit {
                count: limit.count,
                cycles: limit.cycles,
                rule: resolve_pair(&self.name, &action, &ActionConfig::alert())?,
            });
        }

        if matches!(
            self.kind,
            ServiceKind::File | ServiceKind::Directory | ServiceKind::Fifo
        ) {
            service.checks.push(BoundCheck {
                check: Arc::new(PathCheck),
                rule: service.nonexist_rule.clone(),
            });
        }

        for http in &self.http {
            let check: Arc<dyn Check> = Arc::new(http.build()?);
            service.checks.push(BoundCheck {
                check,
                rule: resolve_pair(&self.name, &http.failed, &http.succeeded)?,
            });
        }

        trace!("resolved service {}: {service:?}", self.name);
        Ok(service)
    }
}

fn default_poll_interval() -> u64 {
    30
}

fn default_timeout() -> u64 {
    30
}

fn default_count() -> u8 {
    1
}

fn default_every() -> u32 {
    1
}

fn default_limit_action() -> ActionKind {
    ActionKind::Unmonitor
}

pub fn read_config_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let file_content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&file_content)?;
    trace!("loaded config: {config:?}");
    Ok(config)
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.daemon.poll_interval.max(1))
    }

    /// Validate the services and build the registry
    pub fn resolve(&self) -> Result<Registry, ConfigError> {
        let services = self
            .services
            .iter()
            .map(ServiceConfig::resolve)
            .collect::<Result<Vec<_>, _>>()?;
        Registry::new(services)
    }

    /// Wire up an engine with the configured transports and queue
    pub fn build_engine(&self, shutdown: CancellationToken) -> anyhow::Result<Engine> {
        let registry = self.resolve().context("invalid service configuration")?;
        let mut engine = Engine::new(registry, shutdown);
        if let Some(host) = &self.daemon.host {
            engine = engine.with_host(host);
        }
        let host = engine.host().to_string();

        if let Some(alert) = &self.alert {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(default_timeout()))
                .build()
                .context("failed to build HTTP client")?;
            let transport: Arc<dyn AlertTransport> = match &alert.via {
                Alert::Discord(discord) => Arc::new(DiscordTransport::new(client, &discord.url)),
                Alert::Webhook(webhook) => Arc::new(WebhookTransport::new(client, &webhook.url)),
            };

            let recipients = alert.recipients.iter().map(Recipient::from).collect();

            let mut templates = Templates::default();
            if let Some(subject) = &alert.subject {
                templates.subject = subject.clone();
            }
            if let Some(message) = &alert.message {
                templates.message = message.clone();
            }

            engine = engine.with_alerter(Alerter::new(recipients, templates, transport, &host));
        }

        if let Some(collector) = &self.collector {
            anyhow::ensure!(!collector.urls.is_empty(), "collector has no urls");
            let remote = HttpCollector::new(
                collector.urls.clone(),
                Duration::from_secs(collector.timeout),
                collector.token.clone(),
            )
            .context("failed to build collector client")?;
            engine = engine.with_remote(Arc::new(remote), collector.status);
        }

        if let Some(queue) = &self.daemon.event_queue {
            debug!("event queue in {}", queue.directory.display());
            engine = engine.with_queue(EventQueue::new(&queue.directory, queue.slots));
        }

        Ok(engine)
    }
}
