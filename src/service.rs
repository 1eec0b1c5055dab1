//! Service model and the service registry
//!
//! The registry owns every configured [`Service`] for the whole lifetime of
//! the daemon. Prerequisite and dependent edges are resolved once, when the
//! registry is built, so the orchestrator never has to look a name up while
//! walking the graph.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::action::{ActionKind, ActionPair, Command};
use crate::alerts::Recipient;
use crate::check::Check;
use crate::error::ConfigError;
use crate::event::{Event, EventKind, EventKinds};
use crate::monitors::process::ProcessInfo;

/// Index of a service inside the [`Registry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Process,
    File,
    Directory,
    Filesystem,
    Host,
    System,
    Fifo,
    Status,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceKind::Process => "process",
            ServiceKind::File => "file",
            ServiceKind::Directory => "directory",
            ServiceKind::Filesystem => "filesystem",
            ServiceKind::Host => "host",
            ServiceKind::System => "system",
            ServiceKind::Fifo => "fifo",
            ServiceKind::Status => "status",
        };
        f.write_str(name)
    }
}

/// How the daemon reacts to a service's failures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorMode {
    /// Failures trigger the configured control actions
    #[default]
    Active,
    /// Control actions are only reported, never executed
    Passive,
    /// Monitoring is only enabled by an explicit request
    Manual,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Disabled,
    #[default]
    Initializing,
    Enabled,
}

/// "N restarts within M cycles" rule
#[derive(Debug, Clone)]
pub struct RestartLimit {
    pub count: u32,
    pub cycles: u32,
    pub rule: Arc<ActionPair>,
}

/// A user-defined check bound to the rule its samples are posted through
#[derive(Clone)]
pub struct BoundCheck {
    pub check: Arc<dyn Check>,
    pub rule: Arc<ActionPair>,
}

impl fmt::Debug for BoundCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundCheck")
            .field("check", &self.check.name())
            .field("rule", &self.rule.id())
            .finish()
    }
}

#[derive(Debug)]
pub struct Service {
    pub name: String,
    pub kind: ServiceKind,
    pub mode: MonitorMode,
    pub monitor: MonitorState,

    /// Event kinds currently asserted (failed or changed)
    pub error: EventKinds,
    /// Set alongside `error` when the asserted state is "changed"
    pub error_hint: EventKinds,

    /// Ad-hoc action requested from outside the poll loop
    pub pending_action: Option<ActionKind>,

    pub depends_on: Vec<String>,
    pub events: Vec<Event>,

    /// Alert recipients of this service; they replace global recipients of
    /// the same name
    pub recipients: Vec<Recipient>,

    pub start: Option<Command>,
    pub stop: Option<Command>,

    pub restart_limits: Vec<RestartLimit>,
    pub nstart: u32,
    pub ncycle: u32,

    /// Check only every N-th cycle (1 = every cycle)
    pub every: u32,
    pub nevery: u32,

    pub pidfile: Option<PathBuf>,
    pub path: Option<PathBuf>,

    pub nonexist_rule: Arc<ActionPair>,
    pub exec_rule: Arc<ActionPair>,
    pub action_rule: Arc<ActionPair>,
    pub checks: Vec<BoundCheck>,

    /// Process snapshot from the last probe
    pub info: Option<ProcessInfo>,
}

impl Service {
    pub fn new(name: impl Into<String>, kind: ServiceKind) -> Self {
        let nonexist_rule = match kind {
            ServiceKind::Process => ActionPair::new(
                crate::action::Action::new(ActionKind::Restart),
                crate::action::Action::new(ActionKind::Alert),
            ),
            _ => ActionPair::alert(),
        };

        Self {
            name: name.into(),
            kind,
            mode: MonitorMode::Active,
            monitor: MonitorState::Initializing,
            error: EventKinds::EMPTY,
            error_hint: EventKinds::EMPTY,
            pending_action: None,
            depends_on: Vec::new(),
            events: Vec::new(),
            recipients: Vec::new(),
            start: None,
            stop: None,
            restart_limits: Vec::new(),
            nstart: 0,
            ncycle: 0,
            every: 1,
            nevery: 0,
            pidfile: None,
            path: None,
            nonexist_rule: Arc::new(nonexist_rule),
            exec_rule: Arc::new(ActionPair::alert()),
            action_rule: Arc::new(ActionPair::alert()),
            checks: Vec::new(),
            info: None,
        }
    }

    pub fn is_process(&self) -> bool {
        self.kind == ServiceKind::Process
    }

    pub fn is_monitored(&self) -> bool {
        self.monitor != MonitorState::Disabled
    }

    /// Disabled → initializing; no-op otherwise
    pub fn monitor_set(&mut self) {
        if self.monitor == MonitorState::Disabled {
            self.monitor = MonitorState::Initializing;
        }
    }

    /// Stop monitoring and forget everything the service has seen
    pub fn monitor_unset(&mut self) {
        self.monitor = MonitorState::Disabled;
        self.nstart = 0;
        self.ncycle = 0;
        self.error = EventKinds::EMPTY;
        self.error_hint = EventKinds::EMPTY;
        self.events.clear();
        self.info = None;
    }

    /// Stop acting on the service while keeping its history
    pub fn monitor_disable(&mut self) {
        self.monitor = MonitorState::Disabled;
    }

    pub fn find_event(&self, rule: &ActionPair, kind: EventKind) -> Option<usize> {
        self.events.iter().position(|event| event.matches(rule, kind))
    }
}

/// All configured services, in configuration order
#[derive(Debug, Default)]
pub struct Registry {
    services: Vec<Service>,
    index: HashMap<String, ServiceId>,
    prerequisites: Vec<Vec<ServiceId>>,
    dependents: Vec<Vec<ServiceId>>,
}

impl Registry {
    /// Build the registry, resolving every `depends_on` name
    pub fn new(services: Vec<Service>) -> Result<Self, ConfigError> {
        let mut index = HashMap::with_capacity(services.len());
        for (position, service) in services.iter().enumerate() {
            if index
                .insert(service.name.clone(), ServiceId(position))
                .is_some()
            {
                return Err(ConfigError::DuplicateService(service.name.clone()));
            }
        }

        let mut prerequisites = Vec::with_capacity(services.len());
        for service in &services {
            let mut resolved = Vec::with_capacity(service.depends_on.len());
            for dependency in &service.depends_on {
                let id = index
                    .get(dependency)
                    .copied()
                    .ok_or_else(|| ConfigError::UnknownDependency {
                        service: service.name.clone(),
                        dependency: dependency.clone(),
                    })?;
                resolved.push(id);
            }
            prerequisites.push(resolved);
        }

        // dependents keep registry order, which is the order a full scan would yield
        let mut dependents = vec![Vec::new(); services.len()];
        for (child, parents) in prerequisites.iter().enumerate() {
            for parent in parents {
                let list: &mut Vec<ServiceId> = &mut dependents[parent.0];
                if !list.contains(&ServiceId(child)) {
                    list.push(ServiceId(child));
                }
            }
        }

        Ok(Self {
            services,
            index,
            prerequisites,
            dependents,
        })
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ServiceId> + use<> {
        (0..self.services.len()).map(ServiceId)
    }

    pub fn lookup(&self, name: &str) -> Option<ServiceId> {
        self.index.get(name).copied()
    }

    pub fn get(&self, id: ServiceId) -> &Service {
        &self.services[id.0]
    }

    pub fn get_mut(&mut self, id: ServiceId) -> &mut Service {
        &mut self.services[id.0]
    }

    pub fn by_name(&self, name: &str) -> Option<&Service> {
        self.lookup(name).map(|id| self.get(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Service> {
        self.services.iter()
    }

    /// Services `id` depends on, in declaration order
    pub fn prerequisites(&self, id: ServiceId) -> &[ServiceId] {
        &self.prerequisites[id.0]
    }

    /// Services naming `id` as a prerequisite, in registry order
    pub fn dependents(&self, id: ServiceId) -> &[ServiceId] {
        &self.dependents[id.0]
    }
}
