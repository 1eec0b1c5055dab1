//! The event and control engine
//!
//! One [`Engine`] owns the service registry and runs the poll cycle:
//!
//! ```text
//! poll_cycle
//!   ├─ replay_queue            retry partially delivered events
//!   ├─ scheduled actions       only when an action was requested
//!   ├─ for each service
//!   │    ├─ scheduled action   (skips the check when it succeeded)
//!   │    ├─ check_skip         visited in a cascade / `every N`
//!   │    ├─ check_timeout      restart-rate rules
//!   │    └─ check_service      probe + checks → post → dispatch → control
//!   └─ reset_depend            clear the traversal sets
//! ```
//!
//! The engine is not shared; [`crate::actors::engine::EngineActor`] owns it
//! and serialises external requests between cycles.

mod control;
mod dispatch;

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::action::{ActionKind, ActionPair};
use crate::actors::messages::ServiceStatus;
use crate::alerts::Alerter;
use crate::check::CheckContext;
use crate::event::{EventKind, EventState};
use crate::monitors::process::{PidFileProbe, ProcessInfo, ProcessProbe};
use crate::remote::{RemotePayload, RemoteStatusTransport};
use crate::service::{MonitorState, Registry, ServiceId, ServiceKind};
use crate::spawn::{CommandSpawner, Spawner};
use crate::storage::EventQueue;
use crate::transport::DeliveryFlags;

pub struct Engine {
    registry: Registry,
    host: String,

    alerter: Option<Alerter>,
    remote: Option<Arc<dyn RemoteStatusTransport>>,
    /// Send the full status to the collector after every cycle
    remote_status: bool,
    spawner: Arc<dyn Spawner>,
    probe: Arc<dyn ProcessProbe>,
    queue: Option<EventQueue>,

    shutdown: CancellationToken,

    /// Transports that failed during the current cycle
    cycle_failures: DeliveryFlags,
    /// Whether the queue directory may hold records worth a scan
    replay_pending: bool,

    /// Start-side traversal marks
    visited: HashSet<ServiceId>,
    /// Stop-side traversal marks
    depend_visited: HashSet<ServiceId>,

    /// Some service has a pending action
    action_pending: bool,

    instance_start: Arc<ActionPair>,
    instance_stop: Arc<ActionPair>,
}

fn default_host() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string())
}

impl Engine {
    pub fn new(registry: Registry, shutdown: CancellationToken) -> Self {
        Self {
            registry,
            host: default_host(),
            alerter: None,
            remote: None,
            remote_status: false,
            spawner: Arc::new(CommandSpawner),
            probe: Arc::new(PidFileProbe::new()),
            queue: None,
            shutdown,
            cycle_failures: DeliveryFlags::NONE,
            replay_pending: true,
            visited: HashSet::new(),
            depend_visited: HashSet::new(),
            action_pending: false,
            instance_start: Arc::new(ActionPair::alert()),
            instance_stop: Arc::new(ActionPair::alert()),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_alerter(mut self, alerter: Alerter) -> Self {
        self.alerter = Some(alerter);
        self
    }

    pub fn with_remote(
        mut self,
        remote: Arc<dyn RemoteStatusTransport>,
        send_status: bool,
    ) -> Self {
        self.remote = Some(remote);
        self.remote_status = send_status;
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn ProcessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_queue(mut self, queue: EventQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Transports that failed during the current (or last) cycle
    pub fn cycle_failures(&self) -> DeliveryFlags {
        self.cycle_failures
    }

    pub fn status(&self) -> Vec<ServiceStatus> {
        self.registry.iter().map(ServiceStatus::from).collect()
    }

    /// Store an ad-hoc action to run at the start of the next cycle
    pub fn request_action(&mut self, name: &str, action: ActionKind) -> bool {
        if action == ActionKind::Ignore {
            error!("service '{name}' -- invalid action {action}");
            return false;
        }
        let Some(id) = self.registry.lookup(name) else {
            error!("service '{name}' -- doesn't exist");
            return false;
        };

        debug!("'{name}' {action} action scheduled");
        self.registry.get_mut(id).pending_action = Some(action);
        self.action_pending = true;
        true
    }

    /// Probe the process of a process service, `None` when not running
    fn probe_process(&self, id: ServiceId) -> Option<ProcessInfo> {
        let service = self.registry.get(id);
        let pidfile = service.pidfile.as_deref()?;
        self.probe.probe(&service.name, pidfile)
    }

    fn is_running(&self, id: ServiceId) -> bool {
        self.probe_process(id).is_some()
    }

    /// Run one full poll cycle
    #[instrument(skip(self), fields(services = self.registry.len()))]
    pub async fn poll_cycle(&mut self) {
        self.cycle_failures = DeliveryFlags::NONE;
        self.replay_queue().await;

        if self.action_pending {
            self.action_pending = false;
            for id in self.registry.ids() {
                self.do_scheduled_action(id).await;
            }
        }

        for id in self.registry.ids() {
            if self.shutdown.is_cancelled() {
                debug!("shutdown requested, cycle aborted");
                break;
            }

            if self.do_scheduled_action(id).await
                || !self.registry.get(id).is_monitored()
                || self.check_skip(id)
            {
                continue;
            }

            // restart-rate rules may disable monitoring
            self.check_timeout(id).await;
            if !self.registry.get(id).is_monitored() {
                continue;
            }

            self.check_service(id).await;

            let service = self.registry.get_mut(id);
            if service.monitor != MonitorState::Disabled {
                service.monitor = MonitorState::Enabled;
            }
        }

        self.reset_depend();

        if self.remote_status {
            self.send_status().await;
        }
    }

    /// Clear the traversal sets of the current cycle
    pub fn reset_depend(&mut self) {
        self.visited.clear();
        self.depend_visited.clear();
    }

    /// Run and clear the pending action of a service
    ///
    /// Returns whether the control action succeeded.
    async fn do_scheduled_action(&mut self, id: ServiceId) -> bool {
        let Some(action) = self.registry.get(id).pending_action else {
            return false;
        };

        let name = self.registry.get(id).name.clone();
        let done = self.control(&name, action).await;

        let rule = self.registry.get(id).action_rule.clone();
        self.post(
            id,
            EventKind::Action,
            EventState::Changed,
            &rule,
            Some(format!("{action} action done")),
        )
        .await;

        self.registry.get_mut(id).pending_action = None;
        done
    }

    /// Whether the service's check should be skipped this cycle
    fn check_skip(&mut self, id: ServiceId) -> bool {
        let skip_visited = self.visited.contains(&id);
        let service = self.registry.get_mut(id);

        if skip_visited {
            debug!(
                "'{}' check skipped -- service already handled in a dependency chain",
                service.name
            );
            return true;
        }

        if service.every <= 1 {
            return false;
        }

        service.nevery += 1;
        if service.nevery < service.every {
            return true;
        }
        service.nevery = 0;
        false
    }

    /// Evaluate the restart-rate rules of a service
    async fn check_timeout(&mut self, id: ServiceId) {
        let service = self.registry.get_mut(id);
        if service.restart_limits.is_empty() {
            return;
        }

        if service.nstart > 0 {
            service.ncycle += 1;
        }

        let (nstart, ncycle) = (service.nstart, service.ncycle);
        let limits = service.restart_limits.clone();
        let max = limits.iter().map(|limit| limit.cycles).max().unwrap_or(0);

        for limit in &limits {
            if nstart >= limit.count && ncycle <= limit.cycles {
                let message = format!(
                    "service restarted {nstart} times within {ncycle} cycle(s) - {}",
                    limit.rule.failed.kind
                );
                self.post(
                    id,
                    EventKind::Timeout,
                    EventState::Failed,
                    &limit.rule,
                    Some(message),
                )
                .await;
            }
        }

        let service = self.registry.get_mut(id);
        if service.ncycle > max {
            service.ncycle = 0;
            service.nstart = 0;
        }
    }

    /// Run the built-in process probe and every bound check of a service
    async fn check_service(&mut self, id: ServiceId) {
        if self.registry.get(id).kind == ServiceKind::Process {
            let info = self.probe_process(id);
            let rule = self.registry.get(id).nonexist_rule.clone();
            self.registry.get_mut(id).info = info.clone();

            match info {
                None => {
                    self.post(
                        id,
                        EventKind::Nonexist,
                        EventState::Failed,
                        &rule,
                        Some("process is not running".to_string()),
                    )
                    .await;
                    return;
                }
                Some(info) => {
                    self.post(
                        id,
                        EventKind::Nonexist,
                        EventState::Succeeded,
                        &rule,
                        Some(format!("process is running with pid {}", info.pid)),
                    )
                    .await;
                }
            }
        }

        let service = self.registry.get(id);
        let ctx = CheckContext::of(service);
        let checks = service.checks.clone();

        for bound in checks {
            let samples = bound.check.run(&ctx).await;
            for sample in samples {
                self.post(id, sample.kind, sample.state, &bound.rule, Some(sample.message))
                    .await;
            }
        }
    }

    /// Post an instance event on the first system service, if any
    pub async fn announce(&mut self, started: bool) {
        let Some(id) = self
            .registry
            .ids()
            .find(|id| self.registry.get(*id).kind == ServiceKind::System)
        else {
            return;
        };

        let (rule, message) = if started {
            (self.instance_start.clone(), "warden started")
        } else {
            (self.instance_stop.clone(), "warden stopped")
        };
        info!("{message}");
        self.post(
            id,
            EventKind::Instance,
            EventState::Changed,
            &rule,
            Some(message.to_string()),
        )
        .await;
    }

    async fn send_status(&mut self) {
        let Some(remote) = self.remote.clone() else {
            return;
        };
        let payload = RemotePayload::Status {
            host: self.host.clone(),
            services: self.status(),
        };
        if let Err(e) = remote.send(&payload).await {
            warn!("status message not delivered: {e}");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
