//! Dependency-aware service control
//!
//! Prerequisites are handled before the service itself; dependents are
//! cascaded around it:
//!
//! ```text
//! start    cascade(stop)  → start_recursive  → cascade(start)
//! stop     cascade(stop)  → stop_recursive   → cascade(unmonitor) → unmonitor_leaf
//! restart  cascade(stop)  → stop_recursive ─ ok ─→ start_recursive → cascade(start)
//!                                          └ timeout → monitor_set
//! monitor  monitor_recursive
//! unmonitor cascade(unmonitor) → unmonitor_leaf
//! ```
//!
//! `visited` guards the start side and `depend_visited` the stop side; both
//! stay set until the end of the poll cycle.

use std::collections::HashSet;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument};

use super::Engine;
use crate::action::{ActionKind, Command};
use crate::event::{EventKind, EventState};
use crate::monitors::process::ProcessInfo;
use crate::service::{MonitorState, ServiceId};
use crate::spawn::SpawnRequest;

/// Granularity of start/stop confirmation polling
const WAIT_GRANULE: Duration = Duration::from_secs(1);

impl Engine {
    /// Run a control action on a named service
    ///
    /// Returns `false` when the service is unknown, the action is not a
    /// control action, or a guard condition prevented it.
    #[instrument(skip(self))]
    pub async fn control(&mut self, name: &str, action: ActionKind) -> bool {
        let Some(id) = self.registry.lookup(name) else {
            error!("service '{name}' -- doesn't exist");
            return false;
        };
        let service = self.registry.get(id);
        let is_process = service.is_process();

        match action {
            ActionKind::Start => {
                if is_process {
                    if self.is_running(id) {
                        debug!("process already running -- process {name}");
                        self.registry.get_mut(id).monitor_set();
                        return true;
                    }
                    if self.registry.get(id).start.is_none() {
                        error!("start method not defined -- process {name}");
                        self.registry.get_mut(id).monitor_set();
                        return false;
                    }
                }
                self.cascade_from(id, ActionKind::Stop).await;
                self.start_recursive(id).await;
                self.cascade_from(id, ActionKind::Start).await;
            }

            ActionKind::Stop => {
                if is_process && service.stop.is_none() {
                    error!("stop method not defined -- process {name}");
                    self.registry.get_mut(id).monitor_unset();
                    return false;
                }
                self.cascade_from(id, ActionKind::Stop).await;
                self.stop_recursive(id).await;
                self.cascade_from(id, ActionKind::Unmonitor).await;
                self.unmonitor_leaf(id);
            }

            ActionKind::Restart => {
                if is_process && (service.start.is_none() || service.stop.is_none()) {
                    error!("start or stop method not defined -- process {name}");
                    self.registry.get_mut(id).monitor_set();
                    return false;
                }
                info!("'{name}' trying to restart");
                self.cascade_from(id, ActionKind::Stop).await;
                if self.stop_recursive(id).await {
                    self.start_recursive(id).await;
                    self.cascade_from(id, ActionKind::Start).await;
                } else {
                    // retried next cycle, up to the restart limits
                    self.registry.get_mut(id).monitor_set();
                }
            }

            ActionKind::Monitor => self.monitor_recursive(id),

            ActionKind::Unmonitor => {
                self.cascade_from(id, ActionKind::Unmonitor).await;
                self.unmonitor_leaf(id);
            }

            ActionKind::Ignore | ActionKind::Alert | ActionKind::Exec => {
                error!("service '{name}' -- invalid action {action}");
                return false;
            }
        }

        true
    }

    /// [`Engine::control`] with the action given by name
    pub async fn control_str(&mut self, name: &str, action: &str) -> bool {
        match action.parse::<ActionKind>() {
            Ok(kind) => self.control(name, kind).await,
            Err(_) => {
                error!("service '{name}' -- invalid action {action}");
                false
            }
        }
    }

    /// Start prerequisites first, then the service itself
    fn start_recursive(&mut self, id: ServiceId) -> BoxFuture<'_, ()> {
        async move {
            if !self.visited.insert(id) {
                return;
            }

            for prerequisite in self.registry.prerequisites(id).to_vec() {
                self.start_recursive(prerequisite).await;
            }

            let service = self.registry.get(id);
            let is_process = service.is_process();
            if let Some(command) = service.start.clone() {
                if !is_process || !self.is_running(id) {
                    info!("'{}' start: {}", service.name, command.display());
                    self.spawn_command(id, &command, "Started").await;
                    // only processes have a pidfile to watch
                    if is_process {
                        self.wait_for(id, true, command.timeout).await;
                    }
                }
            }

            self.registry.get_mut(id).monitor_set();
        }
        .boxed()
    }

    /// Stop a single service, returning `false` if it did not go away in time
    async fn stop_recursive(&mut self, id: ServiceId) -> bool {
        if !self.depend_visited.insert(id) {
            return true;
        }

        let service = self.registry.get_mut(id);
        if service.monitor != MonitorState::Disabled {
            service.monitor_disable();
            debug!("monitoring disabled -- service {}", service.name);
        }

        let is_process = service.is_process();
        if let Some(command) = service.stop.clone() {
            if !is_process || self.is_running(id) {
                info!("'{}' stop: {}", self.registry.get(id).name, command.display());
                self.spawn_command(id, &command, "Stopped").await;
                if is_process && !self.wait_for(id, false, command.timeout).await {
                    return false;
                }
            }
        }

        self.registry.get_mut(id).info = None;
        true
    }

    fn monitor_recursive(&mut self, id: ServiceId) {
        if !self.visited.insert(id) {
            return;
        }

        for prerequisite in self.registry.prerequisites(id).to_vec() {
            self.monitor_recursive(prerequisite);
        }

        self.registry.get_mut(id).monitor_set();
    }

    fn unmonitor_leaf(&mut self, id: ServiceId) {
        if !self.depend_visited.insert(id) {
            return;
        }
        self.registry.get_mut(id).monitor_unset();
    }

    async fn cascade_from(&mut self, id: ServiceId, action: ActionKind) {
        let mut expanded = HashSet::new();
        self.cascade(id, action, &mut expanded).await;
    }

    /// Apply `action` to every service depending on `id`
    ///
    /// Start and monitor reach a dependent before its own dependents; stop and
    /// unmonitor reach it after them. `expanded` keeps dependency cycles
    /// from recursing forever.
    fn cascade<'a>(
        &'a mut self,
        id: ServiceId,
        action: ActionKind,
        expanded: &'a mut HashSet<ServiceId>,
    ) -> BoxFuture<'a, ()> {
        async move {
            if !expanded.insert(id) {
                return;
            }

            for child in self.registry.dependents(id).to_vec() {
                match action {
                    ActionKind::Start => self.start_recursive(child).await,
                    ActionKind::Monitor => self.monitor_recursive(child),
                    _ => {}
                }

                self.cascade(child, action, expanded).await;

                match action {
                    ActionKind::Stop => {
                        self.stop_recursive(child).await;
                    }
                    ActionKind::Unmonitor => self.unmonitor_leaf(child),
                    _ => {}
                }
            }
        }
        .boxed()
    }

    /// Poll the process until it reaches the wanted state, the command
    /// timeout passes, or shutdown is requested
    ///
    /// Posts the outcome as an exec event and returns whether the state was reached.
    async fn wait_for(&mut self, id: ServiceId, running: bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut is_running = !running;

        while Instant::now() < deadline && !self.shutdown.is_cancelled() {
            is_running = self.is_running(id);
            if is_running == running {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(WAIT_GRANULE) => {}
                _ = self.shutdown.cancelled() => break,
            }
        }

        let reached = is_running == running;
        let (state, message) = match (running, reached) {
            (true, true) => (EventState::Succeeded, "started"),
            (true, false) => (EventState::Failed, "failed to start"),
            (false, true) => (EventState::Succeeded, "stopped"),
            (false, false) => (EventState::Failed, "failed to stop"),
        };

        let rule = self.registry.get(id).exec_rule.clone();
        self.post(id, EventKind::Exec, state, &rule, Some(message.to_string()))
            .await;
        reached
    }

    /// Process context exported to spawned commands of process services
    pub(crate) fn spawn_process_info(&self, id: ServiceId) -> Option<ProcessInfo> {
        if !self.registry.get(id).is_process() {
            return None;
        }
        Some(self.probe_process(id).unwrap_or_default())
    }

    async fn spawn_command(&mut self, id: ServiceId, command: &Command, label: &str) {
        let request = SpawnRequest {
            service: self.registry.get(id).name.clone(),
            host: self.host.clone(),
            event: label.to_string(),
            description: label.to_string(),
            process: self.spawn_process_info(id),
        };

        if let Err(e) = self.spawner.spawn(command, &request).await {
            debug!("'{}' {} command not run: {e}", request.service, label.to_lowercase());
        }
    }
}
