//! Event posting and notification fan-out

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, error, info, instrument, warn};

use super::Engine;
use crate::action::{Action, ActionKind, ActionPair};
use crate::alerts::Recipient;
use crate::event::{Event, EventKind, EventSnapshot, EventState};
use crate::remote::RemotePayload;
use crate::service::{MonitorMode, ServiceId};
use crate::spawn::SpawnRequest;
use crate::storage::record::RECORD_VERSION;
use crate::storage::StorageError;
use crate::transport::DeliveryFlags;

impl Engine {
    /// Record a raw sample for the rule/kind pair of a service and handle it
    ///
    /// Success-like samples never create an event; there is nothing to
    /// recover from before the first failure.
    pub(crate) fn post<'a>(
        &'a mut self,
        id: ServiceId,
        kind: EventKind,
        state: EventState,
        rule: &Arc<ActionPair>,
        message: Option<String>,
    ) -> BoxFuture<'a, ()> {
        let rule = rule.clone();
        async move {
            let service = self.registry.get_mut(id);
            let index = match service.find_event(&rule, kind) {
                Some(index) => {
                    service.events[index].record(state, message);
                    index
                }
                None => {
                    if !state.is_failure_like() {
                        return;
                    }
                    let event = Event::new(
                        kind,
                        rule.clone(),
                        &service.name,
                        service.kind,
                        service.mode,
                        state,
                        message,
                    );
                    service.events.push(event);
                    service.events.len() - 1
                }
            };

            let errors = service.error;
            let event = &mut service.events[index];
            let changed = event.check_state(state, errors);
            event.apply(state, changed);

            self.handle_event(id, &rule, kind).await;
        }
        .boxed()
    }

    #[instrument(skip(self, rule), fields(service = %self.registry.get(id).name))]
    async fn handle_event(&mut self, id: ServiceId, rule: &Arc<ActionPair>, kind: EventKind) {
        let service = self.registry.get_mut(id);
        let Some(index) = service.find_event(rule, kind) else {
            return;
        };
        let event = &service.events[index];

        let success_like = matches!(event.state, EventState::Succeeded | EventState::ChangedNot);
        if !event.state_changed && (success_like || !event.state_map.latest_failed()) {
            return;
        }

        if let Some(message) = &event.message {
            if event.state != EventState::Init || event.state_map.latest_failed() {
                if success_like || kind.is_meta() {
                    info!("'{}' {message}", service.name);
                } else {
                    error!("'{}' {message}", service.name);
                }
            }
        }
        if event.state == EventState::Init {
            return;
        }

        let action = match event.state {
            EventState::Failed | EventState::Changed => {
                let action = event.rule.failed.clone();
                if !kind.is_meta() {
                    service.error.insert(kind);
                    if event.state == EventState::Changed {
                        service.error_hint.insert(kind);
                    } else {
                        service.error_hint.remove(kind);
                    }
                }
                action
            }
            _ => {
                let action = event.rule.succeeded.clone();
                service.error.remove(kind);
                action
            }
        };

        self.invoke_action(id, index, &action).await;

        // a control action may have dropped the event list
        let service = self.registry.get_mut(id);
        if let Some(index) = service.find_event(rule, kind) {
            service.events[index].state_changed = false;
        }
    }

    async fn invoke_action(&mut self, id: ServiceId, index: usize, action: &Action) {
        let event = &mut self.registry.get_mut(id).events[index];
        event.delivery = DeliveryFlags::NONE;
        if action.kind == ActionKind::Ignore {
            return;
        }

        let snapshot = event.snapshot();
        let mut owed = DeliveryFlags::NONE;
        if !self.deliver(&snapshot, DeliveryFlags::REMOTE).await {
            owed.insert(DeliveryFlags::REMOTE);
        }
        if !self.deliver(&snapshot, DeliveryFlags::ALERT).await {
            owed.insert(DeliveryFlags::ALERT);
        }

        let service = self.registry.get_mut(id);
        let name = service.name.clone();
        let event = &mut service.events[index];
        event.delivery = owed;

        if !owed.is_empty() {
            let snapshot = event.snapshot();
            match self.queue.as_mut() {
                Some(queue) => match queue.add(&snapshot) {
                    Ok(_) => self.replay_pending = true,
                    Err(e) => error!("'{name}' event not queued: {e}"),
                },
                None => error!("'{name}' aborting event"),
            }
        }

        if action.kind == ActionKind::Alert || snapshot.kind == EventKind::Instance {
            return;
        }

        if action.kind == ActionKind::Exec {
            let Some(command) = &action.exec else {
                error!("'{name}' exec action without a command");
                return;
            };
            info!("'{name}' exec: {}", command.display());
            let request = SpawnRequest {
                service: name,
                host: self.host.clone(),
                event: snapshot.description().to_string(),
                description: snapshot
                    .message
                    .clone()
                    .unwrap_or_else(|| snapshot.description().to_string()),
                process: self.spawn_process_info(id),
            };
            if let Err(e) = self.spawner.spawn(command, &request).await {
                debug!("'{}' exec command not run: {e}", request.service);
            }
            return;
        }

        let service = self.registry.get_mut(id);
        if !service.restart_limits.is_empty()
            && matches!(action.kind, ActionKind::Start | ActionKind::Restart)
        {
            service.nstart += 1;
        }

        if service.mode == MonitorMode::Passive && action.kind.is_passive_restricted() {
            return;
        }

        self.control(&name, action.kind).await;
    }

    /// Whether `transport` has anything to deliver for this event
    ///
    /// The collector only hears about transitions; the alerter only owes
    /// something when a recipient of the event's service wants it.
    fn owes(&self, event: &EventSnapshot, transport: DeliveryFlags) -> bool {
        if transport == DeliveryFlags::ALERT {
            self.alerter
                .as_ref()
                .is_some_and(|alerter| alerter.is_wanted(event, self.local_recipients(event)))
        } else {
            self.remote.is_some() && event.state_changed
        }
    }

    /// Recipients configured on the service the event belongs to
    fn local_recipients(&self, event: &EventSnapshot) -> &[Recipient] {
        self.registry
            .by_name(&event.source)
            .map(|service| service.recipients.as_slice())
            .unwrap_or_default()
    }

    /// Attempt one transport, returning whether nothing more is owed to it
    ///
    /// A transport that already failed in this cycle is not tried again.
    async fn deliver(&mut self, event: &EventSnapshot, transport: DeliveryFlags) -> bool {
        if !self.owes(event, transport) {
            return true;
        }
        if self.cycle_failures.contains(transport) {
            return false;
        }

        let result = match (&self.alerter, &self.remote) {
            (Some(alerter), _) if transport == DeliveryFlags::ALERT => {
                alerter.deliver(event, self.local_recipients(event)).await
            }
            (_, Some(remote)) if transport == DeliveryFlags::REMOTE => {
                let payload = RemotePayload::Event {
                    host: self.host.clone(),
                    event: event.clone(),
                };
                remote.send(&payload).await
            }
            _ => return true,
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("{transport:?} delivery failed: {e}");
                self.cycle_failures.insert(transport);
                false
            }
        }
    }

    /// Whether every configured transport has failed in this cycle
    fn transports_down(&self) -> bool {
        let failed = |transport| self.cycle_failures.contains(transport);
        let alert_down = self.alerter.is_none() || failed(DeliveryFlags::ALERT);
        let remote_down = self.remote.is_none() || failed(DeliveryFlags::REMOTE);
        (self.alerter.is_some() || self.remote.is_some()) && alert_down && remote_down
    }

    /// Retry deliveries of partially handled events
    #[instrument(skip(self))]
    pub(crate) async fn replay_queue(&mut self) {
        if !self.replay_pending {
            return;
        }
        let Some(queue) = &self.queue else {
            return;
        };

        let files = match queue.pending() {
            Ok(files) => files,
            Err(e) => {
                error!("cannot scan the event queue: {e}");
                return;
            }
        };
        if files.is_empty() {
            self.replay_pending = false;
            return;
        }
        debug!("processing postponed events queue");

        let mut remaining = 0;
        for path in files {
            if self.transports_down() {
                remaining += 1;
                break;
            }

            let Some(queue) = &self.queue else {
                return;
            };
            let mut event = match queue.load(&path) {
                Ok(event) => event,
                Err(StorageError::Version { found, .. }) => {
                    error!(
                        "aborting queued event {} - incompatible data format version {found} (expected {RECORD_VERSION})",
                        path.display()
                    );
                    continue;
                }
                Err(e) => {
                    error!("skipping queued event {}: {e}", path.display());
                    continue;
                }
            };
            debug!("processing queued event {}", path.display());

            let mut passed = 0;
            for transport in [DeliveryFlags::ALERT, DeliveryFlags::REMOTE] {
                if !event.delivery.contains(transport) || self.cycle_failures.contains(transport) {
                    continue;
                }
                if self.deliver(&event, transport).await {
                    event.delivery.remove(transport);
                    passed += 1;
                } else {
                    error!("{transport:?} handler failed, retry scheduled for next cycle");
                }
            }

            let Some(queue) = &self.queue else {
                return;
            };
            if event.delivery.is_empty() {
                if let Err(e) = queue.remove(&path) {
                    error!("cannot remove queued event: {e}");
                }
            } else {
                remaining += 1;
                if passed > 0 {
                    if let Err(e) = queue.update(&path, &event) {
                        error!("cannot update queued event: {e}");
                    }
                }
            }
        }

        self.replay_pending = remaining > 0;
    }
}
