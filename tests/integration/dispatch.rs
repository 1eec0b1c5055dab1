//! Poll cycles end to end: probe → event → notification → control

use std::sync::Arc;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use warden::{
    action::{Action, ActionKind, ActionPair, Command},
    alerts::Recipient,
    event::{EventKind, EventState},
    service::{BoundCheck, MonitorMode, MonitorState, RestartLimit, Service, ServiceKind},
    storage::EventQueue,
    transport::DeliveryFlags,
};

use crate::helpers::*;

fn host_with(check: Arc<FixedCheck>) -> Service {
    host_named("site", check)
}

fn host_named(name: &str, check: Arc<FixedCheck>) -> Service {
    let mut host = Service::new(name, ServiceKind::Host);
    host.checks.push(BoundCheck {
        check,
        rule: Arc::new(ActionPair::alert()),
    });
    host
}

fn failing_check() -> Arc<FixedCheck> {
    Arc::new(FixedCheck::new(EventKind::Connection, EventState::Failed))
}

#[tokio::test]
async fn test_dead_process_is_restarted_and_recovers() {
    let harness = Harness::new();
    let alert = Arc::new(FakeAlert::default());
    let mut engine = harness
        .engine(vec![process("web", &[])])
        .with_alerter(alerter(alert.clone()));

    engine.poll_cycle().await;

    // nothing to stop, the process was already gone
    assert_eq!(harness.spawner.calls(), vec!["start web"]);
    let web = engine.registry().by_name("web").unwrap();
    assert_eq!(web.monitor, MonitorState::Enabled);
    assert!(web.error.contains(EventKind::Nonexist));
    let sent = alert.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].event.kind, EventKind::Nonexist);
    assert_eq!(sent[0].event.state, EventState::Failed);
    assert_eq!(sent[0].event.action, ActionKind::Restart);

    engine.poll_cycle().await;

    let web = engine.registry().by_name("web").unwrap();
    assert!(!web.error.contains(EventKind::Nonexist));
    let sent = alert.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].event.state, EventState::Succeeded);
    assert_eq!(harness.spawner.calls().len(), 1);
}

#[tokio::test]
async fn test_passive_service_is_only_alerted() {
    let harness = Harness::new();
    let alert = Arc::new(FakeAlert::default());
    let mut web = process("web", &[]);
    web.mode = MonitorMode::Passive;
    let mut engine = harness
        .engine(vec![web])
        .with_alerter(alerter(alert.clone()));

    engine.poll_cycle().await;

    assert!(harness.spawner.calls().is_empty());
    let sent = alert.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].event.action, ActionKind::Alert);
    assert_eq!(sent[0].event.mode, MonitorMode::Passive);
}

#[tokio::test]
async fn test_undelivered_alert_is_queued_and_replayed() {
    let dir = tempfile::tempdir().unwrap();
    let queue_dir = dir.path().join("events");
    let harness = Harness::new();
    let alert = Arc::new(FakeAlert::failing(1));
    let check = Arc::new(FixedCheck::new(EventKind::Connection, EventState::Failed));
    let mut engine = harness
        .engine(vec![host_with(check.clone())])
        .with_alerter(alerter(alert.clone()))
        .with_queue(EventQueue::new(&queue_dir, None));

    engine.poll_cycle().await;

    assert!(alert.sent().is_empty());
    assert!(engine.cycle_failures().contains(DeliveryFlags::ALERT));
    let reader = EventQueue::new(&queue_dir, None);
    let pending = reader.pending().unwrap();
    assert_eq!(pending.len(), 1);
    let queued = reader.load(&pending[0]).unwrap();
    assert_eq!(queued.delivery, DeliveryFlags::ALERT);
    assert_eq!(queued.kind, EventKind::Connection);
    assert!(queued.state_changed);

    engine.poll_cycle().await;

    // replayed once; the still failing check is no news
    let sent = alert.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].event.source, "site");
    assert!(reader.pending().unwrap().is_empty());
    assert_eq!(check.runs(), 2);
}

#[tokio::test]
async fn test_event_owing_nothing_is_not_queued_after_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    let queue_dir = dir.path().join("events");
    let harness = Harness::new();
    let alert = Arc::new(FakeAlert::default());
    let (a, b) = (failing_check(), failing_check());
    let mut engine = harness
        .engine(vec![host_named("a", a.clone()), host_named("b", b)])
        .with_alerter(alerter(alert.clone()))
        .with_queue(EventQueue::new(&queue_dir, None));

    engine.poll_cycle().await;
    assert_eq!(alert.sent().len(), 2);

    // "a" recovers but its alert fails; "b" is still failing, which is no news
    a.set_state(EventState::Succeeded);
    alert.fail_next(1);
    engine.poll_cycle().await;

    assert!(engine.cycle_failures().contains(DeliveryFlags::ALERT));
    let reader = EventQueue::new(&queue_dir, None);
    let pending = reader.pending().unwrap();
    assert_eq!(pending.len(), 1);
    let queued = reader.load(&pending[0]).unwrap();
    assert_eq!(queued.source, "a");
    assert_eq!(queued.state, EventState::Succeeded);
    assert_eq!(queued.delivery, DeliveryFlags::ALERT);

    engine.poll_cycle().await;
    assert!(reader.pending().unwrap().is_empty());
    assert_eq!(alert.sent().len(), 3);
}

#[tokio::test]
async fn test_partly_delivered_event_keeps_only_the_owed_transport() {
    let dir = tempfile::tempdir().unwrap();
    let queue_dir = dir.path().join("events");
    let harness = Harness::new();
    let alert = Arc::new(FakeAlert::failing(1));
    let remote = Arc::new(FakeRemote::failing(2));
    let mut engine = harness
        .engine(vec![host_with(failing_check())])
        .with_alerter(alerter(alert.clone()))
        .with_remote(remote.clone(), false)
        .with_queue(EventQueue::new(&queue_dir, None));
    let reader = EventQueue::new(&queue_dir, None);

    engine.poll_cycle().await;
    let pending = reader.pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(
        reader.load(&pending[0]).unwrap().delivery,
        DeliveryFlags::ALERT | DeliveryFlags::REMOTE
    );

    // the alert goes through on replay, the collector is still down
    engine.poll_cycle().await;
    assert_eq!(alert.sent().len(), 1);
    assert!(remote.modes().is_empty());
    let pending = reader.pending().unwrap();
    assert_eq!(pending.len(), 1);
    let queued = reader.load(&pending[0]).unwrap();
    assert_eq!(queued.delivery, DeliveryFlags::REMOTE);

    engine.poll_cycle().await;
    assert!(reader.pending().unwrap().is_empty());
    assert_eq!(remote.modes(), vec!["event"]);
    assert_eq!(alert.sent().len(), 1);
}

#[tokio::test]
async fn test_replay_stops_while_the_alerter_is_down() {
    let dir = tempfile::tempdir().unwrap();
    let queue_dir = dir.path().join("events");
    let harness = Harness::new();
    let alert = Arc::new(FakeAlert::failing(2));
    let mut engine = harness
        .engine(vec![
            host_named("a", failing_check()),
            host_named("b", failing_check()),
        ])
        .with_alerter(alerter(alert.clone()))
        .with_queue(EventQueue::new(&queue_dir, None));
    let reader = EventQueue::new(&queue_dir, None);

    // "b" is queued without another attempt once the alerter failed for "a"
    engine.poll_cycle().await;
    assert_eq!(alert.attempts(), 1);
    assert_eq!(reader.pending().unwrap().len(), 2);

    // the first record fails again and the rest of the queue waits
    engine.poll_cycle().await;
    assert_eq!(alert.attempts(), 2);
    assert_eq!(reader.pending().unwrap().len(), 2);

    engine.poll_cycle().await;
    assert_eq!(alert.attempts(), 4);
    let sources: Vec<_> = alert.sent().iter().map(|n| n.event.source.clone()).collect();
    assert_eq!(sources, vec!["a", "b"]);
    assert!(reader.pending().unwrap().is_empty());
}

#[tokio::test]
async fn test_service_recipients_replace_global_ones() {
    let harness = Harness::new();
    let alert = Arc::new(FakeAlert::default());
    let mut quiet = host_named("quiet", failing_check());
    quiet.recipients.push(Recipient {
        name: "ops".to_string(),
        events: [EventKind::Timeout].into_iter().collect(),
        reminder: None,
    });
    let mut engine = harness
        .engine(vec![quiet, host_named("loud", failing_check())])
        .with_alerter(alerter(alert.clone()));

    engine.poll_cycle().await;

    let sent = alert.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, "ops");
    assert_eq!(sent[0].event.source, "loud");
}

#[tokio::test]
async fn test_undelivered_event_without_queue_is_dropped() {
    let harness = Harness::new();
    let alert = Arc::new(FakeAlert::failing(1));
    let check = Arc::new(FixedCheck::new(EventKind::Connection, EventState::Failed));
    let mut engine = harness
        .engine(vec![host_with(check)])
        .with_alerter(alerter(alert.clone()));

    engine.poll_cycle().await;
    engine.poll_cycle().await;

    assert!(alert.sent().is_empty());
    let site = engine.registry().by_name("site").unwrap();
    assert!(site.error.contains(EventKind::Connection));
}

#[tokio::test]
async fn test_collector_hears_transitions_only() {
    let harness = Harness::new();
    let remote = Arc::new(FakeRemote::default());
    let check = Arc::new(FixedCheck::new(EventKind::Connection, EventState::Failed));
    let mut engine = harness
        .engine(vec![host_with(check.clone())])
        .with_remote(remote.clone(), false);

    engine.poll_cycle().await;
    engine.poll_cycle().await;
    assert_eq!(remote.modes(), vec!["event"]);

    check.set_state(EventState::Succeeded);
    engine.poll_cycle().await;
    assert_eq!(remote.modes(), vec!["event", "event"]);
}

#[tokio::test]
async fn test_collector_status_after_every_cycle() {
    let harness = Harness::new();
    let remote = Arc::new(FakeRemote::default());
    let check = Arc::new(FixedCheck::new(EventKind::Connection, EventState::Failed));
    let mut engine = harness
        .engine(vec![host_with(check)])
        .with_remote(remote.clone(), true);

    engine.poll_cycle().await;
    engine.poll_cycle().await;

    assert_eq!(remote.modes(), vec!["event", "status", "status"]);
}

#[tokio::test(start_paused = true)]
async fn test_restart_limit_unmonitors_a_flapping_process() {
    let harness = Harness::new();
    harness.spawner.make_stubborn("web");
    let alert = Arc::new(FakeAlert::default());
    let mut web = process("web", &[]);
    web.restart_limits.push(RestartLimit {
        count: 2,
        cycles: 3,
        rule: Arc::new(ActionPair::new(
            Action::new(ActionKind::Unmonitor),
            Action::new(ActionKind::Alert),
        )),
    });
    let mut engine = harness
        .engine(vec![web])
        .with_alerter(alerter(alert.clone()));

    for _ in 0..3 {
        engine.poll_cycle().await;
    }

    assert_eq!(harness.spawner.calls(), vec!["start web", "start web"]);
    let web = engine.registry().by_name("web").unwrap();
    assert_eq!(web.monitor, MonitorState::Disabled);
    assert!(web.events.is_empty());

    let sent = alert.sent();
    let timeout = sent
        .iter()
        .find(|n| n.event.kind == EventKind::Timeout)
        .expect("timeout alert");
    assert_matches!(
        timeout.event.message.as_deref(),
        Some(message) if message.starts_with("service restarted 2 times within 2 cycle(s)")
    );
    assert_eq!(timeout.event.action, ActionKind::Unmonitor);
    assert!(sent.iter().any(|n| n.event.message.as_deref() == Some("failed to start")));

    engine.poll_cycle().await;
    assert_eq!(harness.spawner.calls().len(), 2);
}

#[tokio::test]
async fn test_scheduled_action_runs_and_is_reported() {
    let harness = Harness::new();
    harness.probe.set_running("web", true);
    let alert = Arc::new(FakeAlert::default());
    let mut engine = harness
        .engine(vec![process("web", &[])])
        .with_alerter(alerter(alert.clone()));

    assert!(engine.request_action("web", ActionKind::Stop));
    engine.poll_cycle().await;

    assert_eq!(harness.spawner.calls(), vec!["stop web"]);
    let web = engine.registry().by_name("web").unwrap();
    assert_eq!(web.monitor, MonitorState::Disabled);
    assert_eq!(web.pending_action, None);
    assert!(web.error.is_empty());

    let sent = alert.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].event.kind, EventKind::Action);
    assert_eq!(sent[0].event.message.as_deref(), Some("stop action done"));

    engine.poll_cycle().await;
    assert_eq!(harness.spawner.calls().len(), 1);
}

#[tokio::test]
async fn test_exec_action_runs_the_command_without_control() {
    let harness = Harness::new();
    let alert = Arc::new(FakeAlert::default());
    let mut site = Service::new("site", ServiceKind::Host);
    site.checks.push(BoundCheck {
        check: failing_check(),
        rule: Arc::new(ActionPair::new(
            Action::exec(Command::new("/usr/local/bin/notify")),
            Action::new(ActionKind::Alert),
        )),
    });
    let mut broken = Service::new("broken", ServiceKind::Host);
    broken.checks.push(BoundCheck {
        check: failing_check(),
        rule: Arc::new(ActionPair::new(
            Action::exec(Command::new("/usr/local/bin/missing")),
            Action::new(ActionKind::Alert),
        )),
    });
    let mut engine = harness
        .engine(vec![site, broken])
        .with_alerter(alerter(alert.clone()));

    engine.poll_cycle().await;

    assert_eq!(
        harness.spawner.calls(),
        vec!["notify site", "missing broken"]
    );
    let request = &harness.spawner.requests()[0];
    assert_eq!(request.host, "box");
    assert_eq!(request.description, "connection is failed");

    // a command that cannot run changes nothing else
    let broken = engine.registry().by_name("broken").unwrap();
    assert_eq!(broken.monitor, MonitorState::Enabled);
    assert!(broken.error.contains(EventKind::Connection));
    assert_eq!(alert.sent().len(), 2);
}

#[tokio::test]
async fn test_check_runs_every_third_cycle() {
    let harness = Harness::new();
    let check = Arc::new(FixedCheck::new(EventKind::Connection, EventState::Succeeded));
    let mut site = host_with(check.clone());
    site.every = 3;
    let mut engine = harness.engine(vec![site]);

    for _ in 0..6 {
        engine.poll_cycle().await;
    }

    assert_eq!(check.runs(), 2);
}

#[tokio::test]
async fn test_dependent_restarted_in_a_chain_is_not_checked_again() {
    let harness = Harness::new();
    harness.probe.set_running("web", true);
    let mut engine = harness.engine(vec![process("db", &[]), process("web", &["db"])]);

    engine.poll_cycle().await;

    assert_eq!(
        harness.spawner.calls(),
        vec!["stop web", "start db", "start web"]
    );
    assert_eq!(monitor_of(&engine, "db"), MonitorState::Enabled);
    assert_eq!(monitor_of(&engine, "web"), MonitorState::Initializing);

    engine.poll_cycle().await;
    assert_eq!(monitor_of(&engine, "web"), MonitorState::Enabled);
    assert_eq!(harness.spawner.calls().len(), 3);
}

fn monitor_of(engine: &warden::Engine, name: &str) -> MonitorState {
    engine.registry().by_name(name).unwrap().monitor
}

#[tokio::test]
async fn test_startup_is_announced_on_the_system_service() {
    let harness = Harness::new();
    let alert = Arc::new(FakeAlert::default());
    let mut engine = harness
        .engine(vec![
            process("web", &[]),
            Service::new("box", ServiceKind::System),
        ])
        .with_alerter(alerter(alert.clone()));

    engine.announce(true).await;
    engine.announce(false).await;

    let sent = alert.sent();
    let messages: Vec<_> = sent
        .iter()
        .map(|n| (n.event.kind, n.event.source.as_str(), n.event.message.clone()))
        .collect();
    assert_eq!(
        messages,
        vec![
            (EventKind::Instance, "box", Some("warden started".to_string())),
            (EventKind::Instance, "box", Some("warden stopped".to_string())),
        ]
    );
    assert!(harness.spawner.calls().is_empty());
}
