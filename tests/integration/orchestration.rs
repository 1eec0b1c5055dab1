//! Dependency-aware control actions

use std::sync::Arc;

use pretty_assertions::assert_eq;
use warden::{
    action::ActionKind,
    event::EventKind,
    service::{MonitorState, ServiceKind},
};

use crate::helpers::*;

/// db ← web ← proxy
fn chain(harness: &Harness) -> warden::Engine {
    harness.engine(vec![
        process("db", &[]),
        process("web", &["db"]),
        process("proxy", &["web"]),
    ])
}

#[tokio::test]
async fn test_restart_stops_dependents_leaf_first_and_starts_them_root_first() {
    let harness = Harness::new();
    for name in ["db", "web", "proxy"] {
        harness.probe.set_running(name, true);
    }
    let mut engine = chain(&harness);

    assert!(engine.control("db", ActionKind::Restart).await);

    assert_eq!(
        harness.spawner.calls(),
        vec![
            "stop proxy",
            "stop web",
            "stop db",
            "start db",
            "start web",
            "start proxy",
        ]
    );
    for name in ["db", "web", "proxy"] {
        assert!(harness.probe.is_running(name), "{name} should be up again");
    }
}

#[tokio::test]
async fn test_start_brings_up_prerequisites_first() {
    let harness = Harness::new();
    let mut engine = chain(&harness);

    assert!(engine.control("proxy", ActionKind::Start).await);

    assert_eq!(
        harness.spawner.calls(),
        vec!["start db", "start web", "start proxy"]
    );
    let request = &harness.spawner.requests()[0];
    assert_eq!(request.event, "Started");
    assert_eq!(request.description, "Started");
    assert!(request.process.is_some());
}

#[tokio::test]
async fn test_start_of_running_process_only_enables_monitoring() {
    let harness = Harness::new();
    harness.probe.set_running("db", true);
    let mut engine = harness.engine(vec![process("db", &[])]);
    engine.registry_mut().get_mut(warden::service::ServiceId(0)).monitor_unset();

    assert!(engine.control("db", ActionKind::Start).await);

    assert!(harness.spawner.calls().is_empty());
    assert_eq!(
        engine.registry().by_name("db").unwrap().monitor,
        MonitorState::Initializing
    );
}

#[tokio::test]
async fn test_stop_disables_the_whole_chain() {
    let harness = Harness::new();
    for name in ["db", "web", "proxy"] {
        harness.probe.set_running(name, true);
    }
    let mut engine = chain(&harness);

    assert!(engine.control("db", ActionKind::Stop).await);

    assert_eq!(
        harness.spawner.calls(),
        vec!["stop proxy", "stop web", "stop db"]
    );
    for service in engine.registry().iter() {
        assert_eq!(service.monitor, MonitorState::Disabled);
    }
}

#[tokio::test]
async fn test_dependency_cycle_terminates() {
    let harness = Harness::new();
    harness.probe.set_running("a", true);
    harness.probe.set_running("b", true);
    let mut engine = harness.engine(vec![process("a", &["b"]), process("b", &["a"])]);

    assert!(engine.control("a", ActionKind::Stop).await);
    assert_eq!(harness.spawner.calls(), vec!["stop a", "stop b"]);

    engine.reset_depend();
    assert!(engine.control("a", ActionKind::Start).await);
    let calls = harness.spawner.calls();
    assert_eq!(calls.iter().filter(|c| *c == "start a").count(), 1);
    assert_eq!(calls.iter().filter(|c| *c == "start b").count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_restart_keeps_monitoring_when_stop_times_out() {
    let harness = Harness::new();
    harness.probe.set_running("web", true);
    harness.spawner.make_stubborn("web");
    let alert = Arc::new(FakeAlert::default());
    let mut engine = harness
        .engine(vec![process("web", &[])])
        .with_alerter(alerter(alert.clone()));

    assert!(engine.control("web", ActionKind::Restart).await);

    assert_eq!(harness.spawner.calls(), vec!["stop web"]);
    let web = engine.registry().by_name("web").unwrap();
    assert_eq!(web.monitor, MonitorState::Initializing);
    assert!(web.error.contains(EventKind::Exec));

    let sent = alert.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].event.kind, EventKind::Exec);
    assert_eq!(sent[0].event.message.as_deref(), Some("failed to stop"));
}

#[tokio::test]
async fn test_monitor_enables_prerequisites_but_not_dependents() {
    let harness = Harness::new();
    let mut engine = chain(&harness);
    for id in engine.registry().ids().collect::<Vec<_>>() {
        engine.registry_mut().get_mut(id).monitor_unset();
    }

    assert!(engine.control("web", ActionKind::Monitor).await);

    let monitor = |name: &str| engine.registry().by_name(name).unwrap().monitor;
    assert_eq!(monitor("db"), MonitorState::Initializing);
    assert_eq!(monitor("web"), MonitorState::Initializing);
    assert_eq!(monitor("proxy"), MonitorState::Disabled);
    assert!(harness.spawner.calls().is_empty());
}

#[tokio::test]
async fn test_unmonitor_reaches_dependents() {
    let harness = Harness::new();
    let mut engine = chain(&harness);

    assert!(engine.control("web", ActionKind::Unmonitor).await);

    let monitor = |name: &str| engine.registry().by_name(name).unwrap().monitor;
    assert_eq!(monitor("db"), MonitorState::Initializing);
    assert_eq!(monitor("web"), MonitorState::Disabled);
    assert_eq!(monitor("proxy"), MonitorState::Disabled);
}

#[tokio::test]
async fn test_guard_conditions() {
    let harness = Harness::new();
    let mut without_stop = process("bare", &[]);
    without_stop.stop = None;
    let mut engine = harness.engine(vec![
        without_stop,
        warden::service::Service::new("site", ServiceKind::Host),
    ]);

    assert!(!engine.control("ghost", ActionKind::Start).await);
    assert!(!engine.control("site", ActionKind::Alert).await);
    assert!(!engine.control_str("site", "ignore").await);
    assert!(!engine.control_str("site", "reboot").await);

    assert!(!engine.control("bare", ActionKind::Stop).await);
    assert_eq!(
        engine.registry().by_name("bare").unwrap().monitor,
        MonitorState::Disabled
    );

    engine.reset_depend();
    assert!(!engine.control("bare", ActionKind::Restart).await);
    assert_eq!(
        engine.registry().by_name("bare").unwrap().monitor,
        MonitorState::Initializing
    );
    assert!(harness.spawner.calls().is_empty());
}
