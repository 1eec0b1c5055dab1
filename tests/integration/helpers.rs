//! Fakes and builders shared by the integration tests

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use warden::{
    Engine, SpawnError, TransportError,
    action::Command,
    alerts::{AlertTransport, Alerter, Notification, Recipient, Templates},
    check::{Check, CheckContext, Sample},
    event::{EventKind, EventState},
    monitors::process::{ProcessInfo, ProcessProbe},
    remote::{RemotePayload, RemoteStatusTransport},
    service::{Registry, Service, ServiceKind},
    spawn::{SpawnRequest, Spawner},
};

/// Process table keyed by service name
#[derive(Default)]
pub struct FakeProbe {
    running: Mutex<HashMap<String, u32>>,
}

impl FakeProbe {
    pub fn set_running(&self, service: &str, running: bool) {
        let mut table = self.running.lock().unwrap();
        if running {
            let pid = 1000 + table.len() as u32;
            table.insert(service.to_string(), pid);
        } else {
            table.remove(service);
        }
    }

    pub fn is_running(&self, service: &str) -> bool {
        self.running.lock().unwrap().contains_key(service)
    }
}

impl ProcessProbe for FakeProbe {
    fn probe(&self, service: &str, _pidfile: &Path) -> Option<ProcessInfo> {
        self.running
            .lock()
            .unwrap()
            .get(service)
            .map(|pid| ProcessInfo {
                pid: *pid,
                ..ProcessInfo::default()
            })
    }
}

/// Records every command and flips the fake process table
///
/// A program named `start` brings the service up, `stop` takes it down,
/// unless the service is marked stubborn. A program named `missing` cannot
/// be run.
pub struct FakeSpawner {
    probe: Arc<FakeProbe>,
    calls: Mutex<Vec<String>>,
    stubborn: Mutex<HashSet<String>>,
    requests: Mutex<Vec<SpawnRequest>>,
}

impl FakeSpawner {
    pub fn new(probe: Arc<FakeProbe>) -> Self {
        Self {
            probe,
            calls: Mutex::new(Vec::new()),
            stubborn: Mutex::new(HashSet::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Commands run so far, as "<program> <service>"
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<SpawnRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Commands for this service have no effect on the process table
    pub fn make_stubborn(&self, service: &str) {
        self.stubborn.lock().unwrap().insert(service.to_string());
    }
}

#[async_trait]
impl Spawner for FakeSpawner {
    async fn spawn(&self, command: &Command, request: &SpawnRequest) -> Result<(), SpawnError> {
        let program = command
            .program
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        self.calls
            .lock()
            .unwrap()
            .push(format!("{program} {}", request.service));
        self.requests.lock().unwrap().push(request.clone());

        if program == "missing" {
            return Err(SpawnError::NotExecutable(command.program.clone()));
        }
        if !self.stubborn.lock().unwrap().contains(&request.service) {
            match program.as_str() {
                "start" => self.probe.set_running(&request.service, true),
                "stop" => self.probe.set_running(&request.service, false),
                _ => {}
            }
        }
        Ok(())
    }
}

/// Succeeds unless told to fail the next few sends
#[derive(Default)]
pub struct FakeAlert {
    failures: AtomicUsize,
    attempts: AtomicUsize,
    sent: Mutex<Vec<Notification>>,
}

impl FakeAlert {
    pub fn failing(times: usize) -> Self {
        let alert = Self::default();
        alert.fail_next(times);
        alert
    }

    pub fn fail_next(&self, times: usize) {
        self.failures.store(times, Ordering::SeqCst);
    }

    /// Every send, failed or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

fn take_failure(failures: &AtomicUsize) -> bool {
    failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl AlertTransport for FakeAlert {
    async fn send(&self, notification: &Notification) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.failures) {
            return Err(TransportError::Status(StatusCode::SERVICE_UNAVAILABLE));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRemote {
    failures: AtomicUsize,
    sent: Mutex<Vec<RemotePayload>>,
}

impl FakeRemote {
    pub fn failing(times: usize) -> Self {
        Self {
            failures: AtomicUsize::new(times),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn modes(&self) -> Vec<&'static str> {
        self.sent.lock().unwrap().iter().map(|p| p.mode()).collect()
    }
}

#[async_trait]
impl RemoteStatusTransport for FakeRemote {
    async fn send(&self, payload: &RemotePayload) -> Result<(), TransportError> {
        if take_failure(&self.failures) {
            return Err(TransportError::Status(StatusCode::BAD_GATEWAY));
        }
        self.sent.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

/// Check returning the same sample every run and counting its runs
pub struct FixedCheck {
    kind: EventKind,
    state: Mutex<EventState>,
    runs: AtomicUsize,
}

impl FixedCheck {
    pub fn new(kind: EventKind, state: EventState) -> Self {
        Self {
            kind,
            state: Mutex::new(state),
            runs: AtomicUsize::new(0),
        }
    }

    pub fn set_state(&self, state: EventState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Check for FixedCheck {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn run(&self, _ctx: &CheckContext) -> Vec<Sample> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let state = *self.state.lock().unwrap();
        vec![Sample {
            kind: self.kind,
            state,
            message: format!("{} is {state}", self.kind),
        }]
    }
}

/// Process service with start/stop commands and prerequisites
pub fn process(name: &str, depends_on: &[&str]) -> Service {
    let mut service = Service::new(name, ServiceKind::Process);
    service.pidfile = Some(format!("/run/{name}.pid").into());
    service.depends_on = depends_on.iter().map(|d| d.to_string()).collect();
    service.start = Some(Command::new("/etc/init.d/start").timeout(Duration::from_secs(3)));
    service.stop = Some(Command::new("/etc/init.d/stop").timeout(Duration::from_secs(3)));
    service
}

pub struct Harness {
    pub probe: Arc<FakeProbe>,
    pub spawner: Arc<FakeSpawner>,
    pub shutdown: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        let probe = Arc::new(FakeProbe::default());
        let spawner = Arc::new(FakeSpawner::new(probe.clone()));
        Self {
            probe,
            spawner,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn engine(&self, services: Vec<Service>) -> Engine {
        Engine::new(Registry::new(services).unwrap(), self.shutdown.clone())
            .with_host("box")
            .with_probe(self.probe.clone())
            .with_spawner(self.spawner.clone())
    }
}

pub fn alerter(transport: Arc<FakeAlert>) -> Alerter {
    Alerter::new(
        vec![Recipient::all("ops")],
        Templates::default(),
        transport,
        "box",
    )
}
