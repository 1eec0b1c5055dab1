//! Event kinds, debounced event state and the sample history window
//!
//! ## Debounce State Machine
//!
//! Every raw pass/fail sample of a rule is shifted into a fixed-width
//! [`StateMap`]. Whether the sample changes the debounced [`EventState`] is
//! decided by [`Event::check_state`]:
//!
//! ```text
//! sample class:   failed/changed → 1     succeeded/changed-not → 0
//!
//! class 0, event still Init, error bit unset     → no transition
//! kind is instance/action                         → always a transition
//! matches(last threshold.cycles bits) >= count
//!   and (posted != current || posted == Changed)  → transition
//! otherwise                                       → no transition
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::{Action, ActionKind, ActionPair};
use crate::service::{MonitorMode, ServiceKind};
use crate::transport::DeliveryFlags;

/// Monitored condition kinds, one bit each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum EventKind {
    Checksum = 0x1,
    Resource = 0x2,
    Timeout = 0x4,
    Timestamp = 0x8,
    Size = 0x10,
    Connection = 0x20,
    Permission = 0x40,
    Uid = 0x80,
    Gid = 0x100,
    Nonexist = 0x200,
    Invalid = 0x400,
    Data = 0x800,
    Exec = 0x1000,
    Fsflag = 0x2000,
    Icmp = 0x4000,
    Content = 0x8000,
    Instance = 0x10000,
    Action = 0x20000,
    Pid = 0x40000,
    Ppid = 0x80000,
    Heartbeat = 0x100000,
}

/// Human readable descriptions of one event kind
#[derive(Debug, Clone, Copy)]
pub struct EventDescriptions {
    pub failed: &'static str,
    pub succeeded: &'static str,
    pub changed: &'static str,
    pub changed_not: &'static str,
}

const fn describe(
    failed: &'static str,
    succeeded: &'static str,
    changed: &'static str,
    changed_not: &'static str,
) -> EventDescriptions {
    EventDescriptions {
        failed,
        succeeded,
        changed,
        changed_not,
    }
}

impl EventKind {
    pub const ALL: [EventKind; 21] = [
        EventKind::Action,
        EventKind::Checksum,
        EventKind::Connection,
        EventKind::Content,
        EventKind::Data,
        EventKind::Exec,
        EventKind::Fsflag,
        EventKind::Gid,
        EventKind::Heartbeat,
        EventKind::Icmp,
        EventKind::Instance,
        EventKind::Invalid,
        EventKind::Nonexist,
        EventKind::Permission,
        EventKind::Pid,
        EventKind::Ppid,
        EventKind::Resource,
        EventKind::Size,
        EventKind::Timeout,
        EventKind::Timestamp,
        EventKind::Uid,
    ];

    pub fn bit(self) -> u32 {
        self as u32
    }

    pub fn from_bit(bit: u32) -> Option<EventKind> {
        EventKind::ALL.into_iter().find(|kind| kind.bit() == bit)
    }

    /// Instance and action events are one-shot notifications, not conditions
    pub fn is_meta(self) -> bool {
        matches!(self, EventKind::Instance | EventKind::Action)
    }

    pub fn name(self) -> &'static str {
        match self {
            EventKind::Checksum => "checksum",
            EventKind::Resource => "resource",
            EventKind::Timeout => "timeout",
            EventKind::Timestamp => "timestamp",
            EventKind::Size => "size",
            EventKind::Connection => "connection",
            EventKind::Permission => "permission",
            EventKind::Uid => "uid",
            EventKind::Gid => "gid",
            EventKind::Nonexist => "nonexist",
            EventKind::Invalid => "invalid",
            EventKind::Data => "data",
            EventKind::Exec => "exec",
            EventKind::Fsflag => "fsflag",
            EventKind::Icmp => "icmp",
            EventKind::Content => "content",
            EventKind::Instance => "instance",
            EventKind::Action => "action",
            EventKind::Pid => "pid",
            EventKind::Ppid => "ppid",
            EventKind::Heartbeat => "heartbeat",
        }
    }

    pub fn descriptions(self) -> EventDescriptions {
        match self {
            EventKind::Action => describe(
                "Action done",
                "Action done",
                "Action done",
                "Action done",
            ),
            EventKind::Checksum => describe(
                "Checksum failed",
                "Checksum succeeded",
                "Checksum changed",
                "Checksum not changed",
            ),
            EventKind::Connection => describe(
                "Connection failed",
                "Connection succeeded",
                "Connection changed",
                "Connection not changed",
            ),
            EventKind::Content => describe(
                "Content failed",
                "Content succeeded",
                "Content match",
                "Content doesn't match",
            ),
            EventKind::Data => describe(
                "Data access error",
                "Data access succeeded",
                "Data access changed",
                "Data access not changed",
            ),
            EventKind::Exec => describe(
                "Execution failed",
                "Execution succeeded",
                "Execution changed",
                "Execution not changed",
            ),
            EventKind::Fsflag => describe(
                "Filesystem flags failed",
                "Filesystem flags succeeded",
                "Filesystem flags changed",
                "Filesystem flags not changed",
            ),
            EventKind::Gid => describe(
                "GID failed",
                "GID succeeded",
                "GID changed",
                "GID not changed",
            ),
            EventKind::Heartbeat => describe(
                "Heartbeat failed",
                "Heartbeat succeeded",
                "Heartbeat changed",
                "Heartbeat not changed",
            ),
            EventKind::Icmp => describe(
                "ICMP failed",
                "ICMP succeeded",
                "ICMP changed",
                "ICMP not changed",
            ),
            EventKind::Instance => describe(
                "Warden instance failed",
                "Warden instance succeeded",
                "Warden instance changed",
                "Warden instance not changed",
            ),
            EventKind::Invalid => describe(
                "Invalid type",
                "Type succeeded",
                "Type changed",
                "Type not changed",
            ),
            EventKind::Nonexist => describe(
                "Does not exist",
                "Exists",
                "Existence changed",
                "Existence not changed",
            ),
            EventKind::Permission => describe(
                "Permission failed",
                "Permission succeeded",
                "Permission changed",
                "Permission not changed",
            ),
            EventKind::Pid => describe(
                "PID failed",
                "PID succeeded",
                "PID changed",
                "PID not changed",
            ),
            EventKind::Ppid => describe(
                "PPID failed",
                "PPID succeeded",
                "PPID changed",
                "PPID not changed",
            ),
            EventKind::Resource => describe(
                "Resource limit matched",
                "Resource limit succeeded",
                "Resource limit changed",
                "Resource limit not changed",
            ),
            EventKind::Size => describe(
                "Size failed",
                "Size succeeded",
                "Size changed",
                "Size not changed",
            ),
            EventKind::Timeout => describe(
                "Timeout",
                "Timeout recovery",
                "Timeout changed",
                "Timeout not changed",
            ),
            EventKind::Timestamp => describe(
                "Timestamp failed",
                "Timestamp succeeded",
                "Timestamp changed",
                "Timestamp not changed",
            ),
            EventKind::Uid => describe(
                "UID failed",
                "UID succeeded",
                "UID changed",
                "UID not changed",
            ),
        }
    }

    /// Description matching a debounced state (`Init` reads as failed)
    pub fn describe(self, state: EventState) -> &'static str {
        let descriptions = self.descriptions();
        match state {
            EventState::Failed | EventState::Init => descriptions.failed,
            EventState::Succeeded => descriptions.succeeded,
            EventState::Changed => descriptions.changed,
            EventState::ChangedNot => descriptions.changed_not,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of event kinds (the service error bitmap)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKinds(u32);

impl EventKinds {
    pub const EMPTY: EventKinds = EventKinds(0);
    pub const ALL: EventKinds = EventKinds(u32::MAX);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn insert(&mut self, kind: EventKind) {
        self.0 |= kind.bit();
    }

    pub fn remove(&mut self, kind: EventKind) {
        self.0 &= !kind.bit();
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = EventKind> {
        EventKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(*kind))
    }
}

impl FromIterator<EventKind> for EventKinds {
    fn from_iter<I: IntoIterator<Item = EventKind>>(iter: I) -> Self {
        let mut kinds = EventKinds::EMPTY;
        for kind in iter {
            kinds.insert(kind);
        }
        kinds
    }
}

/// Raw sample state and debounced event state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    Succeeded,
    Failed,
    Changed,
    ChangedNot,
    Init,
}

impl EventState {
    /// Binary class used by the debounce window: failed/changed count as 1
    pub fn is_failure_like(self) -> bool {
        !matches!(self, EventState::Succeeded | EventState::ChangedNot)
    }

    pub fn name(self) -> &'static str {
        match self {
            EventState::Succeeded => "succeeded",
            EventState::Failed => "failed",
            EventState::Changed => "changed",
            EventState::ChangedNot => "changed not",
            EventState::Init => "init",
        }
    }
}

impl fmt::Display for EventState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shift register of the most recent raw samples, newest bit rightmost
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMap(u64);

impl StateMap {
    pub fn seeded(sample: EventState) -> Self {
        let mut map = StateMap(0);
        map.push(sample);
        map
    }

    pub fn from_bits(bits: u64) -> Self {
        StateMap(bits)
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn push(&mut self, sample: EventState) {
        self.0 = (self.0 << 1) | u64::from(sample.is_failure_like());
    }

    /// Whether the newest sample was failure-like
    pub fn latest_failed(self) -> bool {
        self.0 & 0x1 == 1
    }

    /// Number of the newest `cycles` bits equal to `class`
    pub fn count_matching(self, cycles: u8, class: bool) -> u8 {
        let cycles = cycles.min(64);
        (0..cycles)
            .filter(|i| ((self.0 >> i) & 0x1 == 1) == class)
            .count() as u8
    }
}

/// One live monitored condition instance
///
/// Identified by its rule (the [`ActionPair`] identity) together with its kind.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub rule: Arc<ActionPair>,
    pub source: String,
    pub service_kind: ServiceKind,
    pub mode: MonitorMode,
    pub collected: DateTime<Utc>,
    pub state: EventState,
    pub state_map: StateMap,
    pub state_changed: bool,
    pub count: u64,
    pub message: Option<String>,
    pub delivery: DeliveryFlags,
}

impl Event {
    pub fn new(
        kind: EventKind,
        rule: Arc<ActionPair>,
        source: &str,
        service_kind: ServiceKind,
        mode: MonitorMode,
        sample: EventState,
        message: Option<String>,
    ) -> Self {
        Self {
            kind,
            rule,
            source: source.to_string(),
            service_kind,
            mode,
            collected: Utc::now(),
            state: EventState::Init,
            state_map: StateMap::seeded(sample),
            state_changed: false,
            count: 0,
            message,
            delivery: DeliveryFlags::NONE,
        }
    }

    pub fn matches(&self, rule: &ActionPair, kind: EventKind) -> bool {
        self.rule.id() == rule.id() && self.kind == kind
    }

    /// Append a new raw sample to an existing event
    pub fn record(&mut self, sample: EventState, message: Option<String>) {
        self.collected = Utc::now();
        self.state_map.push(sample);
        if message.is_some() {
            self.message = message;
        }
    }

    /// Decide whether the posted sample is a debounced transition
    ///
    /// `service_errors` is the owning service's error bitmap.
    pub fn check_state(&self, posted: EventState, service_errors: EventKinds) -> bool {
        let class = posted.is_failure_like();

        if !class && self.state == EventState::Init && !service_errors.contains(self.kind) {
            return false;
        }

        let action = if class {
            &self.rule.failed
        } else {
            &self.rule.succeeded
        };
        let count = self.state_map.count_matching(action.threshold.cycles, class);

        if self.kind.is_meta() {
            return true;
        }

        count >= action.threshold.count && (posted != self.state || posted == EventState::Changed)
    }

    /// Store the outcome of [`Event::check_state`]
    pub fn apply(&mut self, posted: EventState, changed: bool) {
        self.state_changed = changed;
        if changed {
            self.state = posted;
            self.count = 1;
        } else {
            self.count += 1;
        }
    }

    pub fn description(&self) -> &'static str {
        self.kind.describe(self.state)
    }

    /// The action this event stands for in its current state
    pub fn current_action(&self) -> &Action {
        match self.state {
            EventState::Succeeded | EventState::ChangedNot => &self.rule.succeeded,
            EventState::Failed | EventState::Changed | EventState::Init => &self.rule.failed,
        }
    }

    /// The current action, with control actions reduced to alert for passive services
    pub fn resolved_action(&self) -> ActionKind {
        let kind = self.current_action().kind;
        if self.mode == MonitorMode::Passive && kind.is_passive_restricted() {
            ActionKind::Alert
        } else {
            kind
        }
    }

    pub fn snapshot(&self) -> EventSnapshot {
        EventSnapshot {
            kind: self.kind,
            source: self.source.clone(),
            service_kind: self.service_kind,
            mode: self.mode,
            collected: self.collected,
            state: self.state,
            state_map: self.state_map,
            state_changed: self.state_changed,
            count: self.count,
            message: self.message.clone(),
            delivery: self.delivery,
            action: self.resolved_action(),
        }
    }
}

/// Self-contained copy of an event, used for notifications and the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSnapshot {
    pub kind: EventKind,
    pub source: String,
    pub service_kind: ServiceKind,
    pub mode: MonitorMode,
    pub collected: DateTime<Utc>,
    pub state: EventState,
    pub state_map: StateMap,
    pub state_changed: bool,
    pub count: u64,
    pub message: Option<String>,
    pub delivery: DeliveryFlags,
    pub action: ActionKind,
}

impl EventSnapshot {
    pub fn description(&self) -> &'static str {
        self.kind.describe(self.state)
    }
}
