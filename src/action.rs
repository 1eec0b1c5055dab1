//! Action catalog and per-rule action pairs
//!
//! Every monitored rule binds a "failed" and a "succeeded" [`Action`]. The pair
//! carries a [`RuleId`] that identifies the rule, independent of what the actions
//! contain. Two rules with identical contents are still distinct rules.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Widest debounce window an action threshold can look at
pub const MAX_CYCLES: u8 = 64;

/// The closed set of things that can happen in reaction to an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u16)]
pub enum ActionKind {
    Ignore = 0,
    Alert = 1,
    Restart = 2,
    Stop = 3,
    Exec = 4,
    Unmonitor = 5,
    Start = 6,
    Monitor = 7,
}

impl ActionKind {
    pub const ALL: [ActionKind; 8] = [
        ActionKind::Ignore,
        ActionKind::Alert,
        ActionKind::Restart,
        ActionKind::Stop,
        ActionKind::Exec,
        ActionKind::Unmonitor,
        ActionKind::Start,
        ActionKind::Monitor,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ActionKind::Ignore => "ignore",
            ActionKind::Alert => "alert",
            ActionKind::Restart => "restart",
            ActionKind::Stop => "stop",
            ActionKind::Exec => "exec",
            ActionKind::Unmonitor => "unmonitor",
            ActionKind::Start => "start",
            ActionKind::Monitor => "monitor",
        }
    }

    /// Actions that are reduced to an alert for passive services
    pub fn is_passive_restricted(self) -> bool {
        matches!(
            self,
            ActionKind::Start | ActionKind::Stop | ActionKind::Restart
        )
    }

    pub fn from_code(code: u16) -> Option<ActionKind> {
        ActionKind::ALL.into_iter().find(|kind| *kind as u16 == code)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ActionKind {
    type Err = ConfigError;

    /// Parses an action requested from outside the daemon.
    ///
    /// `ignore` is not something a caller can ask for, so it is rejected along
    /// with unknown names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .into_iter()
            .skip(1)
            .find(|kind| kind.name() == s)
            .ok_or_else(|| ConfigError::InvalidAction(s.to_string()))
    }
}

/// A command the daemon can run on behalf of a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub program: std::path::PathBuf,
    pub args: Vec<String>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// How long the orchestrator waits for a process to come up or go away
    pub timeout: Duration,
}

impl Command {
    pub fn new(program: impl Into<std::path::PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            uid: None,
            gid: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn display(&self) -> String {
        self.program.display().to_string()
    }
}

/// "count matching samples within the last cycles samples"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    pub count: u8,
    pub cycles: u8,
}

impl Threshold {
    pub const IMMEDIATE: Threshold = Threshold {
        count: 1,
        cycles: 1,
    };

    pub fn new(count: u8, cycles: u8) -> Result<Self, ConfigError> {
        if count == 0 || cycles == 0 || count > cycles || cycles > MAX_CYCLES {
            return Err(ConfigError::InvalidThreshold { count, cycles });
        }
        Ok(Self { count, cycles })
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Threshold::IMMEDIATE
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub kind: ActionKind,
    pub exec: Option<Command>,
    pub threshold: Threshold,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            exec: None,
            threshold: Threshold::IMMEDIATE,
        }
    }

    pub fn exec(command: Command) -> Self {
        Self {
            kind: ActionKind::Exec,
            exec: Some(command),
            threshold: Threshold::IMMEDIATE,
        }
    }

    pub fn with_threshold(mut self, threshold: Threshold) -> Self {
        self.threshold = threshold;
        self
    }
}

/// Identity of one monitored rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleId(u64);

static NEXT_RULE_ID: AtomicU64 = AtomicU64::new(1);

impl RuleId {
    fn next() -> Self {
        RuleId(NEXT_RULE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule#{}", self.0)
    }
}

/// The failed/succeeded actions of one rule
#[derive(Debug, PartialEq, Eq)]
pub struct ActionPair {
    id: RuleId,
    pub failed: Action,
    pub succeeded: Action,
}

impl ActionPair {
    pub fn new(failed: Action, succeeded: Action) -> Self {
        Self {
            id: RuleId::next(),
            failed,
            succeeded,
        }
    }

    /// Failed → alert, succeeded → alert, both immediate
    pub fn alert() -> Self {
        Self::new(Action::new(ActionKind::Alert), Action::new(ActionKind::Alert))
    }

    pub fn id(&self) -> RuleId {
        self.id
    }
}
