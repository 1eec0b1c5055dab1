//! Running configured commands
//!
//! Commands are started detached: own process group, stdio on `/dev/null`,
//! optional uid/gid. The spawner only reports whether the command could be
//! started; it never waits for the command to finish.

use std::process::Stdio;

use async_trait::async_trait;
use chrono::Local;
use tracing::{debug, error, instrument};

use crate::action::Command;
use crate::error::SpawnError;
use crate::monitors::process::ProcessInfo;

/// Context exported to a spawned command through its environment
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub service: String,
    pub host: String,
    /// Event description, or "Started"/"Stopped"/"No Event"
    pub event: String,
    /// Event message, or "Started"/"Stopped"/"No Event"
    pub description: String,
    /// Present for process services (pid 0 when not running)
    pub process: Option<ProcessInfo>,
}

impl SpawnRequest {
    pub fn environment(&self) -> Vec<(&'static str, String)> {
        let mut env = vec![
            ("WARDEN_DATE", Local::now().to_rfc2822()),
            ("WARDEN_SERVICE", self.service.clone()),
            ("WARDEN_HOST", self.host.clone()),
            ("WARDEN_EVENT", self.event.clone()),
            ("WARDEN_DESCRIPTION", self.description.clone()),
        ];

        if let Some(process) = &self.process {
            env.push(("WARDEN_PROCESS_PID", process.pid.to_string()));
            env.push(("WARDEN_PROCESS_MEMORY", process.memory_kib.to_string()));
            env.push(("WARDEN_PROCESS_CHILDREN", process.children.to_string()));
            env.push((
                "WARDEN_PROCESS_CPU_PERCENT",
                format!("{:.0}", process.cpu_percent),
            ));
        }

        env
    }
}

#[async_trait]
pub trait Spawner: Send + Sync {
    async fn spawn(&self, command: &Command, request: &SpawnRequest) -> Result<(), SpawnError>;
}

/// Spawns commands with `tokio::process`
#[derive(Debug, Default, Clone)]
pub struct CommandSpawner;

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.is_file() && metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    metadata.is_file()
}

#[async_trait]
impl Spawner for CommandSpawner {
    #[instrument(skip_all, fields(service = %request.service, program = %command.display()))]
    async fn spawn(&self, command: &Command, request: &SpawnRequest) -> Result<(), SpawnError> {
        let executable = tokio::fs::metadata(&command.program)
            .await
            .map(|metadata| is_executable(&metadata))
            .unwrap_or(false);
        if !executable {
            error!("'{}' is not an executable file", command.display());
            return Err(SpawnError::NotExecutable(command.program.clone()));
        }

        let mut process = tokio::process::Command::new(&command.program);
        process
            .args(&command.args)
            .envs(request.environment())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        #[cfg(unix)]
        {
            process.process_group(0);
            if let Some(uid) = command.uid {
                process.uid(uid);
            }
            if let Some(gid) = command.gid {
                process.gid(gid);
            }
        }

        let child = process.spawn().map_err(|source| {
            error!("failed to execute '{}': {source}", command.display());
            SpawnError::Spawn {
                program: command.display(),
                source,
            }
        })?;
        debug!("started '{}' as pid {:?}", command.display(), child.id());

        // reaped in the background, the caller never waits
        tokio::spawn(async move {
            let mut child = child;
            let _ = child.wait().await;
        });

        Ok(())
    }
}
