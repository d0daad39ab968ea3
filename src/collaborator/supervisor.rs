//! Child process supervision
//!
//! Each collaborator runs under one monitor task. The task waits out the
//! startup delay, spawns the child and then races its exit against the
//! session's stop request.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// How a running child is asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// SIGINT, then kill if it is still running after `grace`
    Interrupt {
        /// Time allowed to exit after the interrupt
        grace: Duration,
    },
    /// Kill immediately
    Kill,
}

/// Everything needed to launch one collaborator
#[derive(Debug, Clone)]
pub struct CollaboratorSpec {
    /// Short name used in logs ("recorder", "restreamer")
    pub name: &'static str,
    /// Executable
    pub program: PathBuf,
    /// Arguments
    pub args: Vec<String>,
    /// Delay between the session going live and the spawn
    pub startup_delay: Duration,
    /// Stop behaviour on teardown
    pub stop: StopMode,
}

impl CollaboratorSpec {
    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

/// Owned handle to a supervised collaborator
///
/// Stopping is idempotent. Dropping the handle without stopping cancels
/// the monitor, and the child is killed when its task is dropped.
#[derive(Debug)]
pub struct CollaboratorHandle {
    name: &'static str,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CollaboratorHandle {
    /// Start supervising `spec` on behalf of `session_id`
    pub fn spawn(spec: CollaboratorSpec, session_id: u64) -> Self {
        let name = spec.name;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervise(spec, session_id, cancel.clone()));

        Self {
            name,
            cancel,
            task: Some(task),
        }
    }

    /// Collaborator name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the monitor task is still running
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the child and wait for the monitor to finish
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(collaborator = self.name, error = %e, "Collaborator monitor failed");
            }
        }
    }
}

impl Drop for CollaboratorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn supervise(spec: CollaboratorSpec, session_id: u64, cancel: CancellationToken) {
    if !spec.startup_delay.is_zero() {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(spec.startup_delay) => {}
        }
    }

    let mut child = match spec.command().spawn() {
        Ok(child) => child,
        Err(e) => {
            let error = Error::Collaborator {
                name: spec.name,
                source: e,
            };
            tracing::warn!(
                session_id = session_id,
                collaborator = spec.name,
                program = %spec.program.display(),
                error = %error,
                "Collaborator not started"
            );
            return;
        }
    };

    tracing::info!(
        session_id = session_id,
        collaborator = spec.name,
        pid = child.id(),
        "Collaborator started"
    );

    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => tracing::warn!(
                session_id = session_id,
                collaborator = spec.name,
                status = %status,
                "Collaborator exited"
            ),
            Err(e) => tracing::warn!(
                session_id = session_id,
                collaborator = spec.name,
                error = %e,
                "Failed to wait for collaborator"
            ),
        },
        _ = cancel.cancelled() => {
            terminate(&mut child, spec.stop, spec.name).await;
            tracing::info!(
                session_id = session_id,
                collaborator = spec.name,
                "Collaborator stopped"
            );
        }
    }
}

async fn terminate(child: &mut Child, mode: StopMode, name: &'static str) {
    if let StopMode::Interrupt { grace } = mode {
        if interrupt(child) {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(_) => return,
                Err(_) => {
                    tracing::warn!(collaborator = name, "Collaborator ignored interrupt, killing");
                }
            }
        }
    }

    if let Err(e) = child.kill().await {
        tracing::debug!(collaborator = name, error = %e, "Kill failed");
    }
}

#[cfg(unix)]
fn interrupt(child: &Child) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return false;
    };
    kill(Pid::from_raw(pid as i32), Signal::SIGINT).is_ok()
}

#[cfg(not(unix))]
fn interrupt(_child: &Child) -> bool {
    false
}
