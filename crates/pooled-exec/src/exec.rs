//! Handler that runs one shell command per request.

use std::process::Stdio;

use async_trait::async_trait;
use handler_pool::{Completion, Handler, HandlerId, Notifier};
use serde::Serialize;
use tokio::process::Command;

/// One command line to run.
#[derive(Debug, Clone)]
pub struct Job {
    pub index: usize,
    pub command: String,
}

/// Progress reported on a job's notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecEvent {
    Started {
        index: usize,
        handler: HandlerId,
        #[serde(skip_serializing_if = "Option::is_none")]
        pid: Option<u32>,
    },
    Exited {
        index: usize,
        /// None when the process was killed by a signal.
        code: Option<i32>,
        success: bool,
        stdout: String,
        stderr: String,
    },
    Failed {
        index: usize,
        error: String,
    },
}

impl ExecEvent {
    pub fn index(&self) -> usize {
        match self {
            Self::Started { index, .. } | Self::Exited { index, .. } | Self::Failed { index, .. } => {
                *index
            }
        }
    }

    pub fn is_failure(&self) -> bool {
        match self {
            Self::Started { .. } => false,
            Self::Exited { success, .. } => !success,
            Self::Failed { .. } => true,
        }
    }
}

/// Spawns each job with `<shell> -c <command>` and waits for it to exit.
pub struct CommandHandler {
    shell: String,
}

impl CommandHandler {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    async fn run(&self, handler: HandlerId, notifier: &Notifier<ExecEvent>, job: &Job) -> ExecEvent {
        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(&job.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(index = job.index, shell = %self.shell, error = %e, "Failed to spawn command");
                return ExecEvent::Failed {
                    index: job.index,
                    error: format!("failed to spawn {}: {e}", self.shell),
                };
            }
        };

        notifier.emit(ExecEvent::Started {
            index: job.index,
            handler,
            pid: child.id(),
        });

        match child.wait_with_output().await {
            Ok(output) => ExecEvent::Exited {
                index: job.index,
                code: output.status.code(),
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Err(e) => ExecEvent::Failed {
                index: job.index,
                error: format!("failed to wait for command: {e}"),
            },
        }
    }
}

#[async_trait]
impl Handler<Job, ExecEvent> for CommandHandler {
    async fn handle(&self, notifier: Notifier<ExecEvent>, done: Completion, job: Job) {
        tracing::debug!(index = job.index, handler = %done.handler_id(), command = %job.command, "Running command");

        let outcome = self.run(done.handler_id(), &notifier, &job).await;
        notifier.emit(outcome);
        done.complete();
    }
}
