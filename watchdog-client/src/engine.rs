//! Execution and escalation of one task run.
//!
//! The primary command runs first. Only when it fails do the task's actions
//! run, strictly in declared order; an action that fails without
//! `continue_on_failure` ends the chain. The final status is decided by
//! [`EscalationPolicy`].

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{Local, Utc};
use tokio::process::Command;
use tracing::{debug, info, warn};
use watchdog_common::alert::alert_timestamp;
use watchdog_common::{AlertMsg, AlertRecord, Origin, Status};

use crate::config::Task;

/// Result of one shell command. Failure is a value here, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub success: bool,
    /// `None` when the command was killed by a signal or never started.
    pub exit_code: Option<i32>,
    /// Captured stdout followed by captured stderr, or the spawn error text.
    pub output: String,
}

impl CommandOutcome {
    pub fn exit_label(&self) -> String {
        match self.exit_code {
            Some(code) => code.to_string(),
            None => "no exit code".to_string(),
        }
    }
}

/// Run `cmd` through the platform shell and wait for it to finish.
pub async fn run_command(cmd: &str) -> CommandOutcome {
    let mut command = shell(cmd);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    match command.output().await {
        Ok(output) => {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            CommandOutcome {
                success: output.status.success(),
                exit_code: output.status.code(),
                output: combined,
            }
        }
        Err(err) => CommandOutcome {
            success: false,
            exit_code: None,
            output: format!("failed to start '{}': {}\n", cmd, err),
        },
    }
}

#[cfg(unix)]
fn shell(cmd: &str) -> Command {
    let mut command = Command::new("/bin/sh");
    command.arg("-c").arg(cmd);
    command
}

#[cfg(not(unix))]
fn shell(cmd: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(cmd);
    command
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub name: String,
    pub outcome: CommandOutcome,
}

/// How the outcome of an escalation chain maps to a final status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EscalationPolicy {
    /// Ok only if every action that ran succeeded. A later success never
    /// clears an earlier failure.
    #[default]
    AllMustSucceed,
}

impl EscalationPolicy {
    pub fn verdict(&self, actions: &[ActionOutcome]) -> Status {
        match self {
            EscalationPolicy::AllMustSucceed => {
                if actions.iter().all(|a| a.outcome.success) {
                    Status::Ok
                } else {
                    Status::NeedsManualIntervention
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub execution_id: String,
    pub task_name: String,
    pub primary_failed: bool,
    pub primary_output: String,
    /// Actions that actually ran, in order.
    pub actions: Vec<ActionOutcome>,
    pub status: Status,
}

impl ExecutionReport {
    /// Every action section, each headed by `(<task>.<action>) exited with <code>`.
    pub fn action_output(&self) -> String {
        let mut out = String::new();
        for action in &self.actions {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&format!(
                "({}.{}) exited with {}\n",
                self.task_name,
                action.name,
                action.outcome.exit_label()
            ));
            out.push_str(&action.outcome.output);
        }
        out
    }

    /// Primary output followed by the action sections. Equals the primary
    /// output when no action ran.
    pub fn body(&self) -> String {
        let actions = self.action_output();
        if actions.is_empty() {
            return self.primary_output.clone();
        }
        let mut body = self.primary_output.clone();
        if !body.is_empty() && !body.ends_with('\n') {
            body.push('\n');
        }
        body.push_str(&actions);
        body
    }

    /// The alert for this run, or `None` when the primary command succeeded.
    pub fn to_alert(&self, hostname: &str, task: &Task) -> Option<AlertRecord> {
        if !self.primary_failed {
            return None;
        }
        Some(AlertRecord {
            id: self.execution_id.clone(),
            from: Origin {
                hostname: hostname.to_string(),
                task_name: self.task_name.clone(),
            },
            msg: AlertMsg {
                title: task.name.clone(),
                short: task.short_message(hostname),
                long: self.body(),
                time: alert_timestamp(Local::now()),
            },
            status: self.status,
        })
    }
}

/// `<unix-millis>-<sequence>`: unique within a process, sortable by start.
#[derive(Debug, Default)]
pub struct ExecutionIds {
    seq: AtomicU64,
}

impl ExecutionIds {
    pub fn next(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", Utc::now().timestamp_millis(), seq)
    }
}

#[derive(Debug, Default)]
pub struct Engine {
    policy: EscalationPolicy,
    ids: ExecutionIds,
}

impl Engine {
    pub fn new(policy: EscalationPolicy) -> Self {
        Self {
            policy,
            ids: ExecutionIds::default(),
        }
    }

    pub fn policy(&self) -> EscalationPolicy {
        self.policy
    }

    pub async fn run(&self, task: &Task) -> ExecutionReport {
        let execution_id = self.ids.next();
        info!(task = %task.name, execution_id = %execution_id, "starting");

        let primary = run_command(&task.cmd).await;
        if primary.success {
            info!(task = %task.name, execution_id = %execution_id, "completed successfully");
            return ExecutionReport {
                execution_id,
                task_name: task.name.clone(),
                primary_failed: false,
                primary_output: primary.output,
                actions: Vec::new(),
                status: Status::Ok,
            };
        }

        warn!(
            task = %task.name,
            execution_id = %execution_id,
            exit = %primary.exit_label(),
            output = %primary.output.trim_end(),
            "command failed"
        );

        let actions = self.escalate(task, &execution_id).await;
        let status = if task.actions.is_empty() {
            Status::Failed
        } else {
            self.policy.verdict(&actions)
        };

        info!(
            task = %task.name,
            execution_id = %execution_id,
            status = %status,
            "completed with error"
        );

        ExecutionReport {
            execution_id,
            task_name: task.name.clone(),
            primary_failed: true,
            primary_output: primary.output,
            actions,
            status,
        }
    }

    async fn escalate(&self, task: &Task, execution_id: &str) -> Vec<ActionOutcome> {
        let mut ran = Vec::with_capacity(task.actions.len());
        if task.actions.is_empty() {
            return ran;
        }
        info!(task = %task.name, execution_id = %execution_id, "executing actions");

        for action in &task.actions {
            let scope = format!("{}.{}", task.name, action.name);
            let outcome = run_command(&action.cmd).await;
            let stop = !outcome.success && !action.continue_on_failure;

            if outcome.success {
                debug!(action = %scope, execution_id = %execution_id, "action succeeded");
            } else {
                warn!(
                    action = %scope,
                    execution_id = %execution_id,
                    exit = %outcome.exit_label(),
                    output = %outcome.output.trim_end(),
                    "action failed"
                );
            }

            ran.push(ActionOutcome {
                name: action.name.clone(),
                outcome,
            });
            if stop {
                info!(action = %scope, execution_id = %execution_id, "stopping escalation chain");
                break;
            }
        }
        ran
    }
}
