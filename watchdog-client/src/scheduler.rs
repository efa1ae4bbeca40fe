//! One periodic loop per task.
//!
//! Each loop sleeps one interval, runs the task to completion (including
//! escalation and alert delivery), then sleeps again. Shutdown is only
//! observed while sleeping; a running command is never interrupted.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{error, info, warn};
use watchdog_common::ShutdownListener;

use crate::config::Task;
use crate::engine::Engine;
use crate::transport::AlertTransport;

/// Everything a task loop needs, shared by all loops.
#[derive(Clone)]
pub struct Runner {
    pub hostname: String,
    pub engine: Arc<Engine>,
    pub transport: Arc<dyn AlertTransport>,
}

impl Runner {
    /// One scheduled run: execute, escalate, and on primary failure send
    /// exactly one alert. A delivery failure is logged and the alert dropped.
    pub async fn run_once(&self, task: &Task) {
        let report = self.engine.run(task).await;
        let Some(alert) = report.to_alert(&self.hostname, task) else {
            return;
        };

        if let Err(e) = self.transport.send(&alert).await {
            error!(
                task = %task.name,
                execution_id = %report.execution_id,
                "could not send alert to hub: {}",
                e
            );
        }
    }
}

pub struct SchedulerHandle {
    workers: Vec<(String, JoinHandle<()>)>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct JoinReport {
    /// Loops that observed shutdown and exited.
    pub stopped: Vec<String>,
    /// Loops still busy when the grace window ran out.
    pub abandoned: Vec<String>,
}

/// Start one loop per task. The first run of each task happens one interval
/// after this call.
pub fn spawn(tasks: Vec<Task>, runner: Runner, shutdown: ShutdownListener) -> SchedulerHandle {
    let workers = tasks
        .into_iter()
        .map(|task| {
            let name = task.name.clone();
            let handle = tokio::spawn(task_loop(task, runner.clone(), shutdown.clone()));
            (name, handle)
        })
        .collect();
    SchedulerHandle { workers }
}

async fn task_loop(task: Task, runner: Runner, mut shutdown: ShutdownListener) {
    info!(task = %task.name, interval = ?task.interval, "scheduled");
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = sleep(task.interval) => {}
        }
        runner.run_once(&task).await;
    }
    info!(task = %task.name, "stopped");
}

impl SchedulerHandle {
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Wait up to `grace` for every loop to exit. Loops still running a
    /// command afterwards are abandoned.
    pub async fn join(self, grace: Duration) -> JoinReport {
        let deadline = Instant::now() + grace;
        let mut report = JoinReport::default();

        for (name, mut handle) in self.workers {
            match timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => report.stopped.push(name),
                Ok(Err(e)) => {
                    error!(task = %name, "task loop panicked: {}", e);
                    report.abandoned.push(name);
                }
                Err(_) => {
                    warn!(task = %name, "still running after grace window, abandoning");
                    handle.abort();
                    report.abandoned.push(name);
                }
            }
        }
        report
    }
}
