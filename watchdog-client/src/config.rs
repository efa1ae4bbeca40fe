//! Agent task configuration.
//!
//! The file is JSON:
//!
//! ```json
//! {
//!   "hostname": "srv01",
//!   "tasks": [
//!     {
//!       "name": "disk",
//!       "repeatInterval": 60,
//!       "cmd": "df -h / | awk 'NR==2 {exit ($5+0 > 90)}'",
//!       "msg": "{task} on {hostname}: disk almost full",
//!       "actionsToBeTaken": [
//!         { "name": "clean-tmp", "cmd": "rm -rf /tmp/cache", "continueOnFailure": true }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! It is parsed into raw structs and validated once into [`AgentConfig`];
//! nothing downstream ever sees an unvalidated task.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not decode config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("task '{task}': {reason}")]
    Invalid { task: String, reason: String },
    #[error("task '{0}' is defined more than once")]
    DuplicateTask(String),
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    tasks: Vec<RawTask>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTask {
    name: String,
    repeat_interval: i64,
    cmd: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    actions_to_be_taken: Vec<RawAction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAction {
    name: String,
    cmd: String,
    #[serde(default)]
    continue_on_failure: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub hostname: String,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub name: String,
    pub interval: Duration,
    pub cmd: String,
    /// Short message template; `{task}` and `{hostname}` are substituted.
    pub msg: String,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub name: String,
    pub cmd: String,
    pub continue_on_failure: bool,
}

impl Task {
    pub fn short_message(&self, hostname: &str) -> String {
        self.msg
            .replace("{task}", &self.name)
            .replace("{hostname}", hostname)
    }
}

impl AgentConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(raw)?;
        Self::validate(raw)
    }

    fn validate(raw: RawConfig) -> Result<Self, ConfigError> {
        let hostname = raw
            .hostname
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(system_hostname);

        let mut seen = HashSet::new();
        let mut tasks = Vec::with_capacity(raw.tasks.len());
        for task in raw.tasks {
            let task = validate_task(task)?;
            if !seen.insert(task.name.clone()) {
                return Err(ConfigError::DuplicateTask(task.name));
            }
            tasks.push(task);
        }

        Ok(Self { hostname, tasks })
    }
}

fn validate_task(raw: RawTask) -> Result<Task, ConfigError> {
    let name = raw.name.trim().to_string();
    let invalid = |reason: &str| ConfigError::Invalid {
        task: name.clone(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name must not be empty"));
    }
    if raw.repeat_interval <= 0 {
        return Err(invalid(&format!(
            "repeatInterval must be greater than 0, got {}",
            raw.repeat_interval
        )));
    }
    if raw.cmd.trim().is_empty() {
        return Err(invalid("cmd must not be empty"));
    }

    let mut actions = Vec::with_capacity(raw.actions_to_be_taken.len());
    for action in raw.actions_to_be_taken {
        let action_name = action.name.trim().to_string();
        if action_name.is_empty() {
            return Err(invalid("action name must not be empty"));
        }
        if action.cmd.trim().is_empty() {
            return Err(invalid(&format!("action '{}' has an empty cmd", action_name)));
        }
        actions.push(Action {
            name: action_name,
            cmd: action.cmd,
            continue_on_failure: action.continue_on_failure,
        });
    }

    Ok(Task {
        interval: Duration::from_secs(raw.repeat_interval as u64),
        name,
        cmd: raw.cmd,
        msg: raw.msg,
        actions,
    })
}

fn system_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
