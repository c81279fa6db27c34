//! Settings types. Every struct is `#[serde(default)]` so a partial user
//! file only needs the keys it changes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Environment variable carrying the browser binary path to the worker.
pub const BROWSER_PATH_ENV: &str = "CHROME_PATH";
/// Environment variable carrying the browser debugging port to the worker.
pub const DEBUGGING_PORT_ENV: &str = "CHROME_DEBUGGING_PORT";

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentdeckSettings {
    pub worker: WorkerSettings,
    pub timeouts: TimeoutSettings,
    pub bridge: BridgeSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

impl AgentdeckSettings {
    /// Reject values that would make the bridge unusable.
    pub fn validate(&self) -> Result<()> {
        if self.worker.program.trim().is_empty() {
            return Err(SettingsError::invalid("worker.program", "must not be empty"));
        }
        if self.timeouts.long_request_ms == 0 {
            return Err(SettingsError::invalid(
                "timeouts.long_request_ms",
                "must be greater than zero",
            ));
        }
        if self.timeouts.short_request_ms == 0 {
            return Err(SettingsError::invalid(
                "timeouts.short_request_ms",
                "must be greater than zero",
            ));
        }
        if self.bridge.event_capacity == 0 {
            return Err(SettingsError::invalid(
                "bridge.event_capacity",
                "must be greater than zero",
            ));
        }
        if self.bridge.max_line_bytes < 1024 {
            return Err(SettingsError::invalid(
                "bridge.max_line_bytes",
                format!("must be at least 1024, got {}", self.bridge.max_line_bytes),
            ));
        }
        Ok(())
    }
}

/// How the worker process is launched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Interpreter or executable to run.
    pub program: String,
    /// Entry script, resolved against `script_dir`.
    pub script: String,
    pub script_dir: String,
    /// Pass `-u` so the interpreter does not buffer stdout.
    pub unbuffered: bool,
    /// Arguments after the script path.
    pub extra_args: Vec<String>,
    pub browser_path: String,
    pub debugging_port: u16,
    /// Extra environment entries, applied after the browser variables.
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<String>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            program: default_program().into(),
            script: "api.py".into(),
            script_dir: "src/python".into(),
            unbuffered: true,
            extra_args: vec!["--electron".into()],
            browser_path: default_browser_path().into(),
            debugging_port: 9222,
            env: BTreeMap::new(),
            working_dir: None,
        }
    }
}

impl WorkerSettings {
    pub fn script_path(&self) -> PathBuf {
        PathBuf::from(&self.script_dir).join(&self.script)
    }

    /// Full argument list: `[-u] <script> <extra_args...>`.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.extra_args.len() + 2);
        if self.unbuffered {
            args.push("-u".to_string());
        }
        args.push(self.script_path().to_string_lossy().into_owned());
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Environment additions on top of the inherited parent environment.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        let mut vars = vec![
            (BROWSER_PATH_ENV.to_string(), self.browser_path.clone()),
            (DEBUGGING_PORT_ENV.to_string(), self.debugging_port.to_string()),
        ];
        vars.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        vars
    }
}

/// Request timeouts and lifecycle delays, in milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// run-agent, run-deep-search.
    pub long_request_ms: u64,
    /// get-recordings.
    pub short_request_ms: u64,
    /// Delay between spawn and the init handshake.
    pub init_delay_ms: u64,
    /// Time the worker gets to exit after stdin closes before it is killed.
    pub stop_grace_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            long_request_ms: 60_000,
            short_request_ms: 10_000,
            init_delay_ms: 2_000,
            stop_grace_ms: 3_000,
        }
    }
}

impl TimeoutSettings {
    pub fn long_request(&self) -> Duration {
        Duration::from_millis(self.long_request_ms)
    }

    pub fn short_request(&self) -> Duration {
        Duration::from_millis(self.short_request_ms)
    }

    pub fn init_delay(&self) -> Duration {
        Duration::from_millis(self.init_delay_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Broadcast channel capacity for passive listeners.
    pub event_capacity: usize,
    /// Longest accepted worker output line; longer lines are dropped.
    pub max_line_bytes: usize,
    /// Reject outstanding requests as soon as the worker exits instead of
    /// letting each one run into its timeout.
    pub fail_pending_on_exit: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
            max_line_bytes: 4 * 1024 * 1024,
            fail_pending_on_exit: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory holding one `<name>.json` file per saved configuration.
    pub configs_dir: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            configs_dir: agentdeck_home().join("configs").to_string_lossy().into_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// `~/.agentdeck`, falling back to `/tmp/.agentdeck` without a home dir.
pub fn agentdeck_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".agentdeck")
}

fn default_program() -> &'static str {
    if cfg!(windows) {
        "python"
    } else {
        "python3"
    }
}

fn default_browser_path() -> &'static str {
    if cfg!(windows) {
        r"C:\Program Files\Google\Chrome\Application\chrome.exe"
    } else if cfg!(target_os = "macos") {
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"
    } else {
        "/usr/bin/google-chrome"
    }
}
