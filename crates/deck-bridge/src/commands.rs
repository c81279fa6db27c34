//! UI-facing command surface. Every command answers with a JSON value; bridge
//! failures become `{status: "error", message}` here so callers never see a
//! Rust error.

use std::path::PathBuf;
use std::time::Duration;

use deck_core::RequestId;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::configs::ConfigStore;
use crate::dispatch::Dispatcher;

pub const RUN_AGENT: &str = "run-agent";
pub const STOP_AGENT: &str = "stop-agent";
pub const RUN_DEEP_SEARCH: &str = "run-deep-search";
pub const STOP_RESEARCH_AGENT: &str = "stop-research-agent";
pub const GET_RECORDINGS: &str = "get-recordings";
pub const SAVE_CONFIG: &str = "save-config";
pub const GET_CONFIGS: &str = "get-configs";
pub const LOAD_CONFIG: &str = "load-config";
pub const CREATE_DIRS: &str = "create-dirs";

/// Every command name [`CommandSurface::handle`] understands.
pub const COMMANDS: &[&str] = &[
    RUN_AGENT,
    STOP_AGENT,
    RUN_DEEP_SEARCH,
    STOP_RESEARCH_AGENT,
    GET_RECORDINGS,
    SAVE_CONFIG,
    GET_CONFIGS,
    LOAD_CONFIG,
    CREATE_DIRS,
];

/// Commands that talk to the worker. The rest only touch the filesystem.
pub fn needs_worker(command: &str) -> bool {
    matches!(
        command,
        RUN_AGENT | STOP_AGENT | RUN_DEEP_SEARCH | STOP_RESEARCH_AGENT | GET_RECORDINGS
    )
}

pub struct CommandSurface {
    dispatcher: Dispatcher,
    configs: ConfigStore,
    long_timeout: Duration,
    short_timeout: Duration,
}

impl CommandSurface {
    pub fn new(
        dispatcher: Dispatcher,
        configs: ConfigStore,
        long_timeout: Duration,
        short_timeout: Duration,
    ) -> Self {
        Self {
            dispatcher,
            configs,
            long_timeout,
            short_timeout,
        }
    }

    pub fn configs(&self) -> &ConfigStore {
        &self.configs
    }

    pub async fn handle(&self, command: &str, payload: Value) -> Value {
        match command {
            RUN_AGENT => {
                if payload.get("action").and_then(Value::as_str) == Some(CREATE_DIRS) {
                    return create_dirs(&payload);
                }
                self.invoke(RUN_AGENT, payload, self.long_timeout).await
            }
            RUN_DEEP_SEARCH => self.invoke(RUN_DEEP_SEARCH, payload, self.long_timeout).await,
            STOP_AGENT => self.stop(STOP_AGENT, "Stop request sent"),
            STOP_RESEARCH_AGENT => {
                self.stop(STOP_RESEARCH_AGENT, "Stop request sent to research agent")
            }
            GET_RECORDINGS => {
                let directory = string_arg(&payload, "directory").unwrap_or_default();
                let data = json!({ "directory": directory });
                match self
                    .dispatcher
                    .invoke_with_id(GET_RECORDINGS, Some(data), RequestId::new(), self.short_timeout)
                    .await
                {
                    Ok(result) => result,
                    Err(e) => error_reply(e),
                }
            }
            SAVE_CONFIG => self.save_config(&payload),
            GET_CONFIGS => match self.configs.list() {
                Ok(configs) => json!({ "status": "success", "configs": configs }),
                Err(e) => error_reply(e),
            },
            LOAD_CONFIG => {
                let Some(name) = string_arg(&payload, "name") else {
                    return error_reply("Missing config name");
                };
                match self.configs.load(&name) {
                    Ok(config) => json!({ "status": "success", "config": config }),
                    Err(e) => error_reply(e),
                }
            }
            CREATE_DIRS => create_dirs(&payload),
            other => error_reply(format!("Unknown command: {other}")),
        }
    }

    async fn invoke(&self, action: &str, payload: Value, timeout: Duration) -> Value {
        let data = (!payload.is_null()).then_some(payload);
        match self.dispatcher.invoke(action, data, timeout).await {
            Ok(result) => result,
            Err(e) => {
                warn!(action, error = %e, kind = e.error_kind(), "command failed");
                error_reply(e)
            }
        }
    }

    fn stop(&self, action: &str, message: &str) -> Value {
        match self.dispatcher.fire_and_forget(action, None) {
            Ok(()) => success_reply(message),
            Err(e) => error_reply(e),
        }
    }

    fn save_config(&self, payload: &Value) -> Value {
        let Some(name) = payload.get("name").and_then(Value::as_str) else {
            return error_reply("Missing config name");
        };
        let Some(config) = payload.get("config") else {
            return error_reply("Missing config");
        };
        match self.configs.save(name, config) {
            Ok(_) => success_reply("Config saved"),
            Err(e) => error_reply(e),
        }
    }
}

/// Create every directory in `payload.paths`, recursively. Never touches the
/// worker.
pub fn create_dirs(payload: &Value) -> Value {
    let paths = payload
        .get("paths")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for path in paths.iter().filter_map(Value::as_str) {
        let dir = PathBuf::from(path);
        // Anything already at the path counts as done, even a plain file.
        if dir.exists() {
            continue;
        }
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!(path = %dir.display(), error = %e, "failed to create directory");
            return error_reply(e);
        }
        info!(path = %dir.display(), "created directory");
    }
    success_reply("Directories created")
}

pub fn success_reply(message: impl std::fmt::Display) -> Value {
    json!({ "status": "success", "message": message.to_string() })
}

pub fn error_reply(message: impl std::fmt::Display) -> Value {
    json!({ "status": "error", "message": message.to_string() })
}

/// A bare string payload, or the string at `key` in an object payload.
fn string_arg(payload: &Value, key: &str) -> Option<String> {
    match payload {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get(key).and_then(Value::as_str).map(String::from),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::testing::{wait_for_sent, MockWorker};
    use crate::registry::CorrelationRegistry;
    use std::sync::Arc;

    struct Fixture {
        tmp: tempfile::TempDir,
        worker: Arc<MockWorker>,
        surface: Arc<CommandSurface>,
    }

    fn fixture(worker: Arc<MockWorker>) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let dispatcher = Dispatcher::new(worker.clone(), Arc::new(CorrelationRegistry::new()));
        let surface = CommandSurface::new(
            dispatcher,
            ConfigStore::new(tmp.path().join("configs")),
            Duration::from_secs(60),
            Duration::from_secs(10),
        );
        Fixture {
            tmp,
            worker,
            surface: Arc::new(surface),
        }
    }

    #[tokio::test]
    async fn run_agent_returns_worker_result() {
        let f = fixture(MockWorker::running());
        let surface = Arc::clone(&f.surface);
        let call = tokio::spawn(async move {
            surface
                .handle(RUN_AGENT, json!({"id": "42", "task": "find flights"}))
                .await
        });

        let sent = wait_for_sent(&f.worker, 1).await;
        assert_eq!(sent[0]["action"], "run-agent");
        assert_eq!(sent[0]["id"], "42");
        assert_eq!(sent[0]["data"]["task"], "find flights");

        f.surface
            .dispatcher
            .registry()
            .resolve("42", json!({"final_result": "done"}));
        assert_eq!(call.await.unwrap(), json!({"final_result": "done"}));
    }

    #[tokio::test]
    async fn run_agent_create_dirs_skips_worker() {
        let f = fixture(MockWorker::stopped());
        let target = f.tmp.path().join("out/recordings/deep");
        let reply = f
            .surface
            .handle(
                RUN_AGENT,
                json!({"action": "create-dirs", "paths": [target.to_string_lossy()]}),
            )
            .await;
        assert_eq!(reply, json!({"status": "success", "message": "Directories created"}));
        assert!(target.is_dir());
        assert!(f.worker.sent().is_empty());
    }

    #[tokio::test]
    async fn create_dirs_reports_failure() {
        let f = fixture(MockWorker::stopped());
        let file = f.tmp.path().join("plain-file");
        std::fs::write(&file, "x").unwrap();
        let reply = f
            .surface
            .handle(CREATE_DIRS, json!({"paths": [file.join("child").to_string_lossy()]}))
            .await;
        assert_eq!(reply["status"], "error");
    }

    #[tokio::test]
    async fn create_dirs_skips_existing_paths() {
        let f = fixture(MockWorker::stopped());
        let file = f.tmp.path().join("history.json");
        std::fs::write(&file, "[]").unwrap();
        let fresh = f.tmp.path().join("traces");
        let reply = f
            .surface
            .handle(
                CREATE_DIRS,
                json!({"paths": [file.to_string_lossy(), f.tmp.path().to_string_lossy(), fresh.to_string_lossy()]}),
            )
            .await;
        assert_eq!(reply, json!({"status": "success", "message": "Directories created"}));
        assert!(file.is_file());
        assert!(fresh.is_dir());
    }

    #[tokio::test]
    async fn not_running_becomes_error_object() {
        let f = fixture(MockWorker::stopped());
        for command in [RUN_AGENT, RUN_DEEP_SEARCH, GET_RECORDINGS, STOP_AGENT, STOP_RESEARCH_AGENT] {
            let reply = f.surface.handle(command, json!({})).await;
            assert_eq!(
                reply,
                json!({"status": "error", "message": "Worker process not running"}),
                "command {command}"
            );
        }
    }

    #[tokio::test]
    async fn stop_commands_fire_and_forget() {
        let f = fixture(MockWorker::running());
        assert_eq!(
            f.surface.handle(STOP_AGENT, Value::Null).await,
            json!({"status": "success", "message": "Stop request sent"})
        );
        assert_eq!(
            f.surface.handle(STOP_RESEARCH_AGENT, Value::Null).await,
            json!({"status": "success", "message": "Stop request sent to research agent"})
        );
        assert_eq!(
            f.worker.sent(),
            vec![json!({"action": "stop-agent"}), json!({"action": "stop-research-agent"})]
        );
        assert_eq!(f.surface.dispatcher.registry().pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn get_recordings_times_out_into_error_object() {
        let f = fixture(MockWorker::running());
        let reply = f.surface.handle(GET_RECORDINGS, json!("./tmp/record_videos")).await;
        assert_eq!(reply["status"], "error");
        assert!(reply["message"].as_str().unwrap().starts_with("Request timed out"));

        let sent = f.worker.sent();
        assert_eq!(sent[0]["data"], json!({"directory": "./tmp/record_videos"}));
        assert!(sent[0]["id"].as_str().unwrap().starts_with("req_"));
    }

    #[tokio::test]
    async fn config_commands_round_trip() {
        let f = fixture(MockWorker::stopped());
        let config = json!({"llm_provider": "anthropic", "max_steps": 40});

        let saved = f
            .surface
            .handle(SAVE_CONFIG, json!({"name": "default", "config": config}))
            .await;
        assert_eq!(saved, json!({"status": "success", "message": "Config saved"}));

        let listed = f.surface.handle(GET_CONFIGS, Value::Null).await;
        assert_eq!(listed, json!({"status": "success", "configs": ["default"]}));

        let loaded = f.surface.handle(LOAD_CONFIG, json!("default")).await;
        assert_eq!(loaded, json!({"status": "success", "config": config}));

        let by_key = f.surface.handle(LOAD_CONFIG, json!({"name": "default"})).await;
        assert_eq!(by_key["config"], config);
    }

    #[tokio::test]
    async fn config_errors_are_reported() {
        let f = fixture(MockWorker::stopped());
        assert_eq!(
            f.surface.handle(LOAD_CONFIG, json!("missing")).await,
            json!({"status": "error", "message": "Config not found: missing"})
        );
        let bad = f
            .surface
            .handle(SAVE_CONFIG, json!({"name": "../x", "config": {}}))
            .await;
        assert_eq!(bad["status"], "error");
        let no_name = f.surface.handle(SAVE_CONFIG, json!({"config": {}})).await;
        assert_eq!(no_name["status"], "error");
    }

    #[test]
    fn worker_commands() {
        assert!(needs_worker(RUN_AGENT));
        assert!(needs_worker(GET_RECORDINGS));
        assert!(!needs_worker(SAVE_CONFIG));
        assert!(!needs_worker(CREATE_DIRS));
        assert!(!needs_worker("reboot"));
    }

    #[tokio::test]
    async fn unknown_command() {
        let f = fixture(MockWorker::running());
        assert_eq!(
            f.surface.handle("reboot", Value::Null).await,
            json!({"status": "error", "message": "Unknown command: reboot"})
        );
        assert!(f.worker.sent().is_empty());
    }
}
