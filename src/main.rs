//! # agentdeck
//!
//! Headless front end for the agent bridge: `serve` speaks JSON lines on
//! stdin/stdout, `call` runs a single command and prints its reply.

#![deny(unsafe_code)]

mod serve;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use deck_bridge::{needs_worker, Bridge};
use deck_core::agent::{AgentConfig, DeepSearchConfig};
use deck_settings::AgentdeckSettings;
use deck_telemetry::{init_telemetry, parse_level, TelemetryConfig};
use serde_json::Value;

#[derive(Parser, Debug)]
#[command(name = "agentdeck", about = "Drive a browser-automation agent worker")]
struct Cli {
    /// Settings file (defaults to ~/.agentdeck/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log level, overriding settings.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the worker and serve commands as JSON lines on stdin/stdout.
    Serve,

    /// Run one command and print its JSON reply.
    Call {
        /// Command name, e.g. `run-agent` or `get-configs`.
        command: String,

        /// JSON payload. A value that is not valid JSON is sent as a string.
        payload: Option<String>,

        /// Build a `run-agent` or `run-deep-search` payload with default
        /// settings for this task.
        #[arg(long, conflicts_with = "payload")]
        task: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => deck_settings::load_settings_from_path(path),
        None => deck_settings::load_settings(),
    }
    .context("Failed to load settings")?;

    let _ = init_telemetry(&telemetry_config(&settings, cli.log_level.as_deref()));

    match cli.command {
        Command::Serve => {
            let bridge = Arc::new(Bridge::new(settings));
            serve::run(bridge).await
        }
        Command::Call {
            command,
            payload,
            task,
        } => {
            let payload = match task {
                Some(task) => task_payload(&command, task)?,
                None => parse_payload(payload.as_deref()),
            };
            call(settings, &command, payload).await
        }
    }
}

async fn call(settings: AgentdeckSettings, command: &str, payload: Value) -> Result<()> {
    let bridge = Bridge::new(settings);
    if command == deck_bridge::commands::RUN_AGENT {
        prepare_output_dirs(&bridge, &payload).await?;
    }
    if needs_worker(command) {
        bridge.start().context("Failed to start worker")?;
    }

    let reply = bridge.handle(command, payload).await;
    bridge.teardown().await;

    println!("{}", serde_json::to_string_pretty(&reply)?);
    if reply.get("status").and_then(Value::as_str) == Some("error") {
        bail!(
            "{command} failed: {}",
            reply.get("message").and_then(Value::as_str).unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn telemetry_config(settings: &AgentdeckSettings, cli_level: Option<&str>) -> TelemetryConfig {
    let level = cli_level.unwrap_or(&settings.logging.level);
    TelemetryConfig {
        log_level: parse_level(level).unwrap_or(tracing::Level::INFO),
        json: settings.logging.json,
        ..TelemetryConfig::default()
    }
}

/// The settings form creates recording/trace/history directories before a
/// run; do the same for payloads that parse as an agent configuration.
async fn prepare_output_dirs(bridge: &Bridge, payload: &Value) -> Result<()> {
    let Ok(config) = serde_json::from_value::<AgentConfig>(payload.clone()) else {
        return Ok(());
    };
    let paths = config.output_dirs();
    if paths.is_empty() {
        return Ok(());
    }
    let reply = bridge
        .handle(deck_bridge::commands::CREATE_DIRS, serde_json::json!({ "paths": paths }))
        .await;
    if reply.get("status").and_then(Value::as_str) != Some("success") {
        bail!("Failed to create output directories: {reply}");
    }
    Ok(())
}

fn task_payload(command: &str, task: String) -> Result<Value> {
    let payload = if command == deck_bridge::commands::RUN_DEEP_SEARCH {
        DeepSearchConfig::with_task(task).to_payload()?
    } else {
        AgentConfig::with_task(task).to_payload()?
    };
    Ok(payload)
}

/// Missing payload is `null`; anything that does not parse is a bare string.
fn parse_payload(raw: Option<&str>) -> Value {
    match raw {
        None => Value::Null,
        Some(raw) => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
    }
}
