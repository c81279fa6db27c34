use deck_core::envelope::{Diagnostic, DiagnosticLevel};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Tracing target used when re-logging worker output.
pub const WORKER_TARGET: &str = "worker";

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "deck_bridge" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Filter directives in `EnvFilter` syntax, e.g. `info,deck_worker=debug`.
    pub fn filter_directives(&self) -> String {
        let mut filter_str = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter_str
    }
}

/// Parse a level name such as `"debug"` or `"WARN"`.
pub fn parse_level(s: &str) -> Option<Level> {
    s.trim().parse().ok()
}

/// Initialize the global subscriber. Call once at startup.
///
/// Output goes to stderr so stdout stays free for the JSON-lines IPC channel.
/// Returns `false` if a global subscriber was already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry().with(fmt_layer).try_init().is_ok()
}

/// Re-log a worker diagnostic line under the `worker` target.
pub fn record_diagnostic(diag: &Diagnostic) {
    match (diag.level, diag.malformed) {
        (DiagnosticLevel::Error, _) => {
            tracing::warn!(target: WORKER_TARGET, malformed = diag.malformed, "{}", diag.text);
        }
        (DiagnosticLevel::Info, true) => {
            tracing::debug!(target: WORKER_TARGET, malformed = true, "{}", diag.text);
        }
        (DiagnosticLevel::Info, false) => {
            tracing::info!(target: WORKER_TARGET, "{}", diag.text);
        }
    }
}
