//! Typed settings records sent as the `data` of `run-agent` and
//! `run-deep-search`.
//!
//! The bridge itself forwards payloads opaquely; these types exist so callers
//! (the CLI, saved configurations) can build a payload with the same defaults
//! the worker assumes for missing keys.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Custom,
    Browser,
    Org,
}

/// LLM selection shared by both agent kinds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub llm_provider: String,
    pub llm_model_name: String,
    pub llm_num_ctx: u32,
    pub llm_temperature: f64,
    pub llm_base_url: String,
    pub llm_api_key: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            llm_provider: "openai".into(),
            llm_model_name: "gpt-4o".into(),
            llm_num_ctx: 4096,
            llm_temperature: 0.0,
            llm_base_url: String::new(),
            llm_api_key: String::new(),
        }
    }
}

/// Settings form for a browser-agent run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub agent_type: AgentType,
    pub max_steps: u32,
    pub max_actions_per_step: u32,
    pub use_vision: bool,
    pub tool_calling_method: String,

    #[serde(flatten)]
    pub llm: LlmSettings,

    pub use_own_browser: bool,
    pub keep_browser_open: bool,
    pub headless: bool,
    pub disable_security: bool,
    pub enable_recording: bool,
    pub window_w: u32,
    pub window_h: u32,
    pub save_recording_path: String,
    pub save_trace_path: String,
    pub save_agent_history_path: String,
    pub chrome_cdp: String,

    pub task: String,
    pub add_infos: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_type: AgentType::Custom,
            max_steps: 25,
            max_actions_per_step: 3,
            use_vision: true,
            tool_calling_method: "functions".into(),
            llm: LlmSettings::default(),
            use_own_browser: false,
            keep_browser_open: false,
            headless: false,
            disable_security: false,
            enable_recording: false,
            window_w: 1280,
            window_h: 720,
            save_recording_path: String::new(),
            save_trace_path: String::new(),
            save_agent_history_path: String::new(),
            chrome_cdp: "http://localhost:9222".into(),
            task: String::new(),
            add_infos: String::new(),
        }
    }
}

impl AgentConfig {
    pub fn with_task(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Self::default()
        }
    }

    /// Flat JSON object in the shape the worker reads.
    pub fn to_payload(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Directories the run will write into, skipping unset paths.
    pub fn output_dirs(&self) -> Vec<String> {
        [
            &self.save_recording_path,
            &self.save_trace_path,
            &self.save_agent_history_path,
        ]
        .into_iter()
        .filter(|p| !p.trim().is_empty())
        .cloned()
        .collect()
    }
}

/// Settings for a deep-research run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeepSearchConfig {
    pub research_task: String,
    pub max_search_iterations: u32,
    pub max_query_per_iter: u32,

    #[serde(flatten)]
    pub llm: LlmSettings,

    pub use_vision: bool,
    pub use_own_browser: bool,
    pub headless: bool,
    pub chrome_cdp: String,
}

impl Default for DeepSearchConfig {
    fn default() -> Self {
        Self {
            research_task: String::new(),
            max_search_iterations: 3,
            max_query_per_iter: 1,
            llm: LlmSettings::default(),
            use_vision: false,
            use_own_browser: false,
            headless: true,
            chrome_cdp: "http://localhost:9222".into(),
        }
    }
}

impl DeepSearchConfig {
    pub fn with_task(task: impl Into<String>) -> Self {
        Self {
            research_task: task.into(),
            ..Self::default()
        }
    }

    pub fn to_payload(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
