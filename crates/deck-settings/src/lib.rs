//! # deck-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`AgentdeckSettings::default()`]
//! 2. **User file**: `~/.agentdeck/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `AGENTDECK_*` overrides (highest priority)

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, overlay, load_settings, load_settings_from_path, settings_path};
pub use types::*;
