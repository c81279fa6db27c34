//! Named configuration files: one `<name>.json` per configuration.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigStoreError {
    #[error("Invalid config name: {0:?}")]
    InvalidName(String),

    #[error("Config not found: {0}")]
    NotFound(String),

    #[error("config store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config listing failed: {0}")]
    Pattern(String),
}

pub type Result<T> = std::result::Result<T, ConfigStoreError>;

pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `config` pretty-printed, replacing any previous file.
    pub fn save(&self, name: &str, config: &Value) -> Result<PathBuf> {
        let path = self.path_for(name)?;
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(&path, serde_json::to_string_pretty(config)?)?;
        debug!(name, path = %path.display(), "config saved");
        Ok(path)
    }

    /// Saved configuration names, sorted. Creates the directory if missing.
    pub fn list(&self) -> Result<Vec<String>> {
        std::fs::create_dir_all(&self.dir)?;
        let pattern = format!(
            "{}/*.json",
            glob::Pattern::escape(&self.dir.to_string_lossy())
        );
        let entries = glob::glob(&pattern).map_err(|e| ConfigStoreError::Pattern(e.to_string()))?;

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Load a saved configuration verbatim.
    pub fn load(&self, name: &str) -> Result<Value> {
        let path = self.path_for(name)?;
        if !path.is_file() {
            return Err(ConfigStoreError::NotFound(name.to_string()));
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{name}.json")))
    }
}

/// Names become file stems, so anything that could escape the directory is
/// refused.
pub fn validate_name(name: &str) -> Result<()> {
    let bad = name.trim().is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
        || name.contains("..");
    if bad {
        return Err(ConfigStoreError::InvalidName(name.to_string()));
    }
    Ok(())
}
