//! The only state kept across runs: last objective, the full-HTML
//! preference, and the backend credential.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::agent::AgentError;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub last_objective: Option<String>,
    #[serde(default)]
    pub send_full_html: bool,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Settings {
    /// `<config dir>/glass-steer/settings.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("glass-steer").join("settings.json"))
    }

    /// Missing file means defaults.
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .map_err(|e| AgentError::Config(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&raw).map_err(|e| AgentError::Config(format!("parse {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<(), AgentError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AgentError::Config(format!("create {}: {e}", parent.display())))?;
        }
        let raw = serde_json::to_string_pretty(self).map_err(|e| AgentError::Config(e.to_string()))?;
        fs::write(path, raw).map_err(|e| AgentError::Config(format!("write {}: {e}", path.display())))
    }

    pub fn masked_key(&self) -> String {
        match self.api_key.as_deref() {
            None | Some("") => "(not set)".to_string(),
            Some(k) if k.chars().count() <= 8 => "****".to_string(),
            Some(k) => {
                let tail: String = k.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
                format!("****{tail}")
            }
        }
    }
}
