use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regoth_script::{VmLimits, DEFAULT_MAX_CALL_DEPTH, DEFAULT_MAX_STEPS};
use serde::{Deserialize, Serialize};

/// Engine tunables. Every field has a default so partial JSON files work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Compiled script image looked up through the file index.
    pub script_image: String,
    pub player_instance: String,
    /// Script state used as the default idle state when present.
    pub idle_state: String,
    /// Integer member whose element 0 holds hit points.
    pub hitpoints_member: String,
    pub name_member: String,
    pub max_call_depth: usize,
    pub max_steps: u64,
    pub tick_seconds: f32,
    pub unconscious_seconds: f32,
    /// Directory for savegames and hero exports.
    pub save_dir: PathBuf,
    pub event_log_lines: usize,
    pub random_seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            script_image: "GOTHIC.DAT".to_string(),
            player_instance: "PC_HERO".to_string(),
            idle_state: "ZS_IDLE".to_string(),
            hitpoints_member: "C_NPC.ATTRIBUTE".to_string(),
            name_member: "C_NPC.NAME".to_string(),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_steps: DEFAULT_MAX_STEPS,
            tick_seconds: 0.1,
            unconscious_seconds: 15.0,
            save_dir: PathBuf::from("."),
            event_log_lines: 64,
            random_seed: 0x5EED_1234,
        }
    }
}

impl EngineConfig {
    /// Read the config at `path` if it exists, otherwise fall back to defaults.
    pub fn from_json_file(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config json: {}", path.display()))
    }

    pub fn vm_limits(&self) -> VmLimits {
        VmLimits {
            max_call_depth: self.max_call_depth,
            max_steps: self.max_steps,
        }
    }

    pub fn save_path(&self, file: &str) -> PathBuf {
        self.save_dir.join(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn partial_files_keep_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "idle_state": "ZS_STAND", "unknown": 3 }}"#).unwrap();
        let config = EngineConfig::from_json_file(Some(file.path())).unwrap();
        assert_eq!(config.idle_state, "ZS_STAND");
        assert_eq!(config.player_instance, "PC_HERO");
    }

    #[test]
    fn missing_file_means_defaults() {
        let config = EngineConfig::from_json_file(Some(Path::new("/nonexistent/regoth.json")))
            .unwrap();
        assert_eq!(config, EngineConfig::default());
    }
}
