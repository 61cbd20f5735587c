//! Configuration management for tts-hooks.
//!
//! Loads config from a YAML file in standard locations. Every field has a
//! default, so a missing or partial file is never an error.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// State file shared by all hook processes. Empty means the default
    /// location under the system temp dir.
    pub cache_file: String,
    pub retention_secs: u64,
    pub default_cooldown_secs: u64,
    /// Per-category overrides on top of the built-in cooldown table.
    pub cooldowns: HashMap<String, u64>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            cache_file: String::new(),
            retention_secs: 3600,
            default_cooldown_secs: 300,
            cooldowns: HashMap::new(),
        }
    }
}

impl DedupConfig {
    pub fn cache_path(&self) -> PathBuf {
        if self.cache_file.is_empty() {
            std::env::temp_dir()
                .join("tts-queue")
                .join("message-cache.json")
        } else {
            PathBuf::from(&self.cache_file)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub port: u16,
    pub max_playback_secs: u64,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            port: 8768,
            max_playback_secs: 30,
            connect_timeout_ms: 300,
            request_timeout_ms: 2000,
        }
    }
}

impl CoordinatorConfig {
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        let command = if cfg!(target_os = "macos") {
            "say"
        } else {
            "espeak-ng"
        };
        Self {
            command: command.into(),
            args: vec![],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
    pub dir: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: String::new(),
        }
    }
}

impl HistoryConfig {
    pub fn history_dir(&self) -> PathBuf {
        if self.dir.is_empty() {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".tts-hook-history")
        } else {
            PathBuf::from(&self.dir)
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dedup: DedupConfig,
    pub coordinator: CoordinatorConfig,
    pub speech: SpeechConfig,
    pub history: HistoryConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./tts-hooks.yaml
    /// 2. ~/.config/tts-hooks/config.yaml
    /// 3. /etc/tts-hooks/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("tts-hooks.yaml")),
                dirs::home_dir().map(|h| h.join(".config/tts-hooks/config.yaml")),
                Some(PathBuf::from("/etc/tts-hooks/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match serde_yml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }
}
