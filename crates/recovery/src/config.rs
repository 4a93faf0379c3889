use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const CONFIG_ENV: &str = "IPOD_RECOVERY_CONFIG";

const DEFAULT_DATABASE_RELPATH: &str = "iPod_Control/iTunes/iTunesDB";
const DEFAULT_MUSIC_RELPATH: &str = "iPod_Control/Music";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub database_relpath: String,
    pub music_relpath: String,
    pub audio_extensions: Vec<String>,
    pub scan_workers: usize,
    pub assemble_workers: usize,
    pub progress_interval_ms: u64,
    pub retry_transient_reads: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            database_relpath: DEFAULT_DATABASE_RELPATH.to_string(),
            music_relpath: DEFAULT_MUSIC_RELPATH.to_string(),
            audio_extensions: ["mp3", "m4a", "m4b", "m4p", "mp4", "aac", "wav", "aif", "aiff"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            scan_workers: 4,
            assemble_workers: 4,
            progress_interval_ms: 250,
            retry_transient_reads: true,
        }
    }
}

impl RecoveryConfig {
    pub fn scan_workers(&self) -> usize {
        self.scan_workers.max(1)
    }

    pub fn assemble_workers(&self) -> usize {
        self.assemble_workers.max(1)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn is_audio_extension(&self, ext: &str) -> bool {
        self.audio_extensions
            .iter()
            .any(|known| known.eq_ignore_ascii_case(ext))
    }

    fn normalize(&mut self) {
        let defaults = RecoveryConfig::default();
        if self.database_relpath.trim().is_empty() {
            self.database_relpath = defaults.database_relpath;
        }
        if self.music_relpath.trim().is_empty() {
            self.music_relpath = defaults.music_relpath;
        }
        self.audio_extensions = self
            .audio_extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        if self.audio_extensions.is_empty() {
            self.audio_extensions = defaults.audio_extensions;
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var(CONFIG_ENV) {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("recovery.yaml"))
            .unwrap_or_else(|| PathBuf::from("recovery.yaml")),
        Err(_) => PathBuf::from("recovery.yaml"),
    }
}

pub fn load_config(path: &Path) -> Result<RecoveryConfig, ConfigError> {
    if !path.exists() {
        return Ok(RecoveryConfig::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(RecoveryConfig::default());
    }
    let mut config: RecoveryConfig = serde_yaml::from_str(&contents)?;
    config.normalize();
    Ok(config)
}
