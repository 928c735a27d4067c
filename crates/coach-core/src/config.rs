//! Persisted config (Ollama endpoint, models, thresholds, sampling) in the app data directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app_data;
use crate::chatbot::{ChatbotSettings, DEFAULT_RETRIEVAL_THRESHOLD, DEFAULT_SYSTEM_PROMPT};
use crate::embed::{DEFAULT_BASE_URL, DEFAULT_EMBED_MODEL};
use crate::generate::{SamplingParams, DEFAULT_CHAT_MODEL};
use crate::retriever::DEFAULT_NEIGHBOR_COUNT;

const CONFIG_FILENAME: &str = "config.toml";
const ARTIFACT_DIRNAME: &str = "chatbot";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub ollama_url: String,
    /// Embedding model used when fitting a new bundle.
    pub embed_model: String,
    pub chat_model: String,
    /// Where the retriever bundle lives. Defaults to `<app data>/chatbot`.
    pub artifact_dir: Option<String>,
    /// FAQ CSV used by `fit` when no path is given.
    pub faq_csv: Option<String>,
    pub retrieval_threshold: f32,
    /// Matches retrieved per query (and FAQ blocks passed to generation).
    pub top_k: usize,
    /// Default neighbor count stored in the index.
    pub neighbor_count: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub repeat_penalty: f32,
    pub generation_timeout_secs: u64,
    pub system_prompt: String,
}

impl Default for Config {
    fn default() -> Self {
        let sampling = SamplingParams::default();
        Self {
            ollama_url: DEFAULT_BASE_URL.to_string(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            artifact_dir: None,
            faq_csv: None,
            retrieval_threshold: DEFAULT_RETRIEVAL_THRESHOLD,
            top_k: 3,
            neighbor_count: DEFAULT_NEIGHBOR_COUNT,
            temperature: sampling.temperature,
            top_p: sampling.top_p,
            repeat_penalty: sampling.repeat_penalty,
            generation_timeout_secs: 60,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl Config {
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_p: self.top_p,
            repeat_penalty: self.repeat_penalty,
        }
    }

    pub fn chatbot_settings(&self) -> ChatbotSettings {
        ChatbotSettings {
            retrieval_threshold: self.retrieval_threshold,
            system_prompt: self.system_prompt.clone(),
        }
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    /// Configured bundle directory, or `chatbot/` under the app data directory.
    pub fn artifact_dir(&self) -> Option<PathBuf> {
        match self.artifact_dir.as_deref().filter(|s| !s.is_empty()) {
            Some(dir) => Some(PathBuf::from(dir)),
            None => app_data::app_data_dir().map(|d| d.join(ARTIFACT_DIRNAME)),
        }
    }

    pub fn faq_csv(&self) -> Option<PathBuf> {
        self.faq_csv.as_deref().filter(|s| !s.is_empty()).map(PathBuf::from)
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.top_k == 0 || self.neighbor_count == 0 {
            return Err(ConfigError::Invalid(
                "top_k and neighbor_count must be at least 1".into(),
            ));
        }
        if self.generation_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "generation_timeout_secs must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(ConfigError::Invalid(format!(
                "top_p must be in [0, 1], got {}",
                self.top_p
            )));
        }
        Ok(self)
    }
}

/// Load config from the app data directory. Returns default config if missing or invalid.
pub fn load_config() -> Config {
    let Some(data_dir) = app_data::app_data_dir() else {
        return Config::default();
    };
    let path = data_dir.join(CONFIG_FILENAME);
    if !path.is_file() {
        return Config::default();
    }
    load_config_from(&path).unwrap_or_else(|e| {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "ignoring invalid config, using defaults"
        );
        Config::default()
    })
}

/// Load and validate a config file.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
    let config: Config = toml::from_str(&s).map_err(ConfigError::Parse)?;
    config.validate()
}

/// Save config to the app data directory, creating it if needed.
pub fn save_config(config: &Config) -> Result<(), ConfigError> {
    let data_dir = app_data::app_data_dir().ok_or(ConfigError::NoDataDir)?;
    save_config_to(config, &data_dir.join(CONFIG_FILENAME))
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    let s = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(ConfigError::Write)?;
    }
    std::fs::write(path, s).map_err(ConfigError::Write)
}

/// Path of the config file, if the app data directory can be determined.
pub fn config_path() -> Option<PathBuf> {
    app_data::app_data_dir().map(|d| d.join(CONFIG_FILENAME))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine app data directory")]
    NoDataDir,
    #[error("failed to read config: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("failed to serialize config: {0}")]
    Serialize(#[source] toml::ser::Error),
    #[error("failed to write config: {0}")]
    Write(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "retrieval_threshold = 0.8\nchat_model = \"llama3.2\"\n").unwrap();
        let c = load_config_from(&path).unwrap();
        assert_eq!(c.retrieval_threshold, 0.8);
        assert_eq!(c.chat_model, "llama3.2");
        assert_eq!(c.top_k, Config::default().top_k);
        assert_eq!(c.chatbot_settings().retrieval_threshold, 0.8);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "retrieval_treshold = 0.8\n").unwrap();
        assert!(matches!(load_config_from(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn zero_top_k_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "top_k = 0\n").unwrap();
        assert!(matches!(load_config_from(&path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "generation_timeout_secs = 0\n").unwrap();
        match load_config_from(&path) {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("generation_timeout_secs")),
            other => panic!("expected invalid config, got {other:?}"),
        }
    }

    #[test]
    fn save_then_load_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Coach").join("config.toml");
        let c = Config {
            artifact_dir: Some("/srv/coach/chatbot".into()),
            generation_timeout_secs: 5,
            ..Config::default()
        };
        save_config_to(&c, &path).unwrap();
        assert_eq!(load_config_from(&path).unwrap(), c);
        assert_eq!(c.artifact_dir(), Some(PathBuf::from("/srv/coach/chatbot")));
        assert_eq!(c.generation_timeout(), Duration::from_secs(5));
    }
}
