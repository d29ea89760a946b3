use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::ConfigError;
use crate::post::Source;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CrossmatchConfig {
    pub logging: LoggingConfig,
    pub embedding: EmbeddingConfig,
    pub matching: MatchingConfig,
    pub normalize: NormalizeConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
    pub dimensions: usize,
    pub batch_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MatchingConfig {
    /// Similarity threshold τ in (0, 1]. Pairs scoring below it never match.
    pub threshold: f64,
    /// Recognized sources, in canonical pairing order.
    pub sources: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NormalizeConfig {
    pub max_body_chars: usize,
    pub max_title_chars: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_crossmatch_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "paraphrase-multilingual-MiniLM-L12-v2".into(),
            cache_dir,
            dimensions: 384,
            batch_size: 32,
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: 0.9,
            sources: Source::ALL.iter().map(|s| s.as_str().to_string()).collect(),
        }
    }
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            max_body_chars: 8000,
            max_title_chars: 200,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: "./data".into(),
        }
    }
}

/// Returns `~/.crossmatch/`, or `./.crossmatch` when no home directory is known.
pub fn default_crossmatch_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".crossmatch")
}

/// Returns the default config file path: `~/.crossmatch/config.toml`
pub fn default_config_path() -> PathBuf {
    default_crossmatch_dir().join("config.toml")
}

impl MatchingConfig {
    /// Check τ and resolve the configured source names, preserving their order.
    pub fn validate(&self) -> Result<Vec<Source>, ConfigError> {
        validate_threshold(self.threshold)?;

        if self.sources.is_empty() {
            return Err(ConfigError::NoSources);
        }
        let mut sources: Vec<Source> = Vec::with_capacity(self.sources.len());
        for name in &self.sources {
            let source: Source = name.parse()?;
            if sources.contains(&source) {
                return Err(ConfigError::DuplicateSource(source));
            }
            sources.push(source);
        }
        Ok(sources)
    }
}

impl NormalizeConfig {
    /// Zero caps would truncate every title or body to nothing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_title_chars == 0 {
            return Err(ConfigError::ZeroTextCap("max_title_chars"));
        }
        if self.max_body_chars == 0 {
            return Err(ConfigError::ZeroTextCap("max_body_chars"));
        }
        Ok(())
    }
}

/// τ must lie in (0, 1].
pub fn validate_threshold(threshold: f64) -> Result<(), ConfigError> {
    if threshold.is_finite() && threshold > 0.0 && threshold <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::ThresholdOutOfRange(threshold))
    }
}

impl CrossmatchConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            CrossmatchConfig::default()
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment variable overrides (CROSSMATCH_THRESHOLD,
    /// CROSSMATCH_LOG_LEVEL, CROSSMATCH_MODEL_DIR, CROSSMATCH_OUTPUT_DIR).
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("CROSSMATCH_THRESHOLD") {
            self.matching.threshold = val
                .trim()
                .parse()
                .map_err(|_| ConfigError::ThresholdUnparsable(val.clone()))?;
        }
        if let Ok(val) = std::env::var("CROSSMATCH_LOG_LEVEL") {
            self.logging.log_level = val;
        }
        if let Ok(val) = std::env::var("CROSSMATCH_MODEL_DIR") {
            self.embedding.cache_dir = val;
        }
        if let Ok(val) = std::env::var("CROSSMATCH_OUTPUT_DIR") {
            self.output.dir = val;
        }
        Ok(())
    }

    /// Validate everything a run depends on. Returns the configured sources.
    pub fn validate(&self) -> Result<Vec<Source>, ConfigError> {
        if self.embedding.dimensions == 0 {
            return Err(ConfigError::ZeroDimensions);
        }
        if self.embedding.provider != "local" {
            return Err(ConfigError::UnknownProvider(self.embedding.provider.clone()));
        }
        self.normalize.validate()?;
        self.matching.validate()
    }

    /// Resolve the model cache directory, expanding `~` if needed.
    pub fn resolved_model_dir(&self) -> PathBuf {
        expand_tilde(&self.embedding.cache_dir)
    }

    pub fn resolved_output_dir(&self) -> PathBuf {
        expand_tilde(&self.output.dir)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
