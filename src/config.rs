//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MAILTRIAGE_CONFIG` (environment variable)
//! 2. `~/.config/mailtriage/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailtriage\config.toml` (Windows)
//! 3. Built-in defaults
//!
//! Every component receives the section it needs at construction; nothing
//! reads configuration from globals.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TriageError};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Who "me" is when scanning recipients.
    pub identity: IdentityConfig,
    /// Signal extraction settings.
    pub extraction: ExtractionConfig,
    /// Ground-truth labelling settings.
    pub labeling: LabelingConfig,
    /// Classifier training settings.
    pub training: TrainingConfig,
    /// Live scoring settings.
    pub inference: InferenceConfig,
    /// Dataset, model and mailbox locations.
    pub paths: PathsConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// The mailbox owner's identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Primary SMTP address of the mailbox owner.
    pub email: String,
    /// Display name of the mailbox owner.
    pub display_name: String,
    /// Domain recorded for senders whose identity has no `@`.
    pub internal_domain: String,
    /// Directory aliases: internal-directory address → primary SMTP address.
    pub directory: BTreeMap<String, String>,
}

/// Upper bound for `recipient_scan_cap`.
pub const MAX_RECIPIENT_SCAN: usize = 50;

/// Signal extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Only items received within this many days are extracted.
    pub lookback_days: u32,
    /// Maximum characters kept from the cleaned body.
    pub snippet_chars: usize,
    /// Number of recipients inspected for the To/Cc role of the owner,
    /// at most [`MAX_RECIPIENT_SCAN`].
    pub recipient_scan_cap: usize,
    /// Emit a progress update every N records within a folder.
    pub progress_every: usize,
}

/// Ground-truth labelling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelingConfig {
    /// Days an unread, unanswered item must age before it counts as ignored.
    pub staleness_days: u32,
}

/// Classifier training settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Vocabulary cap for the subject vectorizer.
    pub max_features: usize,
    /// Largest n-gram length (1 = unigrams only).
    pub ngram_max: usize,
    /// Number of boosting rounds.
    pub iterations: usize,
    /// Depth of each symmetric tree.
    pub depth: usize,
    /// Shrinkage applied to every leaf value.
    pub learning_rate: f64,
    /// L2 regularisation on leaf values.
    pub l2_leaf_reg: f64,
    /// Maximum number of borders per feature.
    pub border_count: usize,
    /// Reweight classes inversely to their frequency.
    pub balanced_classes: bool,
    /// Share of rows held out for the evaluation report.
    pub test_fraction: f64,
    /// Seed for the holdout shuffle.
    pub seed: u64,
}

/// Live scoring settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Probability at or above which an item is tagged urgent.
    pub high_threshold: f64,
    /// Probability at or above which an item is tagged for review.
    pub low_threshold: f64,
    /// Category applied to urgent items.
    pub urgent_tag: String,
    /// Category applied to items worth a review.
    pub review_tag: String,
}

/// File locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Default mailbox (mbox file or directory) to read.
    pub mailbox: Option<PathBuf>,
    /// Pipe-delimited dataset file.
    pub dataset: PathBuf,
    /// Serialized model artifact.
    pub model: PathBuf,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            email: String::new(),
            display_name: String::new(),
            internal_domain: "internal".to_string(),
            directory: BTreeMap::new(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            lookback_days: 365,
            snippet_chars: 500,
            recipient_scan_cap: MAX_RECIPIENT_SCAN,
            progress_every: 100,
        }
    }
}

impl Default for LabelingConfig {
    fn default() -> Self {
        Self { staleness_days: 7 }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            max_features: 500,
            ngram_max: 2,
            iterations: 300,
            depth: 6,
            learning_rate: 0.1,
            l2_leaf_reg: 3.0,
            border_count: 32,
            balanced_classes: true,
            test_fraction: 0.2,
            seed: 42,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            high_threshold: 0.75,
            low_threshold: 0.60,
            urgent_tag: "urgent".to_string(),
            review_tag: "review".to_string(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            mailbox: None,
            dataset: PathBuf::from("dataset.csv"),
            model: PathBuf::from("urgency_model.bin"),
        }
    }
}

// ── Validation ──────────────────────────────────────────────────

impl InferenceConfig {
    /// Thresholds must satisfy `0 <= low <= high <= 1`.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.low_threshold) || !(0.0..=1.0).contains(&self.high_threshold)
        {
            return Err(TriageError::InvalidConfig(
                "decision thresholds must lie in [0, 1]".into(),
            ));
        }
        if self.low_threshold > self.high_threshold {
            return Err(TriageError::InvalidConfig(format!(
                "low threshold {} is above high threshold {}",
                self.low_threshold, self.high_threshold
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Reject values the pipelines cannot work with.
    pub fn validate(&self) -> Result<()> {
        self.inference.validate()?;
        let tr = &self.training;
        if !(0.0..1.0).contains(&tr.test_fraction) {
            return Err(TriageError::InvalidConfig(
                "test_fraction must lie in [0, 1)".into(),
            ));
        }
        if tr.depth == 0 || tr.depth > 16 {
            return Err(TriageError::InvalidConfig(
                "tree depth must be between 1 and 16".into(),
            ));
        }
        if tr.border_count == 0 || tr.border_count > 255 {
            return Err(TriageError::InvalidConfig(
                "border_count must be between 1 and 255".into(),
            ));
        }
        if tr.ngram_max == 0 {
            return Err(TriageError::InvalidConfig("ngram_max must be at least 1".into()));
        }
        let cap = self.extraction.recipient_scan_cap;
        if cap == 0 || cap > MAX_RECIPIENT_SCAN {
            return Err(TriageError::InvalidConfig(format!(
                "recipient_scan_cap must be between 1 and {MAX_RECIPIENT_SCAN}, got {cap}"
            )));
        }
        Ok(())
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Save configuration to the standard location.
pub fn save_config(config: &Config) -> anyhow::Result<()> {
    let path = config_file_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config file path"))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(&path, contents)?;
    tracing::info!(path = %path.display(), "Saved config");
    Ok(())
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILTRIAGE_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    dirs::config_dir().map(|d| d.join("mailtriage").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailtriage")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("mailtriage.log")
}
