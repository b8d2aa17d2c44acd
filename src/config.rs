//! Evaluation configuration.
//!
//! The dataset/category/app identifiers and the score threshold namespace the
//! ledger file, so one ledger exists per configuration tuple. Everything else
//! tunes the judge and the batch driver.
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `JUDGE_DATASET_TYPE` | Dataset split | `train` |
//! | `JUDGE_CATEGORY` | App category | `map` |
//! | `JUDGE_APP_NAME` | App name | `google_maps` |
//! | `JUDGE_LEDGER_PREFIX` | Ledger filename prefix | `AITA` |
//! | `JUDGE_SCORE_THRESHOLD` | Minimum screenshot score kept as evidence | `3` |
//! | `JUDGE_MAX_EVIDENCE_IMAGES` | Cap on evidence images and reasons | `50` |
//! | `JUDGE_NULL_POLICY` | `count-as-failure` or `exclude` | `count-as-failure` |
//! | `JUDGE_MAX_CONCURRENT_TRAJECTORIES` | Trajectories judged at once | `1` |
//! | `JUDGE_MAX_CONCURRENT_SCORING` | Screenshot calls in flight (0 = all) | `0` |
//! | `JUDGE_MODEL` | Judge model | `gpt-4o` |
//! | `JUDGE_TEMPERATURE` | Sampling temperature | `0.0` |
//! | `JUDGE_MAX_TOKENS` | Max tokens per completion | `512` |
//! | `JUDGE_REQUEST_TIMEOUT_SECS` | Per-call timeout | `120` |
//! | `JUDGE_RETRY_MAX_ATTEMPTS` | Attempts per call, first included | `3` |

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::ledger::NullLabelPolicy;
use crate::llm::retry::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS};
use crate::llm::{RetryPolicy, DEFAULT_MODEL};

/// Default score threshold for evidence selection.
pub const DEFAULT_SCORE_THRESHOLD: u8 = 3;

/// Hard cap on evidence images and reasoning strings in the verdict prompt.
pub const DEFAULT_MAX_EVIDENCE_IMAGES: usize = 50;

/// Default max tokens per completion.
pub const DEFAULT_MAX_TOKENS: u32 = 512;

/// Default per-call timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Model call parameters shared by the three judge stages.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    /// Model identifier; empty uses the provider default.
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.0,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Configuration for one evaluation run.
#[derive(Debug, Clone)]
pub struct EvalConfig {
    // Ledger namespace
    pub dataset_type: String,
    pub category: String,
    pub app_name: String,
    pub ledger_prefix: String,

    // Judging
    /// Screenshots scoring at or above this are kept as evidence.
    pub score_threshold: u8,
    /// Cap applied independently to evidence images and reasons.
    pub max_evidence_images: usize,
    /// Attach the steps' declared images as reference images to every stage.
    pub attach_step_images: bool,
    pub model: ModelSettings,

    // Batch
    pub null_label_policy: NullLabelPolicy,
    pub max_concurrent_trajectories: usize,
    /// Screenshot scoring calls in flight per trajectory; 0 means all at once.
    pub max_concurrent_scoring: usize,

    // Provider calls
    pub request_timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            dataset_type: "train".to_string(),
            category: "map".to_string(),
            app_name: "google_maps".to_string(),
            ledger_prefix: "AITA".to_string(),

            score_threshold: DEFAULT_SCORE_THRESHOLD,
            max_evidence_images: DEFAULT_MAX_EVIDENCE_IMAGES,
            attach_step_images: false,
            model: ModelSettings::default(),

            null_label_policy: NullLabelPolicy::default(),
            max_concurrent_trajectories: 1,
            max_concurrent_scoring: 0,

            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            retry_max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            retry_max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl EvalConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `JUDGE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("JUDGE_DATASET_TYPE") {
            config.dataset_type = val;
        }
        if let Ok(val) = std::env::var("JUDGE_CATEGORY") {
            config.category = val;
        }
        if let Ok(val) = std::env::var("JUDGE_APP_NAME") {
            config.app_name = val;
        }
        if let Ok(val) = std::env::var("JUDGE_LEDGER_PREFIX") {
            config.ledger_prefix = val;
        }
        if let Ok(val) = std::env::var("JUDGE_SCORE_THRESHOLD") {
            config.score_threshold = parse_env_value(&val, "JUDGE_SCORE_THRESHOLD")?;
        }
        if let Ok(val) = std::env::var("JUDGE_MAX_EVIDENCE_IMAGES") {
            config.max_evidence_images = parse_env_value(&val, "JUDGE_MAX_EVIDENCE_IMAGES")?;
        }
        if let Ok(val) = std::env::var("JUDGE_NULL_POLICY") {
            config.null_label_policy = parse_env_value(&val, "JUDGE_NULL_POLICY")?;
        }
        if let Ok(val) = std::env::var("JUDGE_MAX_CONCURRENT_TRAJECTORIES") {
            config.max_concurrent_trajectories =
                parse_env_value(&val, "JUDGE_MAX_CONCURRENT_TRAJECTORIES")?;
        }
        if let Ok(val) = std::env::var("JUDGE_MAX_CONCURRENT_SCORING") {
            config.max_concurrent_scoring = parse_env_value(&val, "JUDGE_MAX_CONCURRENT_SCORING")?;
        }
        if let Ok(val) = std::env::var("JUDGE_MODEL") {
            config.model.model = val;
        }
        if let Ok(val) = std::env::var("JUDGE_TEMPERATURE") {
            config.model.temperature = parse_env_value(&val, "JUDGE_TEMPERATURE")?;
        }
        if let Ok(val) = std::env::var("JUDGE_MAX_TOKENS") {
            config.model.max_tokens = parse_env_value(&val, "JUDGE_MAX_TOKENS")?;
        }
        if let Ok(val) = std::env::var("JUDGE_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "JUDGE_REQUEST_TIMEOUT_SECS")?;
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Ok(val) = std::env::var("JUDGE_RETRY_MAX_ATTEMPTS") {
            config.retry_max_attempts = parse_env_value(&val, "JUDGE_RETRY_MAX_ATTEMPTS")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the score threshold.
    pub fn with_score_threshold(mut self, threshold: u8) -> Self {
        self.score_threshold = threshold;
        self
    }

    /// Set the ledger namespace.
    pub fn with_namespace(
        mut self,
        dataset_type: impl Into<String>,
        category: impl Into<String>,
        app_name: impl Into<String>,
    ) -> Self {
        self.dataset_type = dataset_type.into();
        self.category = category.into();
        self.app_name = app_name.into();
        self
    }

    /// Set the null-label policy.
    pub fn with_null_label_policy(mut self, policy: NullLabelPolicy) -> Self {
        self.null_label_policy = policy;
        self
    }

    /// Set how many trajectories are judged concurrently.
    pub fn with_max_concurrent_trajectories(mut self, n: usize) -> Self {
        self.max_concurrent_trajectories = n;
        self
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.score_threshold > 5 {
            return Err(ConfigError::ValidationFailed(format!(
                "score_threshold must be between 0 and 5, got {}",
                self.score_threshold
            )));
        }
        if self.max_evidence_images == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_evidence_images must be greater than 0".to_string(),
            ));
        }
        if self.max_concurrent_trajectories == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrent_trajectories must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(ConfigError::ValidationFailed(format!(
                "temperature must be between 0.0 and 2.0, got {}",
                self.model.temperature
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "request_timeout must be greater than 0".to_string(),
            ));
        }
        if self.retry_max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "retry_max_attempts must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("dataset_type", &self.dataset_type),
            ("category", &self.category),
            ("app_name", &self.app_name),
        ] {
            if value.is_empty() || value.contains(['/', '\\']) {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} must be a non-empty name without path separators",
                    name
                )));
            }
        }
        Ok(())
    }

    fn namespace(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.ledger_prefix, self.dataset_type, self.category, self.app_name
        )
    }

    /// Ledger file name for this configuration tuple.
    pub fn ledger_file_name(&self) -> String {
        format!(
            "{}_autoeval_results(score_threshold_{}).jsonl",
            self.namespace(),
            self.score_threshold
        )
    }

    /// Name used by older runs, which wrote the same line format under `.json`.
    pub fn legacy_ledger_file_name(&self) -> String {
        format!(
            "{}_autoeval_results(score_threshold_{}).json",
            self.namespace(),
            self.score_threshold
        )
    }

    /// Ledger path inside `output_dir`.
    ///
    /// Resolves to the legacy `.json` ledger when only that one exists, so a
    /// run started by older tooling is resumed rather than started over.
    pub fn ledger_path(&self, output_dir: &Path) -> PathBuf {
        let current = output_dir.join(self.ledger_file_name());
        let legacy = output_dir.join(self.legacy_ledger_file_name());
        if !current.exists() && legacy.is_file() {
            return legacy;
        }
        current
    }

    /// File name of the per-instruction success summary.
    pub fn summary_file_name(&self) -> String {
        format!(
            "{}_autoeval_success_results(score_threshold_{}).txt",
            self.namespace(),
            self.score_threshold
        )
    }

    /// Retry policy for provider calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(self.retry_max_attempts)
            .with_base_delay(self.retry_base_delay)
            .with_max_delay(self.retry_max_delay)
    }
}

fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}
