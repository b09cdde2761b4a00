//! Configuration management
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. CLI flags override file values before validation.

use crate::executor::{ApplyPolicy, ArtifactMode, ErrorClassifier, ErrorContext};
use crate::pipeline::{PipelineResult, ValidationError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Cluster CLI program
    pub cli: String,
    /// Log level, overridden by `RUST_LOG`
    pub log_level: String,
    /// Where rendered manifests live
    pub manifests_dir: PathBuf,
    /// Suffix marking template manifests, stripped from the destination
    pub template_extension: String,
    /// Apply settings
    pub apply: ApplyConfig,
    /// Wait command settings
    pub wait: WaitConfig,
    /// Pod phase wait settings
    pub pod_wait: PodWaitConfig,
    /// Extra transient-error patterns
    pub classifier: ClassifierConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cli: "oc".to_string(),
            log_level: "info".to_string(),
            manifests_dir: PathBuf::from("manifests"),
            template_extension: ".j2".to_string(),
            apply: ApplyConfig::default(),
            wait: WaitConfig::default(),
            pod_wait: PodWaitConfig::default(),
            classifier: ClassifierConfig::default(),
        }
    }
}

/// Apply settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApplyConfig {
    /// Per-attempt timeout
    pub timeout_secs: u64,
    /// First backoff delay
    pub initial_retry_delay_secs: u64,
    /// Backoff ceiling as a multiple of the first delay
    pub max_delay_multiplier: u32,
    /// Success artifact handling
    pub artifact_mode: ArtifactMode,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            initial_retry_delay_secs: 5,
            max_delay_multiplier: 12,
            artifact_mode: ArtifactMode::Backup,
        }
    }
}

/// Wait command settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WaitConfig {
    /// Retries after the first attempt
    pub retries: u32,
    /// Pause between attempts
    pub delay_secs: u64,
    /// Per-attempt timeout, none by default
    pub command_timeout_secs: Option<u64>,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            retries: 50,
            delay_secs: 5,
            command_timeout_secs: None,
        }
    }
}

/// Pod phase wait settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PodWaitConfig {
    /// Overall budget
    pub timeout_secs: u64,
    /// Pause between polls
    pub poll_interval_secs: u64,
}

impl Default for PodWaitConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 3600,
            poll_interval_secs: 10,
        }
    }
}

/// Extra transient-error patterns, matched case-insensitively
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifierConfig {
    /// Added to the apply rules
    pub extra_apply_patterns: Vec<String>,
    /// Added to the wait rules
    pub extra_wait_patterns: Vec<String>,
}

impl Config {
    /// Loads a YAML configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> PipelineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Parses YAML configuration text; empty text yields the defaults
    ///
    /// # Errors
    ///
    /// Returns an error for invalid YAML or unknown keys.
    pub fn from_yaml(text: &str) -> PipelineResult<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Checks ranges and compiles the extra patterns
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let positive = |field: &str, value: u64| {
            if value == 0 {
                Err(ValidationError::InvalidConfig {
                    field: field.to_string(),
                    reason: "must be greater than zero".to_string(),
                })
            } else {
                Ok(())
            }
        };

        if self.cli.trim().is_empty() {
            return Err(ValidationError::InvalidConfig {
                field: "cli".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        positive("apply.timeout_secs", self.apply.timeout_secs)?;
        positive("apply.initial_retry_delay_secs", self.apply.initial_retry_delay_secs)?;
        positive("apply.max_delay_multiplier", u64::from(self.apply.max_delay_multiplier))?;
        positive("wait.delay_secs", self.wait.delay_secs)?;
        if let Some(timeout) = self.wait.command_timeout_secs {
            positive("wait.command_timeout_secs", timeout)?;
        }
        positive("pod_wait.timeout_secs", self.pod_wait.timeout_secs)?;
        positive("pod_wait.poll_interval_secs", self.pod_wait.poll_interval_secs)?;

        self.classifier().map(|_| ())
    }

    /// Builds the classifier with the configured extra patterns
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidConfig`] for a pattern that does not
    /// compile.
    pub fn classifier(&self) -> Result<ErrorClassifier, ValidationError> {
        ErrorClassifier::new()
            .with_extra_patterns(ErrorContext::Apply, &self.classifier.extra_apply_patterns)?
            .with_extra_patterns(ErrorContext::Wait, &self.classifier.extra_wait_patterns)
    }

    /// Retry and artifact policy for the applier
    #[must_use]
    pub fn apply_policy(&self) -> ApplyPolicy {
        ApplyPolicy {
            initial_retry_delay: Duration::from_secs(self.apply.initial_retry_delay_secs),
            max_delay_multiplier: self.apply.max_delay_multiplier,
            artifact_mode: self.apply.artifact_mode,
        }
    }

    /// Per-attempt apply timeout
    #[must_use]
    pub fn apply_timeout(&self) -> Duration {
        Duration::from_secs(self.apply.timeout_secs)
    }
}
