//! Store configuration.
//!
//! Loaded from a TOML file at the composition root. Every field has a
//! default matching the production deployment, so an absent file or an
//! empty table yields a working configuration. [`StoreConfig::validate`]
//! must pass before the config is handed to [`crate::FeedbackManager`]:
//! the dominance threshold has to be a strict majority of the sample size,
//! otherwise two profiles could both reach quorum for the same item.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Hard cap on submissions held per account. Replacing an existing
    /// submission for the same item is allowed even at the cap.
    #[serde(default = "default_max_submissions_per_account")]
    pub max_submissions_per_account: usize,

    /// How many recent, address-distinct submissions the housekeeper
    /// samples per item before attempting a merge.
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// Minimum occurrences of one profile value within a sample for that
    /// profile to be declared dominant. Must satisfy
    /// `2 * dominance_threshold > sample_size`.
    #[serde(default = "default_dominance_threshold")]
    pub dominance_threshold: usize,

    /// Seconds between housekeeping runs (one run also fires at startup).
    #[serde(default = "default_housekeeping_interval_secs")]
    pub housekeeping_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_submissions_per_account: default_max_submissions_per_account(),
            sample_size: default_sample_size(),
            dominance_threshold: default_dominance_threshold(),
            housekeeping_interval_secs: default_housekeeping_interval_secs(),
        }
    }
}

impl StoreConfig {
    /// Check the internal consistency rules.
    ///
    /// # Errors
    ///
    /// Fails when any bound is zero, when the threshold exceeds the sample
    /// size, or when the threshold is not a strict majority of the sample.
    pub fn validate(&self) -> Result<()> {
        if self.max_submissions_per_account == 0 {
            bail!("max_submissions_per_account must be at least 1");
        }
        if self.sample_size == 0 || self.dominance_threshold == 0 {
            bail!("sample_size and dominance_threshold must be at least 1");
        }
        if self.dominance_threshold > self.sample_size {
            bail!(
                "dominance_threshold ({}) cannot exceed sample_size ({})",
                self.dominance_threshold,
                self.sample_size
            );
        }
        if self.dominance_threshold * 2 <= self.sample_size {
            bail!(
                "dominance_threshold ({}) must be a strict majority of sample_size ({})",
                self.dominance_threshold,
                self.sample_size
            );
        }
        Ok(())
    }

    #[must_use]
    pub const fn housekeeping_interval(&self) -> Duration {
        Duration::from_secs(self.housekeeping_interval_secs)
    }
}

/// Load the store config from `path`, falling back to defaults when the
/// file does not exist.
///
/// # Errors
///
/// Fails when the file exists but cannot be read or parsed, or when the
/// parsed config does not validate.
pub fn load_config(path: &Path) -> Result<StoreConfig> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str::<StoreConfig>(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?
    } else {
        StoreConfig::default()
    };
    config.validate()?;
    Ok(config)
}

const fn default_max_submissions_per_account() -> usize {
    2283
}

const fn default_sample_size() -> usize {
    17
}

const fn default_dominance_threshold() -> usize {
    13
}

const fn default_housekeeping_interval_secs() -> u64 {
    4080 // 68 minutes
}
