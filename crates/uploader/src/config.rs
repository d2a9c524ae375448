//! Upload tuning: pool size, part size and retry policy.

use std::time::Duration;

use icepack_transfer::{DEFAULT_PART_SIZE, MAX_PART_SIZE, MAX_PARTS, PlanLimits, is_valid_part_size};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::UploadError;

/// Default number of parts uploaded at the same time.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Default number of attempts per part before the upload fails.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;

/// Settings for one [`ArchiveUploader`](crate::ArchiveUploader).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Maximum number of in-flight part uploads (and part buffers).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Preferred part size in bytes; raised automatically for archives that
    /// would otherwise need more than `max_parts` parts.
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Part-count ceiling of the vault.
    #[serde(default = "default_max_parts")]
    pub max_parts: u64,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_part_size() -> u64 {
    DEFAULT_PART_SIZE
}

fn default_max_parts() -> u64 {
    MAX_PARTS
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            part_size: default_part_size(),
            max_parts: default_max_parts(),
            retry: RetryPolicy::default(),
        }
    }
}

impl UploadConfig {
    /// Planning limits derived from this configuration.
    pub fn limits(&self) -> PlanLimits {
        PlanLimits {
            max_parts: self.max_parts,
            max_part_size: MAX_PART_SIZE,
        }
    }

    /// Rejects settings the uploader cannot run with.
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.concurrency == 0 {
            return Err(UploadError::InvalidConfig(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.max_parts == 0 {
            return Err(UploadError::InvalidConfig(
                "max_parts must be at least 1".into(),
            ));
        }
        if !is_valid_part_size(self.part_size, &self.limits()) {
            return Err(UploadError::InvalidConfig(format!(
                "part_size {} must be 1 MiB times a power of two, at most 4 GiB",
                self.part_size
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(UploadError::InvalidConfig(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Per-part retry policy with exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per part, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failed attempt, in milliseconds. 0 retries immediately.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Backoff cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier applied for each further attempt.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RetryPolicy {
    /// Retries up to `max_attempts` times without waiting in between.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_factor: 1.0,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based),
    /// with ±25% jitter so parallel parts do not retry in lockstep.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.initial_delay_ms == 0 {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let ms = self.initial_delay_ms as f64 * self.backoff_factor.powi(exp);
        let capped = ms.min(self.max_delay_ms as f64);
        let jitter = capped * 0.25 * rand::thread_rng().gen_range(-1.0f64..=1.0);
        Duration::from_secs_f64((capped + jitter).max(0.0) / 1000.0)
    }
}
