//! Configuration for the sync client.

use contentsync_protocol::{MAX_CHECKSUM_ENTRIES, MAX_SIGN_BATCH};
use rand::Rng;
use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Server URL.
    pub server_url: String,
    /// Timeout applied to every network call.
    pub timeout: Duration,
    /// Largest checksum map sent with a delta request.
    pub max_checksum_entries: usize,
    /// Paths per signing request.
    pub sign_batch_size: usize,
    /// Retry configuration for transient failures.
    pub retry: RetryConfig,
    /// Fresh signed URLs requested per asset after an expiry.
    pub url_refresh_attempts: u32,
    /// Free space kept in reserve on top of the estimated download size.
    pub disk_headroom_bytes: u64,
    /// Validate cached assets on every run, including runs with nothing to sync.
    pub validate_on_every_run: bool,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            timeout: Duration::from_secs(30),
            max_checksum_entries: MAX_CHECKSUM_ENTRIES,
            sign_batch_size: MAX_SIGN_BATCH,
            retry: RetryConfig::default(),
            url_refresh_attempts: 1,
            disk_headroom_bytes: 10 * 1024 * 1024,
            validate_on_every_run: true,
        }
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the checksum map cap.
    pub fn with_max_checksum_entries(mut self, max: usize) -> Self {
        self.max_checksum_entries = max;
        self
    }

    /// Sets the signing batch size.
    pub fn with_sign_batch_size(mut self, size: usize) -> Self {
        self.sign_batch_size = size.max(1);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets how many fresh URLs may be requested after an expiry.
    pub fn with_url_refresh_attempts(mut self, attempts: u32) -> Self {
        self.url_refresh_attempts = attempts;
        self
    }

    /// Sets the disk headroom.
    pub fn with_disk_headroom(mut self, bytes: u64) -> Self {
        self.disk_headroom_bytes = bytes;
        self
    }

    /// Enables or disables validation on every run.
    pub fn with_validate_on_every_run(mut self, validate: bool) -> Self {
        self.validate_on_every_run = validate;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Calculates the delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter && delay_secs > 0.0 {
            // Up to 25% jitter
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen_range(0.0..1.0);
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_defaults() {
        let config = SyncConfig::new("https://content.example.com");
        assert_eq!(config.server_url, "https://content.example.com");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_checksum_entries, 500);
        assert_eq!(config.sign_batch_size, 100);
        assert_eq!(config.url_refresh_attempts, 1);
        assert_eq!(config.disk_headroom_bytes, 10 * 1024 * 1024);
        assert!(config.validate_on_every_run);
    }

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::default()
            .with_timeout(Duration::from_secs(5))
            .with_sign_batch_size(0)
            .with_disk_headroom(0)
            .with_validate_on_every_run(false);

        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.sign_batch_size, 1);
        assert_eq!(config.disk_headroom_bytes, 0);
        assert!(!config.validate_on_every_run);
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(125));

        let delay2 = config.delay_for_attempt(2);
        assert!(delay2 >= Duration::from_millis(200));
        assert!(delay2 <= Duration::from_millis(250));
    }

    #[test]
    fn retry_delay_without_jitter_is_exact() {
        let config = RetryConfig::new(4)
            .with_initial_delay(Duration::from_millis(10))
            .with_jitter(false);
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(40));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);

        let delay = config.delay_for_attempt(5);
        assert!(delay <= Duration::from_millis(6250));
    }
}
