//! Configuration types for the replay engine

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, RewindError};

/// Main configuration for the replay engine
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RewindConfig {
    /// Flush debounce configuration
    pub flush: FlushConfig,

    /// Session lifetime configuration
    pub session: SessionConfig,

    /// Sampling rates
    pub sampling: SampleRates,

    /// Event buffer configuration
    pub buffer: BufferConfig,

    /// Send retry configuration
    pub retry: RetryConfig,

    /// Breadcrumb throttling
    pub throttle: ThrottleConfig,

    /// Limits on large DOM mutation batches
    pub mutations: MutationConfig,

    /// Report pipeline exceptions to the configured error reporter
    pub capture_exceptions: bool,
}

/// Debounce window for flushes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    /// Quiet period before a scheduled flush fires
    #[serde(with = "humantime_serde")]
    pub min_delay: Duration,

    /// Longest a scheduled flush may be postponed after the first trigger
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// A session younger than this is not flushed yet; capped at
    /// [`MIN_REPLAY_DURATION_LIMIT`]
    #[serde(with = "humantime_serde")]
    pub min_replay_duration: Duration,
}

/// Upper bound for [`FlushConfig::min_replay_duration`]
pub const MIN_REPLAY_DURATION_LIMIT: Duration = Duration::from_secs(15);

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(15),
            min_replay_duration: Duration::from_millis(4999),
        }
    }
}

impl FlushConfig {
    /// Minimum replay duration with the upper bound applied
    pub fn effective_min_replay_duration(&self) -> Duration {
        self.min_replay_duration.min(MIN_REPLAY_DURATION_LIMIT)
    }
}

/// Session lifetime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inactivity after which a session expires
    #[serde(with = "humantime_serde")]
    pub idle_expiry: Duration,

    /// Absolute lifetime of a session regardless of activity
    #[serde(with = "humantime_serde")]
    pub max_session_life: Duration,

    /// Idle threshold used when the page returns to the foreground
    #[serde(with = "humantime_serde")]
    pub visibility_change_timeout: Duration,

    /// Persist the session to storage so it survives reloads
    pub sticky: bool,

    /// Storage key holding the serialized session
    pub storage_key: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_expiry: Duration::from_secs(5 * 60),
            max_session_life: Duration::from_secs(60 * 60),
            visibility_change_timeout: Duration::from_secs(5 * 60),
            sticky: true,
            storage_key: "rewindReplaySession".to_string(),
        }
    }
}

/// Probabilities used when a new session draws its sampling decision
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleRates {
    /// Probability of recording the whole session continuously
    pub session_sample_rate: f64,

    /// Probability of buffering and sending only once an error occurs
    pub error_sample_rate: f64,
}

impl Default for SampleRates {
    fn default() -> Self {
        Self {
            session_sample_rate: 0.1,
            error_sample_rate: 1.0,
        }
    }
}

/// Event buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Deflate segments before sending
    pub use_compression: bool,

    /// Events older than this are dropped instead of buffered
    #[serde(with = "humantime_serde")]
    pub stale_event_threshold: Duration,

    /// Full snapshot interval while buffering
    #[serde(with = "humantime_serde")]
    pub checkout_interval: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            use_compression: true,
            stale_event_threshold: Duration::from_secs(5 * 60),
            checkout_interval: Duration::from_secs(60),
        }
    }
}

/// Retry policy for sending segments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Wait before the first retry; later waits compound on it
    #[serde(with = "humantime_serde")]
    pub base_interval: Duration,

    /// Retries after the initial attempt
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(5000),
            max_retries: 3,
        }
    }
}

impl RetryConfig {
    /// Set the base retry interval
    pub fn with_base_interval(mut self, interval: Duration) -> Self {
        self.base_interval = interval;
        self
    }

    /// Set the number of retries after the initial attempt
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Throttle applied to breadcrumb and span events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Events allowed per window
    pub max_events: usize,

    /// Window length
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_events: 300,
            window: Duration::from_secs(5),
        }
    }
}

/// Thresholds for mutation batches reported by the recorder. Zero disables
/// either check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationConfig {
    /// Batches larger than this leave a `replay.mutations` breadcrumb
    pub breadcrumb_limit: usize,

    /// Batches larger than this stop the replay
    pub limit: usize,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            breadcrumb_limit: 750,
            limit: 10_000,
        }
    }
}

impl MutationConfig {
    pub fn exceeds_breadcrumb_limit(&self, count: usize) -> bool {
        self.breadcrumb_limit > 0 && count > self.breadcrumb_limit
    }

    pub fn exceeds_limit(&self, count: usize) -> bool {
        self.limit > 0 && count > self.limit
    }
}

/// Builder for RewindConfig
pub struct ConfigBuilder {
    config: RewindConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            config: RewindConfig::default(),
        }
    }

    /// Set flush configuration
    pub fn flush(mut self, config: FlushConfig) -> Self {
        self.config.flush = config;
        self
    }

    /// Set session configuration
    pub fn session(mut self, config: SessionConfig) -> Self {
        self.config.session = config;
        self
    }

    /// Set sampling rates
    pub fn sampling(mut self, session_sample_rate: f64, error_sample_rate: f64) -> Self {
        self.config.sampling = SampleRates {
            session_sample_rate,
            error_sample_rate,
        };
        self
    }

    /// Set buffer configuration
    pub fn buffer(mut self, config: BufferConfig) -> Self {
        self.config.buffer = config;
        self
    }

    /// Set retry configuration
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.config.retry = config;
        self
    }

    /// Set mutation thresholds
    pub fn mutations(mut self, config: MutationConfig) -> Self {
        self.config.mutations = config;
        self
    }

    /// Enable or disable exception reporting
    pub fn capture_exceptions(mut self, enabled: bool) -> Self {
        self.config.capture_exceptions = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> RewindConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RewindConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. Configuration file (rewind.toml)
    /// 3. Environment variable overrides (`REWIND_FLUSH__MIN_DELAY=2s`)
    /// 4. File named by REWIND_CONFIG_PATH, if set
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source is invalid or the merged
    /// configuration fails validation.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(RewindConfig::default()))
            .merge(Toml::file("rewind.toml"))
            .merge(Env::prefixed("REWIND_").split("__").ignore(&["config_path"]));

        if let Ok(path) = std::env::var("REWIND_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: RewindConfig = figment.extract().map_err(|e| {
            RewindError::Configuration(format!("Failed to load configuration: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: RewindConfig = Figment::from(Serialized::defaults(RewindConfig::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                RewindError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a rate is outside `[0, 1]`, the flush window is
    /// inverted, or the retry interval is zero.
    pub fn validate(&self) -> Result<()> {
        for (name, rate) in [
            ("session_sample_rate", self.sampling.session_sample_rate),
            ("error_sample_rate", self.sampling.error_sample_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(RewindError::Configuration(format!(
                    "{} must be between 0 and 1, got {}",
                    name, rate
                )));
            }
        }

        if self.flush.min_delay > self.flush.max_delay {
            return Err(RewindError::Configuration(format!(
                "flush.min_delay ({:?}) exceeds flush.max_delay ({:?})",
                self.flush.min_delay, self.flush.max_delay
            )));
        }

        if self.retry.base_interval.is_zero() {
            return Err(RewindError::Configuration(
                "retry.base_interval must be greater than zero".to_string(),
            ));
        }

        if self.throttle.max_events == 0 {
            return Err(RewindError::Configuration(
                "throttle.max_events must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_replay_constants() {
        let config = RewindConfig::default();
        assert_eq!(config.flush.min_delay, Duration::from_secs(5));
        assert_eq!(config.flush.max_delay, Duration::from_secs(15));
        assert_eq!(config.session.idle_expiry, Duration::from_secs(300));
        assert_eq!(config.session.max_session_life, Duration::from_secs(3600));
        assert_eq!(config.retry.base_interval, Duration::from_millis(5000));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.flush.min_replay_duration, Duration::from_millis(4999));
        assert_eq!(config.mutations.breadcrumb_limit, 750);
        assert_eq!(config.mutations.limit, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn min_replay_duration_is_capped() {
        let flush = FlushConfig {
            min_replay_duration: Duration::from_secs(60),
            ..Default::default()
        };
        assert_eq!(flush.effective_min_replay_duration(), MIN_REPLAY_DURATION_LIMIT);
    }

    #[test]
    fn zero_mutation_limits_disable_checks() {
        let mutations = MutationConfig {
            breadcrumb_limit: 0,
            limit: 0,
        };
        assert!(!mutations.exceeds_breadcrumb_limit(1_000_000));
        assert!(!mutations.exceeds_limit(1_000_000));
        assert!(MutationConfig::default().exceeds_limit(10_001));
        assert!(!MutationConfig::default().exceeds_limit(10_000));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[flush]\nmin_delay = \"1s\"\n\n[sampling]\nsession_sample_rate = 1.0\n"
        )
        .unwrap();

        let config = RewindConfig::from_file(file.path()).unwrap();
        assert_eq!(config.flush.min_delay, Duration::from_secs(1));
        assert_eq!(config.flush.max_delay, Duration::from_secs(15));
        assert_eq!(config.sampling.session_sample_rate, 1.0);
        assert_eq!(config.sampling.error_sample_rate, 1.0);
    }

    #[test]
    fn rejects_out_of_range_rates() {
        let config = ConfigBuilder::new().sampling(1.5, 0.0).build();
        assert!(matches!(
            config.validate(),
            Err(RewindError::Configuration(_))
        ));
    }

    #[test]
    fn rejects_inverted_flush_window() {
        let config = ConfigBuilder::new()
            .flush(FlushConfig {
                min_delay: Duration::from_secs(20),
                max_delay: Duration::from_secs(10),
                ..Default::default()
            })
            .build();
        assert!(config.validate().is_err());
    }
}
