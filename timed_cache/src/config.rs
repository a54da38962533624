//! Refresh, retry and concurrency policy shared by every cache type.
//!
//! A [`CacheConfig`] can be built in code, deserialized from YAML (durations in
//! milliseconds), or read from environment variables with a common prefix.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const DEFAULT_REFRESH: Duration = Duration::from_secs(5 * 60);
const DEFAULT_RETRY: Duration = Duration::from_secs(30);
const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(5 * 60);
const DEFAULT_EXCEPTION_LOCK: Duration = Duration::from_secs(2);

/// Timing and concurrency policy of a cache.
///
/// `retry_duration` should be shorter than `refresh_duration` to have any
/// effect. `stale_threshold_duration` only influences
/// [`TimedCache::is_stale`](crate::TimedCache::is_stale), never whether a read
/// refreshes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Age after which the value must be refreshed before it is returned.
    #[serde(rename = "refresh_ms", with = "millis")]
    pub refresh_duration: Duration,
    /// Age after which a value that fails the caller's validity predicate may
    /// be refreshed. Also paces retries while a failure is cached.
    #[serde(rename = "retry_ms", with = "millis")]
    pub retry_duration: Duration,
    /// Age beyond `refresh_duration` after which the value is considered
    /// completely stale.
    #[serde(rename = "stale_threshold_ms", with = "millis")]
    pub stale_threshold_duration: Duration,
    /// Remember supplier failures and replay them until the next retry.
    pub cache_exceptions: bool,
    /// How long a read waits for a refresh slot while a failure is cached.
    #[serde(rename = "exception_lock_ms", with = "millis")]
    pub exception_lock_duration: Duration,
    /// Number of supplier calls that may run at the same time.
    pub max_simultaneous_compute: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_duration: DEFAULT_REFRESH,
            retry_duration: DEFAULT_RETRY,
            stale_threshold_duration: DEFAULT_STALE_THRESHOLD,
            cache_exceptions: true,
            exception_lock_duration: DEFAULT_EXCEPTION_LOCK,
            max_simultaneous_compute: 1,
        }
    }
}

impl CacheConfig {
    /// Config with the given refresh and retry durations and defaults elsewhere.
    pub fn new(refresh_duration: Duration, retry_duration: Duration) -> Self {
        Self {
            refresh_duration,
            retry_duration,
            ..Self::default()
        }
    }

    pub fn with_refresh(mut self, duration: Duration) -> Self {
        self.refresh_duration = duration;
        self
    }

    pub fn with_retry(mut self, duration: Duration) -> Self {
        self.retry_duration = duration;
        self
    }

    pub fn with_stale_threshold(mut self, duration: Duration) -> Self {
        self.stale_threshold_duration = duration;
        self
    }

    pub fn with_cache_exceptions(mut self, enabled: bool) -> Self {
        self.cache_exceptions = enabled;
        self
    }

    pub fn with_exception_lock(mut self, duration: Duration) -> Self {
        self.exception_lock_duration = duration;
        self
    }

    pub fn with_max_simultaneous_compute(mut self, max: usize) -> Self {
        self.max_simultaneous_compute = max;
        self
    }

    /// Age after which [`TimedCache::is_stale`](crate::TimedCache::is_stale) reports true.
    pub fn stale_duration(&self) -> Duration {
        self.refresh_duration
            .saturating_add(self.stale_threshold_duration)
    }

    /// Checks the invariants every cache relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_simultaneous_compute == 0 {
            return Err(ConfigError::InvalidConcurrency(
                self.max_simultaneous_compute,
            ));
        }
        Ok(())
    }

    /// Parses a YAML document. Missing keys keep their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads the config from `<PREFIX>_REFRESH_MS`, `<PREFIX>_RETRY_MS`,
    /// `<PREFIX>_STALE_THRESHOLD_MS`, `<PREFIX>_CACHE_EXCEPTIONS`,
    /// `<PREFIX>_EXCEPTION_LOCK_MS` and `<PREFIX>_MAX_SIMULTANEOUS_COMPUTE`.
    ///
    /// Unset variables keep their defaults; values that do not parse are an error.
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            refresh_duration: env_millis(prefix, "REFRESH_MS", defaults.refresh_duration)?,
            retry_duration: env_millis(prefix, "RETRY_MS", defaults.retry_duration)?,
            stale_threshold_duration: env_millis(
                prefix,
                "STALE_THRESHOLD_MS",
                defaults.stale_threshold_duration,
            )?,
            cache_exceptions: env_parse(prefix, "CACHE_EXCEPTIONS", defaults.cache_exceptions)?,
            exception_lock_duration: env_millis(
                prefix,
                "EXCEPTION_LOCK_MS",
                defaults.exception_lock_duration,
            )?,
            max_simultaneous_compute: env_parse(
                prefix,
                "MAX_SIMULTANEOUS_COMPUTE",
                defaults.max_simultaneous_compute,
            )?,
        };
        config.validate()?;
        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(prefix: &str, name: &str, default: T) -> Result<T, ConfigError> {
    let key = format!("{}_{}", prefix, name);
    match std::env::var(&key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidEnv { key, value }),
        Err(_) => Ok(default),
    }
}

fn env_millis(prefix: &str, name: &str, default: Duration) -> Result<Duration, ConfigError> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    env_parse(prefix, name, default_ms).map(Duration::from_millis)
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
