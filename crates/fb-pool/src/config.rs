//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Configuration shared by every pool a [`PoolManager`](crate::PoolManager) creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of connections per target.
    pub max_connections: usize,

    /// How long an idle connection may sit before the reaper closes it.
    pub idle_timeout: Duration,

    /// How often the reaper sweeps.
    pub reap_interval: Duration,

    /// How long a caller may wait in the queue for a connection.
    ///
    /// `None` waits indefinitely.
    pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            idle_timeout: Duration::from_secs(300),
            reap_interval: Duration::from_secs(60),
            acquire_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from `FIREBIRD_POOL_*` environment variables.
    pub fn from_env() -> Result<Self, PoolError> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Read overrides from a variable lookup function.
    ///
    /// Recognizes `FIREBIRD_POOL_MAX`, `FIREBIRD_POOL_IDLE_TIMEOUT_SECS`,
    /// `FIREBIRD_POOL_REAP_INTERVAL_SECS` and
    /// `FIREBIRD_POOL_ACQUIRE_TIMEOUT_SECS` (`0` disables the deadline).
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PoolError> {
        let mut config = Self::default();

        if let Some(max) = lookup("FIREBIRD_POOL_MAX") {
            config.max_connections = usize::try_from(parse_number("FIREBIRD_POOL_MAX", &max)?)
                .map_err(|_| PoolError::Config(format!("FIREBIRD_POOL_MAX: '{max}' is out of range")))?;
        }
        if let Some(secs) = lookup("FIREBIRD_POOL_IDLE_TIMEOUT_SECS") {
            config.idle_timeout =
                Duration::from_secs(parse_number("FIREBIRD_POOL_IDLE_TIMEOUT_SECS", &secs)?);
        }
        if let Some(secs) = lookup("FIREBIRD_POOL_REAP_INTERVAL_SECS") {
            config.reap_interval =
                Duration::from_secs(parse_number("FIREBIRD_POOL_REAP_INTERVAL_SECS", &secs)?);
        }
        if let Some(secs) = lookup("FIREBIRD_POOL_ACQUIRE_TIMEOUT_SECS") {
            let secs = parse_number("FIREBIRD_POOL_ACQUIRE_TIMEOUT_SECS", &secs)?;
            config.acquire_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the maximum number of connections per target.
    #[must_use]
    pub fn max_connections(mut self, count: usize) -> Self {
        self.max_connections = count;
        self
    }

    /// Set the idle timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the reaper sweep interval.
    #[must_use]
    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Set the queued acquisition deadline.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Check the configuration for values the pool cannot work with.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_connections == 0 {
            return Err(PoolError::Config("max_connections must be at least 1".into()));
        }
        if self.reap_interval.is_zero() {
            return Err(PoolError::Config("reap_interval must be non-zero".into()));
        }
        Ok(())
    }
}

fn parse_number(name: &str, value: &str) -> Result<u64, PoolError> {
    value
        .trim()
        .parse()
        .map_err(|_| PoolError::Config(format!("{name}: invalid number '{value}'")))
}
