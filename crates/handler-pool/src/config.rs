//! Pool configuration.

use serde::{Deserialize, Serialize};

/// Environment variable read by [`PoolConfig::from_env`].
pub const LIMIT_ENV: &str = "HANDLER_POOL_LIMIT";

const DEFAULT_LIMIT: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of handlers ever created, and therefore of handlers busy at once.
    ///
    /// Zero disables creation entirely: requests can never be served.
    pub limit: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Read `HANDLER_POOL_LIMIT`, falling back to the default limit when it is
    /// unset or not a non-negative integer.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(LIMIT_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(limit) => config.limit = limit,
                Err(e) => {
                    tracing::warn!(
                        value = %raw,
                        error = %e,
                        "Invalid {LIMIT_ENV}, using default={DEFAULT_LIMIT}"
                    );
                }
            }
        }

        config
    }
}
