//! Token-bucket limiting of calls to external systems.
//!
//! Reads (status polls) and writes (create/delete) go through separate
//! [`ExternalCallLimiter`] instances so a burst of polling cannot starve
//! submissions. A caller waits for a token until one is available or its
//! cancellation fires; a cancelled wait never consumes a grant.

use std::fmt;
use std::num::NonZeroU32;

use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio_util::sync::CancellationToken;

use crate::config::{PluginConfig, RateLimiterConfig};
use crate::error::{Error, Result};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Rate limiter for one path to an external system.
pub struct ExternalCallLimiter {
    name: String,
    config: RateLimiterConfig,
    limiter: DirectLimiter,
}

impl fmt::Debug for ExternalCallLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalCallLimiter")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ExternalCallLimiter {
    /// Creates a limiter allowing `qps` calls per second with `burst` headroom.
    #[must_use]
    pub fn new(name: impl Into<String>, config: RateLimiterConfig) -> Self {
        let replenish_rate = NonZeroU32::new(config.qps.max(1)).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst.max(1)).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(replenish_rate).allow_burst(burst);

        Self {
            name: name.into(),
            config,
            limiter: RateLimiter::direct(quota),
        }
    }

    /// Name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits for a token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires first, including when
    /// it has already fired on entry.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                tracing::debug!(limiter = %self.name, "rate limiter wait cancelled");
                Err(Error::Cancelled)
            }
            () = self.limiter.until_ready() => Ok(()),
        }
    }

    /// Takes a token if one is available right now.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

/// The read and write limiters for one external system.
#[derive(Debug)]
pub struct ExternalCallLimiters {
    /// Limits status and lookup calls.
    pub read: ExternalCallLimiter,
    /// Limits create and delete calls.
    pub write: ExternalCallLimiter,
}

impl ExternalCallLimiters {
    /// Builds both limiters from plugin configuration.
    #[must_use]
    pub fn from_config(config: &PluginConfig) -> Self {
        Self {
            read: ExternalCallLimiter::new("read", config.read_rate_limiter),
            write: ExternalCallLimiter::new("write", config.write_rate_limiter),
        }
    }
}
