//! Per (client origin, username) login-failure counter with a fixed lockout window.

use crate::config::LoginLimitConfig;
use crate::models::{SsoError, SsoResult, StoreError};
use crate::store::{PREFIX_LOGIN_FAIL, SharedStore};
use std::time::Duration;
use tracing::{debug, warn};

/// Throttle key for a login attempt.
pub fn throttle_key(client_origin: &str, username: &str) -> String {
    format!("{client_origin}:{username}")
}

#[derive(Clone)]
pub struct LoginThrottle {
    store: SharedStore,
    max_attempts: u64,
    window: Duration,
}

impl LoginThrottle {
    pub fn new(store: SharedStore, config: &LoginLimitConfig) -> Self {
        Self {
            store,
            max_attempts: config.max_attempts,
            window: config.lock_duration(),
        }
    }

    pub fn max_attempts(&self) -> u64 {
        self.max_attempts
    }

    /// Rejects with [`SsoError::TooManyAttempts`] when `key` is at or over the limit.
    ///
    /// Reads the counter only; a rejected attempt does not consume another slot.
    pub async fn check(&self, key: &str) -> SsoResult<()> {
        let failures = self.failure_count(key).await?;
        if failures >= self.max_attempts {
            warn!(key, failures, "login throttled");
            return Err(SsoError::TooManyAttempts);
        }
        Ok(())
    }

    /// Counts one failure and returns the new total.
    ///
    /// The window starts at the first failure: the TTL is attached, in the same atomic
    /// step, only when the counter goes from absent to 1, so later failures do not slide it.
    pub async fn record_failure(&self, key: &str) -> SsoResult<u64> {
        let store_key = format!("{PREFIX_LOGIN_FAIL}{key}");
        let count = self.store.incr_with_ttl(&store_key, self.window).await?;
        debug!(key, count, "login failure recorded");
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Current failure count; 0 when absent.
    pub async fn failure_count(&self, key: &str) -> SsoResult<u64> {
        let store_key = format!("{PREFIX_LOGIN_FAIL}{key}");
        let Some(raw) = self.store.get(&store_key).await? else {
            return Ok(0);
        };
        let count: i64 = raw
            .parse()
            .map_err(|_| StoreError::NotAnInteger(store_key.clone()))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    pub async fn clear(&self, key: &str) -> SsoResult<()> {
        self.store
            .delete(&format!("{PREFIX_LOGIN_FAIL}{key}"))
            .await?;
        Ok(())
    }
}
