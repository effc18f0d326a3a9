//! Revocation blacklist and advisory login sessions.
//!
//! Both live in the shared store with TTLs; the blacklist TTL is the revoked token's
//! remaining lifetime, so an entry never outlives the token it suppresses.

use crate::models::{SsoResult, StoreError};
use crate::store::{PREFIX_BLACKLIST, PREFIX_SESSION, SharedStore};
use std::time::Duration;
use tracing::debug;

/// Number of leading access-token characters used as the session key.
pub const SESSION_KEY_LEN: usize = 32;

const BLACKLIST_SENTINEL: &str = "1";

/// Session key for a token: its first [`SESSION_KEY_LEN`] characters (the whole token if
/// it is shorter).
pub fn session_key_for(token: &str) -> &str {
    token.get(..SESSION_KEY_LEN).unwrap_or(token)
}

#[derive(Clone)]
pub struct SessionTracker {
    store: SharedStore,
}

impl SessionTracker {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn put_session(
        &self,
        session_key: &str,
        user_id: u64,
        ttl: Duration,
    ) -> SsoResult<()> {
        self.store
            .set(
                &format!("{PREFIX_SESSION}{session_key}"),
                &user_id.to_string(),
                Some(ttl),
            )
            .await?;
        Ok(())
    }

    /// Returns the user id recorded for a session, if the session is still alive.
    pub async fn get_session(&self, session_key: &str) -> SsoResult<Option<u64>> {
        let key = format!("{PREFIX_SESSION}{session_key}");
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        let user_id = raw
            .parse()
            .map_err(|_| StoreError::NotAnInteger(key.clone()))?;
        Ok(Some(user_id))
    }

    /// Idempotent: deleting an absent session is not an error.
    pub async fn delete_session(&self, session_key: &str) -> SsoResult<()> {
        self.store
            .delete(&format!("{PREFIX_SESSION}{session_key}"))
            .await?;
        Ok(())
    }

    /// Blacklists `token_id` for `ttl`. A zero TTL means the token is already dead and
    /// nothing is written.
    pub async fn blacklist(&self, token_id: &str, ttl: Duration) -> SsoResult<()> {
        if ttl.is_zero() {
            debug!(token_id, "skipping blacklist for expired token");
            return Ok(());
        }
        self.store
            .set(
                &format!("{PREFIX_BLACKLIST}{token_id}"),
                BLACKLIST_SENTINEL,
                Some(ttl),
            )
            .await?;
        Ok(())
    }

    /// Blacklists `token_id` only if it is not blacklisted yet.
    ///
    /// Returns `true` for exactly one of any number of concurrent callers, which is what
    /// makes refresh-token rotation single-use. Returns `false` for a zero TTL.
    pub async fn claim_rotation(&self, token_id: &str, ttl: Duration) -> SsoResult<bool> {
        if ttl.is_zero() {
            return Ok(false);
        }
        let claimed = self
            .store
            .set_nx(
                &format!("{PREFIX_BLACKLIST}{token_id}"),
                BLACKLIST_SENTINEL,
                Some(ttl),
            )
            .await?;
        Ok(claimed)
    }

    /// Store failures propagate; they are never read as "not blacklisted".
    pub async fn is_blacklisted(&self, token_id: &str) -> SsoResult<bool> {
        Ok(self
            .store
            .exists(&format!("{PREFIX_BLACKLIST}{token_id}"))
            .await?)
    }
}
