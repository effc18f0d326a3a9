//! ## 日本語
//!
//! 共有揮発ストア（TTL 付き KV キャッシュ）の抽象です。
//!
//! セッション、ブラックリスト、ログイン失敗カウンタ、サービスチケットはすべてこの trait
//! を通して保存されます。実装は [`crate::MemoryStore`]（プロセス内）と
//! `RedisStore`（`redis` feature）の 2 つです。
//!
//! ## English
//!
//! Abstraction over the shared volatile store (a key-value cache with per-key TTL).
//!
//! Sessions, blacklist entries, login-failure counters and service tickets all live
//! behind this trait. Implementations: [`crate::MemoryStore`] (in-process) and
//! `RedisStore` (`redis` feature).

use crate::models::StoreError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Key namespace for advisory login sessions.
pub const PREFIX_SESSION: &str = "session:";
/// Key namespace for revoked token identifiers.
pub const PREFIX_BLACKLIST: &str = "blacklist:";
/// Key namespace for service tickets.
pub const PREFIX_TICKET: &str = "ticket:";
/// Key namespace for login-failure counters.
pub const PREFIX_LOGIN_FAIL: &str = "login_fail:";

/// A networked key-value cache with optional per-key expiry.
///
/// Contract shared by every implementation:
/// - absence is `Ok(None)` / `Ok(false)`, never an error;
/// - any connectivity or timeout failure is an `Err`, never absence;
/// - [`VolatileStore::get_del`] is a single atomic primitive: under concurrent calls for
///   the same key exactly one caller observes the value.
#[async_trait]
pub trait VolatileStore: Send + Sync {
    /// Stores `value` under `key`, replacing any previous value and expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Stores `value` only if `key` is absent. Returns whether the write happened.
    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Deletes `key`. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Atomically increments the integer at `key` (absent counts as 0) and returns the
    /// new value. An existing expiry is preserved.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Increments the integer at `key` and, when the result is 1, attaches `ttl` in the
    /// same atomic step. Later increments leave the expiry alone, so the window is fixed
    /// from the first increment and a counter can never be left without one.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, StoreError>;

    /// Sets the expiry of an existing key. Returns `false` if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Atomically reads and deletes `key`.
    async fn get_del(&self, key: &str) -> Result<Option<String>, StoreError>;
}

/// Shared handle to a store, as held by the services.
pub type SharedStore = Arc<dyn VolatileStore>;
