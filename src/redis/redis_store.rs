//! ## 日本語
//!
//! Redis/Valkey をバックエンドにした [`VolatileStore`] です。
//!
//! 失効は Redis の TTL（ミリ秒）に任せます。`get_del` は Lua スクリプトで GET と DEL を
//! 1 つの原子的な操作として実行します（Redis 6.2 未満の GETDEL 非対応サーバでも動作）。
//!
//! ## English
//!
//! Redis/Valkey-backed [`VolatileStore`].
//!
//! Expiration is delegated to Redis TTL (milliseconds). `get_del` runs GET and DEL inside one
//! Lua script, which Redis executes atomically (and which also works on servers older
//! than 6.2 that lack GETDEL).

use crate::models::StoreError;
use crate::store::VolatileStore;
use async_trait::async_trait;
use redis::{AsyncCommands, Script};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

const GET_DEL_SCRIPT: &str = r#"
local value = redis.call('GET', KEYS[1])
if value then
  redis.call('DEL', KEYS[1])
end
return value
"#;

const INCR_WITH_TTL_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// ## 日本語
///
/// `Duration` を Redis のミリ秒単位 TTL に変換します（切り捨て、最小 1 ミリ秒）。
/// 切り上げないので、キーが元の期限より長く残ることはありません。
///
/// ## English
///
/// Converts a `Duration` to a Redis TTL in milliseconds (truncated, at least 1).
/// Never rounds up, so a key does not outlive the deadline it was given.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// ## 日本語
///
/// prefix が常に `:` で終わるように正規化します。
///
/// ## English
///
/// Normalizes a prefix so it always ends with `:`.
fn normalize_prefix(prefix: impl Into<String>) -> String {
    let mut prefix = prefix.into();
    if !prefix.ends_with(':') {
        prefix.push(':');
    }
    prefix
}

/// ## 日本語
///
/// Redis/Valkey をバックエンドにした共有ストアです。
///
/// すべてのキーは `prefix + key` として保存されます。
///
/// ## English
///
/// A shared store backed by Redis/Valkey.
///
/// Every key is stored as `prefix + key`.
#[derive(Clone)]
pub struct RedisStore {
    // 日本語: Redis のキーに付ける prefix。
    //        例: prefix="r_sso:"、key="ticket:ST-1" のとき key は "r_sso:ticket:ST-1"。
    // English: Prefix for keys in Redis.
    //          Example: prefix="r_sso:" and key="ticket:ST-1" => "r_sso:ticket:ST-1".
    prefix: String,

    // 日本語: 共有の非同期 ConnectionManager。tokio::Mutex で 1 接続を同時に 1 タスクに限定する。
    // English: Shared async ConnectionManagers; tokio::Mutex serializes access per connection.
    connections: Arc<Vec<Mutex<redis::aio::ConnectionManager>>>,
    next_index: Arc<AtomicUsize>,
    get_del_script: Arc<Script>,
    incr_with_ttl_script: Arc<Script>,
}

impl RedisStore {
    /// ## 日本語
    ///
    /// 既存の非同期接続マネージャからストアを作成します。
    ///
    /// ## English
    ///
    /// Creates a store from an existing async connection manager.
    pub fn new(prefix: impl Into<String>, connection: redis::aio::ConnectionManager) -> Self {
        Self {
            prefix: normalize_prefix(prefix),
            connections: Arc::new(vec![Mutex::new(connection)]),
            next_index: Arc::new(AtomicUsize::new(0)),
            get_del_script: Arc::new(Script::new(GET_DEL_SCRIPT)),
            incr_with_ttl_script: Arc::new(Script::new(INCR_WITH_TTL_SCRIPT)),
        }
    }

    /// ## 日本語
    ///
    /// Redis/Valkey に接続してストアを作成します。`pool_size` 本の接続を確保し、
    /// 簡易的なラウンドロビンで利用します。
    ///
    /// ## English
    ///
    /// Connects to Redis/Valkey. Allocates `pool_size` connections (at least one) and
    /// uses them round-robin.
    pub async fn connect(
        redis_url: &str,
        prefix: impl Into<String>,
        pool_size: usize,
    ) -> Result<Self, StoreError> {
        // 日本語: redis_url の例： redis://127.0.0.1/ 、 redis://:password@127.0.0.1/0
        // English: redis_url examples: redis://127.0.0.1/ , redis://:password@127.0.0.1/0
        let client = redis::Client::open(redis_url)?;

        let pool_size = pool_size.max(1);
        let mut connections = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            connections.push(Mutex::new(client.get_connection_manager().await?));
        }
        debug!(pool_size, "redis store connected");

        Ok(Self {
            prefix: normalize_prefix(prefix),
            connections: Arc::new(connections),
            next_index: Arc::new(AtomicUsize::new(0)),
            get_del_script: Arc::new(Script::new(GET_DEL_SCRIPT)),
            incr_with_ttl_script: Arc::new(Script::new(INCR_WITH_TTL_SCRIPT)),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// ## 日本語
    ///
    /// 接続プールから次の接続をロックして取得します。
    ///
    /// ## English
    ///
    /// Locks and returns the next connection from the pool.
    async fn lock_connection(
        &self,
    ) -> Result<tokio::sync::MutexGuard<'_, redis::aio::ConnectionManager>, StoreError> {
        let len = self.connections.len();
        if len == 0 {
            return Err(StoreError::NoConnection);
        }
        let index = self.next_index.fetch_add(1, Ordering::Relaxed) % len;
        match self.connections.get(index) {
            Some(conn) => Ok(conn.lock().await),
            None => Err(StoreError::NoConnection),
        }
    }

    fn key(&self, key: &str) -> String {
        // 日本語: prefix は ':' で終わるよう正規化済みなので、そのまま連結する。
        // English: The prefix is normalized to end with ':', so concatenate directly.
        format!("{}{}", self.prefix, key)
    }

    /// ## 日本語
    ///
    /// キーの残り TTL（秒）を Redis の意味のまま返します：
    /// - キーが無い：`Ok(None)`
    /// - 期限なし：`Ok(Some(-1))`
    ///
    /// ## English
    ///
    /// Returns the remaining TTL in seconds using Redis semantics:
    /// - `Ok(None)` when the key does not exist
    /// - `Ok(Some(-1))` when the key has no expiration
    pub async fn ttl_seconds(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let key = self.key(key);
        let mut connection = self.lock_connection().await?;
        let ttl: i64 = connection.ttl(key).await?;
        if ttl == -2 {
            return Ok(None);
        }
        Ok(Some(ttl))
    }

    /// Like [`RedisStore::ttl_seconds`], in milliseconds (`PTTL`).
    pub async fn ttl_millis(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let key = self.key(key);
        let mut connection = self.lock_connection().await?;
        let ttl: i64 = connection.pttl(key).await?;
        if ttl == -2 {
            return Ok(None);
        }
        Ok(Some(ttl))
    }
}

#[async_trait]
impl VolatileStore for RedisStore {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let key = self.key(key);
        let mut connection = self.lock_connection().await?;
        match ttl {
            // 日本語: PSETEX 相当（value を保存し TTL(ミリ秒) を設定する）。
            // English: PSETEX semantics: set key/value and configure TTL (milliseconds).
            Some(ttl) => {
                let _: () = connection.pset_ex(key, value, ttl_millis(ttl)).await?;
            }
            None => {
                let _: () = connection.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let key = self.key(key);
        let mut connection = self.lock_connection().await?;

        // 日本語: SET key value NX [PX ttl]。書き込めた場合のみ "OK"、それ以外は nil。
        // English: SET key value NX [PX ttl]. Replies "OK" only when written, nil otherwise.
        let mut cmd = redis::cmd("SET");
        cmd.arg(&key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let reply: Option<String> = cmd.query_async(&mut *connection).await?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = self.key(key);
        let mut connection = self.lock_connection().await?;
        let value: Option<String> = connection.get(key).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let key = self.key(key);
        let mut connection = self.lock_connection().await?;

        // 日本語: DEL は削除件数を返す。
        // English: DEL returns how many keys were removed.
        let removed: i64 = connection.del(key).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let key = self.key(key);
        let mut connection = self.lock_connection().await?;
        let exists: bool = connection.exists(key).await?;
        Ok(exists)
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let key = self.key(key);
        let mut connection = self.lock_connection().await?;
        let value: i64 = connection.incr(key, 1_i64).await?;
        Ok(value)
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let key = self.key(key);
        let mut connection = self.lock_connection().await?;

        // 日本語: INCR と初回の PEXPIRE を 1 スクリプトで実行し、TTL 無しのカウンタを残さない。
        // English: INCR and the first PEXPIRE run in one script, so no counter is left without a TTL.
        let count: i64 = self
            .incr_with_ttl_script
            .key(&key)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut *connection)
            .await?;
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let key = self.key(key);
        let mut connection = self.lock_connection().await?;
        // 日本語: redis crate の API が i64 を要求するため、変換できない場合は上限に丸める
        // English: redis crate API expects i64; saturate to i64::MAX if conversion fails
        let millis = i64::try_from(ttl_millis(ttl)).unwrap_or(i64::MAX);
        let updated: bool = connection.pexpire(key, millis).await?;
        Ok(updated)
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = self.key(key);
        let mut connection = self.lock_connection().await?;

        // 日本語: GET と DEL を 1 スクリプトで実行するため、同じキーを取得できるのは 1 呼び出しだけ。
        // English: GET and DEL run in one script, so exactly one caller can obtain the value.
        let value: Option<String> = self
            .get_del_script
            .key(&key)
            .invoke_async(&mut *connection)
            .await?;
        Ok(value)
    }
}
