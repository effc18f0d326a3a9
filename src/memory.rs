use crate::models::StoreError;
use crate::store::VolatileStore;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

fn now_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

fn deadline_ms(now_ms: u64, ttl: Duration) -> u64 {
    let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    now_ms.saturating_add(ttl_ms)
}

/// ## 日本語
///
/// ストア内の 1 エントリです。`expire_at` は Unix epoch ミリ秒、`None` は無期限。
///
/// ## English
///
/// One stored entry. `expire_at` is Unix epoch milliseconds; `None` never expires.
#[derive(Clone, Debug)]
struct Entry {
    value: String,
    expire_at: Option<u64>,
}

impl Entry {
    fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.expire_at, Some(at) if at <= now_ms)
    }
}

/// Removes `key` if it has expired and returns the live entry, if any.
fn live<'a>(store: &'a mut HashMap<String, Entry>, key: &str, now_ms: u64) -> Option<&'a mut Entry> {
    if store.get(key).is_some_and(|entry| entry.is_expired(now_ms)) {
        store.remove(key);
    }
    store.get_mut(key)
}

/// ## 日本語
///
/// プロセス内の [`VolatileStore`] 実装です。
///
/// 内部では `Arc<Mutex<...>>` を使って状態を共有します。そのため `Clone` は同じストアへの
/// ハンドルを増やすだけです。期限切れのエントリはアクセス時に削除され、
/// [`MemoryStore::prune_expired`] でまとめて掃除することもできます。
///
/// 各操作は 1 回のロック区間で完結するため、`incr` と `get_del` はプロセス内で原子的です。
///
/// バックグラウンドでの掃除は行いません。長時間動かす場合は
/// [`MemoryStore::spawn_pruner`] を起動しないと、再びアクセスされないキー
/// （ブラックリストやセッション）がメモリに残り続けます。
///
/// ## English
///
/// In-process [`VolatileStore`] implementation.
///
/// Internally it uses an `Arc<Mutex<...>>`, so `Clone` creates another handle to the
/// same shared map. Expired entries are dropped when touched, and can be swept in bulk
/// with [`MemoryStore::prune_expired`].
///
/// Every operation completes inside a single critical section, so `incr` and `get_del`
/// are atomic within the process.
///
/// Nothing sweeps in the background. A long-running single-node deployment must start
/// [`MemoryStore::spawn_pruner`] (or call [`MemoryStore::prune_expired`] itself), or keys
/// that are never touched again, such as blacklist entries and sessions, stay in memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    store: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            store: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>, StoreError> {
        self.store.lock().map_err(|_| StoreError::MutexPoisoned)
    }

    /// ## 日本語
    ///
    /// キーの残り TTL を返します。キーが無い場合は `Ok(None)`、無期限の場合は
    /// `Ok(Some(Duration::MAX))`。
    ///
    /// ## English
    ///
    /// Returns the remaining TTL of a key: `Ok(None)` when absent,
    /// `Ok(Some(Duration::MAX))` when it never expires.
    pub fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = now_ms();
        let mut store = self.lock()?;
        Ok(live(&mut store, key, now).map(|entry| match entry.expire_at {
            Some(at) => Duration::from_millis(at.saturating_sub(now)),
            None => Duration::MAX,
        }))
    }

    /// ## 日本語
    ///
    /// 期限切れのエントリを削除し、削除した件数を返します。
    ///
    /// ## English
    ///
    /// Removes expired entries and returns how many were removed.
    pub fn prune_expired(&self) -> Result<usize, StoreError> {
        let now = now_ms();
        let mut store = self.lock()?;
        let original_len = store.len();
        store.retain(|_key, entry| !entry.is_expired(now));
        Ok(original_len - store.len())
    }

    /// Runs [`MemoryStore::prune_expired`] every `every` on the current tokio runtime
    /// until the returned handle is aborted.
    pub fn spawn_pruner(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                match store.prune_expired() {
                    Ok(0) => {}
                    Ok(removed) => debug!(removed, "pruned expired entries"),
                    Err(err) => {
                        warn!(%err, "memory store pruner stopped");
                        return;
                    }
                }
            }
        })
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let now = now_ms();
        let store = self.lock()?;
        Ok(store.values().filter(|entry| !entry.is_expired(now)).count())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl VolatileStore for MemoryStore {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let now = now_ms();
        let entry = Entry {
            value: value.to_string(),
            expire_at: ttl.map(|ttl| deadline_ms(now, ttl)),
        };
        self.lock()?.insert(key.to_string(), entry);
        Ok(())
    }

    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let now = now_ms();
        let mut store = self.lock()?;
        if live(&mut store, key, now).is_some() {
            return Ok(false);
        }
        store.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expire_at: ttl.map(|ttl| deadline_ms(now, ttl)),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = now_ms();
        let mut store = self.lock()?;
        Ok(live(&mut store, key, now).map(|entry| entry.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = now_ms();
        let mut store = self.lock()?;
        let existed = live(&mut store, key, now).is_some();
        store.remove(key);
        Ok(existed)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = now_ms();
        let mut store = self.lock()?;
        Ok(live(&mut store, key, now).is_some())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let now = now_ms();
        let mut store = self.lock()?;
        match live(&mut store, key, now) {
            Some(entry) => {
                let current: i64 = entry
                    .value
                    .parse()
                    .map_err(|_| StoreError::NotAnInteger(key.to_string()))?;
                let next = current.saturating_add(1);
                entry.value = next.to_string();
                Ok(next)
            }
            None => {
                store.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        expire_at: None,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let now = now_ms();
        let mut store = self.lock()?;
        if let Some(entry) = live(&mut store, key, now) {
            let current: i64 = entry
                .value
                .parse()
                .map_err(|_| StoreError::NotAnInteger(key.to_string()))?;
            let next = current.saturating_add(1);
            entry.value = next.to_string();
            return Ok(next);
        }
        store.insert(
            key.to_string(),
            Entry {
                value: "1".to_string(),
                expire_at: Some(deadline_ms(now, ttl)),
            },
        );
        Ok(1)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = now_ms();
        let mut store = self.lock()?;
        let Some(entry) = live(&mut store, key, now) else {
            return Ok(false);
        };
        entry.expire_at = Some(deadline_ms(now, ttl));
        Ok(true)
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = now_ms();
        let mut store = self.lock()?;
        let value = live(&mut store, key, now).map(|entry| entry.value.clone());
        store.remove(key);
        Ok(value)
    }
}
