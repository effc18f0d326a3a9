//! Store outages must surface as errors, never as a negative answer.

use async_trait::async_trait;
use r_sso::config::LoginLimitConfig;
use r_sso::throttle::{LoginThrottle, throttle_key};
use r_sso::{
    Argon2Verifier, AuthService, LoginRequest, MemoryStore, MemoryUserDirectory,
    SsoConfig, SsoError, SsoLoginRequest, SsoService, StoreError, TokenType, VolatileStore,
};
use std::sync::Arc;
use std::time::Duration;

const SECRET: &str = "store-failure-secret";

/// A store whose backend is unreachable.
struct UnreachableStore;

#[async_trait]
impl VolatileStore for UnreachableStore {
    async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> Result<(), StoreError> {
        Err(StoreError::NoConnection)
    }

    async fn set_nx(&self, _: &str, _: &str, _: Option<Duration>) -> Result<bool, StoreError> {
        Err(StoreError::NoConnection)
    }

    async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::NoConnection)
    }

    async fn delete(&self, _: &str) -> Result<bool, StoreError> {
        Err(StoreError::NoConnection)
    }

    async fn exists(&self, _: &str) -> Result<bool, StoreError> {
        Err(StoreError::NoConnection)
    }

    async fn incr(&self, _: &str) -> Result<i64, StoreError> {
        Err(StoreError::NoConnection)
    }

    async fn incr_with_ttl(&self, _: &str, _: Duration) -> Result<i64, StoreError> {
        Err(StoreError::NoConnection)
    }

    async fn expire(&self, _: &str, _: Duration) -> Result<bool, StoreError> {
        Err(StoreError::NoConnection)
    }

    async fn get_del(&self, _: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::NoConnection)
    }
}

/// An in-process store whose `EXPIRE` always fails.
#[derive(Clone, Default)]
struct ExpireFailsStore(MemoryStore);

#[async_trait]
impl VolatileStore for ExpireFailsStore {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.0.set(key, value, ttl).await
    }

    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        self.0.set_nx(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.0.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.0.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.0.exists(key).await
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.0.incr(key).await
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        self.0.incr_with_ttl(key, ttl).await
    }

    async fn expire(&self, _: &str, _: Duration) -> Result<bool, StoreError> {
        Err(StoreError::NoConnection)
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.0.get_del(key).await
    }
}

fn unreachable_auth() -> AuthService {
    let mut config = SsoConfig::with_secret(SECRET);
    config.jwt.issuer = "r-sso".to_string();
    AuthService::new(
        &config,
        Arc::new(UnreachableStore),
        Arc::new(MemoryUserDirectory::new()),
        Arc::new(Argon2Verifier::with_cost(4096, 1, 1).unwrap()),
    )
}

fn unreachable_sso() -> SsoService {
    let config = SsoConfig::with_secret(SECRET);
    SsoService::new(unreachable_auth(), Arc::new(UnreachableStore), &config.ticket)
}

#[tokio::test]
async fn blacklist_lookup_failure_is_an_error() {
    let auth = unreachable_auth();
    let token = auth.tokens().mint(1, "alice", TokenType::Access).unwrap();

    let result = auth.authorize(&token).await;
    assert!(matches!(
        result,
        Err(SsoError::Store(StoreError::NoConnection))
    ));
    assert!(result.unwrap_err().is_internal());
}

#[tokio::test]
async fn throttle_lookup_failure_blocks_login() {
    let auth = unreachable_auth();
    let result = auth
        .login(
            LoginRequest {
                username: "alice".to_string(),
                password: "whatever".to_string(),
            },
            "127.0.0.1",
        )
        .await;
    assert!(matches!(result, Err(SsoError::Store(_))));
}

#[tokio::test]
async fn ticket_lookup_failure_is_not_ticket_not_found() {
    let result = unreachable_sso()
        .validate("ST-0123456789abcdef0123456789abcdef", "https://app.example.com/")
        .await;
    assert!(matches!(
        result,
        Err(SsoError::Store(StoreError::NoConnection))
    ));
}

#[tokio::test]
async fn sso_login_store_failure_is_not_bad_credentials() {
    let result = unreachable_sso()
        .login(
            SsoLoginRequest {
                username: "alice".to_string(),
                password: "whatever".to_string(),
                service: "https://app.example.com/".to_string(),
            },
            "127.0.0.1",
        )
        .await;
    assert!(matches!(result, Err(SsoError::Store(_))));
}

#[tokio::test]
async fn failure_counter_error_is_surfaced() {
    let throttle = LoginThrottle::new(
        Arc::new(UnreachableStore),
        &LoginLimitConfig {
            max_attempts: 3,
            lock_seconds: 60,
        },
    );
    let result = throttle.record_failure(&throttle_key("10.0.0.1", "alice")).await;
    assert!(matches!(
        result,
        Err(SsoError::Store(StoreError::NoConnection))
    ));
}

#[tokio::test]
async fn lockout_window_closes_even_when_expire_fails() {
    let store = ExpireFailsStore::default();
    let throttle = LoginThrottle::new(
        Arc::new(store.clone()),
        &LoginLimitConfig {
            max_attempts: 1,
            lock_seconds: 1,
        },
    );
    let key = throttle_key("10.0.0.1", "alice");

    assert_eq!(throttle.record_failure(&key).await.unwrap(), 1);
    assert!(matches!(
        throttle.check(&key).await,
        Err(SsoError::TooManyAttempts)
    ));

    let ttl = store.0.ttl("login_fail:10.0.0.1:alice").unwrap().unwrap();
    assert!(ttl <= Duration::from_secs(1));

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(throttle.check(&key).await.is_ok());
    assert_eq!(throttle.failure_count(&key).await.unwrap(), 0);
}
