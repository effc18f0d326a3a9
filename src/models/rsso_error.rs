//! Error types for r-sso.
//!
//! Every fallible operation in the crate returns [`SsoError`]. Failures of the shared
//! store and of the user directory are kept as their own types ([`StoreError`],
//! [`DirectoryError`]) so callers can tell an infrastructure outage apart from a
//! negative business answer such as "ticket not found".
//!
//! ## 日本語
//!
//! r-sso のエラー型です。
//!
//! ストアやユーザーディレクトリの障害は独立した型として保持し、「チケットが無い」などの
//! 業務上の否定結果と取り違えないようにしています。

use thiserror::Error;

/// Failures of the shared volatile store.
///
/// A `StoreError` never means "key absent"; absence is reported as `Ok(None)` /
/// `Ok(false)` by the store methods.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The in-process store's mutex has been poisoned.
    #[error("store mutex poisoned")]
    MutexPoisoned,

    /// No connection is available in the pool.
    #[error("no store connections available")]
    NoConnection,

    /// A counter key holds something other than an integer.
    #[error("value at `{0}` is not an integer")]
    NotAnInteger(String),

    /// A stored payload could not be encoded or decoded.
    #[error("payload codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Redis/Valkey returned an error or the connection failed.
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Failures of the durable user directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("user directory mutex poisoned")]
    MutexPoisoned,

    /// Update/delete addressed a user that does not exist.
    #[error("user {0} not found")]
    NotFound(u64),

    /// The username is held by another non-deleted user.
    #[error("username '{0}' already taken")]
    UsernameTaken(String),

    /// The email is held by another non-deleted user.
    #[error("email '{0}' already taken")]
    EmailTaken(String),

    #[error("user directory backend error: {0}")]
    Backend(String),
}

/// Errors returned by r-sso services.
///
/// ## 日本語
///
/// r-sso のサービス層が返すエラーの集合です。
#[derive(Debug, Error)]
pub enum SsoError {
    /// Malformed input or a missing required field.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("username '{0}' already exists")]
    UsernameTaken(String),

    #[error("email '{0}' already exists")]
    EmailTaken(String),

    /// Unknown username or wrong password. The two are deliberately not distinguished.
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("user account is disabled")]
    UserDisabled,

    #[error("too many login attempts, please try again later")]
    TooManyAttempts,

    #[error("invalid token")]
    InvalidToken,

    #[error("token has expired")]
    ExpiredToken,

    #[error("invalid or missing service URL")]
    InvalidService,

    #[error("ticket not found or expired")]
    TicketNotFound,

    #[error("service URL mismatch")]
    ServiceMismatch,

    #[error("user not found")]
    UserNotFound,

    /// Signing a freshly minted token failed.
    #[error("failed to sign token: {0}")]
    Token(#[source] jsonwebtoken::errors::Error),

    /// The credential verifier could not hash or compare.
    #[error("credential verifier failed: {0}")]
    Credential(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl SsoError {
    /// Returns `true` for infrastructure failures that callers cannot fix.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            SsoError::Token(_)
                | SsoError::Credential(_)
                | SsoError::Store(_)
                | SsoError::Directory(_)
        )
    }
}

pub type SsoResult<T> = Result<T, SsoError>;
