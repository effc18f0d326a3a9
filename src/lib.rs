#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::empty_loop)]
#![deny(clippy::indexing_slicing)]
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::indexing_slicing
    )
)]
//! # r-sso
//!
//! A centralized login service: signed access/refresh tokens with server-side
//! revocation, and CAS-style single sign-on through one-time service tickets.
//!
//! The building blocks:
//! - [`AuthService`]: register, login, logout, refresh and validate.
//! - [`SsoService`]: issue a service ticket after login and exchange it exactly once.
//! - [`VolatileStore`]: the shared key-value cache (sessions, blacklist, tickets, login
//!   failure counters), implemented by [`MemoryStore`] and, with the `redis` feature,
//!   [`RedisStore`].
//! - [`UserDirectory`] and [`CredentialVerifier`]: the user table and the password hash,
//!   both pluggable.
//!
//! ## How a token is checked
//!
//! 1. The signature must verify with the shared secret (HS256 only).
//! 2. `exp`, `nbf` and `iss` must hold, with no clock leeway.
//! 3. The token id must not be on the blacklist. A store failure here is an error, never
//!    "not revoked".
//!
//! With the `axum` feature, [`axum_support::router`] serves all of this over HTTP and
//! [`axum_support::AuthUser`] protects any handler that declares it.
//!
//! ## 繁體中文
//!
//! 集中式登入服務：簽章的 access/refresh token（可於伺服器端註銷），以及透過一次性
//! service ticket 實現的 CAS 風格單一登入。
//!
//! 主要元件：
//! - [`AuthService`]: 註冊、登入、登出、刷新與驗證。
//! - [`SsoService`]: 登入後簽發 service ticket，且每張 ticket 只能兌換一次。
//! - [`VolatileStore`]: 共用的 key-value 快取（session、黑名單、ticket、登入失敗計數），
//!   由 [`MemoryStore`] 及（啟用 `redis` feature 時）[`RedisStore`] 實作。
//! - [`UserDirectory`] 與 [`CredentialVerifier`]: 使用者資料表與密碼雜湊，皆可替換。
//!
//! ## token 驗證流程
//!
//! 1. 以共用密鑰驗證簽章（僅接受 HS256）。
//! 2. 檢查 `exp`、`nbf`、`iss`，不允許時鐘誤差。
//! 3. token id 不可在黑名單中；儲存層故障一律視為錯誤，而非「未註銷」。

pub mod auth;
#[cfg(feature = "axum")]
pub mod axum_support;
pub mod config;
pub mod credential;
pub mod directory;
mod memory;
mod models;
#[cfg(feature = "redis")]
mod redis;
pub mod sso;
pub mod store;
pub mod throttle;
pub mod token;
pub mod tracker;

pub use crate::auth::{AuthResponse, AuthService, LoginRequest, RegisterRequest};
pub use crate::config::{ConfigError, SsoConfig};
pub use crate::credential::{Argon2Verifier, CredentialVerifier, SharedVerifier};
pub use crate::directory::{MemoryUserDirectory, SharedDirectory, UserDirectory};
pub use crate::memory::MemoryStore;
pub use crate::models::{
    DirectoryError, NewUser, SsoError, SsoResult, StoreError, User, UserStatus, UserSummary,
};
#[cfg(feature = "redis")]
pub use crate::redis::RedisStore;
pub use crate::sso::{SsoLoginRequest, SsoLoginResponse, SsoService, TicketValidation};
pub use crate::store::{SharedStore, VolatileStore};
pub use crate::token::{Claims, TokenEngine, TokenPair, TokenType};
