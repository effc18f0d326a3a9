//! ## 日本語
//!
//! Redis/Valkey バックエンドの実装です。
//!
//! `redis` feature により [`RedisStore`] が利用可能になります。
//!
//! ## English
//!
//! Redis/Valkey-backed implementation.
//!
//! Enabling the `redis` feature makes [`RedisStore`] available.

mod redis_store;

pub use redis_store::RedisStore;
