//! ## 日本語
//!
//! r-sso の HTTP サーバーです。Redis/Valkey を共有ストアとして使い、ユーザーは
//! プロセス内のディレクトリに保持します。
//!
//! 主な環境変数（すべて任意、`R_SSO_JWT_SECRET` のみ必須）：
//! - `R_SSO_JWT_SECRET`：署名用の共有シークレット
//! - `REDIS_URL`（デフォルト：`redis://127.0.0.1/`）
//! - `R_SSO_PREFIX`（デフォルト：`r_sso:`）
//! - `R_SSO_HOST` / `R_SSO_PORT`（デフォルト：`127.0.0.1` / `8080`）
//! - `RUST_LOG`（デフォルト：`info`）
//!
//! SIGINT / SIGTERM を受け取ると、処理中のリクエストを終えてから停止します。
//!
//! ## English
//!
//! The r-sso HTTP server. Uses Redis/Valkey as the shared store and keeps users in an
//! in-process directory.
//!
//! Main environment variables (all optional except `R_SSO_JWT_SECRET`):
//! - `R_SSO_JWT_SECRET`: shared signing secret
//! - `REDIS_URL` (default: `redis://127.0.0.1/`)
//! - `R_SSO_PREFIX` (default: `r_sso:`)
//! - `R_SSO_HOST` / `R_SSO_PORT` (default: `127.0.0.1` / `8080`)
//! - `RUST_LOG` (default: `info`)
//!
//! On SIGINT or SIGTERM the server stops accepting connections and drains in-flight
//! requests before exiting.

use r_sso::axum_support::router;
use r_sso::{
    Argon2Verifier, AuthService, MemoryUserDirectory, RedisStore, SharedStore, SsoConfig,
    SsoService,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = SsoConfig::from_env()?;

    let store: SharedStore = Arc::new(
        RedisStore::connect(
            &config.redis.url,
            config.redis.prefix.clone(),
            config.redis.pool_size,
        )
        .await?,
    );
    let auth = AuthService::new(
        &config,
        store.clone(),
        Arc::new(MemoryUserDirectory::new()),
        Arc::new(Argon2Verifier::new()),
    );
    let sso = SsoService::new(auth.clone(), store, &config.ticket);

    let app = router(auth, sso);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, issuer = %config.jwt.issuer, "r-sso listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(%err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutting down");
}
