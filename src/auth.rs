//! Registration, login, logout, refresh and token validation.
//!
//! [`AuthService`] is the entry point for the password-based flows. It holds no state of
//! its own; everything that must survive a request lives in the shared store (sessions,
//! blacklist, failure counters) or in the user directory.

use crate::config::SsoConfig;
use crate::credential::SharedVerifier;
use crate::directory::SharedDirectory;
use crate::models::{DirectoryError, NewUser, SsoError, SsoResult, User, UserStatus, UserSummary};
use crate::store::SharedStore;
use crate::throttle::{LoginThrottle, throttle_key};
use crate::token::{Claims, TokenEngine, TokenPair};
use crate::tracker::{SessionTracker, session_key_for};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{info, instrument, warn};

const USERNAME_LEN: (usize, usize) = (3, 50);
const PASSWORD_LEN: (usize, usize) = (6, 50);

static EMAIL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub nickname: String,
}

impl RegisterRequest {
    /// Checks field shapes before anything touches the directory.
    pub fn validate(&self) -> SsoResult<()> {
        let username_len = self.username.chars().count();
        if username_len < USERNAME_LEN.0 || username_len > USERNAME_LEN.1 {
            return Err(SsoError::Validation(format!(
                "username must be {}-{} characters",
                USERNAME_LEN.0, USERNAME_LEN.1
            )));
        }
        if !valid_email(&self.email) {
            return Err(SsoError::Validation("invalid email address".to_string()));
        }
        let password_len = self.password.chars().count();
        if password_len < PASSWORD_LEN.0 || password_len > PASSWORD_LEN.1 {
            return Err(SsoError::Validation(format!(
                "password must be {}-{} characters",
                PASSWORD_LEN.0, PASSWORD_LEN.1
            )));
        }
        Ok(())
    }
}

fn valid_email(email: &str) -> bool {
    EMAIL.as_ref().is_some_and(|re| re.is_match(email))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: UserSummary,
    pub token: TokenPair,
}

/// Password login and the token lifecycle. `Clone` shares every collaborator.
#[derive(Clone)]
pub struct AuthService {
    tokens: TokenEngine,
    tracker: SessionTracker,
    throttle: LoginThrottle,
    directory: SharedDirectory,
    verifier: SharedVerifier,
    session_ttl: Duration,
}

impl AuthService {
    pub fn new(
        config: &SsoConfig,
        store: SharedStore,
        directory: SharedDirectory,
        verifier: SharedVerifier,
    ) -> Self {
        Self {
            tokens: TokenEngine::new(&config.jwt),
            tracker: SessionTracker::new(store.clone()),
            throttle: LoginThrottle::new(store, &config.login),
            directory,
            verifier,
            session_ttl: config.session.expire_duration(),
        }
    }

    pub fn tokens(&self) -> &TokenEngine {
        &self.tokens
    }

    pub fn throttle(&self) -> &LoginThrottle {
        &self.throttle
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    pub(crate) fn directory(&self) -> &SharedDirectory {
        &self.directory
    }

    #[instrument(skip_all, fields(username = %req.username))]
    pub async fn register(&self, req: RegisterRequest) -> SsoResult<UserSummary> {
        req.validate()?;

        if self.directory.exists_by_username(&req.username).await? {
            return Err(SsoError::UsernameTaken(req.username));
        }
        if self.directory.exists_by_email(&req.email).await? {
            return Err(SsoError::EmailTaken(req.email));
        }

        let password_hash = self.verifier.hash(&req.password).await?;
        let user = self
            .directory
            .create(NewUser {
                username: req.username,
                email: req.email,
                password_hash,
                nickname: req.nickname,
                status: UserStatus::Active,
            })
            .await
            .map_err(|err| match err {
                // Lost a race against a concurrent registration.
                DirectoryError::UsernameTaken(name) => SsoError::UsernameTaken(name),
                DirectoryError::EmailTaken(email) => SsoError::EmailTaken(email),
                other => SsoError::Directory(other),
            })?;

        info!(user_id = user.id, "user registered");
        Ok(user.summary())
    }

    /// Throttle check, lookup, password check and status check, in that order.
    ///
    /// Unknown usernames and wrong passwords both count a failure against
    /// `(client_origin, username)` and both surface as [`SsoError::InvalidCredentials`].
    /// A disabled account is reported as such without counting.
    pub(crate) async fn authenticate(
        &self,
        username: &str,
        password: &str,
        client_origin: &str,
    ) -> SsoResult<User> {
        let key = throttle_key(client_origin, username);
        self.throttle.check(&key).await?;

        let Some(user) = self.directory.get_by_username(username).await? else {
            let failures = self.throttle.record_failure(&key).await?;
            warn!(failures, "login failed: invalid credentials");
            return Err(SsoError::InvalidCredentials);
        };

        if !self.verifier.verify(&user.password_hash, password).await? {
            let failures = self.throttle.record_failure(&key).await?;
            warn!(user_id = user.id, failures, "login failed: invalid credentials");
            return Err(SsoError::InvalidCredentials);
        }

        if !user.is_active() {
            warn!(user_id = user.id, "login refused: account disabled");
            return Err(SsoError::UserDisabled);
        }

        self.throttle.clear(&key).await?;
        Ok(user)
    }

    #[instrument(skip(self, req), fields(username = %req.username))]
    pub async fn login(&self, req: LoginRequest, client_origin: &str) -> SsoResult<AuthResponse> {
        let user = self
            .authenticate(&req.username, &req.password, client_origin)
            .await?;

        let token = self.tokens.mint_pair(user.id, &user.username)?;
        self.tracker
            .put_session(session_key_for(&token.access_token), user.id, self.session_ttl)
            .await?;

        info!(user_id = user.id, "user logged in");
        Ok(AuthResponse {
            user: user.summary(),
            token,
        })
    }

    /// Revokes `token` for the rest of its lifetime and drops its session.
    ///
    /// Calling it twice with the same token is harmless.
    #[instrument(skip_all)]
    pub async fn logout(&self, token: &str) -> SsoResult<()> {
        let claims = self.tokens.parse(token)?;
        self.tracker
            .blacklist(&claims.token_id, claims.remaining_lifetime())
            .await?;
        self.tracker.delete_session(session_key_for(token)).await?;
        info!(user_id = claims.user_id, "user logged out");
        Ok(())
    }

    /// Exchanges a refresh token for a fresh pair. Each refresh token works once.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> SsoResult<TokenPair> {
        let claims = self.tokens.parse(refresh_token)?;
        if !claims.is_refresh() {
            return Err(SsoError::InvalidToken);
        }
        if self.tracker.is_blacklisted(&claims.token_id).await? {
            warn!(user_id = claims.user_id, "refresh token replayed");
            return Err(SsoError::InvalidToken);
        }

        let remaining = claims.remaining_lifetime();
        if remaining.is_zero() {
            return Err(SsoError::ExpiredToken);
        }
        if !self.tracker.claim_rotation(&claims.token_id, remaining).await? {
            warn!(user_id = claims.user_id, "refresh token rotated concurrently");
            return Err(SsoError::InvalidToken);
        }

        let pair = self.tokens.mint_pair(claims.user_id, &claims.username)?;
        info!(user_id = claims.user_id, "token pair refreshed");
        Ok(pair)
    }

    /// Signature, expiry and blacklist check. Accepts either token type.
    pub async fn validate(&self, token: &str) -> SsoResult<Claims> {
        let claims = self.tokens.parse(token)?;
        if self.tracker.is_blacklisted(&claims.token_id).await? {
            return Err(SsoError::InvalidToken);
        }
        Ok(claims)
    }

    /// [`AuthService::validate`] restricted to access tokens.
    pub async fn authorize(&self, token: &str) -> SsoResult<Claims> {
        let claims = self.validate(token).await?;
        if !claims.is_access() {
            return Err(SsoError::InvalidToken);
        }
        Ok(claims)
    }

    pub async fn user_info(&self, user_id: u64) -> SsoResult<UserSummary> {
        self.directory
            .get_by_id(user_id)
            .await?
            .map(|user| user.summary())
            .ok_or(SsoError::UserNotFound)
    }

    /// The user id of the login session opened with `access_token`, if it is still alive.
    pub async fn session_user(&self, access_token: &str) -> SsoResult<Option<u64>> {
        self.tracker
            .get_session(session_key_for(access_token))
            .await
    }
}
