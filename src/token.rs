//! Signed, self-describing access and refresh tokens.
//!
//! Tokens are HS256 JWTs signed with the single service-wide secret. Validity is decided
//! entirely by the signature, the embedded claims and (one layer up) the blacklist; there
//! is no server-side token table.

use crate::config::JwtConfig;
use crate::models::{SsoError, SsoResult};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Claims embedded in every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: u64,
    pub username: String,
    /// Random per-token identifier; the blacklist is keyed by it.
    pub token_id: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub iss: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

impl Claims {
    /// Time until `exp`, floored at zero.
    pub fn remaining_lifetime(&self) -> Duration {
        let now_ms = Utc::now().timestamp_millis();
        let remaining_ms = self.exp.saturating_mul(1000).saturating_sub(now_ms);
        u64::try_from(remaining_ms)
            .map(Duration::from_millis)
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_access(&self) -> bool {
        self.token_type == TokenType::Access
    }

    pub fn is_refresh(&self) -> bool {
        self.token_type == TokenType::Refresh
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
}

/// Mints and parses tokens. Cheap to clone.
#[derive(Clone)]
pub struct TokenEngine {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenEngine {
    pub fn new(config: &JwtConfig) -> Self {
        // Only HS256 is accepted: a header naming any other algorithm, `none` included,
        // fails verification before the signature is even looked at.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_nbf = true;
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss"]);

        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            issuer: config.issuer.clone(),
            access_ttl: config.access_token_duration(),
            refresh_ttl: config.refresh_token_duration(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn lifetime(&self, token_type: TokenType) -> Duration {
        match token_type {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
        }
    }

    pub fn mint(&self, user_id: u64, username: &str, token_type: TokenType) -> SsoResult<String> {
        let now = Utc::now().timestamp();
        let lifetime = i64::try_from(self.lifetime(token_type).as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            user_id,
            username: username.to_string(),
            token_id: uuid::Uuid::new_v4().to_string(),
            token_type,
            iss: self.issuer.clone(),
            iat: now,
            nbf: now,
            exp: now.saturating_add(lifetime),
        };
        self.sign(&claims)
    }

    /// Mints an access/refresh pair. Each token gets its own `token_id`.
    pub fn mint_pair(&self, user_id: u64, username: &str) -> SsoResult<TokenPair> {
        Ok(TokenPair {
            access_token: self.mint(user_id, username, TokenType::Access)?,
            refresh_token: self.mint(user_id, username, TokenType::Refresh)?,
            expires_in: self.access_ttl.as_secs(),
        })
    }

    /// Verifies signature, algorithm, issuer and time claims.
    ///
    /// Fails with [`SsoError::ExpiredToken`] once `exp` has passed and with
    /// [`SsoError::InvalidToken`] for everything else.
    pub fn parse(&self, token: &str) -> SsoResult<Claims> {
        match jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => Ok(data.claims),
            Err(err) => match err.kind() {
                ErrorKind::ExpiredSignature => Err(SsoError::ExpiredToken),
                _ => Err(SsoError::InvalidToken),
            },
        }
    }

    fn sign(&self, claims: &Claims) -> SsoResult<String> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(SsoError::Token)
    }
}
