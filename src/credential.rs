//! One-way password hashing.

use crate::models::{SsoError, SsoResult};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use rand::rngs::OsRng;
use std::sync::Arc;

/// Hashes and verifies passwords.
///
/// `verify` is expected to be slow; that cost bounds login throughput under load.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn hash(&self, plaintext: &str) -> SsoResult<String>;

    /// Returns `false` on mismatch and `Err` only when the verifier itself fails.
    async fn verify(&self, hash: &str, plaintext: &str) -> SsoResult<bool>;
}

pub type SharedVerifier = Arc<dyn CredentialVerifier>;

/// Argon2id in PHC string format, run on the blocking thread pool.
#[derive(Clone)]
pub struct Argon2Verifier {
    params: Params,
}

impl Default for Argon2Verifier {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}

impl Argon2Verifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Custom cost parameters (memory KiB, iterations, parallelism).
    pub fn with_cost(m_cost: u32, t_cost: u32, p_cost: u32) -> SsoResult<Self> {
        let params = Params::new(m_cost, t_cost, p_cost, None)
            .map_err(|e| SsoError::Credential(e.to_string()))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

#[async_trait]
impl CredentialVerifier for Argon2Verifier {
    async fn hash(&self, plaintext: &str) -> SsoResult<String> {
        let argon2 = self.argon2();
        let plaintext = plaintext.to_string();
        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            argon2
                .hash_password(plaintext.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| SsoError::Credential(e.to_string()))
        })
        .await
        .map_err(|e| SsoError::Credential(e.to_string()))?
    }

    async fn verify(&self, hash: &str, plaintext: &str) -> SsoResult<bool> {
        let argon2 = self.argon2();
        let hash = hash.to_string();
        let plaintext = plaintext.to_string();
        tokio::task::spawn_blocking(move || {
            let parsed =
                PasswordHash::new(&hash).map_err(|e| SsoError::Credential(e.to_string()))?;
            Ok(argon2
                .verify_password(plaintext.as_bytes(), &parsed)
                .is_ok())
        })
        .await
        .map_err(|e| SsoError::Credential(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_is_salted_and_verifies() {
        let verifier = Argon2Verifier::with_cost(4096, 1, 1).unwrap();
        let first = verifier.hash("hunter22").await.unwrap();
        let second = verifier.hash("hunter22").await.unwrap();

        assert_ne!(first, second);
        assert!(!first.contains("hunter22"));
        assert!(first.starts_with("$argon2id$"));
        assert!(verifier.verify(&first, "hunter22").await.unwrap());
        assert!(!verifier.verify(&first, "hunter23").await.unwrap());
    }

    #[tokio::test]
    async fn malformed_hash_is_an_error() {
        let verifier = Argon2Verifier::with_cost(4096, 1, 1).unwrap();
        assert!(matches!(
            verifier.verify("not-a-phc-string", "pw").await,
            Err(SsoError::Credential(_))
        ));
    }
}
