//! Error handling tests for r-sso.
//!
//! Tests the error types and their behavior.

use r_sso::{DirectoryError, SsoError, StoreError};
use std::error::Error;

#[cfg(test)]
mod error_handling {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            SsoError::InvalidCredentials.to_string(),
            "invalid username or password"
        );
        assert_eq!(
            SsoError::UsernameTaken("alice".into()).to_string(),
            "username 'alice' already exists"
        );
        assert_eq!(SsoError::ServiceMismatch.to_string(), "service URL mismatch");
    }

    #[test]
    fn store_errors_pass_through_transparently() {
        let error = SsoError::from(StoreError::NoConnection);
        assert_eq!(error.to_string(), "no store connections available");
        assert!(matches!(error, SsoError::Store(StoreError::NoConnection)));
    }

    #[test]
    fn codec_error_keeps_its_source() {
        let json_error = serde_json::from_str::<u64>("not json").unwrap_err();
        let error = StoreError::from(json_error);
        assert!(error.source().is_some());
        assert!(error.to_string().starts_with("payload codec error"));
    }

    #[test]
    fn internal_classification() {
        assert!(SsoError::from(StoreError::MutexPoisoned).is_internal());
        assert!(SsoError::from(DirectoryError::Backend("down".into())).is_internal());
        assert!(SsoError::Credential("boom".into()).is_internal());

        for error in [
            SsoError::Validation("x".into()),
            SsoError::InvalidCredentials,
            SsoError::UserDisabled,
            SsoError::TooManyAttempts,
            SsoError::InvalidToken,
            SsoError::ExpiredToken,
            SsoError::InvalidService,
            SsoError::TicketNotFound,
            SsoError::ServiceMismatch,
            SsoError::UserNotFound,
        ] {
            assert!(!error.is_internal(), "{error:?} should not be internal");
        }
    }

    #[test]
    fn errors_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<SsoError>();
        assert_send_sync::<StoreError>();
        assert_send_sync::<DirectoryError>();
    }

    #[test]
    fn error_trait_implementation() {
        let error = SsoError::TicketNotFound;
        let _: &dyn Error = &error;
        assert!(error.source().is_none());
    }
}
