//! Shared models and error types for the r-sso library.
//!
//! This module contains the error taxonomy and the user records that flow between the
//! directory, the services and the HTTP boundary.

mod rsso_error;
mod user;

pub use rsso_error::{DirectoryError, SsoError, SsoResult, StoreError};
pub use user::{NewUser, User, UserStatus, UserSummary};
