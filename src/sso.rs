//! CAS-style service tickets.
//!
//! A client application sends the browser to the broker with its own URL as `service`.
//! After a password login the broker stores a one-time ticket bound to that service and
//! redirects back with `?ticket=ST-...`. The application's backend then exchanges the
//! ticket (plus the same service URL) for the user's identity. A ticket is consumed by
//! the first exchange attempt, successful or not.

use crate::auth::AuthService;
use crate::config::TicketConfig;
use crate::models::{SsoError, SsoResult, StoreError};
use crate::store::{PREFIX_TICKET, SharedStore};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument, warn};

pub const TICKET_PREFIX: &str = "ST-";
const TICKET_RANDOM_BYTES: usize = 16;

/// Where the login form posts to.
pub const LOGIN_ENDPOINT: &str = "/sso/login";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SsoLoginRequest {
    pub username: String,
    pub password: String,
    pub service: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsoLoginResponse {
    pub ticket: String,
    pub redirect_url: String,
}

/// The identity handed to a client application in exchange for a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketValidation {
    pub user_id: u64,
    pub username: String,
    pub email: String,
    pub nickname: String,
}

/// Body of the login prompt shown for `GET /sso/login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginPrompt {
    pub service: String,
    pub login_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutRedirect {
    pub redirect_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct TicketData {
    user_id: u64,
    username: String,
    service: String,
}

/// `ST-` followed by 32 lowercase hex characters from the OS RNG.
pub fn generate_ticket_id() -> String {
    let mut bytes = [0u8; TICKET_RANDOM_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{TICKET_PREFIX}{}", hex::encode(bytes))
}

/// Appends `ticket=<ticket>` to `service`, using `&` when it already has a query string.
pub fn build_redirect_url(service: &str, ticket: &str) -> String {
    let separator = if service.contains('?') { '&' } else { '?' };
    format!("{service}{separator}ticket={ticket}")
}

#[derive(Clone)]
pub struct SsoService {
    auth: AuthService,
    store: SharedStore,
    ticket_ttl: Duration,
}

impl SsoService {
    pub fn new(auth: AuthService, store: SharedStore, config: &TicketConfig) -> Self {
        Self {
            auth,
            store,
            ticket_ttl: config.expire_duration(),
        }
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    /// Authenticates like a password login, then issues a ticket for `service`.
    #[instrument(skip(self, req), fields(username = %req.username, service = %req.service))]
    pub async fn login(
        &self,
        req: SsoLoginRequest,
        client_origin: &str,
    ) -> SsoResult<SsoLoginResponse> {
        if req.service.is_empty() {
            return Err(SsoError::InvalidService);
        }

        let user = self
            .auth
            .authenticate(&req.username, &req.password, client_origin)
            .await?;

        let ticket = generate_ticket_id();
        let payload = serde_json::to_string(&TicketData {
            user_id: user.id,
            username: user.username,
            service: req.service.clone(),
        })
        .map_err(StoreError::from)?;
        self.store
            .set(
                &format!("{PREFIX_TICKET}{ticket}"),
                &payload,
                Some(self.ticket_ttl),
            )
            .await?;

        info!(user_id = user.id, "service ticket issued");
        Ok(SsoLoginResponse {
            redirect_url: build_redirect_url(&req.service, &ticket),
            ticket,
        })
    }

    /// Consumes `ticket` and returns the current profile of its user.
    ///
    /// The ticket is removed before the service comparison, so a mismatched attempt
    /// burns it too.
    #[instrument(skip(self, ticket))]
    pub async fn validate(&self, ticket: &str, service: &str) -> SsoResult<TicketValidation> {
        if ticket.is_empty() {
            return Err(SsoError::TicketNotFound);
        }
        if service.is_empty() {
            return Err(SsoError::InvalidService);
        }

        let Some(raw) = self
            .store
            .get_del(&format!("{PREFIX_TICKET}{ticket}"))
            .await?
        else {
            return Err(SsoError::TicketNotFound);
        };
        let data: TicketData = serde_json::from_str(&raw).map_err(StoreError::from)?;

        if data.service != service {
            warn!(user_id = data.user_id, issued_for = %data.service, "ticket service mismatch");
            return Err(SsoError::ServiceMismatch);
        }

        let user = self
            .auth
            .directory()
            .get_by_id(data.user_id)
            .await?
            .ok_or(SsoError::UserNotFound)?;

        info!(user_id = user.id, "service ticket validated");
        Ok(TicketValidation {
            user_id: user.id,
            username: user.username,
            email: user.email,
            nickname: user.nickname,
        })
    }

    pub fn login_prompt(&self, service: &str) -> SsoResult<LoginPrompt> {
        if service.is_empty() {
            return Err(SsoError::InvalidService);
        }
        Ok(LoginPrompt {
            service: service.to_string(),
            login_url: LOGIN_ENDPOINT.to_string(),
        })
    }

    /// Echoes where the browser should go after logging out. No other service is
    /// notified.
    pub fn logout(&self, service: Option<&str>) -> LogoutRedirect {
        LogoutRedirect {
            redirect_url: service.unwrap_or_default().to_string(),
        }
    }
}
