//! ## 日本語
//!
//! axum 向けの HTTP 境界です。
//!
//! - `Extension<AuthService>` / `Extension<SsoService>` を state から取得し
//! - Header / query / Cookie から token を抽出して検証し
//! - 全レスポンスを `{code, message, data?}` の封筒形式で返します
//! - CORS とリクエストごとの tracing span を付けます
//!
//! ## English
//!
//! The axum request boundary.
//!
//! - Fetches `Extension<AuthService>` / `Extension<SsoService>` from request state
//! - Extracts a token from the `Authorization` header, the `token` query parameter or the
//!   `access_token` cookie, and validates it
//! - Wraps every response in the `{code, message, data?}` envelope
//! - Adds CORS and a tracing span per request

use crate::auth::{AuthResponse, AuthService, LoginRequest, RegisterRequest};
use crate::models::{SsoError, UserSummary};
use crate::sso::{
    LoginPrompt, LogoutRedirect, SsoLoginRequest, SsoLoginResponse, SsoService, TicketValidation,
};
use crate::token::{Claims, TokenPair};
use axum::{
    Form, Json, Router,
    body::Body,
    extract::{
        ConnectInfo, Extension, FromRequest, FromRequestParts, MatchedPath, Query, Request,
        rejection::{FormRejection, JsonRejection},
    },
    http::{HeaderMap, HeaderValue, Method, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use cookie::Cookie;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{Span, error, info_span};

/// Cookie the login handler sets and the extractor falls back to.
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// Query parameter consulted when no `Authorization` header is present.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// The response envelope. `code` is 0 on success and the HTTP status otherwise.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Json<Self> {
        Json(Self {
            code: 0,
            message: message.into(),
            data: Some(data),
        })
    }
}

impl Envelope<()> {
    /// Success without a payload; `data` is omitted from the body.
    pub fn done(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            code: 0,
            message: message.into(),
            data: None,
        })
    }
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(Envelope::<()> {
            code: status.as_u16(),
            message: message.into(),
            data: None,
        }),
    )
        .into_response()
}

impl SsoError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SsoError::Validation(_) | SsoError::InvalidService | SsoError::ServiceMismatch => {
                StatusCode::BAD_REQUEST
            }
            SsoError::UsernameTaken(_) | SsoError::EmailTaken(_) => StatusCode::CONFLICT,
            SsoError::InvalidCredentials
            | SsoError::InvalidToken
            | SsoError::ExpiredToken
            | SsoError::TicketNotFound => StatusCode::UNAUTHORIZED,
            SsoError::UserDisabled => StatusCode::FORBIDDEN,
            SsoError::TooManyAttempts => StatusCode::TOO_MANY_REQUESTS,
            SsoError::UserNotFound => StatusCode::NOT_FOUND,
            SsoError::Token(_)
            | SsoError::Credential(_)
            | SsoError::Store(_)
            | SsoError::Directory(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SsoError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            // 日本語: 期限切れと不正を区別しない（どちらも再ログインが必要）。
            // English: Expired and invalid tokens look the same to clients.
            SsoError::InvalidToken | SsoError::ExpiredToken => {
                "Invalid or expired token".to_string()
            }
            err if err.is_internal() => {
                error!(error = %err, "request failed");
                "Internal server error".to_string()
            }
            err => err.to_string(),
        };
        failure(status, message)
    }
}

fn cookie_header_string(parts: &Parts) -> Option<String> {
    // 日本語: Cookie header は複数来る可能性があるため "; " で結合して扱う。
    // English: Cookie headers may appear multiple times; join them with "; ".
    let joined = parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join("; ");
    if joined.is_empty() { None } else { Some(joined) }
}

fn find_cookie_value(cookie_header: &str, target_name: &str) -> Option<String> {
    Cookie::split_parse(cookie_header)
        .filter_map(Result::ok)
        .find(|c| c.name() == target_name)
        .map(|c| c.value().to_string())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    if scheme != "Bearer" || token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

/// Finds the caller's token: `Authorization: Bearer`, then `?token=`, then the
/// `access_token` cookie.
pub fn extract_token(parts: &Parts) -> Option<String> {
    if let Some(token) = bearer_token(&parts.headers) {
        return Some(token);
    }

    // 日本語: SSO のリダイレクト直後は query に token が載ってくることがある。
    // English: Right after an SSO redirect the token may arrive in the query string.
    let from_query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(mut params)| params.remove(TOKEN_QUERY_PARAM))
        .filter(|token| !token.is_empty());
    if from_query.is_some() {
        return from_query;
    }

    cookie_header_string(parts)
        .and_then(|h| find_cookie_value(&h, ACCESS_TOKEN_COOKIE))
        .filter(|token| !token.is_empty())
}

/// Where a request came from, for login throttling.
///
/// First `X-Forwarded-For` entry, then `X-Real-IP`, then the socket peer (needs
/// `into_make_service_with_connect_info`), else `"unknown"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOrigin(pub String);

fn client_origin(parts: &Parts) -> String {
    let header_value = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    if let Some(first) = header_value("x-forwarded-for")
        .and_then(|list| list.split(',').next().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
    {
        return first;
    }
    if let Some(real_ip) = header_value("x-real-ip") {
        return real_ip;
    }
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for ClientOrigin
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(client_origin(parts)))
    }
}

/// An authorized caller. Declaring it as a handler argument makes the route protected.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: u64,
    pub username: String,
    pub token: String,
    pub claims: Claims,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        // 日本語: 1) state から AuthService を取り出す。
        //        ルータに `.layer(Extension(auth))` が必要。
        // English: 1) Fetch AuthService from request state.
        //          The router must install `.layer(Extension(auth))`.
        let Extension(auth) = Extension::<AuthService>::from_request_parts(parts, state)
            .await
            .map_err(|_| {
                failure(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Auth service not found",
                )
            })?;

        // 日本語: 2) header / query / cookie の順に token を探す。
        // English: 2) Look for a token in header, query, then cookie.
        let token = extract_token(parts).ok_or_else(|| {
            failure(StatusCode::UNAUTHORIZED, "Authorization token required")
        })?;

        // 日本語: 3) 署名・期限・ブラックリスト・種別（access）を検証する。
        //        ストア障害は 500 として扱い、「未失効」とはみなさない。
        // English: 3) Check signature, expiry, blacklist and token type (access).
        //          A store failure is a 500, never "not revoked".
        let claims = auth
            .authorize(&token)
            .await
            .map_err(IntoResponse::into_response)?;

        Ok(Self {
            id: claims.user_id,
            username: claims.username.clone(),
            token,
            claims,
        })
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, SsoError> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|rejection| SsoError::Validation(rejection.body_text()))
}

/// A request body sent either as JSON or as an HTML form post.
///
/// `application/x-www-form-urlencoded` is decoded as a form; anything else goes through
/// the JSON extractor and its content-type check.
#[derive(Debug, Clone)]
pub struct JsonOrForm<T>(pub T);

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"))
}

#[axum::async_trait]
impl<S, T> FromRequest<S> for JsonOrForm<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    Form<T>: FromRequest<S, Rejection = FormRejection>,
    S: Send + Sync,
{
    type Rejection = SsoError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if is_form(req.headers()) {
            let Form(inner) = Form::<T>::from_request(req, state)
                .await
                .map_err(|rejection| SsoError::Validation(rejection.body_text()))?;
            return Ok(Self(inner));
        }
        let inner = body(Json::<T>::from_request(req, state).await)?;
        Ok(Self(inner))
    }
}

fn access_token_cookie(token: &TokenPair) -> Option<HeaderValue> {
    let max_age = i64::try_from(token.expires_in).unwrap_or(i64::MAX);
    let cookie = Cookie::build((ACCESS_TOKEN_COOKIE, token.access_token.clone()))
        .path("/")
        .http_only(true)
        .max_age(cookie::time::Duration::seconds(max_age))
        .build();
    HeaderValue::from_str(&cookie.to_string()).ok()
}

fn expired_access_token_cookie() -> Option<HeaderValue> {
    let cookie = Cookie::build((ACCESS_TOKEN_COOKIE, ""))
        .path("/")
        .http_only(true)
        .max_age(cookie::time::Duration::ZERO)
        .build();
    HeaderValue::from_str(&cookie.to_string()).ok()
}

fn with_cookie(mut response: Response, cookie: Option<HeaderValue>) -> Response {
    if let Some(cookie) = cookie {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
    response
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
    })
}

async fn register(
    Extension(auth): Extension<AuthService>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<Envelope<UserSummary>>, SsoError> {
    let user = auth.register(body(payload)?).await?;
    Ok(Envelope::ok("Registration successful", user))
}

async fn login(
    Extension(auth): Extension<AuthService>,
    ClientOrigin(origin): ClientOrigin,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, SsoError> {
    let response: AuthResponse = auth.login(body(payload)?, &origin).await?;
    let cookie = access_token_cookie(&response.token);
    Ok(with_cookie(
        Envelope::ok("Login successful", response).into_response(),
        cookie,
    ))
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

async fn refresh(
    Extension(auth): Extension<AuthService>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<Envelope<TokenPair>>, SsoError> {
    let req = body(payload)?;
    let pair = auth.refresh(&req.refresh_token).await?;
    Ok(Envelope::ok("Token refreshed", pair))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenStatus {
    pub user_id: u64,
    pub username: String,
    pub valid: bool,
}

/// Token introspection. The token is read the same way [`AuthUser`] reads it, but any
/// token type is accepted.
struct MaybeToken(Option<String>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for MaybeToken
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(extract_token(parts)))
    }
}

async fn validate(
    Extension(auth): Extension<AuthService>,
    MaybeToken(token): MaybeToken,
) -> Result<Response, SsoError> {
    let Some(token) = token else {
        return Ok(failure(StatusCode::UNAUTHORIZED, "No token provided"));
    };
    let claims = auth.validate(&token).await?;
    Ok(Envelope::ok(
        "Token is valid",
        TokenStatus {
            user_id: claims.user_id,
            username: claims.username,
            valid: true,
        },
    )
    .into_response())
}

async fn logout(
    Extension(auth): Extension<AuthService>,
    user: AuthUser,
) -> Result<Response, SsoError> {
    auth.logout(&user.token).await?;
    Ok(with_cookie(
        Envelope::done("Logged out").into_response(),
        expired_access_token_cookie(),
    ))
}

async fn user_info(
    Extension(auth): Extension<AuthService>,
    user: AuthUser,
) -> Result<Json<Envelope<UserSummary>>, SsoError> {
    let summary = auth.user_info(user.id).await?;
    Ok(Envelope::ok("success", summary))
}

#[derive(Debug, Default, Deserialize)]
struct ServiceQuery {
    #[serde(default)]
    service: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TicketQuery {
    #[serde(default)]
    ticket: Option<String>,
    #[serde(default)]
    service: Option<String>,
}

async fn sso_login_prompt(
    Extension(sso): Extension<SsoService>,
    Query(query): Query<ServiceQuery>,
) -> Result<Json<Envelope<LoginPrompt>>, SsoError> {
    let prompt = sso.login_prompt(query.service.as_deref().unwrap_or_default())?;
    Ok(Envelope::ok("Please login", prompt))
}

async fn sso_login(
    Extension(sso): Extension<SsoService>,
    ClientOrigin(origin): ClientOrigin,
    JsonOrForm(payload): JsonOrForm<SsoLoginRequest>,
) -> Result<Json<Envelope<SsoLoginResponse>>, SsoError> {
    let response = sso.login(payload, &origin).await?;
    Ok(Envelope::ok("Login successful", response))
}

async fn sso_validate(
    Extension(sso): Extension<SsoService>,
    Query(query): Query<TicketQuery>,
) -> Result<Json<Envelope<TicketValidation>>, SsoError> {
    let identity = sso
        .validate(
            query.ticket.as_deref().unwrap_or_default(),
            query.service.as_deref().unwrap_or_default(),
        )
        .await?;
    Ok(Envelope::ok("Ticket validated successfully", identity))
}

async fn sso_logout(
    Extension(sso): Extension<SsoService>,
    Query(query): Query<ServiceQuery>,
) -> Json<Envelope<LogoutRedirect>> {
    Envelope::ok(
        "Logged out successfully",
        sso.logout(query.service.as_deref()),
    )
}

fn make_span(request: &axum::http::Request<Body>) -> Span {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);
    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = route,
    )
}

/// Any origin, the usual methods, and the headers a browser client sends.
fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::ORIGIN, header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(86_400))
}

/// All routes, with both services installed as extensions, CORS and request tracing.
pub fn router(auth: AuthService, sso: SsoService) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/validate", get(validate))
        .route("/api/auth/logout", post(logout))
        .route("/api/user/info", get(user_info))
        .route("/sso/login", get(sso_login_prompt).post(sso_login))
        .route("/sso/validate", get(sso_validate))
        .route("/sso/logout", get(sso_logout))
        .layer(Extension(auth))
        .layer(Extension(sso))
        .layer(cors())
        .layer(TraceLayer::new_for_http().make_span_with(make_span))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(builder: axum::http::request::Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn bearer_header_wins_over_query_and_cookie() {
        let parts = parts(
            Request::get("/x?token=from-query")
                .header(header::AUTHORIZATION, "Bearer from-header")
                .header(header::COOKIE, "access_token=from-cookie"),
        );
        assert_eq!(extract_token(&parts).as_deref(), Some("from-header"));
    }

    #[test]
    fn query_then_cookie() {
        let with_query = parts(
            Request::get("/x?token=from-query").header(header::COOKIE, "access_token=c"),
        );
        assert_eq!(extract_token(&with_query).as_deref(), Some("from-query"));

        let cookie_only = parts(
            Request::get("/x")
                .header(header::COOKIE, "theme=dark")
                .header(header::COOKIE, "access_token=from-cookie"),
        );
        assert_eq!(extract_token(&cookie_only).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn non_bearer_scheme_is_ignored() {
        let parts = parts(Request::get("/x").header(header::AUTHORIZATION, "Basic abc"));
        assert_eq!(extract_token(&parts), None);
    }

    #[test]
    fn origin_prefers_forwarded_for() {
        let forwarded = parts(
            Request::get("/")
                .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
                .header("x-real-ip", "10.0.0.2"),
        );
        assert_eq!(client_origin(&forwarded), "203.0.113.7");

        let real_ip = parts(Request::get("/").header("x-real-ip", "10.0.0.2"));
        assert_eq!(client_origin(&real_ip), "10.0.0.2");

        let mut peer = parts(Request::get("/"));
        peer.extensions
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000))));
        assert_eq!(client_origin(&peer), "192.0.2.1");

        assert_eq!(client_origin(&parts(Request::get("/"))), "unknown");
    }

    #[test]
    fn form_content_type_is_detected() {
        let form = parts(Request::post("/").header(
            header::CONTENT_TYPE,
            "application/x-www-form-urlencoded; charset=UTF-8",
        ));
        assert!(is_form(&form.headers));

        let json = parts(Request::post("/").header(header::CONTENT_TYPE, "application/json"));
        assert!(!is_form(&json.headers));
        assert!(!is_form(&parts(Request::post("/")).headers));
    }

    #[test]
    fn status_mapping() {
        assert_eq!(SsoError::TooManyAttempts.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(SsoError::UserDisabled.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(SsoError::ServiceMismatch.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            SsoError::EmailTaken("a@b.c".into()).status_code(),
            StatusCode::CONFLICT
        );
    }
}
