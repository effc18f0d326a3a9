//! Service ticket issuance and exchange.

use r_sso::sso::build_redirect_url;
use r_sso::{
    Argon2Verifier, AuthService, MemoryStore, MemoryUserDirectory, RegisterRequest, SsoConfig,
    SsoError, SsoLoginRequest, SsoService, UserDirectory,
};
use std::sync::Arc;
use std::time::Duration;

const ORIGIN: &str = "192.0.2.44";
const SERVICE: &str = "https://app.example.com/callback";

struct Harness {
    store: MemoryStore,
    directory: MemoryUserDirectory,
    sso: SsoService,
}

fn harness_with(config: SsoConfig) -> Harness {
    let store = MemoryStore::new();
    let directory = MemoryUserDirectory::new();
    let auth = AuthService::new(
        &config,
        Arc::new(store.clone()),
        Arc::new(directory.clone()),
        Arc::new(Argon2Verifier::with_cost(4096, 1, 1).unwrap()),
    );
    let sso = SsoService::new(auth, Arc::new(store.clone()), &config.ticket);
    Harness {
        store,
        directory,
        sso,
    }
}

fn harness() -> Harness {
    harness_with(SsoConfig::with_secret("sso-secret"))
}

async fn register(h: &Harness, username: &str) -> u64 {
    h.sso
        .auth()
        .register(RegisterRequest {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password: "pass-word".to_string(),
            nickname: username.to_uppercase(),
        })
        .await
        .unwrap()
        .id
}

fn sso_login(username: &str, service: &str) -> SsoLoginRequest {
    SsoLoginRequest {
        username: username.to_string(),
        password: "pass-word".to_string(),
        service: service.to_string(),
    }
}

#[tokio::test]
async fn login_issues_ticket_and_redirect() {
    let h = harness();
    register(&h, "alice").await;

    let response = h.sso.login(sso_login("alice", SERVICE), ORIGIN).await.unwrap();
    assert!(response.ticket.starts_with("ST-"));
    assert_eq!(response.ticket.len(), 35);
    assert_eq!(
        response.redirect_url,
        format!("{SERVICE}?ticket={}", response.ticket)
    );

    let ttl = h
        .store
        .ttl(&format!("ticket:{}", response.ticket))
        .unwrap()
        .unwrap();
    assert!(ttl <= Duration::from_secs(60));
}

#[tokio::test]
async fn empty_service_is_rejected_before_authentication() {
    let h = harness();
    let result = h.sso.login(sso_login("ghost", ""), ORIGIN).await;
    assert!(matches!(result, Err(SsoError::InvalidService)));
    // Nothing was counted against the attempted username.
    assert!(h.store.is_empty().unwrap());
}

#[tokio::test]
async fn ticket_is_single_use() {
    let h = harness();
    let user_id = register(&h, "bob").await;
    let ticket = h
        .sso
        .login(sso_login("bob", SERVICE), ORIGIN)
        .await
        .unwrap()
        .ticket;

    let identity = h.sso.validate(&ticket, SERVICE).await.unwrap();
    assert_eq!(identity.user_id, user_id);
    assert_eq!(identity.username, "bob");
    assert_eq!(identity.email, "bob@example.com");
    assert_eq!(identity.nickname, "BOB");

    assert!(matches!(
        h.sso.validate(&ticket, SERVICE).await,
        Err(SsoError::TicketNotFound)
    ));
}

#[tokio::test]
async fn service_mismatch_burns_the_ticket() {
    let h = harness();
    register(&h, "carol").await;
    let ticket = h
        .sso
        .login(sso_login("carol", SERVICE), ORIGIN)
        .await
        .unwrap()
        .ticket;

    assert!(matches!(
        h.sso.validate(&ticket, "https://evil.example.com/").await,
        Err(SsoError::ServiceMismatch)
    ));
    assert!(matches!(
        h.sso.validate(&ticket, SERVICE).await,
        Err(SsoError::TicketNotFound)
    ));
}

#[tokio::test]
async fn concurrent_validation_has_one_winner() {
    let h = harness();
    register(&h, "dave").await;
    let ticket = h
        .sso
        .login(sso_login("dave", SERVICE), ORIGIN)
        .await
        .unwrap()
        .ticket;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let sso = h.sso.clone();
        let ticket = ticket.clone();
        handles.push(tokio::spawn(
            async move { sso.validate(&ticket, SERVICE).await },
        ));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(err) => assert!(matches!(err, SsoError::TicketNotFound)),
        }
    }
    assert_eq!(successes, 1);
}

#[tokio::test]
async fn validation_reads_current_profile() {
    let h = harness();
    let user_id = register(&h, "erin").await;
    let ticket = h
        .sso
        .login(sso_login("erin", SERVICE), ORIGIN)
        .await
        .unwrap()
        .ticket;

    let mut user = h.directory.get_by_id(user_id).await.unwrap().unwrap();
    user.nickname = "Erin Renamed".to_string();
    h.directory.update(&user).await.unwrap();

    let identity = h.sso.validate(&ticket, SERVICE).await.unwrap();
    assert_eq!(identity.nickname, "Erin Renamed");
}

#[tokio::test]
async fn validation_of_deleted_user_fails() {
    let h = harness();
    let user_id = register(&h, "frank").await;
    let ticket = h
        .sso
        .login(sso_login("frank", SERVICE), ORIGIN)
        .await
        .unwrap()
        .ticket;
    h.directory.soft_delete(user_id).await.unwrap();

    assert!(matches!(
        h.sso.validate(&ticket, SERVICE).await,
        Err(SsoError::UserNotFound)
    ));
}

#[tokio::test]
async fn empty_inputs_to_validate() {
    let h = harness();
    assert!(matches!(
        h.sso.validate("", SERVICE).await,
        Err(SsoError::TicketNotFound)
    ));
    assert!(matches!(
        h.sso.validate("ST-whatever", "").await,
        Err(SsoError::InvalidService)
    ));
}

#[tokio::test]
async fn expired_ticket_is_not_found() {
    let mut config = SsoConfig::with_secret("sso-secret");
    config.ticket.expire = 1;
    let h = harness_with(config);
    register(&h, "grace").await;
    let ticket = h
        .sso
        .login(sso_login("grace", SERVICE), ORIGIN)
        .await
        .unwrap()
        .ticket;

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(matches!(
        h.sso.validate(&ticket, SERVICE).await,
        Err(SsoError::TicketNotFound)
    ));
}

#[tokio::test]
async fn sso_login_shares_the_throttle() {
    let mut config = SsoConfig::with_secret("sso-secret");
    config.login.max_attempts = 2;
    let h = harness_with(config);
    register(&h, "heidi").await;

    for _ in 0..2 {
        let mut req = sso_login("heidi", SERVICE);
        req.password = "wrong-pass".to_string();
        assert!(matches!(
            h.sso.login(req, ORIGIN).await,
            Err(SsoError::InvalidCredentials)
        ));
    }
    assert!(matches!(
        h.sso.login(sso_login("heidi", SERVICE), ORIGIN).await,
        Err(SsoError::TooManyAttempts)
    ));
}

#[test]
fn redirect_url_construction() {
    assert_eq!(
        build_redirect_url("https://a.example/cb", "ST-1"),
        "https://a.example/cb?ticket=ST-1"
    );
    assert_eq!(
        build_redirect_url("https://a.example/cb?x=1", "ST-1"),
        "https://a.example/cb?x=1&ticket=ST-1"
    );
}

#[test]
fn prompt_and_logout_echo_the_service() {
    let h = harness();
    let prompt = h.sso.login_prompt(SERVICE).unwrap();
    assert_eq!(prompt.service, SERVICE);
    assert_eq!(prompt.login_url, "/sso/login");
    assert!(matches!(h.sso.login_prompt(""), Err(SsoError::InvalidService)));

    assert_eq!(h.sso.logout(Some(SERVICE)).redirect_url, SERVICE);
    assert_eq!(h.sso.logout(None).redirect_url, "");
}
