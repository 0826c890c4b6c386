//! End-to-end session flows against a mock taskrs server, using the same
//! wiring the CLI uses.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use taskrs_client_core::auth::{Navigator, SessionStore};
use taskrs_client_core::config::SessionBackend;
use taskrs_client_core::{ApiError, Config, SessionManager, SessionState};

fn token_expiring_in(secs: i64) -> String {
    let exp = chrono::Utc::now().timestamp() + secs;
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"1","exp":{}}}"#, exp))
    )
}

struct Client {
    manager: SessionManager,
    store: Arc<dyn SessionStore>,
    redirects: Arc<AtomicUsize>,
}

fn client(server: &MockServer) -> Client {
    let config = Config {
        base_url: format!("{}/", server.uri()),
        session_backend: SessionBackend::Memory,
        ..Default::default()
    };
    let store = config.session_store().unwrap();

    let redirects = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&redirects);
    let navigator: Arc<dyn Navigator> = Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let manager = config
        .session_manager(Arc::clone(&store), navigator, false)
        .unwrap();
    Client {
        manager,
        store,
        redirects,
    }
}

async fn mount_login(server: &MockServer, access_token: &str, refresh_token: &str) {
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": access_token,
            "refreshToken": refresh_token,
        })))
        .mount(server)
        .await;
}

fn empty_page() -> serde_json::Value {
    serde_json::json!({"page": 0, "pageCount": 0, "pageSize": 0, "totalCount": 0, "items": []})
}

#[tokio::test]
async fn test_login_call_refresh_logout() {
    let server = MockServer::start().await;
    let c = client(&server);
    let t1 = token_expiring_in(3600);
    let t2 = token_expiring_in(7200);
    mount_login(&server, &t1, "R1").await;

    c.manager.login("admin@example.com", "pw").await.unwrap();
    assert_eq!(c.manager.state(), SessionState::Active);

    Mock::given(method("GET"))
        .and(path("/users"))
        .and(header("Authorization", format!("Bearer {}", t1).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(empty_page()))
        .expect(1)
        .mount(&server)
        .await;
    let page = c.manager.api().all_users(None).await.unwrap();
    assert!(page.items.is_empty());

    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .and(body_string(r#""R1""#))
        .respond_with(ResponseTemplate::new(200).set_body_json(&t2))
        .expect(1)
        .mount(&server)
        .await;
    assert_eq!(c.manager.refresh().await.unwrap(), t2);

    let record = c.store.get().unwrap().unwrap();
    assert_eq!(record.access_token, t2);
    assert_eq!(record.refresh_token, "R1");

    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .and(header("Authorization", format!("Bearer {}", t2).as_str()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    c.manager.logout().await.unwrap();

    assert_eq!(c.manager.state(), SessionState::NoSession);
    assert!(c.store.get().unwrap().is_none());
    assert_eq!(c.redirects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unauthorized_call_redirects_once_and_keeps_session() {
    let server = MockServer::start().await;
    let c = client(&server);
    let t1 = token_expiring_in(3600);
    mount_login(&server, &t1, "R1").await;
    c.manager.login("admin@example.com", "pw").await.unwrap();

    Mock::given(method("GET"))
        .and(path("/categories"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = c.manager.api().all_categories(None).await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized));
    assert_eq!(c.redirects.load(Ordering::SeqCst), 1);

    // The client does not act on the 401 beyond the redirect
    assert_eq!(c.store.access_token().unwrap().as_deref(), Some(t1.as_str()));
    assert_eq!(c.manager.state(), SessionState::Active);
}

#[tokio::test]
async fn test_short_lived_token_is_renewed_in_background() {
    let server = MockServer::start().await;
    let c = client(&server);
    // Expires inside the renewal buffer, so renewal is due immediately
    let short = token_expiring_in(5);
    let long = token_expiring_in(3600);
    mount_login(&server, &short, "R1").await;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&long))
        .expect(1)
        .mount(&server)
        .await;

    c.manager.login("admin@example.com", "pw").await.unwrap();

    let mut renewed = false;
    for _ in 0..50 {
        if c.store.access_token().unwrap().as_deref() == Some(long.as_str()) {
            renewed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(renewed, "access token was not renewed in the background");
    assert_eq!(c.store.refresh_token().unwrap().as_deref(), Some("R1"));
}

#[tokio::test]
async fn test_rejected_login_leaves_no_session() {
    let server = MockServer::start().await;
    let c = client(&server);
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let err = c.manager.login("admin@example.com", "wrong").await.unwrap_err();
    assert!(err.requires_login());
    assert_eq!(c.manager.state(), SessionState::NoSession);
}
