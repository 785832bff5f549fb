//! End-to-end tests of the session facade over real HTTP
//!
//! REST traffic goes through `ReqwestTransport` and `HttpAuthApi` against a
//! wiremock server; the socket side uses the scripted transport from
//! `tether_core::testing`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tether_core::testing::ScriptedSocket;
use tether_core::{CredentialStore, SessionFacade, SessionPorts};
use tether_domain::constants::SESSION_CREDENTIAL_KEY;
use tether_domain::{
    AuthState, ChannelMessage, ClientConfig, Credentials, Frame, RequestSpec, ResponseSource,
    SessionError,
};
use tether_infra::{HttpAuthApi, MemoryCredentialStore, ReqwestTransport};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    server: MockServer,
    store: Arc<MemoryCredentialStore>,
    socket: Arc<ScriptedSocket>,
    facade: SessionFacade,
}

async fn harness() -> Harness {
    let server = MockServer::start().await;
    let mut config = ClientConfig::new(server.uri());
    config.retry_base_delay = Duration::from_millis(10);
    config.reconnect_base_delay = Duration::from_millis(10);
    config.reconnect_max_delay = Duration::from_millis(50);

    let transport = Arc::new(ReqwestTransport::new().expect("transport"));
    let auth_api = Arc::new(HttpAuthApi::new(&config, transport.clone()));
    let store = Arc::new(MemoryCredentialStore::new());
    let socket = Arc::new(ScriptedSocket::new());
    let ports = SessionPorts::new(store.clone(), auth_api, transport, socket.clone());
    let facade = SessionFacade::new(config, ports).expect("valid config");

    Harness { server, store, socket, facade }
}

async fn mount_login(server: &MockServer, expires_in: u64) {
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "a1",
            "refresh_token": "r1",
            "expires_in": expires_in,
            "user_id": "ada"
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn login_then_cached_read() {
    let h = harness().await;
    mount_login(&h.server, 3600).await;
    Mock::given(method("GET"))
        .and(path("/profile"))
        .and(header("authorization", "Bearer a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "Ada"})))
        .expect(1)
        .mount(&h.server)
        .await;

    h.facade.login(&Credentials::new("ada", "pw")).await.unwrap();
    let first = h.facade.request(RequestSpec::get("/profile")).await.unwrap();
    let second = h.facade.request(RequestSpec::get("/profile")).await.unwrap();

    assert_eq!(first.source, ResponseSource::Network);
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.json::<serde_json::Value>().unwrap(), json!({"name": "Ada"}));
    assert!(h.store.get(SESSION_CREDENTIAL_KEY).await.unwrap().is_some());
}

#[tokio::test]
async fn expiring_token_is_refreshed_once_for_parallel_requests() {
    let h = harness().await;
    mount_login(&h.server, 30).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "a2", "refresh_token": "r2", "expires_in": 3600}))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&h.server)
        .await;
    for resource in ["/profile", "/settings"] {
        Mock::given(method("GET"))
            .and(path(resource))
            .and(header("authorization", "Bearer a2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&h.server)
            .await;
    }

    h.facade.login(&Credentials::new("ada", "pw")).await.unwrap();
    let (profile, settings) = tokio::join!(
        h.facade.request(RequestSpec::get("/profile")),
        h.facade.request(RequestSpec::get("/settings")),
    );

    assert_eq!(profile.unwrap().status, 200);
    assert_eq!(settings.unwrap().status, 200);
    let session = h.facade.tokens().current_session().await.unwrap();
    assert_eq!(session.refresh_token, "r2");
    assert_eq!(session.user_id, "ada");
}

#[tokio::test]
async fn write_invalidates_cached_reads() {
    let h = harness().await;
    mount_login(&h.server, 3600).await;
    Mock::given(method("GET"))
        .and(path("/posts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/posts"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
        .expect(1)
        .mount(&h.server)
        .await;

    h.facade.login(&Credentials::new("ada", "pw")).await.unwrap();
    h.facade.request(RequestSpec::get("/posts")).await.unwrap();
    h.facade.request(RequestSpec::get("/posts")).await.unwrap();
    h.facade.request(RequestSpec::post("/posts", json!({"title": "hello"}))).await.unwrap();
    let refetched = h.facade.request(RequestSpec::get("/posts")).await.unwrap();

    assert_eq!(refetched.source, ResponseSource::Network);
}

#[tokio::test]
async fn retries_stop_at_the_configured_bound() {
    let h = harness().await;
    mount_login(&h.server, 3600).await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&h.server)
        .await;

    h.facade.login(&Credentials::new("ada", "pw")).await.unwrap();
    let err = h
        .facade
        .request(RequestSpec::get("/flaky").max_retries(2).use_cache(false))
        .await
        .unwrap_err();

    assert_eq!(err, SessionError::ServiceUnavailable { attempts: 3, reason: "HTTP 503".into() });
}

#[tokio::test]
async fn rejected_refresh_requires_sign_in() {
    let h = harness().await;
    mount_login(&h.server, 30).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&h.server)
        .await;

    h.facade.login(&Credentials::new("ada", "pw")).await.unwrap();
    let err = h.facade.request(RequestSpec::get("/profile")).await.unwrap_err();

    assert_eq!(err, SessionError::AuthExpired);
    assert_eq!(h.facade.current_auth_state(), AuthState::SignInRequired);
    assert!(h.store.get(SESSION_CREDENTIAL_KEY).await.unwrap().is_none());
}

#[tokio::test]
async fn logout_clears_everything() {
    let h = harness().await;
    mount_login(&h.server, 3600).await;
    Mock::given(method("GET"))
        .and(path("/profile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&h.server)
        .await;

    h.facade.login(&Credentials::new("ada", "pw")).await.unwrap();
    h.facade.request(RequestSpec::get("/profile")).await.unwrap();
    h.facade.connect_realtime().await.unwrap();
    h.facade.logout().await.unwrap();

    assert!(h.store.get(SESSION_CREDENTIAL_KEY).await.unwrap().is_none());
    assert!(h.facade.cache().is_empty());
    assert_eq!(
        h.facade.request(RequestSpec::get("/profile")).await.unwrap_err(),
        SessionError::Unauthenticated
    );
}

#[tokio::test]
async fn subscriptions_are_restored_after_reconnect() {
    let h = harness().await;
    mount_login(&h.server, 3600).await;
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);

    h.facade.login(&Credentials::new("ada", "pw")).await.unwrap();
    h.facade.subscribe("posts", move |message: &ChannelMessage| {
        sink.lock().push(message.payload.clone());
        Ok(())
    });
    h.facade.connect_realtime().await.unwrap();

    let mut first = h.socket.accept().await;
    assert_eq!(first.next_frame().await, Frame::Subscribe { topic: "posts".into() });
    first.close(1012, "service restart");

    let mut second = h.socket.accept().await;
    assert_eq!(second.next_frame().await, Frame::Subscribe { topic: "posts".into() });
    second.publish("posts", json!({"id": 7}));

    tokio::time::timeout(Duration::from_secs(2), async {
        while received.lock().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("message delivered after reconnect");
    assert_eq!(received.lock()[0], json!({"id": 7}));
    assert_eq!(h.socket.handshake_headers()[1].get("authorization").unwrap(), "Bearer a1");
}
