//! [`AuthApi`] over the REST login and refresh endpoints
//!
//! Both endpoints accept a JSON body and answer with:
//!
//! ```json
//! {"access_token": "...", "refresh_token": "...", "expires_in": 3600, "user_id": "..."}
//! ```
//!
//! `expires_in` is in seconds. A refresh response may omit `refresh_token`
//! (the old one stays valid) and `user_id`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tether_common::{Clock, SystemClock};
use tether_core::{AuthApi, HttpRequest, HttpResponse, HttpTransport};
use tether_domain::{ClientConfig, Credentials, HttpMethod, Result, Session, SessionError};
use tracing::{debug, warn};

#[derive(Serialize)]
struct LoginBody<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshBody<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: u64,
    #[serde(default)]
    user_id: Option<String>,
}

/// Auth backend speaking JSON over an [`HttpTransport`]
pub struct HttpAuthApi {
    transport: Arc<dyn HttpTransport>,
    login_url: String,
    refresh_url: String,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl HttpAuthApi {
    pub fn new(config: &ClientConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self::with_clock(config, transport, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &ClientConfig, transport: Arc<dyn HttpTransport>, clock: Arc<dyn Clock>) -> Self {
        Self {
            transport,
            login_url: config.endpoint_url(&config.login_endpoint),
            refresh_url: config.endpoint_url(&config.refresh_endpoint),
            timeout: config.request_timeout,
            clock,
        }
    }

    async fn post<B: Serialize>(&self, url: &str, body: &B) -> Result<HttpResponse> {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        headers.insert("accept".to_string(), "application/json".to_string());

        let request = HttpRequest {
            method: HttpMethod::Post,
            url: url.to_string(),
            headers,
            body: Some(serde_json::to_vec(body)?),
            timeout: self.timeout,
        };
        Ok(self.transport.send(request).await?)
    }

    fn session_from(&self, response: &HttpResponse, fallback_refresh: Option<&str>) -> Result<Session> {
        let tokens: TokenResponse = serde_json::from_slice(&response.body)?;
        let refresh_token = tokens
            .refresh_token
            .or_else(|| fallback_refresh.map(str::to_string))
            .ok_or_else(|| SessionError::Serialization("token response lacks refresh_token".into()))?;
        let lifetime_ms = i64::try_from(tokens.expires_in.saturating_mul(1000)).unwrap_or(i64::MAX);

        Ok(Session {
            access_token: tokens.access_token,
            refresh_token,
            expires_at_epoch_millis: self.clock.millis_since_epoch().saturating_add(lifetime_ms),
            user_id: tokens.user_id.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, credentials: &Credentials) -> Result<Session> {
        let body = LoginBody { username: &credentials.username, password: &credentials.password };
        let response = self.post(&self.login_url, &body).await?;

        if !response.is_success() {
            let message = response.error_message();
            warn!(status = response.status, %message, "login rejected");
            return Err(SessionError::Api { status: response.status, message });
        }

        let mut session = self.session_from(&response, None)?;
        if session.user_id.is_empty() {
            session.user_id = credentials.username.clone();
        }
        debug!(user_id = %session.user_id, "login accepted");
        Ok(session)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session> {
        let response = self.post(&self.refresh_url, &RefreshBody { refresh_token }).await?;

        match response.status {
            200..=299 => self.session_from(&response, Some(refresh_token)),
            400 | 401 | 403 => {
                warn!(status = response.status, "refresh token rejected");
                Err(SessionError::AuthExpired)
            }
            status => Err(SessionError::Api { status, message: response.error_message() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tether_common::MockClock;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::http::ReqwestTransport;

    const NOW: u64 = 1_700_000_000_000;

    async fn api(server: &MockServer) -> HttpAuthApi {
        let config = ClientConfig::new(server.uri());
        let transport = Arc::new(ReqwestTransport::new().unwrap());
        HttpAuthApi::with_clock(&config, transport, Arc::new(MockClock::at_epoch_millis(NOW)))
    }

    #[tokio::test]
    async fn login_posts_credentials_and_builds_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .and(body_json(json!({"username": "ada", "password": "pw"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "a1",
                "refresh_token": "r1",
                "expires_in": 3600,
                "user_id": "user-42"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = api(&server).await.login(&Credentials::new("ada", "pw")).await.unwrap();

        assert_eq!(session.access_token, "a1");
        assert_eq!(session.refresh_token, "r1");
        assert_eq!(session.user_id, "user-42");
        assert_eq!(session.expires_at_epoch_millis, NOW as i64 + 3_600_000);
    }

    #[tokio::test]
    async fn bad_credentials_surface_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "bad password"})))
            .mount(&server)
            .await;

        let err = api(&server).await.login(&Credentials::new("ada", "nope")).await.unwrap_err();

        assert_eq!(err, SessionError::Api { status: 401, message: "bad password".into() });
    }

    #[tokio::test]
    async fn refresh_keeps_old_refresh_token_when_omitted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(json!({"refresh_token": "r1"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "a2", "expires_in": 60})),
            )
            .mount(&server)
            .await;

        let session = api(&server).await.refresh("r1").await.unwrap();

        assert_eq!(session.access_token, "a2");
        assert_eq!(session.refresh_token, "r1");
        assert_eq!(session.user_id, "");
    }

    #[tokio::test]
    async fn rejected_refresh_is_terminal() {
        for status in [400, 401, 403] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/auth/refresh"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let err = api(&server).await.refresh("r1").await.unwrap_err();

            assert_eq!(err, SessionError::AuthExpired, "status {status}");
        }
    }

    #[tokio::test]
    async fn server_error_on_refresh_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = api(&server).await.refresh("r1").await.unwrap_err();

        assert_eq!(err, SessionError::Api { status: 502, message: "HTTP 502".into() });
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn malformed_token_response_is_a_serialization_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = api(&server).await.login(&Credentials::new("ada", "pw")).await.unwrap_err();

        assert!(matches!(err, SessionError::Serialization(_)));
    }
}
