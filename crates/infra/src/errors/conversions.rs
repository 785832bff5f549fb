use keyring::Error as KeyringError;
use reqwest::Error as HttpError;
use tether_domain::SessionError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub SessionError);

impl From<InfraError> for SessionError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<SessionError> for InfraError {
    fn from(value: SessionError) -> Self {
        InfraError(value)
    }
}

trait IntoSessionError {
    fn into_session_error(self) -> SessionError;
}

/* -------------------------------------------------------------------------- */
/* keyring::Error → SessionError */
/* -------------------------------------------------------------------------- */

impl IntoSessionError for KeyringError {
    fn into_session_error(self) -> SessionError {
        use KeyringError::*;

        let description = self.to_string();

        match self {
            NoEntry => SessionError::Storage("keychain entry not found".into()),
            BadEncoding(_) => SessionError::Storage("credential in keychain is not valid UTF-8".into()),
            TooLong(name, limit) => SessionError::Storage(format!(
                "keychain attribute '{name}' exceeds platform limit ({limit})"
            )),
            Invalid(attr, reason) => {
                SessionError::Storage(format!("keychain attribute '{attr}' is invalid: {reason}"))
            }
            Ambiguous(entries) => SessionError::Storage(format!(
                "multiple keychain entries matched request ({} results)",
                entries.len()
            )),
            PlatformFailure(err) => SessionError::Storage(format!("keychain platform error: {err}")),
            NoStorageAccess(err) => {
                SessionError::Storage(format!("unable to access secure storage: {err}"))
            }
            _ => SessionError::Storage(description),
        }
    }
}

impl From<KeyringError> for InfraError {
    fn from(value: KeyringError) -> Self {
        InfraError(value.into_session_error())
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → SessionError */
/* -------------------------------------------------------------------------- */

impl IntoSessionError for HttpError {
    fn into_session_error(self) -> SessionError {
        if self.is_timeout() {
            return SessionError::Network("HTTP request timed out".into());
        }

        if self.is_connect() {
            return SessionError::Network("HTTP connection failure".into());
        }

        if self.is_builder() {
            return SessionError::Config(format!("invalid HTTP request: {self}"));
        }

        if self.is_decode() {
            return SessionError::Serialization(format!("invalid response body: {self}"));
        }

        if let Some(status) = self.status() {
            let code = status.as_u16();
            let message =
                format!("HTTP {} {}", code, status.canonical_reason().unwrap_or("unknown status"));
            return SessionError::Api { status: code, message };
        }

        SessionError::Network(self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(value.into_session_error())
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn keyring_errors_map_to_storage() {
        let err: SessionError = InfraError::from(KeyringError::NoEntry).into();
        assert_eq!(err, SessionError::Storage("keychain entry not found".into()));

        let err: SessionError = InfraError::from(KeyringError::TooLong("service".into(), 64)).into();
        assert!(matches!(err, SessionError::Storage(message) if message.contains("service")));

        let err: SessionError = InfraError::from(KeyringError::BadEncoding(vec![0xff])).into();
        assert!(matches!(err, SessionError::Storage(_)));
    }

    #[tokio::test]
    async fn connection_refused_maps_to_network() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = reqwest::Client::new()
            .get(format!("http://{addr}"))
            .send()
            .await
            .expect_err("port was released");

        let err: SessionError = InfraError::from(err).into();

        assert!(matches!(err, SessionError::Network(_)));
    }

    #[tokio::test]
    async fn error_status_maps_to_api() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(404)).mount(&server).await;

        let err = reqwest::get(server.uri())
            .await
            .expect("response")
            .error_for_status()
            .expect_err("404 is an error status");

        let err: SessionError = InfraError::from(err).into();

        assert_eq!(err, SessionError::Api { status: 404, message: "HTTP 404 Not Found".into() });
    }
}
