//! In-memory fakes for the port traits
//!
//! Available to this crate's unit tests and, with the `test-utils` feature,
//! to downstream integration tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tether_common::{Clock, MockClock};
use tether_domain::{Credentials, Frame, Result, Session, SessionError};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::auth::ports::{AuthApi, CredentialStore};
use crate::pipeline::ports::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::realtime::ports::{SocketConnection, SocketEvent, SocketTransport};

const SESSION_LIFETIME_MS: i64 = 60 * 60 * 1000;

/// Session for user `ada` with the given access token and expiry
pub fn session_expiring_at(access_token: &str, expires_at_epoch_millis: i64) -> Session {
    Session {
        access_token: access_token.to_string(),
        refresh_token: format!("refresh-for-{access_token}"),
        expires_at_epoch_millis,
        user_id: "ada".to_string(),
    }
}

/// Credential store backed by a `HashMap`
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn insert(&self, key: &str, value: &str) {
        self.values.lock().insert(key.to_string(), value.to_string());
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.value(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.insert(key, value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.lock().remove(key);
        Ok(())
    }
}

/// Auth backend that issues `access-{n}` on the n-th refresh
///
/// Logging in as any user succeeds unless the password is `wrong`.
pub struct ScriptedAuthApi {
    clock: MockClock,
    pub login_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    refresh_delay: Mutex<Duration>,
    refresh_failure: Mutex<Option<SessionError>>,
}

impl ScriptedAuthApi {
    pub fn new(clock: MockClock) -> Self {
        Self {
            clock,
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            refresh_delay: Mutex::new(Duration::ZERO),
            refresh_failure: Mutex::new(None),
        }
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock() = delay;
    }

    /// Answer every later refresh with `AuthExpired`
    pub fn reject_refresh(&self) {
        self.fail_refresh_with(SessionError::AuthExpired);
    }

    pub fn fail_refresh_with(&self, err: SessionError) {
        *self.refresh_failure.lock() = Some(err);
    }

    fn expiry(&self) -> i64 {
        self.clock.millis_since_epoch() + SESSION_LIFETIME_MS
    }
}

#[async_trait]
impl AuthApi for ScriptedAuthApi {
    async fn login(&self, credentials: &Credentials) -> Result<Session> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if credentials.password == "wrong" {
            return Err(SessionError::Api { status: 401, message: "invalid credentials".into() });
        }
        let mut session = session_expiring_at(&format!("login-{}", credentials.username), self.expiry());
        session.user_id = credentials.username.clone();
        Ok(session)
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<Session> {
        let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.refresh_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.refresh_failure.lock().clone() {
            return Err(err);
        }
        Ok(session_expiring_at(&format!("access-{call}"), self.expiry()))
    }
}

type Responder = dyn Fn(&HttpRequest, usize) -> std::result::Result<HttpResponse, TransportError> + Send + Sync;

/// HTTP transport answering from a closure and recording every request
pub struct ScriptedHttp {
    responder: Box<Responder>,
    delay: Duration,
    calls: AtomicUsize,
    log: Mutex<Vec<(Instant, HttpRequest)>>,
}

impl ScriptedHttp {
    /// `responder` receives the request and its zero-based call index
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&HttpRequest, usize) -> std::result::Result<HttpResponse, TransportError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Answer every request with `status` and a JSON `body`
    pub fn always(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        Self::new(move |_, _| {
            Ok(HttpResponse::new(status, body.clone()).with_header("content-type", "application/json"))
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.log.lock().iter().map(|(_, request)| request.clone()).collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.log.lock().iter().map(|(at, _)| *at).collect()
    }
}

#[async_trait]
impl HttpTransport for ScriptedHttp {
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push((Instant::now(), request.clone()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.responder)(&request, call)
    }
}

/// Server end of one accepted [`ScriptedSocket`] connection
pub struct ServerSide {
    events: mpsc::UnboundedSender<SocketEvent>,
    frames: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl ServerSide {
    /// Push a `message` frame to the client
    pub fn publish(&self, topic: &str, payload: serde_json::Value) {
        let frame = Frame::Message { topic: topic.to_string(), payload };
        let bytes = frame.encode().expect("encodable frame");
        let _ = self.events.send(SocketEvent::Message(bytes));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.events.send(SocketEvent::Closed { code, reason: reason.to_string() });
    }

    pub fn fail(&self, message: &str) {
        let _ = self.events.send(SocketEvent::Error(message.to_string()));
    }

    /// Next frame written by the client
    pub async fn next_frame(&mut self) -> Frame {
        let bytes = self.frames.recv().await.expect("client closed the connection");
        Frame::decode(&bytes).expect("client sent a valid frame")
    }

    /// Frames already written by the client, without waiting
    pub fn pending_frames(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(bytes) = self.frames.try_recv() {
            frames.push(Frame::decode(&bytes).expect("client sent a valid frame"));
        }
        frames
    }
}

/// Socket transport handing each accepted connection to the test
pub struct ScriptedSocket {
    opens: AtomicUsize,
    handshakes: Mutex<Vec<(String, BTreeMap<String, String>)>>,
    queued_failures: Mutex<VecDeque<SessionError>>,
    permanent_failure: Mutex<Option<SessionError>>,
    accepted_tx: mpsc::UnboundedSender<ServerSide>,
    accepted_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ServerSide>>,
}

impl Default for ScriptedSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSocket {
    pub fn new() -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            opens: AtomicUsize::new(0),
            handshakes: Mutex::new(Vec::new()),
            queued_failures: Mutex::new(VecDeque::new()),
            permanent_failure: Mutex::new(None),
            accepted_tx,
            accepted_rx: tokio::sync::Mutex::new(accepted_rx),
        }
    }

    /// Fail the next handshake with `err`
    pub fn fail_next(&self, err: SessionError) {
        self.queued_failures.lock().push_back(err);
    }

    /// Fail every handshake with `err`
    pub fn fail_always(&self, err: SessionError) {
        *self.permanent_failure.lock() = Some(err);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.handshakes.lock().iter().map(|(url, _)| url.clone()).collect()
    }

    pub fn handshake_headers(&self) -> Vec<BTreeMap<String, String>> {
        self.handshakes.lock().iter().map(|(_, headers)| headers.clone()).collect()
    }

    /// Wait for the next successful handshake
    pub async fn accept(&self) -> ServerSide {
        self.accepted_rx.lock().await.recv().await.expect("socket transport alive")
    }
}

#[async_trait]
impl SocketTransport for ScriptedSocket {
    async fn open(&self, url: &str, headers: &BTreeMap<String, String>) -> Result<SocketConnection> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.handshakes.lock().push((url.to_string(), headers.clone()));

        if let Some(err) = self.queued_failures.lock().pop_front() {
            return Err(err);
        }
        if let Some(err) = self.permanent_failure.lock().clone() {
            return Err(err);
        }

        let (outbound, frames) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let _ = self.accepted_tx.send(ServerSide { events: events_tx, frames });
        Ok(SocketConnection { outbound, events })
    }
}
