use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tether_domain::constants::CHANNEL_ERROR_TOPIC;
use tether_domain::{
    ChannelMessage, ClientConfig, ConnectionState, Frame, Result, SessionError, Subscription,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::ports::{SocketConnection, SocketEvent, SocketTransport};
use crate::auth::TokenManager;

/// Callback invoked for every message on a subscribed topic
///
/// Errors and panics are logged and do not affect other listeners.
pub type Listener = Arc<dyn Fn(&ChannelMessage) -> anyhow::Result<()> + Send + Sync>;

struct ListenerEntry {
    id: Uuid,
    listener: Listener,
}

/// Topic registry plus the sender of the live connection
///
/// Both sit under one lock so a subscribe racing a (re)connect is either
/// flushed by the connect or sent by the subscribe, never lost.
#[derive(Default)]
struct Registry {
    topics: HashMap<String, Vec<ListenerEntry>>,
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

/// Why a live connection ended
enum Disconnect {
    Shutdown,
    Closed { code: u16, reason: String },
    Failed(String),
    Ended,
}

struct ChannelInner {
    url: String,
    config: ClientConfig,
    transport: Arc<dyn SocketTransport>,
    tokens: Arc<TokenManager>,
    registry: Mutex<Registry>,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
    started: AtomicBool,
}

/// Persistent duplex connection with reconnect and topic subscriptions
pub struct RealtimeChannel {
    inner: Arc<ChannelInner>,
}

impl RealtimeChannel {
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn SocketTransport>,
        tokens: Arc<TokenManager>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(ChannelInner {
                url: config.realtime_endpoint(),
                config,
                transport,
                tokens,
                registry: Mutex::new(Registry::default()),
                state,
                shutdown: CancellationToken::new(),
                started: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Receiver notified on every state transition
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Open the connection and keep it open
    ///
    /// Resolves once the first handshake succeeds or fails. After a failed
    /// first handshake the channel keeps reconnecting in the background,
    /// unless the failure requires signing in again.
    ///
    /// # Errors
    /// - `ChannelClosed` if the channel was disconnected
    /// - the handshake error of the first attempt
    pub async fn connect(&self) -> Result<()> {
        if self.state().is_terminal() {
            return Err(SessionError::ChannelClosed);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            debug!("realtime channel already started");
            return Ok(());
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(Arc::clone(&self.inner).supervise(ready_tx));
        ready_rx.await.unwrap_or(Err(SessionError::ChannelClosed))
    }

    /// Register `listener` on `topic`
    ///
    /// The first listener of a topic sends a subscribe frame right away when
    /// connected; otherwise the subscription is sent on the next connect.
    pub fn subscribe<F>(&self, topic: impl Into<String>, listener: F) -> SubscriptionHandle
    where
        F: Fn(&ChannelMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_listener(topic, Arc::new(listener))
    }

    pub fn subscribe_listener(&self, topic: impl Into<String>, listener: Listener) -> SubscriptionHandle {
        let subscription = Subscription::new(topic);
        let mut registry = self.inner.registry.lock();
        let listeners = registry.topics.entry(subscription.topic.clone()).or_default();
        let first = listeners.is_empty();
        listeners.push(ListenerEntry { id: subscription.listener_id, listener });

        if first && is_server_topic(&subscription.topic) {
            match &registry.outbound {
                Some(outbound) => {
                    send_frame(outbound, &Frame::Subscribe { topic: subscription.topic.clone() })
                }
                None => debug!(topic = %subscription.topic, "subscription queued until connected"),
            }
        }
        drop(registry);

        SubscriptionHandle { channel: Arc::downgrade(&self.inner), subscription }
    }

    /// Publish an application message
    ///
    /// # Errors
    /// `NotConnected` unless the channel is connected; messages are never queued
    pub fn send(&self, message: ChannelMessage) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }
        let bytes = Frame::from(message).encode()?;
        let registry = self.inner.registry.lock();
        let outbound = registry.outbound.as_ref().ok_or(SessionError::NotConnected)?;
        outbound.send(bytes).map_err(|_| SessionError::NotConnected)
    }

    /// Close the channel for good and drop every subscription
    pub fn disconnect(&self) {
        info!("disconnecting realtime channel");
        self.inner.shut_down();
    }

    /// Topics with at least one listener
    pub fn topics(&self) -> Vec<String> {
        self.inner.registry.lock().topics.keys().cloned().collect()
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        self.inner.registry.lock().topics.get(topic).map_or(0, Vec::len)
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.inner.shut_down();
    }
}

/// Handle returned by [`RealtimeChannel::subscribe`]
///
/// Dropping the handle keeps the subscription; call
/// [`SubscriptionHandle::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct SubscriptionHandle {
    channel: Weak<ChannelInner>,
    subscription: Subscription,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.subscription.topic
    }

    pub fn listener_id(&self) -> Uuid {
        self.subscription.listener_id
    }

    /// Remove the listener; the last one on a topic sends an unsubscribe frame
    pub fn unsubscribe(self) {
        if let Some(inner) = self.channel.upgrade() {
            inner.remove_listener(&self.subscription);
        }
    }
}

impl ChannelInner {
    async fn supervise(self: Arc<Self>, ready: oneshot::Sender<Result<()>>) {
        let mut ready = Some(ready);
        let mut backoff = self.config.reconnect_backoff().schedule();
        let mut reconnects: u32 = 0;
        let mut refresh_first = false;

        while !self.shutdown.is_cancelled() {
            self.set_state(ConnectionState::Connecting);

            match self.open(refresh_first).await {
                Ok(SocketConnection { outbound, mut events }) => {
                    refresh_first = false;
                    reconnects = 0;
                    backoff.reset();
                    self.on_open(outbound);
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Ok(()));
                    }

                    match self.pump(&mut events).await {
                        Disconnect::Shutdown => break,
                        Disconnect::Closed { code, reason } => {
                            self.on_lost();
                            if code == self.config.auth_rejected_close_code {
                                warn!(code, %reason, "socket closed, token rejected");
                                refresh_first = true;
                            } else {
                                warn!(code, %reason, "socket closed");
                            }
                        }
                        Disconnect::Failed(message) => {
                            self.on_lost();
                            warn!(error = %message, "socket failed");
                        }
                        Disconnect::Ended => {
                            self.on_lost();
                            warn!("socket ended without close frame");
                        }
                    }
                }
                Err(err) => {
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Err(err.clone()));
                    }
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    if err.requires_sign_in() {
                        error!(error = %err, "realtime authentication failed, closing channel");
                        self.close_with_error(&err);
                        break;
                    }
                    if matches!(err, SessionError::Api { status: 401 | 403, .. }) {
                        refresh_first = true;
                    }
                    warn!(error = %err, "realtime connect failed");
                }
            }

            if self.shutdown.is_cancelled() {
                break;
            }
            if let Some(max) = self.config.max_reconnect_attempts {
                if reconnects >= max {
                    error!(attempts = reconnects, "realtime reconnect attempts exhausted");
                    self.close_with_error(&SessionError::ReconnectExhausted { attempts: reconnects });
                    break;
                }
            }

            reconnects += 1;
            self.set_state(ConnectionState::Reconnecting);
            let delay = backoff.next_delay();
            info!(attempt = reconnects, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!("realtime supervisor stopped");
    }

    async fn open(&self, refresh_first: bool) -> Result<SocketConnection> {
        let token = if refresh_first {
            info!("refreshing token before reconnect");
            self.tokens.refresh().await?.access_token
        } else {
            self.tokens.valid_token().await?
        };

        let mut headers = BTreeMap::new();
        headers.insert("authorization".to_string(), format!("Bearer {token}"));

        let timeout = self.config.request_timeout;
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(SessionError::ChannelClosed),
            opened = tokio::time::timeout(timeout, self.transport.open(&self.url, &headers)) => {
                opened.map_err(|_| SessionError::Timeout(timeout))?
            }
        }
    }

    fn on_open(&self, outbound: mpsc::UnboundedSender<Vec<u8>>) {
        let mut registry = self.registry.lock();
        if self.shutdown.is_cancelled() {
            return;
        }
        for topic in registry.topics.keys().filter(|topic| is_server_topic(topic)) {
            send_frame(&outbound, &Frame::Subscribe { topic: topic.clone() });
        }
        let topics = registry.topics.len();
        registry.outbound = Some(outbound);
        self.set_state(ConnectionState::Connected);
        info!(topics, "realtime connected");
    }

    fn on_lost(&self) {
        self.registry.lock().outbound = None;
    }

    async fn pump(&self, events: &mut mpsc::UnboundedReceiver<SocketEvent>) -> Disconnect {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Disconnect::Shutdown,
                event = events.recv() => match event {
                    Some(SocketEvent::Message(bytes)) => self.handle_frame(&bytes),
                    Some(SocketEvent::Closed { code, reason }) => return Disconnect::Closed { code, reason },
                    Some(SocketEvent::Error(message)) => return Disconnect::Failed(message),
                    None => return Disconnect::Ended,
                },
            }
        }
    }

    fn handle_frame(&self, bytes: &[u8]) {
        match Frame::decode(bytes) {
            Ok(Frame::Message { topic, payload }) => {
                self.dispatch(&ChannelMessage { topic, payload });
            }
            Ok(other) => debug!(topic = other.topic(), "ignoring control frame from server"),
            Err(err) => warn!(error = %err, "dropping undecodable frame"),
        }
    }

    /// Deliver to the topic's listeners in registration order
    fn dispatch(&self, message: &ChannelMessage) {
        let listeners: Vec<Listener> = {
            let registry = self.registry.lock();
            registry
                .topics
                .get(&message.topic)
                .map(|entries| entries.iter().map(|e| Arc::clone(&e.listener)).collect())
                .unwrap_or_default()
        };
        if listeners.is_empty() {
            trace!(topic = %message.topic, "no listeners for message");
        }
        for listener in &listeners {
            deliver(listener, message);
        }
    }

    /// Notify every listener through the error topic, then close
    fn close_with_error(&self, err: &SessionError) {
        let message = ChannelMessage::channel_error(err);
        let listeners: Vec<Listener> = {
            let registry = self.registry.lock();
            registry.topics.values().flatten().map(|e| Arc::clone(&e.listener)).collect()
        };
        for listener in &listeners {
            deliver(listener, &message);
        }
        self.shut_down();
    }

    fn shut_down(&self) {
        self.shutdown.cancel();
        {
            let mut registry = self.registry.lock();
            registry.outbound = None;
            registry.topics.clear();
        }
        self.set_state(ConnectionState::Closed);
    }

    fn remove_listener(&self, subscription: &Subscription) {
        let mut registry = self.registry.lock();
        let Some(listeners) = registry.topics.get_mut(&subscription.topic) else {
            return;
        };
        listeners.retain(|entry| entry.id != subscription.listener_id);
        if !listeners.is_empty() {
            return;
        }

        registry.topics.remove(&subscription.topic);
        match &registry.outbound {
            Some(outbound) if is_server_topic(&subscription.topic) => {
                send_frame(outbound, &Frame::Unsubscribe { topic: subscription.topic.clone() })
            }
            _ => {}
        }
        debug!(topic = %subscription.topic, "last listener removed");
    }

    /// Apply a transition; `Closed` is never left
    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            debug!(state = %next, "realtime state changed");
        }
    }
}

/// The local error topic is never subscribed on the server
fn is_server_topic(topic: &str) -> bool {
    topic != CHANNEL_ERROR_TOPIC
}

fn deliver(listener: &Listener, message: &ChannelMessage) {
    match catch_unwind(AssertUnwindSafe(|| (listener.as_ref())(message))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(topic = %message.topic, error = %err, "listener failed"),
        Err(_) => warn!(topic = %message.topic, "listener panicked"),
    }
}

fn send_frame(outbound: &mpsc::UnboundedSender<Vec<u8>>, frame: &Frame) {
    match frame.encode() {
        Ok(bytes) => {
            if outbound.send(bytes).is_err() {
                debug!(topic = frame.topic(), "connection gone before frame was sent");
            }
        }
        Err(err) => warn!(error = %err, "failed to encode frame"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use serde_json::json;
    use tether_common::MockClock;
    use tether_domain::constants::SESSION_CREDENTIAL_KEY;

    use super::*;
    use crate::testing::{session_expiring_at, MemoryStore, ScriptedAuthApi, ScriptedSocket};

    const NOW: u64 = 1_700_000_000_000;

    struct Fixture {
        socket: Arc<ScriptedSocket>,
        auth: Arc<ScriptedAuthApi>,
        channel: RealtimeChannel,
    }

    async fn fixture(max_reconnect_attempts: Option<u32>) -> Fixture {
        let clock = MockClock::at_epoch_millis(NOW);
        let mut config = ClientConfig::new("https://api.example.com");
        config.max_reconnect_attempts = max_reconnect_attempts;
        let store = Arc::new(MemoryStore::default());
        let session = session_expiring_at("access-0", NOW as i64 + 3_600_000);
        store.insert(SESSION_CREDENTIAL_KEY, &serde_json::to_string(&session).unwrap());
        let auth = Arc::new(ScriptedAuthApi::new(clock.clone()));
        let tokens =
            Arc::new(TokenManager::with_clock(&config, store, auth.clone(), Arc::new(clock)));
        tokens.initialize().await.unwrap();
        let socket = Arc::new(ScriptedSocket::new());
        let channel = RealtimeChannel::new(config, socket.clone(), tokens);
        Fixture { socket, auth, channel }
    }

    fn recorder() -> (Arc<Mutex<Vec<ChannelMessage>>>, impl Fn(&ChannelMessage) -> anyhow::Result<()>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |message: &ChannelMessage| {
            sink.lock().push(message.clone());
            Ok(())
        })
    }

    async fn wait_for_state(channel: &RealtimeChannel, wanted: ConnectionState) {
        let mut states = channel.state_changes();
        states.wait_for(|state| *state == wanted).await.expect("state channel open");
    }

    #[tokio::test]
    async fn connect_sends_bearer_token_in_handshake() {
        let fx = fixture(None).await;

        fx.channel.connect().await.expect("connect");

        assert_eq!(fx.channel.state(), ConnectionState::Connected);
        let headers = fx.socket.handshake_headers();
        assert_eq!(headers[0].get("authorization").map(String::as_str), Some("Bearer access-0"));
        assert_eq!(fx.socket.urls()[0], "wss://api.example.com/realtime");
    }

    #[tokio::test]
    async fn subscription_before_connect_is_flushed_on_open() {
        let fx = fixture(None).await;
        let (_, listener) = recorder();
        fx.channel.subscribe("posts", listener);

        fx.channel.connect().await.unwrap();
        let mut server = fx.socket.accept().await;

        assert_eq!(server.next_frame().await, Frame::Subscribe { topic: "posts".into() });
    }

    #[tokio::test]
    async fn only_first_listener_sends_subscribe_and_last_sends_unsubscribe() {
        let fx = fixture(None).await;
        fx.channel.connect().await.unwrap();
        let mut server = fx.socket.accept().await;

        let first = fx.channel.subscribe("chat", |_: &ChannelMessage| Ok(()));
        let second = fx.channel.subscribe("chat", |_: &ChannelMessage| Ok(()));
        assert_eq!(server.next_frame().await, Frame::Subscribe { topic: "chat".into() });

        first.unsubscribe();
        assert_eq!(fx.channel.listener_count("chat"), 1);
        second.unsubscribe();

        assert_eq!(server.next_frame().await, Frame::Unsubscribe { topic: "chat".into() });
        assert!(fx.channel.topics().is_empty());
    }

    #[tokio::test]
    async fn send_requires_connection() {
        let fx = fixture(None).await;
        let message = ChannelMessage::new("chat", json!({"text": "hi"}));

        assert_eq!(fx.channel.send(message.clone()), Err(SessionError::NotConnected));

        fx.channel.connect().await.unwrap();
        let mut server = fx.socket.accept().await;
        fx.channel.send(message).unwrap();

        assert_eq!(
            server.next_frame().await,
            Frame::Publish { topic: "chat".into(), payload: json!({"text": "hi"}) }
        );
    }

    #[tokio::test]
    async fn failing_listener_does_not_block_others() {
        let fx = fixture(None).await;
        let (seen, listener) = recorder();
        let panics = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&panics);
        fx.channel.subscribe("posts", |_: &ChannelMessage| Err(anyhow::anyhow!("bad listener")));
        fx.channel.subscribe("posts", move |_: &ChannelMessage| {
            counter.fetch_add(1, Ordering::SeqCst);
            panic!("listener exploded");
        });
        fx.channel.subscribe("posts", listener);
        fx.channel.connect().await.unwrap();
        let server = fx.socket.accept().await;

        server.publish("posts", json!(1));
        server.publish("posts", json!(2));
        server.publish("other", json!(3));

        tokio::time::timeout(Duration::from_secs(1), async {
            while seen.lock().len() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("messages delivered");
        let payloads: Vec<_> = seen.lock().iter().map(|m| m.payload.clone()).collect();
        assert_eq!(payloads, vec![json!(1), json!(2)]);
        assert_eq!(panics.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn subscriptions_survive_reconnect() {
        let fx = fixture(None).await;
        let (seen, listener) = recorder();
        fx.channel.subscribe("posts", listener);
        fx.channel.connect().await.unwrap();
        let first = fx.socket.accept().await;

        first.close(1006, "abnormal");
        let mut second = fx.socket.accept().await;
        assert_eq!(second.next_frame().await, Frame::Subscribe { topic: "posts".into() });
        wait_for_state(&fx.channel, ConnectionState::Connected).await;

        second.publish("posts", json!("after reconnect"));
        tokio::time::timeout(Duration::from_secs(1), async {
            while seen.lock().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("message delivered");
        assert_eq!(seen.lock()[0].payload, json!("after reconnect"));
        assert_eq!(fx.socket.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_rejected_close_refreshes_before_reconnect() {
        let fx = fixture(None).await;
        fx.channel.connect().await.unwrap();
        let first = fx.socket.accept().await;

        first.close(4001, "token expired");
        let _second = fx.socket.accept().await;

        assert_eq!(fx.auth.refresh_calls.load(Ordering::SeqCst), 1);
        let headers = fx.socket.handshake_headers();
        assert_eq!(headers[1].get("authorization").map(String::as_str), Some("Bearer access-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_reconnects_close_and_notify_listeners() {
        let fx = fixture(Some(2)).await;
        fx.socket.fail_always(SessionError::Network("unreachable".into()));
        let (posts_seen, posts_listener) = recorder();
        let (errors_seen, errors_listener) = recorder();
        fx.channel.subscribe("posts", posts_listener);
        fx.channel.subscribe(CHANNEL_ERROR_TOPIC, errors_listener);

        let err = fx.channel.connect().await.unwrap_err();
        assert_eq!(err, SessionError::Network("unreachable".into()));
        wait_for_state(&fx.channel, ConnectionState::Closed).await;

        assert_eq!(fx.socket.opens(), 3);
        let expected = Some(SessionError::ReconnectExhausted { attempts: 2 });
        assert_eq!(posts_seen.lock()[0].as_error(), expected);
        assert_eq!(errors_seen.lock()[0].as_error(), expected);
    }

    #[tokio::test]
    async fn disconnect_is_terminal() {
        let fx = fixture(None).await;
        fx.channel.connect().await.unwrap();

        fx.channel.disconnect();

        assert_eq!(fx.channel.state(), ConnectionState::Closed);
        assert_eq!(fx.channel.connect().await, Err(SessionError::ChannelClosed));
        assert_eq!(
            fx.channel.send(ChannelMessage::new("chat", json!(null))),
            Err(SessionError::NotConnected)
        );
    }
}
