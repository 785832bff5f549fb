use std::sync::Arc;

use parking_lot::Mutex;
use tether_common::{Clock, SystemClock};
use tether_domain::{
    ApiResponse, AuthState, ChannelMessage, ClientConfig, ConnectionState, Credentials,
    RequestSpec, Result, Session, SessionError,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::ports::{AuthApi, CredentialStore};
use crate::auth::TokenManager;
use crate::cache::ResponseCache;
use crate::pipeline::ports::HttpTransport;
use crate::pipeline::RequestPipeline;
use crate::realtime::ports::SocketTransport;
use crate::realtime::{RealtimeChannel, SubscriptionHandle};

/// Adapters the facade is assembled from
pub struct SessionPorts {
    pub store: Arc<dyn CredentialStore>,
    pub auth_api: Arc<dyn AuthApi>,
    pub http: Arc<dyn HttpTransport>,
    pub socket: Arc<dyn SocketTransport>,
    pub clock: Arc<dyn Clock>,
}

impl SessionPorts {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        auth_api: Arc<dyn AuthApi>,
        http: Arc<dyn HttpTransport>,
        socket: Arc<dyn SocketTransport>,
    ) -> Self {
        Self { store, auth_api, http, socket, clock: Arc::new(SystemClock) }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Entry point for application code
///
/// Owns one token manager, cache, pipeline and realtime channel. Logging out
/// tears the channel down; the next login creates a fresh one.
pub struct SessionFacade {
    config: ClientConfig,
    socket: Arc<dyn SocketTransport>,
    tokens: Arc<TokenManager>,
    cache: Arc<ResponseCache>,
    pipeline: RequestPipeline,
    channel: Mutex<Arc<RealtimeChannel>>,
    auth_state: watch::Sender<AuthState>,
    background: CancellationToken,
}

impl SessionFacade {
    /// Assemble a facade from validated configuration
    ///
    /// With `cache_sweep_interval` set, a sweeper task is spawned, which
    /// requires a running tokio runtime.
    ///
    /// # Errors
    /// `Config` if the configuration is invalid or no runtime is available
    /// for the sweeper
    pub fn new(config: ClientConfig, ports: SessionPorts) -> Result<Self> {
        config.validate()?;
        let SessionPorts { store, auth_api, http, socket, clock } = ports;

        let tokens = Arc::new(TokenManager::with_clock(&config, store, auth_api, Arc::clone(&clock)));
        let cache = Arc::new(ResponseCache::with_clock(&config, Arc::clone(&clock)));
        let pipeline = RequestPipeline::with_clock(
            config.clone(),
            http,
            Arc::clone(&tokens),
            Arc::clone(&cache),
            clock,
        );
        let channel = RealtimeChannel::new(config.clone(), Arc::clone(&socket), Arc::clone(&tokens));
        let (auth_state, _) = watch::channel(AuthState::SignedOut);
        let background = CancellationToken::new();

        if let Some(interval) = config.cache_sweep_interval {
            tokio::runtime::Handle::try_current().map_err(|_| {
                SessionError::Config("cache_sweep_interval requires a tokio runtime".into())
            })?;
            cache.spawn_sweeper(interval, background.child_token());
            debug!(interval_ms = interval.as_millis() as u64, "cache sweeper started");
        }

        Ok(Self {
            config,
            socket,
            tokens,
            cache,
            pipeline,
            channel: Mutex::new(Arc::new(channel)),
            auth_state,
            background,
        })
    }

    /// Restore the persisted session, if any
    pub async fn restore(&self) -> Result<AuthState> {
        let state = match self.tokens.initialize().await? {
            Some(session) => AuthState::SignedIn { user_id: session.user_id },
            None => AuthState::SignedOut,
        };
        self.set_auth_state(state.clone());
        Ok(state)
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<Session> {
        let session = self.tokens.login(credentials).await?;
        self.renew_channel();
        self.set_auth_state(AuthState::SignedIn { user_id: session.user_id.clone() });
        Ok(session)
    }

    /// Sign out: session, then cache, then realtime channel
    ///
    /// Cache and channel are torn down even if deleting the persisted
    /// session fails; that failure is returned afterwards.
    pub async fn logout(&self) -> Result<()> {
        let invalidated = self.tokens.invalidate().await;
        self.cache.clear();
        self.channel().disconnect();
        self.set_auth_state(AuthState::SignedOut);

        match &invalidated {
            Ok(()) => info!("logged out"),
            Err(err) => warn!(error = %err, "logged out, but the persisted session could not be removed"),
        }
        invalidated
    }

    pub async fn request(&self, spec: RequestSpec) -> Result<ApiResponse> {
        let result = self.pipeline.execute(spec).await;
        self.observe(result)
    }

    pub async fn request_cancellable(
        &self,
        spec: RequestSpec,
        cancel: CancellationToken,
    ) -> Result<ApiResponse> {
        let result = self.pipeline.execute_cancellable(spec, cancel).await;
        self.observe(result)
    }

    /// Subscribe on the current realtime channel
    pub fn subscribe<F>(&self, topic: impl Into<String>, listener: F) -> SubscriptionHandle
    where
        F: Fn(&ChannelMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.channel().subscribe(topic, listener)
    }

    pub async fn connect_realtime(&self) -> Result<()> {
        let channel = self.channel();
        let result = channel.connect().await;
        self.observe(result)
    }

    pub fn send(&self, message: ChannelMessage) -> Result<()> {
        self.channel().send(message)
    }

    /// Receiver of sign-in state changes
    pub fn auth_state(&self) -> watch::Receiver<AuthState> {
        self.auth_state.subscribe()
    }

    pub fn current_auth_state(&self) -> AuthState {
        self.auth_state.borrow().clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.channel().state()
    }

    /// Current realtime channel; replaced by the first login after a logout
    pub fn channel(&self) -> Arc<RealtimeChannel> {
        Arc::clone(&self.channel.lock())
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn renew_channel(&self) {
        let mut channel = self.channel.lock();
        if channel.state().is_terminal() {
            debug!("replacing closed realtime channel");
            *channel = Arc::new(RealtimeChannel::new(
                self.config.clone(),
                Arc::clone(&self.socket),
                Arc::clone(&self.tokens),
            ));
        }
    }

    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.requires_sign_in() {
                warn!(error = %err, "session requires sign-in");
                self.set_auth_state(AuthState::SignInRequired);
            }
        }
        result
    }

    fn set_auth_state(&self, next: AuthState) {
        self.auth_state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            info!(from = ?current, to = ?next, "auth state changed");
            *current = next;
            true
        });
    }
}

impl Drop for SessionFacade {
    fn drop(&mut self) {
        self.background.cancel();
    }
}
