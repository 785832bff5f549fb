use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tether_common::{Clock, FlightError, SingleFlight, SystemClock};
use tether_domain::constants::REQUEST_ID_HEADER;
use tether_domain::{
    ApiResponse, ClientConfig, HttpMethod, PendingRequest, RequestSpec, ResponseSource, Result,
    SessionError,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::ports::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::auth::TokenManager;
use crate::cache::ResponseCache;

struct PipelineInner {
    config: ClientConfig,
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<TokenManager>,
    cache: Arc<ResponseCache>,
    clock: Arc<dyn Clock>,
    flights: SingleFlight<String, Result<ApiResponse>>,
}

/// Executes [`RequestSpec`]s against the API
#[derive(Clone)]
pub struct RequestPipeline {
    inner: Arc<PipelineInner>,
}

/// Outcome of one attempt that did not end the request
enum AttemptFailure {
    /// The server rejected this access token
    Unauthorized(String),
    Transient(String),
}

impl RequestPipeline {
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
        tokens: Arc<TokenManager>,
        cache: Arc<ResponseCache>,
    ) -> Self {
        Self::with_clock(config, transport, tokens, cache, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
        tokens: Arc<TokenManager>,
        cache: Arc<ResponseCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                config,
                transport,
                tokens,
                cache,
                clock,
                flights: SingleFlight::new(),
            }),
        }
    }

    /// Execute a request
    ///
    /// Dropping the returned future detaches this caller only; a GET shared
    /// with other callers keeps running for them.
    ///
    /// # Errors
    /// - `Unauthenticated` / `AuthExpired` when no usable session exists
    /// - `Api` for non-retryable error statuses
    /// - `ServiceUnavailable` when retries are exhausted without a cached
    ///   fallback; a refresh failing with a network error or timeout counts as
    ///   a failed attempt
    pub async fn execute(&self, spec: RequestSpec) -> Result<ApiResponse> {
        if spec.is_cacheable() {
            if let Some(entry) = self.inner.cache.get(&spec.cache_key()) {
                debug!(path = %spec.path, "serving fresh cache entry");
                return Ok(ApiResponse::from_cache(&entry, ResponseSource::Cache));
            }
        }

        if spec.method != HttpMethod::Get {
            return self.inner.run(spec).await;
        }

        let inner = Arc::clone(&self.inner);
        let key = spec.flight_key();
        self.inner
            .flights
            .run(key, move || async move { inner.run_shared(spec).await })
            .await
            .map_err(|err| match err {
                FlightError::Cancelled => SessionError::Cancelled,
                FlightError::Panicked(message) => SessionError::Internal(message),
            })?
    }

    /// Execute a request that can be cancelled through `cancel`
    pub async fn execute_cancellable(
        &self,
        spec: RequestSpec,
        cancel: CancellationToken,
    ) -> Result<ApiResponse> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("request cancelled by caller");
                Err(SessionError::Cancelled)
            }
            result = self.execute(spec) => result,
        }
    }

    /// Number of GETs currently shared between callers
    pub fn in_flight(&self) -> usize {
        self.inner.flights.len()
    }
}

impl PipelineInner {
    /// Body of a shared GET
    ///
    /// A previous flight for the same key may have filled the cache between
    /// the caller's cache check and this flight starting.
    async fn run_shared(&self, spec: RequestSpec) -> Result<ApiResponse> {
        if spec.is_cacheable() {
            if let Some(entry) = self.cache.get(&spec.cache_key()) {
                debug!(path = %spec.path, "cache filled by an earlier flight");
                return Ok(ApiResponse::from_cache(&entry, ResponseSource::Cache));
            }
        }
        self.run(spec).await
    }

    async fn run(&self, spec: RequestSpec) -> Result<ApiResponse> {
        let pending = PendingRequest::new(self.clock.millis_since_epoch());
        let span = info_span!(
            "request",
            request_id = %pending.id,
            method = %spec.method,
            path = %spec.path,
        );
        self.run_attempts(spec, pending).instrument(span).await
    }

    async fn run_attempts(&self, spec: RequestSpec, mut pending: PendingRequest) -> Result<ApiResponse> {
        let max_retries = spec.options.max_retries.unwrap_or(self.config.max_retries);
        let timeout = spec.options.timeout.unwrap_or(self.config.request_timeout);
        let body = spec.body.as_ref().map(serde_json::to_vec).transpose()?;
        let cache_generation = self.cache.generation();
        let mut backoff = self.config.request_backoff().schedule();
        let mut rejected: Option<String> = None;
        let mut replayed = false;

        loop {
            let attempt = pending.retry_count + 1;
            let failure = match self.authorize(rejected.as_deref()).await {
                Ok(token) => {
                    rejected = None;
                    match self.dispatch(&spec, body.clone(), &token, &pending, timeout).await {
                        Ok(response) if response.is_success() => {
                            return Ok(self.complete(&spec, &pending, cache_generation, response));
                        }
                        Ok(response) if response.status == 401 => AttemptFailure::Unauthorized(token),
                        Ok(response) if response.status >= 500 => {
                            AttemptFailure::Transient(format!("HTTP {}", response.status))
                        }
                        Ok(response) => {
                            let message = response.error_message();
                            warn!(status = response.status, %message, "request rejected");
                            return Err(SessionError::Api { status: response.status, message });
                        }
                        Err(err) => AttemptFailure::Transient(err.to_string()),
                    }
                }
                Err(err) if err.is_retryable() => {
                    warn!(error = %err, "could not obtain access token");
                    AttemptFailure::Transient(err.to_string())
                }
                Err(err) => return Err(err),
            };

            match failure {
                AttemptFailure::Unauthorized(_) if replayed => {
                    warn!("replayed request rejected again");
                    return Err(SessionError::AuthExpired);
                }
                AttemptFailure::Unauthorized(token) => {
                    info!("access token rejected, refreshing before replay");
                    replayed = true;
                    rejected = Some(token);
                }
                AttemptFailure::Transient(reason) => {
                    if pending.retry_count >= max_retries {
                        return self.exhausted(&spec, attempt, reason);
                    }
                    let delay = backoff.next_delay();
                    warn!(attempt, delay_ms = delay.as_millis() as u64, %reason, "request failed, retrying");
                    tokio::time::sleep(delay).await;
                    pending.retry_count += 1;
                }
            }
        }
    }

    /// Token for the next attempt; refreshes first when `rejected` was refused
    ///
    /// Sign-in errors end the request. Transient refresh failures count as a
    /// failed attempt.
    async fn authorize(&self, rejected: Option<&str>) -> Result<String> {
        match rejected {
            Some(token) => self.tokens.refresh_rejected(token).await,
            None => self.tokens.valid_token().await,
        }
    }

    async fn dispatch(
        &self,
        spec: &RequestSpec,
        body: Option<Vec<u8>>,
        token: &str,
        pending: &PendingRequest,
        timeout: Duration,
    ) -> std::result::Result<HttpResponse, TransportError> {
        let mut url = self.config.endpoint_url(&spec.path);
        if !spec.params.is_empty() {
            url.push('?');
            url.push_str(&spec.query_string());
        }

        let mut headers = BTreeMap::new();
        headers.insert("authorization".to_string(), format!("Bearer {token}"));
        headers.insert(REQUEST_ID_HEADER.to_string(), pending.id.to_string());
        headers.insert("accept".to_string(), "application/json".to_string());
        if body.is_some() {
            headers.insert("content-type".to_string(), "application/json".to_string());
        }

        let request = HttpRequest { method: spec.method, url, headers, body, timeout };
        debug!(
            attempt = pending.retry_count + 1,
            timestamp = self.clock.millis_since_epoch(),
            "dispatching request"
        );

        match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    fn complete(
        &self,
        spec: &RequestSpec,
        pending: &PendingRequest,
        cache_generation: u64,
        response: HttpResponse,
    ) -> ApiResponse {
        let elapsed_ms = self.clock.millis_since_epoch() - pending.started_at_epoch_millis;
        info!(status = response.status, attempts = pending.retry_count + 1, elapsed_ms, "request completed");

        if spec.is_cacheable() {
            let ttl = spec.options.cache_ttl.unwrap_or(self.config.default_cache_ttl);
            self.cache.set_response_if_current(
                cache_generation,
                spec.cache_key(),
                response.status,
                response.content_type().map(str::to_string),
                response.body.clone(),
                ttl,
            );
        }
        if spec.method.is_write() {
            self.cache.invalidate_prefix(&spec.resource_root());
        }

        ApiResponse {
            status: response.status,
            headers: response.headers,
            body: response.body,
            source: ResponseSource::Network,
        }
    }

    fn exhausted(&self, spec: &RequestSpec, attempts: u32, reason: String) -> Result<ApiResponse> {
        if spec.is_cacheable() {
            if let Some(entry) = self.cache.get_stale(&spec.cache_key()) {
                warn!(attempts, %reason, "retries exhausted, serving stale cache entry");
                return Ok(ApiResponse::from_cache(&entry, ResponseSource::Stale));
            }
        }
        error!(attempts, %reason, "retries exhausted");
        Err(SessionError::ServiceUnavailable { attempts, reason })
    }
}
