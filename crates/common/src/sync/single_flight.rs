use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::task::JoinError;
use tracing::trace;

/// Failure of the shared task itself, as opposed to the operation's own result
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlightError {
    /// The operation panicked while running
    #[error("in-flight operation panicked: {0}")]
    Panicked(String),
    /// The runtime cancelled the task (e.g. on shutdown)
    #[error("in-flight operation was cancelled")]
    Cancelled,
}

impl From<JoinError> for FlightError {
    fn from(err: JoinError) -> Self {
        if err.is_cancelled() {
            return FlightError::Cancelled;
        }
        let message = match err.try_into_panic() {
            Ok(payload) => payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string()),
            Err(err) => err.to_string(),
        };
        FlightError::Panicked(message)
    }
}

type SharedFlight<V> = Shared<BoxFuture<'static, Result<V, FlightError>>>;
type Registry<K, V> = Arc<Mutex<HashMap<K, SharedFlight<V>>>>;

/// Registry of in-flight operations keyed by `K`
///
/// The first caller for a key spawns the operation on the tokio runtime;
/// callers arriving while it runs await the same result. The entry is removed
/// as soon as the operation finishes, so the next call starts a fresh one.
///
/// A caller that stops waiting does not cancel the operation for the others.
pub struct SingleFlight<K, V> {
    inflight: Registry<K, V>,
}

impl<K, V> Clone for SingleFlight<K, V> {
    fn clone(&self) -> Self {
        Self { inflight: Arc::clone(&self.inflight) }
    }
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self { inflight: Arc::new(Mutex::new(HashMap::new())) }
    }
}

impl<K, V> std::fmt::Debug for SingleFlight<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight").field("in_flight", &self.inflight.lock().len()).finish()
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `make()` for `key`, or join the execution already in flight
    ///
    /// `make` is only invoked when no operation for `key` is running.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> Result<V, FlightError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let flight = {
            let mut inflight = self.inflight.lock();
            match inflight.get(&key) {
                Some(existing) => {
                    trace!(in_flight = inflight.len(), "joining in-flight operation");
                    existing.clone()
                }
                None => {
                    let guard = Deregister {
                        registry: Arc::clone(&self.inflight),
                        key: Some(key.clone()),
                    };
                    let operation = make();
                    // The registry lock is still held, so the task cannot
                    // deregister before the entry below is inserted.
                    let handle = tokio::spawn(async move {
                        let _guard = guard;
                        operation.await
                    });
                    let flight: SharedFlight<V> =
                        handle.map(|joined| joined.map_err(FlightError::from)).boxed().shared();
                    inflight.insert(key, flight.clone());
                    trace!(in_flight = inflight.len(), "started in-flight operation");
                    flight
                }
            }
        };

        flight.await
    }

    /// Whether an operation for `key` is currently running
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.inflight.lock().contains_key(key)
    }

    /// Number of operations currently running
    pub fn len(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Whether no operation is running
    pub fn is_empty(&self) -> bool {
        self.inflight.lock().is_empty()
    }
}

/// Removes the registry entry when the spawned task ends, including on panic
struct Deregister<K: Eq + Hash, V> {
    registry: Registry<K, V>,
    key: Option<K>,
}

impl<K: Eq + Hash, V> Drop for Deregister<K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.registry.lock().remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_execution() {
        let flights: SingleFlight<String, u32> = SingleFlight::new();
        let executions = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let mut joins = Vec::new();
        for _ in 0..8 {
            let flights = flights.clone();
            let executions = Arc::clone(&executions);
            let release = Arc::clone(&release);
            joins.push(tokio::spawn(async move {
                flights
                    .run("GET /profile".to_string(), move || async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        7
                    })
                    .await
            }));
        }

        while !flights.is_in_flight(&"GET /profile".to_string()) {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        release.notify_one();

        for join in joins {
            assert_eq!(join.await.expect("join"), Ok(7));
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert!(flights.is_empty());
    }

    #[tokio::test]
    async fn completed_entries_are_removed() {
        let flights: SingleFlight<&'static str, usize> = SingleFlight::new();
        let executions = Arc::new(AtomicUsize::new(0));

        for expected in 1..=3 {
            let counter = Arc::clone(&executions);
            let value = flights
                .run("key", move || async move { counter.fetch_add(1, Ordering::SeqCst) + 1 })
                .await;
            assert_eq!(value, Ok(expected));
            assert!(!flights.is_in_flight(&"key"));
        }
    }

    #[tokio::test]
    async fn distinct_keys_run_independently() {
        let flights: SingleFlight<u8, u8> = SingleFlight::new();

        let (a, b) = tokio::join!(
            flights.run(1, || async { 10 }),
            flights.run(2, || async { 20 }),
        );

        assert_eq!(a, Ok(10));
        assert_eq!(b, Ok(20));
    }

    #[tokio::test]
    async fn panic_is_reported_and_entry_cleared() {
        let flights: SingleFlight<&'static str, ()> = SingleFlight::new();

        let result = flights.run("boom", || async { panic!("operation exploded") }).await;

        assert_eq!(result, Err(FlightError::Panicked("operation exploded".to_string())));
        assert!(flights.is_empty());
    }

    #[tokio::test]
    async fn abandoned_caller_does_not_cancel_operation() {
        let flights: SingleFlight<&'static str, u32> = SingleFlight::new();
        let release = Arc::new(Notify::new());

        let gate = Arc::clone(&release);
        let first = flights.run("shared", move || async move {
            gate.notified().await;
            42
        });
        // Poll once so the operation is registered, then drop the caller.
        let _ = tokio::time::timeout(Duration::from_millis(10), first).await;
        assert!(flights.is_in_flight(&"shared"));

        let joined = {
            let flights = flights.clone();
            tokio::spawn(async move { flights.run("shared", || async { 0 }).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        release.notify_one();

        assert_eq!(joined.await.expect("join"), Ok(42));
    }
}
