use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Source of monotonic and wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    fn system_time(&self) -> SystemTime;

    /// Wall clock as Unix epoch milliseconds; clamps pre-epoch times to 0
    fn millis_since_epoch(&self) -> i64 {
        let millis =
            self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        i64::try_from(millis).unwrap_or(i64::MAX)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }
}

/// Manually driven clock
///
/// Both timelines move only through [`MockClock::advance`]. Clones share the
/// offset, so a test keeps one clone and hands another to the component under
/// test.
#[derive(Debug, Clone)]
pub struct MockClock {
    origin: Instant,
    epoch: SystemTime,
    offset_nanos: Arc<AtomicU64>,
}

impl MockClock {
    /// Wall clock pinned to the real time of creation
    pub fn new() -> Self {
        Self::starting_at(SystemTime::now())
    }

    /// Wall clock starting `millis` after the Unix epoch
    pub fn at_epoch_millis(millis: u64) -> Self {
        Self::starting_at(UNIX_EPOCH + Duration::from_millis(millis))
    }

    fn starting_at(epoch: SystemTime) -> Self {
        Self { origin: Instant::now(), epoch, offset_nanos: Arc::new(AtomicU64::new(0)) }
    }

    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.offset_nanos.fetch_add(nanos, Ordering::SeqCst);
    }

    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Total time advanced since creation
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst))
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        self.epoch + self.elapsed()
    }
}
