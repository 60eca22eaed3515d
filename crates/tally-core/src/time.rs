//! Clock abstraction shared by every time-dependent component.
//!
//! The context key cache, the event processor and the event sender never read
//! the system clock directly. Production code injects [`RealClock`]; tests
//! inject [`TestClock`] and move time by hand so cache resets, debug windows
//! and retry delays are deterministic.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

/// Source of monotonic and wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic instant used for measuring intervals.
    fn now(&self) -> Instant;

    /// Wall-clock time used for event timestamps.
    fn now_system(&self) -> SystemTime;

    /// Waits for `duration`.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Wall-clock time in milliseconds since the Unix epoch.
    fn unix_millis(&self) -> u64 {
        to_unix_millis(self.now_system())
    }
}

/// Converts a wall-clock time to milliseconds since the epoch, saturating at
/// zero for times before it.
pub fn to_unix_millis(time: SystemTime) -> u64 {
    let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    u64::try_from(since_epoch.as_millis()).unwrap_or(u64::MAX)
}

/// Clock backed by the operating system and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates the system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Manually driven clock.
///
/// Clones share the same underlying time, so a test can keep one handle and
/// give another to the component under test. `sleep` advances the clock by
/// the requested amount and yields instead of waiting.
#[derive(Debug, Clone)]
pub struct TestClock {
    elapsed_ns: Arc<AtomicU64>,
    wall_ms: Arc<AtomicU64>,
    sleeps: Arc<AtomicU64>,
    origin: Instant,
}

impl TestClock {
    /// Creates a clock reading the current wall-clock time.
    pub fn new() -> Self {
        Self::at_unix_millis(to_unix_millis(SystemTime::now()))
    }

    /// Creates a clock whose wall-clock time is `millis` after the epoch.
    pub fn at_unix_millis(millis: u64) -> Self {
        Self {
            elapsed_ns: Arc::new(AtomicU64::new(0)),
            wall_ms: Arc::new(AtomicU64::new(millis)),
            sleeps: Arc::new(AtomicU64::new(0)),
            origin: Instant::now(),
        }
    }

    /// Moves both monotonic and wall-clock time forward.
    pub fn advance(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.elapsed_ns.fetch_add(nanos, Ordering::AcqRel);
        self.wall_ms.fetch_add(millis, Ordering::AcqRel);
    }

    /// Sets the wall-clock time without touching monotonic time. Wall-clock
    /// time may move backwards.
    pub fn set_unix_millis(&self, millis: u64) {
        self.wall_ms.store(millis, Ordering::Release);
    }

    /// Number of `sleep` calls made so far.
    pub fn sleep_count(&self) -> u64 {
        self.sleeps.load(Ordering::Acquire)
    }

    /// Monotonic time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn now_system(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.wall_ms.load(Ordering::Acquire))
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.sleeps.fetch_add(1, Ordering::AcqRel);
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}
