//! Public entry point of the event pipeline.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tally_core::{Clock, Event, RealClock};
use tracing::{debug, info};

use crate::{
    config::EventsConfig,
    error::Result,
    scheduler::{FlushScheduler, SchedulerState},
    sender::EventSender,
    state::PipelineState,
    transport::{ReqwestTransport, Transport},
};

/// Accepts analytics events from any thread and ships them in the
/// background.
///
/// `send_event` never blocks on I/O and never fails. Buffered events are
/// delivered by the flush timer, by [`flush`](Self::flush) and
/// [`flush_and_wait`](Self::flush_and_wait), and by a final flush in
/// [`close`](Self::close). Dropping a processor without closing it discards
/// whatever is still buffered.
///
/// # Example
///
/// ```no_run
/// use tally_core::{Context, Event, IdentifyEvent};
/// use tally_events::{EventProcessor, EventsConfig};
///
/// # async fn run() -> tally_events::Result<()> {
/// let processor = EventProcessor::new(EventsConfig::new("sdk-key"))?;
/// processor.send_event(Event::Identify(IdentifyEvent {
///     creation_date: 1_700_000_000_000,
///     context: Context::new("user-1"),
/// }));
/// processor.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct EventProcessor {
    scheduler: FlushScheduler,
    clock: Arc<dyn Clock>,
    closed: AtomicBool,
}

impl EventProcessor {
    /// Creates a processor posting over HTTP with the system clock.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `EventsError::ConfigurationError` if the configuration is
    /// invalid, the HTTP client cannot be built, or no runtime is available.
    pub fn new(config: EventsConfig) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(&config)?);
        Self::with_transport(config, transport, Arc::new(RealClock::new()))
    }

    /// Creates a processor with a caller-supplied transport and clock.
    ///
    /// # Errors
    ///
    /// Returns `EventsError::ConfigurationError` if the configuration is
    /// invalid or no runtime is available.
    pub fn with_transport(
        config: EventsConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let sender = EventSender::new(&config, transport, clock.clone());
        let state = PipelineState::new(&config, clock.clone());
        let scheduler = FlushScheduler::start(config, state, sender, clock.clone())?;

        Ok(Self { scheduler, clock, closed: AtomicBool::new(false) })
    }

    /// Queues an event for delivery.
    ///
    /// Ignored once the processor is closed or delivery has been permanently
    /// disabled. Events beyond the buffer capacity are dropped and counted.
    pub fn send_event(&self, event: Event) {
        if self.closed.load(Ordering::Acquire) {
            debug!(kind = event.kind(), "ignoring event sent after close");
            return;
        }
        if self.scheduler.is_stood_down() {
            return;
        }

        let now = self.clock.unix_millis();
        self.scheduler.with_state(|state| state.ingest(event, now));
    }

    /// Enables or disables offline mode.
    pub fn set_offline(&self, offline: bool) {
        self.scheduler.set_offline(offline);
    }

    /// Requests an asynchronous flush. Returns immediately.
    pub fn flush(&self) {
        if !self.closed.load(Ordering::Acquire) {
            self.scheduler.request_flush();
        }
    }

    /// Flushes and waits for delivery to settle.
    ///
    /// Returns `true` if the flush completed (or had nothing to do) within
    /// `timeout`, `false` on timeout or after close.
    pub async fn flush_and_wait(&self, timeout: Duration) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.scheduler.flush_and_wait(timeout).await
    }

    /// Stops the timers and delivers whatever is still buffered.
    ///
    /// Only the first call does any work.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        info!(pending = self.pending_events(), "closing event processor");
        self.scheduler.shutdown().await;
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether offline mode is on.
    pub fn is_offline(&self) -> bool {
        self.scheduler.is_offline()
    }

    /// Whether the collector rejected the credentials.
    pub fn is_stood_down(&self) -> bool {
        self.scheduler.is_stood_down()
    }

    /// Current flush phase.
    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// Number of events waiting in the buffer.
    pub fn pending_events(&self) -> usize {
        self.scheduler.with_state(|state| state.buffer.len())
    }

    /// Total events dropped because the buffer was full.
    pub fn dropped_events(&self) -> u64 {
        self.scheduler.with_state(|state| state.buffer.dropped_count())
    }
}

#[cfg(test)]
mod tests {
    use tally_core::{Context, IdentifyEvent, TestClock};

    use super::*;

    fn identify(key: &str) -> Event {
        Event::Identify(IdentifyEvent { creation_date: 1, context: Context::new(key) })
    }

    fn processor(config: EventsConfig) -> EventProcessor {
        let transport = Arc::new(ReqwestTransport::new(&config).unwrap());
        EventProcessor::with_transport(config, transport, Arc::new(TestClock::at_unix_millis(0)))
            .unwrap()
    }

    fn offline_config() -> EventsConfig {
        EventsConfig {
            events_base_uri: "http://127.0.0.1:1".to_string(),
            diagnostic_opt_out: true,
            ..EventsConfig::new("sdk-key")
        }
    }

    #[test]
    fn construction_outside_runtime_fails() {
        let transport = Arc::new(ReqwestTransport::new(&offline_config()).unwrap());
        let result = EventProcessor::with_transport(
            offline_config(),
            transport,
            Arc::new(TestClock::at_unix_millis(0)),
        );

        assert!(result.unwrap_err().to_string().contains("tokio runtime"));
    }

    #[tokio::test]
    async fn invalid_configuration_rejected() {
        let config = EventsConfig { capacity: 0, ..offline_config() };
        let transport = Arc::new(ReqwestTransport::new(&config).unwrap());

        let result =
            EventProcessor::with_transport(config, transport, Arc::new(RealClock::new()));

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn buffer_overflow_counted() {
        let processor = processor(EventsConfig { capacity: 2, ..offline_config() });
        processor.set_offline(true);

        for n in 0..5 {
            processor.send_event(identify(&format!("user-{n}")));
        }

        assert_eq!(processor.pending_events(), 2);
        assert_eq!(processor.dropped_events(), 3);
        processor.close().await;
    }

    #[tokio::test]
    async fn events_after_close_ignored_and_close_idempotent() {
        let processor = processor(offline_config());
        processor.set_offline(true);

        processor.close().await;
        processor.close().await;
        processor.send_event(identify("late"));

        assert!(processor.is_closed());
        assert_eq!(processor.pending_events(), 0);
        assert_eq!(processor.scheduler_state(), SchedulerState::ShuttingDown);
        assert!(!processor.flush_and_wait(Duration::from_millis(10)).await);
    }
}
