//! Flush scheduling, diagnostics emission and context cache resets.
//!
//! Three independent timer tasks drive the pipeline: the flush timer (which
//! also serves explicit flush requests), the diagnostics timer and the
//! context cache reset timer. At most one analytics flush is in flight; a
//! request arriving meanwhile is coalesced into the next one.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use tally_core::Clock;
use tokio::{
    sync::Notify,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::EventsConfig,
    error::{ErrorCategory, EventsError, Result},
    payload::{Payload, PayloadSerializer},
    sender::{DeliveryResult, DeliveryStatus, EventSender},
    state::PipelineState,
};

/// Phase of the analytics flush cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No flush in flight.
    Idle,
    /// A flush is draining, serializing or sending.
    Flushing,
    /// Shutdown has begun; no further flushes start.
    ShuttingDown,
}

/// A running timer task.
#[derive(Debug)]
pub struct TimerHandle {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl TimerHandle {
    /// Timer name used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// State shared between the scheduler handle and its timer tasks.
#[derive(Debug)]
struct SchedulerCore {
    config: EventsConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<PipelineState>,
    phase: Mutex<SchedulerState>,
    settled: Notify,
    flush_requested: Notify,
    resumed: Notify,
    offline: AtomicBool,
    stood_down: AtomicBool,
    serializer: PayloadSerializer,
    sender: EventSender,
}

enum FlushStart<'a> {
    Started(FlushGuard<'a>),
    InFlight,
    Unavailable,
}

/// Returns the phase to `Idle` and wakes waiters when a flush ends, even if
/// the flushing future is dropped.
struct FlushGuard<'a> {
    core: &'a SchedulerCore,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        {
            let mut phase = self.core.lock_phase();
            if *phase == SchedulerState::Flushing {
                *phase = SchedulerState::Idle;
            }
        }
        self.core.settled.notify_waiters();
    }
}

impl SchedulerCore {
    fn lock_state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_phase(&self) -> MutexGuard<'_, SchedulerState> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_suppressed(&self) -> bool {
        self.offline.load(Ordering::Acquire) || self.stood_down.load(Ordering::Acquire)
    }

    fn try_begin_flush(&self) -> FlushStart<'_> {
        if self.is_suppressed() {
            return FlushStart::Unavailable;
        }

        let mut phase = self.lock_phase();
        match *phase {
            SchedulerState::Idle => {
                *phase = SchedulerState::Flushing;
                FlushStart::Started(FlushGuard { core: self })
            },
            SchedulerState::Flushing => FlushStart::InFlight,
            SchedulerState::ShuttingDown => FlushStart::Unavailable,
        }
    }

    /// Runs one flush unless one is already in flight.
    async fn flush_once(&self) {
        match self.try_begin_flush() {
            FlushStart::Started(_guard) => self.drain_and_send().await,
            FlushStart::InFlight => debug!("flush already in flight, request coalesced"),
            FlushStart::Unavailable => debug!("flush suppressed"),
        }
    }

    /// Waits out any in-flight flush, then runs one of its own so that events
    /// queued before the call are included.
    async fn flush_and_settle(&self) {
        loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_begin_flush() {
                FlushStart::Started(_guard) => {
                    self.drain_and_send().await;
                    return;
                },
                FlushStart::InFlight => notified.await,
                FlushStart::Unavailable => return,
            }
        }
    }

    /// Moves to `ShuttingDown` once no flush is in flight. Returns `false` if
    /// shutdown had already begun.
    async fn enter_shutdown(&self) -> bool {
        loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut phase = self.lock_phase();
                match *phase {
                    SchedulerState::Idle => {
                        *phase = SchedulerState::ShuttingDown;
                        return true;
                    },
                    SchedulerState::ShuttingDown => return false,
                    SchedulerState::Flushing => {},
                }
            }

            debug!("waiting for in-flight flush before shutdown");
            notified.await;
        }
    }

    async fn drain_and_send(&self) {
        let (events, summary) = self.lock_state().drain();
        if events.is_empty() && summary.is_empty() {
            debug!("nothing to flush");
            return;
        }

        let Some(payload) = self.serializer.serialize_analytics(&events, &summary) else {
            return;
        };
        self.lock_state().diagnostics.record_events_in_batch(payload.event_count);

        debug!(
            events = payload.event_count,
            sequence = payload.sequence_number,
            "flushing analytics events"
        );
        let result = self.sender.send(&payload).await;
        self.apply_result(&result);
    }

    /// Sends the start-up event. Returns `false` without sending while
    /// delivery is suppressed, so the caller can try again later.
    async fn send_diagnostic_init(&self) -> bool {
        if self.is_suppressed() {
            debug!("diagnostic init deferred");
            return false;
        }
        let event = self.lock_state().diagnostics.init_event(&self.config);
        if let Some(payload) = self.serializer.serialize_diagnostic(&event) {
            self.send_diagnostic(payload).await;
        }
        true
    }

    async fn send_periodic_diagnostic(&self) {
        if self.is_suppressed() {
            return;
        }
        let event = {
            let mut state = self.lock_state();
            let dropped = state.buffer.dropped_count();
            let queued = state.buffer.len();
            state.diagnostics.snapshot_and_reset(self.clock.unix_millis(), dropped, queued)
        };
        if let Some(payload) = self.serializer.serialize_diagnostic(&event) {
            self.send_diagnostic(payload).await;
        }
    }

    async fn send_diagnostic(&self, payload: Payload) {
        let result = self.sender.send(&payload).await;
        self.apply_result(&result);
    }

    fn apply_result(&self, result: &DeliveryResult) {
        if let Some(server_time) = result.time_from_server {
            self.lock_state().last_known_server_time = Some(server_time);
        }

        if result.status == DeliveryStatus::FailedAndMustShutDown
            && !self.stood_down.swap(true, Ordering::AcqRel)
        {
            error!("collector rejected the sdk key, event delivery permanently disabled");
        }
    }
}

/// Owns the timer tasks and coordinates flushes for one event processor.
#[derive(Debug)]
pub struct FlushScheduler {
    core: Arc<SchedulerCore>,
    cancellation_token: CancellationToken,
    timers: Mutex<Vec<TimerHandle>>,
}

impl FlushScheduler {
    /// Creates the scheduler and spawns its timers on the current tokio
    /// runtime.
    ///
    /// The diagnostics timer is not started when diagnostics are opted out.
    ///
    /// # Errors
    ///
    /// Returns `EventsError::ConfigurationError` when called outside a tokio
    /// runtime.
    pub fn start(
        config: EventsConfig,
        state: PipelineState,
        sender: EventSender,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            EventsError::configuration(format!("event processor requires a tokio runtime: {e}"))
        })?;

        let core = Arc::new(SchedulerCore {
            serializer: PayloadSerializer::new(&config),
            config,
            clock,
            state: Mutex::new(state),
            phase: Mutex::new(SchedulerState::Idle),
            settled: Notify::new(),
            flush_requested: Notify::new(),
            resumed: Notify::new(),
            offline: AtomicBool::new(false),
            stood_down: AtomicBool::new(false),
            sender,
        });
        let cancellation_token = CancellationToken::new();

        let mut timers = Vec::with_capacity(3);
        timers.push(TimerHandle {
            name: "flush",
            handle: runtime.spawn(run_flush_timer(core.clone(), cancellation_token.clone())),
        });
        if !core.config.diagnostic_opt_out {
            timers.push(TimerHandle {
                name: "diagnostics",
                handle: runtime
                    .spawn(run_diagnostics_timer(core.clone(), cancellation_token.clone())),
            });
        }
        timers.push(TimerHandle {
            name: "context_cache_reset",
            handle: runtime.spawn(run_cache_reset_timer(core.clone(), cancellation_token.clone())),
        });

        info!(
            timers = timers.len(),
            flush_interval_ms = core.config.flush_interval_ms,
            capacity = core.config.capacity,
            "event scheduler started"
        );

        Ok(Self { core, cancellation_token, timers: Mutex::new(timers) })
    }

    /// Runs `f` with exclusive access to the pipeline state.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut PipelineState) -> R) -> R {
        f(&mut self.core.lock_state())
    }

    /// Asks the flush timer task to flush as soon as possible. Requests made
    /// while a flush is in flight collapse into one follow-up flush.
    pub fn request_flush(&self) {
        self.core.flush_requested.notify_one();
    }

    /// Flushes now, first waiting for any in-flight flush, and returns whether
    /// that completed within `timeout`.
    ///
    /// The flush runs on its own task, so it still completes if the timeout
    /// elapses first.
    pub async fn flush_and_wait(&self, timeout: Duration) -> bool {
        let core = self.core.clone();
        let handle = tokio::spawn(async move { core.flush_and_settle().await });

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => true,
            Ok(Err(join_error)) => {
                let error = EventsError::internal(format!("flush task failed: {join_error}"));
                error!(category = %ErrorCategory::from(&error), error = %error, "flush aborted");
                false
            },
            Err(_elapsed) => {
                warn!(timeout_ms = timeout.as_millis(), "flush did not complete before timeout");
                false
            },
        }
    }

    /// Enables or disables offline mode. Events keep being buffered while
    /// offline; nothing is sent.
    pub fn set_offline(&self, offline: bool) {
        let previous = self.core.offline.swap(offline, Ordering::AcqRel);
        if previous != offline {
            info!(offline, "event delivery offline mode changed");
            if !offline {
                self.core.resumed.notify_one();
            }
        }
    }

    /// Whether offline mode is on.
    pub fn is_offline(&self) -> bool {
        self.core.offline.load(Ordering::Acquire)
    }

    /// Whether delivery was permanently disabled by a credential rejection.
    pub fn is_stood_down(&self) -> bool {
        self.core.stood_down.load(Ordering::Acquire)
    }

    /// Current flush phase.
    pub fn state(&self) -> SchedulerState {
        *self.core.lock_phase()
    }

    /// Stops the timers, waits for an in-flight flush and performs one final
    /// flush. Later calls return immediately.
    ///
    /// The final flush is skipped while offline or stood down.
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();

        let timers = {
            let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *timers)
        };
        for timer in timers {
            if let Err(join_error) = timer.handle.await {
                error!(
                    timer = timer.name,
                    error = %join_error,
                    "timer task failed during shutdown"
                );
            }
        }

        if !self.core.enter_shutdown().await {
            return;
        }

        if self.core.is_suppressed() {
            debug!(
                offline = self.is_offline(),
                stood_down = self.is_stood_down(),
                "skipping final flush"
            );
        } else {
            self.core.drain_and_send().await;
        }

        info!("event scheduler shut down");
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        if self.cancellation_token.is_cancelled() {
            return;
        }

        let timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        let active = timers.iter().filter(|timer| !timer.is_finished()).count();
        if active > 0 {
            warn!(
                active_timers = active,
                "event processor dropped without close(), pending events are discarded"
            );
        }
        drop(timers);

        self.cancellation_token.cancel();
    }
}

async fn run_flush_timer(core: Arc<SchedulerCore>, token: CancellationToken) {
    let period = core.config.flush_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {},
            () = core.flush_requested.notified() => {},
        }
        core.flush_once().await;
    }

    debug!("flush timer stopped");
}

async fn run_diagnostics_timer(core: Arc<SchedulerCore>, token: CancellationToken) {
    let period = core.config.diagnostic_recording_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut init_sent = false;

    loop {
        // The init event goes first; while offline it is retried on resume
        // and on every tick.
        if !init_sent {
            tokio::select! {
                () = token.cancelled() => break,
                sent = core.send_diagnostic_init() => init_sent = sent,
            }
        }

        tokio::select! {
            () = token.cancelled() => break,
            () = core.resumed.notified(), if !init_sent => {},
            _ = ticker.tick() => {
                if init_sent {
                    tokio::select! {
                        () = token.cancelled() => break,
                        () = core.send_periodic_diagnostic() => {},
                    }
                }
            },
        }
    }

    debug!("diagnostics timer stopped");
}

async fn run_cache_reset_timer(core: Arc<SchedulerCore>, token: CancellationToken) {
    let period = core.config.context_keys_flush_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                core.lock_state().cache.reset();
                debug!("context key cache reset");
            },
        }
    }

    debug!("context cache reset timer stopped");
}
