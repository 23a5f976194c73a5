//! A partition worker.
//!
//! Each worker exclusively owns the slots hashed to it: their state, their
//! open windows and a processing-time watermark. Events arrive over a bounded
//! channel from the ingress thread; while the channel is quiet the worker
//! advances its watermark from the clock every tick so that windows still
//! close with bounded staleness.
//!
//! # Notes
//! - An event already behind the watermark skips the windows. It is applied
//!   directly (and emitted) only when it is strictly newer than what its slot
//!   has accepted; otherwise it is dropped as stale.
//! - Every accepted aggregate is emitted, including replays that did not change
//!   the slot, so each (slot, window) pair yields exactly one record.
//! - The sink is flushed after every batch of closed windows and after every
//!   late update, so consumers see records as soon as they are emitted.
//! - Delivery failures are counted and logged; the worker keeps going.

#[cfg(feature = "checkpointing")]
use crate::checkpoint::CheckpointManager;
use crate::aggregator::{ClosedWindow, WindowedAggregator};
use crate::clock::Clock;
use crate::config::PipelineConfig;
use crate::emitter::{Emitter, OutputRecord};
use crate::event::Event;
use crate::fee::{FeePolicy, compute};
use crate::io::Sink;
use crate::metrics::{MetricsCollector, names};
use crate::observability::worker_span;
use crate::state::{StateStore, Transition};
use crate::watermark::WatermarkTracker;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Counters of one worker over its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub index: usize,
    pub events: u64,
    pub late_events: u64,
    pub late_updates: u64,
    pub stale_events: u64,
    pub windows_closed: u64,
    pub records_emitted: u64,
    pub delivery_failures: u64,
    /// Slots held in the state store at exit.
    pub slots: usize,
}

pub struct Worker<S> {
    index: usize,
    workers: usize,
    watermark: WatermarkTracker,
    aggregator: WindowedAggregator,
    store: StateStore,
    emitter: Emitter<S>,
    fee: FeePolicy,
    clock: Arc<dyn Clock>,
    metrics: MetricsCollector,
    #[cfg(feature = "checkpointing")]
    checkpoints: Option<Arc<CheckpointManager>>,
    checkpoint_every: u64,
    windows_since_checkpoint: u64,
    report: WorkerReport,
}

impl<S: Sink> Worker<S> {
    pub fn new(
        index: usize,
        config: &PipelineConfig,
        sink: S,
        clock: Arc<dyn Clock>,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            index,
            workers: config.workers,
            watermark: WatermarkTracker::new(config.lateness),
            aggregator: WindowedAggregator::new(config.window_size, config.slide),
            store: StateStore::new(),
            emitter: Emitter::new(sink, config.publish_retry.clone(), metrics.clone()),
            fee: config.fee,
            clock,
            metrics,
            #[cfg(feature = "checkpointing")]
            checkpoints: None,
            checkpoint_every: config.checkpoint.every_windows,
            windows_since_checkpoint: 0,
            report: WorkerReport {
                index,
                ..WorkerReport::default()
            },
        }
    }

    /// Start from previously recovered slot states.
    #[must_use]
    pub fn with_state(mut self, store: StateStore) -> Self {
        self.store = store;
        self
    }

    #[cfg(feature = "checkpointing")]
    #[must_use]
    pub fn with_checkpoints(mut self, manager: Arc<CheckpointManager>) -> Self {
        self.checkpoints = Some(manager);
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn watermark(&self) -> Option<i64> {
        self.watermark.current()
    }

    pub fn open_windows(&self) -> usize {
        self.aggregator.open_windows()
    }

    pub fn report(&self) -> &WorkerReport {
        &self.report
    }

    pub fn sink(&self) -> &S {
        self.emitter.sink()
    }

    /// Route one validated event into the windows, or straight to state if late.
    pub fn handle(&mut self, event: Event) {
        self.report.events += 1;
        let observed = event.processing_timestamp;

        if self.watermark.is_late(&event) {
            self.report.late_events += 1;
            self.metrics.increment_counter(names::LATE_EVENTS, 1);
            self.apply_late(&event);
        } else {
            self.aggregator.insert(event);
        }
        self.advance(observed);
    }

    /// Advance the watermark from the clock and close whatever is ready.
    pub fn tick(&mut self) {
        let now = self.clock.now_ms();
        self.advance(now);
    }

    /// Close every open window regardless of the watermark, flush the sink and
    /// write a final checkpoint.
    ///
    /// # Errors
    /// Returns an error if the sink cannot be flushed.
    pub fn drain(&mut self) -> Result<()> {
        let closed = self.aggregator.flush();
        if !closed.is_empty() {
            info!(windows = closed.len(), "closing in-flight windows early");
        }
        for window in closed {
            self.finish_window(window);
        }
        self.emitter
            .flush()
            .with_context(|| format!("worker {} could not flush its sink", self.index))?;
        self.checkpoint();
        self.report.slots = self.store.len();
        Ok(())
    }

    /// Process events until every sender is gone, then drain.
    ///
    /// # Errors
    /// Returns an error if the final drain fails.
    pub fn run(mut self, rx: &Receiver<Event>, tick: Duration) -> Result<WorkerReport> {
        let span = worker_span(self.index, self.workers);
        let _guard = span.enter();
        info!(slots = self.store.len(), "worker started");

        loop {
            match rx.recv_timeout(tick) {
                Ok(event) => self.handle(event),
                Err(RecvTimeoutError::Timeout) => self.tick(),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.drain()?;
        info!(
            events = self.report.events,
            windows = self.report.windows_closed,
            emitted = self.report.records_emitted,
            "worker stopped"
        );
        Ok(self.report)
    }

    fn advance(&mut self, observed: i64) {
        let wm = self.watermark.advance(observed);
        #[allow(clippy::cast_precision_loss)]
        self.metrics.set_gauge(&names::watermark(self.index), wm as f64);
        let closed = self.aggregator.close_ready(wm);
        if closed.is_empty() {
            return;
        }
        for window in closed {
            self.finish_window(window);
        }
        self.flush_sink();
    }

    fn flush_sink(&mut self) {
        if let Err(e) = self.emitter.flush() {
            warn!(error = %e, "sink flush failed; records stay buffered until the next flush");
        }
    }

    fn apply_late(&mut self, event: &Event) {
        if !self.store.is_newer(event) {
            self.report.stale_events += 1;
            self.metrics.increment_counter(names::STALE_EVENTS, 1);
            debug!(slot = %event.slot_id, ts = event.logical_timestamp, "late event is not newer; dropped");
            return;
        }
        self.report.late_updates += 1;
        self.metrics.increment_counter(names::LATE_STATE_UPDATES, 1);
        debug!(slot = %event.slot_id, ts = event.logical_timestamp, "late event applied directly");
        self.apply(event);
        self.flush_sink();
    }

    fn finish_window(&mut self, closed: ClosedWindow) {
        debug!(
            start = closed.window.start,
            end = closed.window.end,
            slots = closed.latest.len(),
            buffered = closed.buffered,
            "window closed"
        );
        for event in &closed.latest {
            self.apply(event);
        }
        self.report.windows_closed += 1;
        self.metrics.increment_counter(names::WINDOWS_CLOSED, 1);

        self.windows_since_checkpoint += 1;
        if self.checkpoint_every > 0 && self.windows_since_checkpoint >= self.checkpoint_every {
            self.checkpoint();
        }
    }

    fn apply(&mut self, event: &Event) {
        let now = self.clock.now();
        match self.store.apply(event, now) {
            Transition::Applied { state, changed } => {
                let fee = compute(state.entry_logical_timestamp, now.timestamp(), &self.fee);
                let record = OutputRecord::from_state(&state, &fee, now);
                if !changed {
                    debug!(slot = %state.slot_id, "re-emitting unchanged slot");
                }
                match self.emitter.emit(&record) {
                    Ok(_) => {
                        self.report.records_emitted += 1;
                        self.metrics.increment_counter(names::RECORDS_EMITTED, 1);
                    }
                    Err(e) => {
                        self.report.delivery_failures += 1;
                        self.metrics.increment_counter(names::DELIVERY_FAILURES, 1);
                        error!(error = %e, "dropping output record");
                    }
                }
            }
            Transition::Stale { last_logical_timestamp } => {
                self.report.stale_events += 1;
                self.metrics.increment_counter(names::STALE_EVENTS, 1);
                debug!(
                    slot = %event.slot_id,
                    ts = event.logical_timestamp,
                    last = last_logical_timestamp,
                    "out-of-order event discarded"
                );
            }
        }
    }

    #[cfg(feature = "checkpointing")]
    fn checkpoint(&mut self) {
        self.windows_since_checkpoint = 0;
        let Some(manager) = &self.checkpoints else {
            return;
        };
        match manager.save(self.index, self.workers, self.store.snapshot()) {
            Ok(path) => {
                self.metrics.increment_counter(names::CHECKPOINTS_WRITTEN, 1);
                debug!(path = %path.display(), "checkpoint written");
            }
            Err(e) => warn!(error = %e, "checkpoint failed"),
        }
    }

    #[cfg(not(feature = "checkpointing"))]
    fn checkpoint(&mut self) {
        self.windows_since_checkpoint = 0;
    }
}
