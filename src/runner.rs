//! Orchestration of the ingress thread and the worker pool.
//!
//! ```text
//!   Source ──poll──▶ ingress (decode, validate, stamp) ──hash(slot)──▶ worker 0..n ──▶ Sink
//! ```
//!
//! The runner owns no processing state itself; it wires the threads together,
//! restores checkpoints, and turns the shutdown flag or the end of the source
//! into an orderly drain of every worker.

#[cfg(feature = "checkpointing")]
use crate::checkpoint::CheckpointManager;
use crate::clock::{Clock, SystemClock};
use crate::config::PipelineConfig;
use crate::event::{Event, decode};
use crate::io::{Polled, Sink, Source, TransportError};
use crate::metrics::{MetricsCollector, names};
use crate::observability::ingress_span;
use crate::state::{SlotState, StateStore};
use crate::validation::{ErrorCollector, format_errors};
use crate::worker::{Worker, WorkerReport};
use anyhow::{Context, Result, anyhow};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{SyncSender, sync_channel};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use tracing::{debug, info, warn};

/// Worker index owning `slot_id` out of `workers` partitions.
///
/// Stable for the lifetime of the binary; a slot always lands on the same worker.
pub fn partition_for(slot_id: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    slot_id.hash(&mut hasher);
    let n = u64::try_from(workers.max(1)).unwrap_or(u64::MAX);
    usize::try_from(hasher.finish() % n).unwrap_or(0)
}

/// Cooperative stop signal for a running [`Runner`].
#[derive(Clone, Debug, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    /// Ask the ingress to stop; workers drain and exit afterwards.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngressReport {
    pub received: u64,
    pub malformed: u64,
    pub routed: u64,
    pub reconnects: u64,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub ingress: IngressReport,
    pub workers: Vec<WorkerReport>,
    /// Slots restored from checkpoints before the run.
    pub recovered_slots: usize,
}

impl RunReport {
    pub fn records_emitted(&self) -> u64 {
        self.workers.iter().map(|w| w.records_emitted).sum()
    }

    pub fn delivery_failures(&self) -> u64 {
        self.workers.iter().map(|w| w.delivery_failures).sum()
    }

    pub fn slots(&self) -> usize {
        self.workers.iter().map(|w| w.slots).sum()
    }
}

pub struct Runner {
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    metrics: MetricsCollector,
    shutdown: ShutdownHandle,
    errors: Arc<Mutex<ErrorCollector>>,
}

impl Runner {
    /// # Errors
    /// Returns an error if `config` is invalid.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            clock: Arc::new(SystemClock),
            metrics: MetricsCollector::new(),
            shutdown: ShutdownHandle::default(),
            errors: Arc::new(Mutex::new(ErrorCollector::new())),
        })
    }

    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Snapshot of the rejected input seen so far.
    pub fn errors(&self) -> ErrorCollector {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Consume `source` until it closes or shutdown is requested, publishing to
    /// clones of `sink`, then drain every worker.
    ///
    /// # Errors
    /// Returns an error if checkpoint recovery fails, the source fails
    /// permanently or cannot be reconnected, a worker cannot flush its sink, or
    /// a thread panics.
    pub fn run<Src, Snk>(&self, source: Src, sink: Snk) -> Result<RunReport>
    where
        Src: Source,
        Snk: Sink + Clone,
    {
        let workers = self.config.workers;
        self.metrics.record_start();

        let recovered = self.recover()?;
        let recovered_slots = recovered.len();
        let mut stores: Vec<Vec<SlotState>> = vec![Vec::new(); workers];
        for state in recovered {
            stores[partition_for(&state.slot_id, workers)].push(state);
        }
        #[cfg(feature = "checkpointing")]
        let manager = self.checkpoint_manager()?;

        info!(workers, recovered_slots, "starting pipeline");

        let result = thread::scope(|s| -> Result<RunReport> {
            let mut senders = Vec::with_capacity(workers);
            let mut handles = Vec::with_capacity(workers);
            for (index, states) in stores.into_iter().enumerate() {
                let (tx, rx) = sync_channel::<Event>(self.config.channel_capacity);
                senders.push(tx);
                let worker = Worker::new(
                    index,
                    &self.config,
                    sink.clone(),
                    Arc::clone(&self.clock),
                    self.metrics.clone(),
                )
                .with_state(StateStore::from_states(states));
                #[cfg(feature = "checkpointing")]
                let worker = match &manager {
                    Some(m) => worker.with_checkpoints(Arc::clone(m)),
                    None => worker,
                };
                let tick = self.config.tick;
                let handle = thread::Builder::new()
                    .name(format!("parkflow-worker-{index}"))
                    .spawn_scoped(s, move || worker.run(&rx, tick))
                    .context("Failed to spawn worker thread")?;
                handles.push(handle);
            }

            let ingress = thread::Builder::new()
                .name("parkflow-ingress".into())
                .spawn_scoped(s, move || self.ingest(source, senders))
                .context("Failed to spawn ingress thread")?;

            // join workers first: they only finish once ingress drops the senders
            let mut reports = Vec::with_capacity(workers);
            let mut first_err = None;
            for handle in handles {
                match handle.join() {
                    Ok(Ok(report)) => reports.push(report),
                    Ok(Err(e)) => {
                        first_err.get_or_insert(e);
                    }
                    Err(_) => {
                        first_err.get_or_insert(anyhow!("worker thread panicked"));
                    }
                }
            }
            let ingress = ingress
                .join()
                .map_err(|_| anyhow!("ingress thread panicked"))??;
            if let Some(e) = first_err {
                return Err(e);
            }
            Ok(RunReport {
                ingress,
                workers: reports,
                recovered_slots,
            })
        });

        self.metrics.record_end();
        let report = result?;
        info!(
            received = report.ingress.received,
            malformed = report.ingress.malformed,
            emitted = report.records_emitted(),
            failures = report.delivery_failures(),
            "pipeline stopped"
        );
        Ok(report)
    }

    fn ingest<Src: Source>(&self, mut source: Src, senders: Vec<SyncSender<Event>>) -> Result<IngressReport> {
        let span = ingress_span("input");
        let _guard = span.enter();
        let workers = senders.len();
        let mut report = IngressReport::default();

        loop {
            if self.shutdown.is_triggered() {
                info!("shutdown requested; stopping ingestion");
                break;
            }
            match source.poll(self.config.tick) {
                Ok(Polled::Message(message)) => {
                    report.received += 1;
                    self.metrics.increment_counter(names::EVENTS_RECEIVED, 1);
                    match decode(&message.payload, self.clock.now_ms()) {
                        Ok(event) => {
                            let idx = partition_for(&event.slot_id, workers);
                            senders[idx]
                                .send(event)
                                .map_err(|_| anyhow!("worker {idx} stopped accepting events"))?;
                            report.routed += 1;
                        }
                        Err(errs) => {
                            report.malformed += 1;
                            self.metrics.increment_counter(names::MALFORMED_EVENTS, 1);
                            warn!(key = ?message.key, errors = %format_errors(&errs), "dropping malformed event");
                            self.errors
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .add_error(message.key, errs);
                        }
                    }
                }
                Ok(Polled::Idle) => {}
                Ok(Polled::Closed) => {
                    info!("source closed");
                    break;
                }
                Err(e) if e.is_retryable() => {
                    warn!(error = %e, "source connection lost; reconnecting");
                    self.config
                        .reconnect_retry
                        .run(
                            |attempt| {
                                debug!(attempt, "reconnecting source");
                                source.reconnect()
                            },
                            TransportError::is_retryable,
                        )
                        .map_err(|ex| {
                            anyhow!(ex.error).context(format!("source reconnect failed after {} attempt(s)", ex.attempts))
                        })?;
                    report.reconnects += 1;
                    self.metrics.increment_counter(names::SOURCE_RECONNECTS, 1);
                }
                Err(e) => return Err(anyhow!(e).context("source failed")),
            }
        }
        Ok(report)
    }

    #[cfg(feature = "checkpointing")]
    fn checkpoint_manager(&self) -> Result<Option<Arc<CheckpointManager>>> {
        if !self.config.checkpoint.enabled {
            return Ok(None);
        }
        Ok(Some(Arc::new(CheckpointManager::new(self.config.checkpoint.clone())?)))
    }

    #[cfg(feature = "checkpointing")]
    fn recover(&self) -> Result<Vec<SlotState>> {
        match self.checkpoint_manager()? {
            Some(m) => m.recover_all().context("checkpoint recovery failed"),
            None => Ok(Vec::new()),
        }
    }

    #[cfg(not(feature = "checkpointing"))]
    #[allow(clippy::unnecessary_wraps, clippy::unused_self)]
    fn recover(&self) -> Result<Vec<SlotState>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitioning_is_stable_and_in_range() {
        for slot in ["A1", "B2", "C3", "F10"] {
            let p = partition_for(slot, 4);
            assert!(p < 4);
            assert_eq!(p, partition_for(slot, 4));
        }
        assert_eq!(partition_for("A1", 1), 0);
        assert_eq!(partition_for("A1", 0), 0);
    }

    #[test]
    fn shutdown_handle_is_shared() {
        let runner = Runner::new(crate::testing::test_pipeline_config(1)).unwrap();
        let handle = runner.shutdown_handle();
        handle.trigger();
        assert!(runner.shutdown_handle().is_triggered());
    }
}
