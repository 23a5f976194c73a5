//! Output records and their publication.

use crate::fee::Fee;
use crate::io::{Envelope, Sink, TransportError};
use crate::metrics::{MetricsCollector, names};
use crate::retry::RetryPolicy;
use crate::state::{SlotState, SlotStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// The published view of one slot, serialized with the public field names.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    #[serde(rename = "location")]
    pub slot_id: String,
    pub status: SlotStatus,
    #[serde(rename = "license_plate")]
    pub plate_id: String,
    pub parked_duration_minutes: Option<f64>,
    pub parked_blocks: Option<u64>,
    pub total_cost: f64,
    #[serde(rename = "event_timestamp_unix")]
    pub source_logical_timestamp: i64,
    #[serde(rename = "last_update")]
    pub emitted_at: DateTime<Utc>,
}

impl OutputRecord {
    pub fn from_state(state: &SlotState, fee: &Fee, emitted_at: DateTime<Utc>) -> Self {
        Self {
            slot_id: state.slot_id.clone(),
            status: state.status,
            plate_id: state.plate_id.clone(),
            parked_duration_minutes: fee.duration_minutes,
            parked_blocks: fee.blocks,
            total_cost: fee.total_cost,
            source_logical_timestamp: state.last_logical_timestamp,
            emitted_at,
        }
    }

    /// Decode a published payload.
    pub fn from_payload(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("could not encode record for slot {slot_id}: {source}")]
    Encode {
        slot_id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("delivery for slot {slot_id} failed after {attempts} attempt(s): {source}")]
    Exhausted {
        slot_id: String,
        attempts: usize,
        #[source]
        source: TransportError,
    },
}

/// Publishes records keyed by slot, retrying transient failures.
pub struct Emitter<S> {
    sink: S,
    retry: RetryPolicy,
    metrics: MetricsCollector,
}

impl<S: Sink> Emitter<S> {
    pub fn new(sink: S, retry: RetryPolicy, metrics: MetricsCollector) -> Self {
        Self { sink, retry, metrics }
    }

    /// Publish `record`; returns the number of attempts it took.
    ///
    /// # Errors
    /// Returns a [`DeliveryError`] when the record could not be encoded, the sink
    /// reported a permanent failure, or the retry budget was spent.
    pub fn emit(&mut self, record: &OutputRecord) -> Result<usize, DeliveryError> {
        let payload = serde_json::to_vec(record).map_err(|source| DeliveryError::Encode {
            slot_id: record.slot_id.clone(),
            source,
        })?;
        let message = Envelope::new(record.slot_id.clone(), payload)
            .with_timestamp(record.emitted_at.timestamp_millis());

        let sink = &mut self.sink;
        let metrics = &self.metrics;
        let slot = record.slot_id.as_str();
        self.retry
            .run(
                |attempt| {
                    if attempt > 0 {
                        metrics.increment_counter(names::PUBLISH_RETRIES, 1);
                    }
                    sink.publish(&message).map(|()| attempt + 1).inspect_err(|e| {
                        debug!(slot, attempt, error = %e, "publish attempt failed");
                    })
                },
                TransportError::is_retryable,
            )
            .map_err(|ex| {
                warn!(slot, attempts = ex.attempts, error = %ex.error, "giving up on record");
                DeliveryError::Exhausted {
                    slot_id: record.slot_id.clone(),
                    attempts: ex.attempts,
                    source: ex.error,
                }
            })
    }

    /// Flush the sink, retrying like a publish.
    ///
    /// # Errors
    /// Returns the last transport error once retries are exhausted.
    pub fn flush(&mut self) -> Result<(), TransportError> {
        let sink = &mut self.sink;
        self.retry
            .run(|_| sink.flush(), TransportError::is_retryable)
            .map_err(|ex| ex.error)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}
