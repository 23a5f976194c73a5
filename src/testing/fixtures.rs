//! Sample events and configurations for common testing scenarios.

use crate::config::PipelineConfig;
use crate::event::{Event, StatusCode};
use crate::io::Envelope;
use crate::retry::RetryPolicy;
use std::time::Duration;

/// An event whose processing time equals its logical time.
///
/// # Example
///
/// ```
/// use parkflow::testing::event;
/// use parkflow::event::StatusCode;
///
/// let e = event("A1", "29A-12345", StatusCode::Entering, 1_000);
/// assert_eq!(e.processing_timestamp, 1_000_000);
/// ```
#[must_use]
pub fn event(slot: &str, plate: &str, code: StatusCode, logical_secs: i64) -> Event {
    Event::new(slot, plate, code, logical_secs, logical_secs.saturating_mul(1_000))
}

#[must_use]
pub fn event_at(slot: &str, plate: &str, code: StatusCode, logical_secs: i64, processing_ms: i64) -> Event {
    Event::new(slot, plate, code, logical_secs, processing_ms)
}

/// Wire message for `e`, keyed by slot as the feed publishes it.
#[must_use]
pub fn payload(e: &Event) -> Envelope {
    Envelope::new(e.slot_id.clone(), e.to_payload())
}

/// A1 enters at t=1000 and stays; B2 parks at 2000 and then reports an
/// older MOVING at 1500. C3 never appears.
#[must_use]
pub fn sample_lot_events() -> Vec<Event> {
    vec![
        event("A1", "29A-12345", StatusCode::Entering, 1_000),
        event("B2", "30B-67890", StatusCode::Parked, 2_000),
        event_at("B2", "30B-67890", StatusCode::Moving, 1_500, 2_001_000),
    ]
}

/// A full visit of one vehicle: enter, park, move, exit.
#[must_use]
pub fn sample_visit(slot: &str, plate: &str, start_secs: i64) -> Vec<Event> {
    [
        (StatusCode::Entering, 0),
        (StatusCode::Parked, 30),
        (StatusCode::Moving, 900),
        (StatusCode::Exiting, 960),
    ]
    .into_iter()
    .map(|(code, offset)| event(slot, plate, code, start_secs + offset))
    .collect()
}

/// Small windows, no lateness and immediate retries, for fast deterministic runs.
#[must_use]
pub fn test_pipeline_config(workers: usize) -> PipelineConfig {
    PipelineConfig {
        workers,
        window_size: Duration::from_secs(10),
        slide: Duration::from_secs(5),
        lateness: Duration::ZERO,
        tick: Duration::from_millis(10),
        publish_retry: RetryPolicy::immediate(3),
        reconnect_retry: RetryPolicy::immediate(3),
        channel_capacity: 64,
        ..PipelineConfig::default()
    }
}
