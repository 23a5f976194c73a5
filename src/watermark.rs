//! Processing-time watermark for one partition.
//!
//! The watermark trails the highest processing time observed by the lateness
//! tolerance and never moves backwards. A window may be finalized once the
//! watermark reaches its end; an event whose processing time is already below
//! the watermark is *late* and no longer joins any window.

use crate::event::Event;
use crate::window::{TimestampMs, Window};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WatermarkTracker {
    lateness_ms: i64,
    max_observed: Option<TimestampMs>,
}

impl WatermarkTracker {
    pub fn new(lateness: Duration) -> Self {
        Self {
            lateness_ms: i64::try_from(lateness.as_millis()).unwrap_or(i64::MAX),
            max_observed: None,
        }
    }

    /// Record an observed processing time and return the resulting watermark.
    ///
    /// Observations older than the current maximum leave the watermark unchanged.
    pub fn advance(&mut self, observed: TimestampMs) -> TimestampMs {
        let max = self.max_observed.map_or(observed, |m| m.max(observed));
        self.max_observed = Some(max);
        max.saturating_sub(self.lateness_ms)
    }

    /// Current watermark, `None` until the first observation.
    pub fn current(&self) -> Option<TimestampMs> {
        self.max_observed.map(|m| m.saturating_sub(self.lateness_ms))
    }

    /// Highest processing time observed so far.
    pub fn max_observed(&self) -> Option<TimestampMs> {
        self.max_observed
    }

    pub fn is_late(&self, event: &Event) -> bool {
        self.current().is_some_and(|wm| event.processing_timestamp < wm)
    }

    /// True once the watermark has reached the window's end.
    pub fn is_closable(&self, window: &Window) -> bool {
        self.current().is_some_and(|wm| wm >= window.end)
    }
}
