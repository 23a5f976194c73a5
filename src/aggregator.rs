//! Sliding-window deduplication.
//!
//! Events are assigned to every processing-time window that contains them. Each
//! window keeps, per slot, only the event that currently wins the
//! latest-event-wins ordering ([`precedence`]), which yields the same result as
//! buffering every event and selecting the maximum at close time while keeping
//! memory proportional to the number of distinct slots.
//!
//! A window exists only once an event has landed in it, so closing never
//! produces empty output.

use crate::event::Event;
use crate::window::{TimestampMs, Window};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Total order used to pick the authoritative event of a slot within a window.
///
/// Higher logical timestamp wins, then later processing timestamp, then the
/// lexicographically greater plate and status code so that the choice is
/// reproducible.
pub fn precedence(a: &Event, b: &Event) -> Ordering {
    a.logical_timestamp
        .cmp(&b.logical_timestamp)
        .then(a.processing_timestamp.cmp(&b.processing_timestamp))
        .then_with(|| a.plate_id.cmp(&b.plate_id))
        .then_with(|| a.status_code.as_str().cmp(b.status_code.as_str()))
}

#[derive(Debug, Default)]
struct WindowBuffer {
    latest: HashMap<String, Event>,
    buffered: usize,
}

/// Output of one finalized window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedWindow {
    pub window: Window,
    /// One event per slot seen in the window, sorted by slot.
    pub latest: Vec<Event>,
    /// Number of events that were assigned to the window.
    pub buffered: usize,
}

#[derive(Debug)]
pub struct WindowedAggregator {
    size_ms: i64,
    slide_ms: i64,
    open: BTreeMap<Window, WindowBuffer>,
}

impl WindowedAggregator {
    /// `size` and `slide` are truncated to whole milliseconds and clamped to at least 1 ms.
    pub fn new(size: Duration, slide: Duration) -> Self {
        let to_ms = |d: Duration| i64::try_from(d.as_millis()).unwrap_or(i64::MAX).max(1);
        Self {
            size_ms: to_ms(size),
            slide_ms: to_ms(slide),
            open: BTreeMap::new(),
        }
    }

    /// Assign `event` to every window containing its processing timestamp.
    pub fn insert(&mut self, event: Event) {
        for window in Window::sliding(event.processing_timestamp, self.size_ms, self.slide_ms) {
            let buf = self.open.entry(window).or_default();
            buf.buffered += 1;
            match buf.latest.get_mut(&event.slot_id) {
                Some(current) if precedence(&event, current) == Ordering::Greater => {
                    *current = event.clone();
                }
                Some(_) => {}
                None => {
                    buf.latest.insert(event.slot_id.clone(), event.clone());
                }
            }
        }
    }

    /// Finalize every window whose end is at or before `watermark`, in end order.
    pub fn close_ready(&mut self, watermark: TimestampMs) -> Vec<ClosedWindow> {
        let mut closed = Vec::new();
        while let Some(entry) = self.open.first_entry() {
            if entry.key().end > watermark {
                break;
            }
            let (window, buf) = entry.remove_entry();
            closed.push(Self::finish(window, buf));
        }
        closed
    }

    /// Finalize every open window regardless of the watermark.
    pub fn flush(&mut self) -> Vec<ClosedWindow> {
        std::mem::take(&mut self.open)
            .into_iter()
            .map(|(window, buf)| Self::finish(window, buf))
            .collect()
    }

    pub fn open_windows(&self) -> usize {
        self.open.len()
    }

    /// Earliest end among open windows.
    pub fn next_close(&self) -> Option<TimestampMs> {
        self.open.keys().next().map(|w| w.end)
    }

    fn finish(window: Window, buf: WindowBuffer) -> ClosedWindow {
        let mut latest: Vec<Event> = buf.latest.into_values().collect();
        latest.sort_by(|a, b| a.slot_id.cmp(&b.slot_id));
        ClosedWindow {
            window,
            latest,
            buffered: buf.buffered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StatusCode;

    fn ev(slot: &str, plate: &str, code: StatusCode, logical: i64, proc_ms: i64) -> Event {
        Event::new(slot, plate, code, logical, proc_ms)
    }

    fn agg() -> WindowedAggregator {
        WindowedAggregator::new(Duration::from_millis(50), Duration::from_millis(10))
    }

    #[test]
    fn highest_logical_timestamp_wins() {
        let mut a = WindowedAggregator::new(Duration::from_millis(50), Duration::from_millis(50));
        a.insert(ev("A1", "p", StatusCode::Parked, 20, 1));
        a.insert(ev("A1", "p", StatusCode::Entering, 10, 2));
        let closed = a.close_ready(50);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].latest[0].logical_timestamp, 20);
        assert_eq!(closed[0].buffered, 2);
    }

    #[test]
    fn ties_break_on_processing_then_plate() {
        let a = ev("A1", "aaa", StatusCode::Parked, 5, 10);
        let b = ev("A1", "aaa", StatusCode::Parked, 5, 11);
        let c = ev("A1", "zzz", StatusCode::Parked, 5, 11);
        assert_eq!(precedence(&b, &a), Ordering::Greater);
        assert_eq!(precedence(&c, &b), Ordering::Greater);
        assert_eq!(precedence(&c, &c), Ordering::Equal);
    }

    #[test]
    fn event_joins_all_overlapping_windows() {
        let mut a = agg();
        a.insert(ev("A1", "p", StatusCode::Parked, 1, 125));
        assert_eq!(a.open_windows(), 5);
        assert_eq!(a.next_close(), Some(130));
    }

    #[test]
    fn closes_in_end_order_up_to_watermark() {
        let mut a = agg();
        a.insert(ev("A1", "p", StatusCode::Parked, 1, 125));
        let ends: Vec<_> = a.close_ready(150).iter().map(|c| c.window.end).collect();
        assert_eq!(ends, vec![130, 140, 150]);
        assert_eq!(a.open_windows(), 2);
        assert!(a.close_ready(150).is_empty());
    }

    #[test]
    fn keys_are_reported_per_window_sorted() {
        let mut a = WindowedAggregator::new(Duration::from_millis(10), Duration::from_millis(10));
        a.insert(ev("B2", "p2", StatusCode::Parked, 1, 1));
        a.insert(ev("A1", "p1", StatusCode::Parked, 1, 2));
        a.insert(ev("C3", "p3", StatusCode::Parked, 1, 15));
        let closed = a.flush();
        assert_eq!(closed.len(), 2);
        let first: Vec<_> = closed[0].latest.iter().map(|e| e.slot_id.as_str()).collect();
        assert_eq!(first, vec!["A1", "B2"]);
        assert_eq!(closed[1].latest[0].slot_id, "C3");
        assert_eq!(a.open_windows(), 0);
    }

    #[test]
    fn nothing_to_close_without_events() {
        let mut a = agg();
        assert!(a.close_ready(i64::MAX).is_empty());
        assert!(a.flush().is_empty());
    }
}
