use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Milliseconds since UNIX epoch (UTC).
pub type TimestampMs = i64;

/// A closed-open processing-time range: [start, end).
#[derive(Copy, Clone, Debug, Serialize, Deserialize, Eq)]
pub struct Window {
    pub start: TimestampMs,
    pub end: TimestampMs,
}

impl Window {
    #[inline]
    pub fn new(start: TimestampMs, end: TimestampMs) -> Self {
        debug_assert!(end >= start);
        Self { start, end }
    }

    /// Compute the tumbling window [win_start, win_start + size) for a timestamp.
    /// `size_ms` > 0; `offset_ms` may be negative or positive.
    #[inline]
    pub fn tumble(ts: TimestampMs, size_ms: i64, offset_ms: i64) -> Self {
        debug_assert!(size_ms > 0);
        // normalized position relative to offset
        let rel = ts - offset_ms;
        // floor division that handles negative timestamps correctly
        let k = div_floor(rel, size_ms);
        let win_start = k * size_ms + offset_ms;
        Self { start: win_start, end: win_start + size_ms }
    }

    /// Every sliding window of `size_ms` advancing by `slide_ms` that contains `ts`,
    /// earliest start first.
    ///
    /// Window starts are aligned to multiples of `slide_ms` since the epoch, so a
    /// timestamp belongs to `size_ms / slide_ms` windows when the slide divides the
    /// size evenly. With `slide_ms == size_ms` this degenerates to [`Window::tumble`].
    pub fn sliding(ts: TimestampMs, size_ms: i64, slide_ms: i64) -> Vec<Self> {
        debug_assert!(size_ms > 0 && slide_ms > 0);
        let mut start = Self::tumble(ts, slide_ms, 0).start;
        let mut out = Vec::with_capacity(usize::try_from(size_ms / slide_ms).unwrap_or(1).max(1));
        while start > ts - size_ms {
            out.push(Self { start, end: start + size_ms });
            start -= slide_ms;
        }
        out.reverse();
        out
    }

    #[inline]
    pub fn contains(&self, ts: TimestampMs) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// Floor division for i64 (unlike `/` which truncates toward zero).
#[inline]
fn div_floor(a: i64, b: i64) -> i64 {
    let q = a / b;
    let r = a % b;
    if (r != 0) && ((r > 0) != (b > 0)) { q - 1 } else { q }
}

// Hash/Ord so Windows can be used as keys and sorted deterministically.
impl PartialEq for Window {
    #[inline] fn eq(&self, other: &Self) -> bool { self.start == other.start && self.end == other.end }
}
impl Hash for Window {
    #[inline] fn hash<H: Hasher>(&self, state: &mut H) { self.start.hash(state); self.end.hash(state); }
}
// Windows close in order of their end, so `end` leads the ordering.
impl Ord for Window {
    #[inline] fn cmp(&self, o: &Self) -> std::cmp::Ordering {
        self.end.cmp(&o.end).then(self.start.cmp(&o.start))
    }
}
impl PartialOrd for Window {
    #[inline] fn partial_cmp(&self, o: &Self) -> Option<std::cmp::Ordering> { Some(self.cmp(o)) }
}
