//! Per-slot occupancy state and its transition function.
//!
//! [`transition`] is pure: it takes the current state (if any) and an
//! aggregated event and returns the next state without mutating anything.
//! [`StateStore`] owns the states of one partition and is the only place they
//! are written.

use crate::event::{Event, StatusCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotStatus {
    Occupied,
    Empty,
    Unknown,
}

impl SlotStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Occupied => "OCCUPIED",
            Self::Empty => "EMPTY",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Occupancy of a single slot.
///
/// `entry_logical_timestamp` is `Some` exactly when `status` is
/// [`SlotStatus::Occupied`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlotState {
    pub slot_id: String,
    pub status: SlotStatus,
    pub plate_id: String,
    pub entry_logical_timestamp: Option<i64>,
    pub last_logical_timestamp: i64,
    pub last_update_wall_time: DateTime<Utc>,
}

impl SlotState {
    /// Same occupancy, ignoring the wall-clock bookkeeping.
    fn same_occupancy(&self, other: &Self) -> bool {
        self.status == other.status
            && self.plate_id == other.plate_id
            && self.entry_logical_timestamp == other.entry_logical_timestamp
            && self.last_logical_timestamp == other.last_logical_timestamp
    }
}

/// Result of offering an event to a slot.
#[derive(Clone, Debug, PartialEq)]
pub enum Transition {
    /// The event was accepted. `changed` is false when it replayed what the
    /// state already reflected.
    Applied { state: SlotState, changed: bool },
    /// The event is older than what the slot has already seen.
    Stale { last_logical_timestamp: i64 },
}

/// Compute the next state of a slot for `event`.
///
/// Events with a logical timestamp lower than the slot's last accepted one are
/// rejected. The entry time of an occupancy episode is the first occupying
/// event's timestamp; later ENTERING/PARKED/MOVING events keep it.
pub fn transition(current: Option<&SlotState>, event: &Event, now: DateTime<Utc>) -> Transition {
    if let Some(cur) = current
        && event.logical_timestamp < cur.last_logical_timestamp
    {
        return Transition::Stale {
            last_logical_timestamp: cur.last_logical_timestamp,
        };
    }

    let prior_entry = current
        .filter(|c| c.status == SlotStatus::Occupied)
        .and_then(|c| c.entry_logical_timestamp);

    let (status, entry) = match &event.status_code {
        code if code.is_occupying() => (
            SlotStatus::Occupied,
            Some(prior_entry.unwrap_or(event.logical_timestamp)),
        ),
        StatusCode::Exiting => (SlotStatus::Empty, None),
        _ => (SlotStatus::Unknown, None),
    };

    let next = SlotState {
        slot_id: event.slot_id.clone(),
        status,
        plate_id: event.plate_id.clone(),
        entry_logical_timestamp: entry,
        last_logical_timestamp: event.logical_timestamp,
        last_update_wall_time: now,
    };
    let changed = current.is_none_or(|cur| !cur.same_occupancy(&next));
    Transition::Applied { state: next, changed }
}

/// States of every slot owned by one partition.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    slots: HashMap<String, SlotState>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from previously captured states.
    pub fn from_states(states: impl IntoIterator<Item = SlotState>) -> Self {
        Self {
            slots: states.into_iter().map(|s| (s.slot_id.clone(), s)).collect(),
        }
    }

    pub fn get(&self, slot_id: &str) -> Option<&SlotState> {
        self.slots.get(slot_id)
    }

    /// Offer `event` to its slot and store the result when it changed the slot.
    ///
    /// A replay leaves the stored state untouched, `last_update_wall_time`
    /// included, and reports that stored state back.
    pub fn apply(&mut self, event: &Event, now: DateTime<Utc>) -> Transition {
        match transition(self.slots.get(&event.slot_id), event, now) {
            Transition::Applied { state, changed: true } => {
                self.slots.insert(state.slot_id.clone(), state.clone());
                Transition::Applied { state, changed: true }
            }
            Transition::Applied { state, changed: false } => {
                let state = self.slots.get(&state.slot_id).cloned().unwrap_or(state);
                Transition::Applied { state, changed: false }
            }
            stale => stale,
        }
    }

    /// True if `event` is strictly newer than anything the slot has accepted,
    /// or the slot has never been seen.
    pub fn is_newer(&self, event: &Event) -> bool {
        self.get(&event.slot_id)
            .is_none_or(|s| event.logical_timestamp > s.last_logical_timestamp)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// All states, sorted by slot.
    pub fn snapshot(&self) -> Vec<SlotState> {
        let mut v: Vec<SlotState> = self.slots.values().cloned().collect();
        v.sort_by(|a, b| a.slot_id.cmp(&b.slot_id));
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(code: StatusCode, ts: i64) -> Event {
        Event::new("A1", "29A-12345", code, ts, 0)
    }

    fn applied(t: Transition) -> (SlotState, bool) {
        match t {
            Transition::Applied { state, changed } => (state, changed),
            Transition::Stale { .. } => panic!("expected an applied transition"),
        }
    }

    #[test]
    fn entering_occupies_and_sets_entry() {
        let (s, changed) = applied(transition(None, &ev(StatusCode::Entering, 1000), Utc::now()));
        assert!(changed);
        assert_eq!(s.status, SlotStatus::Occupied);
        assert_eq!(s.entry_logical_timestamp, Some(1000));
    }

    #[test]
    fn first_seen_entry_wins_within_episode() {
        let (s, _) = applied(transition(None, &ev(StatusCode::Entering, 1000), Utc::now()));
        let (s, _) = applied(transition(Some(&s), &ev(StatusCode::Parked, 1100), Utc::now()));
        let (s, _) = applied(transition(Some(&s), &ev(StatusCode::Moving, 1200), Utc::now()));
        assert_eq!(s.entry_logical_timestamp, Some(1000));
        assert_eq!(s.last_logical_timestamp, 1200);
    }

    #[test]
    fn exiting_clears_entry_keeps_plate() {
        let (s, _) = applied(transition(None, &ev(StatusCode::Parked, 1000), Utc::now()));
        let (s, _) = applied(transition(Some(&s), &ev(StatusCode::Exiting, 1300), Utc::now()));
        assert_eq!(s.status, SlotStatus::Empty);
        assert_eq!(s.entry_logical_timestamp, None);
        assert_eq!(s.plate_id, "29A-12345");
    }

    #[test]
    fn new_episode_after_exit_gets_fresh_entry() {
        let (s, _) = applied(transition(None, &ev(StatusCode::Entering, 1000), Utc::now()));
        let (s, _) = applied(transition(Some(&s), &ev(StatusCode::Exiting, 1100), Utc::now()));
        let (s, _) = applied(transition(Some(&s), &ev(StatusCode::Entering, 1500), Utc::now()));
        assert_eq!(s.entry_logical_timestamp, Some(1500));
    }

    #[test]
    fn unrecognized_code_is_unknown_never_occupied() {
        let (s, _) = applied(transition(None, &ev(StatusCode::Unrecognized("TOWED".into()), 5), Utc::now()));
        assert_eq!(s.status, SlotStatus::Unknown);
        assert_eq!(s.entry_logical_timestamp, None);
    }

    #[test]
    fn older_event_is_stale() {
        let (s, _) = applied(transition(None, &ev(StatusCode::Parked, 2000), Utc::now()));
        assert_eq!(
            transition(Some(&s), &ev(StatusCode::Moving, 1500), Utc::now()),
            Transition::Stale { last_logical_timestamp: 2000 }
        );
    }

    #[test]
    fn replay_is_applied_without_change() {
        let mut store = StateStore::new();
        let e = ev(StatusCode::Parked, 2000);
        store.apply(&e, Utc::now());
        let before = store.get("A1").cloned().unwrap();
        let (after, changed) = applied(store.apply(&e, Utc::now()));
        assert!(!changed);
        assert!(after.same_occupancy(&before));
    }

    #[test]
    fn replay_keeps_the_stored_wall_time() {
        let mut store = StateStore::new();
        let e = ev(StatusCode::Parked, 2000);
        let first = DateTime::from_timestamp(10_000, 0).unwrap();
        let later = DateTime::from_timestamp(20_000, 0).unwrap();
        store.apply(&e, first);
        let (after, _) = applied(store.apply(&e, later));
        assert_eq!(after.last_update_wall_time, first);
        assert_eq!(store.get("A1").map(|s| s.last_update_wall_time), Some(first));

        store.apply(&ev(StatusCode::Exiting, 2100), later);
        assert_eq!(store.get("A1").map(|s| s.last_update_wall_time), Some(later));
    }

    #[test]
    fn newer_check_is_strict() {
        let mut store = StateStore::new();
        let e = ev(StatusCode::Parked, 2000);
        assert!(store.is_newer(&e));
        store.apply(&e, Utc::now());
        assert!(!store.is_newer(&e));
        assert!(store.is_newer(&ev(StatusCode::Parked, 2001)));
    }
}
