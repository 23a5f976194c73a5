//! Vehicle lifecycle generator.
//!
//! Each simulated vehicle walks ENTERING → PARKED (for a random number of
//! steps) → MOVING → EXITING, after which it is replaced by a new vehicle on
//! a free slot. The slot is released as soon as the vehicle starts exiting;
//! the plate stays reserved until the vehicle is gone.

use crate::event::{Event, StatusCode};
use crate::registry::{Allocation, SlotRegistry};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
struct Vehicle {
    allocation: Allocation,
    status: StatusCode,
    dwell: u32,
    parked_for: u32,
}

impl Vehicle {
    fn new(allocation: Allocation) -> Self {
        Self {
            allocation,
            status: StatusCode::Entering,
            dwell: 0,
            parked_for: 0,
        }
    }
}

pub struct Simulator {
    registry: SlotRegistry,
    vehicles: Vec<Vehicle>,
    rng: StdRng,
    min_vehicles: usize,
    max_vehicles: usize,
}

impl Simulator {
    /// Deterministic generator over `registry`, starting with five vehicles.
    pub fn new(registry: SlotRegistry, seed: u64) -> Self {
        let mut sim = Self {
            registry,
            vehicles: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
            min_vehicles: 3,
            max_vehicles: 8,
        };
        for _ in 0..5 {
            sim.admit();
        }
        sim
    }

    pub fn registry(&self) -> &SlotRegistry {
        &self.registry
    }

    pub fn active_vehicles(&self) -> usize {
        self.vehicles.len()
    }

    fn admit(&mut self) -> bool {
        match self.registry.allocate(&mut self.rng) {
            Some(a) => {
                self.vehicles.push(Vehicle::new(a));
                true
            }
            None => false,
        }
    }

    /// Produce the next event at `logical_secs`, stamped `processing_ms`.
    ///
    /// Returns `None` only when the lot has no vehicles and nothing can be admitted.
    pub fn next_event(&mut self, logical_secs: i64, processing_ms: i64) -> Option<Event> {
        while self.vehicles.len() < self.min_vehicles && self.admit() {}
        if self.vehicles.is_empty() {
            return None;
        }

        let idx = self.rng.gen_range(0..self.vehicles.len());
        let v = &self.vehicles[idx];
        let event = Event::new(
            v.allocation.slot_id.clone(),
            v.allocation.plate_id.clone(),
            v.status.clone(),
            logical_secs,
            processing_ms,
        );
        self.step(idx);

        if self.vehicles.len() < self.max_vehicles && self.rng.gen_bool(0.4) && self.registry.has_capacity() {
            self.admit();
        }
        if self.rng.gen_bool(0.5) {
            self.remove_exited();
        }
        Some(event)
    }

    fn step(&mut self, idx: usize) {
        let dwell = self.rng.gen_range(20..=200);
        let v = &mut self.vehicles[idx];
        match v.status {
            StatusCode::Entering => {
                v.status = StatusCode::Parked;
                v.dwell = dwell;
                v.parked_for = 0;
            }
            StatusCode::Parked => {
                v.parked_for += 1;
                if v.parked_for >= v.dwell {
                    v.status = StatusCode::Moving;
                }
            }
            StatusCode::Moving => {
                v.status = StatusCode::Exiting;
                let slot = v.allocation.slot_id.clone();
                self.registry.release_slot(&slot);
            }
            StatusCode::Exiting | StatusCode::Unrecognized(_) => {
                let old = self.vehicles.swap_remove(idx);
                self.registry.release_plate(&old.allocation.plate_id);
                self.admit();
            }
        }
    }

    fn remove_exited(&mut self) {
        let (gone, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.vehicles)
            .into_iter()
            .partition(|v| v.status == StatusCode::Exiting);
        // the slot was already released when the vehicle started exiting
        for v in gone {
            self.registry.release_plate(&v.allocation.plate_id);
        }
        self.vehicles = kept;
    }
}

/// Generate `count` events one `step_secs` apart starting at `start_secs`,
/// with processing time equal to logical time.
pub fn generate(sim: &mut Simulator, count: usize, start_secs: i64, step_secs: i64) -> Vec<Event> {
    (0..count)
        .map_while(|i| {
            let t = start_secs + step_secs * i64::try_from(i).unwrap_or(i64::MAX);
            sim.next_event(t, t.saturating_mul(1_000))
        })
        .collect()
}
