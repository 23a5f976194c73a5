//! Allocation of free slots and unused plates for generated traffic.
//!
//! The event generator must never place two vehicles on the same slot or hand
//! the same plate to two vehicles at once. [`SlotRegistry`] owns both sets and
//! is passed explicitly to whoever needs it.

use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::BTreeSet;

/// Plates used by the default lot.
pub const DEFAULT_PLATES: &[&str] = &[
    "29A-12345", "29A-54321", "29A-67890", "29A-11111", "29A-99999", "30B-12345", "30B-67890",
    "30B-33333", "30B-88888", "30B-55555", "51C-11111", "51C-22222", "51C-44444", "51C-77777",
    "51C-12121", "59D-98765", "59D-45678", "59D-13579", "59D-24680", "59D-86420", "79D-99999",
    "79D-10101", "79D-20202", "79D-30303", "79D-40404", "92E-54321", "92E-65432", "92E-76543",
    "92E-87654", "92E-98765", "15F-88888", "15F-11122", "15F-33344", "15F-55566", "15F-77788",
    "43G-22222", "43G-12389", "43G-45612", "43G-78945", "43G-32165", "60H-10203", "60H-40506",
    "60H-70809", "60H-20406", "60H-50810",
];

/// A slot and plate handed out together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub slot_id: String,
    pub plate_id: String,
}

#[derive(Debug, Clone)]
pub struct SlotRegistry {
    slots: Vec<String>,
    plates: Vec<String>,
    occupied: BTreeSet<String>,
    active_plates: BTreeSet<String>,
}

impl SlotRegistry {
    pub fn new<S, P>(slots: impl IntoIterator<Item = S>, plates: impl IntoIterator<Item = P>) -> Self
    where
        S: Into<String>,
        P: Into<String>,
    {
        Self {
            slots: slots.into_iter().map(Into::into).collect(),
            plates: plates.into_iter().map(Into::into).collect(),
            occupied: BTreeSet::new(),
            active_plates: BTreeSet::new(),
        }
    }

    /// Six levels `A`..`F` of ten slots each, with [`DEFAULT_PLATES`].
    pub fn default_lot() -> Self {
        let slots = ['A', 'B', 'C', 'D', 'E', 'F']
            .into_iter()
            .flat_map(|level| (1..=10).map(move |n| format!("{level}{n}")));
        Self::new(slots, DEFAULT_PLATES.iter().copied())
    }

    /// Pick a random free slot and unused plate and mark both taken.
    ///
    /// Returns `None` when the lot is full or every plate is in use.
    pub fn allocate<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Allocation> {
        let free: Vec<&String> = self.slots.iter().filter(|s| !self.occupied.contains(*s)).collect();
        let unused: Vec<&String> = self
            .plates
            .iter()
            .filter(|p| !self.active_plates.contains(*p))
            .collect();
        let slot_id = (*free.choose(&mut *rng)?).clone();
        let plate_id = (*unused.choose(&mut *rng)?).clone();
        self.occupied.insert(slot_id.clone());
        self.active_plates.insert(plate_id.clone());
        Some(Allocation { slot_id, plate_id })
    }

    pub fn release_slot(&mut self, slot_id: &str) {
        self.occupied.remove(slot_id);
    }

    pub fn release_plate(&mut self, plate_id: &str) {
        self.active_plates.remove(plate_id);
    }

    pub fn release(&mut self, allocation: &Allocation) {
        self.release_slot(&allocation.slot_id);
        self.release_plate(&allocation.plate_id);
    }

    pub fn is_occupied(&self, slot_id: &str) -> bool {
        self.occupied.contains(slot_id)
    }

    pub fn occupied_count(&self) -> usize {
        self.occupied.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// True while at least one slot and one plate are free.
    pub fn has_capacity(&self) -> bool {
        self.occupied.len() < self.slots.len() && self.active_plates.len() < self.plates.len()
    }

    pub fn slots(&self) -> &[String] {
        &self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn default_lot_has_sixty_slots() {
        let reg = SlotRegistry::default_lot();
        assert_eq!(reg.capacity(), 60);
        assert_eq!(reg.slots()[0], "A1");
        assert_eq!(reg.slots()[59], "F10");
    }

    #[test]
    fn never_double_allocates() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut reg = SlotRegistry::new(["A1", "A2", "A3"], ["p1", "p2", "p3", "p4"]);
        let got: Vec<_> = std::iter::from_fn(|| reg.allocate(&mut rng)).collect();
        assert_eq!(got.len(), 3);
        let slots: BTreeSet<_> = got.iter().map(|a| a.slot_id.clone()).collect();
        let plates: BTreeSet<_> = got.iter().map(|a| a.plate_id.clone()).collect();
        assert_eq!(slots.len(), 3);
        assert_eq!(plates.len(), 3);
        assert!(!reg.has_capacity());
    }

    #[test]
    fn released_slot_can_be_reused() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut reg = SlotRegistry::new(["A1"], ["p1", "p2"]);
        let first = reg.allocate(&mut rng).unwrap();
        assert!(reg.allocate(&mut rng).is_none());
        reg.release_slot(&first.slot_id);
        let second = reg.allocate(&mut rng).unwrap();
        assert_eq!(second.slot_id, "A1");
        assert_ne!(second.plate_id, first.plate_id);
    }
}
