//! Fixed-capacity SN-indexed storage
//! 
//! One slot per sequence number of the SN space. Capacity is fixed at
//! construction, so a slot can never hold two PDUs for the same SN.

use super::sn::Sn;

/// Storage with exactly one slot per SN
#[derive(Debug)]
pub struct SnSlots<T> {
    slots: Vec<Option<T>>,
    occupied: usize,
}

impl<T> SnSlots<T> {
    /// Create storage for an SN space of `modulus` numbers
    pub fn new(modulus: u16) -> Self {
        let mut slots = Vec::with_capacity(modulus as usize);
        slots.resize_with(modulus as usize, || None);
        Self { slots, occupied: 0 }
    }

    pub fn get(&self, sn: Sn) -> Option<&T> {
        self.slots.get(sn as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, sn: Sn) -> Option<&mut T> {
        self.slots.get_mut(sn as usize).and_then(Option::as_mut)
    }

    pub fn contains(&self, sn: Sn) -> bool {
        self.get(sn).is_some()
    }

    /// Store `value` at `sn`, returning the previous occupant
    pub fn insert(&mut self, sn: Sn, value: T) -> Option<T> {
        let old = self.slots[sn as usize].replace(value);
        if old.is_none() {
            self.occupied += 1;
        }
        old
    }

    pub fn remove(&mut self, sn: Sn) -> Option<T> {
        let old = self.slots.get_mut(sn as usize).and_then(Option::take);
        if old.is_some() {
            self.occupied -= 1;
        }
        old
    }

    /// Slot at `sn`, filled with `f()` when empty
    pub fn get_or_insert_with(&mut self, sn: Sn, f: impl FnOnce() -> T) -> &mut T {
        let slot = &mut self.slots[sn as usize];
        if slot.is_none() {
            self.occupied += 1;
        }
        slot.get_or_insert_with(f)
    }

    pub fn len(&self) -> usize {
        self.occupied
    }

    /// Occupied slots in SN order
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.occupied = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_occupancy() {
        let mut slots = SnSlots::new(8);
        assert!(slots.is_empty());
        assert_eq!(slots.insert(3, "a"), None);
        assert_eq!(slots.insert(3, "b"), Some("a"));
        assert_eq!(slots.len(), 1);
        *slots.get_or_insert_with(7, || "c") = "d";
        assert_eq!(slots.get(7), Some(&"d"));
        assert_eq!(slots.remove(3), Some("b"));
        assert_eq!(slots.remove(3), None);
        assert_eq!(slots.len(), 1);
        slots.insert(1, "e");
        assert_eq!(slots.values().copied().collect::<Vec<_>>(), vec!["e", "d"]);
        slots.clear();
        assert!(slots.is_empty());
        assert!(!slots.contains(7));
    }
}
