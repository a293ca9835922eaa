//! Generation-stamped visited set for graph traversal.
//!
//! `clear()` bumps a generation counter instead of zeroing the array; the
//! array is only wiped when the `u16` counter wraps.

#[derive(Debug)]
pub(crate) struct VisitedSet {
    stamps: Vec<u16>,
    generation: u16,
}

impl VisitedSet {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            stamps: vec![0u16; capacity],
            generation: 1,
        }
    }

    pub(crate) fn clear(&mut self) {
        if self.generation == u16::MAX {
            self.stamps.fill(0);
            self.generation = 1;
        } else {
            self.generation += 1;
        }
    }

    pub(crate) fn ensure_capacity(&mut self, capacity: usize) {
        if capacity > self.stamps.len() {
            self.stamps.resize(capacity, 0);
        }
    }

    /// Returns `true` if `id` had not been visited since the last clear.
    #[inline]
    pub(crate) fn insert(&mut self, id: u32) -> bool {
        let slot = &mut self.stamps[id as usize];
        if *slot == self.generation {
            false
        } else {
            *slot = self.generation;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_clear() {
        let mut vs = VisitedSet::new(8);
        assert!(vs.insert(3));
        assert!(!vs.insert(3));
        vs.clear();
        assert!(vs.insert(3));
    }

    #[test]
    fn test_generation_wraps() {
        let mut vs = VisitedSet::new(4);
        for _ in 0..65534 {
            vs.clear();
        }
        assert_eq!(vs.generation, u16::MAX);
        vs.insert(1);
        vs.clear();
        assert_eq!(vs.generation, 1);
        assert!(vs.insert(1));
    }

    #[test]
    fn test_ensure_capacity_grows() {
        let mut vs = VisitedSet::new(0);
        vs.ensure_capacity(5);
        assert!(vs.insert(4));
    }
}
