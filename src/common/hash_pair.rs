use std::hash::{BuildHasher, Hash, Hasher};

use rand::Rng;

/// The geometry of one table generation: how many buckets each of the two
/// tables has, the salts mixed into the two hash functions, and how many
/// displacement rounds an insertion may spend before the table is grown.
///
/// A `HashPair` never changes once created. Growing a table produces a new
/// generation through [`HashPair::grow`], which doubles the capacity and the
/// displacement budget and draws fresh salts. Reusing the old salts would only
/// change the modulus, which tends to reproduce the displacement cycle that
/// forced the resize in the first place.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct HashPair {
    capacity: usize,
    salts: [u64; 2],
    max_displacements: usize,
}

impl HashPair {
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(capacity > 0);

        Self {
            capacity,
            salts: fresh_salts(),
            max_displacements: (capacity / 2).max(1),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_salts(capacity: usize, salts: [u64; 2]) -> Self {
        Self {
            salts,
            ..Self::new(capacity)
        }
    }

    /// Returns the next generation.
    pub(crate) fn grow(&self) -> Self {
        Self {
            capacity: self.capacity * 2,
            salts: fresh_salts(),
            max_displacements: self.max_displacements * 2,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn max_displacements(&self) -> usize {
        self.max_displacements
    }

    /// Returns the bucket position of a value with the given full hash in
    /// `table` (0 or 1).
    #[inline]
    pub(crate) fn position(&self, table: usize, hash: u64) -> usize {
        ((hash ^ self.salts[table]) % self.capacity as u64) as usize
    }

    #[inline]
    pub(crate) fn positions(&self, hash: u64) -> [usize; 2] {
        [self.position(0, hash), self.position(1, hash)]
    }
}

pub(crate) fn hash<Q, S>(build_hasher: &S, value: &Q) -> u64
where
    Q: ?Sized + Hash,
    S: BuildHasher,
{
    let mut hasher = build_hasher.build_hasher();
    value.hash(&mut hasher);

    hasher.finish()
}

fn fresh_salts() -> [u64; 2] {
    let mut rng = rand::thread_rng();
    [rng.gen(), rng.gen()]
}

#[cfg(test)]
mod tests {
    use super::HashPair;

    #[test]
    fn positions_stay_in_range() {
        let pair = HashPair::new(13);

        for h in (0..10_000u64).map(|i| i.wrapping_mul(0x9e37_79b9_7f4a_7c15)) {
            let [p0, p1] = pair.positions(h);
            assert!(p0 < 13);
            assert!(p1 < 13);
        }
    }

    #[test]
    fn salts_select_different_buckets() {
        let pair = HashPair::with_salts(16, [0, 0b1010]);

        assert_eq!(pair.position(0, 1), 1);
        assert_eq!(pair.position(1, 1), 11);
        // Values that agree in the low bits collide in both tables.
        assert_eq!(pair.positions(1), pair.positions(17));
        assert_eq!(pair.positions(17), pair.positions(33));
    }

    #[test]
    fn grow_doubles_capacity_and_budget() {
        let pair = HashPair::new(16);
        assert_eq!(pair.max_displacements(), 8);

        let next = pair.grow();
        assert_eq!(next.capacity(), 32);
        assert_eq!(next.max_displacements(), 16);

        let next = next.grow();
        assert_eq!(next.capacity(), 64);
        assert_eq!(next.max_displacements(), 32);
    }

    #[test]
    fn tiny_tables_still_displace() {
        assert_eq!(HashPair::new(1).max_displacements(), 1);
        assert_eq!(HashPair::new(1).grow().max_displacements(), 2);
    }
}
