//! A single-threaded cuckoo hash set.

use crate::{
    common::{
        entry::Entry,
        hash_pair::{self, HashPair},
        DEFAULT_INITIAL_CAPACITY,
    },
    CuckooSet, SetBuilder,
};

use std::{
    borrow::Borrow,
    collections::hash_map::RandomState,
    fmt,
    hash::{BuildHasher, Hash},
    iter, mem,
};

type Table<T> = Box<[Option<Entry<T>>]>;

/// A cuckoo hash set that is _not_ thread-safe.
///
/// Each bucket holds at most one value. An insertion places its value in the
/// first table; if the bucket is taken, the occupant is evicted to its bucket
/// in the second table, whose occupant is in turn evicted back to the first
/// table, and so on. After `capacity / 2` rounds without finding a free bucket
/// (the budget doubles with every resize) the tables are doubled and
/// re-salted, and every value is rehashed through the same displacement
/// routine.
///
/// `remove` and `contains` look at exactly two buckets.
///
/// # Examples
///
/// ```rust
/// use cuckoo_set::SequentialSet;
///
/// let mut set = SequentialSet::with_capacity(16);
///
/// assert!(set.add(1));
/// assert!(set.add(17));
/// assert!(set.add(33));
/// assert!(!set.add(17));
///
/// assert_eq!(set.size(), 3);
/// assert!(set.contains(&17));
///
/// assert!(set.remove(&17));
/// assert!(!set.contains(&17));
/// assert_eq!(set.populate(vec![2, 3, 3]), 2);
/// ```
pub struct SequentialSet<T, S = RandomState> {
    tables: [Table<T>; 2],
    hash_pair: HashPair,
    len: usize,
    build_hasher: S,
}

impl<T> SequentialSet<T, RandomState>
where
    T: Hash + Eq,
{
    /// Creates an empty set with [`DEFAULT_INITIAL_CAPACITY`] buckets per
    /// table.
    ///
    /// [`DEFAULT_INITIAL_CAPACITY`]: ../constant.DEFAULT_INITIAL_CAPACITY.html
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_INITIAL_CAPACITY)
    }

    /// Creates an empty set with `capacity` buckets per table.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, RandomState::default())
    }

    /// Returns a [`SetBuilder`][builder-struct], which can build a
    /// `SequentialSet` with a custom initial capacity or hasher.
    ///
    /// [builder-struct]: ../struct.SetBuilder.html
    pub fn builder() -> SetBuilder<Self> {
        SetBuilder::default()
    }
}

impl<T> Default for SequentialSet<T, RandomState>
where
    T: Hash + Eq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S> SequentialSet<T, S> {
    /// Creates an empty set with `capacity` buckets per table, using
    /// `build_hasher` to hash the values.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn with_capacity_and_hasher(capacity: usize, build_hasher: S) -> Self {
        assert!(capacity > 0, "the capacity of a cuckoo set must be at least 1");

        Self {
            tables: [empty_table(capacity), empty_table(capacity)],
            hash_pair: HashPair::new(capacity),
            len: 0,
            build_hasher,
        }
    }

    /// Returns the number of values in the set.
    pub fn size(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of buckets in each of the two tables.
    pub fn capacity(&self) -> usize {
        self.hash_pair.capacity()
    }

    /// Returns an iterator over the values in the set, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.tables
            .iter()
            .flat_map(|table| table.iter())
            .filter_map(|slot| slot.as_ref().map(|entry| &entry.value))
    }
}

impl<T, S> SequentialSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    /// Adds `value` to the set. Returns `false` if an equal value was already
    /// present.
    pub fn add(&mut self, value: T) -> bool {
        let hash = hash_pair::hash(&self.build_hasher, &value);
        if self.find(hash, &value).is_some() {
            return false;
        }

        let entry = Entry::new(hash, value);
        if let Err(leftover) = displace(&mut self.tables, &self.hash_pair, entry) {
            // The leftover is whichever entry was evicted last, not necessarily
            // the new one. It goes into the rehash with everything else.
            self.resize(leftover);
        }

        self.len += 1;
        true
    }

    /// Removes `value` from the set. Returns `false` if it was not present.
    pub fn remove<Q>(&mut self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = hash_pair::hash(&self.build_hasher, value);
        match self.find(hash, value) {
            Some((table, pos)) => {
                self.tables[table][pos] = None;
                self.len -= 1;
                true
            }
            None => false,
        }
    }

    /// Returns `true` if the set contains `value`.
    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = hash_pair::hash(&self.build_hasher, value);
        self.find(hash, value).is_some()
    }

    /// Adds every value from `values` and returns how many were newly added.
    pub fn populate<I>(&mut self, values: I) -> usize
    where
        I: IntoIterator<Item = T>,
    {
        values
            .into_iter()
            .fold(0, |added, value| added + usize::from(self.add(value)))
    }

    fn find<Q>(&self, hash: u64, value: &Q) -> Option<(usize, usize)>
    where
        T: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        (0..2).find_map(|table| {
            let pos = self.hash_pair.position(table, hash);
            self.tables[table][pos]
                .as_ref()
                .filter(|entry| entry.is(hash, value))
                .map(|_| (table, pos))
        })
    }

    fn resize(&mut self, leftover: Entry<T>) {
        let tables = mem::replace(&mut self.tables, [empty_table(0), empty_table(0)]);
        let mut entries: Vec<_> = drain(tables).chain(iter::once(leftover)).collect();
        let mut hash_pair = self.hash_pair;

        #[cfg(feature = "logging")]
        log::debug!(
            "Resizing a sequential cuckoo set with {} entries from capacity {}",
            entries.len(),
            hash_pair.capacity()
        );

        loop {
            hash_pair = hash_pair.grow();
            let capacity = hash_pair.capacity();
            let mut tables = [empty_table(capacity), empty_table(capacity)];

            let mut rest = entries.into_iter();
            let failed = rest
                .by_ref()
                .find_map(|entry| displace(&mut tables, &hash_pair, entry).err());

            match failed {
                None => {
                    self.tables = tables;
                    self.hash_pair = hash_pair;
                    return;
                }
                Some(leftover) => {
                    #[cfg(feature = "logging")]
                    log::warn!("Rehashing into capacity {capacity} failed. Growing again");

                    entries = drain(tables)
                        .chain(iter::once(leftover))
                        .chain(rest)
                        .collect();
                }
            }
        }
    }
}

impl<T, S> CuckooSet<T> for SequentialSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    fn add(&mut self, value: T) -> bool {
        SequentialSet::add(self, value)
    }

    fn remove(&mut self, value: &T) -> bool {
        SequentialSet::remove(self, value)
    }

    fn contains(&self, value: &T) -> bool {
        SequentialSet::contains(self, value)
    }

    fn size(&self) -> usize {
        SequentialSet::size(self)
    }
}

impl<T, S> fmt::Debug for SequentialSet<T, S>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequentialSet")
            .field("size", &self.size())
            .field("capacity", &self.capacity())
            .finish()
    }
}

fn empty_table<T>(capacity: usize) -> Table<T> {
    iter::repeat_with(|| None).take(capacity).collect()
}

fn drain<T>(tables: [Table<T>; 2]) -> impl Iterator<Item = Entry<T>> {
    tables
        .into_iter()
        .flat_map(|table| Vec::from(table).into_iter().flatten())
}

/// Runs the displacement loop for `entry`, alternating between the tables.
/// On success every entry, including `entry`, has a bucket. On failure the
/// entry that was evicted last is returned and the tables hold every other
/// entry.
fn displace<T>(
    tables: &mut [Table<T>; 2],
    hash_pair: &HashPair,
    entry: Entry<T>,
) -> Result<(), Entry<T>> {
    let mut candidate = entry;

    for _ in 0..hash_pair.max_displacements() {
        for (table, slots) in tables.iter_mut().enumerate() {
            let pos = hash_pair.position(table, candidate.hash);
            match slots[pos].replace(candidate) {
                None => return Ok(()),
                Some(evicted) => candidate = evicted,
            }
        }
    }

    Err(candidate)
}
