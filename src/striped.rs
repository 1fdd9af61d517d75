//! A concurrent cuckoo hash set with striped bucket locks and probe sets.

pub(crate) mod probe_set;
pub(crate) mod stripes;

use self::{
    probe_set::ProbeSet,
    stripes::{AllStripes, Stripes},
};
use crate::{
    common::{
        entry::Entry,
        hash_pair::{self, HashPair},
        DEFAULT_INITIAL_CAPACITY, DEFAULT_PROBE_SIZE, DEFAULT_RELOCATION_LIMIT, DEFAULT_THRESHOLD,
    },
    CuckooSet, SetBuilder,
};

use std::{
    borrow::Borrow,
    collections::hash_map::RandomState,
    fmt,
    hash::{BuildHasher, Hash},
    iter,
    sync::atomic::{AtomicUsize, Ordering},
};

/// The occupancy limits of the probe sets and the length of relocation chains.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Limits {
    pub(crate) probe_size: usize,
    pub(crate) threshold: usize,
    pub(crate) relocation_limit: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            probe_size: DEFAULT_PROBE_SIZE,
            threshold: DEFAULT_THRESHOLD,
            relocation_limit: DEFAULT_RELOCATION_LIMIT,
        }
    }
}

impl Limits {
    /// Picks the bucket a new entry goes to, or `None` if both are full.
    /// Returns the chosen table and whether that bucket ended up over the
    /// threshold.
    ///
    /// A bucket below the threshold always wins, table 0 first. Otherwise the
    /// emptier bucket that still has room wins, table 0 on a tie.
    fn choose(&self, lens: [usize; 2]) -> Option<(usize, bool)> {
        if let Some(table) = (0..2).find(|&t| lens[t] < self.threshold) {
            return Some((table, false));
        }

        let table = if lens[1] < lens[0] { 1 } else { 0 };
        (lens[table] < self.probe_size).then_some((table, true))
    }
}

/// A thread-safe cuckoo hash set with fine-grained locking.
///
/// Every bucket holds a _probe set_ of up to `probe_size` values (8 by
/// default). While a bucket holds fewer than `threshold` values (4 by
/// default), insertions go straight into it. Above the threshold an insertion
/// is still accepted, and the bucket is then relieved by _relocation_: its
/// oldest value is moved to that value's bucket in the other table, possibly
/// continuing from there, for up to `relocation_limit` rounds (16 by default).
/// When relocation fails, or when both buckets of a new value are full, both
/// tables are doubled and every value is rehashed.
///
/// # Locking
///
/// Each table has one lock per bucket of the initial capacity (capped at
/// 4096). The number of locks never changes, so locking gets coarser as the
/// tables grow: after `k` doublings every lock guards a stripe of `2^k`
/// buckets, and operations on values in different buckets of one stripe
/// serialize. Choose an initial capacity close to the expected size when
/// per-bucket locking matters. An
/// operation on a value locks the value's table-0 bucket and then its table-1
/// bucket, always in that order. A resize locks every table-0 stripe, which
/// excludes every other operation.
///
/// `size` is maintained with a counter and is exact once all concurrent
/// operations have returned.
///
/// # Examples
///
/// ```rust
/// use std::{sync::Arc, thread};
///
/// use cuckoo_set::StripedSet;
///
/// let set = Arc::new(StripedSet::with_capacity(16));
///
/// let handles: Vec<_> = (0..4)
///     .map(|t| {
///         let set = Arc::clone(&set);
///         thread::spawn(move || (t * 100..t * 100 + 100).filter(|&v| set.add(v)).count())
///     })
///     .collect();
///
/// let added: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
/// assert_eq!(added, 400);
/// assert_eq!(set.size(), 400);
/// assert!(set.remove(&250));
/// assert!(!set.contains(&250));
/// ```
pub struct StripedSet<T, S = RandomState> {
    stripes: Stripes<T>,
    limits: Limits,
    len: AtomicUsize,
    build_hasher: S,
}

impl<T> StripedSet<T, RandomState>
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
    /// `StripedSet` with custom probe set limits or a custom hasher.
    ///
    /// [builder-struct]: ../struct.SetBuilder.html
    pub fn builder() -> SetBuilder<Self> {
        SetBuilder::default()
    }
}

impl<T> Default for StripedSet<T, RandomState>
where
    T: Hash + Eq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S> StripedSet<T, S> {
    /// Creates an empty set with `capacity` buckets per table, using
    /// `build_hasher` to hash the values.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn with_capacity_and_hasher(capacity: usize, build_hasher: S) -> Self {
        Self::with_everything(capacity, Limits::default(), build_hasher)
    }

    pub(crate) fn with_everything(capacity: usize, limits: Limits, build_hasher: S) -> Self {
        assert!(capacity > 0, "the capacity of a cuckoo set must be at least 1");
        Self::with_hash_pair(HashPair::new(capacity), limits, build_hasher)
    }

    fn with_hash_pair(hash_pair: HashPair, limits: Limits, build_hasher: S) -> Self {
        Self {
            stripes: Stripes::new(hash_pair),
            limits,
            len: AtomicUsize::new(0),
            build_hasher,
        }
    }

    /// Returns the number of values in the set. While other threads are
    /// adding or removing values the result is only a snapshot.
    pub fn size(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Returns the number of buckets in each of the two tables.
    pub fn capacity(&self) -> usize {
        self.stripes.hash_pair().capacity()
    }

    pub fn probe_size(&self) -> usize {
        self.limits.probe_size
    }

    pub fn threshold(&self) -> usize {
        self.limits.threshold
    }

    pub fn relocation_limit(&self) -> usize {
        self.limits.relocation_limit
    }
}

impl<T, S> StripedSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    /// Adds `value` to the set. Returns `false` if an equal value was already
    /// present.
    pub fn add(&self, value: T) -> bool {
        let hash = hash_pair::hash(&self.build_hasher, &value);
        let entry = Entry::new(hash, value);

        loop {
            let mut pair = self.stripes.lock_pair(hash);
            if pair.bucket(0).contains(hash, &entry.value)
                || pair.bucket(1).contains(hash, &entry.value)
            {
                return false;
            }

            let hash_pair = pair.hash_pair();
            let lens = [pair.bucket(0).len(), pair.bucket(1).len()];

            let Some((table, over_threshold)) = self.limits.choose(lens) else {
                // Both buckets are full.
                drop(pair);
                self.resize(&hash_pair);
                continue;
            };

            pair.bucket_mut(table).push(entry);
            self.len.fetch_add(1, Ordering::AcqRel);

            let position = pair.position(table);
            drop(pair);

            if over_threshold && !self.relocate(&hash_pair, table, position) {
                #[cfg(feature = "logging")]
                log::debug!(
                    "Relocation from bucket {position} of table {table} failed at capacity {}",
                    hash_pair.capacity()
                );

                self.resize(&hash_pair);
            }

            return true;
        }
    }

    /// Removes `value` from the set. Returns `false` if it was not present.
    pub fn remove<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = hash_pair::hash(&self.build_hasher, value);

        let removed = {
            let mut pair = self.stripes.lock_pair(hash);
            let removed = pair
                .bucket_mut(0)
                .remove(hash, value)
                .or_else(|| pair.bucket_mut(1).remove(hash, value));
            if removed.is_some() {
                self.len.fetch_sub(1, Ordering::AcqRel);
            }
            removed
        };

        // The value is dropped after the locks are released.
        removed.is_some()
    }

    /// Returns `true` if the set contains `value`.
    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = hash_pair::hash(&self.build_hasher, value);
        let pair = self.stripes.lock_pair(hash);

        pair.bucket(0).contains(hash, value) || pair.bucket(1).contains(hash, value)
    }

    /// Adds every value from `values` and returns how many were newly added.
    pub fn populate<I>(&self, values: I) -> usize
    where
        I: IntoIterator<Item = T>,
    {
        values
            .into_iter()
            .fold(0, |added, value| added + usize::from(self.add(value)))
    }

    /// Moves entries out of bucket `position` of `table`, which has gone over
    /// the threshold, into their buckets in the other table. Returns `false`
    /// if the chain ran into a full bucket or ran out of rounds, in which case
    /// the table should be resized.
    ///
    /// The chain stops early with success when the geometry is no longer
    /// `hash_pair`, since the resize that changed it rebuilt every bucket.
    fn relocate(&self, hash_pair: &HashPair, table: usize, position: usize) -> bool {
        let (mut i, mut hi) = (table, position);

        for _ in 0..self.limits.relocation_limit {
            let oldest = self
                .stripes
                .with_bucket(hash_pair, i, hi, ProbeSet::oldest_hash);
            let hash = match oldest {
                Some(Some(hash)) => hash,
                // Resized, or the bucket has emptied.
                Some(None) | None => return true,
            };

            let j = 1 - i;
            let mut pair = self.stripes.lock_pair(hash);
            if pair.hash_pair() != *hash_pair {
                return true;
            }
            let hj = pair.position(j);
            debug_assert_eq!(pair.position(i), hi);

            let (source, destination) = pair.buckets_mut(i);
            match source.take_by_hash(hash) {
                Some(moved) => {
                    if destination.len() < self.limits.threshold {
                        destination.push(moved);
                        return true;
                    } else if destination.len() < self.limits.probe_size {
                        // The destination is now over the threshold (or at it,
                        // which counts as over). Continue from there.
                        destination.push(moved);
                        i = j;
                        hi = hj;
                    } else {
                        source.push(moved);
                        return false;
                    }
                }
                // Someone removed the entry. Try again unless that was enough.
                None if source.len() >= self.limits.threshold => continue,
                None => return true,
            }
        }

        false
    }

    /// Doubles both tables, re-salts the hash functions and rehashes every
    /// entry. Does nothing if the geometry is no longer `seen`, because
    /// another thread has already resized.
    fn resize(&self, seen: &HashPair) {
        let mut all = self.stripes.lock_all();
        if all.hash_pair() != *seen {
            return;
        }

        let mut entries = all.drain();
        let mut hash_pair = *seen;

        #[cfg(feature = "logging")]
        log::debug!(
            "Resizing a striped cuckoo set with {} entries from capacity {}",
            entries.len(),
            seen.capacity()
        );

        loop {
            hash_pair = hash_pair.grow();
            all.reset(hash_pair.capacity());

            let mut rest = entries.into_iter();
            let failed = rest
                .by_ref()
                .find_map(|entry| self.place(&mut all, &hash_pair, entry).err());

            match failed {
                None => break,
                Some(leftover) => {
                    #[cfg(feature = "logging")]
                    log::warn!(
                        "Rehashing into capacity {} failed. Growing again",
                        hash_pair.capacity()
                    );

                    entries = all
                        .drain()
                        .into_iter()
                        .chain(iter::once(leftover))
                        .chain(rest)
                        .collect();
                }
            }
        }

        all.publish(hash_pair);
    }

    /// Places `entry` by the same rule `add` uses, without relocating. Used
    /// while every stripe is held.
    fn place(
        &self,
        all: &mut AllStripes<'_, T>,
        hash_pair: &HashPair,
        entry: Entry<T>,
    ) -> Result<(), Entry<T>> {
        let buckets = all.buckets_mut(hash_pair.positions(entry.hash));
        match self.limits.choose([buckets[0].len(), buckets[1].len()]) {
            Some((table, _)) => {
                let [b0, b1] = buckets;
                let bucket = if table == 0 { b0 } else { b1 };
                bucket.push(entry);
                Ok(())
            }
            None => Err(entry),
        }
    }

    #[cfg(test)]
    pub(crate) fn max_bucket_len(&self) -> usize {
        let mut all = self.stripes.lock_all();
        let hash_pair = all.hash_pair();
        let mut max = 0;
        for pos in 0..hash_pair.capacity() {
            let [b0, b1] = all.buckets_mut([pos, pos]);
            max = max.max(b0.len()).max(b1.len());
        }
        max
    }

    #[cfg(test)]
    pub(crate) fn bucket_holds(&self, table: usize, position: usize, value: &T) -> bool {
        let hash = hash_pair::hash(&self.build_hasher, value);
        let hash_pair = self.stripes.hash_pair();
        self.stripes
            .with_bucket(&hash_pair, table, position, |b| b.contains(hash, value))
            .unwrap_or(false)
    }
}

impl<T, S> CuckooSet<T> for StripedSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    fn add(&mut self, value: T) -> bool {
        StripedSet::add(self, value)
    }

    fn remove(&mut self, value: &T) -> bool {
        StripedSet::remove(self, value)
    }

    fn contains(&self, value: &T) -> bool {
        StripedSet::contains(self, value)
    }

    fn size(&self) -> usize {
        StripedSet::size(self)
    }
}

impl<T, S> fmt::Debug for StripedSet<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripedSet")
            .field("size", &self.size())
            .field("capacity", &self.capacity())
            .field("limits", &self.limits)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Limits, StripedSet};
    use crate::{
        common::hash_pair::HashPair,
        test_util::{IdentityHasher, NoisyDropper},
    };

    use std::collections::hash_map::RandomState;

    crate::write_concurrent_test_cases!(StripedSet);

    #[test]
    fn choose_prefers_buckets_under_threshold() {
        let limits = Limits::default();

        assert_eq!(limits.choose([0, 0]), Some((0, false)));
        assert_eq!(limits.choose([3, 0]), Some((0, false)));
        assert_eq!(limits.choose([4, 3]), Some((1, false)));
        assert_eq!(limits.choose([4, 4]), Some((0, true)));
        assert_eq!(limits.choose([6, 5]), Some((1, true)));
        assert_eq!(limits.choose([5, 7]), Some((0, true)));
        assert_eq!(limits.choose([8, 7]), Some((1, true)));
        assert_eq!(limits.choose([8, 8]), None);
    }

    #[test]
    fn failed_relocation_triggers_resize() {
        let set = StripedSet::with_capacity_and_hasher(16, IdentityHasher::default());

        // Every multiple of 16 shares both buckets at capacity 16. Eight of
        // them fit under the threshold of the two buckets.
        for i in 0..8u64 {
            assert!(set.add(i * 16));
        }
        assert_eq!(set.capacity(), 16);

        // The ninth goes over the threshold, and relocation can only bounce
        // entries between the same two buckets until it gives up.
        assert!(set.add(8 * 16));
        assert!(set.capacity() > 16);

        for i in 9..64u64 {
            assert!(set.add(i * 16));
        }
        assert_eq!(set.size(), 64);
        assert!((0..64u64).all(|i| set.contains(&(i * 16))));
        assert!(set.max_bucket_len() <= set.probe_size());
    }

    /// A set of capacity 10 with one-entry thresholds. Bucket `h % 10` in
    /// table 0 and bucket `(h ^ 16) % 10` in table 1.
    fn tiny_set() -> StripedSet<u64, IdentityHasher> {
        let limits = Limits {
            probe_size: 2,
            threshold: 1,
            relocation_limit: 4,
        };
        let hash_pair = HashPair::with_salts(10, [0, 16]);
        StripedSet::with_hash_pair(hash_pair, limits, IdentityHasher::default())
    }

    /// Fills bucket 8 of table 0 and bucket 4 of table 1, then puts 0 into
    /// bucket 0 of table 0. Adding 20 afterwards finds both of its buckets
    /// (0 and 4) at the threshold.
    fn crowd_buckets_of_20(set: &StripedSet<u64, IdentityHasher>) {
        assert!(set.add(18));
        assert!(set.add(8));
        assert!(set.bucket_holds(1, 4, &8));
        assert!(set.add(0));
        assert!(set.bucket_holds(0, 0, &0));
    }

    #[test]
    fn relocation_ends_in_a_bucket_under_the_threshold() {
        let set = tiny_set();
        crowd_buckets_of_20(&set);

        // 20 goes over the threshold in bucket 0 of table 0, and its oldest
        // entry 0 moves to the empty bucket 6 of table 1.
        assert!(set.add(20));

        assert_eq!(set.capacity(), 10);
        assert!(set.bucket_holds(0, 0, &20));
        assert!(!set.bucket_holds(0, 0, &0));
        assert!(set.bucket_holds(1, 6, &0));
        assert_eq!(set.size(), 4);
        assert!([0, 8, 18, 20].iter().all(|v| set.contains(v)));
    }

    #[test]
    fn relocation_continues_from_a_crowded_destination() {
        let set = tiny_set();

        // Park 22 in bucket 6 of table 1, then free its table-0 bucket.
        assert!(set.add(2));
        assert!(set.add(22));
        assert!(set.bucket_holds(1, 6, &22));
        assert!(set.remove(&2));

        crowd_buckets_of_20(&set);

        // 0 moves into bucket 6 of table 1, which puts that bucket at the
        // threshold. Its oldest entry 22 then moves back to bucket 2 of
        // table 0.
        assert!(set.add(20));

        assert_eq!(set.capacity(), 10);
        assert!(set.bucket_holds(0, 0, &20));
        assert!(set.bucket_holds(1, 6, &0));
        assert!(!set.bucket_holds(1, 6, &22));
        assert!(set.bucket_holds(0, 2, &22));
        assert_eq!(set.size(), 5);
        assert!([0, 8, 18, 20, 22].iter().all(|v| set.contains(v)));
    }

    #[test]
    fn many_values_stay_within_probe_size() {
        let set = StripedSet::with_capacity(64);

        for i in 0..256u32 {
            assert!(set.add(i));
        }

        assert!(set.max_bucket_len() <= set.probe_size());
        assert!((0..256).all(|i| set.contains(&i)));
        assert_eq!(set.size(), 256);
    }

    #[test]
    fn probe_sets_never_exceed_the_probe_size() {
        let limits = Limits {
            probe_size: 3,
            threshold: 2,
            relocation_limit: 4,
        };
        let set: StripedSet<u32> = StripedSet::with_everything(4, limits, RandomState::default());

        for i in 0..2000 {
            assert!(set.add(i));
            if i % 100 == 0 {
                assert!(set.max_bucket_len() <= 3);
            }
        }

        assert!(set.max_bucket_len() <= 3);
        assert_eq!(set.size(), 2000);
    }

    #[test]
    fn removed_values_are_dropped() {
        use crate::test_util::DropNotifier;
        use std::sync::Arc;

        let notifier = Arc::new(DropNotifier::new());
        let set = StripedSet::new();

        assert!(set.add(NoisyDropper::new(Arc::clone(&notifier), 42)));
        assert!(!notifier.was_dropped());
        assert!(set.remove(&42));
        assert!(notifier.was_dropped());
        assert!(set.is_empty());
    }
}
