//! The lock stripes of a [`StripedSet`][striped-set] and the guards that
//! encode its lock order.
//!
//! Each of the two tables has a fixed array of mutexes (stripes). Bucket `p`
//! of a table belongs to stripe `p % stripe_count` and is stored at index
//! `p / stripe_count` inside that stripe. The stripe arrays are sized once, at
//! construction, and never reallocated; a resize only rebuilds the bucket
//! vectors inside them. At the initial capacity (up to [`MAX_STRIPES`]) every
//! bucket has a lock of its own.
//!
//! Lock order: a thread that needs locks in both tables takes its table-0
//! stripe first. A table-1 stripe can only be locked through a
//! [`Table0Guard`], so holding a table-1 lock always implies holding a
//! table-0 lock. This is what makes a resize that holds every table-0 stripe
//! exclusive: no other thread can be inside any bucket pair. The only
//! exception is [`Stripes::with_bucket`], which holds a single stripe, runs a
//! closure that cannot take another lock, and releases it.
//!
//! [striped-set]: ../struct.StripedSet.html

use super::probe_set::ProbeSet;
use crate::common::{entry::Entry, hash_pair::HashPair};

use std::iter;

use crossbeam_utils::{atomic::AtomicCell, CachePadded};
use parking_lot::{Mutex, MutexGuard};

/// The maximum number of stripes per table.
pub(crate) const MAX_STRIPES: usize = 1 << 12;

pub(crate) struct Stripe<T> {
    buckets: Vec<ProbeSet<T>>,
}

impl<T> Stripe<T> {
    fn with_buckets(len: usize) -> Self {
        Self {
            buckets: iter::repeat_with(ProbeSet::default).take(len).collect(),
        }
    }
}

pub(crate) struct Stripes<T> {
    tables: [Box<[CachePadded<Mutex<Stripe<T>>>]>; 2],
    hash_pair: AtomicCell<HashPair>,
}

impl<T> Stripes<T> {
    pub(crate) fn new(hash_pair: HashPair) -> Self {
        let capacity = hash_pair.capacity();
        let stripe_count = capacity.min(MAX_STRIPES);
        let table = || {
            (0..stripe_count)
                .map(|i| {
                    let len = stripe_len(capacity, stripe_count, i);
                    CachePadded::new(Mutex::new(Stripe::with_buckets(len)))
                })
                .collect::<Box<[_]>>()
        };

        Self {
            tables: [table(), table()],
            hash_pair: AtomicCell::new(hash_pair),
        }
    }

    /// Returns the current table geometry. It can change as soon as it is
    /// returned unless the caller holds a table-0 stripe.
    pub(crate) fn hash_pair(&self) -> HashPair {
        self.hash_pair.load()
    }

    fn stripe_count(&self) -> usize {
        self.tables[0].len()
    }

    fn lock_table0(&self, stripe: usize) -> Table0Guard<'_, T> {
        Table0Guard {
            stripes: self,
            guard: self.tables[0][stripe].lock(),
        }
    }

    /// Locks the two buckets a value with the given hash can live in, table 0
    /// first, under the current geometry.
    pub(crate) fn lock_pair(&self, hash: u64) -> BucketPair<'_, T> {
        let n = self.stripe_count();

        loop {
            let hash_pair = self.hash_pair();
            let positions = hash_pair.positions(hash);

            let t0 = self.lock_table0(positions[0] % n);
            if self.hash_pair() != hash_pair {
                // A resize finished between reading the geometry and taking
                // the lock.
                continue;
            }
            let t1 = t0.lock_table1(positions[1] % n);

            return BucketPair {
                t0: t0.guard,
                t1,
                hash_pair,
                positions,
                stripe_count: n,
            };
        }
    }

    /// Runs `f` on bucket `pos` of `table`, holding that bucket's stripe and
    /// nothing else. Returns `None` if the geometry is no longer `expected`.
    pub(crate) fn with_bucket<F, R>(
        &self,
        expected: &HashPair,
        table: usize,
        pos: usize,
        f: F,
    ) -> Option<R>
    where
        F: FnOnce(&ProbeSet<T>) -> R,
    {
        let n = self.stripe_count();
        let stripe = self.tables[table][pos % n].lock();
        // A resize publishes its geometry before it releases any stripe.
        if self.hash_pair() != *expected {
            return None;
        }
        Some(f(&stripe.buckets[pos / n]))
    }

    /// Locks every stripe of both tables, all of table 0 first.
    pub(crate) fn lock_all(&self) -> AllStripes<'_, T> {
        let t0: Vec<_> = (0..self.stripe_count())
            .map(|i| self.lock_table0(i))
            .collect();
        let t1 = (0..self.stripe_count())
            .map(|i| t0[0].lock_table1(i))
            .collect();

        AllStripes {
            stripes: self,
            t0: t0.into_iter().map(|g| g.guard).collect(),
            t1,
        }
    }
}

/// Proof that the holder owns a table-0 stripe.
pub(crate) struct Table0Guard<'a, T> {
    stripes: &'a Stripes<T>,
    guard: MutexGuard<'a, Stripe<T>>,
}

impl<'a, T> Table0Guard<'a, T> {
    fn lock_table1(&self, stripe: usize) -> MutexGuard<'a, Stripe<T>> {
        self.stripes.tables[1][stripe].lock()
    }
}

/// The two candidate buckets of one hash, both locked.
pub(crate) struct BucketPair<'a, T> {
    t0: MutexGuard<'a, Stripe<T>>,
    t1: MutexGuard<'a, Stripe<T>>,
    hash_pair: HashPair,
    positions: [usize; 2],
    stripe_count: usize,
}

impl<'a, T> BucketPair<'a, T> {
    /// The geometry the positions were computed with. It cannot change while
    /// this pair is alive.
    pub(crate) fn hash_pair(&self) -> HashPair {
        self.hash_pair
    }

    pub(crate) fn position(&self, table: usize) -> usize {
        self.positions[table]
    }

    pub(crate) fn bucket(&self, table: usize) -> &ProbeSet<T> {
        let n = self.stripe_count;
        let stripe = if table == 0 { &self.t0 } else { &self.t1 };
        &stripe.buckets[self.positions[table] / n]
    }

    pub(crate) fn bucket_mut(&mut self, table: usize) -> &mut ProbeSet<T> {
        self.buckets_mut(table).0
    }

    /// Returns bucket `table` and the bucket of the other table.
    pub(crate) fn buckets_mut(&mut self, table: usize) -> (&mut ProbeSet<T>, &mut ProbeSet<T>) {
        let n = self.stripe_count;
        let b0 = &mut self.t0.buckets[self.positions[0] / n];
        let b1 = &mut self.t1.buckets[self.positions[1] / n];
        if table == 0 {
            (b0, b1)
        } else {
            (b1, b0)
        }
    }
}

/// Every stripe of both tables, locked by a resizing thread.
pub(crate) struct AllStripes<'a, T> {
    stripes: &'a Stripes<T>,
    t0: Vec<MutexGuard<'a, Stripe<T>>>,
    t1: Vec<MutexGuard<'a, Stripe<T>>>,
}

impl<'a, T> AllStripes<'a, T> {
    pub(crate) fn hash_pair(&self) -> HashPair {
        self.stripes.hash_pair()
    }

    /// Removes and returns every entry of both tables.
    pub(crate) fn drain(&mut self) -> Vec<Entry<T>> {
        let mut entries = Vec::new();
        for stripe in self.t0.iter_mut().chain(self.t1.iter_mut()) {
            for bucket in stripe.buckets.iter_mut() {
                entries.extend(bucket.drain());
            }
        }
        entries
    }

    /// Replaces the buckets of every stripe with empty buckets for a table of
    /// `capacity` buckets.
    pub(crate) fn reset(&mut self, capacity: usize) {
        let n = self.t0.len();
        for (i, stripe) in self.t0.iter_mut().enumerate() {
            **stripe = Stripe::with_buckets(stripe_len(capacity, n, i));
        }
        for (i, stripe) in self.t1.iter_mut().enumerate() {
            **stripe = Stripe::with_buckets(stripe_len(capacity, n, i));
        }
    }

    /// Returns the two candidate buckets for `positions`, table 0 first.
    pub(crate) fn buckets_mut(&mut self, positions: [usize; 2]) -> [&mut ProbeSet<T>; 2] {
        let n = self.t0.len();
        [
            &mut self.t0[positions[0] % n].buckets[positions[0] / n],
            &mut self.t1[positions[1] % n].buckets[positions[1] / n],
        ]
    }

    /// Makes `hash_pair` the current geometry. Must be called before the
    /// stripes are released.
    pub(crate) fn publish(&self, hash_pair: HashPair) {
        self.stripes.hash_pair.store(hash_pair);
    }
}

/// Number of buckets `p < capacity` with `p % stripe_count == stripe`.
fn stripe_len(capacity: usize, stripe_count: usize, stripe: usize) -> usize {
    (capacity + stripe_count - 1 - stripe) / stripe_count
}
