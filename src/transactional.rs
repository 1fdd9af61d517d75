//! A concurrent cuckoo hash set whose operations run as optimistic
//! transactions.

pub(crate) mod stm;
pub(crate) mod table;

use self::{
    stm::{Conflict, Transaction},
    table::Table,
};
use crate::{
    common::{
        entry::Entry,
        hash_pair::{self, HashPair},
        DEFAULT_TRANSACTIONAL_CAPACITY,
    },
    CuckooSet, SetBuilder,
};

use std::{
    borrow::Borrow,
    collections::hash_map::RandomState,
    fmt,
    hash::{BuildHasher, Hash},
    ptr,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::Backoff;

/// A thread-safe cuckoo hash set built on software transactional memory.
///
/// The layout is the same as [`SequentialSet`][seq-set]'s: two tables, one
/// value per bucket. Every bucket is a transactional cell, and each operation
/// reads and writes cells inside a transaction that either commits as a whole
/// or has no effect. Operations never take locks; a transaction that
/// conflicts with a concurrent commit is retried.
///
/// - `contains` reads the two candidate buckets of its value.
/// - `remove` reads them and clears the one holding the value.
/// - `add` checks for the value, then runs the whole displacement chain in a
///   single transaction. If the chain exhausts its budget, nothing is
///   published, the set is resized and `add` starts over.
///
/// Only one thread resizes at a time. A resize seals every cell of the
/// current tables, so transactions that are still running against them fail
/// and retry on the new tables once they are installed.
///
/// Memory of removed values and of retired tables is reclaimed with
/// `crossbeam_epoch`. A removed value is dropped once no thread can still be
/// reading it, which may be on another thread and after the set itself is
/// gone. Values must therefore be `Send + Sync + 'static`. A value that
/// borrows data is rejected:
///
/// ```compile_fail
/// use cuckoo_set::TransactionalSet;
///
/// #[derive(PartialEq, Eq, Hash)]
/// struct Borrowing<'a>(&'a u64);
///
/// let value = 7;
/// let set = TransactionalSet::new();
/// set.add(Borrowing(&value));
/// ```
///
/// [seq-set]: ../sequential/struct.SequentialSet.html
///
/// # Examples
///
/// ```rust
/// use std::{sync::Arc, thread};
///
/// use cuckoo_set::TransactionalSet;
///
/// let set = Arc::new(TransactionalSet::new());
///
/// let handles: Vec<_> = (0..4u32)
///     .map(|t| {
///         let set = Arc::clone(&set);
///         thread::spawn(move || {
///             for v in 0..500 {
///                 set.add(v * 4 + t);
///             }
///         })
///     })
///     .collect();
///
/// handles.into_iter().for_each(|h| h.join().expect("Thread failed"));
///
/// assert_eq!(set.size(), 2000);
/// assert!(set.remove(&1999));
/// assert!(!set.contains(&1999));
/// ```
pub struct TransactionalSet<T, S = RandomState> {
    table: Atomic<Table<T>>,
    resizing: AtomicBool,
    len: AtomicUsize,
    build_hasher: S,
}

enum Placement<T> {
    Placed,
    Present,
    Conflict(Owned<Entry<T>>),
    Exhausted(Owned<Entry<T>>),
}

impl<T> TransactionalSet<T, RandomState>
where
    T: Hash + Eq + Send + Sync + 'static,
{
    /// Creates an empty set with [`DEFAULT_TRANSACTIONAL_CAPACITY`] buckets per
    /// table.
    ///
    /// [`DEFAULT_TRANSACTIONAL_CAPACITY`]: ../constant.DEFAULT_TRANSACTIONAL_CAPACITY.html
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TRANSACTIONAL_CAPACITY)
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
    /// `TransactionalSet` with a custom initial capacity or hasher.
    ///
    /// [builder-struct]: ../struct.SetBuilder.html
    pub fn builder() -> SetBuilder<Self> {
        SetBuilder::default()
    }
}

impl<T> Default for TransactionalSet<T, RandomState>
where
    T: Hash + Eq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S> TransactionalSet<T, S>
where
    T: Send + Sync + 'static,
{
    /// Creates an empty set with `capacity` buckets per table, using
    /// `build_hasher` to hash the values.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn with_capacity_and_hasher(capacity: usize, build_hasher: S) -> Self {
        assert!(capacity > 0, "the capacity of a cuckoo set must be at least 1");

        Self {
            table: Atomic::new(Table::new(HashPair::new(capacity))),
            resizing: AtomicBool::new(false),
            len: AtomicUsize::new(0),
            build_hasher,
        }
    }

    /// Returns the number of values in the set.
    ///
    /// The count is exact when no other thread is modifying the set.
    pub fn size(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Returns `true` if the set contains no values.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Returns the number of buckets in each of the two tables.
    pub fn capacity(&self) -> usize {
        let guard = &epoch::pin();
        self.current(guard).hash_pair().capacity()
    }

    fn current<'g>(&self, guard: &'g Guard) -> &'g Table<T> {
        // The table pointer is never null.
        unsafe { self.table.load(Ordering::Acquire, guard).deref() }
    }
}

impl<T, S> TransactionalSet<T, S>
where
    T: Hash + Eq + Send + Sync + 'static,
    S: BuildHasher,
{
    /// Adds `value` to the set. Returns `false` if an equal value was already
    /// present.
    pub fn add(&self, value: T) -> bool {
        let hash = hash_pair::hash(&self.build_hasher, &value);
        if self.find(hash, &value) {
            return false;
        }

        // The entry is allocated once and handed back by every attempt that
        // does not publish it.
        let mut entry = Owned::new(Entry::new(hash, value));
        let backoff = Backoff::new();

        loop {
            let guard = &epoch::pin();
            let table = self.current(guard);

            entry = match try_add(table, entry, guard) {
                Placement::Placed => {
                    self.len.fetch_add(1, Ordering::AcqRel);
                    return true;
                }
                Placement::Present => return false,
                Placement::Conflict(entry) => {
                    backoff.snooze();
                    entry
                }
                Placement::Exhausted(entry) => {
                    if !self.resize(table, guard) {
                        backoff.snooze();
                    }
                    entry
                }
            };
        }
    }

    /// Removes `value` from the set. Returns `false` if it was not present.
    pub fn remove<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = hash_pair::hash(&self.build_hasher, value);
        let backoff = Backoff::new();

        loop {
            match self.try_remove(hash, value, &epoch::pin()) {
                Ok(removed) => return removed,
                Err(Conflict) => backoff.snooze(),
            }
        }
    }

    /// Returns `true` if the set contains `value`.
    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = hash_pair::hash(&self.build_hasher, value);
        self.find(hash, value)
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

    fn find<Q>(&self, hash: u64, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let backoff = Backoff::new();

        loop {
            let guard = &epoch::pin();
            let mut tx = Transaction::new(guard);

            let found = lookup(&mut tx, self.current(guard), hash, value);
            match found.and_then(|found| tx.commit().map(|()| found.is_some())) {
                Ok(found) => return found,
                Err(Conflict) => backoff.snooze(),
            }
        }
    }

    fn try_remove<Q>(&self, hash: u64, value: &Q, guard: &Guard) -> Result<bool, Conflict>
    where
        T: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let table = self.current(guard);
        let mut tx = Transaction::new(guard);

        let Some((t, entry)) = lookup(&mut tx, table, hash, value)? else {
            tx.commit()?;
            return Ok(false);
        };

        tx.write(table.cell(t, hash), Shared::null());
        tx.commit()?;

        self.len.fetch_sub(1, Ordering::AcqRel);
        // The entry is unreachable from the tables now.
        unsafe { guard.defer_destroy(entry) };
        Ok(true)
    }

    /// Replaces `seen` with tables of twice the capacity. Returns `false` if
    /// another thread is resizing, in which case nothing is done.
    fn resize(&self, seen: &Table<T>, guard: &Guard) -> bool {
        if self
            .resizing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let current = self.table.load(Ordering::Acquire, guard);
        if !ptr::eq(current.as_raw(), seen) {
            // The tables `seen` came from have been replaced already.
            self.resizing.store(false, Ordering::Release);
            return true;
        }

        let old = unsafe { current.deref() };
        old.seal();

        let entries: Vec<_> = old.entries(guard).collect();
        let mut hash_pair = old.hash_pair();

        #[cfg(feature = "logging")]
        log::debug!(
            "Resizing a transactional cuckoo set with {} entries from capacity {}",
            entries.len(),
            hash_pair.capacity()
        );

        let table = loop {
            hash_pair = hash_pair.grow();
            let table = Table::new(hash_pair);

            if entries
                .iter()
                .all(|&entry| table.place_exclusive(entry, guard).is_ok())
            {
                break table;
            }

            // The entries are still owned by the sealed tables, so a failed
            // attempt is simply thrown away.
            #[cfg(feature = "logging")]
            log::warn!(
                "Rehashing into capacity {} failed. Growing again",
                hash_pair.capacity()
            );
        };

        self.table.store(Owned::new(table), Ordering::Release);
        // Transactions that still hold the old tables only ever fail on them.
        unsafe { guard.defer_destroy(current) };
        self.resizing.store(false, Ordering::Release);

        #[cfg(feature = "logging")]
        log::debug!(
            "Resized a transactional cuckoo set to capacity {}",
            hash_pair.capacity()
        );

        true
    }
}

/// Reads both candidate cells of `hash` and returns the table holding `value`
/// together with its entry.
#[allow(clippy::type_complexity)]
fn lookup<'g, T, Q>(
    tx: &mut Transaction<'g, Entry<T>>,
    table: &'g Table<T>,
    hash: u64,
    value: &Q,
) -> Result<Option<(usize, Shared<'g, Entry<T>>)>, Conflict>
where
    T: Borrow<Q>,
    Q: Eq + ?Sized,
{
    for t in 0..2 {
        let entry = tx.read(table.cell(t, hash))?;
        if unsafe { entry.as_ref() }.map_or(false, |e| e.is(hash, value)) {
            return Ok(Some((t, entry)));
        }
    }
    Ok(None)
}

fn try_add<'g, T>(table: &'g Table<T>, entry: Owned<Entry<T>>, guard: &'g Guard) -> Placement<T>
where
    T: Eq,
{
    let hash = entry.hash;
    let mut tx = Transaction::new(guard);

    // Checked again inside the transaction that places the entry, so two
    // threads adding the same value cannot both succeed.
    match lookup(&mut tx, table, hash, &entry.value) {
        Ok(Some(_)) => return Placement::Present,
        Ok(None) => (),
        Err(Conflict) => return Placement::Conflict(entry),
    }

    let new = entry.into_shared(guard);
    match displace(&mut tx, table, new) {
        Ok(true) => {
            if tx.commit().is_ok() {
                return Placement::Placed;
            }
        }
        Ok(false) => {
            // Only a chain read from a consistent snapshot justifies a resize.
            if tx.validate().is_ok() {
                return Placement::Exhausted(unsafe { new.into_owned() });
            }
        }
        Err(Conflict) => (),
    }

    // Nothing was published, so the entry is still ours.
    Placement::Conflict(unsafe { new.into_owned() })
}

/// Runs the displacement loop for `entry` inside `tx`, alternating between
/// the tables. Returns `Ok(false)` if the budget ran out.
fn displace<'g, T>(
    tx: &mut Transaction<'g, Entry<T>>,
    table: &'g Table<T>,
    entry: Shared<'g, Entry<T>>,
) -> Result<bool, Conflict> {
    let mut candidate = entry;

    for _ in 0..table.hash_pair().max_displacements() {
        for t in 0..2 {
            // Every candidate is either the new entry or one read from a cell.
            let hash = unsafe { candidate.deref() }.hash;
            let cell = table.cell(t, hash);

            let evicted = tx.read(cell)?;
            tx.write(cell, candidate);
            if evicted.is_null() {
                return Ok(true);
            }
            candidate = evicted;
        }
    }

    Ok(false)
}

impl<T, S> Drop for TransactionalSet<T, S> {
    fn drop(&mut self) {
        let guard = unsafe { epoch::unprotected() };
        let table = self.table.load(Ordering::Acquire, guard);

        // Nobody else can reach the tables, and every entry is in exactly
        // one cell of the current tables.
        let table = unsafe { table.into_owned() };
        for entry in table.entries(guard) {
            unsafe { drop(entry.into_owned()) };
        }
    }
}

impl<T, S> CuckooSet<T> for TransactionalSet<T, S>
where
    T: Hash + Eq + Send + Sync + 'static,
    S: BuildHasher,
{
    fn add(&mut self, value: T) -> bool {
        TransactionalSet::add(self, value)
    }

    fn remove(&mut self, value: &T) -> bool {
        TransactionalSet::remove(self, value)
    }

    fn contains(&self, value: &T) -> bool {
        TransactionalSet::contains(self, value)
    }

    fn size(&self) -> usize {
        TransactionalSet::size(self)
    }
}

impl<T, S> fmt::Debug for TransactionalSet<T, S>
where
    T: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionalSet")
            .field("size", &self.size())
            .field("capacity", &self.capacity())
            .finish()
    }
}
