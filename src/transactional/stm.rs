//! A small word-based software transactional memory.
//!
//! Every shared location is a [`TCell`]: a version word and an epoch-managed
//! pointer. The low bit of the version is a write lock; every committed write
//! adds 2 to the version.
//!
//! A [`Transaction`] reads optimistically. Each read records the version it
//! saw, and the read fails with [`Conflict`] if the cell was locked or changed
//! while it was being read. Writes are buffered in the transaction and are
//! visible to its own later reads only. At commit time the written cells are
//! try-locked in address order (a commit never waits for a lock), every
//! recorded read is validated against the current version, and only then are
//! the buffered pointers published. If anything fails, every lock taken is
//! released and nothing is published, so the caller can simply retry.
//!
//! Values behind the pointers are managed with `crossbeam_epoch`; a
//! transaction only ever reads them under the guard it was created with.

use std::{
    ptr,
    sync::atomic::{AtomicU64, Ordering},
};

use crossbeam_epoch::{Atomic, Guard, Shared};
use crossbeam_utils::Backoff;
use smallvec::SmallVec;

const LOCKED: u64 = 1;

/// A transaction touched a cell that another thread changed or was changing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Conflict;

pub(crate) struct TCell<T> {
    version: AtomicU64,
    value: Atomic<T>,
}

impl<T> Default for TCell<T> {
    fn default() -> Self {
        Self {
            version: AtomicU64::new(0),
            value: Atomic::null(),
        }
    }
}

impl<T> TCell<T> {
    /// Loads the pointer outside of any transaction. The caller must have
    /// exclusive access to the cell, either because the cell is sealed or
    /// because no other thread can reach it yet.
    pub(crate) fn load_exclusive<'g>(&self, guard: &'g Guard) -> Shared<'g, T> {
        self.value.load(Ordering::Acquire, guard)
    }

    /// Swaps a pointer outside of any transaction. Same requirements as
    /// [`load_exclusive`](Self::load_exclusive).
    pub(crate) fn swap_exclusive<'g>(&self, value: Shared<'g, T>, guard: &'g Guard) -> Shared<'g, T> {
        self.value.swap(value, Ordering::AcqRel, guard)
    }

    /// Takes the write lock for good, waiting for any committer that holds it.
    /// Every later transaction that touches this cell conflicts.
    pub(crate) fn seal(&self) {
        let backoff = Backoff::new();
        while self.try_lock().is_none() {
            backoff.snooze();
        }
    }

    #[cfg(test)]
    pub(crate) fn is_locked(&self) -> bool {
        self.version.load(Ordering::Acquire) & LOCKED != 0
    }

    /// Returns the unlocked version the lock was taken at.
    fn try_lock(&self) -> Option<u64> {
        let version = self.version.load(Ordering::Acquire);
        if version & LOCKED != 0 {
            return None;
        }
        self.version
            .compare_exchange(version, version | LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .ok()
    }

    fn unlock(&self, version: u64) {
        self.version.store(version, Ordering::Release);
    }
}

pub(crate) struct Transaction<'g, T> {
    guard: &'g Guard,
    reads: SmallVec<[(&'g TCell<T>, u64); 8]>,
    writes: SmallVec<[(&'g TCell<T>, Shared<'g, T>); 8]>,
}

impl<'g, T> Transaction<'g, T> {
    pub(crate) fn new(guard: &'g Guard) -> Self {
        Self {
            guard,
            reads: SmallVec::new(),
            writes: SmallVec::new(),
        }
    }

    pub(crate) fn read(&mut self, cell: &'g TCell<T>) -> Result<Shared<'g, T>, Conflict> {
        if let Some((_, value)) = self.writes.iter().find(|(c, _)| ptr::eq(*c, cell)) {
            return Ok(*value);
        }

        let before = cell.version.load(Ordering::Acquire);
        if before & LOCKED != 0 {
            return Err(Conflict);
        }
        let value = cell.value.load(Ordering::Acquire, self.guard);
        if cell.version.load(Ordering::Acquire) != before {
            return Err(Conflict);
        }

        match self.reads.iter().find(|(c, _)| ptr::eq(*c, cell)) {
            Some((_, seen)) if *seen != before => return Err(Conflict),
            Some(_) => (),
            None => self.reads.push((cell, before)),
        }

        Ok(value)
    }

    pub(crate) fn write(&mut self, cell: &'g TCell<T>, value: Shared<'g, T>) {
        match self.writes.iter_mut().find(|(c, _)| ptr::eq(*c, cell)) {
            Some((_, buffered)) => *buffered = value,
            None => self.writes.push((cell, value)),
        }
    }

    /// Checks that every cell read so far is unchanged and unlocked, without
    /// publishing anything.
    pub(crate) fn validate(&self) -> Result<(), Conflict> {
        if self
            .reads
            .iter()
            .all(|(cell, seen)| cell.version.load(Ordering::Acquire) == *seen)
        {
            Ok(())
        } else {
            Err(Conflict)
        }
    }

    /// Publishes the buffered writes if every read is still valid. On
    /// `Err(Conflict)` nothing has been published.
    pub(crate) fn commit(self) -> Result<(), Conflict> {
        let Self {
            reads, mut writes, ..
        } = self;

        writes.sort_unstable_by_key(|(cell, _)| *cell as *const TCell<T> as usize);

        let mut locked: SmallVec<[u64; 8]> = SmallVec::with_capacity(writes.len());
        let release = |locked: &[u64]| {
            for ((cell, _), version) in writes.iter().zip(locked) {
                cell.unlock(*version);
            }
        };

        for (cell, _) in &writes {
            match cell.try_lock() {
                Some(version) => locked.push(version),
                None => {
                    release(&locked);
                    return Err(Conflict);
                }
            }
        }

        for (cell, seen) in &reads {
            let current = match writes.iter().position(|(c, _)| ptr::eq(*c, *cell)) {
                Some(i) => locked[i],
                None => cell.version.load(Ordering::Acquire),
            };
            if current != *seen {
                release(&locked);
                return Err(Conflict);
            }
        }

        for ((cell, value), version) in writes.iter().zip(&locked) {
            cell.value.store(*value, Ordering::Release);
            cell.unlock(version + 2);
        }

        Ok(())
    }
}
