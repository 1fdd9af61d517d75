use crate::common::{entry::Entry, DEFAULT_PROBE_SIZE};

use std::borrow::Borrow;

use smallvec::SmallVec;

/// The entries of one bucket of a [`StripedSet`][striped-set], oldest first.
///
/// A probe set does not enforce its own size limit; the striped set checks
/// occupancy against its configured probe size before every push.
///
/// [striped-set]: ../struct.StripedSet.html
#[derive(Debug)]
pub(crate) struct ProbeSet<T> {
    entries: SmallVec<[Entry<T>; DEFAULT_PROBE_SIZE]>,
}

impl<T> Default for ProbeSet<T> {
    fn default() -> Self {
        Self {
            entries: SmallVec::new(),
        }
    }
}

impl<T> ProbeSet<T> {
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn push(&mut self, entry: Entry<T>) {
        self.entries.push(entry);
    }

    /// Returns the hash of the entry that has been in this bucket longest.
    /// Relocation moves that entry first.
    pub(crate) fn oldest_hash(&self) -> Option<u64> {
        self.entries.first().map(|entry| entry.hash)
    }

    /// Removes the oldest entry with the given hash. Any two entries with the
    /// same full hash have the same pair of buckets, so relocation does not
    /// care which one it gets.
    pub(crate) fn take_by_hash(&mut self, hash: u64) -> Option<Entry<T>> {
        let index = self.entries.iter().position(|entry| entry.hash == hash)?;
        Some(self.entries.remove(index))
    }

    pub(crate) fn contains<Q>(&self, hash: u64, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        self.entries.iter().any(|entry| entry.is(hash, value))
    }

    pub(crate) fn remove<Q>(&mut self, hash: u64, value: &Q) -> Option<Entry<T>>
    where
        T: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let index = self.entries.iter().position(|entry| entry.is(hash, value))?;
        Some(self.entries.remove(index))
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = Entry<T>> + '_ {
        self.entries.drain(..)
    }
}
