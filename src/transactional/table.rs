use super::stm::TCell;
use crate::common::{entry::Entry, hash_pair::HashPair};

use std::iter;

use crossbeam_epoch::{Guard, Shared};

/// One generation of a [`TransactionalSet`][tx-set]: two tables of
/// transactional cells and the geometry that addresses them.
///
/// The geometry of a table never changes. A resize seals the table, copies
/// its entry pointers into a new `Table` and swaps that in.
///
/// Dropping a table does not drop the entries its cells point to.
///
/// [tx-set]: ../struct.TransactionalSet.html
pub(crate) struct Table<T> {
    cells: [Box<[TCell<Entry<T>>]>; 2],
    hash_pair: HashPair,
}

impl<T> Table<T> {
    pub(crate) fn new(hash_pair: HashPair) -> Self {
        let cells = || {
            iter::repeat_with(TCell::default)
                .take(hash_pair.capacity())
                .collect::<Box<[_]>>()
        };

        Self {
            cells: [cells(), cells()],
            hash_pair,
        }
    }

    pub(crate) fn hash_pair(&self) -> HashPair {
        self.hash_pair
    }

    pub(crate) fn cell(&self, table: usize, hash: u64) -> &TCell<Entry<T>> {
        &self.cells[table][self.hash_pair.position(table, hash)]
    }

    /// Locks every cell for good. Waits for committers that hold a cell; once
    /// this returns, no transaction can change the table any more.
    pub(crate) fn seal(&self) {
        for cell in self.cells.iter().flat_map(|cells| cells.iter()) {
            cell.seal();
        }
    }

    /// Returns every non-null entry pointer. The table must be sealed or not
    /// yet shared.
    pub(crate) fn entries<'g>(
        &'g self,
        guard: &'g Guard,
    ) -> impl Iterator<Item = Shared<'g, Entry<T>>> + 'g {
        self.cells
            .iter()
            .flat_map(|cells| cells.iter())
            .map(move |cell| cell.load_exclusive(guard))
            .filter(|entry| !entry.is_null())
    }

    /// Places `entry` with the displacement loop, outside of any transaction.
    /// The table must not be shared yet. On failure the entry evicted last is
    /// returned and is no longer in the table.
    pub(crate) fn place_exclusive<'g>(
        &self,
        entry: Shared<'g, Entry<T>>,
        guard: &'g Guard,
    ) -> Result<(), Shared<'g, Entry<T>>> {
        let mut candidate = entry;

        for _ in 0..self.hash_pair.max_displacements() {
            for table in 0..2 {
                // Entries handed to a table are never null.
                let hash = unsafe { candidate.deref() }.hash;
                let evicted = self.cell(table, hash).swap_exclusive(candidate, guard);
                if evicted.is_null() {
                    return Ok(());
                }
                candidate = evicted;
            }
        }

        Err(candidate)
    }
}
