#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Hash sets built on two-table cuckoo hashing.
//!
//! Every set in this crate stores its values in two tables of equal size. A
//! value `v` may only live in `table[0][hash0(v)]` or in `table[1][hash1(v)]`,
//! so a lookup probes at most two buckets. An insertion that finds its bucket
//! taken evicts the occupant, which then moves to its own alternate bucket, and
//! so on until a free bucket is found or a bounded displacement budget runs
//! out. When the budget runs out the tables are doubled, the two hash
//! functions are re-salted, and every value is rehashed.
//!
//! The crate provides the same algorithm under three concurrency-control
//! strategies:
//!
//! - [`SequentialSet`]: a single-threaded baseline with one value per bucket.
//! - [`StripedSet`]: a concurrent set with a lock per bucket stripe. Each
//!   bucket holds a small _probe set_ of values, and overfull buckets are
//!   relieved by relocating values to their alternate table.
//! - [`TransactionalSet`]: a concurrent set with one value per bucket whose
//!   operations run as optimistic transactions. Conflicting transactions are
//!   detected at commit time and retried.
//!
//! All three implement [`CuckooSet`], so they can be swapped for each other.
//!
//! # Example
//!
//! ```rust
//! use std::{sync::Arc, thread};
//!
//! use cuckoo_set::StripedSet;
//!
//! let set = Arc::new(StripedSet::new());
//!
//! let handles: Vec<_> = (0..4u64)
//!     .map(|t| {
//!         let set = Arc::clone(&set);
//!         thread::spawn(move || {
//!             for v in (t * 1000)..(t * 1000 + 1000) {
//!                 assert!(set.add(v));
//!             }
//!         })
//!     })
//!     .collect();
//!
//! handles.into_iter().for_each(|h| h.join().expect("Thread failed"));
//!
//! assert_eq!(set.size(), 4000);
//! assert!(set.contains(&2500));
//! assert!(!set.add(2500));
//! ```
//!
//! # Logging
//!
//! Enable the `logging` feature to have the sets emit [`log`][log-crate]
//! records when they resize.
//!
//! [log-crate]: https://crates.io/crates/log

pub(crate) mod builder;
pub(crate) mod common;
pub mod sequential;
pub mod striped;
pub mod transactional;

#[cfg(test)]
#[macro_use]
pub(crate) mod test_util;

pub use builder::SetBuilder;
pub use common::{
    error::ConfigError, DEFAULT_INITIAL_CAPACITY, DEFAULT_PROBE_SIZE, DEFAULT_RELOCATION_LIMIT,
    DEFAULT_THRESHOLD, DEFAULT_TRANSACTIONAL_CAPACITY,
};
pub use sequential::SequentialSet;
pub use striped::StripedSet;
pub use transactional::TransactionalSet;

/// The operations shared by every set in this crate.
///
/// The concurrent sets also provide all of these operations as inherent
/// methods taking `&self`, which is what concurrent callers should use. This
/// trait takes `&mut self` for mutation so that the sequential set can
/// implement it too.
pub trait CuckooSet<T> {
    /// Adds `value` to the set. Returns `false` if an equal value was already
    /// present, in which case the set is unchanged.
    fn add(&mut self, value: T) -> bool;

    /// Removes `value` from the set. Returns `false` if it was not present.
    fn remove(&mut self, value: &T) -> bool;

    /// Returns `true` if the set contains `value`.
    fn contains(&self, value: &T) -> bool;

    /// Returns the number of values in the set.
    fn size(&self) -> usize;

    /// Adds every value from `values` and returns how many were newly added.
    /// Duplicates, whether already in the set or repeated within `values`, are
    /// not counted.
    fn populate<I>(&mut self, values: I) -> usize
    where
        I: IntoIterator<Item = T>,
        Self: Sized,
    {
        values
            .into_iter()
            .fold(0, |added, value| added + usize::from(self.add(value)))
    }
}
