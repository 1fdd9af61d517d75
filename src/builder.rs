use crate::{
    common::{error::ConfigError, DEFAULT_INITIAL_CAPACITY, DEFAULT_TRANSACTIONAL_CAPACITY},
    striped::Limits,
    SequentialSet, StripedSet, TransactionalSet,
};

use std::{
    collections::hash_map::RandomState,
    hash::{BuildHasher, Hash},
    marker::PhantomData,
};

/// Builds a [`SequentialSet`][seq-struct], a [`StripedSet`][striped-struct] or a
/// [`TransactionalSet`][tx-struct] with various configuration knobs.
///
/// The probe set knobs only exist on a builder for a `StripedSet`.
///
/// [seq-struct]: ./sequential/struct.SequentialSet.html
/// [striped-struct]: ./striped/struct.StripedSet.html
/// [tx-struct]: ./transactional/struct.TransactionalSet.html
///
/// # Examples
///
/// ```rust
/// use cuckoo_set::StripedSet;
///
/// let set = StripedSet::builder()
///     // 1024 buckets per table.
///     .initial_capacity(1024)
///     // Up to 16 values per bucket, relocate above 8.
///     .probe_size(16)
///     .threshold(8)
///     .build()
///     .expect("valid configuration");
///
/// set.add("hello");
/// assert!(set.contains("hello"));
/// ```
///
/// An impossible configuration is reported by `build`:
///
/// ```rust
/// use cuckoo_set::{ConfigError, StripedSet};
///
/// let result = StripedSet::<u32>::builder().probe_size(2).threshold(4).build();
/// assert_eq!(
///     result.unwrap_err(),
///     ConfigError::ThresholdExceedsProbeSize { threshold: 4, probe_size: 2 }
/// );
/// ```
#[must_use]
pub struct SetBuilder<C> {
    initial_capacity: Option<usize>,
    limits: Limits,
    set_type: PhantomData<C>,
}

impl<C> Default for SetBuilder<C> {
    fn default() -> Self {
        Self {
            initial_capacity: None,
            limits: Limits::default(),
            set_type: PhantomData::default(),
        }
    }
}

impl<C> SetBuilder<C> {
    /// Sets the initial number of buckets of each of the two tables.
    pub fn initial_capacity(self, capacity: usize) -> Self {
        Self {
            initial_capacity: Some(capacity),
            ..self
        }
    }

    fn capacity_or(&self, default: usize) -> Result<usize, ConfigError> {
        match self.initial_capacity.unwrap_or(default) {
            0 => Err(ConfigError::ZeroCapacity),
            capacity => Ok(capacity),
        }
    }
}

impl<T> SetBuilder<SequentialSet<T, RandomState>>
where
    T: Hash + Eq,
{
    /// Builds a `SequentialSet<T>`.
    ///
    /// # Errors
    ///
    /// Fails if the initial capacity is 0.
    pub fn build(self) -> Result<SequentialSet<T, RandomState>, ConfigError> {
        self.build_with_hasher(RandomState::default())
    }

    /// Builds a `SequentialSet<T, S>` that hashes values with `hasher`.
    ///
    /// # Errors
    ///
    /// Fails if the initial capacity is 0.
    pub fn build_with_hasher<S>(self, hasher: S) -> Result<SequentialSet<T, S>, ConfigError>
    where
        S: BuildHasher,
    {
        let capacity = self.capacity_or(DEFAULT_INITIAL_CAPACITY)?;
        Ok(SequentialSet::with_capacity_and_hasher(capacity, hasher))
    }
}

impl<T> SetBuilder<StripedSet<T, RandomState>>
where
    T: Hash + Eq,
{
    /// Sets the hard limit on the number of values in one bucket.
    pub fn probe_size(self, probe_size: usize) -> Self {
        Self {
            limits: Limits {
                probe_size,
                ..self.limits
            },
            ..self
        }
    }

    /// Sets the bucket occupancy above which an insertion relocates values to
    /// their alternate table.
    pub fn threshold(self, threshold: usize) -> Self {
        Self {
            limits: Limits {
                threshold,
                ..self.limits
            },
            ..self
        }
    }

    /// Sets how many rounds a relocation may take before the set resizes
    /// instead.
    pub fn relocation_limit(self, relocation_limit: usize) -> Self {
        Self {
            limits: Limits {
                relocation_limit,
                ..self.limits
            },
            ..self
        }
    }

    /// Builds a `StripedSet<T>`.
    ///
    /// # Errors
    ///
    /// Fails if the initial capacity, threshold or relocation limit is 0, or
    /// if the threshold is larger than the probe size.
    pub fn build(self) -> Result<StripedSet<T, RandomState>, ConfigError> {
        self.build_with_hasher(RandomState::default())
    }

    /// Builds a `StripedSet<T, S>` that hashes values with `hasher`.
    ///
    /// # Errors
    ///
    /// Same as [`build`](#method.build).
    pub fn build_with_hasher<S>(self, hasher: S) -> Result<StripedSet<T, S>, ConfigError>
    where
        S: BuildHasher,
    {
        let capacity = self.capacity_or(DEFAULT_INITIAL_CAPACITY)?;
        let limits = self.limits;

        if limits.threshold == 0 {
            return Err(ConfigError::ZeroThreshold);
        }
        if limits.threshold > limits.probe_size {
            return Err(ConfigError::ThresholdExceedsProbeSize {
                threshold: limits.threshold,
                probe_size: limits.probe_size,
            });
        }
        if limits.relocation_limit == 0 {
            return Err(ConfigError::ZeroRelocationLimit);
        }

        Ok(StripedSet::with_everything(capacity, limits, hasher))
    }
}

impl<T> SetBuilder<TransactionalSet<T, RandomState>>
where
    T: Hash + Eq + Send + Sync + 'static,
{
    /// Builds a `TransactionalSet<T>`.
    ///
    /// # Errors
    ///
    /// Fails if the initial capacity is 0.
    pub fn build(self) -> Result<TransactionalSet<T, RandomState>, ConfigError> {
        self.build_with_hasher(RandomState::default())
    }

    /// Builds a `TransactionalSet<T, S>` that hashes values with `hasher`.
    ///
    /// # Errors
    ///
    /// Fails if the initial capacity is 0.
    pub fn build_with_hasher<S>(self, hasher: S) -> Result<TransactionalSet<T, S>, ConfigError>
    where
        S: BuildHasher,
    {
        let capacity = self.capacity_or(DEFAULT_TRANSACTIONAL_CAPACITY)?;
        Ok(TransactionalSet::with_capacity_and_hasher(capacity, hasher))
    }
}
