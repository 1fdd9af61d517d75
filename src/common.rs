pub(crate) mod entry;
pub(crate) mod error;
pub(crate) mod hash_pair;

/// The default number of buckets per table of the sequential and striped sets.
pub const DEFAULT_INITIAL_CAPACITY: usize = 16;

/// The default number of buckets per table of the transactional set.
pub const DEFAULT_TRANSACTIONAL_CAPACITY: usize = 32;

/// The default hard limit on the number of entries in one probe set.
pub const DEFAULT_PROBE_SIZE: usize = 8;

/// The default occupancy below which a probe set accepts an entry without
/// scheduling a relocation.
pub const DEFAULT_THRESHOLD: usize = 4;

/// The default number of rounds a relocation chain may take.
pub const DEFAULT_RELOCATION_LIMIT: usize = 16;
