/// The error type returned by [`SetBuilder::build`][build] when the requested
/// configuration cannot produce a working set.
///
/// [build]: ../struct.SetBuilder.html#method.build
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Each table needs at least one bucket.
    #[error("The initial capacity must be at least 1")]
    ZeroCapacity,

    /// A probe set with a zero threshold would send every insertion down the
    /// relocation path.
    #[error("The probe set threshold must be at least 1")]
    ZeroThreshold,

    /// The threshold is the soft occupancy limit of a probe set and cannot be
    /// larger than its hard limit.
    #[error("The probe set threshold ({threshold}) exceeds the probe set size ({probe_size})")]
    ThresholdExceedsProbeSize { threshold: usize, probe_size: usize },

    /// Relocation must be allowed at least one round.
    #[error("The relocation limit must be at least 1")]
    ZeroRelocationLimit,
}
