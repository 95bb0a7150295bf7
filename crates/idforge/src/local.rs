use std::sync::Arc;

use crate::{
    DecodedId, GeneratorKey, GeneratorRegistry, LocalConfig, LockSnowflakeGenerator, Result,
    TimeSource, WallClock, batch::check_count, decode,
};

/// Snowflake IDs generated in-process, one generator per (datacenter,
/// machine) pair.
///
/// The parameterless calls use the pair from [`LocalConfig`]; the `_for`
/// variants address any pair, creating its generator on first use.
/// Facades built with [`new`](LocalIdGenerator::new) share
/// [`GeneratorRegistry::global`], so any number of them in one process never
/// issue the same ID for a pair.
///
/// # Example
/// ```
/// use idforge::{LocalConfig, LocalIdGenerator};
///
/// let generator = LocalIdGenerator::new(LocalConfig { datacenter_id: 1, machine_id: 2 }).unwrap();
/// let id = generator.next_unique_id().unwrap();
/// let decoded = generator.decode(id.parse().unwrap());
/// assert_eq!((decoded.datacenter_id, decoded.machine_id), (1, 2));
/// ```
pub struct LocalIdGenerator<T = WallClock>
where
    T: TimeSource + Clone,
{
    registry: Arc<GeneratorRegistry<T>>,
    default_key: GeneratorKey,
    epoch_millis: u64,
}

impl LocalIdGenerator<WallClock> {
    /// Uses the process-wide registry on the wall clock measured from
    /// [`DEFAULT_EPOCH`](crate::DEFAULT_EPOCH).
    ///
    /// # Errors
    /// - [`Error::InvalidArgument`] if the configured pair is out of range.
    /// - [`Error::ClockBeforeEpoch`] if the system clock is earlier than the
    ///   epoch.
    ///
    /// [`Error::InvalidArgument`]: crate::Error::InvalidArgument
    /// [`Error::ClockBeforeEpoch`]: crate::Error::ClockBeforeEpoch
    pub fn new(config: LocalConfig) -> Result<Self> {
        Self::with_registry(config, GeneratorRegistry::global()?)
    }
}

impl<T> LocalIdGenerator<T>
where
    T: TimeSource + Clone,
{
    /// Uses a registry of its own on `time`. Another facade with the same
    /// pair will not see its generators.
    pub fn with_time(config: LocalConfig, time: T) -> Result<Self> {
        Self::with_registry(config, Arc::new(GeneratorRegistry::new(time)))
    }

    /// Issues IDs from `registry`, which may be shared with other facades.
    pub fn with_registry(config: LocalConfig, registry: Arc<GeneratorRegistry<T>>) -> Result<Self> {
        let default_key = GeneratorKey::new(config.datacenter_id, config.machine_id)?;
        Ok(Self {
            epoch_millis: registry.epoch_millis(),
            registry,
            default_key,
        })
    }

    pub fn registry(&self) -> &Arc<GeneratorRegistry<T>> {
        &self.registry
    }

    fn generator(&self) -> Result<Arc<LockSnowflakeGenerator<T>>> {
        self.registry.get_generator(
            self.default_key.datacenter_id(),
            self.default_key.machine_id(),
        )
    }

    /// One ID from the configured generator.
    pub fn next_unique_id(&self) -> Result<String> {
        self.generator()?.next_id()
    }

    /// One ID from the generator for `(datacenter_id, machine_id)`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`](crate::Error::InvalidArgument) if either
    /// ID exceeds 31, plus the generator's own clock errors.
    pub fn next_unique_id_for(&self, datacenter_id: u64, machine_id: u64) -> Result<String> {
        self.registry
            .get_generator(datacenter_id, machine_id)?
            .next_id()
    }

    /// `count` IDs from the configured generator.
    ///
    /// # Errors
    ///
    /// [`Error::CountOutOfRange`](crate::Error::CountOutOfRange) unless
    /// `count` is in `[1, 1000]`.
    pub fn next_unique_ids(&self, count: usize) -> Result<Vec<String>> {
        check_count(count)?;
        self.generator()?.next_ids(count)
    }

    pub fn next_unique_ids_for(
        &self,
        datacenter_id: u64,
        machine_id: u64,
        count: usize,
    ) -> Result<Vec<String>> {
        check_count(count)?;
        self.registry
            .get_generator(datacenter_id, machine_id)?
            .next_ids(count)
    }

    /// Splits an ID issued by this generator into its fields.
    pub fn decode(&self, id: u64) -> DecodedId {
        decode(self.epoch_millis, id)
    }
}
