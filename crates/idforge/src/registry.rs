use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use crate::{
    DEFAULT_EPOCH, Error, LockSnowflakeGenerator, PackedId, Result, TimeSource, WallClock,
};

/// Identifies one [`LockSnowflakeGenerator`]: a (datacenter, machine) pair,
/// both in `[0, 31]`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeneratorKey {
    datacenter_id: u64,
    machine_id: u64,
}

impl GeneratorKey {
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if either ID exceeds 31.
    pub fn new(datacenter_id: u64, machine_id: u64) -> Result<Self> {
        if datacenter_id > PackedId::DATACENTER_ID_MASK {
            return Err(Error::invalid_argument(format!(
                "datacenter_id {datacenter_id} exceeds maximum {}",
                PackedId::DATACENTER_ID_MASK
            )));
        }
        if machine_id > PackedId::MACHINE_ID_MASK {
            return Err(Error::invalid_argument(format!(
                "machine_id {machine_id} exceeds maximum {}",
                PackedId::MACHINE_ID_MASK
            )));
        }
        Ok(Self {
            datacenter_id,
            machine_id,
        })
    }

    pub const fn datacenter_id(&self) -> u64 {
        self.datacenter_id
    }

    pub const fn machine_id(&self) -> u64 {
        self.machine_id
    }
}

/// Cache holding one generator per [`GeneratorKey`].
///
/// Generators are created lazily on first access and kept for the lifetime
/// of the registry. [`GeneratorRegistry::global`] is the process-wide
/// instance; every registry built with [`GeneratorRegistry::new`] is
/// independent of it, so two registries sharing a key issue colliding IDs. Creation goes through the map's entry API, so only the
/// shard owning the key is locked and only while the generator is inserted.
/// Callers racing on the same new key all receive the single instance that
/// was inserted.
pub struct GeneratorRegistry<T = WallClock>
where
    T: TimeSource + Clone,
{
    generators: DashMap<GeneratorKey, Arc<LockSnowflakeGenerator<T>>>,
    time: T,
}

impl<T> GeneratorRegistry<T>
where
    T: TimeSource + Clone,
{
    /// Creates an empty registry. Every generator gets a clone of `time`.
    pub fn new(time: T) -> Self {
        Self {
            generators: DashMap::new(),
            time,
        }
    }

    /// Returns the generator for `(datacenter_id, machine_id)`, creating it on
    /// first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if either ID exceeds 31.
    pub fn get_generator(
        &self,
        datacenter_id: u64,
        machine_id: u64,
    ) -> Result<Arc<LockSnowflakeGenerator<T>>> {
        let key = GeneratorKey::new(datacenter_id, machine_id)?;

        if let Some(generator) = self.generators.get(&key) {
            return Ok(Arc::clone(generator.value()));
        }

        let generator = self.generators.entry(key).or_try_insert_with(|| {
            #[cfg(feature = "tracing")]
            tracing::debug!(datacenter_id, machine_id, "creating snowflake generator");
            LockSnowflakeGenerator::new(datacenter_id, machine_id, self.time.clone()).map(Arc::new)
        })?;
        Ok(Arc::clone(generator.value()))
    }

    /// Milliseconds since the Unix epoch that IDs from this registry are
    /// measured from.
    pub fn epoch_millis(&self) -> u64 {
        self.time.epoch_millis()
    }

    /// Number of generators created so far.
    pub fn len(&self) -> usize {
        self.generators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }
}

impl GeneratorRegistry<WallClock> {
    /// The registry shared by the whole process, on the wall clock measured
    /// from [`DEFAULT_EPOCH`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClockBeforeEpoch`] if the system clock is earlier
    /// than the epoch on first use.
    pub fn global() -> Result<Arc<Self>> {
        static GLOBAL: OnceLock<Arc<GeneratorRegistry>> = OnceLock::new();
        if let Some(registry) = GLOBAL.get() {
            return Ok(Arc::clone(registry));
        }
        let registry = Arc::new(Self::new(WallClock::with_epoch(DEFAULT_EPOCH)?));
        Ok(Arc::clone(GLOBAL.get_or_init(|| registry)))
    }
}
