use std::{cmp::Ordering, sync::Arc};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    Error, PackedId, Result, TimeSource, WallClock,
    batch::collect_batch,
    generator::{IdGenStatus, Mutex},
};

/// A lock-based Snowflake ID generator for one (datacenter, machine) pair.
///
/// The generator wraps its state (the last issued ID, which carries the last
/// timestamp and sequence) in an [`Arc<Mutex<_>>`]. The critical section is
/// arithmetic only; all waiting happens outside the lock.
///
/// ## Behavior
/// - Clock moved backwards: the call fails with
///   [`Error::ClockMovedBackwards`]. Nothing is issued for a timestamp older
///   than the last one.
/// - Same millisecond: the sequence increments. Once all 4096 values are
///   used, [`Self::next_id`] busy-spins until the next millisecond.
/// - Newer millisecond: the sequence resets to zero.
///
/// ## See Also
/// - [`GeneratorRegistry`] for one shared instance per key.
///
/// [`GeneratorRegistry`]: crate::GeneratorRegistry
pub struct LockSnowflakeGenerator<T = WallClock>
where
    T: TimeSource,
{
    #[cfg(feature = "cache-padded")]
    pub(crate) state: Arc<crossbeam_utils::CachePadded<Mutex<PackedId>>>,
    #[cfg(not(feature = "cache-padded"))]
    pub(crate) state: Arc<Mutex<PackedId>>,
    pub(crate) time: T,
}

impl<T> LockSnowflakeGenerator<T>
where
    T: TimeSource,
{
    /// Creates a new generator for the given datacenter and machine.
    ///
    /// The initial timestamp and sequence are zero, so the first call always
    /// rolls over to the current time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if either ID exceeds 31.
    ///
    /// # Example
    /// ```
    /// use idforge::{DEFAULT_EPOCH, LockSnowflakeGenerator, WallClock};
    ///
    /// let generator = LockSnowflakeGenerator::new(1, 2, WallClock::with_epoch(DEFAULT_EPOCH).unwrap()).unwrap();
    /// let id: u64 = generator.next_id().unwrap().parse().unwrap();
    /// assert!(id > 0);
    /// ```
    pub fn new(datacenter_id: u64, machine_id: u64, time: T) -> Result<Self> {
        Self::from_components(0, datacenter_id, machine_id, 0, time)
    }

    /// Creates a new generator from explicit component values.
    ///
    /// This constructor is primarily useful for restoring state or
    /// controlling the starting point of the generator in tests. In typical
    /// use cases, prefer [`Self::new`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if any component does not fit its
    /// field.
    pub fn from_components(
        timestamp: u64,
        datacenter_id: u64,
        machine_id: u64,
        sequence: u64,
        time: T,
    ) -> Result<Self> {
        let id = PackedId::try_from_components(timestamp, datacenter_id, machine_id, sequence)?;
        Ok(Self {
            #[cfg(feature = "cache-padded")]
            state: Arc::new(crossbeam_utils::CachePadded::new(Mutex::new(id))),
            #[cfg(not(feature = "cache-padded"))]
            state: Arc::new(Mutex::new(id)),
            time,
        })
    }

    /// Returns the time source's epoch in milliseconds since the Unix epoch.
    pub fn epoch_millis(&self) -> u64 {
        self.time.epoch_millis()
    }

    /// Attempts to generate the next ID without waiting.
    ///
    /// # Returns
    /// - `Ok(IdGenStatus::Ready { id })`: a new ID is available
    /// - `Ok(IdGenStatus::Pending { yield_for })`: the sequence is exhausted
    ///   for this millisecond
    ///
    /// # Errors
    /// - [`Error::ClockMovedBackwards`] if the time source reads earlier than
    ///   the last issued timestamp.
    /// - [`Error::InvalidArgument`] if the timestamp no longer fits 41 bits.
    /// - [`Error::LockPoisoned`] with the std mutex, if another thread
    ///   panicked while holding the lock.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn try_poll_id(&self) -> Result<IdGenStatus> {
        let mut id = {
            #[cfg(feature = "parking-lot")]
            {
                self.state.lock()
            }
            #[cfg(not(feature = "parking-lot"))]
            {
                self.state.lock()?
            }
        };

        // Clock readings must be ordered with the IDs they produce
        let now = self.time.current_millis();
        let current_ts = id.timestamp();
        match now.cmp(&current_ts) {
            Ordering::Equal => {
                if id.has_sequence_room() {
                    *id = id.increment_sequence();
                    Ok(IdGenStatus::Ready { id: *id })
                } else {
                    Ok(IdGenStatus::Pending { yield_for: 1 })
                }
            }
            Ordering::Greater => {
                if now > PackedId::TIMESTAMP_MASK {
                    return Err(Error::invalid_argument(format!(
                        "timestamp {now} exceeds the 41-bit range"
                    )));
                }
                *id = id.rollover_to_timestamp(now);
                Ok(IdGenStatus::Ready { id: *id })
            }
            Ordering::Less => Err(Self::cold_clock_behind(current_ts, now)),
        }
    }

    #[cold]
    #[inline(never)]
    fn cold_clock_behind(last: u64, now: u64) -> Error {
        #[cfg(feature = "tracing")]
        tracing::warn!(last, now, "clock moved backwards, refusing to issue an ID");
        Error::ClockMovedBackwards { last, now }
    }

    /// Generates the next ID, spinning until the next millisecond if the
    /// current one is exhausted.
    ///
    /// # Errors
    ///
    /// See [`Self::try_poll_id`].
    pub fn next_packed_id(&self) -> Result<PackedId> {
        loop {
            match self.try_poll_id()? {
                IdGenStatus::Ready { id } => return Ok(id),
                IdGenStatus::Pending { .. } => core::hint::spin_loop(),
            }
        }
    }

    /// Generates the next ID as a decimal string.
    ///
    /// # Errors
    ///
    /// See [`Self::try_poll_id`].
    pub fn next_id(&self) -> Result<String> {
        self.next_packed_id().map(|id| id.to_string())
    }

    /// Generates `count` IDs, one lock acquisition per ID.
    ///
    /// # Errors
    ///
    /// See [`Self::try_poll_id`]. A failure after the first ID is wrapped in
    /// [`Error::PartialBatch`] together with the IDs already issued.
    pub fn next_ids(&self, count: usize) -> Result<Vec<String>> {
        collect_batch(count, || self.next_id())
    }
}
