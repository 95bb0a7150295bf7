use std::{
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use crate::{Error, Result};

/// Default epoch for packed IDs: Sunday, January 1, 2017 00:00:00 UTC+08:00
/// (2016-12-31 16:00:00 UTC).
///
/// IDs already issued by deployed generators are relative to this instant, so
/// changing it breaks ordering against existing data.
pub const DEFAULT_EPOCH: Duration = Duration::from_millis(DEFAULT_EPOCH_MILLIS);

/// [`DEFAULT_EPOCH`] in milliseconds since the Unix epoch.
pub const DEFAULT_EPOCH_MILLIS: u64 = 1_483_200_000_000;

/// A source of millisecond timestamps relative to a fixed origin.
///
/// This abstraction allows you to plug in the system wall clock, a monotonic
/// ticker, or a mocked time source in tests.
///
/// # Example
///
/// ```
/// use idforge::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn current_millis(&self) -> u64 {
///         1234
///     }
/// }
///
/// assert_eq!(FixedTime.current_millis(), 1234);
/// assert_eq!(FixedTime.epoch_millis(), 0);
/// ```
pub trait TimeSource {
    /// Returns the current time in milliseconds since [`Self::epoch_millis`].
    fn current_millis(&self) -> u64;

    /// The origin of [`Self::current_millis`], in milliseconds since the Unix
    /// epoch.
    fn epoch_millis(&self) -> u64 {
        0
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

/// Reads the system wall clock on every call.
///
/// Wall-clock time can be stepped backwards by NTP or an operator. The local
/// generator detects this and fails with [`Error::ClockMovedBackwards`]
/// instead of reissuing an old timestamp.
#[derive(Clone, Copy, Debug)]
pub struct WallClock {
    epoch: u64,
}

impl WallClock {
    /// Creates a wall clock whose zero point is `epoch` (a [`Duration`] since
    /// 1970-01-01 UTC).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClockBeforeEpoch`] if the system clock currently reads
    /// earlier than `epoch`.
    pub fn with_epoch(epoch: Duration) -> Result<Self> {
        let epoch = epoch.as_millis() as u64;
        if unix_millis() < epoch {
            return Err(Error::ClockBeforeEpoch);
        }
        Ok(Self { epoch })
    }
}

impl TimeSource for WallClock {
    fn current_millis(&self) -> u64 {
        // Clamp to zero rather than wrap; a reading below the epoch is then
        // reported by the generator as a backwards jump.
        unix_millis().saturating_sub(self.epoch)
    }

    fn epoch_millis(&self) -> u64 {
        self.epoch
    }
}

/// Shared ticker thread that updates every millisecond.
#[derive(Debug)]
struct SharedTickerInner {
    current: AtomicU64,
    _handle: OnceLock<JoinHandle<()>>,
}

/// A monotonic time source that returns elapsed time since construction,
/// offset from a user-defined epoch.
///
/// This avoids wall-clock adjustments (e.g., NTP steps) while still aligning
/// timestamps to a fixed origin. A generator driven by this clock never sees
/// the clock move backwards within one process.
#[derive(Clone, Debug)]
pub struct MonotonicClock {
    inner: Arc<SharedTickerInner>,
    epoch: u64,
    epoch_offset: u64, // in milliseconds
}

impl MonotonicClock {
    /// Constructs a monotonic clock using `epoch` as the origin (t = 0).
    ///
    /// Internally, the clock spawns a background thread that updates a shared
    /// atomic counter once per millisecond, using a monotonic timer
    /// (`Instant`) to measure elapsed time since startup. Reads add a fixed
    /// offset: the difference between the wall clock at construction and the
    /// epoch. The thread exits once the last clone is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClockBeforeEpoch`] if the system clock currently reads
    /// earlier than `epoch`.
    pub fn with_epoch(epoch: Duration) -> Result<Self> {
        let epoch = epoch.as_millis() as u64;
        let offset = unix_millis()
            .checked_sub(epoch)
            .ok_or(Error::ClockBeforeEpoch)?;

        let inner = Arc::new(SharedTickerInner {
            current: AtomicU64::new(0),
            _handle: OnceLock::new(),
        });

        let weak_inner = Arc::downgrade(&inner);
        let handle = thread::spawn(move || {
            let start = Instant::now();
            let mut tick = 0;

            loop {
                let Some(inner_ref) = weak_inner.upgrade() else {
                    break;
                };

                // Absolute target time of the next tick
                let target = start + Duration::from_millis(tick);

                let now = Instant::now();
                if now < target {
                    thread::sleep(target - now);
                }

                let now_ms = start.elapsed().as_millis() as u64;
                inner_ref.current.store(now_ms, Ordering::Release);

                tick = now_ms + 1;
            }
        });

        // Freshly created, so the cell is empty
        let _ = inner._handle.set(handle);

        Ok(Self {
            inner,
            epoch,
            epoch_offset: offset,
        })
    }
}

impl TimeSource for MonotonicClock {
    fn current_millis(&self) -> u64 {
        self.epoch_offset + self.inner.current.load(Ordering::Acquire)
    }

    fn epoch_millis(&self) -> u64 {
        self.epoch
    }
}
