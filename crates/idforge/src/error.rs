//! Error types shared by every ID generation strategy.
//!
//! Variants fall into four groups:
//! - configuration errors, raised synchronously before any I/O;
//! - clock errors from the local Snowflake generator;
//! - session-state errors from the coordination session manager;
//! - backend errors bubbled up from a [`ScriptExecutor`] or
//!   [`CoordinationClient`].
//!
//! [`ScriptExecutor`]: crate::ScriptExecutor
//! [`CoordinationClient`]: crate::CoordinationClient

use core::time::Duration;

use crate::{CoordinationError, SessionState, StoreError};

/// A result type defaulting to this crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All error variants that `idforge` can emit.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An argument was outside its documented range.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// A required key component (prefix, name, key, composite key) was empty.
    #[error("{0} is empty")]
    EmptyKey(&'static str),

    /// A batch request asked for zero IDs or more than the batch limit.
    #[error("count must be in [1, {max}], got {count}")]
    CountOutOfRange { count: usize, max: usize },

    /// The time source reported a timestamp older than the last one issued.
    #[error("clock moved backwards: last issued {last} ms, now {now} ms")]
    ClockMovedBackwards { last: u64, now: u64 },

    /// The system clock reads earlier than the configured epoch.
    #[error("system clock is before the configured epoch")]
    ClockBeforeEpoch,

    /// The coordination connect string was missing or blank.
    #[error("coordination connect string is empty")]
    MissingConnectString,

    /// The configured retry type does not name a known retry policy.
    #[error("unsupported retry type: {0:?}")]
    UnsupportedRetryType(String),

    /// The coordination session did not connect within the allotted time.
    #[error("timed out after {0:?} waiting for the coordination session")]
    ConnectionTimeout(Duration),

    /// A session operation was attempted in the wrong lifecycle state.
    #[error("cannot {op} while session is {state}")]
    InvalidState {
        state: SessionState,
        op: &'static str,
    },

    /// A batch failed part-way through.
    ///
    /// Identifiers issued before the failure stay issued; they are handed
    /// back so the caller can decide whether a short batch is usable.
    #[error("batch failed after {} ids: {cause}", issued.len())]
    PartialBatch { issued: Vec<String>, cause: Box<Error> },

    /// The shared-cache backend failed or returned a malformed reply.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The coordination backend failed.
    #[error("coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    /// The operation failed because the lock was **poisoned**.
    ///
    /// This occurs when a thread panics while holding the lock. When the
    /// `parking-lot` feature is enabled, mutexes do **not** poison, so this
    /// variant is not available.
    #[cfg_attr(docsrs, doc(cfg(not(feature = "parking-lot"))))]
    #[cfg(not(feature = "parking-lot"))]
    #[error("lock poisoned")]
    LockPoisoned,
}

impl Error {
    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }
}

#[cfg(not(feature = "parking-lot"))]
use crate::generator::{MutexGuard, PoisonError};
#[cfg(not(feature = "parking-lot"))]
impl<T> From<PoisonError<MutexGuard<'_, T>>> for Error {
    fn from(_: PoisonError<MutexGuard<'_, T>>) -> Self {
        Self::LockPoisoned
    }
}
