#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod batch;
mod config;
mod coordination;
mod counter;
mod error;
mod generator;
mod id;
mod key;
mod local;
mod memory;
mod registry;
mod retry;
mod time;

pub use crate::batch::MAX_BATCH_COUNT;
pub use crate::config::*;
pub use crate::coordination::*;
pub use crate::counter::*;
pub use crate::error::*;
pub use crate::generator::{IdGenStatus, LockSnowflakeGenerator};
pub use crate::id::*;
pub use crate::key::*;
pub use crate::local::*;
pub use crate::memory::*;
pub use crate::registry::*;
pub use crate::retry::{
    BoundedExponentialBackoffRetryConfig, ExponentialBackoffRetryConfig, MAX_RETRIES_LIMIT,
    RetryConfig, RetryForeverConfig, RetryNTimesConfig, RetryPolicy, RetryType,
    RetryUntilElapsedConfig,
};
pub use crate::time::*;
