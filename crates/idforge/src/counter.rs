//! Counter IDs backed by an atomic increment in a shared cache.
//!
//! One script call increments the counter and reads the server clock, so
//! the two values come from the same atomic step on the server. The ID is
//! the server time formatted as `yyyyMMddHHmmssSSS` (UTC) followed by the
//! counter, left-padded with zeros or cut down to its rightmost digits.

use core::future::Future;

use chrono::{DateTime, Utc};
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    CompositeKey, CounterConfig, Error, Result,
    batch::{check_count, collect_batch_async},
    key::check_composite,
};

/// Increments `KEYS[1]` by `ARGV[1]` and returns `{seconds, microseconds,
/// counter}`, the first two read from the server clock.
pub const INCREMENT_SCRIPT: &str = "\
local count = tonumber(redis.call('incrby', KEYS[1], ARGV[1]))
local now = redis.call('time')
return {now[1], now[2], count}";

/// One element of a script reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptValue {
    Int(i64),
    Bulk(String),
}

impl ScriptValue {
    /// The value as an integer. Bulk strings are parsed.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Bulk(text) => text.parse().ok(),
        }
    }
}

/// Errors reported by a [`ScriptExecutor`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The server rejected or failed to run the script.
    #[error("script failed: {0}")]
    Script(String),

    /// The connection to the server failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The reply did not have the expected shape.
    #[error("malformed reply: {0}")]
    MalformedReply(String),
}

/// Capability interface for a shared cache that runs server-side scripts
/// atomically (the role Redis plays in most deployments).
pub trait ScriptExecutor: Send + Sync {
    /// Runs `script` with the given keys and arguments and returns the
    /// reply's elements.
    fn eval(
        &self,
        script: &str,
        keys: &[String],
        args: &[String],
    ) -> impl Future<Output = Result<Vec<ScriptValue>, StoreError>> + Send;
}

/// Issues IDs from a per-key counter held by a [`ScriptExecutor`].
///
/// Uniqueness is global for a composite key as long as every issuer talks
/// to the same store and the counter does not wrap past `length` digits.
///
/// # Example
/// ```
/// use idforge::{CounterConfig, CounterIdGenerator, MemoryScriptStore};
///
/// # tokio_test_block_on(async {
/// let generator = CounterIdGenerator::new(MemoryScriptStore::new(), CounterConfig::default()).unwrap();
/// let id = generator.next_unique_id_for("order", "k1", 1, 4).await.unwrap();
/// assert_eq!(id.len(), 17 + 4);
/// assert!(id.ends_with("0001"));
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
pub struct CounterIdGenerator<S> {
    store: S,
    config: CounterConfig,
}

impl<S> CounterIdGenerator<S>
where
    S: ScriptExecutor,
{
    /// # Errors
    ///
    /// Returns [`Error::EmptyKey`] for an empty prefix and
    /// [`Error::InvalidArgument`] for a zero default step or length.
    pub fn new(store: S, config: CounterConfig) -> Result<Self> {
        if config.prefix.is_empty() {
            return Err(Error::EmptyKey("prefix"));
        }
        check_step(config.step)?;
        check_length(config.length)?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &CounterConfig {
        &self.config
    }

    /// Issues one ID for an already composed key.
    ///
    /// # Errors
    /// - [`Error::EmptyKey`] if `composite_key` is empty.
    /// - [`Error::InvalidArgument`] if `step` or `length` is zero.
    /// - [`Error::Store`] if the script failed or replied with garbage.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub async fn next_unique_id(
        &self,
        composite_key: &str,
        step: u64,
        length: usize,
    ) -> Result<String> {
        check_composite(composite_key)?;
        check_step(step)?;
        check_length(length)?;

        let keys = [composite_key.to_string()];
        let args = [step.to_string()];
        let reply = self.store.eval(INCREMENT_SCRIPT, &keys, &args).await?;
        let (millis, counter) = parse_reply(&reply)?;
        Ok(format_id(millis, counter, length)?)
    }

    /// Issues one ID for `prefix:name:key`.
    pub async fn next_unique_id_for(
        &self,
        name: &str,
        key: &str,
        step: u64,
        length: usize,
    ) -> Result<String> {
        let composite = CompositeKey::new(&self.config.prefix, name, key)?;
        self.next_unique_id(composite.as_str(), step, length).await
    }

    /// Issues one ID for `prefix:name:key` with the configured step and
    /// length.
    pub async fn next_configured_id(&self, name: &str, key: &str) -> Result<String> {
        self.next_unique_id_for(name, key, self.config.step, self.config.length)
            .await
    }

    /// Issues `count` IDs, one script call each.
    ///
    /// # Errors
    ///
    /// [`Error::CountOutOfRange`] unless `count` is in `[1, 1000]`. A store
    /// failure after the first ID yields [`Error::PartialBatch`].
    pub async fn next_unique_ids(
        &self,
        composite_key: &str,
        step: u64,
        length: usize,
        count: usize,
    ) -> Result<Vec<String>> {
        check_count(count)?;
        collect_batch_async(count, || self.next_unique_id(composite_key, step, length)).await
    }

    pub async fn next_unique_ids_for(
        &self,
        name: &str,
        key: &str,
        step: u64,
        length: usize,
        count: usize,
    ) -> Result<Vec<String>> {
        let composite = CompositeKey::new(&self.config.prefix, name, key)?;
        self.next_unique_ids(composite.as_str(), step, length, count)
            .await
    }
}

fn check_step(step: u64) -> Result<()> {
    if step == 0 || step > i64::MAX as u64 {
        return Err(Error::invalid_argument(format!(
            "step must be in [1, {}], got {step}",
            i64::MAX
        )));
    }
    Ok(())
}

fn check_length(length: usize) -> Result<()> {
    if length == 0 {
        return Err(Error::invalid_argument("length must be positive"));
    }
    Ok(())
}

/// Extracts `(unix millis, counter)` from an [`INCREMENT_SCRIPT`] reply.
fn parse_reply(reply: &[ScriptValue]) -> Result<(i64, u64), StoreError> {
    let [seconds, micros, counter] = reply else {
        return Err(StoreError::MalformedReply(format!(
            "expected 3 elements, got {}",
            reply.len()
        )));
    };
    let field = |value: &ScriptValue, name: &str| {
        value
            .as_i64()
            .ok_or_else(|| StoreError::MalformedReply(format!("{name} is not an integer: {value:?}")))
    };
    let seconds = field(seconds, "seconds")?;
    let micros = field(micros, "microseconds")?;
    let counter = field(counter, "counter")?;

    let millis = seconds
        .checked_mul(1000)
        .and_then(|ms| ms.checked_add(micros / 1000))
        .ok_or_else(|| StoreError::MalformedReply(format!("time out of range: {seconds}s")))?;
    let counter = u64::try_from(counter)
        .map_err(|_| StoreError::MalformedReply(format!("negative counter {counter}")))?;
    Ok((millis, counter))
}

fn format_id(millis: i64, counter: u64, length: usize) -> Result<String, StoreError> {
    let time = DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::MalformedReply(format!("time out of range: {millis}ms")))?;
    let mut id = time.format("%Y%m%d%H%M%S%3f").to_string();
    id.push_str(&fit_digits(counter, length));
    Ok(id)
}

/// Left-pads `value` with zeros to `length` digits, or keeps only its
/// rightmost `length` digits.
fn fit_digits(value: u64, length: usize) -> String {
    let digits = value.to_string();
    if digits.len() >= length {
        digits[digits.len() - length..].to_string()
    } else {
        format!("{digits:0>length$}")
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use super::*;
    use crate::MemoryScriptStore;

    fn generator() -> CounterIdGenerator<MemoryScriptStore> {
        CounterIdGenerator::new(MemoryScriptStore::new(), CounterConfig::default()).unwrap()
    }

    /// Replies with a fixed time and a scripted sequence of results.
    struct ScriptedStore {
        replies: std::sync::Mutex<Vec<Result<Vec<ScriptValue>, StoreError>>>,
    }

    impl ScriptedStore {
        fn new(mut replies: Vec<Result<Vec<ScriptValue>, StoreError>>) -> Self {
            replies.reverse();
            Self {
                replies: std::sync::Mutex::new(replies),
            }
        }
    }

    impl ScriptExecutor for ScriptedStore {
        async fn eval(
            &self,
            _script: &str,
            _keys: &[String],
            _args: &[String],
        ) -> Result<Vec<ScriptValue>, StoreError> {
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(StoreError::Connection("exhausted".into())))
        }
    }

    fn reply(seconds: &str, micros: &str, counter: i64) -> Result<Vec<ScriptValue>, StoreError> {
        Ok(vec![
            ScriptValue::Bulk(seconds.into()),
            ScriptValue::Bulk(micros.into()),
            ScriptValue::Int(counter),
        ])
    }

    #[test]
    fn fits_digits_by_padding_or_truncating() {
        assert_eq!(fit_digits(1, 4), "0001");
        assert_eq!(fit_digits(1234, 4), "1234");
        assert_eq!(fit_digits(12345, 4), "2345");
        assert_eq!(fit_digits(0, 3), "000");
        assert_eq!(fit_digits(7, 1), "7");
    }

    #[test]
    fn formats_server_time_in_utc() {
        // 2017-01-01T00:00:00.026Z
        let id = format_id(1_483_228_800_026, 42, 8).unwrap();
        assert_eq!(id, "2017010100000002600000042");
    }

    #[test]
    fn parses_bulk_and_integer_replies() {
        let (millis, counter) = parse_reply(&reply("1483228800", "26999", 5).unwrap()).unwrap();
        assert_eq!(millis, 1_483_228_800_026);
        assert_eq!(counter, 5);

        assert!(matches!(
            parse_reply(&[ScriptValue::Int(1)]),
            Err(StoreError::MalformedReply(_))
        ));
        assert!(matches!(
            parse_reply(&reply("now", "0", 1).unwrap()),
            Err(StoreError::MalformedReply(_))
        ));
        assert!(matches!(
            parse_reply(&reply("1", "0", -1).unwrap()),
            Err(StoreError::MalformedReply(_))
        ));
    }

    #[tokio::test]
    async fn batch_of_five_is_distinct_and_counts_up() {
        let generator = generator();
        let ids = generator
            .next_unique_ids_for("order", "k1", 1, 4, 5)
            .await
            .unwrap();

        assert_eq!(ids.len(), 5);
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 5);
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(id.len(), 17 + 4);
            assert!(id.bytes().all(|b| b.is_ascii_digit()));
            assert_eq!(&id[17..], format!("{:04}", i + 1));
        }
    }

    #[tokio::test]
    async fn step_advances_the_counter() {
        let generator = generator();
        let a = generator.next_unique_id_for("order", "k1", 5, 8).await.unwrap();
        let b = generator.next_unique_id_for("order", "k1", 5, 8).await.unwrap();
        assert_eq!(&a[17..], "00000005");
        assert_eq!(&b[17..], "00000010");
    }

    #[tokio::test]
    async fn keys_count_independently() {
        let generator = generator();
        generator.next_unique_id_for("order", "k1", 1, 4).await.unwrap();
        let other = generator.next_unique_id_for("order", "k2", 1, 4).await.unwrap();
        assert!(other.ends_with("0001"));
        let configured = generator.next_configured_id("order", "k2").await.unwrap();
        assert!(configured.ends_with("00000002"));
    }

    #[tokio::test]
    async fn truncation_keeps_rightmost_digits() {
        let store = MemoryScriptStore::new();
        store.set_counter("idforge:order:k1", 99_999);
        let generator = CounterIdGenerator::new(store, CounterConfig::default()).unwrap();
        let id = generator.next_unique_id_for("order", "k1", 1, 4).await.unwrap();
        assert!(id.ends_with("0000"));
    }

    #[tokio::test]
    async fn rejects_bad_arguments_before_calling_the_store() {
        let generator = CounterIdGenerator::new(ScriptedStore::new(vec![]), CounterConfig::default())
            .unwrap();
        for count in [0, 1001] {
            assert_eq!(
                generator.next_unique_ids("p:n:k", 1, 4, count).await,
                Err(Error::CountOutOfRange { count, max: 1000 })
            );
        }
        assert!(matches!(
            generator.next_unique_id("p:n:k", 0, 4).await,
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            generator.next_unique_id("p:n:k", 1, 0).await,
            Err(Error::InvalidArgument { .. })
        ));
        assert_eq!(
            generator.next_unique_id("", 1, 4).await,
            Err(Error::EmptyKey("composite key"))
        );
        assert_eq!(
            generator.next_unique_id_for("", "k", 1, 4).await,
            Err(Error::EmptyKey("name"))
        );
    }

    #[test]
    fn rejects_bad_config() {
        let config = CounterConfig {
            length: 0,
            ..CounterConfig::default()
        };
        assert!(CounterIdGenerator::new(MemoryScriptStore::new(), config).is_err());
        let config = CounterConfig {
            prefix: String::new(),
            ..CounterConfig::default()
        };
        assert_eq!(
            CounterIdGenerator::new(MemoryScriptStore::new(), config).err(),
            Some(Error::EmptyKey("prefix"))
        );
    }

    #[tokio::test]
    async fn store_failure_mid_batch_keeps_issued_ids() {
        let store = ScriptedStore::new(vec![
            reply("1483228800", "0", 1),
            reply("1483228800", "0", 2),
            Err(StoreError::Connection("reset by peer".into())),
        ]);
        let generator = CounterIdGenerator::new(store, CounterConfig::default()).unwrap();
        let err = generator
            .next_unique_ids("p:n:k", 1, 2, 5)
            .await
            .unwrap_err();
        let Error::PartialBatch { issued, cause } = err else {
            panic!("expected partial batch, got {err:?}");
        };
        assert_eq!(issued, ["2017010100000000001", "2017010100000000002"]);
        assert_eq!(
            *cause,
            Error::Store(StoreError::Connection("reset by peer".into()))
        );
    }

    #[tokio::test]
    async fn first_failure_is_returned_as_is() {
        let store = ScriptedStore::new(vec![Err(StoreError::Script("NOSCRIPT".into()))]);
        let generator = CounterIdGenerator::new(store, CounterConfig::default()).unwrap();
        assert_eq!(
            generator.next_unique_ids("p:n:k", 1, 2, 3).await,
            Err(Error::Store(StoreError::Script("NOSCRIPT".into())))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_never_collide() {
        let generator = Arc::new(generator());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = Arc::clone(&generator);
                tokio::spawn(async move {
                    generator
                        .next_unique_ids_for("order", "k1", 1, 8, 250)
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut suffixes = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(suffixes.insert(id[17..].to_string()));
            }
        }
        assert_eq!(suffixes.len(), 2000);
    }
}
