use core::future::Future;

use crate::{Error, Result};

/// Upper bound on the number of IDs a single batch call may request.
pub const MAX_BATCH_COUNT: usize = 1000;

/// Rejects batch sizes outside `[1, MAX_BATCH_COUNT]`.
pub(crate) fn check_count(count: usize) -> Result<()> {
    if count == 0 || count > MAX_BATCH_COUNT {
        return Err(Error::CountOutOfRange {
            count,
            max: MAX_BATCH_COUNT,
        });
    }
    Ok(())
}

fn partial(issued: Vec<String>, cause: Error) -> Error {
    if issued.is_empty() {
        cause
    } else {
        Error::PartialBatch {
            issued,
            cause: Box::new(cause),
        }
    }
}

/// Calls `next` `count` times, stopping at the first failure.
pub(crate) fn collect_batch(
    count: usize,
    mut next: impl FnMut() -> Result<String>,
) -> Result<Vec<String>> {
    let mut issued = Vec::with_capacity(count);
    for _ in 0..count {
        match next() {
            Ok(id) => issued.push(id),
            Err(e) => return Err(partial(issued, e)),
        }
    }
    Ok(issued)
}

/// Async counterpart of [`collect_batch`]. Calls run sequentially.
pub(crate) async fn collect_batch_async<F, Fut>(count: usize, mut next: F) -> Result<Vec<String>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let mut issued = Vec::with_capacity(count);
    for _ in 0..count {
        match next().await {
            Ok(id) => issued.push(id),
            Err(e) => return Err(partial(issued, e)),
        }
    }
    Ok(issued)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_bounds() {
        assert!(check_count(1).is_ok());
        assert!(check_count(MAX_BATCH_COUNT).is_ok());
        assert_eq!(
            check_count(0),
            Err(Error::CountOutOfRange { count: 0, max: 1000 })
        );
        assert_eq!(
            check_count(1001),
            Err(Error::CountOutOfRange {
                count: 1001,
                max: 1000
            })
        );
    }

    #[test]
    fn failure_on_first_call_is_returned_unwrapped() {
        let err = collect_batch(3, || Err(Error::ClockBeforeEpoch)).unwrap_err();
        assert_eq!(err, Error::ClockBeforeEpoch);
    }

    #[test]
    fn failure_mid_batch_keeps_issued_ids() {
        let mut n = 0;
        let err = collect_batch(5, || {
            n += 1;
            if n == 3 {
                Err(Error::ClockMovedBackwards { last: 2, now: 1 })
            } else {
                Ok(n.to_string())
            }
        })
        .unwrap_err();

        match err {
            Error::PartialBatch { issued, cause } => {
                assert_eq!(issued, vec!["1".to_string(), "2".to_string()]);
                assert_eq!(*cause, Error::ClockMovedBackwards { last: 2, now: 1 });
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn async_batch_runs_sequentially() {
        let mut n = 0;
        let ids = collect_batch_async(4, || {
            n += 1;
            let id = n.to_string();
            async move { Ok(id) }
        })
        .await
        .unwrap();
        assert_eq!(ids, ["1", "2", "3", "4"]);
    }
}
