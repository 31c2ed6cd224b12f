//! Bounded concurrent execution of remote calls.
//!
//! [`BoundedCaller`] is the fetch/write loop every module shares: it
//! takes a sequence of request descriptors, keeps at most `concurrency`
//! of them in flight, retries transient failures per call, and reports
//! each outcome through a success or failure callback. A failed item
//! never stops the batch.

use futures::stream::{self, StreamExt};
use std::future::Future;

use crate::error::{Error, Result};
use crate::retry::{with_retry, RetryConfig};

/// Counts produced by one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Calls whose success callback ran.
    pub succeeded: u64,
    /// Calls that failed after exhausting retries.
    pub failed: u64,
}

impl BatchOutcome {
    /// Total number of calls resolved.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.succeeded + self.failed
    }
}

/// Executes batches of calls with a fixed concurrency ceiling.
#[derive(Debug, Clone)]
pub struct BoundedCaller {
    concurrency: usize,
    retry: RetryConfig,
}

impl BoundedCaller {
    /// Creates a caller; a zero limit is treated as one.
    #[must_use]
    pub fn new(concurrency: usize, retry: RetryConfig) -> Self {
        Self {
            concurrency: concurrency.max(1),
            retry,
        }
    }

    /// Runs `call` for every request.
    ///
    /// Requests are dispatched in input order; completion order is
    /// unconstrained. Callbacks run on the driving task, one at a time,
    /// so they may mutate caller state without synchronisation.
    ///
    /// # Errors
    ///
    /// Only an error returned by `on_success` (e.g. the chunk store cannot
    /// be written) aborts the batch. Call failures go to `on_failure`.
    pub async fn run<R, T, F, Fut, S, E>(
        &self,
        label: &str,
        requests: impl IntoIterator<Item = R>,
        call: F,
        mut on_success: S,
        mut on_failure: E,
    ) -> Result<BatchOutcome>
    where
        R: Clone,
        F: Fn(R) -> Fut,
        Fut: Future<Output = Result<T>>,
        S: FnMut(R, T) -> Result<()>,
        E: FnMut(R, Error),
    {
        let call = &call;
        let retry = &self.retry;

        let mut in_flight = stream::iter(requests.into_iter().map(|request| async move {
            let result = with_retry(retry, label, || call(request.clone())).await;
            (request, result)
        }))
        .buffer_unordered(self.concurrency);

        let mut outcome = BatchOutcome::default();
        while let Some((request, result)) = in_flight.next().await {
            match result {
                Ok(value) => {
                    on_success(request, value)?;
                    outcome.succeeded += 1;
                }
                Err(e) => {
                    on_failure(request, e);
                    outcome.failed += 1;
                }
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
#[path = "concurrency_tests.rs"]
mod tests;
