//! Concurrent dispatch of one operation across a fleet
//!
//! Every target gets its own tokio task. The coordinator joins all of them,
//! whatever their outcome, and only then reports. There is no cross-target
//! atomicity: a failure on one cluster never cancels or reverts work on
//! another, and nothing is retried here.
//!
//! Units live as long as the call. If the caller's future is dropped (for
//! example because the RPC was cancelled), every unit still running is
//! aborted. Siblings are never cancelled because one of them failed.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use tokio::task::AbortHandle;
use tracing::{debug, info_span, warn, Instrument};

use rudder_common::{Error, Result};

use crate::federation::{Target, TargetRole};

/// Line placed between per-cluster blocks of a merged status
pub const STATUS_SEPARATOR: &str = "\n----------------------------------------\n";

const NO_FAILURE: usize = usize::MAX;

/// Outcome of the operation on one target
#[derive(Debug)]
pub struct TargetOutcome<T> {
    /// Identity of the target
    pub identity: String,
    /// Role of the target
    pub role: TargetRole,
    /// What the operation returned
    pub result: Result<T>,
}

/// Outcomes of a fan-out, in dispatch order
#[derive(Debug)]
pub struct AggregateResult<T> {
    outcomes: Vec<TargetOutcome<T>>,
    first_failure: Option<usize>,
}

impl<T> AggregateResult<T> {
    /// Every outcome, control plane first
    pub fn outcomes(&self) -> &[TargetOutcome<T>] {
        &self.outcomes
    }

    /// The failure that completed first, if any
    pub fn first_error(&self) -> Option<&Error> {
        self.first_failure
            .and_then(|i| self.outcomes.get(i))
            .and_then(|o| o.result.as_ref().err())
    }

    /// Number of targets whose operation failed
    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }

    /// Number of targets dispatched to
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether nothing was dispatched
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Payloads in dispatch order, or the first failure
    pub fn into_result(self) -> Result<Vec<T>> {
        if let Some(index) = self.first_failure {
            return Err(take_error(self.outcomes, index));
        }
        self.outcomes.into_iter().map(|o| o.result).collect()
    }
}

impl AggregateResult<String> {
    /// Merge status payloads into one labelled report.
    ///
    /// Each payload is prefixed with `Cluster <identity>:` and blocks are
    /// joined by [`STATUS_SEPARATOR`]. Any failure discards the payloads and
    /// returns only the error.
    pub fn merge_status(self) -> Result<String> {
        if let Some(index) = self.first_failure {
            return Err(take_error(self.outcomes, index));
        }

        let mut blocks = Vec::with_capacity(self.outcomes.len());
        for outcome in self.outcomes {
            blocks.push(format!("Cluster {}:\n{}", outcome.identity, outcome.result?));
        }
        Ok(blocks.join(STATUS_SEPARATOR))
    }
}

/// Aborts dispatched units when the fan-out is dropped before joining them
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        // No-op for units that already finished
        for handle in &self.0 {
            handle.abort();
        }
    }
}

fn take_error<T>(outcomes: Vec<TargetOutcome<T>>, index: usize) -> Error {
    outcomes
        .into_iter()
        .nth(index)
        .and_then(|o| o.result.err())
        .unwrap_or_else(|| Error::internal_with_context("fanout", "recorded failure has no error"))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("target operation panicked: {}", msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("target operation panicked: {}", msg)
    } else {
        "target operation panicked".to_string()
    }
}

/// Run `op` against every target concurrently and wait for all of them.
///
/// Each unit runs in its own task under a span carrying the operation name,
/// target identity and role. The first failure to complete is recorded;
/// panics are captured as internal errors for the target that raised them.
pub async fn run_fanout<T, F, Fut>(operation: &'static str, targets: &[Target], op: F) -> AggregateResult<T>
where
    T: Send + 'static,
    F: Fn(Target) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let first_failure = Arc::new(AtomicUsize::new(NO_FAILURE));

    let handles: Vec<_> = targets
        .iter()
        .enumerate()
        .map(|(index, target)| {
            let span = info_span!(
                "fanout",
                operation,
                target = %target.identity(),
                role = %target.role
            );
            let first_failure = Arc::clone(&first_failure);
            let unit = op(target.clone());

            tokio::spawn(
                async move {
                    let result = match AssertUnwindSafe(unit).catch_unwind().await {
                        Ok(result) => result,
                        Err(panic) => Err(Error::internal_with_context(
                            "fanout",
                            panic_message(panic.as_ref()),
                        )),
                    };
                    match &result {
                        Ok(_) => debug!("target operation succeeded"),
                        Err(e) => {
                            warn!(error = %e, "target operation failed");
                            let _ = first_failure.compare_exchange(
                                NO_FAILURE,
                                index,
                                Ordering::SeqCst,
                                Ordering::SeqCst,
                            );
                        }
                    }
                    result
                }
                .instrument(span),
            )
        })
        .collect();

    let _guard = AbortOnDrop(handles.iter().map(|h| h.abort_handle()).collect());
    let joined = join_all(handles).await;

    let outcomes = joined
        .into_iter()
        .zip(targets)
        .enumerate()
        .map(|(index, (joined, target))| {
            let result = joined.unwrap_or_else(|e| {
                // Only reachable if the runtime shut down under the unit
                let _ = first_failure.compare_exchange(
                    NO_FAILURE,
                    index,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                Err(Error::internal_with_context("fanout", e.to_string()))
            });
            TargetOutcome {
                identity: target.identity().to_string(),
                role: target.role,
                result,
            }
        })
        .collect();

    let first = first_failure.load(Ordering::SeqCst);
    AggregateResult {
        outcomes,
        first_failure: (first != NO_FAILURE).then_some(first),
    }
}
