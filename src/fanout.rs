use std::fmt::Display;
use std::future::Future;

use futures::future::join_all;

/// Fan-out primitives shared by discovery, keyword search, and search-hit
/// enrichment. Both variants isolate per-item failures: a failed
/// sub-operation becomes `None` in the output and never aborts siblings.
/// Output order always follows input order.

/// Unbounded gather: every future is in flight at once.
pub async fn gather_isolated<T, E, Fut>(futures: impl IntoIterator<Item = Fut>) -> Vec<Option<T>>
where
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    join_all(futures)
        .await
        .into_iter()
        .map(|result| match result {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!("fan-out sub-operation failed: {e}");
                None
            }
        })
        .collect()
}

/// Bounded batches: at most `batch` sub-operations in flight, and a new
/// batch starts only after the previous one has fully settled.
pub async fn batched_isolated<T, R, E, F, Fut>(
    items: Vec<T>,
    batch: usize,
    op: F,
) -> Vec<Option<R>>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R, E>>,
    E: Display,
{
    let batch = batch.max(1);
    let mut out = Vec::with_capacity(items.len());
    let mut iter = items.into_iter();
    loop {
        let chunk: Vec<T> = iter.by_ref().take(batch).collect();
        if chunk.is_empty() {
            break;
        }
        out.extend(gather_isolated(chunk.into_iter().map(&op)).await);
    }
    out
}
