//! Per-part fan-out with tracing and failure isolation.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info_span, Instrument};

use crate::message::{Batch, Part};

/// Outcome of [`iterate_parts_with_span`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationReport {
    /// Indices visited, in visiting order.
    pub visited: Vec<usize>,
    /// Indices whose function returned an error. Those parts were flagged.
    pub failed: Vec<usize>,
}

impl IterationReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Resolves configured part indices against a batch of `len` parts.
///
/// An empty selection targets every part. Negative indices count back from the end, so `-1`
/// is the last part. Indices still out of range afterwards are dropped, duplicates collapse,
/// and the result is ascending.
pub fn resolve_indices(indices: &[i64], len: usize) -> Vec<usize> {
    if indices.is_empty() {
        return (0..len).collect();
    }
    let len = len as i64;
    let mut resolved: Vec<usize> = indices
        .iter()
        .map(|&index| if index < 0 { len + index } else { index })
        .filter(|&index| index >= 0 && index < len)
        .map(|index| index as usize)
        .collect();
    resolved.sort_unstable();
    resolved.dedup();
    resolved
}

/// Calls `f` once for each selected part of `batch`, in ascending index order.
///
/// Each call runs inside its own `part` span carrying `operation` and `index`; the span is
/// current for the whole of the returned future and closes once it completes. `f` receives a
/// shared handle to the part and returns `Some(replacement)` to change it or `None` to leave
/// it as it is, so read-only visits never copy a part. On error the part is flagged with the
/// error message and iteration carries on with the next index.
pub async fn iterate_parts_with_span<F, Fut, E>(
    operation: &str,
    indices: &[i64],
    batch: &mut Batch,
    mut f: F,
) -> IterationReport
where
    F: FnMut(usize, Arc<Part>) -> Fut,
    Fut: Future<Output = Result<Option<Part>, E>>,
    E: Display,
{
    let mut report = IterationReport::default();
    for index in resolve_indices(indices, batch.len()) {
        let span = info_span!("part", operation, index);
        let part = batch.get_shared(index);
        let fut = span.in_scope(|| f(index, part));

        match fut.instrument(span.clone()).await {
            Ok(Some(part)) => batch.replace(index, part),
            Ok(None) => {}
            Err(e) => {
                span.in_scope(|| debug!(error = %e, "Part processing failed"));
                batch.get_mut(index).flag_error(&e);
                report.failed.push(index);
            }
        }
        report.visited.push(index);
    }
    report
}
