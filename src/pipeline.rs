//! # Pipeline Composition
//!
//! Two primitives build the fetch-then-build pipeline on top of the
//! [`WorkerPool`]:
//!
//! - [`schedule`] submits one task per argument and returns their futures in
//!   argument order.
//! - [`chain`] attaches a continuation to a future. The continuation runs on
//!   the pool with the upstream value once the upstream succeeds, and the
//!   returned future mirrors the continuation's own outcome.
//!
//! When the upstream fails, the continuation never runs and the downstream
//! future fails with [`TaskError::Skipped`] wrapping the upstream error.
//! When the upstream is cancelled, so is the downstream. No upstream outcome
//! ever leaves the downstream future pending.

use std::sync::Arc;

use crate::context::WorkerContext;
use crate::future::{promise, Outcome, TaskError, TaskFuture};
use crate::pool::WorkerPool;

/// Submit `payload(arg)` for every argument.
///
/// The returned futures are in the same order as `args`.
pub fn schedule<A, R, F, I>(pool: &WorkerPool, payload: F, args: I) -> Vec<TaskFuture<R>>
where
    A: Send + 'static,
    R: Clone + Send + Sync + 'static,
    F: Fn(A, &mut WorkerContext) -> Result<R, TaskError> + Send + Sync + 'static,
    I: IntoIterator<Item = A>,
{
    let payload = Arc::new(payload);
    args.into_iter()
        .map(|arg| {
            let payload = Arc::clone(&payload);
            pool.submit(move |ctx| payload(arg, ctx))
        })
        .collect()
}

/// Run `continuation` on the pool with the value of `upstream`.
pub fn chain<T, U, F>(pool: &WorkerPool, upstream: TaskFuture<T>, continuation: F) -> TaskFuture<U>
where
    T: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    F: FnOnce(T, &mut WorkerContext) -> Result<U, TaskError> + Send + 'static,
{
    let (resolver, downstream) = promise();
    let handle = pool.clone();
    pool.detach(async move {
        match upstream.await {
            Outcome::Succeeded(value) => {
                let next = handle.submit(move |ctx| continuation(value, ctx));
                resolver.resolve(next.await);
            }
            Outcome::Failed(error) => resolver.fail(TaskError::Skipped(Box::new(error))),
            Outcome::Cancelled => resolver.cancel(),
        }
    });
    downstream
}
