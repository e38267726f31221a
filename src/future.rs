//! # Task Futures
//!
//! Every task submitted to the [`WorkerPool`] is observed through a
//! [`TaskFuture`]. A task future ends in exactly one terminal [`Outcome`]:
//! the task's value, its [`TaskError`], or cancellation when the task was
//! dropped without resolving (a panicking stage, for instance).
//!
//! Task futures are built from `futures` primitives: a oneshot channel
//! carries the outcome and [`Shared`] lets any number of clones observe it.
//! The orchestrating thread resolves a future synchronously with
//! [`TaskFuture::wait`]; chained stages and [`when_all`] await it from
//! detached futures driven by the pool.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::future::{join_all, FutureExt, Shared};
use thiserror::Error;

use crate::pool::WorkerPool;

/// Why a task failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The worker could not set up its context before running the task.
    #[error("worker {worker} bootstrap failed: {reason}")]
    Bootstrap { worker: usize, reason: String },

    /// The fetch stage failed.
    #[error("fetch failed: {reason}")]
    Fetch { reason: String },

    /// The build stage failed.
    #[error("build failed: {reason}")]
    Build { reason: String },

    /// The stage was never attempted because the stage before it failed.
    #[error("not attempted: {0}")]
    Skipped(Box<TaskError>),
}

impl TaskError {
    /// The innermost human-readable reason.
    pub fn reason(&self) -> &str {
        match self {
            TaskError::Bootstrap { reason, .. }
            | TaskError::Fetch { reason }
            | TaskError::Build { reason } => reason,
            TaskError::Skipped(cause) => cause.reason(),
        }
    }
}

/// Terminal state of a task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Succeeded(T),
    Failed(TaskError),
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Succeeded(value) => Outcome::Succeeded(f(value)),
            Outcome::Failed(error) => Outcome::Failed(error),
            Outcome::Cancelled => Outcome::Cancelled,
        }
    }
}

impl<T> From<Result<T, TaskError>> for Outcome<T> {
    fn from(result: Result<T, TaskError>) -> Self {
        match result {
            Ok(value) => Outcome::Succeeded(value),
            Err(error) => Outcome::Failed(error),
        }
    }
}

/// Write side of a [`TaskFuture`].
///
/// Dropping a resolver without calling [`Resolver::resolve`] cancels its
/// future.
#[derive(Debug)]
pub struct Resolver<T> {
    sender: oneshot::Sender<Outcome<T>>,
}

impl<T> Resolver<T> {
    /// Move the future into its terminal state.
    ///
    /// Resolving a future nobody observes any more is not an error.
    pub fn resolve(self, outcome: Outcome<T>) {
        let _ = self.sender.send(outcome);
    }

    pub fn succeed(self, value: T) {
        self.resolve(Outcome::Succeeded(value));
    }

    pub fn fail(self, error: TaskError) {
        self.resolve(Outcome::Failed(error));
    }

    pub fn cancel(self) {
        self.resolve(Outcome::Cancelled);
    }
}

/// A cloneable handle on the outcome of one task.
pub struct TaskFuture<T> {
    inner: Shared<oneshot::Receiver<Outcome<T>>>,
}

/// Create an unresolved future and its resolver.
pub fn promise<T>() -> (Resolver<T>, TaskFuture<T>)
where
    T: Clone,
{
    let (sender, receiver) = oneshot::channel();
    (
        Resolver { sender },
        TaskFuture {
            inner: receiver.shared(),
        },
    )
}

impl<T: Clone> TaskFuture<T> {
    /// A future that is already in a terminal state.
    pub fn ready(outcome: Outcome<T>) -> Self {
        let (resolver, future) = promise();
        resolver.resolve(outcome);
        future
    }

    /// The outcome, if the future is already terminal. Never blocks.
    pub fn peek(&self) -> Option<Outcome<T>> {
        self.clone().now_or_never()
    }

    pub fn is_terminal(&self) -> bool {
        self.peek().is_some()
    }

    /// Block the calling thread until the future is terminal.
    ///
    /// Must not be called from inside a pool task: the worker would block
    /// waiting on work it may have to run itself.
    pub fn wait(self) -> Outcome<T> {
        futures::executor::block_on(self)
    }
}

impl<T> Clone for TaskFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone> Future for TaskFuture<T> {
    type Output = Outcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx).map(|result| match result {
            Ok(outcome) => outcome,
            Err(oneshot::Canceled) => Outcome::Cancelled,
        })
    }
}

/// Fire `callback` exactly once, when every future in `futures` is terminal.
///
/// Terminal means any outcome, failures and cancellations included. When
/// all futures are already terminal, or there are none, the callback runs
/// before `when_all` returns. The returned future resolves once the callback
/// has run.
pub fn when_all<T, I, F>(pool: &WorkerPool, futures: I, callback: F) -> TaskFuture<()>
where
    T: Clone + Send + Sync + 'static,
    I: IntoIterator<Item = TaskFuture<T>>,
    F: FnOnce() + Send + 'static,
{
    let pending: Vec<TaskFuture<T>> = futures.into_iter().collect();
    let (resolver, done) = promise();
    pool.detach(async move {
        join_all(pending).await;
        callback();
        resolver.succeed(());
    });
    done
}
