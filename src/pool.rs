//! # Worker Pool
//!
//! A fixed-size pool of worker threads built on a `rayon::ThreadPool`.
//!
//! ## Worker bootstrap
//!
//! The pool owns one context slot per worker thread. Every task submitted
//! through [`WorkerPool::submit`] runs inside the bootstrap: the worker looks
//! up its own slot and, on the first task it ever executes, opens its log
//! streams and installs a [`WorkerContext`] there. Later tasks on the same
//! worker reuse that context. A slot is only ever locked by the worker it
//! belongs to, so workers share nothing.
//!
//! If the bootstrap fails the task resolves as [`TaskError::Bootstrap`] and
//! the slot stays empty, so the worker's next task tries again.
//!
//! ## Detached futures
//!
//! Completion handlers (chained stages, [`crate::future::when_all`]) are
//! futures handed to [`WorkerPool::detach`]. A detached future is polled once
//! on the calling thread and afterwards on a pool thread whenever it is
//! woken. Polls never block, so handlers never hold up a worker for longer
//! than it takes to submit a task or send an outcome.

use std::any::Any;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::Context;

use futures::future::{BoxFuture, FutureExt};
use futures::task::{waker_ref, ArcWake};
use log::{debug, error};

use crate::context::{RunContext, WorkerContext};
use crate::error::{Error, Result};
use crate::future::{promise, TaskError, TaskFuture};

/// Per-worker context slots, indexed by rayon thread index.
struct WorkerSlots {
    run: RunContext,
    workers: Vec<Mutex<Option<WorkerContext>>>,
}

impl WorkerSlots {
    /// Run `task` with the calling worker's context, initializing it first
    /// if this is the worker's first task.
    fn run<R, F>(&self, task: F) -> std::result::Result<R, TaskError>
    where
        F: FnOnce(&mut WorkerContext) -> std::result::Result<R, TaskError>,
    {
        let worker = rayon::current_thread_index().unwrap_or(0) % self.workers.len();
        let mut slot = self.workers[worker]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let ctx = match &mut *slot {
            Some(ctx) => ctx,
            empty => {
                let ctx = WorkerContext::open(worker, self.run.clone()).map_err(|e| {
                    TaskError::Bootstrap {
                        worker,
                        reason: e.to_string(),
                    }
                })?;
                debug!("Worker {} initialized", worker);
                empty.insert(ctx)
            }
        };
        task(ctx)
    }
}

struct PoolInner {
    threads: rayon::ThreadPool,
    slots: Arc<WorkerSlots>,
}

/// Cheaply cloneable handle on a worker pool.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Start a pool with `size` workers (at least one).
    pub fn new(size: usize, run: RunContext) -> Result<Self> {
        let size = size.max(1);
        let threads = rayon::ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|index| format!("code-builder-worker-{}", index))
            .start_handler(|index| debug!("Worker thread {} started", index))
            .panic_handler(|payload| error!("Pool task panicked: {}", panic_message(&*payload)))
            .build()
            .map_err(|e| Error::Pool {
                message: e.to_string(),
            })?;
        let slots = WorkerSlots {
            run,
            workers: (0..size).map(|_| Mutex::new(None)).collect(),
        };
        Ok(Self {
            inner: Arc::new(PoolInner {
                threads,
                slots: Arc::new(slots),
            }),
        })
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.inner.slots.workers.len()
    }

    /// Submit a task wrapped by the worker bootstrap.
    ///
    /// Never blocks. A task that panics resolves as cancelled.
    pub fn submit<R, F>(&self, task: F) -> TaskFuture<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(&mut WorkerContext) -> std::result::Result<R, TaskError> + Send + 'static,
    {
        let (resolver, future) = promise();
        let slots = Arc::clone(&self.inner.slots);
        self.inner.threads.spawn(move || {
            let outcome = slots.run(task);
            resolver.resolve(outcome.into());
        });
        future
    }

    /// Drive `future` to completion without blocking the caller.
    pub fn detach<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = Arc::new(Detached {
            future: Mutex::new(Some(future.boxed())),
            pool: self.clone(),
        });
        task.poll();
    }
}

/// A future polled by whichever thread wakes it up.
struct Detached {
    future: Mutex<Option<BoxFuture<'static, ()>>>,
    pool: WorkerPool,
}

impl Detached {
    fn poll(self: Arc<Self>) {
        let mut slot = self.future.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut future) = slot.take() {
            let waker = waker_ref(&self);
            let mut cx = Context::from_waker(&waker);
            if future.as_mut().poll(&mut cx).is_pending() {
                *slot = Some(future);
            }
        }
    }
}

impl ArcWake for Detached {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        let task = Arc::clone(arc_self);
        arc_self.pool.inner.threads.spawn(move || task.poll());
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
