//! Worker pool for protocol processing.
//!
//! Tasks run on the blocking thread pool of a dedicated tokio runtime:
//! threads are started on demand up to `max_worker_threads`, retire after
//! `worker_keep_alive_secs` idle, and the task queue in front of them is
//! unbounded. I/O threads never wait on a task; they poll its
//! [`TaskHandle`] once per loop turn.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, Waker};

use thiserror::Error;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;

#[derive(Debug, Error)]
pub enum TaskError {
    /// The pool was shut down before the task finished.
    #[error("task cancelled")]
    Cancelled,
    #[error("task panicked: {0}")]
    Panicked(String),
}

pub struct WorkerPool {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    pending: Arc<AtomicUsize>,
    limit: Option<usize>,
}

impl WorkerPool {
    pub fn new(name: &str, engine: &EngineConfig) -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(engine.max_worker_threads)
            .thread_keep_alive(engine.worker_keep_alive())
            .thread_name(format!("{name}-Worker"))
            .build()?;
        let handle = runtime.handle().clone();

        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            handle,
            pending: Arc::new(AtomicUsize::new(0)),
            limit: engine.max_pending_tasks,
        })
    }

    /// Queues `task`. Never blocks and never rejects; see [`has_capacity`].
    ///
    /// [`has_capacity`]: WorkerPool::has_capacity
    pub fn submit<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let guard = PendingGuard::new(Arc::clone(&self.pending));
        let inner = self.handle.spawn_blocking(move || {
            let _guard = guard;
            task()
        });
        TaskHandle { inner: Some(inner) }
    }

    /// Tasks submitted but not yet finished (queued or running).
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Whether the admission limit, if any, leaves room for another task.
    pub fn has_capacity(&self) -> bool {
        self.limit.is_none_or(|limit| self.pending() < limit)
    }

    /// Abandons queued and running tasks. Their handles resolve to
    /// [`TaskError::Cancelled`].
    pub fn shutdown(&self) {
        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime {
            runtime.shutdown_background();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct PendingGuard(Arc<AtomicUsize>);

impl PendingGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Pollable handle to a submitted task.
pub struct TaskHandle<T> {
    /// Taken once the outcome has been read.
    inner: Option<JoinHandle<T>>,
}

impl<T> TaskHandle<T> {
    /// Takes the outcome if the task has finished. Never blocks.
    ///
    /// Returns `None` while the task is still queued or running; once an
    /// outcome has been returned, later calls return `None` too.
    pub fn try_join(&mut self) -> Option<Result<T, TaskError>> {
        let inner = self.inner.as_mut()?;
        if !inner.is_finished() {
            return None;
        }

        let mut cx = Context::from_waker(Waker::noop());
        let outcome = match Pin::new(inner).poll(&mut cx) {
            Poll::Pending => return None,
            Poll::Ready(outcome) => outcome,
        };
        self.inner = None;

        match outcome {
            Ok(value) => Some(Ok(value)),
            Err(e) if e.is_cancelled() => Some(Err(TaskError::Cancelled)),
            Err(e) => Some(Err(TaskError::Panicked(panic_message(e.into_panic())))),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
