use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters shared by the engine threads.
#[derive(Debug, Default)]
pub struct EngineStats {
    accepted: AtomicU64,
    open: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections handed to the engine since start.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Connections currently owned by an I/O thread.
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }

    /// Tasks whose response was handed to a writer.
    pub fn tasks_completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Tasks that returned an error or panicked.
    pub fn tasks_failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub(crate) fn connection_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_opened(&self) {
        self.open.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn connection_closed(&self) {
        self.open.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn task_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn task_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}
