use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Receives `(completed, total)` after every tile attempt.
pub trait ProgressSink: Sync {
    fn on_progress(&self, completed: usize, total: usize);
}

impl<F> ProgressSink for F
where
    F: Fn(usize, usize) + Sync,
{
    fn on_progress(&self, completed: usize, total: usize) {
        self(completed, total)
    }
}

/// Progress sink that ignores every update
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _completed: usize, _total: usize) {}
}

/// Counts completed attempts and forwards them to a sink one at a time,
/// so `completed` reaches the sink strictly increasing even when workers
/// finish concurrently.
pub(crate) struct ProgressCounter<'a> {
    completed: Mutex<usize>,
    total: usize,
    sink: &'a dyn ProgressSink,
}

impl<'a> ProgressCounter<'a> {
    pub(crate) fn new(total: usize, sink: &'a dyn ProgressSink) -> Self {
        Self {
            completed: Mutex::new(0),
            total,
            sink,
        }
    }

    pub(crate) fn tick(&self) {
        let mut completed = self.completed.lock().unwrap_or_else(|e| e.into_inner());
        *completed += 1;
        self.sink.on_progress(*completed, self.total);
    }
}

/// Cooperative cancellation flag, checked between tile fetches.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
