//! Per-job control: progress reporting, pause/resume and cancellation

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

/// A progress notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub message: Option<String>,
}

type ProgressCallback = Box<dyn Fn(&Progress) + Send + Sync>;

/// Control handle shared between the caller and a running job.
///
/// Cancellation and pause are cooperative: workers check them before
/// starting a chunk. A chunk already in flight always finishes.
pub struct JobContext {
    cancelled: AtomicBool,
    paused: Mutex<bool>,
    resumed: Condvar,
    completed: AtomicUsize,
    total: AtomicUsize,
    callback: Option<ProgressCallback>,
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("cancelled", &self.is_cancelled())
            .field("paused", &self.is_paused())
            .field("completed", &self.completed.load(Ordering::SeqCst))
            .field("total", &self.total.load(Ordering::SeqCst))
            .finish()
    }
}

impl Default for JobContext {
    fn default() -> Self {
        Self::new()
    }
}

impl JobContext {
    pub fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            paused: Mutex::new(false),
            resumed: Condvar::new(),
            completed: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            callback: None,
        }
    }

    /// Context that forwards every progress update to `callback`
    pub fn with_progress<F>(callback: F) -> Self
    where
        F: Fn(&Progress) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
            ..Self::new()
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // Paused workers must observe the cancellation
        self.resume();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        *self.paused.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }

    pub fn resume(&self) {
        *self.paused.lock().unwrap_or_else(|e| e.into_inner()) = false;
        self.resumed.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block while paused. Returns `false` when the job was cancelled and
    /// the caller must not start new work.
    pub fn checkpoint(&self) -> bool {
        let mut paused = self.paused.lock().unwrap_or_else(|e| e.into_inner());
        while *paused && !self.is_cancelled() {
            paused = self.resumed.wait(paused).unwrap_or_else(|e| e.into_inner());
        }
        !self.is_cancelled()
    }

    /// Reset counters at job start
    pub fn start(&self, completed: usize, total: usize, message: Option<String>) {
        self.completed.store(completed, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
        self.notify(completed, total, message);
    }

    /// Count `n` more completed units and notify
    pub fn advance(&self, n: usize, message: Option<String>) {
        let completed = self.completed.fetch_add(n, Ordering::SeqCst) + n;
        let total = self.total.load(Ordering::SeqCst);
        self.notify(completed, total, message);
    }

    /// Notify without changing the counters
    pub fn message(&self, message: impl Into<String>) {
        self.notify(
            self.completed.load(Ordering::SeqCst),
            self.total.load(Ordering::SeqCst),
            Some(message.into()),
        );
    }

    pub fn progress(&self) -> Progress {
        Progress {
            completed: self.completed.load(Ordering::SeqCst),
            total: self.total.load(Ordering::SeqCst),
            message: None,
        }
    }

    fn notify(&self, completed: usize, total: usize, message: Option<String>) {
        if let Some(callback) = &self.callback {
            callback(&Progress {
                completed,
                total,
                message,
            });
        }
    }
}
