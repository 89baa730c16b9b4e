//! Per-training-session progress reporting and cooperative cancellation.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use framing::Event;
use parking_lot::Mutex;

use crate::{
    error::{Result, RunnerErr},
    link::HostLink,
};

/// One named metric sample, value bytes are opaque to this layer.
#[derive(Debug)]
pub struct Metric {
    pub name: String,
    pub value: Vec<u8>,
}

struct Inner {
    session_id: String,
    link: Arc<HostLink>,
    completed: AtomicBool,
    cancelled: AtomicBool,
    on_cancel: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

/// The handle a training callback reports through and observes
/// cancellation on. Cancellation never preempts the callback, it only
/// flips the flag and runs the registered closures; the training loop is
/// expected to poll `is_cancelled` or register `on_cancel`.
#[derive(Clone)]
pub struct TrainingTracker {
    inner: Arc<Inner>,
}

impl TrainingTracker {
    pub(crate) fn new(session_id: String, link: Arc<HostLink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                session_id,
                link,
                completed: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                on_cancel: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    fn ensure_active(&self) -> Result<()> {
        if self.inner.completed.load(Ordering::SeqCst) {
            return Err(RunnerErr::OperationClosed);
        }
        Ok(())
    }

    /// Emits one `training-progress` event.
    ///
    /// # Errors
    /// `OperationClosed` after the training operation completed.
    pub fn progress(&self, value: f64) -> Result<()> {
        self.ensure_active()?;
        self.inner.link.send_event(
            &Event::TrainingProgress {
                session_id: self.inner.session_id.clone(),
                value,
            },
            Vec::new(),
        )
    }

    /// Emits one `training-metrics` event carrying every sample. An empty
    /// batch is a no-op.
    ///
    /// # Errors
    /// `OperationClosed` after the training operation completed.
    pub fn metrics(&self, metrics: Vec<Metric>) -> Result<()> {
        self.ensure_active()?;
        if metrics.is_empty() {
            return Ok(());
        }

        let (names, values) = metrics
            .into_iter()
            .map(|metric| (metric.name, metric.value))
            .unzip();

        self.inner.link.send_event(
            &Event::TrainingMetrics {
                session_id: self.inner.session_id.clone(),
                names,
            },
            values,
        )
    }

    /// Whether this session was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Registers a closure to run when the session is cancelled.
    ///
    /// Closures run in registration order, each exactly once. Registering
    /// after cancellation runs the closure immediately.
    pub fn on_cancel(&self, callback: impl FnOnce() + Send + 'static) {
        let mut callbacks = self.inner.on_cancel.lock();
        if self.is_cancelled() {
            drop(callbacks);
            callback();
            return;
        }
        callbacks.push(Box::new(callback));
    }

    /// Flips the cancelled flag and runs the registered closures, once.
    pub(crate) fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        let callbacks = std::mem::take(&mut *self.inner.on_cancel.lock());
        for callback in callbacks {
            callback();
        }
    }

    /// Marks the training operation finished. Terminal.
    pub(crate) fn complete(&self) {
        self.inner.completed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn same_as(&self, other: &TrainingTracker) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
