//! A [`Task`] implementation backed by a closure.

use crate::{QueueHandle, RunAgain, StatusSink, Task, TaskError, TaskID, TaskStatus};
use parking_lot::Mutex;
use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

type TaskBody = Box<dyn Fn(&AtomicBool) -> Result<RunAgain, TaskError> + Send + Sync>;

/// A ready-made [`Task`] whose work is a closure, for clients that do not
/// need a dedicated task type.
///
/// The closure receives the task's cancellation flag so it can bail out
/// early when cancellation has been requested.
pub struct ClosureTask {
    id: TaskID,
    timeout: Duration,
    timeout_message: String,
    paused: AtomicBool,
    cancelled: AtomicBool,
    message: Mutex<String>,
    body: TaskBody,
    sink: Mutex<Option<Weak<dyn StatusSink>>>,
    queue: Mutex<Option<Weak<dyn QueueHandle>>>,
}

impl ClosureTask {
    /// Creates a periodic task that reruns `timeout` after each completed
    /// run. The `timeout_message` is the prefix used for countdown messages.
    pub fn periodic<F>(
        id: TaskID,
        timeout: Duration,
        timeout_message: impl Into<String>,
        body: F,
    ) -> Self
    where
        F: Fn(&AtomicBool) -> Result<RunAgain, TaskError> + Send + Sync + 'static,
    {
        Self {
            id,
            timeout,
            timeout_message: timeout_message.into(),
            paused: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            message: Mutex::new(String::new()),
            body: Box::new(body),
            sink: Mutex::new(None),
            queue: Mutex::new(None),
        }
    }

    /// Creates a one-shot task that runs once and is then retired.
    pub fn one_shot<F>(id: TaskID, body: F) -> Self
    where
        F: Fn(&AtomicBool) -> Result<RunAgain, TaskError> + Send + Sync + 'static,
    {
        Self::periodic(id, Duration::ZERO, "", body)
    }

    /// Whether cancellation has been requested for this task.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Sets the status message and pushes the updated status through the
    /// queue's status sink, if one is installed.
    pub fn set_message(&self, message: impl Into<String>) {
        *self.message.lock() = message.into();
        self.publish();
    }

    /// Pushes the current status through the queue's status sink, if one is
    /// installed.
    pub fn publish(&self) {
        let sink = self.sink.lock().as_ref().and_then(Weak::upgrade);
        if let Some(sink) = sink {
            sink.publish(self.status());
        }
    }

    /// Returns the queue this task was submitted to, if it is still alive.
    pub fn queue(&self) -> Option<Arc<dyn QueueHandle>> {
        self.queue.lock().as_ref().and_then(Weak::upgrade)
    }
}

impl Task for ClosureTask {
    fn id(&self) -> TaskID {
        self.id
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn perform(&self) -> Result<RunAgain, TaskError> {
        (self.body)(&self.cancelled)
    }

    fn status(&self) -> TaskStatus {
        let mut status = TaskStatus::with_message(self.id, self.message.lock().clone());
        status.paused = self.is_paused();
        status
    }

    fn timeout_message(&self) -> String {
        self.timeout_message.clone()
    }

    fn set_status_sink(&self, sink: Option<Weak<dyn StatusSink>>) {
        *self.sink.lock() = sink;
    }

    fn set_queue(&self, queue: Option<Weak<dyn QueueHandle>>) {
        *self.queue.lock() = queue;
    }
}

impl fmt::Debug for ClosureTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureTask")
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
