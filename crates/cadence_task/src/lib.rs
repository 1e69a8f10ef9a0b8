//! Task contract and status model for the cadence task queue.

pub mod closure;
pub mod status;

pub use closure::ClosureTask;
pub use status::TaskStatus;

use std::{fmt, sync::Weak, time::Duration};

/// The error type that task bodies can fail with.
pub type TaskError = anyhow::Error;

/// ID identifying a task submitted to the queue. Assigned by the client
/// before submission and expected to be unique within one queue.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskID(i64);

/// Whether a task wants to be scheduled for another run after the current
/// one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunAgain {
    Yes,
    No,
}

/// Represents a piece of recurring or one-shot background work that can be
/// submitted to a task queue.
///
/// The queue owns every submitted task (as `Arc<dyn Task>`) and calls
/// [`perform`](Self::perform) with no queue locks held, from at most one
/// worker thread at a time. All other methods must be cheap and
/// non-blocking; implementations use interior mutability for the pause and
/// cancel flags.
pub trait Task: Send + Sync + fmt::Debug {
    /// Returns the unique ID identifying this task.
    fn id(&self) -> TaskID;

    /// Returns the scheduling period. [`Duration::ZERO`] means the task is
    /// one-shot: it runs once and is then retired. A positive duration
    /// means the task is rerun that long after each completed run.
    fn timeout(&self) -> Duration;

    /// Whether the task is currently paused. A paused task is never
    /// dispatched.
    fn is_paused(&self) -> bool;

    /// Sets the pause flag. Called by the queue on behalf of
    /// [`pause_task`](QueueHandle::pause_task).
    fn set_paused(&self, paused: bool);

    /// Requests early termination. Advisory: the task is expected to make
    /// its next [`perform`](Self::perform) call return quickly with
    /// [`RunAgain::No`].
    fn cancel(&self);

    /// Executes the work. May block. Returning [`RunAgain::No`], returning
    /// an error or panicking retires the task regardless of
    /// [`timeout`](Self::timeout).
    ///
    /// # Errors
    /// Any error the work fails with; the queue logs it, publishes a final
    /// failed status and retires the task.
    fn perform(&self) -> Result<RunAgain, TaskError>;

    /// Returns a snapshot of the task's current status.
    fn status(&self) -> TaskStatus;

    /// Returns the user-facing prefix for countdown messages, e.g.
    /// `"Next scan in "`.
    fn timeout_message(&self) -> String;

    /// Installs (or with `None` clears) the sink through which the task
    /// pushes status updates. Called by the queue on submission and
    /// retirement.
    fn set_status_sink(&self, sink: Option<Weak<dyn StatusSink>>);

    /// Installs (or with `None` clears) a weak back-reference to the queue
    /// the task was submitted to, so the task can self-cancel or
    /// self-pause. Never an owning reference.
    fn set_queue(&self, queue: Option<Weak<dyn QueueHandle>>);
}

/// Receiver for status updates pushed by a task.
///
/// The queue implements this; published statuses update the matching row of
/// the queue's status table in place (the queue re-stamps the revision) and
/// are forwarded to registered observers.
pub trait StatusSink: Send + Sync {
    fn publish(&self, status: TaskStatus);
}

/// The subset of queue operations a task can invoke on itself through its
/// back-reference.
pub trait QueueHandle: Send + Sync {
    fn cancel_task(&self, id: TaskID);
    fn pause_task(&self, id: TaskID, paused: bool);
    fn toggle_pause_task(&self, id: TaskID);
}

impl TaskID {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }
}

impl From<i64> for TaskID {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<TaskID> for i64 {
    fn from(id: TaskID) -> Self {
        id.0
    }
}

impl fmt::Display for TaskID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl RunAgain {
    /// Whether the task should be rescheduled.
    pub fn is_yes(&self) -> bool {
        *self == Self::Yes
    }
}
