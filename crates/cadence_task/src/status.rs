//! Observable task status.

use crate::TaskID;
use hashbrown::HashMap;

/// A snapshot of the observable state of one task.
///
/// The `revision` counter is managed by the queue and is non-decreasing for
/// a given [`TaskID`]: updates pushed by the task itself are re-stamped with
/// the current revision of the matching status row, while rewrites performed
/// by the queue (countdown messages, pause flag changes) increment it.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskStatus {
    /// ID of the task this status belongs to.
    pub id: TaskID,
    /// Human-readable description of what the task is doing or when it will
    /// run next.
    pub message: String,
    /// Whether the task is paused.
    pub paused: bool,
    /// Whether the task has finished and been retired from the queue.
    pub complete: bool,
    /// Monotonic revision counter, managed by the queue.
    pub revision: i64,
    /// Opaque client-defined fields carried along with the status.
    pub fields: HashMap<String, String>,
}

impl TaskStatus {
    /// Creates an empty status for the given task.
    pub fn new(id: TaskID) -> Self {
        Self {
            id,
            message: String::new(),
            paused: false,
            complete: false,
            revision: 0,
            fields: HashMap::new(),
        }
    }

    /// Creates a status with the given message.
    pub fn with_message(id: TaskID, message: impl Into<String>) -> Self {
        let mut status = Self::new(id);
        status.message = message.into();
        status
    }
}
