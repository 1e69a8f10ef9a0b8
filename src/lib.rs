//! An in-process task queue for recurring and one-shot background work.
//!
//! Clients submit [`Task`]s that carry their own work function, schedule and
//! status model. A bounded pool of worker threads polls the submitted tasks
//! at the appropriate times, runs each task on at most one worker at a time,
//! and reports progress through an observable status table. A separate
//! administration thread keeps human-readable countdown messages fresh. The
//! pool can be paused per task, resized at runtime and drains all in-flight
//! work on drop.

mod admin;
mod worker;

pub mod config;
pub mod queue;
pub mod status;

pub use cadence_task;

pub use cadence_task::{
    ClosureTask, QueueHandle, RunAgain, StatusSink, Task, TaskError, TaskID, TaskStatus,
};
pub use config::TaskQueueConfig;
pub use queue::TaskQueue;
pub use status::{CallbackId, StatusTable};
