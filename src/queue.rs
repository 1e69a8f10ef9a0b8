//! The task queue facade.

use crate::{
    admin,
    config::TaskQueueConfig,
    status::{CallbackId, ObserverRegistry, StatusTable},
    worker,
};
use cadence_task::{QueueHandle, StatusSink, Task, TaskID, TaskStatus};
use parking_lot::{Condvar, Mutex};
use std::{
    fmt,
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// Character prepended to the worker thread name to form the administration
/// thread's name.
const ADMIN_NAME_PREFIX: char = '#';

/// A pool of worker threads executing submitted [`Task`]s according to
/// their own schedules, plus an administration thread that keeps countdown
/// messages in the status table fresh.
///
/// Every operation on the queue is infallible from the caller's
/// perspective; misuse (unknown task IDs, unknown observer tokens,
/// submission during shutdown) degrades to a logged no-op. Dropping the
/// queue cancels every pending task and blocks until all workers have
/// drained.
///
/// # Examples
/// ```no_run
/// # use cadence::{ClosureTask, RunAgain, TaskID, TaskQueue};
/// # use std::{sync::Arc, time::Duration};
/// #
/// let queue = TaskQueue::new("worker", 2);
///
/// queue.add_task(Arc::new(ClosureTask::periodic(
///     TaskID::new(1),
///     Duration::from_secs(60),
///     "Next scan in ",
///     |_| {
///         // Scan something...
///         Ok(RunAgain::Yes)
///     },
/// )));
///
/// queue.view_task_status(|table| {
///     assert!(table.contains(TaskID::new(1)));
/// });
/// ```
pub struct TaskQueue {
    shared: Arc<Shared>,
    admin_thread: Option<JoinHandle<()>>,
}

/// State shared between the facade, the worker threads and the
/// administration thread.
pub(crate) struct Shared {
    /// Primary lock guarding the task list and all scheduling state.
    pub(crate) state: Mutex<QueueState>,
    /// Signalled when work is added or scheduling state changes; waited on
    /// by workers at the end of an idle sweep.
    pub(crate) work_available: Condvar,
    /// Signalled by each worker as it exits; waited on during shutdown.
    pub(crate) worker_exited: Condvar,
    pub(crate) admin: Mutex<AdminControl>,
    pub(crate) admin_tick: Condvar,
    pub(crate) admin_tick_interval: Duration,
    thread_name: String,
    status: Mutex<StatusTable>,
    observers: Mutex<ObserverRegistry>,
}

/// Scheduling state guarded by the primary lock.
pub(crate) struct QueueState {
    /// Submitted tasks in insertion order.
    pub(crate) tasks: Vec<TaskRecord>,
    /// Scan cursor: index of the next record a worker will inspect.
    pub(crate) next_task_index: usize,
    /// Whether any task body ran during the current sweep.
    pub(crate) work_done: bool,
    /// Smallest positive delay observed during the current sweep. `None`
    /// means nothing is scheduled and the end-of-sweep wait is unbounded.
    pub(crate) wait_for: Option<Duration>,
    /// Set once at shutdown; no records are added and workers exit after at
    /// most one more task body.
    pub(crate) finish: bool,
    pub(crate) configured_workers: usize,
    pub(crate) active_workers: usize,
}

pub(crate) struct AdminControl {
    pub(crate) shutdown: bool,
}

/// Scheduling metadata for one submitted task.
///
/// The queue exclusively owns every record. Workers borrow records under
/// the primary lock and clone the task handle across the unlocked
/// `perform` call; the `active` flag keeps every other worker away in the
/// meantime.
pub(crate) struct TaskRecord {
    pub(crate) task: Arc<dyn Task>,
    /// Instant at or after which the task is eligible to run.
    pub(crate) next_run: Instant,
    /// Whether a worker is currently executing the task.
    pub(crate) active: bool,
}

impl TaskQueue {
    /// Creates a queue with the given worker thread name and number of
    /// worker threads.
    pub fn new(thread_name: impl Into<String>, n_threads: usize) -> Self {
        Self::with_config(TaskQueueConfig {
            thread_name: thread_name.into(),
            n_threads,
            ..TaskQueueConfig::default()
        })
    }

    /// Creates a queue from the given configuration.
    pub fn with_config(config: TaskQueueConfig) -> Self {
        let TaskQueueConfig {
            thread_name,
            n_threads,
            admin_tick_interval,
        } = config;

        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                tasks: Vec::new(),
                next_task_index: 0,
                work_done: false,
                wait_for: None,
                finish: false,
                configured_workers: n_threads,
                active_workers: n_threads,
            }),
            work_available: Condvar::new(),
            worker_exited: Condvar::new(),
            admin: Mutex::new(AdminControl { shutdown: false }),
            admin_tick: Condvar::new(),
            admin_tick_interval,
            thread_name,
            status: Mutex::new(StatusTable::new()),
            observers: Mutex::new(ObserverRegistry::new()),
        });

        for _ in 0..n_threads {
            Self::spawn_worker(&shared);
        }

        let admin_shared = Arc::clone(&shared);
        let admin_thread = thread::Builder::new()
            .name(format!("{ADMIN_NAME_PREFIX}{}", shared.thread_name))
            .spawn(move || admin::run(&admin_shared))
            .map_err(|error| log::error!("Failed to spawn admin thread: {error}"))
            .ok();

        Self {
            shared,
            admin_thread,
        }
    }

    /// Returns the configured number of worker threads.
    pub fn number_of_task_threads(&self) -> usize {
        self.shared.state.lock().configured_workers
    }

    /// Returns the number of worker threads currently alive. Exceeds the
    /// configured count transiently after a shrink, until the surplus
    /// workers have exited on their own.
    pub fn number_of_active_task_threads(&self) -> usize {
        self.shared.state.lock().active_workers
    }

    /// Adjusts the configured number of worker threads.
    ///
    /// Growing spawns additional workers immediately. Shrinking is
    /// cooperative: surplus workers exit on their own once their current
    /// task body (if any) returns; no thread is stopped forcibly.
    pub fn set_number_of_task_threads(&self, n_threads: usize) {
        let to_spawn = {
            let mut state = self.shared.state.lock();
            if state.finish {
                return;
            }
            state.configured_workers = n_threads;
            let missing = n_threads.saturating_sub(state.active_workers);
            state.active_workers += missing;
            missing
        };

        for _ in 0..to_spawn {
            Self::spawn_worker(&self.shared);
        }

        // Wake every worker so surplus ones notice the shrink.
        self.shared.work_available.notify_all();
        log::debug!("Task thread count set to {n_threads}");
    }

    /// Submits a task. The queue takes ownership, schedules the first run
    /// `task.timeout()` from now, publishes the task's initial status row
    /// and installs the status sink and queue back-reference.
    ///
    /// Submitting during shutdown, or with a task ID already present in the
    /// queue, is a logged no-op.
    pub fn add_task(&self, task: Arc<dyn Task>) {
        let id = task.id();

        // Install the sink and back-reference before the task becomes
        // visible to workers.
        let sink: Arc<dyn StatusSink> = self.shared.clone();
        task.set_status_sink(Some(Arc::downgrade(&sink)));
        let handle: Arc<dyn QueueHandle> = self.shared.clone();
        task.set_queue(Some(Arc::downgrade(&handle)));

        let mut initial = task.status();
        debug_assert_eq!(initial.id, id, "Task {id} reports a mismatched status ID");
        initial.id = id;
        initial.revision = 0;
        initial.complete = false;

        {
            let mut state = self.shared.state.lock();
            if state.finish {
                log::warn!("Ignoring task {id} submitted during shutdown");
                task.set_status_sink(None);
                task.set_queue(None);
                return;
            }
            if state.tasks.iter().any(|record| record.task.id() == id) {
                debug_assert!(false, "Duplicate task ID {id}");
                log::warn!("Ignoring task with duplicate ID {id}");
                task.set_status_sink(None);
                task.set_queue(None);
                return;
            }

            // The status row must exist before any worker can retire the
            // task, so it is inserted while the primary lock is still held.
            self.shared.status.lock().insert(initial.clone());

            state.tasks.push(TaskRecord {
                next_run: Instant::now() + task.timeout(),
                active: false,
                task,
            });
        }

        self.shared.notify_observers(&initial);
        self.shared.work_available.notify_one();
        log::debug!("Added task {id}");
    }

    /// Requests cancellation of the task with the given ID and wakes all
    /// workers. The record itself is retired by the worker that next picks
    /// the task up and observes [`RunAgain::No`](cadence_task::RunAgain::No).
    /// Unknown IDs are ignored.
    pub fn cancel_task(&self, id: TaskID) {
        self.shared.cancel_task_impl(id);
    }

    /// Sets the pause flag of the task with the given ID and wakes all
    /// workers so the sweep recomputes its wait horizon. Unknown IDs are
    /// ignored.
    pub fn pause_task(&self, id: TaskID, paused: bool) {
        self.shared.pause_task_impl(id, paused);
    }

    /// Flips the pause flag of the task with the given ID.
    pub fn toggle_pause_task(&self, id: TaskID) {
        self.shared.toggle_pause_task_impl(id);
    }

    /// Invokes the given closure with a consistent snapshot of the status
    /// table, holding the status lock for the duration of the call.
    ///
    /// The closure must not call back into the queue, on pain of deadlock.
    pub fn view_task_status<R>(&self, f: impl FnOnce(&StatusTable) -> R) -> R {
        f(&self.shared.status.lock())
    }

    /// Returns the number of tasks currently held by the queue, including
    /// paused and running ones.
    pub fn number_of_tasks(&self) -> usize {
        self.shared.state.lock().tasks.len()
    }

    /// Whether a task with the given ID is currently held by the queue.
    pub fn has_task(&self, id: TaskID) -> bool {
        self.shared
            .state
            .lock()
            .tasks
            .iter()
            .any(|record| record.task.id() == id)
    }

    /// Registers an observer invoked with the new status after every status
    /// mutation, and returns the token required to remove it again.
    ///
    /// Observers are invoked with no queue locks held apart from the
    /// observer lock itself and must not call back into the queue.
    pub fn add_status_changed_callback(
        &self,
        callback: impl Fn(&TaskStatus) + Send + 'static,
    ) -> CallbackId {
        self.shared.observers.lock().add(Box::new(callback))
    }

    /// Removes the observer registration with the given token. Unknown
    /// tokens are ignored.
    pub fn remove_status_changed_callback(&self, id: CallbackId) {
        self.shared.observers.lock().remove(id);
    }

    fn spawn_worker(shared: &Arc<Shared>) {
        let worker_shared = Arc::clone(shared);
        let spawn_result = thread::Builder::new()
            .name(shared.thread_name.clone())
            .spawn(move || worker::run(&worker_shared));

        if let Err(error) = spawn_result {
            log::error!("Failed to spawn worker thread: {error}");
            shared.state.lock().active_workers -= 1;
            shared.worker_exited.notify_all();
        }
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        // Flag shutdown and cancel every pending task. The cancel calls
        // happen outside the primary lock since they run client code.
        let pending: Vec<Arc<dyn Task>> = {
            let mut state = self.shared.state.lock();
            state.finish = true;
            state
                .tasks
                .iter()
                .map(|record| Arc::clone(&record.task))
                .collect()
        };
        for task in &pending {
            task.cancel();
        }
        self.shared.work_available.notify_all();

        {
            let mut control = self.shared.admin.lock();
            control.shutdown = true;
        }
        self.shared.admin_tick.notify_all();

        // Wait until every worker has observed the shutdown and exited.
        {
            let mut state = self.shared.state.lock();
            while state.active_workers > 0 {
                self.shared.worker_exited.wait(&mut state);
            }
        }

        if let Some(handle) = self.admin_thread.take() {
            if handle.join().is_err() {
                log::error!("Admin thread failed to join");
            }
        }

        // Release the remaining records and their back-references.
        let remaining = {
            let mut state = self.shared.state.lock();
            std::mem::take(&mut state.tasks)
        };
        for record in &remaining {
            record.task.set_status_sink(None);
            record.task.set_queue(None);
        }
        self.shared.status.lock().clear();
        log::debug!("Task queue shut down");
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("thread_name", &self.shared.thread_name)
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn cancel_task_impl(&self, id: TaskID) {
        let task = {
            let state = self.state.lock();
            state
                .tasks
                .iter()
                .find(|record| record.task.id() == id)
                .map(|record| Arc::clone(&record.task))
        };
        let Some(task) = task else {
            return;
        };

        task.cancel();

        // Make the record due immediately so the next sweep dispatches the
        // task and its `RunAgain::No` retires it, rather than waiting out
        // the remainder of a possibly long delay.
        {
            let mut state = self.state.lock();
            let now = Instant::now();
            if let Some(record) = state.tasks.iter_mut().find(|record| record.task.id() == id) {
                record.next_run = now;
            }
        }

        self.work_available.notify_all();
        log::debug!("Requested cancellation of task {id}");
    }

    fn pause_task_impl(&self, id: TaskID, paused: bool) {
        let task = {
            let state = self.state.lock();
            state
                .tasks
                .iter()
                .find(|record| record.task.id() == id)
                .map(|record| Arc::clone(&record.task))
        };
        let Some(task) = task else {
            return;
        };

        task.set_paused(paused);

        // Reflect the flag in the status row right away; the admin tick
        // will follow up with the "Paused." message.
        let changed = {
            let mut table = self.status.lock();
            table.get_mut(id).map(|row| {
                row.paused = paused;
                row.revision += 1;
                row.clone()
            })
        };
        if let Some(status) = &changed {
            self.notify_observers(status);
        }

        self.work_available.notify_all();
        log::debug!("Task {id} paused flag set to {paused}");
    }

    fn toggle_pause_task_impl(&self, id: TaskID) {
        let paused = {
            let state = self.state.lock();
            state
                .tasks
                .iter()
                .find(|record| record.task.id() == id)
                .map(|record| record.task.is_paused())
        };
        if let Some(paused) = paused {
            self.pause_task_impl(id, !paused);
        }
    }

    /// Removes the status row for a retiring task and returns it.
    pub(crate) fn remove_status_row(&self, id: TaskID) -> Option<TaskStatus> {
        self.status.lock().remove(id)
    }

    /// Delivers a status update: the matching table row (if any) is
    /// replaced in place with the revision re-stamped to its current value,
    /// and observers are notified with the delivered status. Updates for
    /// tasks no longer in the table (just-retired ones) still reach the
    /// observers.
    pub(crate) fn publish_status(&self, mut status: TaskStatus) {
        {
            let mut table = self.status.lock();
            if let Some(row) = table.get_mut(status.id) {
                status.revision = row.revision;
                *row = status.clone();
            }
        }
        self.notify_observers(&status);
    }

    pub(crate) fn notify_observers(&self, status: &TaskStatus) {
        self.observers.lock().notify(status);
    }

    /// Rewrites the message (and pause flag) of the status row for the
    /// given task, bumping the revision. Returns the updated row if it
    /// changed.
    pub(crate) fn rewrite_status_message(
        &self,
        id: TaskID,
        message: &str,
        paused: bool,
    ) -> Option<TaskStatus> {
        let mut table = self.status.lock();
        let row = table.get_mut(id)?;
        if row.message == message && row.paused == paused {
            return None;
        }
        row.message = message.to_string();
        row.paused = paused;
        row.revision += 1;
        Some(row.clone())
    }
}

impl StatusSink for Shared {
    fn publish(&self, status: TaskStatus) {
        self.publish_status(status);
    }
}

impl QueueHandle for Shared {
    fn cancel_task(&self, id: TaskID) {
        self.cancel_task_impl(id);
    }

    fn pause_task(&self, id: TaskID, paused: bool) {
        self.pause_task_impl(id, paused);
    }

    fn toggle_pause_task(&self, id: TaskID) {
        self.toggle_pause_task_impl(id);
    }
}
