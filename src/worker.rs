//! The worker loop.

use crate::queue::{QueueState, Shared};
use cadence_task::{RunAgain, Task};
use parking_lot::MutexGuard;
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Instant,
};

/// Runs the worker loop until shutdown or a cooperative shrink. Executed on
/// its own thread; the primary lock is held everywhere except across the
/// task body itself.
pub(crate) fn run(shared: &Arc<Shared>) {
    log::trace!("Worker spawned");

    let mut state = shared.state.lock();
    loop {
        if state.finish {
            break;
        }
        if state.active_workers > state.configured_workers {
            log::trace!("Worker exiting to shrink pool");
            break;
        }

        if state.next_task_index < state.tasks.len() {
            let index = state.next_task_index;
            state.next_task_index += 1;

            let record = &state.tasks[index];
            if record.active {
                continue;
            }
            if record.task.is_paused() {
                continue;
            }

            let delay = record.next_run.saturating_duration_since(Instant::now());
            if !delay.is_zero() {
                // Not yet due: fold the delay into this sweep's wait
                // horizon and move on.
                state.wait_for = Some(state.wait_for.map_or(delay, |wait| wait.min(delay)));
                continue;
            }

            let record = &mut state.tasks[index];
            let task = Arc::clone(&record.task);
            record.active = true;
            state.work_done = true;
            drop(state);

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.perform()));

            state = shared.state.lock();
            let (run_again, failure) = match outcome {
                Ok(Ok(run_again)) => (run_again, None),
                Ok(Err(error)) => {
                    log::error!("Task {} failed: {error:#}", task.id());
                    (RunAgain::No, Some(format!("Failed: {error:#}")))
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    log::error!("Task {} panicked: {message}", task.id());
                    (RunAgain::No, Some(format!("Panicked: {message}")))
                }
            };

            if task.timeout().is_zero() || !run_again.is_yes() {
                state = retire(shared, state, &task, failure);
            } else if let Some(position) = state
                .tasks
                .iter()
                .position(|record| Arc::ptr_eq(&record.task, &task))
            {
                let record = &mut state.tasks[position];
                record.next_run = Instant::now() + task.timeout();
                record.active = false;
                // A worker may be asleep with a wait horizon computed
                // before this deadline existed.
                shared.work_available.notify_one();
            }
            continue;
        }

        // End of sweep: restart the scan and decide whether to wait.
        state.next_task_index = 0;
        let wait = state.wait_for.take();
        if state.work_done {
            // Something ran this sweep, so another ready task may exist.
            state.work_done = false;
            continue;
        }
        match wait {
            Some(duration) => {
                let _ = shared.work_available.wait_for(&mut state, duration);
            }
            None => shared.work_available.wait(&mut state),
        }
    }

    state.active_workers -= 1;
    shared.worker_exited.notify_all();
    drop(state);
    log::trace!("Worker exiting");
}

/// Removes the retiring task's record and status row and publishes its
/// final status. Releases the primary lock across the status work and
/// returns with it re-acquired.
fn retire<'a>(
    shared: &'a Arc<Shared>,
    mut state: MutexGuard<'a, QueueState>,
    task: &Arc<dyn Task>,
    failure: Option<String>,
) -> MutexGuard<'a, QueueState> {
    if let Some(position) = state
        .tasks
        .iter()
        .position(|record| Arc::ptr_eq(&record.task, task))
    {
        state.tasks.remove(position);
        if position < state.next_task_index {
            state.next_task_index -= 1;
        }
    }
    drop(state);

    let removed_row = shared.remove_status_row(task.id());

    let mut final_status = task.status();
    final_status.complete = true;
    if let Some(failure) = failure {
        final_status.message = failure;
    }
    final_status.revision = removed_row.map_or(0, |row| row.revision + 1);
    shared.publish_status(final_status);

    task.set_status_sink(None);
    task.set_queue(None);
    log::debug!("Retired task {}", task.id());

    shared.state.lock()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
