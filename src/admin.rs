//! The administration thread that refreshes countdown messages.

use crate::queue::Shared;
use cadence_task::TaskStatus;
use std::{sync::Arc, time::Instant};

/// Runs the administration loop until shutdown. Executed on its own
/// thread; wakes once per tick interval, or immediately when signalled for
/// shutdown.
pub(crate) fn run(shared: &Arc<Shared>) {
    log::trace!("Admin thread spawned");

    loop {
        {
            let mut control = shared.admin.lock();
            if control.shutdown {
                break;
            }
            let _ = shared
                .admin_tick
                .wait_for(&mut control, shared.admin_tick_interval);
            if control.shutdown {
                break;
            }
        }

        refresh_countdown_messages(shared);
    }

    log::trace!("Admin thread exiting");
}

/// Rewrites the countdown message of every inactive task's status row,
/// then notifies observers of each row that changed.
fn refresh_countdown_messages(shared: &Shared) {
    let mut changed: Vec<TaskStatus> = Vec::new();
    {
        let state = shared.state.lock();
        let now = Instant::now();

        for record in &state.tasks {
            if record.active {
                continue;
            }

            let paused = record.task.is_paused();
            let remaining_secs = record.next_run.saturating_duration_since(now).as_secs();
            let message = if paused {
                "Paused.".to_string()
            } else if remaining_secs == 0 {
                "Waiting for thread.".to_string()
            } else {
                format!("{}{remaining_secs}", record.task.timeout_message())
            };

            if let Some(row) = shared.rewrite_status_message(record.task.id(), &message, paused) {
                changed.push(row);
            }
        }
    }

    for status in &changed {
        shared.notify_observers(status);
    }
}
