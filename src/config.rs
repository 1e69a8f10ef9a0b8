//! Queue configuration.

use std::time::Duration;

/// Configuration for a [`TaskQueue`](crate::TaskQueue).
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug)]
pub struct TaskQueueConfig {
    /// Name given to every worker thread. The administration thread's name
    /// is this prefixed with one distinguishing character.
    pub thread_name: String,
    /// Number of worker threads started with the queue.
    pub n_threads: usize,
    /// How often the administration thread refreshes countdown messages.
    pub admin_tick_interval: Duration,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            thread_name: "cadence".to_string(),
            n_threads: 4,
            admin_tick_interval: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_workers_and_a_tick_interval() {
        let config = TaskQueueConfig::default();
        assert!(config.n_threads > 0);
        assert!(!config.thread_name.is_empty());
        assert!(!config.admin_tick_interval.is_zero());
    }
}
