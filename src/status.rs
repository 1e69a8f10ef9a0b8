//! Status table and observer registry.

use cadence_task::{TaskID, TaskStatus};
use hashbrown::HashMap;

/// The queue's table of per-task status rows, keyed by task ID.
///
/// A consistent snapshot of the table can be inspected through
/// [`TaskQueue::view_task_status`](crate::TaskQueue::view_task_status).
#[derive(Debug)]
pub struct StatusTable {
    rows: HashMap<TaskID, TaskStatus>,
}

/// Token identifying one observer registration, returned by
/// [`TaskQueue::add_status_changed_callback`](crate::TaskQueue::add_status_changed_callback)
/// and required for removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

type StatusChangedCallback = Box<dyn Fn(&TaskStatus) + Send>;

/// The set of registered status-changed observers.
pub(crate) struct ObserverRegistry {
    next_id: u64,
    observers: Vec<(CallbackId, StatusChangedCallback)>,
}

impl StatusTable {
    pub(crate) fn new() -> Self {
        Self {
            rows: HashMap::new(),
        }
    }

    /// Returns the status row for the given task, if present.
    pub fn get(&self, id: TaskID) -> Option<&TaskStatus> {
        self.rows.get(&id)
    }

    /// Whether the table holds a row for the given task.
    pub fn contains(&self, id: TaskID) -> bool {
        self.rows.contains_key(&id)
    }

    /// Returns the number of rows in the table.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table contains no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterates over all status rows in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskStatus> {
        self.rows.values()
    }

    pub(crate) fn insert(&mut self, status: TaskStatus) {
        self.rows.insert(status.id, status);
    }

    pub(crate) fn get_mut(&mut self, id: TaskID) -> Option<&mut TaskStatus> {
        self.rows.get_mut(&id)
    }

    pub(crate) fn remove(&mut self, id: TaskID) -> Option<TaskStatus> {
        self.rows.remove(&id)
    }

    pub(crate) fn clear(&mut self) {
        self.rows.clear();
    }
}

impl ObserverRegistry {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 0,
            observers: Vec::new(),
        }
    }

    /// Registers an observer and returns the token required for removal.
    /// Registering the same closure twice yields two distinct tokens.
    pub(crate) fn add(&mut self, callback: StatusChangedCallback) -> CallbackId {
        let id = CallbackId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, callback));
        id
    }

    /// Removes the registration with the given token. Unknown tokens are
    /// ignored.
    pub(crate) fn remove(&mut self, id: CallbackId) {
        self.observers.retain(|(observer_id, _)| *observer_id != id);
    }

    pub(crate) fn notify(&self, status: &TaskStatus) {
        for (_, callback) in &self.observers {
            callback(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    fn status(id: i64) -> TaskStatus {
        TaskStatus::new(TaskID::new(id))
    }

    #[test]
    fn inserting_and_removing_rows_works() {
        let mut table = StatusTable::new();
        assert!(table.is_empty());

        table.insert(status(1));
        table.insert(status(2));
        assert_eq!(table.len(), 2);
        assert!(table.contains(TaskID::new(1)));

        let removed = table.remove(TaskID::new(1));
        assert_eq!(removed.unwrap().id, TaskID::new(1));
        assert!(!table.contains(TaskID::new(1)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn removing_missing_row_gives_none() {
        let mut table = StatusTable::new();
        assert!(table.remove(TaskID::new(7)).is_none());
    }

    #[test]
    fn inserting_same_id_replaces_row() {
        let mut table = StatusTable::new();
        table.insert(status(1));
        table.insert(TaskStatus::with_message(TaskID::new(1), "updated"));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(TaskID::new(1)).unwrap().message, "updated");
    }

    #[test]
    fn registered_observer_is_notified() {
        let mut registry = ObserverRegistry::new();
        let notified = Arc::new(AtomicUsize::new(0));

        let count = Arc::clone(&notified);
        registry.add(Box::new(move |_| {
            count.fetch_add(1, Ordering::AcqRel);
        }));

        registry.notify(&status(1));
        registry.notify(&status(2));
        assert_eq!(notified.load(Ordering::Acquire), 2);
    }

    #[test]
    fn removed_observer_is_no_longer_notified() {
        let mut registry = ObserverRegistry::new();
        let notified = Arc::new(AtomicUsize::new(0));

        let count = Arc::clone(&notified);
        let id = registry.add(Box::new(move |_| {
            count.fetch_add(1, Ordering::AcqRel);
        }));

        registry.notify(&status(1));
        registry.remove(id);
        registry.notify(&status(2));
        assert_eq!(notified.load(Ordering::Acquire), 1);
    }

    #[test]
    fn duplicate_registrations_get_distinct_tokens() {
        let mut registry = ObserverRegistry::new();
        let notified = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&notified);
        let callback = move |_: &TaskStatus| {
            counter.fetch_add(1, Ordering::AcqRel);
        };

        let first = registry.add(Box::new(callback.clone()));
        let second = registry.add(Box::new(callback));
        assert_ne!(first, second);

        registry.notify(&status(1));
        assert_eq!(notified.load(Ordering::Acquire), 2);

        // Removing one registration leaves the other in place.
        registry.remove(first);
        registry.notify(&status(2));
        assert_eq!(notified.load(Ordering::Acquire), 3);
    }

    #[test]
    fn removing_unknown_token_is_a_no_op() {
        let mut registry = ObserverRegistry::new();
        let id = registry.add(Box::new(|_| {}));
        registry.remove(id);
        registry.remove(id);
    }
}
