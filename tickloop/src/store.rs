//! Bounded task storage and the deferred-removal ledger.

use heapless::Vec;

use crate::task::{Pid, Task};
use crate::MAX_TASKS;

/// Insertion-ordered task container, bounded at [`MAX_TASKS`].
pub(crate) struct TaskStore {
    tasks: Vec<Task, MAX_TASKS>,
}

impl TaskStore {
    pub(crate) const fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.tasks.len() >= MAX_TASKS
    }

    /// Append a task; fails when the store is at capacity.
    pub(crate) fn push(&mut self, task: Task) -> Result<(), Task> {
        self.tasks.push(task)
    }

    pub(crate) fn contains(&self, pid: Pid) -> bool {
        self.tasks.iter().any(|t| t.pid == pid)
    }

    pub(crate) fn find_mut(&mut self, pid: Pid) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.pid == pid)
    }

    pub(crate) fn front_mut(&mut self) -> Option<&mut Task> {
        self.tasks.first_mut()
    }

    /// Remove the task carrying `pid`, preserving insertion order.
    pub(crate) fn erase(&mut self, pid: Pid) -> Option<Task> {
        let index = self.tasks.iter().position(|t| t.pid == pid)?;
        Some(self.tasks.remove(index))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.tasks.iter_mut()
    }

    pub(crate) fn clear(&mut self) {
        self.tasks.clear();
    }
}

/// PIDs scheduled for deletion at the next safe point.
pub(crate) struct RemovalLedger {
    pids: Vec<Pid, MAX_TASKS>,
}

impl RemovalLedger {
    pub(crate) const fn new() -> Self {
        Self { pids: Vec::new() }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }

    /// Mark `pid` for removal. Marking an already listed PID is a no-op,
    /// which keeps the ledger within [`MAX_TASKS`] entries: live PIDs are
    /// unique, so a deduplicated ledger cannot overflow.
    pub(crate) fn mark(&mut self, pid: Pid) {
        if !self.pids.contains(&pid) {
            let _ = self.pids.push(pid);
        }
    }

    /// Erase every listed task that still exists and clear the ledger.
    /// Missing PIDs are skipped.
    pub(crate) fn drain(&mut self, store: &mut TaskStore) {
        for &pid in self.pids.iter() {
            store.erase(pid);
        }
        self.pids.clear();
    }

    pub(crate) fn pids(&self) -> &[Pid] {
        &self.pids
    }

    pub(crate) fn clear(&mut self) {
        self.pids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;

    fn task(pid: u16) -> Task {
        Task {
            pid: Pid(pid),
            action: Box::new(|| {}),
            repeat: false,
            interval: 0,
            condition: None,
            condition_met: false,
            condition_wait: 0,
            post_condition_delay: 0,
            execute_at: 0,
            on_timeout: None,
        }
    }

    #[test]
    fn erase_preserves_insertion_order() {
        let mut store = TaskStore::new();
        for pid in 1..=4 {
            store.push(task(pid)).ok().unwrap();
        }

        assert!(store.erase(Pid(2)).is_some());
        assert!(store.erase(Pid(2)).is_none());

        let order: std::vec::Vec<u16> = store.iter().map(|t| t.pid.get()).collect();
        assert_eq!(order, [1, 3, 4]);
        assert_eq!(store.front_mut().unwrap().pid, Pid(1));
    }

    #[test]
    fn push_rejects_at_capacity() {
        let mut store = TaskStore::new();
        for pid in 1..=MAX_TASKS as u16 {
            store.push(task(pid)).ok().unwrap();
        }

        assert!(store.is_full());
        assert!(store.push(task(999)).is_err());
        assert_eq!(store.len(), MAX_TASKS);
    }

    #[test]
    fn ledger_drain_skips_missing_and_dedupes() {
        let mut store = TaskStore::new();
        for pid in 1..=3 {
            store.push(task(pid)).ok().unwrap();
        }

        let mut ledger = RemovalLedger::new();
        ledger.mark(Pid(2));
        ledger.mark(Pid(2));
        ledger.mark(Pid(7));
        assert_eq!(ledger.pids().len(), 2);

        ledger.drain(&mut store);
        assert!(ledger.is_empty());
        assert_eq!(store.len(), 2);
        assert!(!store.contains(Pid(2)));
    }
}
