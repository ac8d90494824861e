//! Worker-process bookkeeping for the fork execution models.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::sys;

#[derive(Debug, Clone, Copy)]
pub struct Worker {
    pub pid: libc::pid_t,
    pub started: Instant,
}

/// pid -> worker map owned by the parent process. Entries are either
/// live or removed within one reap tick; the simple-fork model refuses
/// new connections once the cap is reached.
pub struct WorkerTable {
    workers: HashMap<libc::pid_t, Worker>,
    last_reaped: Instant,
}

impl WorkerTable {
    pub fn new() -> Self {
        Self {
            workers: HashMap::new(),
            last_reaped: Instant::now(),
        }
    }

    pub fn insert(&mut self, pid: libc::pid_t) {
        self.workers.insert(
            pid,
            Worker {
                pid,
                started: Instant::now(),
            },
        );
    }

    pub fn remove(&mut self, pid: libc::pid_t) -> bool {
        self.workers.remove(&pid).is_some()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn at_capacity(&self, max: usize) -> bool {
        self.workers.len() >= max
    }

    pub fn pids(&self) -> Vec<libc::pid_t> {
        self.workers.keys().copied().collect()
    }

    /// Remove terminated workers when the reap interval has lapsed.
    pub fn reap_if_due(&mut self, interval: Duration) {
        if self.last_reaped.elapsed() < interval {
            return;
        }
        self.reap();
    }

    /// Remove every terminated worker now.
    pub fn reap(&mut self) {
        for pid in sys::reap_children() {
            if self.workers.remove(&pid).is_some() {
                debug!(target: "qactuar::server", "worker {pid} terminated");
            }
        }
        self.last_reaped = Instant::now();
    }
}

impl Default for WorkerTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_accounting() {
        let mut table = WorkerTable::new();
        assert!(table.is_empty());
        assert!(!table.at_capacity(1));
        table.insert(100);
        table.insert(101);
        assert_eq!(table.len(), 2);
        assert!(table.at_capacity(2));
        assert!(table.at_capacity(1));
        assert!(!table.at_capacity(3));
    }

    #[test]
    fn insert_is_idempotent_per_pid() {
        let mut table = WorkerTable::new();
        table.insert(100);
        table.insert(100);
        assert_eq!(table.len(), 1);
        assert!(table.remove(100));
        assert!(!table.remove(100));
    }

    #[test]
    fn reap_with_no_children_is_harmless() {
        let mut table = WorkerTable::new();
        table.insert(1);
        table.reap();
        // pid 1 is not our child; reaping must not touch the entry.
        assert_eq!(table.len(), 1);
    }
}
