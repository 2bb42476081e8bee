//! Page-level lock manager.
//!
//! Grants shared/exclusive locks keyed by (transaction, page id). Requests
//! queue FIFO per page and block on a condition variable until granted. A
//! waits-for graph is maintained while blocked; a detected cycle aborts the
//! requesting transaction instead of deadlocking the thread.

use quarry_common::{PageId, QuarryError, Result, TransactionId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Condvar, Mutex};

/// Permission a transaction requests on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permissions {
    /// Shared access; many readers may hold it at once.
    ReadOnly,
    /// Exclusive access; no other transaction may hold the page.
    ReadWrite,
}

/// A pending or granted lock request.
#[derive(Debug, Clone)]
struct LockRequest {
    tid: TransactionId,
    perm: Permissions,
    granted: bool,
}

/// FIFO queue of requests for one page.
#[derive(Debug, Default)]
struct LockQueue {
    requests: VecDeque<LockRequest>,
}

impl LockQueue {
    fn holders(&self) -> impl Iterator<Item = &LockRequest> {
        self.requests.iter().filter(|r| r.granted)
    }

    fn shared_granted(&self) -> usize {
        self.holders()
            .filter(|r| r.perm == Permissions::ReadOnly)
            .count()
    }

    fn exclusive_granted(&self) -> bool {
        self.holders().any(|r| r.perm == Permissions::ReadWrite)
    }
}

/// Lock manager for the buffer pool.
#[derive(Debug, Default)]
pub struct LockManager {
    /// Per-page request queues.
    lock_table: Mutex<HashMap<PageId, LockQueue>>,
    /// Wakes blocked requesters when grants may have changed.
    cvar: Condvar,
    /// Maps a waiting transaction to the holders it waits on.
    waits_for: Mutex<HashMap<TransactionId, HashSet<TransactionId>>>,
}

impl LockManager {
    /// Creates a new lock manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a lock on `pid` for `tid`, blocking until granted.
    ///
    /// Re-entrant: a transaction already holding a sufficient lock returns
    /// immediately. A sole shared holder asking for ReadWrite is upgraded in
    /// place. Returns `TransactionAborted` if waiting would deadlock.
    pub fn acquire(&self, tid: TransactionId, pid: PageId, perm: Permissions) -> Result<()> {
        let mut table = self.lock_table.lock().unwrap();

        {
            let queue = table.entry(pid).or_default();

            // Already held with sufficient strength?
            if let Some(held) = queue.requests.iter().find(|r| r.tid == tid && r.granted) {
                if held.perm == Permissions::ReadWrite || perm == Permissions::ReadOnly {
                    return Ok(());
                }
                // Upgrade: allowed immediately when we are the only holder.
                if queue.holders().count() == 1 {
                    let req = queue
                        .requests
                        .iter_mut()
                        .find(|r| r.tid == tid && r.granted)
                        .unwrap();
                    req.perm = Permissions::ReadWrite;
                    return Ok(());
                }
                // Other readers present: drop our shared grant and queue the
                // exclusive request like any other.
                queue.requests.retain(|r| !(r.tid == tid && r.granted));
            }

            queue.requests.push_back(LockRequest {
                tid,
                perm,
                granted: false,
            });
        }

        loop {
            Self::try_grant(table.get_mut(&pid).unwrap());

            let granted = table
                .get(&pid)
                .and_then(|q| q.requests.iter().find(|r| r.tid == tid))
                .map_or(false, |r| r.granted);
            if granted {
                self.forget_waiter(tid);
                return Ok(());
            }

            self.record_waits(tid, &table);
            if self.deadlocked(tid) {
                let queue = table.get_mut(&pid).unwrap();
                queue.requests.retain(|r| r.tid != tid);
                if queue.requests.is_empty() {
                    table.remove(&pid);
                }
                self.forget_waiter(tid);
                self.cvar.notify_all();
                return Err(QuarryError::TransactionAborted);
            }

            table = self.cvar.wait(table).unwrap();
        }
    }

    /// Releases every lock held or requested by `tid`.
    pub fn release_all(&self, tid: TransactionId) {
        let mut table = self.lock_table.lock().unwrap();
        let mut affected = Vec::new();

        table.retain(|pid, queue| {
            let before = queue.requests.len();
            queue.requests.retain(|r| r.tid != tid);
            if queue.requests.len() < before {
                affected.push(*pid);
            }
            !queue.requests.is_empty()
        });

        self.forget_waiter(tid);

        for pid in affected {
            if let Some(queue) = table.get_mut(&pid) {
                Self::try_grant(queue);
            }
        }
        self.cvar.notify_all();
    }

    /// Returns true if `tid` currently holds a lock on `pid`.
    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        let table = self.lock_table.lock().unwrap();
        table
            .get(&pid)
            .map_or(false, |q| q.requests.iter().any(|r| r.tid == tid && r.granted))
    }

    /// Grants queued requests in FIFO order until one is incompatible.
    fn try_grant(queue: &mut LockQueue) {
        let mut shared = queue.shared_granted();
        let mut exclusive = queue.exclusive_granted();

        for req in queue.requests.iter_mut() {
            if req.granted {
                continue;
            }
            let compatible = match req.perm {
                Permissions::ReadOnly => !exclusive,
                Permissions::ReadWrite => shared == 0 && !exclusive,
            };
            if compatible {
                req.granted = true;
                match req.perm {
                    Permissions::ReadOnly => shared += 1,
                    Permissions::ReadWrite => exclusive = true,
                }
            } else {
                break;
            }
        }
    }

    /// Rebuilds the waits-for edges for a blocked transaction.
    fn record_waits(&self, waiter: TransactionId, table: &HashMap<PageId, LockQueue>) {
        let mut waits_for = self.waits_for.lock().unwrap();
        let edges = waits_for.entry(waiter).or_default();
        edges.clear();

        for queue in table.values() {
            let Some(req) = queue
                .requests
                .iter()
                .find(|r| r.tid == waiter && !r.granted)
            else {
                continue;
            };
            for holder in queue.holders() {
                let compatible = req.perm == Permissions::ReadOnly
                    && holder.perm == Permissions::ReadOnly;
                if !compatible && holder.tid != waiter {
                    edges.insert(holder.tid);
                }
            }
        }
    }

    fn forget_waiter(&self, tid: TransactionId) {
        let mut waits_for = self.waits_for.lock().unwrap();
        waits_for.remove(&tid);
        for edges in waits_for.values_mut() {
            edges.remove(&tid);
        }
    }

    /// Returns true if `start` is part of a waits-for cycle.
    fn deadlocked(&self, start: TransactionId) -> bool {
        let waits_for = self.waits_for.lock().unwrap();
        let mut visited = HashSet::new();
        let mut path = HashSet::new();
        Self::dfs(start, &waits_for, &mut visited, &mut path)
    }

    fn dfs(
        current: TransactionId,
        waits_for: &HashMap<TransactionId, HashSet<TransactionId>>,
        visited: &mut HashSet<TransactionId>,
        path: &mut HashSet<TransactionId>,
    ) -> bool {
        visited.insert(current);
        path.insert(current);

        if let Some(edges) = waits_for.get(&current) {
            for &next in edges {
                if path.contains(&next) {
                    return true;
                }
                if !visited.contains(&next) && Self::dfs(next, waits_for, visited, path) {
                    return true;
                }
            }
        }

        path.remove(&current);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_common::HeapPageId;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn pid(n: u32) -> PageId {
        PageId::Heap(HeapPageId::new(1, n))
    }

    #[test]
    fn test_shared_locks_coexist() {
        let lm = LockManager::new();
        let (a, b) = (TransactionId::new(), TransactionId::new());

        lm.acquire(a, pid(0), Permissions::ReadOnly).unwrap();
        lm.acquire(b, pid(0), Permissions::ReadOnly).unwrap();
        assert!(lm.holds_lock(a, pid(0)));
        assert!(lm.holds_lock(b, pid(0)));
    }

    #[test]
    fn test_reentrant_acquire() {
        let lm = LockManager::new();
        let a = TransactionId::new();

        lm.acquire(a, pid(0), Permissions::ReadWrite).unwrap();
        lm.acquire(a, pid(0), Permissions::ReadWrite).unwrap();
        lm.acquire(a, pid(0), Permissions::ReadOnly).unwrap();
        assert!(lm.holds_lock(a, pid(0)));
    }

    #[test]
    fn test_sole_holder_upgrade() {
        let lm = LockManager::new();
        let a = TransactionId::new();

        lm.acquire(a, pid(0), Permissions::ReadOnly).unwrap();
        lm.acquire(a, pid(0), Permissions::ReadWrite).unwrap();
        assert!(lm.holds_lock(a, pid(0)));
    }

    #[test]
    fn test_release_all_unblocks_waiter() {
        let lm = Arc::new(LockManager::new());
        let (a, b) = (TransactionId::new(), TransactionId::new());

        lm.acquire(a, pid(0), Permissions::ReadWrite).unwrap();

        let lm2 = Arc::clone(&lm);
        let handle = thread::spawn(move || lm2.acquire(b, pid(0), Permissions::ReadWrite));

        thread::sleep(Duration::from_millis(50));
        lm.release_all(a);

        handle.join().unwrap().unwrap();
        assert!(lm.holds_lock(b, pid(0)));
        assert!(!lm.holds_lock(a, pid(0)));
    }

    #[test]
    fn test_deadlock_aborts_one() {
        let lm = Arc::new(LockManager::new());
        let (a, b) = (TransactionId::new(), TransactionId::new());

        lm.acquire(a, pid(0), Permissions::ReadWrite).unwrap();
        lm.acquire(b, pid(1), Permissions::ReadWrite).unwrap();

        let lm2 = Arc::clone(&lm);
        let handle = thread::spawn(move || {
            let r = lm2.acquire(b, pid(0), Permissions::ReadWrite);
            if r.is_err() {
                lm2.release_all(b);
            }
            r
        });

        thread::sleep(Duration::from_millis(50));
        let mine = lm.acquire(a, pid(1), Permissions::ReadWrite);
        if mine.is_err() {
            lm.release_all(a);
        }
        let theirs = handle.join().unwrap();

        // Exactly one side must have been aborted.
        assert!(mine.is_err() != theirs.is_err());
    }

    #[test]
    fn test_exclusive_blocks_shared() {
        let lm = Arc::new(LockManager::new());
        let (a, b) = (TransactionId::new(), TransactionId::new());

        lm.acquire(a, pid(0), Permissions::ReadWrite).unwrap();

        let lm2 = Arc::clone(&lm);
        let handle = thread::spawn(move || {
            let r = lm2.acquire(b, pid(0), Permissions::ReadOnly);
            lm2.release_all(b);
            r
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        lm.release_all(a);
        handle.join().unwrap().unwrap();
    }
}
