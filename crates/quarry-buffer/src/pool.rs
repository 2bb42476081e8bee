//! Buffer pool manager.
//!
//! Caches page bytes keyed by [`PageId`] and fronts the lock manager that
//! provides per-(transaction, page) concurrency control. The pool is
//! deliberately passive: the file layer checks the cache, reads missing
//! pages from disk at their deterministic offsets, and installs the bytes;
//! completed mutations are written back here marked dirty so a surrounding
//! transaction layer can flush the atomic set.

use crate::lock::{LockManager, Permissions};
use parking_lot::Mutex;
use quarry_common::{PageId, QuarryError, Result, TransactionId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Size of every uniform page in bytes.
///
/// Heap pages and B+-tree header/internal/leaf pages all share this size;
/// only the B+-tree root-pointer page differs.
pub const PAGE_SIZE: usize = 4096;

/// On-disk size of the B+-tree root-pointer page: root page number (u32),
/// root category tag (u8), first header page number (u32).
pub const ROOT_PTR_PAGE_SIZE: usize = 9;

/// Configuration for the buffer pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferPoolConfig {
    /// Maximum number of cached pages.
    pub capacity: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// A cached page.
#[derive(Debug, Clone)]
struct Frame {
    /// Current page bytes.
    data: Vec<u8>,
    /// Transaction that last dirtied the page, if any.
    dirty: Option<TransactionId>,
}

/// Buffer pool manager.
pub struct BufferPool {
    config: BufferPoolConfig,
    frames: Mutex<HashMap<PageId, Frame>>,
    locks: LockManager,
}

impl BufferPool {
    /// Creates a new buffer pool.
    pub fn new(config: BufferPoolConfig) -> Self {
        Self {
            config,
            frames: Mutex::new(HashMap::new()),
            locks: LockManager::new(),
        }
    }

    /// Creates a buffer pool with the default configuration.
    pub fn with_defaults() -> Self {
        Self::new(BufferPoolConfig::default())
    }

    /// Returns the configured capacity.
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Returns the number of pages currently cached.
    pub fn page_count(&self) -> usize {
        self.frames.lock().len()
    }

    /// Acquires the page lock for `tid` under the requested permission.
    ///
    /// Blocks until granted; relays `TransactionAborted` on deadlock.
    pub fn acquire(&self, tid: TransactionId, pid: PageId, perm: Permissions) -> Result<()> {
        self.locks.acquire(tid, pid, perm)
    }

    /// Returns true if `tid` holds a lock on `pid`.
    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.locks.holds_lock(tid, pid)
    }

    /// Returns a copy of the cached bytes for `pid`, if present.
    pub fn lookup(&self, pid: PageId) -> Option<Vec<u8>> {
        self.frames.lock().get(&pid).map(|f| f.data.clone())
    }

    /// Caches a clean page freshly read from disk.
    ///
    /// Evicts an arbitrary clean frame when at capacity; fails with
    /// `IllegalArgument` if every frame is dirty, since evicting one would
    /// lose an unflushed update.
    pub fn install(&self, pid: PageId, data: Vec<u8>) -> Result<()> {
        let mut frames = self.frames.lock();
        if !frames.contains_key(&pid) && frames.len() >= self.config.capacity {
            let victim = frames
                .iter()
                .find(|(_, f)| f.dirty.is_none())
                .map(|(pid, _)| *pid);
            match victim {
                Some(v) => {
                    frames.remove(&v);
                }
                None => {
                    return Err(QuarryError::IllegalArgument(
                        "buffer pool full of dirty pages".to_string(),
                    ))
                }
            }
        }
        // Never downgrade a dirty frame with stale disk bytes.
        if let Some(frame) = frames.get(&pid) {
            if frame.dirty.is_some() {
                return Ok(());
            }
        }
        frames.insert(pid, Frame { data, dirty: None });
        Ok(())
    }

    /// Replaces the cached bytes for `pid` and marks the frame dirty.
    pub fn write_back(&self, pid: PageId, data: Vec<u8>, tid: TransactionId) {
        let mut frames = self.frames.lock();
        frames.insert(
            pid,
            Frame {
                data,
                dirty: Some(tid),
            },
        );
    }

    /// Drops `pid` from the cache without flushing.
    ///
    /// Used by the empty-page allocator to wipe stale content before a
    /// freed page number is reused under a (possibly different) category.
    pub fn discard(&self, pid: PageId) {
        self.frames.lock().remove(&pid);
    }

    /// Returns the ids of all dirty pages.
    pub fn dirty_pages(&self) -> Vec<PageId> {
        self.frames
            .lock()
            .iter()
            .filter(|(_, f)| f.dirty.is_some())
            .map(|(pid, _)| *pid)
            .collect()
    }

    /// Returns the transaction that dirtied `pid`, if the frame is dirty.
    pub fn dirtier(&self, pid: PageId) -> Option<TransactionId> {
        self.frames.lock().get(&pid).and_then(|f| f.dirty)
    }

    /// Flushes one dirty page through the given writer and marks it clean.
    ///
    /// Returns true if the page was dirty and flushed.
    pub fn flush_page_with<F>(&self, pid: PageId, mut write: F) -> Result<bool>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        let mut frames = self.frames.lock();
        if let Some(frame) = frames.get_mut(&pid) {
            if frame.dirty.is_some() {
                write(pid, &frame.data)?;
                frame.dirty = None;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Flushes every dirty page through the given writer.
    ///
    /// Returns the number of pages flushed.
    pub fn flush_with<F>(&self, mut write: F) -> Result<usize>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        let mut frames = self.frames.lock();
        let mut flushed = 0;
        for (pid, frame) in frames.iter_mut() {
            if frame.dirty.is_some() {
                write(*pid, &frame.data)?;
                frame.dirty = None;
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Releases every lock held by `tid`.
    pub fn release(&self, tid: TransactionId) {
        self.locks.release_all(tid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_common::HeapPageId;

    fn pid(n: u32) -> PageId {
        PageId::Heap(HeapPageId::new(1, n))
    }

    #[test]
    fn test_pool_config_default() {
        let config = BufferPoolConfig::default();
        assert_eq!(config.capacity, 1024);
    }

    #[test]
    fn test_pool_config_serde_roundtrip() {
        let config = BufferPoolConfig { capacity: 64 };
        let serialized = serde_json::to_string(&config).unwrap();
        let deserialized: BufferPoolConfig = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized.capacity, 64);
    }

    #[test]
    fn test_install_and_lookup() {
        let pool = BufferPool::with_defaults();
        assert!(pool.lookup(pid(0)).is_none());

        pool.install(pid(0), vec![7u8; PAGE_SIZE]).unwrap();
        assert_eq!(pool.lookup(pid(0)).unwrap(), vec![7u8; PAGE_SIZE]);
        assert_eq!(pool.page_count(), 1);
    }

    #[test]
    fn test_write_back_marks_dirty() {
        let pool = BufferPool::with_defaults();
        let tid = TransactionId::new();

        pool.install(pid(0), vec![0u8; PAGE_SIZE]).unwrap();
        assert!(pool.dirty_pages().is_empty());

        pool.write_back(pid(0), vec![1u8; PAGE_SIZE], tid);
        assert_eq!(pool.dirty_pages(), vec![pid(0)]);
        assert_eq!(pool.dirtier(pid(0)), Some(tid));
        assert_eq!(pool.lookup(pid(0)).unwrap()[0], 1);
    }

    #[test]
    fn test_install_never_clobbers_dirty() {
        let pool = BufferPool::with_defaults();
        let tid = TransactionId::new();

        pool.write_back(pid(0), vec![9u8; PAGE_SIZE], tid);
        pool.install(pid(0), vec![0u8; PAGE_SIZE]).unwrap();
        assert_eq!(pool.lookup(pid(0)).unwrap()[0], 9);
    }

    #[test]
    fn test_eviction_prefers_clean() {
        let pool = BufferPool::new(BufferPoolConfig { capacity: 2 });
        let tid = TransactionId::new();

        pool.write_back(pid(0), vec![1u8; 8], tid);
        pool.install(pid(1), vec![2u8; 8]).unwrap();
        pool.install(pid(2), vec![3u8; 8]).unwrap();

        // The dirty page must survive; the clean one was evicted.
        assert!(pool.lookup(pid(0)).is_some());
        assert!(pool.lookup(pid(1)).is_none());
        assert!(pool.lookup(pid(2)).is_some());
    }

    #[test]
    fn test_eviction_fails_when_all_dirty() {
        let pool = BufferPool::new(BufferPoolConfig { capacity: 1 });
        let tid = TransactionId::new();

        pool.write_back(pid(0), vec![1u8; 8], tid);
        assert!(pool.install(pid(1), vec![2u8; 8]).is_err());
    }

    #[test]
    fn test_discard() {
        let pool = BufferPool::with_defaults();
        pool.install(pid(0), vec![0u8; 8]).unwrap();
        pool.discard(pid(0));
        assert!(pool.lookup(pid(0)).is_none());
    }

    #[test]
    fn test_flush_with() {
        let pool = BufferPool::with_defaults();
        let tid = TransactionId::new();

        pool.write_back(pid(0), vec![1u8; 8], tid);
        pool.write_back(pid(1), vec![2u8; 8], tid);
        pool.install(pid(2), vec![3u8; 8]).unwrap();

        let mut seen = Vec::new();
        let flushed = pool
            .flush_with(|pid, _| {
                seen.push(pid);
                Ok(())
            })
            .unwrap();

        assert_eq!(flushed, 2);
        assert_eq!(seen.len(), 2);
        assert!(pool.dirty_pages().is_empty());
    }

    #[test]
    fn test_flush_page_with() {
        let pool = BufferPool::with_defaults();
        let tid = TransactionId::new();

        pool.write_back(pid(0), vec![1u8; 8], tid);
        assert!(pool.flush_page_with(pid(0), |_, _| Ok(())).unwrap());
        assert!(!pool.flush_page_with(pid(0), |_, _| Ok(())).unwrap());
        assert!(!pool.flush_page_with(pid(9), |_, _| Ok(())).unwrap());
    }

    #[test]
    fn test_acquire_release() {
        let pool = BufferPool::with_defaults();
        let tid = TransactionId::new();

        pool.acquire(tid, pid(0), Permissions::ReadWrite).unwrap();
        assert!(pool.holds_lock(tid, pid(0)));
        pool.release(tid);
        assert!(!pool.holds_lock(tid, pid(0)));
    }
}
