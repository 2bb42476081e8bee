//! Heap file: an unordered collection of heap pages backed by one OS file.
//!
//! Page accesses from operations go through the buffer pool so page-level
//! locking is honored. The file itself is a random-access byte array of
//! whole pages; direct reads and writes hold an exclusive lock on the file
//! handle.

use crate::heap::page::{HeapPage, HeapPageIter};
use crate::tuple::{Tuple, TupleDesc};
use parking_lot::Mutex;
use quarry_buffer::{BufferPool, Permissions, PAGE_SIZE};
use quarry_common::{
    stable_table_id, HeapPageId, PageId, QuarryError, Result, TransactionId,
};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Heap file manager.
///
/// Stateless apart from the file handle: every operation runs on behalf of
/// a transaction id and reports the pages it dirtied.
pub struct HeapFile {
    file: Mutex<File>,
    path: PathBuf,
    table_id: u32,
    desc: TupleDesc,
    pool: Arc<BufferPool>,
}

impl HeapFile {
    /// Opens (creating if absent) a heap file at `path`.
    pub fn open(path: &Path, desc: TupleDesc, pool: Arc<BufferPool>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            table_id: stable_table_id(path),
            desc,
            pool,
        })
    }

    /// Returns the stable table id derived from the backing path.
    pub fn table_id(&self) -> u32 {
        self.table_id
    }

    /// Returns the tuple descriptor of this table.
    pub fn desc(&self) -> &TupleDesc {
        &self.desc
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the buffer pool this file runs against.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Returns the number of whole pages in the file.
    pub fn num_pages(&self) -> Result<u32> {
        let file = self.file.lock();
        let len = file.metadata()?.len();
        Ok((len / PAGE_SIZE as u64) as u32)
    }

    /// Reads a page directly from disk.
    ///
    /// Not part of the operation path; the buffer pool (via `fetch_page`)
    /// is the only caller during normal mutations.
    pub fn read_page(&self, pid: HeapPageId) -> Result<HeapPage> {
        if pid.table_id != self.table_id {
            return Err(QuarryError::IllegalArgument(format!(
                "page {} does not belong to table {}",
                pid, self.table_id
            )));
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(pid.page_no as u64 * PAGE_SIZE as u64))?;
        let mut data = vec![0u8; PAGE_SIZE];
        let mut read = 0;
        while read < PAGE_SIZE {
            let n = file.read(&mut data[read..])?;
            if n == 0 {
                return Err(QuarryError::ShortRead {
                    expected: PAGE_SIZE,
                    actual: read,
                });
            }
            read += n;
        }
        drop(file);
        HeapPage::new(pid, &data, self.desc.clone())
    }

    /// Writes a whole page to its offset in the file.
    pub fn write_page(&self, page: &HeapPage) -> Result<()> {
        self.write_page_bytes(page.id().page_no, &page.get_page_data())
    }

    fn write_page_bytes(&self, page_no: u32, data: &[u8]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_no as u64 * PAGE_SIZE as u64))?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }

    /// Flushes this table's dirty pool pages to disk.
    pub fn flush(&self) -> Result<usize> {
        let mut flushed = 0;
        for pid in self.pool.dirty_pages() {
            if pid.table_id() != self.table_id {
                continue;
            }
            if let PageId::Heap(hpid) = pid {
                if self
                    .pool
                    .flush_page_with(pid, |_, data| self.write_page_bytes(hpid.page_no, data))?
                {
                    flushed += 1;
                }
            }
        }
        Ok(flushed)
    }

    /// Fetches a page through the buffer pool under the given permission.
    fn fetch_page(
        &self,
        tid: TransactionId,
        pid: HeapPageId,
        perm: Permissions,
    ) -> Result<HeapPage> {
        let key = PageId::Heap(pid);
        self.pool.acquire(tid, key, perm)?;
        let bytes = match self.pool.lookup(key) {
            Some(bytes) => bytes,
            None => {
                let page = self.read_page(pid)?;
                let bytes = page.get_page_data();
                self.pool.install(key, bytes.clone())?;
                bytes
            }
        };
        HeapPage::new(pid, &bytes, self.desc.clone())
    }

    /// Inserts a tuple into the first page with a free slot.
    ///
    /// Scans existing pages through the buffer pool with write permission;
    /// when every page is full, appends a fresh page to the file and
    /// inserts there. Returns the set of dirtied pages (the appended page
    /// included).
    pub fn insert_tuple(&self, tid: TransactionId, t: Tuple) -> Result<Vec<PageId>> {
        let num_pages = self.num_pages()?;

        for page_no in 0..num_pages {
            let pid = HeapPageId::new(self.table_id, page_no);
            let mut page = self.fetch_page(tid, pid, Permissions::ReadWrite)?;
            if page.num_empty_slots() == 0 {
                continue;
            }
            page.insert_tuple(t)?;
            page.mark_dirty(true, tid);
            self.pool
                .write_back(PageId::Heap(pid), page.get_page_data(), tid);
            return Ok(vec![PageId::Heap(pid)]);
        }

        // All pages full: extend the file with a zeroed page so it becomes
        // addressable, then insert through the pool like any other page.
        let pid = HeapPageId::new(self.table_id, num_pages);
        self.write_page_bytes(pid.page_no, &HeapPage::create_empty_page_data())?;

        let mut page = self.fetch_page(tid, pid, Permissions::ReadWrite)?;
        page.insert_tuple(t)?;
        page.mark_dirty(true, tid);
        self.pool
            .write_back(PageId::Heap(pid), page.get_page_data(), tid);
        Ok(vec![PageId::Heap(pid)])
    }

    /// Deletes the tuple named by its record id.
    ///
    /// Returns the set of dirtied pages.
    pub fn delete_tuple(&self, tid: TransactionId, t: &Tuple) -> Result<Vec<PageId>> {
        let rid = t.record_id().ok_or(QuarryError::TupleNotOnPage)?;
        let PageId::Heap(pid) = rid.page_id else {
            return Err(QuarryError::TupleNotOnPage);
        };
        if pid.table_id != self.table_id {
            return Err(QuarryError::TupleNotOnPage);
        }

        let mut page = self.fetch_page(tid, pid, Permissions::ReadWrite)?;
        page.delete_tuple(t)?;
        page.mark_dirty(true, tid);
        self.pool
            .write_back(PageId::Heap(pid), page.get_page_data(), tid);
        Ok(vec![PageId::Heap(pid)])
    }

    /// Returns an iterator over every tuple in the file.
    ///
    /// The iterator must be `open`ed before use and is restartable via
    /// `rewind`.
    pub fn iterator(&self, tid: TransactionId) -> HeapFileIterator<'_> {
        HeapFileIterator {
            file: self,
            tid,
            page_cursor: None,
            tuple_iter: None,
            num_pages: 0,
        }
    }
}

/// Iterator over all tuples of a heap file, page by page.
pub struct HeapFileIterator<'a> {
    file: &'a HeapFile,
    tid: TransactionId,
    page_cursor: Option<u32>,
    tuple_iter: Option<HeapPageIter>,
    num_pages: u32,
}

impl HeapFileIterator<'_> {
    /// Opens the iterator at page 0.
    ///
    /// An empty file opens successfully and yields nothing.
    pub fn open(&mut self) -> Result<()> {
        self.num_pages = self.file.num_pages()?;
        self.page_cursor = Some(0);
        self.tuple_iter = if self.num_pages > 0 {
            Some(self.page_iter(0)?)
        } else {
            None
        };
        Ok(())
    }

    /// Restarts the iterator from the first page.
    pub fn rewind(&mut self) -> Result<()> {
        self.close();
        self.open()
    }

    /// Closes the iterator; subsequent `next` calls yield nothing.
    pub fn close(&mut self) {
        self.page_cursor = None;
        self.tuple_iter = None;
    }

    /// Returns the next tuple, or `None` when exhausted or unopened.
    pub fn next(&mut self) -> Result<Option<Tuple>> {
        let Some(mut cursor) = self.page_cursor else {
            return Ok(None);
        };
        loop {
            if let Some(iter) = &mut self.tuple_iter {
                if let Some(t) = iter.next() {
                    return Ok(Some(t));
                }
            }
            cursor += 1;
            if cursor >= self.num_pages {
                return Ok(None);
            }
            self.page_cursor = Some(cursor);
            self.tuple_iter = Some(self.page_iter(cursor)?);
        }
    }

    fn page_iter(&self, page_no: u32) -> Result<HeapPageIter> {
        let pid = HeapPageId::new(self.file.table_id(), page_no);
        let page = self.file.fetch_page(self.tid, pid, Permissions::ReadOnly)?;
        Ok(page.iter())
    }
}
