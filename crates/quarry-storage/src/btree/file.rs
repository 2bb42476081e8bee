//! B+-tree index file: search, sorted insertion with page splits, deletion
//! with redistribution and merging, and the freed-page allocator.
//!
//! The file layout is a 9-byte root-pointer page followed by uniformly
//! sized pages: page `k >= 1` lives at byte offset `9 + (k-1) * PAGE_SIZE`.
//!
//! Every mutation runs against the buffer pool and threads a per-operation
//! dirty map of decoded pages: a page fetched read-write once is reused on
//! every later reference within the same mutation, and the whole set is
//! encoded back into the pool (marked dirty) when the operation completes.
//! Pages reference parents and siblings by id only; each hop re-fetches
//! through the pool so locking is honored.

use crate::btree::page::{BTreeHeaderPage, BTreePage, BTreeRootPtrPage};
use crate::btree::types::{BTreeEntry, IndexPredicate};
use crate::tuple::{Tuple, TupleDesc};
use parking_lot::Mutex;
use quarry_buffer::{BufferPool, Permissions, PAGE_SIZE, ROOT_PTR_PAGE_SIZE};
use quarry_common::{
    stable_table_id, BTreePageCategory, BTreePageId, Field, PageId, PredicateOp, QuarryError,
    Result, TransactionId,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

/// A decoded page shared within one mutation's dirty map.
type PageRef = Rc<RefCell<BTreePage>>;

/// Per-operation cache of pages fetched with write permission.
///
/// Local to each mutation, never shared between concurrent operations.
struct DirtyMap {
    pages: HashMap<BTreePageId, PageRef>,
}

impl DirtyMap {
    fn new() -> Self {
        Self {
            pages: HashMap::new(),
        }
    }

    fn get(&self, pid: &BTreePageId) -> Option<PageRef> {
        self.pages.get(pid).cloned()
    }

    fn insert(&mut self, pid: BTreePageId, page: PageRef) {
        self.pages.insert(pid, page);
    }

    fn remove(&mut self, pid: &BTreePageId) {
        self.pages.remove(pid);
    }
}

/// B+-tree file manager keyed on one field of its tuples.
pub struct BTreeFile {
    file: Mutex<File>,
    path: PathBuf,
    table_id: u32,
    desc: TupleDesc,
    key_field: usize,
    pool: Arc<BufferPool>,
}

impl BTreeFile {
    /// Opens (creating if absent) a B+-tree file at `path`, keyed on
    /// `key_field` of `desc`.
    pub fn open(
        path: &Path,
        key_field: usize,
        desc: TupleDesc,
        pool: Arc<BufferPool>,
    ) -> Result<Self> {
        if key_field >= desc.num_fields() {
            return Err(QuarryError::IllegalArgument(format!(
                "key field {} out of range for {}-field descriptor",
                key_field,
                desc.num_fields()
            )));
        }
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
            key_field,
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

    /// Returns the index of the field the tree is keyed on.
    pub fn key_field(&self) -> usize {
        self.key_field
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the buffer pool this file runs against.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Returns the number of uniform pages in the file (the root-pointer
    /// page not counted).
    pub fn num_pages(&self) -> Result<u32> {
        let file = self.file.lock();
        let len = file.metadata()?.len();
        Ok((len.saturating_sub(ROOT_PTR_PAGE_SIZE as u64) / PAGE_SIZE as u64) as u32)
    }

    // =====================================================================
    // Raw file I/O
    // =====================================================================

    fn offset_of(page_no: u32) -> u64 {
        if page_no == 0 {
            0
        } else {
            ROOT_PTR_PAGE_SIZE as u64 + (page_no as u64 - 1) * PAGE_SIZE as u64
        }
    }

    fn page_size_of(pid: BTreePageId) -> usize {
        if pid.category == BTreePageCategory::RootPtr {
            ROOT_PTR_PAGE_SIZE
        } else {
            PAGE_SIZE
        }
    }

    /// Reads a page's bytes from disk.
    fn read_page_bytes(&self, pid: BTreePageId) -> Result<Vec<u8>> {
        if pid.table_id != self.table_id {
            return Err(QuarryError::IllegalArgument(format!(
                "page {} does not belong to table {}",
                pid, self.table_id
            )));
        }
        let size = Self::page_size_of(pid);
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(Self::offset_of(pid.page_no)))?;
        let mut data = vec![0u8; size];
        let mut read = 0;
        while read < size {
            let n = file.read(&mut data[read..])?;
            if n == 0 {
                return Err(QuarryError::ShortRead {
                    expected: size,
                    actual: read,
                });
            }
            read += n;
        }
        Ok(data)
    }

    /// Writes raw page bytes at the offset of `page_no`.
    fn write_page_bytes(&self, page_no: u32, data: &[u8]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(Self::offset_of(page_no)))?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }

    /// Reads a page from disk into a typed page object.
    pub fn read_page(&self, pid: BTreePageId) -> Result<BTreePage> {
        let bytes = self.read_page_bytes(pid)?;
        BTreePage::decode(pid, &bytes, &self.desc, self.key_field)
    }

    /// Writes a typed page to its offset in the file.
    pub fn write_page(&self, page: &BTreePage) -> Result<()> {
        self.write_page_bytes(page.id().page_no, &page.get_page_data())
    }

    /// Seeds an empty file with a root-pointer page and one zeroed page.
    ///
    /// The root id stays null until the first insert claims page 1 as the
    /// root leaf.
    fn seed_file_if_empty(&self) -> Result<()> {
        let mut file = self.file.lock();
        if file.metadata()?.len() == 0 {
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&BTreeRootPtrPage::create_empty_page_data())?;
            file.write_all(&vec![0u8; PAGE_SIZE])?;
            file.flush()?;
        }
        Ok(())
    }

    /// Appends one zeroed page at EOF, returning its page number.
    fn append_page(&self) -> Result<u32> {
        let mut file = self.file.lock();
        let len = file.metadata()?.len();
        file.seek(SeekFrom::Start(len))?;
        file.write_all(&vec![0u8; PAGE_SIZE])?;
        file.flush()?;
        let new_len = len + PAGE_SIZE as u64;
        Ok(((new_len - ROOT_PTR_PAGE_SIZE as u64) / PAGE_SIZE as u64) as u32)
    }

    /// Flushes this table's dirty pool pages to disk.
    pub fn flush(&self) -> Result<usize> {
        let mut flushed = 0;
        for pid in self.pool.dirty_pages() {
            if pid.table_id() != self.table_id {
                continue;
            }
            if let PageId::BTree(bpid) = pid {
                if self
                    .pool
                    .flush_page_with(pid, |_, data| self.write_page_bytes(bpid.page_no, data))?
                {
                    flushed += 1;
                }
            }
        }
        Ok(flushed)
    }

    // =====================================================================
    // Page fetching
    // =====================================================================

    /// Fetches a page, consulting the operation's dirty map first.
    ///
    /// Pages fetched read-write are added to the dirty map so later
    /// references within the mutation observe in-progress changes.
    fn get_page(
        &self,
        tid: TransactionId,
        dirty: &mut DirtyMap,
        pid: BTreePageId,
        perm: Permissions,
    ) -> Result<PageRef> {
        if let Some(page) = dirty.get(&pid) {
            return Ok(page);
        }
        self.pool.acquire(tid, PageId::BTree(pid), perm)?;
        let bytes = match self.pool.lookup(PageId::BTree(pid)) {
            Some(bytes) => bytes,
            None => {
                let bytes = self.read_page_bytes(pid)?;
                self.pool.install(PageId::BTree(pid), bytes.clone())?;
                bytes
            }
        };
        let page = Rc::new(RefCell::new(BTreePage::decode(
            pid,
            &bytes,
            &self.desc,
            self.key_field,
        )?));
        if perm == Permissions::ReadWrite {
            dirty.insert(pid, page.clone());
        }
        Ok(page)
    }

    /// Returns a read-only decoded copy of a page, pool-first.
    ///
    /// Intended for inspection and invariant checks outside mutations.
    pub fn inspect_page(&self, tid: TransactionId, pid: BTreePageId) -> Result<BTreePage> {
        let mut scratch = DirtyMap::new();
        let page = self.get_page(tid, &mut scratch, pid, Permissions::ReadOnly)?;
        let data = page.borrow().get_page_data();
        BTreePage::decode(pid, &data, &self.desc, self.key_field)
    }

    /// Returns the current root page id, if the tree is non-empty.
    pub fn root_id(&self, tid: TransactionId) -> Result<Option<BTreePageId>> {
        let mut scratch = DirtyMap::new();
        let root_ptr = self.get_root_ptr_page(tid, &mut scratch)?;
        let id = root_ptr.borrow().as_root_ptr()?.root_id();
        Ok(id)
    }

    /// Fetches the root-pointer page read-only, seeding the file first if
    /// it is brand new.
    fn get_root_ptr_page(&self, tid: TransactionId, dirty: &mut DirtyMap) -> Result<PageRef> {
        self.seed_file_if_empty()?;
        self.get_page(
            tid,
            dirty,
            BTreePageId::root_ptr(self.table_id),
            Permissions::ReadOnly,
        )
    }

    /// Encodes every dirty-map page back into the pool and returns the
    /// dirtied page set.
    fn flush_dirty(&self, tid: TransactionId, dirty: &DirtyMap) -> Vec<PageId> {
        let mut out = Vec::with_capacity(dirty.pages.len());
        for (pid, page) in &dirty.pages {
            let mut page = page.borrow_mut();
            page.mark_dirty(true, tid);
            self.pool
                .write_back(PageId::BTree(*pid), page.get_page_data(), tid);
            out.push(PageId::BTree(*pid));
        }
        out
    }

    // =====================================================================
    // Search
    // =====================================================================

    /// Descends to the left-most leaf that may contain `key`, locking the
    /// path read-only and the leaf itself with `perm`.
    ///
    /// A `None` key descends the left spine, for full scans.
    fn find_leaf_page(
        &self,
        tid: TransactionId,
        dirty: &mut DirtyMap,
        pid: BTreePageId,
        perm: Permissions,
        key: Option<&Field>,
    ) -> Result<PageRef> {
        match pid.category {
            BTreePageCategory::Leaf => self.get_page(tid, dirty, pid, perm),
            BTreePageCategory::Internal => {
                let page = self.get_page(tid, dirty, pid, Permissions::ReadOnly)?;
                let next = {
                    let page = page.borrow();
                    let internal = page.as_internal()?;
                    let entries = internal.entries();
                    if entries.is_empty() {
                        return Err(QuarryError::MalformedTree(
                            "internal page has no entries".to_string(),
                        ));
                    }
                    match key {
                        None => entries[0].left_child(),
                        Some(k) => {
                            let mut idx = 0;
                            while idx + 1 < entries.len()
                                && k.compare(PredicateOp::GreaterThan, entries[idx].key())
                            {
                                idx += 1;
                            }
                            let e = &entries[idx];
                            if k.compare(PredicateOp::LessThanOrEq, e.key()) {
                                e.left_child()
                            } else {
                                e.right_child()
                            }
                        }
                    }
                };
                self.find_leaf_page(tid, dirty, next, perm, key)
            }
            other => Err(QuarryError::MalformedTree(format!(
                "cannot descend through a {} page",
                other
            ))),
        }
    }

    // =====================================================================
    // Insertion path
    // =====================================================================

    /// Inserts a tuple, splitting pages as needed to make room.
    ///
    /// Returns the set of pages dirtied by the operation.
    pub fn insert_tuple(&self, tid: TransactionId, t: Tuple) -> Result<Vec<PageId>> {
        let mut dirty = DirtyMap::new();

        let root_ptr = self.get_root_ptr_page(tid, &mut dirty)?;
        let root_id = root_ptr.borrow().as_root_ptr()?.root_id();

        let root_id = match root_id {
            Some(id) => id,
            None => {
                // Fresh tree: the page seeded after the root pointer
                // becomes the root leaf.
                let id =
                    BTreePageId::new(self.table_id, self.num_pages()?, BTreePageCategory::Leaf);
                let root_ptr = self.get_page(
                    tid,
                    &mut dirty,
                    BTreePageId::root_ptr(self.table_id),
                    Permissions::ReadWrite,
                )?;
                root_ptr.borrow_mut().as_root_ptr_mut()?.set_root_id(Some(id))?;
                id
            }
        };

        let key = t.field(self.key_field).clone();
        let mut leaf =
            self.find_leaf_page(tid, &mut dirty, root_id, Permissions::ReadWrite, Some(&key))?;
        let full = leaf.borrow().as_leaf()?.num_empty_slots() == 0;
        if full {
            leaf = self.split_leaf_page(tid, &mut dirty, leaf, &key)?;
        }
        leaf.borrow_mut().as_leaf_mut()?.insert_tuple(t)?;

        Ok(self.flush_dirty(tid, &dirty))
    }

    /// Splits a full leaf, copying the median key up into the parent.
    ///
    /// The first key of the new right page is duplicated into the parent
    /// entry; sibling and parent pointers are rewired. Returns the half
    /// into which a tuple keyed `field` belongs.
    fn split_leaf_page(
        &self,
        tid: TransactionId,
        dirty: &mut DirtyMap,
        page: PageRef,
        field: &Field,
    ) -> Result<PageRef> {
        let right = self.get_empty_page(tid, dirty, BTreePageCategory::Leaf)?;

        // Move the upper half into the new right page.
        let to_move: Vec<Tuple> = {
            let page = page.borrow();
            let leaf = page.as_leaf()?;
            let count = (leaf.num_tuples() + 1) / 2;
            let mut v = leaf.reverse_tuples();
            v.truncate(count);
            v.reverse();
            v
        };
        {
            let mut src = page.borrow_mut();
            let src = src.as_leaf_mut()?;
            let mut dst = right.borrow_mut();
            let dst = dst.as_leaf_mut()?;
            for t in &to_move {
                src.delete_tuple(t)?;
                let mut moved = t.clone();
                moved.set_record_id(None);
                dst.insert_tuple(moved)?;
            }
        }
        let mid_key = to_move[0].field(self.key_field).clone();

        let (page_id, old_parent_id, old_right_id) = {
            let page = page.borrow();
            let leaf = page.as_leaf()?;
            (leaf.id(), leaf.parent_id(), leaf.right_sibling_id())
        };
        let parent = self.get_parent_with_empty_slots(tid, dirty, old_parent_id, &mid_key)?;
        let parent_id = parent.borrow().id();
        let right_id = right.borrow().id();

        {
            let mut r = right.borrow_mut();
            let r = r.as_leaf_mut()?;
            r.set_right_sibling_id(old_right_id);
            r.set_left_sibling_id(Some(page_id));
            r.set_parent_id(parent_id)?;
        }
        {
            let mut p = page.borrow_mut();
            let p = p.as_leaf_mut()?;
            p.set_right_sibling_id(Some(right_id));
            p.set_parent_id(parent_id)?;
        }
        if let Some(old_right) = old_right_id {
            let old_right = self.get_page(tid, dirty, old_right, Permissions::ReadWrite)?;
            old_right
                .borrow_mut()
                .as_leaf_mut()?
                .set_left_sibling_id(Some(right_id));
        }

        let mut entry = BTreeEntry::new(mid_key.clone(), page_id, right_id);
        parent.borrow_mut().as_internal_mut()?.insert_entry(&mut entry)?;

        if field.compare(PredicateOp::GreaterThan, &mid_key) {
            Ok(right)
        } else {
            Ok(page)
        }
    }

    /// Splits a full internal page, pushing the median entry up.
    ///
    /// The median is removed from both halves; its children become the two
    /// pages resulting from the split, and every moved entry's subtree is
    /// re-parented onto the new right page. Returns the half into which an
    /// entry keyed `field` belongs.
    fn split_internal_page(
        &self,
        tid: TransactionId,
        dirty: &mut DirtyMap,
        page: PageRef,
        field: &Field,
    ) -> Result<PageRef> {
        let right = self.get_empty_page(tid, dirty, BTreePageCategory::Internal)?;

        // The lowest of the moved entries is the median to push up.
        let to_move: Vec<BTreeEntry> = {
            let page = page.borrow();
            let internal = page.as_internal()?;
            let count = (internal.num_entries() + 1) / 2;
            let mut v = internal.reverse_entries();
            v.truncate(count);
            v.reverse();
            v
        };
        let mut mid = to_move[0].clone();

        for (i, e) in to_move.iter().enumerate().rev() {
            page.borrow_mut()
                .as_internal_mut()?
                .delete_key_and_right_child(e)?;
            if i > 0 {
                let mut moved = e.clone();
                moved.set_record_id(None);
                right.borrow_mut().as_internal_mut()?.insert_entry(&mut moved)?;
            }
        }
        self.update_parent_pointers(tid, dirty, &right)?;

        let (page_id, old_parent_id) = {
            let page = page.borrow();
            let internal = page.as_internal()?;
            (internal.id(), internal.parent_id())
        };
        let right_id = right.borrow().id();

        mid.set_left_child(page_id);
        mid.set_right_child(right_id);
        mid.set_record_id(None);

        let parent = self.get_parent_with_empty_slots(tid, dirty, old_parent_id, mid.key())?;
        let parent_id = parent.borrow().id();
        parent.borrow_mut().as_internal_mut()?.insert_entry(&mut mid)?;

        page.borrow_mut().set_parent_id(parent_id)?;
        right.borrow_mut().set_parent_id(parent_id)?;

        if field.compare(PredicateOp::GreaterThan, mid.key()) {
            Ok(right)
        } else {
            Ok(page)
        }
    }

    /// Returns a parent page guaranteed to have at least one empty slot.
    ///
    /// Creates a new root when the page being split is the current root;
    /// otherwise locks the parent and splits it first if full, descending
    /// into the half where `field` belongs.
    fn get_parent_with_empty_slots(
        &self,
        tid: TransactionId,
        dirty: &mut DirtyMap,
        parent_id: BTreePageId,
        field: &Field,
    ) -> Result<PageRef> {
        let parent = if parent_id.category == BTreePageCategory::RootPtr {
            let parent = self.get_empty_page(tid, dirty, BTreePageCategory::Internal)?;
            let new_root_id = parent.borrow().id();
            let root_ptr = self.get_page(
                tid,
                dirty,
                BTreePageId::root_ptr(self.table_id),
                Permissions::ReadWrite,
            )?;
            root_ptr
                .borrow_mut()
                .as_root_ptr_mut()?
                .set_root_id(Some(new_root_id))?;
            parent
        } else {
            self.get_page(tid, dirty, parent_id, Permissions::ReadWrite)?
        };

        let full = parent.borrow().as_internal()?.num_empty_slots() == 0;
        if full {
            return self.split_internal_page(tid, dirty, parent, field);
        }
        Ok(parent)
    }

    /// Points one child's parent pointer at `pid` if it does not already.
    fn update_parent_pointer(
        &self,
        tid: TransactionId,
        dirty: &mut DirtyMap,
        pid: BTreePageId,
        child: BTreePageId,
    ) -> Result<()> {
        let current = {
            let page = self.get_page(tid, dirty, child, Permissions::ReadOnly)?;
            let current = page.borrow().parent_id()?;
            current
        };
        if current != pid {
            let page = self.get_page(tid, dirty, child, Permissions::ReadWrite)?;
            page.borrow_mut().set_parent_id(pid)?;
        }
        Ok(())
    }

    /// Points every child of an internal page back at it.
    fn update_parent_pointers(
        &self,
        tid: TransactionId,
        dirty: &mut DirtyMap,
        page: &PageRef,
    ) -> Result<()> {
        let (pid, entries) = {
            let page = page.borrow();
            let internal = page.as_internal()?;
            (internal.id(), internal.entries())
        };
        for e in &entries {
            self.update_parent_pointer(tid, dirty, pid, e.left_child())?;
        }
        if let Some(last) = entries.last() {
            self.update_parent_pointer(tid, dirty, pid, last.right_child())?;
        }
        Ok(())
    }

    // =====================================================================
    // Deletion path
    // =====================================================================

    /// Deletes a tuple, rebalancing pages that fall below minimum
    /// occupancy.
    ///
    /// Returns the set of pages dirtied by the operation.
    pub fn delete_tuple(&self, tid: TransactionId, t: &Tuple) -> Result<Vec<PageId>> {
        let rid = t.record_id().ok_or(QuarryError::TupleNotOnPage)?;
        let PageId::BTree(tuple_pid) = rid.page_id else {
            return Err(QuarryError::TupleNotOnPage);
        };
        if tuple_pid.table_id != self.table_id {
            return Err(QuarryError::TupleNotOnPage);
        }
        let pid = BTreePageId::new(self.table_id, tuple_pid.page_no, BTreePageCategory::Leaf);

        let mut dirty = DirtyMap::new();
        let page = self.get_page(tid, &mut dirty, pid, Permissions::ReadWrite)?;
        page.borrow_mut().as_leaf_mut()?.delete_tuple(t)?;

        let underfull = {
            let page = page.borrow();
            let leaf = page.as_leaf()?;
            let max = leaf.max_tuples();
            leaf.num_empty_slots() > max - max / 2
        };
        if underfull {
            self.handle_min_occupancy_page(tid, &mut dirty, page)?;
        }

        Ok(self.flush_dirty(tid, &dirty))
    }

    /// Rebalances a page that dropped below minimum occupancy, stealing
    /// from or merging with a sibling found through the parent.
    fn handle_min_occupancy_page(
        &self,
        tid: TransactionId,
        dirty: &mut DirtyMap,
        page: PageRef,
    ) -> Result<()> {
        let (page_id, parent_id) = {
            let page = page.borrow();
            (page.id(), page.parent_id()?)
        };
        if parent_id.category == BTreePageCategory::RootPtr {
            // The root has no minimum occupancy.
            return Ok(());
        }

        let parent = self.get_page(tid, dirty, parent_id, Permissions::ReadWrite)?;
        let (left_entry, right_entry) = {
            let parent = parent.borrow();
            let internal = parent.as_internal()?;
            let mut left_entry = None;
            let mut right_entry = None;
            for e in internal.entries() {
                if e.left_child() == page_id {
                    right_entry = Some(e);
                    break;
                } else if e.right_child() == page_id {
                    left_entry = Some(e);
                }
            }
            (left_entry, right_entry)
        };

        match page_id.category {
            BTreePageCategory::Leaf => self
                .handle_min_occupancy_leaf_page(tid, dirty, page, parent, left_entry, right_entry),
            BTreePageCategory::Internal => self.handle_min_occupancy_internal_page(
                tid,
                dirty,
                page,
                parent,
                left_entry,
                right_entry,
            ),
            other => Err(QuarryError::MalformedTree(format!(
                "{} page cannot underflow",
                other
            ))),
        }
    }

    /// Leaf variant: prefer the left sibling; merge when the chosen
    /// sibling is itself at minimum occupancy, steal otherwise.
    fn handle_min_occupancy_leaf_page(
        &self,
        tid: TransactionId,
        dirty: &mut DirtyMap,
        page: PageRef,
        parent: PageRef,
        left_entry: Option<BTreeEntry>,
        right_entry: Option<BTreeEntry>,
    ) -> Result<()> {
        let max_empty = {
            let page = page.borrow();
            let leaf = page.as_leaf()?;
            leaf.max_tuples() - leaf.max_tuples() / 2
        };

        if let Some(mut entry) = left_entry {
            let sibling = self.get_page(tid, dirty, entry.left_child(), Permissions::ReadWrite)?;
            let at_minimum = sibling.borrow().as_leaf()?.num_empty_slots() >= max_empty;
            if at_minimum {
                self.merge_leaf_pages(tid, dirty, sibling, page, parent, &entry)
            } else {
                self.steal_from_leaf_page(&page, &sibling, &parent, &mut entry, false)
            }
        } else if let Some(mut entry) = right_entry {
            let sibling = self.get_page(tid, dirty, entry.right_child(), Permissions::ReadWrite)?;
            let at_minimum = sibling.borrow().as_leaf()?.num_empty_slots() >= max_empty;
            if at_minimum {
                self.merge_leaf_pages(tid, dirty, page, sibling, parent, &entry)
            } else {
                self.steal_from_leaf_page(&page, &sibling, &parent, &mut entry, true)
            }
        } else {
            Ok(())
        }
    }

    /// Evens out tuples between a leaf and an over-full sibling.
    ///
    /// Tuples move from the sibling's inner edge; the parent separator is
    /// rewritten to the first key of whichever page ends up on the right.
    fn steal_from_leaf_page(
        &self,
        page: &PageRef,
        sibling: &PageRef,
        parent: &PageRef,
        entry: &mut BTreeEntry,
        is_right_sibling: bool,
    ) -> Result<()> {
        let to_move: Vec<Tuple> = {
            let sib = sibling.borrow();
            let sib = sib.as_leaf()?;
            let page = page.borrow();
            let page = page.as_leaf()?;
            let count = sib.num_tuples().saturating_sub(page.num_tuples()) / 2;
            let mut v = if is_right_sibling {
                sib.tuples()
            } else {
                sib.reverse_tuples()
            };
            v.truncate(count);
            v
        };

        {
            let mut sib = sibling.borrow_mut();
            let sib = sib.as_leaf_mut()?;
            let mut page = page.borrow_mut();
            let page = page.as_leaf_mut()?;
            for t in &to_move {
                sib.delete_tuple(t)?;
                let mut moved = t.clone();
                moved.set_record_id(None);
                page.insert_tuple(moved)?;
            }
        }

        // The right-hand page's first key becomes the new separator.
        let rhs = if is_right_sibling { sibling } else { page };
        let first = {
            let rhs = rhs.borrow();
            rhs.as_leaf()?.tuples().into_iter().next()
        };
        if let Some(first) = first {
            entry.set_key(first.field(self.key_field).clone());
            parent.borrow_mut().as_internal_mut()?.update_entry(entry)?;
        }
        Ok(())
    }

    /// Merges a right leaf into its left sibling, freeing the right page
    /// and deleting the separator from the parent.
    fn merge_leaf_pages(
        &self,
        tid: TransactionId,
        dirty: &mut DirtyMap,
        left: PageRef,
        right: PageRef,
        parent: PageRef,
        entry: &BTreeEntry,
    ) -> Result<()> {
        let to_move = {
            let right = right.borrow();
            right.as_leaf()?.tuples()
        };
        {
            let mut src = right.borrow_mut();
            let src = src.as_leaf_mut()?;
            let mut dst = left.borrow_mut();
            let dst = dst.as_leaf_mut()?;
            for t in &to_move {
                src.delete_tuple(t)?;
                let mut moved = t.clone();
                moved.set_record_id(None);
                dst.insert_tuple(moved)?;
            }
        }

        let (left_id, right_id, beyond) = {
            let left_page = left.borrow();
            let right_page = right.borrow();
            (
                left_page.id(),
                right_page.id(),
                right_page.as_leaf()?.right_sibling_id(),
            )
        };
        left.borrow_mut().as_leaf_mut()?.set_right_sibling_id(beyond);
        if let Some(beyond) = beyond {
            let beyond = self.get_page(tid, dirty, beyond, Permissions::ReadWrite)?;
            beyond
                .borrow_mut()
                .as_leaf_mut()?
                .set_left_sibling_id(Some(left_id));
        }

        self.set_empty_page(tid, dirty, right_id.page_no)?;
        self.delete_parent_entry(tid, dirty, &left, &parent, entry)
    }

    /// Internal variant: prefer the left sibling; merge when the chosen
    /// sibling is itself at minimum occupancy, steal otherwise.
    fn handle_min_occupancy_internal_page(
        &self,
        tid: TransactionId,
        dirty: &mut DirtyMap,
        page: PageRef,
        parent: PageRef,
        left_entry: Option<BTreeEntry>,
        right_entry: Option<BTreeEntry>,
    ) -> Result<()> {
        let max_empty = {
            let page = page.borrow();
            let internal = page.as_internal()?;
            internal.max_entries() - internal.max_entries() / 2
        };

        if let Some(entry) = left_entry {
            let sibling = self.get_page(tid, dirty, entry.left_child(), Permissions::ReadWrite)?;
            let at_minimum = sibling.borrow().as_internal()?.num_empty_slots() >= max_empty;
            if at_minimum {
                self.merge_internal_pages(tid, dirty, sibling, page, parent, &entry)
            } else {
                self.steal_from_left_internal_page(tid, dirty, page, sibling, parent, entry)
            }
        } else if let Some(entry) = right_entry {
            let sibling = self.get_page(tid, dirty, entry.right_child(), Permissions::ReadWrite)?;
            let at_minimum = sibling.borrow().as_internal()?.num_empty_slots() >= max_empty;
            if at_minimum {
                self.merge_internal_pages(tid, dirty, page, sibling, parent, &entry)
            } else {
                self.steal_from_right_internal_page(tid, dirty, page, sibling, parent, entry)
            }
        } else {
            Ok(())
        }
    }

    /// Evens out entries with the left sibling, rotating keys through the
    /// parent: the parent separator is pulled down into `page` and the
    /// sibling's last key is pushed up to replace it, one moved entry at a
    /// time. Moved subtrees are re-parented onto `page`.
    fn steal_from_left_internal_page(
        &self,
        tid: TransactionId,
        dirty: &mut DirtyMap,
        page: PageRef,
        sibling: PageRef,
        parent: PageRef,
        left_entry: BTreeEntry,
    ) -> Result<()> {
        let page_id = page.borrow().id();
        let to_move: Vec<BTreeEntry> = {
            let sib = sibling.borrow();
            let sib = sib.as_internal()?;
            let page_ref = page.borrow();
            let page_ref = page_ref.as_internal()?;
            let count = sib.num_entries().saturating_sub(page_ref.num_entries()) / 2;
            let mut v = sib.reverse_entries();
            v.truncate(count);
            v
        };

        let mut separator = left_entry;
        for e in &to_move {
            sibling
                .borrow_mut()
                .as_internal_mut()?
                .delete_key_and_right_child(e)?;
            self.update_parent_pointer(tid, dirty, page_id, e.right_child())?;
            let moved_child = e.right_child();

            // The moved key replaces the parent separator in place.
            let mut replacement = e.clone();
            replacement.set_left_child(separator.left_child());
            replacement.set_right_child(separator.right_child());
            replacement.set_record_id(separator.record_id());
            parent
                .borrow_mut()
                .as_internal_mut()?
                .update_entry(&replacement)?;

            // The old separator drops into the page's front.
            let first_left = {
                let page_ref = page.borrow();
                let page_ref = page_ref.as_internal()?;
                page_ref
                    .entries()
                    .first()
                    .ok_or_else(|| {
                        QuarryError::MalformedTree("underfull internal page is empty".to_string())
                    })?
                    .left_child()
            };
            separator.set_left_child(moved_child);
            separator.set_right_child(first_left);
            separator.set_record_id(None);
            page.borrow_mut()
                .as_internal_mut()?
                .insert_entry(&mut separator)?;

            separator = replacement;
        }
        Ok(())
    }

    /// Mirror image of [`Self::steal_from_left_internal_page`] for a right
    /// sibling: the separator is pulled down onto the page's right edge
    /// and the sibling's first key is pushed up.
    fn steal_from_right_internal_page(
        &self,
        tid: TransactionId,
        dirty: &mut DirtyMap,
        page: PageRef,
        sibling: PageRef,
        parent: PageRef,
        right_entry: BTreeEntry,
    ) -> Result<()> {
        let page_id = page.borrow().id();
        let to_move: Vec<BTreeEntry> = {
            let sib = sibling.borrow();
            let sib = sib.as_internal()?;
            let page_ref = page.borrow();
            let page_ref = page_ref.as_internal()?;
            let count = sib.num_entries().saturating_sub(page_ref.num_entries()) / 2;
            let mut v = sib.entries();
            v.truncate(count);
            v
        };

        let mut separator = right_entry;
        for e in &to_move {
            sibling
                .borrow_mut()
                .as_internal_mut()?
                .delete_key_and_left_child(e)?;
            self.update_parent_pointer(tid, dirty, page_id, e.left_child())?;
            let moved_child = e.left_child();

            let mut replacement = e.clone();
            replacement.set_left_child(separator.left_child());
            replacement.set_right_child(separator.right_child());
            replacement.set_record_id(separator.record_id());
            parent
                .borrow_mut()
                .as_internal_mut()?
                .update_entry(&replacement)?;

            let last_right = {
                let page_ref = page.borrow();
                let page_ref = page_ref.as_internal()?;
                page_ref
                    .reverse_entries()
                    .first()
                    .ok_or_else(|| {
                        QuarryError::MalformedTree("underfull internal page is empty".to_string())
                    })?
                    .right_child()
            };
            separator.set_left_child(last_right);
            separator.set_right_child(moved_child);
            separator.set_record_id(None);
            page.borrow_mut()
                .as_internal_mut()?
                .insert_entry(&mut separator)?;

            separator = replacement;
        }
        Ok(())
    }

    /// Merges a right internal page into its left sibling, pulling the
    /// parent separator down between the halves, freeing the right page,
    /// and deleting the separator from the parent.
    fn merge_internal_pages(
        &self,
        tid: TransactionId,
        dirty: &mut DirtyMap,
        left: PageRef,
        right: PageRef,
        parent: PageRef,
        entry: &BTreeEntry,
    ) -> Result<()> {
        let left_id = left.borrow().id();
        let right_id = right.borrow().id();

        // Pull the separator down between the two halves.
        let mut pulled = {
            let left_page = left.borrow();
            let right_page = right.borrow();
            let last_left = left_page
                .as_internal()?
                .reverse_entries()
                .into_iter()
                .next()
                .ok_or_else(|| {
                    QuarryError::MalformedTree("merging an empty internal page".to_string())
                })?;
            let first_right = right_page
                .as_internal()?
                .entries()
                .into_iter()
                .next()
                .ok_or_else(|| {
                    QuarryError::MalformedTree("merging an empty internal page".to_string())
                })?;
            BTreeEntry::new(
                entry.key().clone(),
                last_left.right_child(),
                first_right.left_child(),
            )
        };
        left.borrow_mut().as_internal_mut()?.insert_entry(&mut pulled)?;

        let to_move = {
            let right_page = right.borrow();
            right_page.as_internal()?.entries()
        };
        for e in &to_move {
            right
                .borrow_mut()
                .as_internal_mut()?
                .delete_key_and_left_child(e)?;
            self.update_parent_pointer(tid, dirty, left_id, e.left_child())?;
            self.update_parent_pointer(tid, dirty, left_id, e.right_child())?;
            let mut moved = e.clone();
            moved.set_record_id(None);
            left.borrow_mut().as_internal_mut()?.insert_entry(&mut moved)?;
        }

        self.set_empty_page(tid, dirty, right_id.page_no)?;
        self.delete_parent_entry(tid, dirty, &left, &parent, entry)
    }

    /// Deletes a separator (key and right child) from a parent.
    ///
    /// An emptied parent must be the root; the surviving child is promoted
    /// in its place and the old root freed. A parent merely below minimum
    /// occupancy rebalances recursively.
    fn delete_parent_entry(
        &self,
        tid: TransactionId,
        dirty: &mut DirtyMap,
        left_page: &PageRef,
        parent: &PageRef,
        entry: &BTreeEntry,
    ) -> Result<()> {
        parent
            .borrow_mut()
            .as_internal_mut()?
            .delete_key_and_right_child(entry)?;

        let (empty, max, parent_parent_id, parent_no) = {
            let parent = parent.borrow();
            let internal = parent.as_internal()?;
            (
                internal.num_empty_slots(),
                internal.max_entries(),
                internal.parent_id(),
                internal.id().page_no,
            )
        };

        if empty == max {
            // The last entry is gone; only the root may empty out.
            if parent_parent_id.category != BTreePageCategory::RootPtr {
                return Err(QuarryError::MalformedTree(
                    "attempting to delete a non-root internal page".to_string(),
                ));
            }
            let left_id = left_page.borrow().id();
            left_page.borrow_mut().set_parent_id(parent_parent_id)?;
            let root_ptr = self.get_page(tid, dirty, parent_parent_id, Permissions::ReadWrite)?;
            root_ptr
                .borrow_mut()
                .as_root_ptr_mut()?
                .set_root_id(Some(left_id))?;
            self.set_empty_page(tid, dirty, parent_no)?;
        } else if empty > max - max / 2 {
            self.handle_min_occupancy_page(tid, dirty, parent.clone())?;
        }
        Ok(())
    }

    // =====================================================================
    // Empty-page allocator
    // =====================================================================

    /// Returns the number of a free page, reusing freed pages recorded in
    /// the header chain before extending the file.
    fn get_empty_page_no(&self, tid: TransactionId, dirty: &mut DirtyMap) -> Result<u32> {
        let root_ptr = self.get_root_ptr_page(tid, dirty)?;
        let header_id = root_ptr.borrow().as_root_ptr()?.header_id();

        if let Some(first) = header_id {
            let mut hid = first;
            let mut count: u32 = 0;
            loop {
                let page = self.get_page(tid, dirty, hid, Permissions::ReadOnly)?;
                let (free_slot, next) = {
                    let page = page.borrow();
                    let header = page.as_header()?;
                    (header.get_empty_slot(), header.next_id())
                };
                if free_slot.is_some() {
                    let page = self.get_page(tid, dirty, hid, Permissions::ReadWrite)?;
                    let mut page = page.borrow_mut();
                    let header = page.as_header_mut()?;
                    let slot = header.get_empty_slot().ok_or_else(|| {
                        QuarryError::MalformedTree("header free slot vanished".to_string())
                    })?;
                    header.mark_slot_used(slot, true);
                    return Ok(count * BTreeHeaderPage::NUM_SLOTS as u32 + slot as u32);
                }
                match next {
                    Some(next) => {
                        hid = next;
                        count += 1;
                    }
                    None => break,
                }
            }
        }

        // No free slot anywhere: grow the file.
        self.append_page()
    }

    /// Allocates a clean page of the given category under write
    /// permission.
    ///
    /// The page number comes from the free list (or the end of the file);
    /// its on-disk region is zero-wiped and any stale cached copy, under
    /// any category, is evicted before the fresh fetch.
    fn get_empty_page(
        &self,
        tid: TransactionId,
        dirty: &mut DirtyMap,
        category: BTreePageCategory,
    ) -> Result<PageRef> {
        let page_no = self.get_empty_page_no(tid, dirty)?;
        let pid = BTreePageId::new(self.table_id, page_no, category);

        self.write_page_bytes(page_no, &vec![0u8; PAGE_SIZE])?;
        for stale_category in [
            BTreePageCategory::Header,
            BTreePageCategory::Internal,
            BTreePageCategory::Leaf,
        ] {
            let stale = BTreePageId::new(self.table_id, page_no, stale_category);
            self.pool.discard(PageId::BTree(stale));
            dirty.remove(&stale);
        }

        self.get_page(tid, dirty, pid, Permissions::ReadWrite)
    }

    /// Marks a page free, extending the header chain until a header page
    /// covers its number.
    fn set_empty_page(
        &self,
        tid: TransactionId,
        dirty: &mut DirtyMap,
        page_no: u32,
    ) -> Result<()> {
        let slots = BTreeHeaderPage::NUM_SLOTS as u32;
        let root_ptr = self.get_root_ptr_page(tid, dirty)?;
        let header_id = root_ptr.borrow().as_root_ptr()?.header_id();

        let mut hid = match header_id {
            Some(hid) => hid,
            None => {
                let root_ptr = self.get_page(
                    tid,
                    dirty,
                    BTreePageId::root_ptr(self.table_id),
                    Permissions::ReadWrite,
                )?;
                let header = self.get_empty_page(tid, dirty, BTreePageCategory::Header)?;
                let hid = header.borrow().id();
                header.borrow_mut().as_header_mut()?.init();
                root_ptr.borrow_mut().as_root_ptr_mut()?.set_header_id(Some(hid));
                hid
            }
        };

        let mut count: u32 = 0;
        while page_no >= (count + 1) * slots {
            let page = self.get_page(tid, dirty, hid, Permissions::ReadOnly)?;
            let next = page.borrow().as_header()?.next_id();
            match next {
                Some(next) => hid = next,
                None => {
                    let prev = self.get_page(tid, dirty, hid, Permissions::ReadWrite)?;
                    let header = self.get_empty_page(tid, dirty, BTreePageCategory::Header)?;
                    let new_id = header.borrow().id();
                    {
                        let mut header = header.borrow_mut();
                        let header = header.as_header_mut()?;
                        header.init();
                        header.set_prev_id(Some(hid));
                    }
                    prev.borrow_mut().as_header_mut()?.set_next_id(Some(new_id));
                    hid = new_id;
                }
            }
            count += 1;
        }

        let page = self.get_page(tid, dirty, hid, Permissions::ReadWrite)?;
        page.borrow_mut()
            .as_header_mut()?
            .mark_slot_used((page_no - count * slots) as usize, false);
        Ok(())
    }

    // =====================================================================
    // Iterators
    // =====================================================================

    /// Returns an iterator over every tuple in key order.
    pub fn iterator(&self, tid: TransactionId) -> BTreeFileIterator<'_> {
        BTreeFileIterator {
            file: self,
            tid,
            opened: false,
            tuples: Vec::new().into_iter(),
            next_leaf: None,
        }
    }

    /// Returns an iterator over tuples matching the predicate, exploiting
    /// key order where the operator allows.
    pub fn index_iterator(
        &self,
        tid: TransactionId,
        predicate: IndexPredicate,
    ) -> BTreeSearchIterator<'_> {
        BTreeSearchIterator {
            file: self,
            tid,
            predicate,
            opened: false,
            done: false,
            tuples: Vec::new().into_iter(),
            next_leaf: None,
        }
    }

    /// Loads a leaf page read-only and returns its tuples and right
    /// sibling, for the iterators.
    fn leaf_contents(
        &self,
        tid: TransactionId,
        pid: BTreePageId,
    ) -> Result<(Vec<Tuple>, Option<BTreePageId>)> {
        let mut scratch = DirtyMap::new();
        let page = self.get_page(tid, &mut scratch, pid, Permissions::ReadOnly)?;
        let page = page.borrow();
        let leaf = page.as_leaf()?;
        Ok((leaf.tuples(), leaf.right_sibling_id()))
    }

    /// Descends to the first leaf for an iterator's starting key.
    fn open_scan(
        &self,
        tid: TransactionId,
        key: Option<&Field>,
    ) -> Result<Option<(Vec<Tuple>, Option<BTreePageId>)>> {
        let mut scratch = DirtyMap::new();
        let root_ptr = self.get_root_ptr_page(tid, &mut scratch)?;
        let root_id = root_ptr.borrow().as_root_ptr()?.root_id();
        let Some(root_id) = root_id else {
            return Ok(None);
        };
        let leaf = self.find_leaf_page(tid, &mut scratch, root_id, Permissions::ReadOnly, key)?;
        let leaf = leaf.borrow();
        let leaf = leaf.as_leaf()?;
        Ok(Some((leaf.tuples(), leaf.right_sibling_id())))
    }
}

/// Forward scan over every tuple of a B+-tree file in key order.
pub struct BTreeFileIterator<'a> {
    file: &'a BTreeFile,
    tid: TransactionId,
    opened: bool,
    tuples: std::vec::IntoIter<Tuple>,
    next_leaf: Option<BTreePageId>,
}

impl BTreeFileIterator<'_> {
    /// Opens the iterator at the left-most leaf.
    pub fn open(&mut self) -> Result<()> {
        if let Some((tuples, next)) = self.file.open_scan(self.tid, None)? {
            self.tuples = tuples.into_iter();
            self.next_leaf = next;
        } else {
            self.tuples = Vec::new().into_iter();
            self.next_leaf = None;
        }
        self.opened = true;
        Ok(())
    }

    /// Restarts the iterator from the left-most leaf.
    pub fn rewind(&mut self) -> Result<()> {
        self.close();
        self.open()
    }

    /// Closes the iterator.
    pub fn close(&mut self) {
        self.opened = false;
        self.tuples = Vec::new().into_iter();
        self.next_leaf = None;
    }

    /// Returns the next tuple, following sibling pointers across leaves.
    pub fn next(&mut self) -> Result<Option<Tuple>> {
        if !self.opened {
            return Ok(None);
        }
        loop {
            if let Some(t) = self.tuples.next() {
                return Ok(Some(t));
            }
            let Some(next) = self.next_leaf else {
                return Ok(None);
            };
            let (tuples, next) = self.file.leaf_contents(self.tid, next)?;
            self.tuples = tuples.into_iter();
            self.next_leaf = next;
        }
    }
}

/// Predicate-driven scan over a B+-tree file.
///
/// Descends directly to the probe key for `=`, `>`, and `>=` predicates
/// and short-circuits once key order proves no further match can exist.
pub struct BTreeSearchIterator<'a> {
    file: &'a BTreeFile,
    tid: TransactionId,
    predicate: IndexPredicate,
    opened: bool,
    done: bool,
    tuples: std::vec::IntoIter<Tuple>,
    next_leaf: Option<BTreePageId>,
}

impl BTreeSearchIterator<'_> {
    /// Opens the iterator at the first leaf that may hold a match.
    pub fn open(&mut self) -> Result<()> {
        let probe = match self.predicate.op {
            PredicateOp::Equals | PredicateOp::GreaterThan | PredicateOp::GreaterThanOrEq => {
                Some(&self.predicate.operand)
            }
            _ => None,
        };
        if let Some((tuples, next)) = self.file.open_scan(self.tid, probe)? {
            self.tuples = tuples.into_iter();
            self.next_leaf = next;
        } else {
            self.tuples = Vec::new().into_iter();
            self.next_leaf = None;
        }
        self.opened = true;
        self.done = false;
        Ok(())
    }

    /// Restarts the iterator.
    pub fn rewind(&mut self) -> Result<()> {
        self.close();
        self.open()
    }

    /// Closes the iterator.
    pub fn close(&mut self) {
        self.opened = false;
        self.done = false;
        self.tuples = Vec::new().into_iter();
        self.next_leaf = None;
    }

    /// Returns the next tuple satisfying the predicate.
    pub fn next(&mut self) -> Result<Option<Tuple>> {
        if !self.opened || self.done {
            return Ok(None);
        }
        loop {
            while let Some(t) = self.tuples.next() {
                let key = t.field(self.file.key_field());
                if self.predicate.matches(key) {
                    return Ok(Some(t));
                }
                match self.predicate.op {
                    // Keys only grow; nothing past this point can match.
                    PredicateOp::LessThan | PredicateOp::LessThanOrEq => {
                        self.done = true;
                        return Ok(None);
                    }
                    PredicateOp::Equals
                        if key.compare(PredicateOp::GreaterThan, &self.predicate.operand) =>
                    {
                        self.done = true;
                        return Ok(None);
                    }
                    _ => {}
                }
            }
            let Some(next) = self.next_leaf else {
                return Ok(None);
            };
            let (tuples, next) = self.file.leaf_contents(self.tid, next)?;
            self.tuples = tuples.into_iter();
            self.next_leaf = next;
        }
    }
}
