//! B+-tree page implementations: root-pointer, header, internal, and leaf
//! pages, plus the tagged union the file layer decodes into.
//!
//! Internal and leaf pages share the heap page's bitmap-plus-fixed-slots
//! discipline; empty slots keep their full record width so slot offsets
//! never move. Page number fields encode "none" (or "the root-pointer
//! page", for parents) as 0.

use crate::btree::types::BTreeEntry;
use crate::tuple::{RecordId, Tuple, TupleDesc};
use bytes::{Buf, BufMut};
use quarry_buffer::{PAGE_SIZE, ROOT_PTR_PAGE_SIZE};
use quarry_common::{
    clear_slot, set_slot, slot_is_set, BTreePageCategory, BTreePageId, Field, FieldType, PageId,
    QuarryError, Result, TransactionId,
};

/// Reads a page-number field where 0 means "none".
fn get_page_no(buf: &mut impl Buf) -> Option<u32> {
    match buf.get_u32_le() {
        0 => None,
        n => Some(n),
    }
}

/// Writes a page-number field where 0 means "none".
fn put_page_no(buf: &mut impl BufMut, no: Option<u32>) {
    buf.put_u32_le(no.unwrap_or(0));
}

// =========================================================================
// Root-pointer page
// =========================================================================

/// The fixed-size page at file offset 0 holding the root page id and the
/// head of the header-page chain.
///
/// Layout (9 bytes): `rootPageNo u32 | rootCategory u8 | headerPageNo u32`.
pub struct BTreeRootPtrPage {
    table_id: u32,
    root: Option<(u32, BTreePageCategory)>,
    header: Option<u32>,
    dirty: Option<TransactionId>,
}

impl BTreeRootPtrPage {
    /// Returns a zeroed buffer representing an empty root-pointer page.
    pub fn create_empty_page_data() -> Vec<u8> {
        vec![0u8; ROOT_PTR_PAGE_SIZE]
    }

    /// Decodes a root-pointer page.
    pub fn new(pid: BTreePageId, data: &[u8]) -> Result<Self> {
        if data.len() != ROOT_PTR_PAGE_SIZE {
            return Err(QuarryError::ShortRead {
                expected: ROOT_PTR_PAGE_SIZE,
                actual: data.len(),
            });
        }
        let mut buf = data;
        let root_no = get_page_no(&mut buf);
        let category = buf.get_u8();
        let header = get_page_no(&mut buf);

        let root = match root_no {
            None => None,
            Some(no) => {
                let cat = BTreePageCategory::from_byte(category).ok_or_else(|| {
                    QuarryError::IllegalArgument(format!("bad root category tag {}", category))
                })?;
                Some((no, cat))
            }
        };

        Ok(Self {
            table_id: pid.table_id,
            root,
            header,
            dirty: None,
        })
    }

    /// Returns this page's id.
    pub fn id(&self) -> BTreePageId {
        BTreePageId::root_ptr(self.table_id)
    }

    /// Re-encodes this page to its fixed size.
    pub fn get_page_data(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ROOT_PTR_PAGE_SIZE);
        put_page_no(&mut buf, self.root.map(|(no, _)| no));
        buf.put_u8(self.root.map(|(_, cat)| cat as u8).unwrap_or(0));
        put_page_no(&mut buf, self.header);
        buf
    }

    /// Returns the root page id, or `None` for an empty tree.
    pub fn root_id(&self) -> Option<BTreePageId> {
        self.root
            .map(|(no, cat)| BTreePageId::new(self.table_id, no, cat))
    }

    /// Points the tree at a new root.
    pub fn set_root_id(&mut self, root: Option<BTreePageId>) -> Result<()> {
        match root {
            None => self.root = None,
            Some(pid) => {
                if !matches!(
                    pid.category,
                    BTreePageCategory::Leaf | BTreePageCategory::Internal
                ) {
                    return Err(QuarryError::IllegalArgument(format!(
                        "{} page cannot be a root",
                        pid.category
                    )));
                }
                self.root = Some((pid.page_no, pid.category));
            }
        }
        Ok(())
    }

    /// Returns the first header page id, or `None` if no pages were freed.
    pub fn header_id(&self) -> Option<BTreePageId> {
        self.header
            .map(|no| BTreePageId::new(self.table_id, no, BTreePageCategory::Header))
    }

    /// Points the header chain at a new first page.
    pub fn set_header_id(&mut self, header: Option<BTreePageId>) {
        self.header = header.map(|pid| pid.page_no);
    }

    /// Marks this page dirty or clean.
    pub fn mark_dirty(&mut self, dirty: bool, tid: TransactionId) {
        self.dirty = if dirty { Some(tid) } else { None };
    }

    /// Returns the dirtying transaction, if dirty.
    pub fn is_dirty(&self) -> Option<TransactionId> {
        self.dirty
    }
}

// =========================================================================
// Header page
// =========================================================================

/// A free-page bitmap page. Bit `k` = 1 means the covered page number is
/// allocated; freshly initialized header pages have every bit set.
///
/// Layout: `prevHeaderPageNo u32 | nextHeaderPageNo u32 | bitmap`.
pub struct BTreeHeaderPage {
    pid: BTreePageId,
    prev: Option<u32>,
    next: Option<u32>,
    bitmap: Vec<u8>,
    dirty: Option<TransactionId>,
}

impl BTreeHeaderPage {
    /// Number of page-number slots one header page covers.
    pub const NUM_SLOTS: usize = (PAGE_SIZE - 8) * 8;

    /// Decodes a header page.
    pub fn new(pid: BTreePageId, data: &[u8]) -> Result<Self> {
        if data.len() != PAGE_SIZE {
            return Err(QuarryError::ShortRead {
                expected: PAGE_SIZE,
                actual: data.len(),
            });
        }
        let mut buf = data;
        let prev = get_page_no(&mut buf);
        let next = get_page_no(&mut buf);
        let mut bitmap = vec![0u8; PAGE_SIZE - 8];
        buf.copy_to_slice(&mut bitmap);
        Ok(Self {
            pid,
            prev,
            next,
            bitmap,
            dirty: None,
        })
    }

    /// Returns this page's id.
    pub fn id(&self) -> BTreePageId {
        self.pid
    }

    /// Re-encodes this page.
    pub fn get_page_data(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PAGE_SIZE);
        put_page_no(&mut buf, self.prev);
        put_page_no(&mut buf, self.next);
        buf.extend_from_slice(&self.bitmap);
        buf
    }

    /// Marks every covered page allocated.
    ///
    /// Header pages are created lazily when a page is freed, at which point
    /// everything they cover is in use; bits are cleared as pages free up.
    pub fn init(&mut self) {
        self.bitmap.fill(0xFF);
    }

    /// Returns the previous header page id.
    pub fn prev_id(&self) -> Option<BTreePageId> {
        self.prev
            .map(|no| BTreePageId::new(self.pid.table_id, no, BTreePageCategory::Header))
    }

    /// Sets the previous header page id.
    pub fn set_prev_id(&mut self, prev: Option<BTreePageId>) {
        self.prev = prev.map(|pid| pid.page_no);
    }

    /// Returns the next header page id.
    pub fn next_id(&self) -> Option<BTreePageId> {
        self.next
            .map(|no| BTreePageId::new(self.pid.table_id, no, BTreePageCategory::Header))
    }

    /// Sets the next header page id.
    pub fn set_next_id(&mut self, next: Option<BTreePageId>) {
        self.next = next.map(|pid| pid.page_no);
    }

    /// Returns true if slot `i` marks its page allocated.
    pub fn is_slot_used(&self, i: usize) -> bool {
        slot_is_set(&self.bitmap, i)
    }

    /// Marks slot `i` allocated or free.
    pub fn mark_slot_used(&mut self, i: usize, used: bool) {
        if used {
            set_slot(&mut self.bitmap, i);
        } else {
            clear_slot(&mut self.bitmap, i);
        }
    }

    /// Returns the first slot marking a free page, if any.
    pub fn get_empty_slot(&self) -> Option<usize> {
        for (byte_no, &byte) in self.bitmap.iter().enumerate() {
            if byte != 0xFF {
                let bit = (byte ^ 0xFF).trailing_zeros() as usize;
                return Some(byte_no * 8 + bit);
            }
        }
        None
    }

    /// Marks this page dirty or clean.
    pub fn mark_dirty(&mut self, dirty: bool, tid: TransactionId) {
        self.dirty = if dirty { Some(tid) } else { None };
    }

    /// Returns the dirtying transaction, if dirty.
    pub fn is_dirty(&self) -> Option<TransactionId> {
        self.dirty
    }
}

// =========================================================================
// Internal page
// =========================================================================

/// An internal B+-tree node: sorted keys with child pointers, one extra
/// left-most child, a parent pointer, and a category tag for the children.
///
/// Layout: `parentPageNo u32 | childCategory u8 | bitmap ceil((m+1)/8) |
/// leftmostChild u32 | m x (key keySize + rightChild u32) | padding` where
/// `m = maxEntries`. Slot 0 covers the left-most child and holds no key.
pub struct BTreeInternalPage {
    pid: BTreePageId,
    key_type: FieldType,
    parent: u32,
    child_category: Option<BTreePageCategory>,
    header: Vec<u8>,
    keys: Vec<Option<Field>>,
    children: Vec<u32>,
    dirty: Option<TransactionId>,
}

impl BTreeInternalPage {
    /// Returns the entry capacity for the given key type.
    ///
    /// Nine bytes go to the parent pointer, the child-category tag, and the
    /// left-most child; each entry costs its record plus one bitmap bit.
    pub fn max_entries_for(key_type: FieldType) -> usize {
        ((PAGE_SIZE - 9) * 8) / ((key_type.size() + 4) * 8 + 1)
    }

    fn header_size_for(key_type: FieldType) -> usize {
        (Self::max_entries_for(key_type) + 1).div_ceil(8)
    }

    /// Decodes an internal page.
    pub fn new(pid: BTreePageId, data: &[u8], key_type: FieldType) -> Result<Self> {
        if data.len() != PAGE_SIZE {
            return Err(QuarryError::ShortRead {
                expected: PAGE_SIZE,
                actual: data.len(),
            });
        }
        let max_entries = Self::max_entries_for(key_type);
        let num_slots = max_entries + 1;
        let mut buf = data;

        let parent = buf.get_u32_le();
        let child_category = match buf.get_u8() {
            2 => Some(BTreePageCategory::Internal),
            3 => Some(BTreePageCategory::Leaf),
            _ => None,
        };

        let mut header = vec![0u8; Self::header_size_for(key_type)];
        buf.copy_to_slice(&mut header);

        let mut keys = vec![None; num_slots];
        let mut children = vec![0u32; num_slots];
        children[0] = buf.get_u32_le();

        let key_desc = TupleDesc::new(vec![key_type]);
        for slot in 1..num_slots {
            if slot_is_set(&header, slot) {
                let key_tuple = Tuple::read_from(&key_desc, &mut buf)?;
                keys[slot] = Some(key_tuple.field(0).clone());
                children[slot] = buf.get_u32_le();
            } else {
                buf.advance(key_type.size());
                children[slot] = buf.get_u32_le();
            }
        }

        Ok(Self {
            pid,
            key_type,
            parent,
            child_category,
            header,
            keys,
            children,
            dirty: None,
        })
    }

    /// Returns this page's id.
    pub fn id(&self) -> BTreePageId {
        self.pid
    }

    /// Re-encodes this page.
    pub fn get_page_data(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PAGE_SIZE);
        buf.put_u32_le(self.parent);
        buf.put_u8(self.child_category.map(|c| c as u8).unwrap_or(0));
        buf.extend_from_slice(&self.header);
        buf.put_u32_le(self.children[0]);

        let key_size = self.key_type.size();
        for slot in 1..self.num_slots() {
            match &self.keys[slot] {
                Some(Field::Int(v)) if slot_is_set(&self.header, slot) => buf.put_i32_le(*v),
                Some(Field::Str(s)) if slot_is_set(&self.header, slot) => {
                    // Same wire shape as a STRING tuple field.
                    let t = Tuple::new(
                        TupleDesc::new(vec![FieldType::Str]),
                        vec![Field::Str(s.clone())],
                    )
                    .expect("key conforms to its own descriptor");
                    t.write_to(&mut buf);
                }
                _ => buf.extend(std::iter::repeat(0u8).take(key_size)),
            }
            buf.put_u32_le(self.children[slot]);
        }

        buf.resize(PAGE_SIZE, 0);
        buf
    }

    /// Returns the number of slots (maxEntries + 1).
    fn num_slots(&self) -> usize {
        self.keys.len()
    }

    /// Returns the entry capacity of this page.
    pub fn max_entries(&self) -> usize {
        self.num_slots() - 1
    }

    /// Returns the type of the keys on this page.
    pub fn key_type(&self) -> FieldType {
        self.key_type
    }

    /// Returns the number of empty entry slots (slot 0 excluded).
    pub fn num_empty_slots(&self) -> usize {
        (1..self.num_slots())
            .filter(|&i| !slot_is_set(&self.header, i))
            .count()
    }

    /// Returns the number of entries on this page.
    pub fn num_entries(&self) -> usize {
        self.max_entries() - self.num_empty_slots()
    }

    /// Returns true if entry slot `i` is occupied.
    pub fn is_slot_used(&self, i: usize) -> bool {
        i < self.num_slots() && slot_is_set(&self.header, i)
    }

    /// Returns the parent page id (the root-pointer id for the root).
    pub fn parent_id(&self) -> BTreePageId {
        if self.parent == 0 {
            BTreePageId::root_ptr(self.pid.table_id)
        } else {
            BTreePageId::new(self.pid.table_id, self.parent, BTreePageCategory::Internal)
        }
    }

    /// Sets the parent pointer.
    pub fn set_parent_id(&mut self, parent: BTreePageId) -> Result<()> {
        if parent.table_id != self.pid.table_id {
            return Err(QuarryError::IllegalArgument(
                "parent page belongs to another table".to_string(),
            ));
        }
        self.parent = match parent.category {
            BTreePageCategory::RootPtr => 0,
            BTreePageCategory::Internal => parent.page_no,
            other => {
                return Err(QuarryError::IllegalArgument(format!(
                    "{} page cannot be a parent",
                    other
                )))
            }
        };
        Ok(())
    }

    fn child_id(&self, slot: usize) -> BTreePageId {
        let category = self.child_category.unwrap_or(BTreePageCategory::Leaf);
        BTreePageId::new(self.pid.table_id, self.children[slot], category)
    }

    fn entry_at(&self, left_slot: usize, slot: usize) -> BTreeEntry {
        let mut e = BTreeEntry::new(
            self.keys[slot].clone().expect("occupied slot has a key"),
            self.child_id(left_slot),
            self.child_id(slot),
        );
        e.set_record_id(Some(RecordId::new(PageId::BTree(self.pid), slot as u16)));
        e
    }

    /// Returns the entries in ascending key order.
    pub fn entries(&self) -> Vec<BTreeEntry> {
        let mut out = Vec::with_capacity(self.num_entries());
        let mut prev_slot = 0;
        for slot in 1..self.num_slots() {
            if self.is_slot_used(slot) {
                out.push(self.entry_at(prev_slot, slot));
                prev_slot = slot;
            }
        }
        out
    }

    /// Returns the entries in descending key order.
    pub fn reverse_entries(&self) -> Vec<BTreeEntry> {
        let mut out = self.entries();
        out.reverse();
        out
    }

    /// Moves the record in `from` into the empty slot `to`.
    fn move_entry(&mut self, from: usize, to: usize) {
        if self.is_slot_used(from) && !self.is_slot_used(to) {
            self.keys[to] = self.keys[from].take();
            self.children[to] = self.children[from];
            set_slot(&mut self.header, to);
            clear_slot(&mut self.header, from);
        }
    }

    /// Inserts an entry, keeping keys sorted left to right.
    ///
    /// One of the entry's children must already be referenced by this page;
    /// that child pointer anchors the insertion position. Sets the entry's
    /// record id to the slot it lands in.
    pub fn insert_entry(&mut self, e: &mut BTreeEntry) -> Result<()> {
        if e.key().field_type() != self.key_type {
            return Err(QuarryError::DescriptorMismatch);
        }
        if e.left_child().category != e.right_child().category {
            return Err(QuarryError::MalformedTree(
                "entry children have mismatched categories".to_string(),
            ));
        }
        match self.child_category {
            None => self.child_category = Some(e.left_child().category),
            Some(cat) if cat == e.left_child().category => {}
            Some(_) => {
                return Err(QuarryError::MalformedTree(
                    "entry child category does not match page".to_string(),
                ))
            }
        }

        // First entry on an empty page claims slots 0 and 1.
        if self.num_empty_slots() == self.max_entries() {
            self.children[0] = e.left_child().page_no;
            self.children[1] = e.right_child().page_no;
            self.keys[1] = Some(e.key().clone());
            set_slot(&mut self.header, 0);
            set_slot(&mut self.header, 1);
            e.set_record_id(Some(RecordId::new(PageId::BTree(self.pid), 1)));
            return Ok(());
        }

        let empty_slot = (1..self.num_slots())
            .find(|&i| !self.is_slot_used(i))
            .ok_or(QuarryError::PageFull)?;

        // Find the slot holding one of the entry's children.
        let mut less_or_eq: Option<usize> = None;
        for slot in 0..self.num_slots() {
            if !self.is_slot_used(slot) {
                continue;
            }
            if self.children[slot] == e.left_child().page_no
                || self.children[slot] == e.right_child().page_no
            {
                if slot > 0
                    && self.keys[slot]
                        .as_ref()
                        .expect("occupied slot has a key")
                        > e.key()
                {
                    return Err(QuarryError::MalformedTree(
                        "entry would break key ordering".to_string(),
                    ));
                }
                if self.children[slot] == e.right_child().page_no {
                    self.children[slot] = e.left_child().page_no;
                }
                less_or_eq = Some(slot);
            } else if less_or_eq.is_some() {
                break;
            }
        }
        let less_or_eq = less_or_eq.ok_or_else(|| {
            QuarryError::MalformedTree("entry references no child of this page".to_string())
        })?;

        // Shift records between the empty slot and the insertion point.
        let good_slot = if empty_slot < less_or_eq {
            for i in empty_slot..less_or_eq {
                self.move_entry(i + 1, i);
            }
            less_or_eq
        } else {
            let mut i = empty_slot;
            while i > less_or_eq + 1 {
                self.move_entry(i - 1, i);
                i -= 1;
            }
            less_or_eq + 1
        };

        set_slot(&mut self.header, good_slot);
        self.keys[good_slot] = Some(e.key().clone());
        self.children[good_slot] = e.right_child().page_no;
        e.set_record_id(Some(RecordId::new(PageId::BTree(self.pid), good_slot as u16)));
        Ok(())
    }

    fn slot_of(&self, e: &BTreeEntry) -> Result<usize> {
        let rid = e.record_id().ok_or(QuarryError::TupleNotOnPage)?;
        if rid.page_id != PageId::BTree(self.pid) {
            return Err(QuarryError::TupleNotOnPage);
        }
        let slot = rid.slot as usize;
        if slot == 0 || slot >= self.num_slots() {
            return Err(QuarryError::IllegalArgument(format!(
                "entry slot {} out of range",
                slot
            )));
        }
        if !self.is_slot_used(slot) {
            return Err(QuarryError::EmptySlot(rid.slot));
        }
        Ok(slot)
    }

    /// Deletes an entry's key together with its right child pointer.
    pub fn delete_key_and_right_child(&mut self, e: &BTreeEntry) -> Result<()> {
        let slot = self.slot_of(e)?;
        self.keys[slot] = None;
        clear_slot(&mut self.header, slot);
        Ok(())
    }

    /// Deletes an entry's key together with its left child pointer.
    ///
    /// The entry's own child pointer replaces the previous slot's, so the
    /// subtree to the right of the deleted key stays reachable.
    pub fn delete_key_and_left_child(&mut self, e: &BTreeEntry) -> Result<()> {
        let slot = self.slot_of(e)?;
        for i in (0..slot).rev() {
            if self.is_slot_used(i) {
                self.children[i] = self.children[slot];
                self.keys[slot] = None;
                clear_slot(&mut self.header, slot);
                return Ok(());
            }
        }
        Err(QuarryError::MalformedTree(
            "entry has no left neighbor".to_string(),
        ))
    }

    /// Rewrites the key and right child of the slot named by the entry's
    /// record id, checking the new key against its neighbors.
    pub fn update_entry(&mut self, e: &BTreeEntry) -> Result<()> {
        let slot = self.slot_of(e)?;

        for i in (1..slot).rev() {
            if self.is_slot_used(i) {
                if self.keys[i].as_ref().expect("occupied slot has a key") > e.key() {
                    return Err(QuarryError::MalformedTree(
                        "updated key below left neighbor".to_string(),
                    ));
                }
                break;
            }
        }
        for i in slot + 1..self.num_slots() {
            if self.is_slot_used(i) {
                if self.keys[i].as_ref().expect("occupied slot has a key") < e.key() {
                    return Err(QuarryError::MalformedTree(
                        "updated key above right neighbor".to_string(),
                    ));
                }
                break;
            }
        }

        self.children[slot] = e.right_child().page_no;
        self.keys[slot] = Some(e.key().clone());
        Ok(())
    }

    /// Marks this page dirty or clean.
    pub fn mark_dirty(&mut self, dirty: bool, tid: TransactionId) {
        self.dirty = if dirty { Some(tid) } else { None };
    }

    /// Returns the dirtying transaction, if dirty.
    pub fn is_dirty(&self) -> Option<TransactionId> {
        self.dirty
    }
}

// =========================================================================
// Leaf page
// =========================================================================

/// A leaf B+-tree node: tuples sorted on the key field, doubly linked to
/// its siblings.
///
/// Layout: `parentPageNo u32 | leftSiblingPageNo u32 | rightSiblingPageNo
/// u32 | bitmap ceil(m/8) | m x tupleSize | padding` where `m = maxTuples`.
pub struct BTreeLeafPage {
    pid: BTreePageId,
    desc: TupleDesc,
    key_field: usize,
    parent: u32,
    left_sibling: u32,
    right_sibling: u32,
    header: Vec<u8>,
    tuples: Vec<Option<Tuple>>,
    dirty: Option<TransactionId>,
}

impl BTreeLeafPage {
    /// Returns the tuple capacity for the given descriptor.
    ///
    /// Twelve bytes go to the parent and sibling pointers; each tuple costs
    /// its width plus one bitmap bit.
    pub fn max_tuples_for(desc: &TupleDesc) -> usize {
        ((PAGE_SIZE - 12) * 8) / (desc.size() * 8 + 1)
    }

    fn header_size_for(desc: &TupleDesc) -> usize {
        Self::max_tuples_for(desc).div_ceil(8)
    }

    /// Decodes a leaf page.
    pub fn new(pid: BTreePageId, data: &[u8], desc: TupleDesc, key_field: usize) -> Result<Self> {
        if data.len() != PAGE_SIZE {
            return Err(QuarryError::ShortRead {
                expected: PAGE_SIZE,
                actual: data.len(),
            });
        }
        let max_tuples = Self::max_tuples_for(&desc);
        let mut buf = data;

        let parent = buf.get_u32_le();
        let left_sibling = buf.get_u32_le();
        let right_sibling = buf.get_u32_le();

        let mut header = vec![0u8; Self::header_size_for(&desc)];
        buf.copy_to_slice(&mut header);

        let tuple_size = desc.size();
        let mut tuples = Vec::with_capacity(max_tuples);
        for slot in 0..max_tuples {
            if slot_is_set(&header, slot) {
                let mut t = Tuple::read_from(&desc, &mut buf)?;
                t.set_record_id(Some(RecordId::new(PageId::BTree(pid), slot as u16)));
                tuples.push(Some(t));
            } else {
                buf.advance(tuple_size);
                tuples.push(None);
            }
        }

        Ok(Self {
            pid,
            desc,
            key_field,
            parent,
            left_sibling,
            right_sibling,
            header,
            tuples,
            dirty: None,
        })
    }

    /// Returns this page's id.
    pub fn id(&self) -> BTreePageId {
        self.pid
    }

    /// Re-encodes this page.
    pub fn get_page_data(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PAGE_SIZE);
        buf.put_u32_le(self.parent);
        buf.put_u32_le(self.left_sibling);
        buf.put_u32_le(self.right_sibling);
        buf.extend_from_slice(&self.header);

        let tuple_size = self.desc.size();
        for slot in 0..self.max_tuples() {
            match &self.tuples[slot] {
                Some(t) if slot_is_set(&self.header, slot) => t.write_to(&mut buf),
                _ => buf.extend(std::iter::repeat(0u8).take(tuple_size)),
            }
        }

        buf.resize(PAGE_SIZE, 0);
        buf
    }

    /// Returns the tuple capacity of this page.
    pub fn max_tuples(&self) -> usize {
        self.tuples.len()
    }

    /// Returns the index of the key field.
    pub fn key_field(&self) -> usize {
        self.key_field
    }

    /// Returns the number of empty slots.
    pub fn num_empty_slots(&self) -> usize {
        (0..self.max_tuples())
            .filter(|&i| !slot_is_set(&self.header, i))
            .count()
    }

    /// Returns the number of tuples on this page.
    pub fn num_tuples(&self) -> usize {
        self.max_tuples() - self.num_empty_slots()
    }

    /// Returns true if slot `i` holds a tuple.
    pub fn is_slot_used(&self, i: usize) -> bool {
        i < self.max_tuples() && slot_is_set(&self.header, i)
    }

    /// Returns the parent page id (the root-pointer id for a root leaf).
    pub fn parent_id(&self) -> BTreePageId {
        if self.parent == 0 {
            BTreePageId::root_ptr(self.pid.table_id)
        } else {
            BTreePageId::new(self.pid.table_id, self.parent, BTreePageCategory::Internal)
        }
    }

    /// Sets the parent pointer.
    pub fn set_parent_id(&mut self, parent: BTreePageId) -> Result<()> {
        if parent.table_id != self.pid.table_id {
            return Err(QuarryError::IllegalArgument(
                "parent page belongs to another table".to_string(),
            ));
        }
        self.parent = match parent.category {
            BTreePageCategory::RootPtr => 0,
            BTreePageCategory::Internal => parent.page_no,
            other => {
                return Err(QuarryError::IllegalArgument(format!(
                    "{} page cannot be a parent",
                    other
                )))
            }
        };
        Ok(())
    }

    /// Returns the left sibling id, if any.
    pub fn left_sibling_id(&self) -> Option<BTreePageId> {
        match self.left_sibling {
            0 => None,
            no => Some(BTreePageId::new(
                self.pid.table_id,
                no,
                BTreePageCategory::Leaf,
            )),
        }
    }

    /// Sets the left sibling pointer.
    pub fn set_left_sibling_id(&mut self, sibling: Option<BTreePageId>) {
        self.left_sibling = sibling.map(|pid| pid.page_no).unwrap_or(0);
    }

    /// Returns the right sibling id, if any.
    pub fn right_sibling_id(&self) -> Option<BTreePageId> {
        match self.right_sibling {
            0 => None,
            no => Some(BTreePageId::new(
                self.pid.table_id,
                no,
                BTreePageCategory::Leaf,
            )),
        }
    }

    /// Sets the right sibling pointer.
    pub fn set_right_sibling_id(&mut self, sibling: Option<BTreePageId>) {
        self.right_sibling = sibling.map(|pid| pid.page_no).unwrap_or(0);
    }

    fn key_of(&self, t: &Tuple) -> Field {
        t.field(self.key_field).clone()
    }

    /// Returns the occupied tuples in ascending slot (and key) order.
    pub fn tuples(&self) -> Vec<Tuple> {
        (0..self.max_tuples())
            .filter(|&i| self.is_slot_used(i))
            .filter_map(|i| self.tuples[i].clone())
            .collect()
    }

    /// Returns the occupied tuples in descending order.
    pub fn reverse_tuples(&self) -> Vec<Tuple> {
        let mut out = self.tuples();
        out.reverse();
        out
    }

    /// Moves the tuple in `from` into the empty slot `to`, reassigning its
    /// record id.
    fn move_record(&mut self, from: usize, to: usize) {
        if self.is_slot_used(from) && !self.is_slot_used(to) {
            let mut t = self.tuples[from].take().expect("occupied slot has a tuple");
            t.set_record_id(Some(RecordId::new(PageId::BTree(self.pid), to as u16)));
            self.tuples[to] = Some(t);
            set_slot(&mut self.header, to);
            clear_slot(&mut self.header, from);
        }
    }

    /// Inserts a tuple, keeping slots sorted on the key field.
    pub fn insert_tuple(&mut self, mut t: Tuple) -> Result<RecordId> {
        if *t.desc() != self.desc {
            return Err(QuarryError::DescriptorMismatch);
        }

        let empty_slot = (0..self.max_tuples())
            .find(|&i| !self.is_slot_used(i))
            .ok_or(QuarryError::PageFull)?;

        // Last occupied slot whose key is <= the incoming key.
        let key = self.key_of(&t);
        let mut less_or_eq: Option<usize> = None;
        for slot in 0..self.max_tuples() {
            if !self.is_slot_used(slot) {
                continue;
            }
            let other = self.tuples[slot]
                .as_ref()
                .expect("occupied slot has a tuple");
            if self.key_of(other) <= key {
                less_or_eq = Some(slot);
            } else {
                break;
            }
        }

        let good_slot = match less_or_eq {
            Some(target) if empty_slot < target => {
                for i in empty_slot..target {
                    self.move_record(i + 1, i);
                }
                target
            }
            Some(target) => {
                let mut i = empty_slot;
                while i > target + 1 {
                    self.move_record(i - 1, i);
                    i -= 1;
                }
                target + 1
            }
            None => {
                // Smallest key on the page: shift everything right of slot 0.
                let mut i = empty_slot;
                while i > 0 {
                    self.move_record(i - 1, i);
                    i -= 1;
                }
                0
            }
        };

        let rid = RecordId::new(PageId::BTree(self.pid), good_slot as u16);
        t.set_record_id(Some(rid));
        self.tuples[good_slot] = Some(t);
        set_slot(&mut self.header, good_slot);
        Ok(rid)
    }

    /// Deletes the tuple named by `t`'s record id.
    pub fn delete_tuple(&mut self, t: &Tuple) -> Result<()> {
        let rid = t.record_id().ok_or(QuarryError::TupleNotOnPage)?;
        if rid.page_id != PageId::BTree(self.pid) {
            return Err(QuarryError::TupleNotOnPage);
        }
        let slot = rid.slot as usize;
        if slot >= self.max_tuples() || !self.is_slot_used(slot) {
            return Err(QuarryError::EmptySlot(rid.slot));
        }
        clear_slot(&mut self.header, slot);
        self.tuples[slot] = None;
        Ok(())
    }

    /// Marks this page dirty or clean.
    pub fn mark_dirty(&mut self, dirty: bool, tid: TransactionId) {
        self.dirty = if dirty { Some(tid) } else { None };
    }

    /// Returns the dirtying transaction, if dirty.
    pub fn is_dirty(&self) -> Option<TransactionId> {
        self.dirty
    }
}

// =========================================================================
// Tagged union
// =========================================================================

/// Any B+-tree page, decoded per the category tag of its id.
pub enum BTreePage {
    RootPtr(BTreeRootPtrPage),
    Header(BTreeHeaderPage),
    Internal(BTreeInternalPage),
    Leaf(BTreeLeafPage),
}

impl BTreePage {
    /// Decodes page bytes into the variant named by `pid.category`.
    pub fn decode(
        pid: BTreePageId,
        data: &[u8],
        desc: &TupleDesc,
        key_field: usize,
    ) -> Result<Self> {
        match pid.category {
            BTreePageCategory::RootPtr => Ok(BTreePage::RootPtr(BTreeRootPtrPage::new(pid, data)?)),
            BTreePageCategory::Header => Ok(BTreePage::Header(BTreeHeaderPage::new(pid, data)?)),
            BTreePageCategory::Internal => Ok(BTreePage::Internal(BTreeInternalPage::new(
                pid,
                data,
                desc.field_type(key_field),
            )?)),
            BTreePageCategory::Leaf => Ok(BTreePage::Leaf(BTreeLeafPage::new(
                pid,
                data,
                desc.clone(),
                key_field,
            )?)),
        }
    }

    /// Returns this page's id.
    pub fn id(&self) -> BTreePageId {
        match self {
            BTreePage::RootPtr(p) => p.id(),
            BTreePage::Header(p) => p.id(),
            BTreePage::Internal(p) => p.id(),
            BTreePage::Leaf(p) => p.id(),
        }
    }

    /// Re-encodes this page.
    pub fn get_page_data(&self) -> Vec<u8> {
        match self {
            BTreePage::RootPtr(p) => p.get_page_data(),
            BTreePage::Header(p) => p.get_page_data(),
            BTreePage::Internal(p) => p.get_page_data(),
            BTreePage::Leaf(p) => p.get_page_data(),
        }
    }

    /// Marks this page dirty or clean.
    pub fn mark_dirty(&mut self, dirty: bool, tid: TransactionId) {
        match self {
            BTreePage::RootPtr(p) => p.mark_dirty(dirty, tid),
            BTreePage::Header(p) => p.mark_dirty(dirty, tid),
            BTreePage::Internal(p) => p.mark_dirty(dirty, tid),
            BTreePage::Leaf(p) => p.mark_dirty(dirty, tid),
        }
    }

    /// Returns the parent id of an internal or leaf page.
    pub fn parent_id(&self) -> Result<BTreePageId> {
        match self {
            BTreePage::Internal(p) => Ok(p.parent_id()),
            BTreePage::Leaf(p) => Ok(p.parent_id()),
            other => Err(QuarryError::WrongPageCategory {
                expected: "internal or leaf",
                actual: other.id().category.name(),
            }),
        }
    }

    /// Sets the parent id of an internal or leaf page.
    pub fn set_parent_id(&mut self, parent: BTreePageId) -> Result<()> {
        match self {
            BTreePage::Internal(p) => p.set_parent_id(parent),
            BTreePage::Leaf(p) => p.set_parent_id(parent),
            other => Err(QuarryError::WrongPageCategory {
                expected: "internal or leaf",
                actual: other.id().category.name(),
            }),
        }
    }

    pub fn as_root_ptr(&self) -> Result<&BTreeRootPtrPage> {
        match self {
            BTreePage::RootPtr(p) => Ok(p),
            other => Err(wrong_category("root-ptr", other)),
        }
    }

    pub fn as_root_ptr_mut(&mut self) -> Result<&mut BTreeRootPtrPage> {
        match self {
            BTreePage::RootPtr(p) => Ok(p),
            other => Err(wrong_category("root-ptr", other)),
        }
    }

    pub fn as_header(&self) -> Result<&BTreeHeaderPage> {
        match self {
            BTreePage::Header(p) => Ok(p),
            other => Err(wrong_category("header", other)),
        }
    }

    pub fn as_header_mut(&mut self) -> Result<&mut BTreeHeaderPage> {
        match self {
            BTreePage::Header(p) => Ok(p),
            other => Err(wrong_category("header", other)),
        }
    }

    pub fn as_internal(&self) -> Result<&BTreeInternalPage> {
        match self {
            BTreePage::Internal(p) => Ok(p),
            other => Err(wrong_category("internal", other)),
        }
    }

    pub fn as_internal_mut(&mut self) -> Result<&mut BTreeInternalPage> {
        match self {
            BTreePage::Internal(p) => Ok(p),
            other => Err(wrong_category("internal", other)),
        }
    }

    pub fn as_leaf(&self) -> Result<&BTreeLeafPage> {
        match self {
            BTreePage::Leaf(p) => Ok(p),
            other => Err(wrong_category("leaf", other)),
        }
    }

    pub fn as_leaf_mut(&mut self) -> Result<&mut BTreeLeafPage> {
        match self {
            BTreePage::Leaf(p) => Ok(p),
            other => Err(wrong_category("leaf", other)),
        }
    }
}

fn wrong_category(expected: &'static str, page: &BTreePage) -> QuarryError {
    QuarryError::WrongPageCategory {
        expected,
        actual: page.id().category.name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: u32 = 1;

    fn leaf_pid(no: u32) -> BTreePageId {
        BTreePageId::new(TABLE, no, BTreePageCategory::Leaf)
    }

    fn internal_pid(no: u32) -> BTreePageId {
        BTreePageId::new(TABLE, no, BTreePageCategory::Internal)
    }

    fn empty_leaf(no: u32) -> BTreeLeafPage {
        BTreeLeafPage::new(leaf_pid(no), &vec![0u8; PAGE_SIZE], TupleDesc::int_fields(2), 0)
            .unwrap()
    }

    fn empty_internal(no: u32) -> BTreeInternalPage {
        BTreeInternalPage::new(internal_pid(no), &vec![0u8; PAGE_SIZE], FieldType::Int).unwrap()
    }

    // ----- root pointer -----

    #[test]
    fn test_root_ptr_roundtrip() {
        let pid = BTreePageId::root_ptr(TABLE);
        let mut page =
            BTreeRootPtrPage::new(pid, &BTreeRootPtrPage::create_empty_page_data()).unwrap();
        assert!(page.root_id().is_none());
        assert!(page.header_id().is_none());

        page.set_root_id(Some(internal_pid(3))).unwrap();
        page.set_header_id(Some(BTreePageId::new(TABLE, 7, BTreePageCategory::Header)));

        let data = page.get_page_data();
        assert_eq!(data.len(), ROOT_PTR_PAGE_SIZE);

        let decoded = BTreeRootPtrPage::new(pid, &data).unwrap();
        assert_eq!(decoded.root_id(), Some(internal_pid(3)));
        assert_eq!(decoded.header_id().unwrap().page_no, 7);
        assert_eq!(decoded.get_page_data(), data);
    }

    #[test]
    fn test_root_ptr_rejects_header_root() {
        let pid = BTreePageId::root_ptr(TABLE);
        let mut page =
            BTreeRootPtrPage::new(pid, &BTreeRootPtrPage::create_empty_page_data()).unwrap();
        let result = page.set_root_id(Some(BTreePageId::new(TABLE, 2, BTreePageCategory::Header)));
        assert!(result.is_err());
    }

    // ----- header page -----

    #[test]
    fn test_header_page_slots() {
        let pid = BTreePageId::new(TABLE, 2, BTreePageCategory::Header);
        let mut page = BTreeHeaderPage::new(pid, &vec![0u8; PAGE_SIZE]).unwrap();

        assert_eq!(BTreeHeaderPage::NUM_SLOTS, (PAGE_SIZE - 8) * 8);
        // A zeroed page claims everything free; init marks all allocated.
        assert_eq!(page.get_empty_slot(), Some(0));
        page.init();
        assert_eq!(page.get_empty_slot(), None);

        page.mark_slot_used(300, false);
        assert_eq!(page.get_empty_slot(), Some(300));
        assert!(!page.is_slot_used(300));
        page.mark_slot_used(300, true);
        assert_eq!(page.get_empty_slot(), None);
    }

    #[test]
    fn test_header_page_chain_roundtrip() {
        let pid = BTreePageId::new(TABLE, 2, BTreePageCategory::Header);
        let mut page = BTreeHeaderPage::new(pid, &vec![0u8; PAGE_SIZE]).unwrap();
        page.init();
        page.set_prev_id(Some(BTreePageId::new(TABLE, 1, BTreePageCategory::Header)));
        page.set_next_id(Some(BTreePageId::new(TABLE, 9, BTreePageCategory::Header)));
        page.mark_slot_used(5, false);

        let data = page.get_page_data();
        let decoded = BTreeHeaderPage::new(pid, &data).unwrap();
        assert_eq!(decoded.prev_id().unwrap().page_no, 1);
        assert_eq!(decoded.next_id().unwrap().page_no, 9);
        assert_eq!(decoded.get_empty_slot(), Some(5));
        assert_eq!(decoded.get_page_data(), data);
    }

    // ----- internal page -----

    #[test]
    fn test_internal_capacity_int_keys() {
        // floor((4096 - 9) * 8 / ((4 + 4) * 8 + 1)) = floor(32696 / 65) = 503
        assert_eq!(BTreeInternalPage::max_entries_for(FieldType::Int), 503);
    }

    #[test]
    fn test_internal_capacity_string_keys() {
        // floor(32696 / ((136 + 4) * 8 + 1)) = floor(32696 / 1121) = 29
        assert_eq!(BTreeInternalPage::max_entries_for(FieldType::Str), 29);
    }

    #[test]
    fn test_internal_first_insert() {
        let mut page = empty_internal(5);
        assert_eq!(page.num_entries(), 0);

        let mut e = BTreeEntry::new(Field::Int(10), leaf_pid(1), leaf_pid(2));
        page.insert_entry(&mut e).unwrap();

        assert_eq!(page.num_entries(), 1);
        let entries = page.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key(), &Field::Int(10));
        assert_eq!(entries[0].left_child(), leaf_pid(1));
        assert_eq!(entries[0].right_child(), leaf_pid(2));
        assert_eq!(e.record_id().unwrap().slot, 1);
    }

    #[test]
    fn test_internal_sorted_insert_shares_children() {
        let mut page = empty_internal(5);

        let mut e1 = BTreeEntry::new(Field::Int(10), leaf_pid(1), leaf_pid(2));
        page.insert_entry(&mut e1).unwrap();
        let mut e2 = BTreeEntry::new(Field::Int(20), leaf_pid(2), leaf_pid(3));
        page.insert_entry(&mut e2).unwrap();
        let mut e3 = BTreeEntry::new(Field::Int(5), leaf_pid(0x10), leaf_pid(1));
        page.insert_entry(&mut e3).unwrap();

        let entries = page.entries();
        let keys: Vec<_> = entries.iter().map(|e| e.key().clone()).collect();
        assert_eq!(keys, vec![Field::Int(5), Field::Int(10), Field::Int(20)]);

        // Adjacent entries share a child pointer.
        for pair in entries.windows(2) {
            assert_eq!(pair[0].right_child(), pair[1].left_child());
        }
        assert_eq!(entries[0].left_child(), leaf_pid(0x10));
        assert_eq!(entries[2].right_child(), leaf_pid(3));
    }

    #[test]
    fn test_internal_insert_rejects_unrelated_entry() {
        let mut page = empty_internal(5);
        let mut e1 = BTreeEntry::new(Field::Int(10), leaf_pid(1), leaf_pid(2));
        page.insert_entry(&mut e1).unwrap();

        let mut stranger = BTreeEntry::new(Field::Int(30), leaf_pid(8), leaf_pid(9));
        assert!(matches!(
            page.insert_entry(&mut stranger),
            Err(QuarryError::MalformedTree(_))
        ));
    }

    #[test]
    fn test_internal_roundtrip() {
        let mut page = empty_internal(5);
        page.set_parent_id(internal_pid(9)).unwrap();
        let mut e1 = BTreeEntry::new(Field::Int(10), leaf_pid(1), leaf_pid(2));
        page.insert_entry(&mut e1).unwrap();
        let mut e2 = BTreeEntry::new(Field::Int(20), leaf_pid(2), leaf_pid(3));
        page.insert_entry(&mut e2).unwrap();

        let data = page.get_page_data();
        assert_eq!(data.len(), PAGE_SIZE);

        let decoded = BTreeInternalPage::new(internal_pid(5), &data, FieldType::Int).unwrap();
        assert_eq!(decoded.num_entries(), 2);
        assert_eq!(decoded.parent_id(), internal_pid(9));
        assert_eq!(decoded.entries()[1].key(), &Field::Int(20));
        assert_eq!(decoded.get_page_data(), data);
    }

    #[test]
    fn test_internal_delete_right_child() {
        let mut page = empty_internal(5);
        let mut e1 = BTreeEntry::new(Field::Int(10), leaf_pid(1), leaf_pid(2));
        page.insert_entry(&mut e1).unwrap();
        let mut e2 = BTreeEntry::new(Field::Int(20), leaf_pid(2), leaf_pid(3));
        page.insert_entry(&mut e2).unwrap();

        let entries = page.entries();
        page.delete_key_and_right_child(&entries[1]).unwrap();

        let entries = page.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key(), &Field::Int(10));
        assert_eq!(entries[0].right_child(), leaf_pid(2));
    }

    #[test]
    fn test_internal_delete_left_child() {
        let mut page = empty_internal(5);
        let mut e1 = BTreeEntry::new(Field::Int(10), leaf_pid(1), leaf_pid(2));
        page.insert_entry(&mut e1).unwrap();
        let mut e2 = BTreeEntry::new(Field::Int(20), leaf_pid(2), leaf_pid(3));
        page.insert_entry(&mut e2).unwrap();

        let entries = page.entries();
        page.delete_key_and_left_child(&entries[1]).unwrap();

        // Key 20 and child 2 are gone; child 3 hangs off key 10 now.
        let entries = page.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key(), &Field::Int(10));
        assert_eq!(entries[0].left_child(), leaf_pid(1));
        assert_eq!(entries[0].right_child(), leaf_pid(3));
    }

    #[test]
    fn test_internal_update_entry() {
        let mut page = empty_internal(5);
        let mut e1 = BTreeEntry::new(Field::Int(10), leaf_pid(1), leaf_pid(2));
        page.insert_entry(&mut e1).unwrap();
        let mut e2 = BTreeEntry::new(Field::Int(20), leaf_pid(2), leaf_pid(3));
        page.insert_entry(&mut e2).unwrap();

        let mut target = page.entries()[0].clone();
        target.set_key(Field::Int(15));
        page.update_entry(&target).unwrap();
        assert_eq!(page.entries()[0].key(), &Field::Int(15));

        // An update violating the ordering is rejected.
        let mut bad = page.entries()[0].clone();
        bad.set_key(Field::Int(25));
        assert!(matches!(
            page.update_entry(&bad),
            Err(QuarryError::MalformedTree(_))
        ));
    }

    #[test]
    fn test_internal_fill_to_capacity() {
        let mut page = empty_internal(5);
        let max = page.max_entries();

        let mut e = BTreeEntry::new(Field::Int(0), leaf_pid(100), leaf_pid(101));
        page.insert_entry(&mut e).unwrap();
        for i in 1..max {
            let mut e = BTreeEntry::new(
                Field::Int(i as i32),
                leaf_pid(100 + i as u32),
                leaf_pid(101 + i as u32),
            );
            page.insert_entry(&mut e).unwrap();
        }
        assert_eq!(page.num_entries(), max);
        assert_eq!(page.num_empty_slots(), 0);

        let mut overflow = BTreeEntry::new(
            Field::Int(max as i32),
            leaf_pid(100 + max as u32),
            leaf_pid(101 + max as u32),
        );
        assert!(matches!(
            page.insert_entry(&mut overflow),
            Err(QuarryError::PageFull)
        ));
    }

    #[test]
    fn test_internal_parent_root_ptr() {
        let page = empty_internal(5);
        assert_eq!(page.parent_id(), BTreePageId::root_ptr(TABLE));
    }

    // ----- leaf page -----

    #[test]
    fn test_leaf_capacity_two_int() {
        // floor((4096 - 12) * 8 / 65) = floor(32672 / 65) = 502
        assert_eq!(
            BTreeLeafPage::max_tuples_for(&TupleDesc::int_fields(2)),
            502
        );
    }

    #[test]
    fn test_leaf_sorted_insert() {
        let mut page = empty_leaf(1);
        for v in [30, 10, 20, 25, 5] {
            page.insert_tuple(Tuple::from_ints(&[v, 0])).unwrap();
        }

        let keys: Vec<i32> = page
            .tuples()
            .iter()
            .map(|t| match t.field(0) {
                Field::Int(v) => *v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(keys, vec![5, 10, 20, 25, 30]);
        assert_eq!(page.num_tuples(), 5);
    }

    #[test]
    fn test_leaf_duplicate_keys_allowed() {
        let mut page = empty_leaf(1);
        for v in [10, 10, 10] {
            page.insert_tuple(Tuple::from_ints(&[v, v])).unwrap();
        }
        assert_eq!(page.num_tuples(), 3);
    }

    #[test]
    fn test_leaf_delete_and_reinsert() {
        let mut page = empty_leaf(1);
        page.insert_tuple(Tuple::from_ints(&[10, 1])).unwrap();
        let rid = page.insert_tuple(Tuple::from_ints(&[20, 2])).unwrap();

        let mut t = Tuple::from_ints(&[20, 2]);
        t.set_record_id(Some(rid));
        page.delete_tuple(&t).unwrap();
        assert_eq!(page.num_tuples(), 1);
        assert!(matches!(
            page.delete_tuple(&t),
            Err(QuarryError::EmptySlot(_))
        ));
    }

    #[test]
    fn test_leaf_roundtrip() {
        let mut page = empty_leaf(4);
        page.set_parent_id(internal_pid(2)).unwrap();
        page.set_left_sibling_id(Some(leaf_pid(3)));
        page.set_right_sibling_id(Some(leaf_pid(5)));
        for v in [1, 3, 2] {
            page.insert_tuple(Tuple::from_ints(&[v, v])).unwrap();
        }

        let data = page.get_page_data();
        let decoded =
            BTreeLeafPage::new(leaf_pid(4), &data, TupleDesc::int_fields(2), 0).unwrap();
        assert_eq!(decoded.num_tuples(), 3);
        assert_eq!(decoded.parent_id(), internal_pid(2));
        assert_eq!(decoded.left_sibling_id(), Some(leaf_pid(3)));
        assert_eq!(decoded.right_sibling_id(), Some(leaf_pid(5)));
        assert_eq!(decoded.get_page_data(), data);
    }

    #[test]
    fn test_leaf_reverse_tuples() {
        let mut page = empty_leaf(1);
        for v in [1, 2, 3] {
            page.insert_tuple(Tuple::from_ints(&[v, 0])).unwrap();
        }
        let rev = page.reverse_tuples();
        assert_eq!(rev[0].field(0), &Field::Int(3));
        assert_eq!(rev[2].field(0), &Field::Int(1));
    }

    #[test]
    fn test_leaf_fill_to_capacity() {
        let mut page = empty_leaf(1);
        let max = page.max_tuples();
        for v in 0..max as i32 {
            page.insert_tuple(Tuple::from_ints(&[v, v])).unwrap();
        }
        assert_eq!(page.num_empty_slots(), 0);
        assert!(matches!(
            page.insert_tuple(Tuple::from_ints(&[0, 0])),
            Err(QuarryError::PageFull)
        ));
    }

    // ----- tagged union -----

    #[test]
    fn test_decode_dispatches_on_category() {
        let desc = TupleDesc::int_fields(2);

        let page = BTreePage::decode(
            BTreePageId::root_ptr(TABLE),
            &BTreeRootPtrPage::create_empty_page_data(),
            &desc,
            0,
        )
        .unwrap();
        assert!(page.as_root_ptr().is_ok());
        assert!(page.as_leaf().is_err());

        let page = BTreePage::decode(leaf_pid(1), &vec![0u8; PAGE_SIZE], &desc, 0).unwrap();
        assert!(page.as_leaf().is_ok());
        assert!(matches!(
            page.as_internal(),
            Err(QuarryError::WrongPageCategory { .. })
        ));
    }
}
