//! Heap page implementation: a fixed-layout slotted page.
//!
//! Page layout:
//! ```text
//! +---------------------------+
//! | Slot bitmap               |  ceil(numSlots / 8) bytes, LSB-first
//! +---------------------------+
//! | Tuple slots               |  numSlots x tupleSize bytes
//! | (empty slots are zeroed)  |
//! +---------------------------+
//! | Zero padding              |  to PAGE_SIZE
//! +---------------------------+
//! ```
//!
//! `numSlots = floor(PAGE_SIZE * 8 / (tupleSize * 8 + 1))`: one bitmap bit
//! per slot. Empty slots still occupy `tupleSize` bytes on disk so slot
//! offsets never move.

use crate::tuple::{RecordId, Tuple, TupleDesc};
use bytes::Buf;
use quarry_buffer::PAGE_SIZE;
use quarry_common::{
    clear_slot, set_slot, slot_is_set, HeapPageId, PageId, QuarryError, Result, TransactionId,
};

/// A heap page holding fixed-size tuples behind a slot bitmap.
pub struct HeapPage {
    pid: HeapPageId,
    desc: TupleDesc,
    header: Vec<u8>,
    tuples: Vec<Option<Tuple>>,
    num_slots: usize,
    /// Bytes of this page as first decoded, for recovery collaborators.
    before_image: Vec<u8>,
    dirty: Option<TransactionId>,
}

impl HeapPage {
    /// Returns the number of tuple slots for the given descriptor.
    pub fn num_slots_for(desc: &TupleDesc) -> usize {
        (PAGE_SIZE * 8) / (desc.size() * 8 + 1)
    }

    /// Returns the bitmap size in bytes for the given descriptor.
    pub fn header_size_for(desc: &TupleDesc) -> usize {
        Self::num_slots_for(desc).div_ceil(8)
    }

    /// Returns a zeroed buffer representing an empty heap page.
    pub fn create_empty_page_data() -> Vec<u8> {
        vec![0u8; PAGE_SIZE]
    }

    /// Decodes a heap page from its on-disk bytes.
    ///
    /// Empty slots consume and discard `tupleSize` bytes so that occupied
    /// slots decode from their fixed offsets. The before-image is installed
    /// from the freshly re-encoded state.
    pub fn new(pid: HeapPageId, data: &[u8], desc: TupleDesc) -> Result<Self> {
        if data.len() != PAGE_SIZE {
            return Err(QuarryError::ShortRead {
                expected: PAGE_SIZE,
                actual: data.len(),
            });
        }

        let num_slots = Self::num_slots_for(&desc);
        let header_size = Self::header_size_for(&desc);
        let mut buf = data;

        let mut header = vec![0u8; header_size];
        buf.copy_to_slice(&mut header);

        let tuple_size = desc.size();
        let mut tuples = Vec::with_capacity(num_slots);
        for slot in 0..num_slots {
            if slot_is_set(&header, slot) {
                let mut t = Tuple::read_from(&desc, &mut buf)?;
                t.set_record_id(Some(RecordId::new(PageId::Heap(pid), slot as u16)));
                tuples.push(Some(t));
            } else {
                buf.advance(tuple_size);
                tuples.push(None);
            }
        }

        let mut page = Self {
            pid,
            desc,
            header,
            tuples,
            num_slots,
            before_image: Vec::new(),
            dirty: None,
        };
        page.before_image = page.get_page_data();
        Ok(page)
    }

    /// Returns this page's id.
    pub fn id(&self) -> HeapPageId {
        self.pid
    }

    /// Returns the tuple descriptor of this page's table.
    pub fn desc(&self) -> &TupleDesc {
        &self.desc
    }

    /// Returns the number of slots on this page.
    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    /// Re-encodes this page to exactly PAGE_SIZE bytes.
    ///
    /// Decoding the result yields an identical page (round-trip identity).
    pub fn get_page_data(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PAGE_SIZE);
        buf.extend_from_slice(&self.header);

        let tuple_size = self.desc.size();
        for slot in 0..self.num_slots {
            match &self.tuples[slot] {
                Some(t) if slot_is_set(&self.header, slot) => t.write_to(&mut buf),
                _ => buf.extend(std::iter::repeat(0u8).take(tuple_size)),
            }
        }

        buf.resize(PAGE_SIZE, 0);
        buf
    }

    /// Returns a new page decoded from the stored before-image bytes.
    ///
    /// The image bytes parsed successfully at construction, so a decode
    /// failure here means in-memory corruption and aborts.
    pub fn before_image(&self) -> HeapPage {
        HeapPage::new(self.pid, &self.before_image, self.desc.clone())
            .expect("before-image bytes no longer decode")
    }

    /// Re-captures the before-image from the current page state.
    pub fn set_before_image(&mut self) {
        self.before_image = self.get_page_data();
    }

    /// Returns true if slot `i` holds a tuple.
    pub fn is_slot_used(&self, i: usize) -> bool {
        i < self.num_slots && slot_is_set(&self.header, i)
    }

    /// Returns the number of empty slots.
    pub fn num_empty_slots(&self) -> usize {
        (0..self.num_slots).filter(|&i| !self.is_slot_used(i)).count()
    }

    /// Returns the tuple in slot `i`, if occupied.
    pub fn tuple(&self, i: usize) -> Option<&Tuple> {
        if self.is_slot_used(i) {
            self.tuples[i].as_ref()
        } else {
            None
        }
    }

    /// Inserts a tuple into the first unoccupied slot.
    ///
    /// Assigns the tuple's record id and returns it. Fails with
    /// `DescriptorMismatch` on a foreign descriptor and `PageFull` when no
    /// slot is free.
    pub fn insert_tuple(&mut self, mut t: Tuple) -> Result<RecordId> {
        if *t.desc() != self.desc {
            return Err(QuarryError::DescriptorMismatch);
        }
        for slot in 0..self.num_slots {
            if !slot_is_set(&self.header, slot) {
                set_slot(&mut self.header, slot);
                let rid = RecordId::new(PageId::Heap(self.pid), slot as u16);
                t.set_record_id(Some(rid));
                self.tuples[slot] = Some(t);
                return Ok(rid);
            }
        }
        Err(QuarryError::PageFull)
    }

    /// Deletes the tuple named by `t`'s record id.
    ///
    /// Fails with `TupleNotOnPage` if the record id names another page and
    /// `EmptySlot` if the target slot is already clear.
    pub fn delete_tuple(&mut self, t: &Tuple) -> Result<()> {
        let rid = t.record_id().ok_or(QuarryError::TupleNotOnPage)?;
        if rid.page_id != PageId::Heap(self.pid) {
            return Err(QuarryError::TupleNotOnPage);
        }
        let slot = rid.slot as usize;
        if slot >= self.num_slots || !slot_is_set(&self.header, slot) {
            return Err(QuarryError::EmptySlot(rid.slot));
        }
        clear_slot(&mut self.header, slot);
        self.tuples[slot] = None;
        Ok(())
    }

    /// Marks this page dirty or clean, recording the dirtying transaction.
    pub fn mark_dirty(&mut self, dirty: bool, tid: TransactionId) {
        self.dirty = if dirty { Some(tid) } else { None };
    }

    /// Returns the transaction that dirtied this page, if dirty.
    pub fn is_dirty(&self) -> Option<TransactionId> {
        self.dirty
    }

    /// Returns an iterator over occupied slots in ascending order.
    ///
    /// The iterator snapshots tuples at construction; clearing slots
    /// afterwards does not affect it. Create a new iterator to restart.
    pub fn iter(&self) -> HeapPageIter {
        let snapshot = (0..self.num_slots)
            .filter(|&i| self.is_slot_used(i))
            .filter_map(|i| self.tuples[i].clone())
            .collect::<Vec<_>>();
        HeapPageIter {
            tuples: snapshot.into_iter(),
        }
    }
}

/// Snapshot iterator over the tuples of one heap page.
pub struct HeapPageIter {
    tuples: std::vec::IntoIter<Tuple>,
}

impl Iterator for HeapPageIter {
    type Item = Tuple;

    fn next(&mut self) -> Option<Self::Item> {
        self.tuples.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_int_desc() -> TupleDesc {
        TupleDesc::int_fields(2)
    }

    fn empty_page() -> HeapPage {
        HeapPage::new(
            HeapPageId::new(1, 0),
            &HeapPage::create_empty_page_data(),
            two_int_desc(),
        )
        .unwrap()
    }

    #[test]
    fn test_num_slots_two_int() {
        // floor(4096 * 8 / (8 * 8 + 1)) = floor(32768 / 65) = 504
        assert_eq!(HeapPage::num_slots_for(&two_int_desc()), 504);
        assert_eq!(HeapPage::header_size_for(&two_int_desc()), 63);
    }

    #[test]
    fn test_empty_page_all_slots_free() {
        let page = empty_page();
        assert_eq!(page.num_empty_slots(), 504);
        assert!(!page.is_slot_used(0));
    }

    #[test]
    fn test_insert_assigns_record_id() {
        let mut page = empty_page();
        let rid = page.insert_tuple(Tuple::from_ints(&[1, 2])).unwrap();
        assert_eq!(rid.slot, 0);
        assert_eq!(rid.page_id, PageId::Heap(page.id()));
        assert!(page.is_slot_used(0));
        assert_eq!(page.num_empty_slots(), 503);
        assert_eq!(page.tuple(0).unwrap().record_id(), Some(rid));
    }

    #[test]
    fn test_insert_descriptor_mismatch() {
        let mut page = empty_page();
        let result = page.insert_tuple(Tuple::from_ints(&[1, 2, 3]));
        assert!(matches!(result, Err(QuarryError::DescriptorMismatch)));
    }

    #[test]
    fn test_insert_until_full() {
        let mut page = empty_page();
        for i in 0..504 {
            page.insert_tuple(Tuple::from_ints(&[i, i])).unwrap();
        }
        assert_eq!(page.num_empty_slots(), 0);
        let result = page.insert_tuple(Tuple::from_ints(&[0, 0]));
        assert!(matches!(result, Err(QuarryError::PageFull)));
    }

    #[test]
    fn test_delete_tuple() {
        let mut page = empty_page();
        let rid = page.insert_tuple(Tuple::from_ints(&[5, 6])).unwrap();

        let mut t = Tuple::from_ints(&[5, 6]);
        t.set_record_id(Some(rid));
        page.delete_tuple(&t).unwrap();

        assert!(!page.is_slot_used(0));
        assert!(matches!(
            page.delete_tuple(&t),
            Err(QuarryError::EmptySlot(0))
        ));
    }

    #[test]
    fn test_delete_foreign_tuple() {
        let mut page = empty_page();
        page.insert_tuple(Tuple::from_ints(&[1, 2])).unwrap();

        let mut stranger = Tuple::from_ints(&[1, 2]);
        stranger.set_record_id(Some(RecordId::new(
            PageId::Heap(HeapPageId::new(1, 99)),
            0,
        )));
        assert!(matches!(
            page.delete_tuple(&stranger),
            Err(QuarryError::TupleNotOnPage)
        ));

        let unplaced = Tuple::from_ints(&[1, 2]);
        assert!(matches!(
            page.delete_tuple(&unplaced),
            Err(QuarryError::TupleNotOnPage)
        ));
    }

    #[test]
    fn test_slot_reuse_after_delete() {
        let mut page = empty_page();
        let rid0 = page.insert_tuple(Tuple::from_ints(&[0, 0])).unwrap();
        page.insert_tuple(Tuple::from_ints(&[1, 1])).unwrap();

        let mut t = Tuple::from_ints(&[0, 0]);
        t.set_record_id(Some(rid0));
        page.delete_tuple(&t).unwrap();

        let rid2 = page.insert_tuple(Tuple::from_ints(&[2, 2])).unwrap();
        assert_eq!(rid2.slot, 0);
    }

    #[test]
    fn test_round_trip_identity() {
        let mut page = empty_page();
        for i in 0..20 {
            page.insert_tuple(Tuple::from_ints(&[i, i * 10])).unwrap();
        }
        let encoded = page.get_page_data();
        assert_eq!(encoded.len(), PAGE_SIZE);

        let decoded = HeapPage::new(page.id(), &encoded, two_int_desc()).unwrap();
        assert_eq!(decoded.num_empty_slots(), page.num_empty_slots());
        for i in 0..504 {
            assert_eq!(decoded.is_slot_used(i), page.is_slot_used(i));
        }
        assert_eq!(decoded.get_page_data(), encoded);
    }

    #[test]
    fn test_bitmap_is_lsb_first() {
        let mut page = empty_page();
        page.insert_tuple(Tuple::from_ints(&[1, 1])).unwrap();
        let data = page.get_page_data();
        assert_eq!(data[0] & 0x01, 0x01);
    }

    #[test]
    fn test_before_image() {
        let mut page = empty_page();
        page.insert_tuple(Tuple::from_ints(&[1, 2])).unwrap();

        // The image was captured before the insert.
        let image = page.before_image();
        assert_eq!(image.num_empty_slots(), 504);

        page.set_before_image();
        let image = page.before_image();
        assert_eq!(image.num_empty_slots(), 503);
    }

    #[test]
    fn test_iterator_skips_empty_slots() {
        let mut page = empty_page();
        let mut rids = Vec::new();
        for i in 0..5 {
            rids.push(page.insert_tuple(Tuple::from_ints(&[i, i])).unwrap());
        }
        let mut victim = Tuple::from_ints(&[2, 2]);
        victim.set_record_id(Some(rids[2]));
        page.delete_tuple(&victim).unwrap();

        let collected: Vec<Tuple> = page.iter().collect();
        assert_eq!(collected.len(), 4);
        assert!(!collected.contains(&Tuple::from_ints(&[2, 2])));
    }

    #[test]
    fn test_iterator_is_snapshot() {
        let mut page = empty_page();
        let rid = page.insert_tuple(Tuple::from_ints(&[7, 7])).unwrap();

        let mut iter = page.iter();
        let mut t = Tuple::from_ints(&[7, 7]);
        t.set_record_id(Some(rid));
        page.delete_tuple(&t).unwrap();

        // The snapshot still yields the tuple that was live at creation.
        assert_eq!(iter.next(), Some(Tuple::from_ints(&[7, 7])));
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn test_dirty_tracking() {
        let mut page = empty_page();
        assert!(page.is_dirty().is_none());

        let tid = TransactionId::new();
        page.mark_dirty(true, tid);
        assert_eq!(page.is_dirty(), Some(tid));

        page.mark_dirty(false, tid);
        assert!(page.is_dirty().is_none());
    }

    #[test]
    fn test_decode_rejects_wrong_size() {
        let result = HeapPage::new(HeapPageId::new(1, 0), &[0u8; 100], two_int_desc());
        assert!(matches!(result, Err(QuarryError::ShortRead { .. })));
    }
}
