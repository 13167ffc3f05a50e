//! Slotted record page.
//!
//! Page trailer layout (offsets from page start):
//!
//! ```text
//! PAGE_SIZE - 4: slot_counter (i16)
//! PAGE_SIZE - 2: free_byte_pointer (i16)
//! ```
//!
//! Slot `i` (1-indexed) lives at `PAGE_SIZE - 4 - 4*i` and holds the record
//! offset (i16, -1 when tombstoned) followed by the record length (i16).
//! Record bytes grow up from offset 0; the slot directory grows down from
//! the trailer. A zeroed page parses as an empty page.

use byteorder::{ByteOrder, LittleEndian};

use crate::errors::DbError;
use crate::paged_file::{PagedFile, PAGE_SIZE};
use crate::record::codec::{self, RECORD_MIN_LEN};
use crate::schema::Rid;

const SLOT_COUNTER_OFFSET: usize = PAGE_SIZE - 4;
const FREE_PTR_OFFSET: usize = PAGE_SIZE - 2;
const TRAILER_LEN: i32 = 4;
const SLOT_LEN: usize = 4;
const TOMBSTONE_OFFSET: i16 = -1;

#[derive(Debug)]
pub(crate) struct RecordPage {
    page_no: u32,
    buf: Vec<u8>,
    free_ptr: i16,
    slot_count: i16,
}

impl RecordPage {
    pub fn load(file: &mut PagedFile, page_no: u32) -> Result<Self, DbError> {
        let buf = file.read_page(page_no)?;
        let slot_count = LittleEndian::read_i16(&buf[SLOT_COUNTER_OFFSET..]);
        let free_ptr = LittleEndian::read_i16(&buf[FREE_PTR_OFFSET..]);
        Ok(Self {
            page_no,
            buf,
            free_ptr,
            slot_count,
        })
    }

    /// A freshly appended page: all zeroes, which is already a valid empty page.
    pub fn new_blank(page_no: u32) -> Self {
        Self {
            page_no,
            buf: vec![0u8; PAGE_SIZE],
            free_ptr: 0,
            slot_count: 0,
        }
    }

    pub fn save(&self, file: &mut PagedFile) -> Result<(), DbError> {
        file.write_page(self.page_no, &self.buf)
    }

    pub fn page_no(&self) -> u32 {
        self.page_no
    }

    pub fn slot_count(&self) -> u16 {
        self.slot_count as u16
    }

    fn slot_offset(&self, slot: u16) -> usize {
        SLOT_COUNTER_OFFSET - SLOT_LEN * slot as usize
    }

    fn record_offset(&self, slot: u16) -> i16 {
        LittleEndian::read_i16(&self.buf[self.slot_offset(slot)..])
    }

    pub fn record_len(&self, slot: u16) -> i16 {
        LittleEndian::read_i16(&self.buf[self.slot_offset(slot) + 2..])
    }

    fn set_slot(&mut self, slot: u16, offset: i16, len: i16) {
        let pos = self.slot_offset(slot);
        LittleEndian::write_i16(&mut self.buf[pos..pos + 2], offset);
        LittleEndian::write_i16(&mut self.buf[pos + 2..pos + 4], len);
    }

    fn set_free_ptr(&mut self, value: i16) {
        self.free_ptr = value;
        LittleEndian::write_i16(&mut self.buf[FREE_PTR_OFFSET..FREE_PTR_OFFSET + 2], value);
    }

    fn set_slot_count(&mut self, value: i16) {
        self.slot_count = value;
        LittleEndian::write_i16(
            &mut self.buf[SLOT_COUNTER_OFFSET..SLOT_COUNTER_OFFSET + 2],
            value,
        );
    }

    pub fn is_deleted(&self, slot: u16) -> bool {
        self.record_offset(slot) < 0
    }

    pub fn is_readable(&self, slot: u16) -> bool {
        slot >= 1 && slot <= self.slot_count as u16 && !self.is_deleted(slot)
    }

    pub fn is_pointer(&self, slot: u16) -> bool {
        codec::is_pointer(&self.buf[self.record_offset(slot) as usize..])
    }

    pub fn read_record(&self, slot: u16) -> Result<&[u8], DbError> {
        if !self.is_readable(slot) {
            return Err(DbError::SlotNotExistOrDeleted(slot));
        }
        let offset = self.record_offset(slot) as usize;
        let len = self.record_len(slot) as usize;
        Ok(&self.buf[offset..offset + len])
    }

    pub fn pointer_target(&self, slot: u16) -> Result<Rid, DbError> {
        Ok(codec::pointer_target(self.read_record(slot)?))
    }

    /// Space left between the record area, the slot directory and the trailer.
    pub fn free_space(&self) -> i32 {
        PAGE_SIZE as i32
            - self.free_ptr as i32
            - (self.slot_count as i32) * SLOT_LEN as i32
            - TRAILER_LEN
    }

    /// Room for one more record of `record_len` bytes plus its slot. The
    /// slot is counted even when a tombstoned slot would be reused.
    pub fn has_room_for(&self, record_len: usize) -> bool {
        let stored = record_len.max(RECORD_MIN_LEN);
        self.free_space() >= (stored + SLOT_LEN) as i32
    }

    pub fn insert(&mut self, record: &[u8]) -> Result<u16, DbError> {
        if !self.has_room_for(record.len()) {
            return Err(DbError::NotEnoughSpace(record.len()));
        }
        let stored_len = record.len().max(RECORD_MIN_LEN);
        let slot = self.take_slot();
        let offset = self.free_ptr as usize;
        self.buf[offset..offset + record.len()].copy_from_slice(record);
        self.buf[offset + record.len()..offset + stored_len].fill(0);
        self.set_slot(slot, offset as i16, stored_len as i16);
        self.set_free_ptr(self.free_ptr + stored_len as i16);
        Ok(slot)
    }

    /// Lowest tombstoned slot, or a brand-new one.
    fn take_slot(&mut self) -> u16 {
        for slot in 1..=self.slot_count as u16 {
            if self.is_deleted(slot) {
                return slot;
            }
        }
        self.set_slot_count(self.slot_count + 1);
        self.slot_count as u16
    }

    pub fn delete(&mut self, slot: u16) -> Result<(), DbError> {
        if slot == 0 || slot > self.slot_count as u16 {
            return Err(DbError::SlotNotExistOrDeleted(slot));
        }
        if self.is_deleted(slot) {
            return Ok(());
        }
        let offset = self.record_offset(slot);
        let len = self.record_len(slot);
        self.shift_left((offset + len) as usize, len as usize);
        self.set_slot(slot, TOMBSTONE_OFFSET, 0);
        Ok(())
    }

    /// Rewrite a record in place. The caller has already established that
    /// the new length fits on this page.
    pub fn update(&mut self, slot: u16, record: &[u8]) -> Result<(), DbError> {
        if !self.is_readable(slot) {
            return Err(DbError::SlotNotExistOrDeleted(slot));
        }
        let offset = self.record_offset(slot) as usize;
        let old_len = self.record_len(slot) as usize;
        let stored_len = record.len().max(RECORD_MIN_LEN);

        if stored_len <= old_len {
            self.shift_left(offset + old_len, old_len - stored_len);
        } else {
            self.shift_right(offset + old_len, stored_len - old_len);
        }
        self.buf[offset..offset + record.len()].copy_from_slice(record);
        self.buf[offset + record.len()..offset + stored_len].fill(0);
        self.set_slot(slot, offset as i16, stored_len as i16);
        Ok(())
    }

    /// Replace a record with the 8-byte forwarding-pointer form and reclaim
    /// the freed bytes.
    pub fn convert_to_pointer(
        &mut self,
        slot: u16,
        target: Rid,
        version: u8,
    ) -> Result<(), DbError> {
        if !self.is_readable(slot) {
            return Err(DbError::SlotNotExistOrDeleted(slot));
        }
        let offset = self.record_offset(slot) as usize;
        let old_len = self.record_len(slot) as usize;
        let pointer = codec::pointer_record(version, target);
        self.buf[offset..offset + RECORD_MIN_LEN].copy_from_slice(&pointer);
        self.set_slot(slot, offset as i16, RECORD_MIN_LEN as i16);
        self.shift_left(offset + old_len, old_len - RECORD_MIN_LEN);
        Ok(())
    }

    /// Next slot after `after` holding a live, non-pointer record.
    pub fn next_live_slot(&self, after: u16) -> Option<u16> {
        ((after + 1)..=self.slot_count as u16)
            .find(|&slot| !self.is_deleted(slot) && !self.is_pointer(slot))
    }

    /// Shift everything in `[start, free_ptr)` left by `dist` and fix up
    /// the slots pointing past the gap. Copies are overlap-safe.
    fn shift_left(&mut self, start: usize, dist: usize) {
        if dist == 0 {
            return;
        }
        let len = self.free_ptr as usize - start;
        if len > 0 {
            self.buf.copy_within(start..start + len, start - dist);
            self.fix_slots(start as i16, -(dist as i16));
        }
        self.set_free_ptr(self.free_ptr - dist as i16);
    }

    fn shift_right(&mut self, start: usize, dist: usize) {
        if dist == 0 {
            return;
        }
        let len = self.free_ptr as usize - start;
        if len > 0 {
            self.buf.copy_within(start..start + len, start + dist);
            self.fix_slots(start as i16, dist as i16);
        }
        self.set_free_ptr(self.free_ptr + dist as i16);
    }

    fn fix_slots(&mut self, start: i16, delta: i16) {
        for slot in 1..=self.slot_count as u16 {
            let offset = self.record_offset(slot);
            // Tombstones are negative and never match.
            if offset >= start {
                let len = self.record_len(slot);
                self.set_slot(slot, offset + delta, len);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_read_back() {
        let mut page = RecordPage::new_blank(0);
        let slot = page.insert(b"0123456789").unwrap();
        assert_eq!(slot, 1);
        assert_eq!(page.read_record(1).unwrap(), b"0123456789");
        assert_eq!(page.slot_count(), 1);
    }

    #[test]
    fn short_records_are_padded_on_disk() {
        let mut page = RecordPage::new_blank(0);
        let slot = page.insert(b"abc").unwrap();
        assert_eq!(page.record_len(slot) as usize, RECORD_MIN_LEN);
        assert_eq!(&page.read_record(slot).unwrap()[..3], b"abc");
    }

    #[test]
    fn delete_compacts_and_tombstones() {
        let mut page = RecordPage::new_blank(0);
        let s1 = page.insert(&[b'a'; 16]).unwrap();
        let s2 = page.insert(&[b'b'; 16]).unwrap();
        let s3 = page.insert(&[b'c'; 16]).unwrap();

        page.delete(s2).unwrap();
        assert!(page.is_deleted(s2));
        assert!(page.read_record(s2).is_err());
        // Later records moved left, slots still resolve.
        assert_eq!(page.read_record(s1).unwrap(), &[b'a'; 16]);
        assert_eq!(page.read_record(s3).unwrap(), &[b'c'; 16]);
        assert_eq!(page.free_ptr, 32);

        // Deleting twice is a no-op, deleting a missing slot is an error.
        page.delete(s2).unwrap();
        assert!(page.delete(9).is_err());
    }

    #[test]
    fn reinsert_reuses_lowest_tombstone() {
        let mut page = RecordPage::new_blank(0);
        let s1 = page.insert(&[b'a'; 16]).unwrap();
        let _s2 = page.insert(&[b'b'; 16]).unwrap();
        page.delete(s1).unwrap();
        let s3 = page.insert(&[b'c'; 16]).unwrap();
        assert_eq!(s3, s1);
        assert_eq!(page.slot_count(), 2);
    }

    #[test]
    fn update_shrink_and_grow_in_place() {
        let mut page = RecordPage::new_blank(0);
        let s1 = page.insert(&[b'a'; 20]).unwrap();
        let s2 = page.insert(&[b'b'; 20]).unwrap();

        page.update(s1, &[b'x'; 12]).unwrap();
        assert_eq!(page.read_record(s1).unwrap(), &[b'x'; 12]);
        assert_eq!(page.read_record(s2).unwrap(), &[b'b'; 20]);

        page.update(s1, &[b'y'; 30]).unwrap();
        assert_eq!(page.read_record(s1).unwrap(), &[b'y'; 30]);
        assert_eq!(page.read_record(s2).unwrap(), &[b'b'; 20]);
    }

    #[test]
    fn convert_to_pointer_shrinks_record() {
        let mut page = RecordPage::new_blank(0);
        let s1 = page.insert(&[b'a'; 40]).unwrap();
        let s2 = page.insert(&[b'b'; 16]).unwrap();
        let free_before = page.free_ptr;

        page.convert_to_pointer(s1, Rid::new(5, 2), 0).unwrap();
        assert!(page.is_pointer(s1));
        assert_eq!(page.pointer_target(s1).unwrap(), Rid::new(5, 2));
        assert_eq!(page.read_record(s2).unwrap(), &[b'b'; 16]);
        assert_eq!(page.free_ptr, free_before - (40 - RECORD_MIN_LEN as i16));
    }

    #[test]
    fn free_space_accounts_for_slots_and_trailer() {
        let mut page = RecordPage::new_blank(0);
        assert_eq!(page.free_space(), PAGE_SIZE as i32 - 4);
        page.insert(&[b'a'; 16]).unwrap();
        assert_eq!(page.free_space(), PAGE_SIZE as i32 - 4 - 16 - 4);
    }

    #[test]
    fn page_full_is_reported() {
        let mut page = RecordPage::new_blank(0);
        let max = PAGE_SIZE - TRAILER_LEN as usize - SLOT_LEN;
        assert!(matches!(
            page.insert(&vec![b'x'; max + 1]),
            Err(DbError::NotEnoughSpace(_))
        ));
        let slot = page.insert(&vec![b'x'; max]).unwrap();
        assert_eq!(page.free_space(), 0);
        assert_eq!(page.read_record(slot).unwrap().len(), max);
    }

    #[test]
    fn next_live_slot_skips_tombstones() {
        let mut page = RecordPage::new_blank(0);
        let s1 = page.insert(&[b'a'; 16]).unwrap();
        let s2 = page.insert(&[b'b'; 16]).unwrap();
        let s3 = page.insert(&[b'c'; 16]).unwrap();
        page.delete(s2).unwrap();

        assert_eq!(page.next_live_slot(0), Some(s1));
        assert_eq!(page.next_live_slot(s1), Some(s3));
        assert_eq!(page.next_live_slot(s3), None);
    }
}
