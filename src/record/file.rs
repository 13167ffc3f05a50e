//! Record-level operations over one paged file.
//!
//! Thin orchestration over [`PagedFile`], the record codec and
//! [`RecordPage`]: placement policy for inserts, forwarding-pointer chains
//! for reads/updates/deletes, and attribute projection.

use std::path::Path;

use log::{debug, error};

use crate::errors::DbError;
use crate::paged_file::{PagedFile, PAGE_SIZE};
use crate::record::codec::{self, RECORD_MIN_LEN};
use crate::record::page::RecordPage;
use crate::record::scan::{RecordScan, ScanState};
use crate::schema::{Attribute, CompOp, Rid};

#[derive(Debug)]
pub struct RecordFile {
    pub(crate) file: PagedFile,
}

impl RecordFile {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<(), DbError> {
        PagedFile::create(path)
    }

    pub fn destroy<P: AsRef<Path>>(path: P) -> Result<(), DbError> {
        PagedFile::destroy(path)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        Ok(Self {
            file: PagedFile::open(path)?,
        })
    }

    pub fn close(self) -> Result<(), DbError> {
        self.file.close()
    }

    pub fn num_pages(&self) -> u32 {
        self.file.num_pages()
    }

    pub fn counters(&self) -> (u32, u32, u32) {
        self.file.counters()
    }

    pub fn insert_record(&mut self, attrs: &[Attribute], data: &[u8]) -> Result<Rid, DbError> {
        self.insert_record_versioned(attrs, data, 0)
    }

    pub fn insert_record_versioned(
        &mut self,
        attrs: &[Attribute],
        data: &[u8],
        version: u8,
    ) -> Result<Rid, DbError> {
        let record = codec::encode_tuple(data, attrs, version)?;
        let mut page = self.find_avail_page(record.len())?;
        let slot = page.insert(&record)?;
        page.save(&mut self.file)?;
        Ok(Rid::new(page.page_no(), slot))
    }

    /// Placement policy: the last page is the hot page; failing that, a
    /// linear scan finds the first page with a reclaimed hole; failing
    /// that, a new page is appended. The linear scan is O(pages) per
    /// insert after heavy deletion, which is accepted here.
    fn find_avail_page(&mut self, record_len: usize) -> Result<RecordPage, DbError> {
        let pages = self.file.num_pages();
        if pages > 0 {
            let last = RecordPage::load(&mut self.file, pages - 1)?;
            if last.has_room_for(record_len) {
                return Ok(last);
            }
            for page_no in 0..pages - 1 {
                let page = RecordPage::load(&mut self.file, page_no)?;
                if page.has_room_for(record_len) {
                    return Ok(page);
                }
            }
        }
        let page_no = self.file.append_page(&[0u8; PAGE_SIZE])?;
        debug!("appended record page {page_no}");
        Ok(RecordPage::new_blank(page_no))
    }

    /// Follow the forwarding chain from `rid` to the RID holding the real
    /// record. Bounded by the page count; a longer chain is corruption.
    fn resolve(&mut self, rid: Rid) -> Result<Rid, DbError> {
        if rid.page >= self.file.num_pages() {
            return Err(DbError::PageNotExist(rid.page));
        }
        let mut cur = rid;
        for _ in 0..=self.file.num_pages() {
            let page = RecordPage::load(&mut self.file, cur.page)?;
            if !page.is_readable(cur.slot) {
                return Err(DbError::SlotNotExistOrDeleted(cur.slot));
            }
            if !page.is_pointer(cur.slot) {
                return Ok(cur);
            }
            cur = page.pointer_target(cur.slot)?;
            if cur.page >= self.file.num_pages() {
                break;
            }
        }
        error!("forwarding chain from ({}, {}) has no terminal", rid.page, rid.slot);
        Err(DbError::RecordNotFound(rid.page, rid.slot))
    }

    pub fn read_record(&mut self, attrs: &[Attribute], rid: Rid) -> Result<Vec<u8>, DbError> {
        let all: Vec<usize> = (0..attrs.len()).collect();
        self.read_record_selected(attrs, &all, rid)
    }

    /// Read with projection: `selected` holds indices into `attrs`; the
    /// output bitmap covers only the projected attributes.
    pub fn read_record_selected(
        &mut self,
        attrs: &[Attribute],
        selected: &[usize],
        rid: Rid,
    ) -> Result<Vec<u8>, DbError> {
        let target = self.resolve(rid)?;
        let page = RecordPage::load(&mut self.file, target.page)?;
        let record = page.read_record(target.slot)?;
        Ok(codec::decode_record(record, attrs, selected))
    }

    pub fn read_attribute(
        &mut self,
        attrs: &[Attribute],
        rid: Rid,
        name: &str,
    ) -> Result<Vec<u8>, DbError> {
        let index = attrs
            .iter()
            .position(|a| a.name == name)
            .ok_or_else(|| DbError::AttributeNotExist(name.to_string()))?;
        self.read_record_selected(attrs, &[index], rid)
    }

    /// Schema version stamped into the record when it was written.
    pub fn read_record_version(&mut self, rid: Rid) -> Result<u8, DbError> {
        let target = self.resolve(rid)?;
        let page = RecordPage::load(&mut self.file, target.page)?;
        Ok(codec::record_version(page.read_record(target.slot)?))
    }

    pub fn update_record(
        &mut self,
        attrs: &[Attribute],
        data: &[u8],
        rid: Rid,
    ) -> Result<(), DbError> {
        self.update_record_versioned(attrs, data, 0, rid)
    }

    pub fn update_record_versioned(
        &mut self,
        attrs: &[Attribute],
        data: &[u8],
        version: u8,
        rid: Rid,
    ) -> Result<(), DbError> {
        let target = self.resolve(rid)?;
        let record = codec::encode_tuple(data, attrs, version)?;
        let stored_len = record.len().max(RECORD_MIN_LEN);

        let mut page = RecordPage::load(&mut self.file, target.page)?;
        let old_len = page.record_len(target.slot) as usize;

        if stored_len <= old_len || (stored_len - old_len) as i32 <= page.free_space() {
            page.update(target.slot, &record)?;
            page.save(&mut self.file)?;
            return Ok(());
        }

        // Does not fit here: insert on another page and leave a forwarding
        // pointer behind. The placement search cannot pick this page again
        // because the full record needs strictly more room than the grow did.
        let mut dest = self.find_avail_page(record.len())?;
        debug_assert_ne!(dest.page_no(), target.page);
        let slot = dest.insert(&record)?;
        let new_rid = Rid::new(dest.page_no(), slot);
        dest.save(&mut self.file)?;
        debug!(
            "record ({}, {}) relocated to ({}, {})",
            target.page, target.slot, new_rid.page, new_rid.slot
        );
        page.convert_to_pointer(target.slot, new_rid, version)?;
        page.save(&mut self.file)?;
        Ok(())
    }

    /// Delete the logical row: every forwarding pointer along the chain is
    /// removed together with the terminal record.
    pub fn delete_record(&mut self, rid: Rid) -> Result<(), DbError> {
        if rid.page >= self.file.num_pages() {
            return Err(DbError::PageNotExist(rid.page));
        }
        let mut cur = rid;
        for _ in 0..=self.file.num_pages() {
            let mut page = RecordPage::load(&mut self.file, cur.page)?;
            if !page.is_readable(cur.slot) {
                return Err(DbError::SlotNotExistOrDeleted(cur.slot));
            }
            if page.is_pointer(cur.slot) {
                let next = page.pointer_target(cur.slot)?;
                page.delete(cur.slot)?;
                page.save(&mut self.file)?;
                cur = next;
                if cur.page >= self.file.num_pages() {
                    break;
                }
            } else {
                page.delete(cur.slot)?;
                page.save(&mut self.file)?;
                return Ok(());
            }
        }
        Err(DbError::RecordNotFound(rid.page, rid.slot))
    }

    /// Iterate over records matching `op` against `condition_attr`,
    /// projecting `projection` (attribute names). `value` is in API value
    /// format and may be `None` for [`CompOp::NoOp`].
    pub fn scan(
        &mut self,
        attrs: &[Attribute],
        condition_attr: &str,
        op: CompOp,
        value: Option<&[u8]>,
        projection: &[String],
    ) -> Result<RecordScan<'_>, DbError> {
        let state = ScanState::open(attrs, condition_attr, op, value, projection)?;
        Ok(RecordScan::new(self, state))
    }
}
