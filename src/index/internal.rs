//! Internal (router) pages.
//!
//! Layout from offset 0:
//!
//! ```text
//! left_child (u32) | key_1 | child_1 (u32) | key_2 | child_2 (u32) | ...
//! ```
//!
//! The counter in the shared header counts keys; children = keys + 1. A
//! key routes every search value that is ≥ it and < the following key.

use std::cmp::Ordering;

use byteorder::{ByteOrder, LittleEndian};

use crate::errors::DbError;
use crate::index::file::IndexFile;
use crate::index::page::{
    self, compare_keys, key_len, KeyType, PageHeader, PageKind, CHILD_PTR_LEN, SHARED_HEADER_LEN,
};
use crate::paged_file::PAGE_SIZE;

const PAYLOAD_END: usize = PAGE_SIZE - SHARED_HEADER_LEN;

#[derive(Debug)]
pub(crate) struct InternalPage {
    pub page_no: u32,
    buf: Vec<u8>,
    pub free_ptr: u16,
    pub counter: u16,
    pub parent: u32,
}

impl InternalPage {
    /// A new root created by a child split: one key, two children.
    pub fn new_root(page_no: u32, left: u32, key: &[u8], right: u32, key_type: KeyType) -> Self {
        let mut buf = vec![0u8; PAGE_SIZE];
        let klen = key_len(key, key_type);
        LittleEndian::write_u32(&mut buf[..4], left);
        buf[4..4 + klen].copy_from_slice(key);
        LittleEndian::write_u32(&mut buf[4 + klen..8 + klen], right);
        Self {
            page_no,
            buf,
            free_ptr: (8 + klen) as u16,
            counter: 1,
            parent: page::NULL_PAGE,
        }
    }

    pub fn from_buf(page_no: u32, buf: Vec<u8>) -> Result<Self, DbError> {
        let header = page::read_header(&buf)?;
        if header.kind != PageKind::Internal {
            return Err(DbError::Corrupt(format!("page {page_no} is not internal")));
        }
        Ok(Self {
            page_no,
            buf,
            free_ptr: header.free_ptr,
            counter: header.counter,
            parent: header.parent,
        })
    }

    pub fn load(file: &mut IndexFile, page_no: u32) -> Result<Self, DbError> {
        let buf = file.read_page(page_no)?;
        Self::from_buf(page_no, buf)
    }

    pub fn save(&mut self, file: &mut IndexFile) -> Result<(), DbError> {
        page::write_header(
            &mut self.buf,
            &PageHeader {
                kind: PageKind::Internal,
                free_ptr: self.free_ptr,
                counter: self.counter,
                parent: self.parent,
            },
        );
        file.write_page(self.page_no, &self.buf)
    }

    pub fn first_child(&self) -> u32 {
        LittleEndian::read_u32(&self.buf[..4])
    }

    /// Child to descend into for `key`: the rightmost child whose router
    /// key is ≤ the search key (equality routes right).
    pub fn route(&self, key: &[u8], key_type: KeyType) -> u32 {
        self.route_by(key, key_type, |ord| ord == Ordering::Less)
    }

    /// Leftmost child that can contain `key`: equality stops the descent,
    /// because entries equal to a separator may still sit in the left
    /// subtree (duplicates are split by RID, which routers do not carry).
    pub fn route_low(&self, key: &[u8], key_type: KeyType) -> u32 {
        self.route_by(key, key_type, |ord| ord != Ordering::Greater)
    }

    fn route_by(&self, key: &[u8], key_type: KeyType, stop: impl Fn(Ordering) -> bool) -> u32 {
        let mut child = self.first_child();
        let mut pos = 4;
        for _ in 0..self.counter {
            let klen = key_len(&self.buf[pos..], key_type);
            if stop(compare_keys(key, &self.buf[pos..pos + klen], key_type)) {
                break;
            }
            child = LittleEndian::read_u32(&self.buf[pos + klen..]);
            pos += klen + CHILD_PTR_LEN;
        }
        child
    }

    pub fn free_space(&self) -> usize {
        PAYLOAD_END - self.free_ptr as usize
    }

    pub fn has_room(&self, key: &[u8], key_type: KeyType) -> bool {
        self.free_space() >= key_len(key, key_type) + CHILD_PTR_LEN
    }

    /// Insert a router `key -> right_child` keeping keys sorted. Equal keys
    /// land after their duplicates.
    pub fn insert_router(
        &mut self,
        key: &[u8],
        right_child: u32,
        key_type: KeyType,
    ) -> Result<(), DbError> {
        let klen = key_len(key, key_type);
        let entry_len = klen + CHILD_PTR_LEN;
        if self.free_space() < entry_len {
            return Err(DbError::NotEnoughSpace(entry_len));
        }

        let mut pos = 4;
        for _ in 0..self.counter {
            let cur_len = key_len(&self.buf[pos..], key_type);
            if compare_keys(key, &self.buf[pos..pos + cur_len], key_type) == Ordering::Less {
                break;
            }
            pos += cur_len + CHILD_PTR_LEN;
        }

        if pos < self.free_ptr as usize {
            self.buf
                .copy_within(pos..self.free_ptr as usize, pos + entry_len);
        }
        self.buf[pos..pos + klen].copy_from_slice(key);
        LittleEndian::write_u32(&mut self.buf[pos + klen..pos + klen + 4], right_child);
        self.free_ptr += entry_len as u16;
        self.counter += 1;
        Ok(())
    }

    /// Materialize the payload as `(first_child, [(key, right_child)])`.
    pub fn entries(&self, key_type: KeyType) -> (u32, Vec<(Vec<u8>, u32)>) {
        let mut out = Vec::with_capacity(self.counter as usize);
        let mut pos = 4;
        for _ in 0..self.counter {
            let klen = key_len(&self.buf[pos..], key_type);
            let key = self.buf[pos..pos + klen].to_vec();
            let child = LittleEndian::read_u32(&self.buf[pos + klen..]);
            out.push((key, child));
            pos += klen + CHILD_PTR_LEN;
        }
        (self.first_child(), out)
    }

    pub fn children(&self, key_type: KeyType) -> Vec<u32> {
        let (first, entries) = self.entries(key_type);
        let mut out = vec![first];
        out.extend(entries.iter().map(|(_, child)| *child));
        out
    }

    fn rebuild(&mut self, first_child: u32, entries: &[(Vec<u8>, u32)]) {
        self.buf[..PAYLOAD_END].fill(0);
        LittleEndian::write_u32(&mut self.buf[..4], first_child);
        let mut pos = 4;
        for (key, child) in entries {
            self.buf[pos..pos + key.len()].copy_from_slice(key);
            LittleEndian::write_u32(&mut self.buf[pos + key.len()..pos + key.len() + 4], *child);
            pos += key.len() + CHILD_PTR_LEN;
        }
        self.free_ptr = pos as u16;
        self.counter = entries.len() as u16;
    }

    /// Split a full router page while adding `key -> right_child`. The
    /// middle key is promoted (it appears in neither half); the children
    /// handed to the new right page are re-parented.
    pub fn split_insert(
        &mut self,
        file: &mut IndexFile,
        key: &[u8],
        right_child: u32,
        key_type: KeyType,
    ) -> Result<(Vec<u8>, u32), DbError> {
        let (first_child, mut entries) = self.entries(key_type);
        let insert_at = entries
            .iter()
            .position(|(k, _)| compare_keys(key, k, key_type) == Ordering::Less)
            .unwrap_or(entries.len());
        entries.insert(insert_at, (key.to_vec(), right_child));

        let mid = entries.len() / 2;
        let (promoted_key, right_first_child) = entries[mid].clone();
        let right_entries: Vec<_> = entries[mid + 1..].to_vec();
        let left_entries: Vec<_> = entries[..mid].to_vec();

        let new_page_no = file.append_page()?;
        let mut right = InternalPage {
            page_no: new_page_no,
            buf: vec![0u8; PAGE_SIZE],
            free_ptr: 0,
            counter: 0,
            parent: self.parent,
        };
        right.rebuild(right_first_child, &right_entries);
        self.rebuild(first_child, &left_entries);

        self.save(file)?;
        right.save(file)?;

        for child in right.children(key_type) {
            super::set_page_parent(file, child, new_page_no)?;
        }
        Ok((promoted_key, new_page_no))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_key(v: i32) -> [u8; 4] {
        v.to_le_bytes()
    }

    fn page_with_keys(keys: &[i32]) -> InternalPage {
        // children are 100, 101, 102, ... left to right
        let mut page = InternalPage::new_root(1, 100, &int_key(keys[0]), 101, KeyType::Int);
        for (i, key) in keys.iter().enumerate().skip(1) {
            page.insert_router(&int_key(*key), 102 + (i as u32 - 1), KeyType::Int)
                .unwrap();
        }
        page
    }

    #[test]
    fn route_picks_half_open_ranges() {
        let page = page_with_keys(&[10, 20]);
        assert_eq!(page.route(&int_key(5), KeyType::Int), 100);
        assert_eq!(page.route(&int_key(10), KeyType::Int), 101); // equality goes right
        assert_eq!(page.route(&int_key(15), KeyType::Int), 101);
        assert_eq!(page.route(&int_key(20), KeyType::Int), 102);
        assert_eq!(page.route(&int_key(99), KeyType::Int), 102);
    }

    #[test]
    fn route_low_stops_at_equal_separator() {
        let page = page_with_keys(&[10, 20]);
        assert_eq!(page.route_low(&int_key(10), KeyType::Int), 100);
        assert_eq!(page.route_low(&int_key(11), KeyType::Int), 101);
    }

    #[test]
    fn insert_router_keeps_keys_sorted() {
        let mut page = InternalPage::new_root(1, 100, &int_key(20), 101, KeyType::Int);
        page.insert_router(&int_key(10), 102, KeyType::Int).unwrap();
        page.insert_router(&int_key(30), 103, KeyType::Int).unwrap();
        let (first, entries) = page.entries(KeyType::Int);
        assert_eq!(first, 100);
        let keys: Vec<i32> = entries
            .iter()
            .map(|(k, _)| LittleEndian::read_i32(k))
            .collect();
        assert_eq!(keys, vec![10, 20, 30]);
        assert_eq!(page.children(KeyType::Int), vec![100, 102, 101, 103]);
    }
}
