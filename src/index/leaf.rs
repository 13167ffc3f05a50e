//! Leaf pages.
//!
//! Entries are packed from offset 0 and kept sorted by composite
//! `(key, rid)`:
//!
//! ```text
//! key | rid.page (u32) | rid.slot (u16)
//! ```
//!
//! The right-sibling pointer sits at `PAGE_SIZE - 16`, directly below the
//! shared header, so the usable payload ends there.

use crate::errors::DbError;
use crate::index::file::IndexFile;
use crate::index::page::{
    self, compare_composite, compare_keys, key_len, read_rid, write_rid, KeyType, PageHeader,
    PageKind, NEXT_PTR_OFFSET, RID_LEN,
};
use crate::paged_file::PAGE_SIZE;
use crate::schema::Rid;

use byteorder::{ByteOrder, LittleEndian};
use std::cmp::Ordering;

#[derive(Debug)]
pub(crate) struct LeafPage {
    pub page_no: u32,
    buf: Vec<u8>,
    pub free_ptr: u16,
    pub counter: u16,
    pub parent: u32,
    pub next: u32,
}

impl LeafPage {
    pub fn new_blank(page_no: u32, parent: u32, next: u32) -> Self {
        Self {
            page_no,
            buf: vec![0u8; PAGE_SIZE],
            free_ptr: 0,
            counter: 0,
            parent,
            next,
        }
    }

    /// Split target: a fresh leaf seeded with the upper half of a sibling.
    fn from_parts(page_no: u32, parent: u32, next: u32, entries: &[u8], counter: u16) -> Self {
        let mut leaf = Self::new_blank(page_no, parent, next);
        leaf.buf[..entries.len()].copy_from_slice(entries);
        leaf.free_ptr = entries.len() as u16;
        leaf.counter = counter;
        leaf
    }

    pub fn from_buf(page_no: u32, buf: Vec<u8>) -> Result<Self, DbError> {
        let header = page::read_header(&buf)?;
        if header.kind != PageKind::Leaf {
            return Err(DbError::Corrupt(format!("page {page_no} is not a leaf")));
        }
        let next = LittleEndian::read_u32(&buf[NEXT_PTR_OFFSET..]);
        Ok(Self {
            page_no,
            buf,
            free_ptr: header.free_ptr,
            counter: header.counter,
            parent: header.parent,
            next,
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
                kind: PageKind::Leaf,
                free_ptr: self.free_ptr,
                counter: self.counter,
                parent: self.parent,
            },
        );
        LittleEndian::write_u32(
            &mut self.buf[NEXT_PTR_OFFSET..NEXT_PTR_OFFSET + 4],
            self.next,
        );
        file.write_page(self.page_no, &self.buf)
    }

    pub fn is_empty(&self) -> bool {
        self.counter == 0
    }

    pub fn free_space(&self) -> usize {
        NEXT_PTR_OFFSET - self.free_ptr as usize
    }

    pub fn has_room(&self, key: &[u8], key_type: KeyType) -> bool {
        self.free_space() >= self.entry_len(key, key_type)
    }

    fn entry_len(&self, key: &[u8], key_type: KeyType) -> usize {
        key_len(key, key_type) + RID_LEN
    }

    pub fn entry_len_at(&self, pos: usize, key_type: KeyType) -> usize {
        key_len(&self.buf[pos..], key_type) + RID_LEN
    }

    pub fn key_at(&self, pos: usize, key_type: KeyType) -> &[u8] {
        &self.buf[pos..pos + key_len(&self.buf[pos..], key_type)]
    }

    /// The RID of an entry is the 6 bytes immediately following its key.
    pub fn rid_at(&self, pos: usize, key_type: KeyType) -> Rid {
        let key_end = pos + key_len(&self.buf[pos..], key_type);
        read_rid(&self.buf[key_end..key_end + RID_LEN])
    }

    pub fn entry_at(&self, pos: usize, key_type: KeyType) -> (&[u8], Rid) {
        let klen = key_len(&self.buf[pos..], key_type);
        (
            &self.buf[pos..pos + klen],
            read_rid(&self.buf[pos + klen..pos + klen + RID_LEN]),
        )
    }

    /// Byte position of entry `index`.
    fn pos_of(&self, index: u16, key_type: KeyType) -> usize {
        let mut pos = 0;
        for _ in 0..index {
            pos += self.entry_len_at(pos, key_type);
        }
        pos
    }

    /// Insert keeping composite order: the new entry lands before the first
    /// existing entry that is strictly greater.
    pub fn insert(&mut self, key: &[u8], rid: Rid, key_type: KeyType) -> Result<(), DbError> {
        let entry_len = self.entry_len(key, key_type);
        if self.free_space() < entry_len {
            return Err(DbError::NotEnoughSpace(entry_len));
        }

        let mut pos = 0;
        for _ in 0..self.counter {
            let (cur_key, cur_rid) = self.entry_at(pos, key_type);
            if compare_composite(key, rid, cur_key, cur_rid, key_type) == Ordering::Less {
                break;
            }
            pos += self.entry_len_at(pos, key_type);
        }

        if pos < self.free_ptr as usize {
            self.buf
                .copy_within(pos..self.free_ptr as usize, pos + entry_len);
        }
        let klen = key_len(key, key_type);
        self.buf[pos..pos + klen].copy_from_slice(key);
        write_rid(&mut self.buf[pos + klen..pos + klen + RID_LEN], rid);
        self.free_ptr += entry_len as u16;
        self.counter += 1;
        Ok(())
    }

    /// Remove the entry matching both key and RID, compacting left.
    pub fn delete(&mut self, key: &[u8], rid: Rid, key_type: KeyType) -> Result<(), DbError> {
        let mut pos = 0;
        for _ in 0..self.counter {
            let (cur_key, cur_rid) = self.entry_at(pos, key_type);
            match compare_composite(key, rid, cur_key, cur_rid, key_type) {
                Ordering::Equal => {
                    let entry_len = self.entry_len_at(pos, key_type);
                    let tail = pos + entry_len;
                    if tail < self.free_ptr as usize {
                        self.buf.copy_within(tail..self.free_ptr as usize, pos);
                    }
                    self.free_ptr -= entry_len as u16;
                    self.counter -= 1;
                    return Ok(());
                }
                // Entries are sorted, no point looking past the slot the
                // target would occupy.
                Ordering::Less => return Err(DbError::EntryNotFound),
                Ordering::Greater => pos += self.entry_len_at(pos, key_type),
            }
        }
        Err(DbError::EntryNotFound)
    }

    /// Split this leaf around its midpoint and insert the new entry into
    /// the proper half. When the new entry is ≥ the midpoint entry the cut
    /// moves one entry to the right, so a new entry equal to the median
    /// stays in the left sibling (the stable choice the tests pin down).
    ///
    /// Returns the separator to push up (the new leaf's first key) and the
    /// new leaf's page number.
    pub fn split_insert(
        &mut self,
        file: &mut IndexFile,
        key: &[u8],
        rid: Rid,
        key_type: KeyType,
    ) -> Result<(Vec<u8>, u32), DbError> {
        let new_page_no = file.append_page()?;

        let mut mid_index = self.counter / 2;
        let mut mid_pos = self.pos_of(mid_index, key_type);
        {
            let (mid_key, mid_rid) = self.entry_at(mid_pos, key_type);
            if compare_composite(key, rid, mid_key, mid_rid, key_type) != Ordering::Less {
                mid_pos += self.entry_len_at(mid_pos, key_type);
                mid_index += 1;
            }
        }

        let insert_left = if mid_pos >= self.free_ptr as usize {
            false
        } else {
            let (mid_key, mid_rid) = self.entry_at(mid_pos, key_type);
            compare_composite(key, rid, mid_key, mid_rid, key_type) == Ordering::Less
        };

        let mut new_leaf = LeafPage::from_parts(
            new_page_no,
            self.parent,
            self.next,
            &self.buf[mid_pos..self.free_ptr as usize],
            self.counter - mid_index,
        );
        self.free_ptr = mid_pos as u16;
        self.counter = mid_index;
        self.next = new_page_no;

        if insert_left {
            self.insert(key, rid, key_type)?;
        } else {
            new_leaf.insert(key, rid, key_type)?;
        }

        let separator = new_leaf.key_at(0, key_type).to_vec();
        self.save(file)?;
        new_leaf.save(file)?;
        Ok((separator, new_page_no))
    }

    /// Byte position of the first entry satisfying the low bound (by key
    /// only), or `free_ptr` when no entry qualifies.
    pub fn first_pos_low(
        &self,
        low: Option<&[u8]>,
        inclusive: bool,
        key_type: KeyType,
    ) -> usize {
        let Some(low) = low else { return 0 };
        let mut pos = 0;
        for _ in 0..self.counter {
            let cur_key = self.key_at(pos, key_type);
            let ord = compare_keys(cur_key, low, key_type);
            let qualifies = if inclusive {
                ord != Ordering::Less
            } else {
                ord == Ordering::Greater
            };
            if qualifies {
                return pos;
            }
            pos += self.entry_len_at(pos, key_type);
        }
        self.free_ptr as usize
    }
}
