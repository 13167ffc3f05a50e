//! Shared tree-page plumbing: the page header, typed keys, and the
//! composite-key ordering.
//!
//! Header layout, stored in the final 12 bytes of every tree page (the last
//! two bytes are reserved):
//!
//! ```text
//! PAGE_SIZE - 12: page type (u16)   1 = internal, 2 = leaf
//! PAGE_SIZE - 10: free byte pointer (u16)
//! PAGE_SIZE -  8: entry counter (u16)
//! PAGE_SIZE -  6: parent page (u32) 0 = root
//! ```
//!
//! Leaf pages additionally keep their right-sibling pointer directly below
//! the header, at `PAGE_SIZE - 16`.

use std::cmp::Ordering;

use byteorder::{ByteOrder, LittleEndian};

use crate::errors::DbError;
use crate::paged_file::PAGE_SIZE;
use crate::schema::{AttrType, Rid};

pub(crate) const TYPE_OFFSET: usize = PAGE_SIZE - 12;
pub(crate) const FREE_PTR_OFFSET: usize = PAGE_SIZE - 10;
pub(crate) const COUNTER_OFFSET: usize = PAGE_SIZE - 8;
pub(crate) const PARENT_OFFSET: usize = PAGE_SIZE - 6;
pub(crate) const SHARED_HEADER_LEN: usize = 12;
pub(crate) const NEXT_PTR_OFFSET: usize = PAGE_SIZE - 16;

pub(crate) const RID_LEN: usize = 6;
pub(crate) const CHILD_PTR_LEN: usize = 4;

/// Null sentinel for every page pointer (page 0 is the hidden page).
pub(crate) const NULL_PAGE: u32 = 0;

const PAGE_TYPE_INTERNAL: u16 = 1;
const PAGE_TYPE_LEAF: u16 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PageKind {
    Internal,
    Leaf,
}

pub(crate) fn page_kind(buf: &[u8]) -> Result<PageKind, DbError> {
    match LittleEndian::read_u16(&buf[TYPE_OFFSET..]) {
        PAGE_TYPE_INTERNAL => Ok(PageKind::Internal),
        PAGE_TYPE_LEAF => Ok(PageKind::Leaf),
        other => Err(DbError::Corrupt(format!("unknown tree page type {other}"))),
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PageHeader {
    pub kind: PageKind,
    pub free_ptr: u16,
    pub counter: u16,
    pub parent: u32,
}

pub(crate) fn read_header(buf: &[u8]) -> Result<PageHeader, DbError> {
    Ok(PageHeader {
        kind: page_kind(buf)?,
        free_ptr: LittleEndian::read_u16(&buf[FREE_PTR_OFFSET..]),
        counter: LittleEndian::read_u16(&buf[COUNTER_OFFSET..]),
        parent: LittleEndian::read_u32(&buf[PARENT_OFFSET..]),
    })
}

pub(crate) fn write_header(buf: &mut [u8], header: &PageHeader) {
    let kind = match header.kind {
        PageKind::Internal => PAGE_TYPE_INTERNAL,
        PageKind::Leaf => PAGE_TYPE_LEAF,
    };
    LittleEndian::write_u16(&mut buf[TYPE_OFFSET..TYPE_OFFSET + 2], kind);
    LittleEndian::write_u16(&mut buf[FREE_PTR_OFFSET..FREE_PTR_OFFSET + 2], header.free_ptr);
    LittleEndian::write_u16(&mut buf[COUNTER_OFFSET..COUNTER_OFFSET + 2], header.counter);
    LittleEndian::write_u32(&mut buf[PARENT_OFFSET..PARENT_OFFSET + 4], header.parent);
}

/// Key type of an index, persisted in the file header. Stored codes are
/// offset by one so that zero can mean "not decided yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Int,
    Real,
    VarChar,
}

impl KeyType {
    pub(crate) fn from_attr_type(attr_type: AttrType) -> Self {
        match attr_type {
            AttrType::Int => KeyType::Int,
            AttrType::Real => KeyType::Real,
            AttrType::VarChar => KeyType::VarChar,
        }
    }

    pub(crate) fn stored(self) -> u16 {
        match self {
            KeyType::Int => 1,
            KeyType::Real => 2,
            KeyType::VarChar => 3,
        }
    }

    pub(crate) fn from_stored(code: u16) -> Result<Self, DbError> {
        match code {
            1 => Ok(KeyType::Int),
            2 => Ok(KeyType::Real),
            3 => Ok(KeyType::VarChar),
            _ => Err(DbError::KeyTypeNotSupported(format!("stored code {code}"))),
        }
    }
}

/// Length of the key starting at the beginning of `key`. Keys use the API
/// value format: int/real are 4 bytes, varchar is a 4-byte length plus the
/// bytes.
pub(crate) fn key_len(key: &[u8], key_type: KeyType) -> usize {
    match key_type {
        KeyType::Int | KeyType::Real => 4,
        KeyType::VarChar => 4 + LittleEndian::read_u32(key) as usize,
    }
}

pub(crate) fn compare_keys(a: &[u8], b: &[u8], key_type: KeyType) -> Ordering {
    match key_type {
        KeyType::Int => LittleEndian::read_i32(a).cmp(&LittleEndian::read_i32(b)),
        KeyType::Real => LittleEndian::read_f32(a)
            .partial_cmp(&LittleEndian::read_f32(b))
            .unwrap_or(Ordering::Equal),
        KeyType::VarChar => {
            let a_len = LittleEndian::read_u32(a) as usize;
            let b_len = LittleEndian::read_u32(b) as usize;
            a[4..4 + a_len].cmp(&b[4..4 + b_len])
        }
    }
}

/// Entry ordering inside tree pages: key first, RID as the tiebreaker.
/// The tiebreaker is what makes duplicate attribute keys deletable.
pub(crate) fn compare_composite(
    a_key: &[u8],
    a_rid: Rid,
    b_key: &[u8],
    b_rid: Rid,
    key_type: KeyType,
) -> Ordering {
    compare_keys(a_key, b_key, key_type).then_with(|| a_rid.cmp(&b_rid))
}

pub(crate) fn format_key(key: &[u8], key_type: KeyType) -> String {
    match key_type {
        KeyType::Int => LittleEndian::read_i32(key).to_string(),
        KeyType::Real => LittleEndian::read_f32(key).to_string(),
        KeyType::VarChar => {
            let len = LittleEndian::read_u32(key) as usize;
            String::from_utf8_lossy(&key[4..4 + len]).into_owned()
        }
    }
}

pub(crate) fn read_rid(buf: &[u8]) -> Rid {
    Rid {
        page: LittleEndian::read_u32(&buf[..4]),
        slot: LittleEndian::read_u16(&buf[4..6]),
    }
}

pub(crate) fn write_rid(buf: &mut [u8], rid: Rid) {
    LittleEndian::write_u32(&mut buf[..4], rid.page);
    LittleEndian::write_u16(&mut buf[4..6], rid.slot);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let header = PageHeader {
            kind: PageKind::Leaf,
            free_ptr: 123,
            counter: 7,
            parent: 42,
        };
        write_header(&mut buf, &header);
        let back = read_header(&buf).unwrap();
        assert_eq!(back.kind, PageKind::Leaf);
        assert_eq!(back.free_ptr, 123);
        assert_eq!(back.counter, 7);
        assert_eq!(back.parent, 42);
    }

    #[test]
    fn unknown_page_type_is_corrupt() {
        let buf = vec![0u8; PAGE_SIZE];
        assert!(matches!(page_kind(&buf), Err(DbError::Corrupt(_))));
    }

    #[test]
    fn varchar_keys_compare_by_content() {
        let mk = |s: &str| {
            let mut v = (s.len() as u32).to_le_bytes().to_vec();
            v.extend_from_slice(s.as_bytes());
            v
        };
        assert_eq!(
            compare_keys(&mk("abc"), &mk("abd"), KeyType::VarChar),
            Ordering::Less
        );
        assert_eq!(
            compare_keys(&mk("b"), &mk("ab"), KeyType::VarChar),
            Ordering::Greater
        );
    }

    #[test]
    fn composite_breaks_ties_with_rid() {
        let key = 5i32.to_le_bytes();
        assert_eq!(
            compare_composite(&key, Rid::new(1, 2), &key, Rid::new(1, 3), KeyType::Int),
            Ordering::Less
        );
        assert_eq!(
            compare_composite(&key, Rid::new(2, 1), &key, Rid::new(1, 9), KeyType::Int),
            Ordering::Greater
        );
    }
}
