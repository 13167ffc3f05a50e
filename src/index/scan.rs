//! Pull-based index range scan.
//!
//! The cursor holds the current leaf and a byte position inside it.
//! Advancing past the last entry follows the sibling pointer, skipping
//! empty leaves. The high bound is checked per entry against the key
//! alone, so every RID of a duplicate key inside the range is yielded.
//! Any underlying error ends the iteration.

use std::cmp::Ordering;

use crate::errors::DbError;
use crate::index::file::IndexFile;
use crate::index::leaf::LeafPage;
use crate::index::page::{compare_keys, KeyType, NULL_PAGE};
use crate::schema::Rid;

#[derive(Debug)]
pub(crate) struct IndexScanState {
    key_type: KeyType,
    high: Option<Vec<u8>>,
    high_inclusive: bool,
    leaf: Option<LeafPage>,
    pos: usize,
    done: bool,
}

impl IndexScanState {
    pub fn open(
        file: &mut IndexFile,
        key_type: KeyType,
        low: Option<&[u8]>,
        low_inclusive: bool,
        high: Option<&[u8]>,
        high_inclusive: bool,
    ) -> Result<Self, DbError> {
        let mut state = Self {
            key_type,
            high: high.map(|h| h.to_vec()),
            high_inclusive,
            leaf: None,
            pos: 0,
            done: false,
        };

        // Find the first leaf with an entry satisfying the low bound. The
        // starting leaf may hold only smaller duplicates, so keep walking
        // the sibling chain until a page yields a position.
        let mut page_no = super::find_leaf_low(file, low, key_type)?;
        while page_no != NULL_PAGE {
            let leaf = LeafPage::load(file, page_no)?;
            let pos = leaf.first_pos_low(low, low_inclusive, key_type);
            if pos < leaf.free_ptr as usize {
                state.pos = pos;
                state.leaf = Some(leaf);
                return Ok(state);
            }
            page_no = leaf.next;
        }
        state.done = true;
        Ok(state)
    }

    pub fn next_in(&mut self, file: &mut IndexFile) -> Option<(Vec<u8>, Rid)> {
        loop {
            if self.done {
                return None;
            }
            let leaf = self.leaf.as_ref()?;

            if self.pos >= leaf.free_ptr as usize {
                let mut next_no = leaf.next;
                self.leaf = None;
                while next_no != NULL_PAGE {
                    let next = match LeafPage::load(file, next_no) {
                        Ok(next) => next,
                        Err(_) => {
                            self.done = true;
                            return None;
                        }
                    };
                    if !next.is_empty() {
                        self.pos = 0;
                        self.leaf = Some(next);
                        break;
                    }
                    next_no = next.next;
                }
                if self.leaf.is_none() {
                    self.done = true;
                    return None;
                }
                continue;
            }

            let (key, rid) = leaf.entry_at(self.pos, self.key_type);
            if let Some(high) = &self.high {
                let ord = compare_keys(key, high, self.key_type);
                let exceeded = if self.high_inclusive {
                    ord == Ordering::Greater
                } else {
                    ord != Ordering::Less
                };
                if exceeded {
                    self.done = true;
                    return None;
                }
            }
            let key = key.to_vec();
            let entry_len = leaf.entry_len_at(self.pos, self.key_type);
            self.pos += entry_len;
            return Some((key, rid));
        }
    }
}

/// Range scan borrowing an open index. Finite and non-restartable.
#[derive(Debug)]
pub struct BTreeScan<'a> {
    file: &'a mut IndexFile,
    state: IndexScanState,
}

impl<'a> BTreeScan<'a> {
    pub(crate) fn new(file: &'a mut IndexFile, state: IndexScanState) -> Self {
        Self { file, state }
    }
}

impl Iterator for BTreeScan<'_> {
    type Item = (Vec<u8>, Rid);

    fn next(&mut self) -> Option<Self::Item> {
        self.state.next_in(self.file)
    }
}
