//! Pull-based record scan.
//!
//! The cursor is (page index, slot index). Tombstoned and forwarding
//! pointer slots are skipped; a forwarded record is visited at its
//! physical location, keeping the walk single-pass. The condition is
//! evaluated on the raw attribute bytes before the projection is decoded.
//! Any underlying error ends the iteration.

use crate::errors::DbError;
use crate::record::codec;
use crate::record::file::RecordFile;
use crate::record::page::RecordPage;
use crate::schema::{AttrType, Attribute, CompOp, Rid};

/// Cursor state shared by the borrowing and owning scan wrappers.
#[derive(Debug)]
pub(crate) struct ScanState {
    attrs: Vec<Attribute>,
    selected: Vec<usize>,
    op: CompOp,
    condition_index: usize,
    /// Condition value in record format (varchar without length prefix).
    condition_value: Vec<u8>,
    condition_type: AttrType,
    cur_page: u32,
    cur_slot: u16,
}

impl ScanState {
    pub fn open(
        attrs: &[Attribute],
        condition_attr: &str,
        op: CompOp,
        value: Option<&[u8]>,
        projection: &[String],
    ) -> Result<Self, DbError> {
        let mut selected = Vec::with_capacity(projection.len());
        for name in projection {
            let index = attrs
                .iter()
                .position(|a| a.name == *name)
                .ok_or_else(|| DbError::AttributeNotExist(name.clone()))?;
            selected.push(index);
        }

        let (condition_index, condition_type, condition_value) = if op == CompOp::NoOp {
            (0, AttrType::Int, Vec::new())
        } else {
            let index = attrs
                .iter()
                .position(|a| a.name == condition_attr)
                .ok_or_else(|| DbError::AttributeNotExist(condition_attr.to_string()))?;
            let value = value.ok_or_else(|| {
                DbError::Metadata(format!("scan on {condition_attr} without a condition value"))
            })?;
            let attr_type = attrs[index].attr_type;
            let stripped = match attr_type {
                AttrType::Int | AttrType::Real => value[..4].to_vec(),
                AttrType::VarChar => value[4..].to_vec(),
            };
            (index, attr_type, stripped)
        };

        Ok(Self {
            attrs: attrs.to_vec(),
            selected,
            op,
            condition_index,
            condition_value,
            condition_type,
            cur_page: 0,
            cur_slot: 0,
        })
    }

    fn matches(&self, record: &[u8]) -> bool {
        if self.op == CompOp::NoOp {
            return true;
        }
        // NULL attributes never satisfy a real comparison.
        match codec::raw_attr(record, self.condition_index) {
            None => false,
            Some(raw) => crate::schema::compare_attr(
                self.condition_type,
                raw,
                &self.condition_value,
                self.op,
            ),
        }
    }

    pub fn next_in(&mut self, file: &mut RecordFile) -> Option<(Rid, Vec<u8>)> {
        loop {
            if self.cur_page >= file.num_pages() {
                return None;
            }
            let page = RecordPage::load(&mut file.file, self.cur_page).ok()?;
            let Some(slot) = page.next_live_slot(self.cur_slot) else {
                self.cur_page += 1;
                self.cur_slot = 0;
                continue;
            };
            self.cur_slot = slot;
            let record = page.read_record(slot).ok()?;
            if self.matches(record) {
                let data = codec::decode_record(record, &self.attrs, &self.selected);
                return Some((Rid::new(self.cur_page, slot), data));
            }
        }
    }
}

/// Scan borrowing an open [`RecordFile`]. Finite and non-restartable.
#[derive(Debug)]
pub struct RecordScan<'a> {
    file: &'a mut RecordFile,
    state: ScanState,
}

impl<'a> RecordScan<'a> {
    pub(crate) fn new(file: &'a mut RecordFile, state: ScanState) -> Self {
        Self { file, state }
    }
}

impl Iterator for RecordScan<'_> {
    type Item = (Rid, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        self.state.next_in(self.file)
    }
}
