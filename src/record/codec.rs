//! Conversion between API tuples and the on-disk record byte sequence.
//!
//! Record layout:
//!
//! ```text
//! mask (u8) | version (u8) | attr_count (u16) | dictionary (2 * attr_count) | values
//! ```
//!
//! Each dictionary slot holds the offset one past the end of that
//! attribute's value, relative to the record start, or -1 for NULL. Varchar
//! values are stored without their 4-byte length prefix; the length falls
//! out of consecutive dictionary entries. A forwarding pointer reuses the
//! first 8 bytes:
//!
//! ```text
//! mask=1 (u8) | version (u8) | page (u32) | slot (u16)
//! ```

use byteorder::{ByteOrder, LittleEndian};

use crate::errors::DbError;
use crate::schema::{
    self, is_attr_null, null_bitmap_len, set_attr_null, AttrType, Attribute, Rid,
};

pub(crate) const MASK_REAL: u8 = 0;
pub(crate) const MASK_POINTER: u8 = 1;

/// Pointer form: mask + version + page + slot. Real records are padded up
/// to this length on disk so a slot can later be rewritten in place.
pub(crate) const RECORD_MIN_LEN: usize = 1 + 1 + 4 + 2;

const ATTR_COUNT_OFFSET: usize = 2;
const DICT_BEGIN: usize = 4;
const DICT_ENTRY_LEN: usize = 2;
const NULL_END_POS: i16 = -1;

/// Encode an API tuple into a record byte sequence.
pub fn encode_tuple(data: &[u8], attrs: &[Attribute], version: u8) -> Result<Vec<u8>, DbError> {
    let attr_count = attrs.len();
    let mut out = vec![0u8; DICT_BEGIN + attr_count * DICT_ENTRY_LEN];
    out[0] = MASK_REAL;
    out[1] = version;
    LittleEndian::write_u16(&mut out[ATTR_COUNT_OFFSET..], attr_count as u16);

    let mut data_pos = null_bitmap_len(attr_count);
    for (i, attr) in attrs.iter().enumerate() {
        let dict_pos = DICT_BEGIN + i * DICT_ENTRY_LEN;
        if is_attr_null(data, i) {
            LittleEndian::write_i16(&mut out[dict_pos..dict_pos + 2], NULL_END_POS);
            continue;
        }
        match attr.attr_type {
            AttrType::Int | AttrType::Real => {
                out.extend_from_slice(&data[data_pos..data_pos + 4]);
                data_pos += 4;
            }
            AttrType::VarChar => {
                let len = LittleEndian::read_u32(&data[data_pos..]) as usize;
                data_pos += 4;
                out.extend_from_slice(&data[data_pos..data_pos + len]);
                data_pos += len;
            }
        }
        let end = out.len() as i16;
        LittleEndian::write_i16(&mut out[dict_pos..dict_pos + 2], end);
    }
    Ok(out)
}

/// Decode the attributes listed in `selected` (indices into `attrs`) into
/// an API tuple.
pub fn decode_record(record: &[u8], attrs: &[Attribute], selected: &[usize]) -> Vec<u8> {
    let mut out = vec![0u8; null_bitmap_len(selected.len())];
    for (out_index, &attr_index) in selected.iter().enumerate() {
        match raw_attr(record, attr_index) {
            None => set_attr_null(&mut out, out_index),
            Some(value) => match attrs[attr_index].attr_type {
                AttrType::Int | AttrType::Real => out.extend_from_slice(value),
                AttrType::VarChar => {
                    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
                    out.extend_from_slice(value);
                }
            },
        }
    }
    out
}

/// Raw value bytes of one attribute (varchar without length prefix), or
/// `None` for NULL. Attributes beyond the record's stored count read as
/// NULL, which is what a record written under an older schema looks like.
pub(crate) fn raw_attr(record: &[u8], attr_index: usize) -> Option<&[u8]> {
    if attr_index >= record_attr_count(record) {
        return None;
    }
    let end = attr_end_pos(record, attr_index);
    if end < 0 {
        return None;
    }
    let begin = attr_begin_pos(record, attr_index);
    Some(&record[begin as usize..end as usize])
}

pub(crate) fn record_attr_count(record: &[u8]) -> usize {
    LittleEndian::read_u16(&record[ATTR_COUNT_OFFSET..]) as usize
}

pub(crate) fn record_version(record: &[u8]) -> u8 {
    record[1]
}

pub(crate) fn is_pointer(record: &[u8]) -> bool {
    record[0] == MASK_POINTER
}

fn attr_end_pos(record: &[u8], attr_index: usize) -> i16 {
    let dict_pos = DICT_BEGIN + attr_index * DICT_ENTRY_LEN;
    LittleEndian::read_i16(&record[dict_pos..dict_pos + 2])
}

/// Start of an attribute's value: the end of the closest preceding non-null
/// attribute, or the start of the value region.
fn attr_begin_pos(record: &[u8], attr_index: usize) -> i16 {
    for i in (0..attr_index).rev() {
        let end = attr_end_pos(record, i);
        if end >= 0 {
            return end;
        }
    }
    (DICT_BEGIN + record_attr_count(record) * DICT_ENTRY_LEN) as i16
}

pub(crate) fn pointer_record(version: u8, target: Rid) -> [u8; RECORD_MIN_LEN] {
    let mut out = [0u8; RECORD_MIN_LEN];
    out[0] = MASK_POINTER;
    out[1] = version;
    LittleEndian::write_u32(&mut out[2..6], target.page);
    LittleEndian::write_u16(&mut out[6..8], target.slot);
    out
}

pub(crate) fn pointer_target(record: &[u8]) -> Rid {
    Rid {
        page: LittleEndian::read_u32(&record[2..6]),
        slot: LittleEndian::read_u16(&record[6..8]),
    }
}

/// Re-shape an API tuple from one schema to another. Attributes are matched
/// by name and type; attributes absent from the old schema come out NULL.
pub fn transform_schema(
    old_attrs: &[Attribute],
    old_data: &[u8],
    new_attrs: &[Attribute],
) -> Vec<u8> {
    let mut out = vec![0u8; null_bitmap_len(new_attrs.len())];
    for (i, attr) in new_attrs.iter().enumerate() {
        let old_index = old_attrs
            .iter()
            .position(|a| a.name == attr.name && a.attr_type == attr.attr_type);
        let value = old_index.and_then(|idx| schema::api_raw_attr(old_data, old_attrs, idx));
        match value {
            Some(bytes) => out.extend_from_slice(bytes),
            None => set_attr_null(&mut out, i),
        }
    }
    out
}
