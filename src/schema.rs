//! Attribute types, row identifiers, comparison operators, and helpers for
//! the API tuple format.
//!
//! An API tuple is the wire format tuples cross the crate boundary in:
//! `⌈n/8⌉` null-indicator bytes (MSB of byte 0 is attribute 0), then the
//! packed values of the non-null attributes in declared order. Ints and
//! reals are 4 bytes little-endian; varchars are a 4-byte length followed
//! by the bytes, no trailing NUL.

use std::cmp::Ordering;
use std::fmt::Write as _;

use byteorder::{ByteOrder, LittleEndian};

use crate::errors::DbError;

/// Attribute value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    Int,
    Real,
    VarChar,
}

impl AttrType {
    /// Numeric code used by the `Columns` catalog and index file headers.
    pub fn code(self) -> i32 {
        match self {
            AttrType::Int => 0,
            AttrType::Real => 1,
            AttrType::VarChar => 2,
        }
    }

    pub fn from_code(code: i32) -> Result<Self, DbError> {
        match code {
            0 => Ok(AttrType::Int),
            1 => Ok(AttrType::Real),
            2 => Ok(AttrType::VarChar),
            _ => Err(DbError::KeyTypeNotSupported(format!("type code {code}"))),
        }
    }
}

/// One column of a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub attr_type: AttrType,
    /// Declared maximum length: 4 for int/real, the character capacity for varchar.
    pub length: u32,
}

impl Attribute {
    pub fn new(name: &str, attr_type: AttrType, length: u32) -> Self {
        Self {
            name: name.to_string(),
            attr_type,
            length,
        }
    }
}

/// Row identifier: page index plus 1-based slot index. Stable for the
/// lifetime of the row even when the record bytes are relocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Rid {
    pub page: u32,
    pub slot: u16,
}

impl Rid {
    pub fn new(page: u32, slot: u16) -> Self {
        Self { page, slot }
    }
}

/// Comparison operators for scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Ne,
    /// No condition: every row qualifies.
    NoOp,
}

pub fn null_bitmap_len(attr_count: usize) -> usize {
    attr_count.div_ceil(8)
}

pub fn is_attr_null(data: &[u8], index: usize) -> bool {
    (data[index / 8] >> (7 - index % 8)) & 0x1 == 0x1
}

pub fn set_attr_null(data: &mut [u8], index: usize) {
    data[index / 8] |= 0x1 << (7 - index % 8);
}

/// Byte length of the API-format value starting at `pos`.
pub(crate) fn api_value_len(data: &[u8], pos: usize, attr_type: AttrType) -> usize {
    match attr_type {
        AttrType::Int | AttrType::Real => 4,
        AttrType::VarChar => 4 + LittleEndian::read_u32(&data[pos..]) as usize,
    }
}

/// Total byte length of an API tuple under `attrs`.
pub fn api_tuple_len(data: &[u8], attrs: &[Attribute]) -> usize {
    let mut pos = null_bitmap_len(attrs.len());
    for (i, attr) in attrs.iter().enumerate() {
        if !is_attr_null(data, i) {
            pos += api_value_len(data, pos, attr.attr_type);
        }
    }
    pos
}

/// The API-format value bytes of attribute `index` (varchar keeps its
/// length prefix), or `None` when the attribute is null.
pub(crate) fn api_raw_attr<'a>(
    data: &'a [u8],
    attrs: &[Attribute],
    index: usize,
) -> Option<&'a [u8]> {
    if is_attr_null(data, index) {
        return None;
    }
    let mut pos = null_bitmap_len(attrs.len());
    for (i, attr) in attrs.iter().enumerate() {
        if is_attr_null(data, i) {
            continue;
        }
        let len = api_value_len(data, pos, attr.attr_type);
        if i == index {
            return Some(&data[pos..pos + len]);
        }
        pos += len;
    }
    None
}

/// Project a single attribute out of an API tuple into a one-attribute
/// API tuple (1 bitmap byte, then the value).
pub fn project_attr(attrs: &[Attribute], data: &[u8], name: &str) -> Result<Vec<u8>, DbError> {
    let index = attrs
        .iter()
        .position(|a| a.name == name)
        .ok_or_else(|| DbError::AttributeNotExist(name.to_string()))?;
    let mut out = vec![0u8];
    match api_raw_attr(data, attrs, index) {
        Some(value) => out.extend_from_slice(value),
        None => set_attr_null(&mut out, 0),
    }
    Ok(out)
}

fn attr_ordering(attr_type: AttrType, left: &[u8], right: &[u8]) -> Ordering {
    match attr_type {
        AttrType::Int => {
            let a = LittleEndian::read_i32(left);
            let b = LittleEndian::read_i32(right);
            a.cmp(&b)
        }
        AttrType::Real => {
            let a = LittleEndian::read_f32(left);
            let b = LittleEndian::read_f32(right);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        AttrType::VarChar => left.cmp(right),
    }
}

/// Typed comparison of two raw values (record format: varchars without the
/// length prefix). `NoOp` always qualifies.
pub fn compare_attr(attr_type: AttrType, left: &[u8], right: &[u8], op: CompOp) -> bool {
    let ord = attr_ordering(attr_type, left, right);
    match op {
        CompOp::Eq => ord == Ordering::Equal,
        CompOp::Lt => ord == Ordering::Less,
        CompOp::Le => ord != Ordering::Greater,
        CompOp::Gt => ord == Ordering::Greater,
        CompOp::Ge => ord != Ordering::Less,
        CompOp::Ne => ord != Ordering::Equal,
        CompOp::NoOp => true,
    }
}

/// Incremental builder for API tuples. Attributes are appended in declared
/// order; `build` prepends the null bitmap.
///
/// ```
/// use tupledb::TupleBuilder;
/// let tuple = TupleBuilder::new().int(24).real(185.7).string("Peter").build();
/// assert_eq!(tuple[0], 0x00);
/// ```
#[derive(Debug, Default)]
pub struct TupleBuilder {
    nulls: Vec<bool>,
    values: Vec<u8>,
}

impl TupleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn int(mut self, value: i32) -> Self {
        self.nulls.push(false);
        self.values.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn real(mut self, value: f32) -> Self {
        self.nulls.push(false);
        self.values.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn string(mut self, value: &str) -> Self {
        self.nulls.push(false);
        self.values
            .extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.values.extend_from_slice(value.as_bytes());
        self
    }

    pub fn null(mut self) -> Self {
        self.nulls.push(true);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = vec![0u8; null_bitmap_len(self.nulls.len())];
        for (i, is_null) in self.nulls.iter().enumerate() {
            if *is_null {
                set_attr_null(&mut out, i);
            }
        }
        out.extend_from_slice(&self.values);
        out
    }
}

/// Render an API tuple as `name: value, name: NULL, ...` for debugging.
pub fn format_tuple(attrs: &[Attribute], data: &[u8]) -> String {
    let mut out = String::new();
    let mut pos = null_bitmap_len(attrs.len());
    for (i, attr) in attrs.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{}: ", attr.name);
        if is_attr_null(data, i) {
            out.push_str("NULL");
            continue;
        }
        match attr.attr_type {
            AttrType::Int => {
                let _ = write!(out, "{}", LittleEndian::read_i32(&data[pos..]));
                pos += 4;
            }
            AttrType::Real => {
                let _ = write!(out, "{}", LittleEndian::read_f32(&data[pos..]));
                pos += 4;
            }
            AttrType::VarChar => {
                let len = LittleEndian::read_u32(&data[pos..]) as usize;
                pos += 4;
                let _ = write!(out, "{}", String::from_utf8_lossy(&data[pos..pos + len]));
                pos += len;
            }
        }
    }
    out
}
