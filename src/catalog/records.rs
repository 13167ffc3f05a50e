//! Row types of the three system tables.
//!
//! System rows cross the record layer in the ordinary API tuple format;
//! these types are just typed views with the fixed schemas pinned down in
//! one place. None of their attributes is ever NULL.

use byteorder::{ByteOrder, LittleEndian};

use crate::schema::{null_bitmap_len, AttrType, Attribute, TupleBuilder};

pub(crate) const TABLES_NAME: &str = "Tables";
pub(crate) const COLUMNS_NAME: &str = "Columns";
pub(crate) const INDEXES_NAME: &str = "Indexes";

pub(crate) const NAME_LEN: u32 = 50;

pub(crate) fn tables_schema() -> Vec<Attribute> {
    vec![
        Attribute::new("table-id", AttrType::Int, 4),
        Attribute::new("table-name", AttrType::VarChar, NAME_LEN),
        Attribute::new("file-name", AttrType::VarChar, NAME_LEN),
        Attribute::new("table-version", AttrType::Int, 4),
    ]
}

pub(crate) fn columns_schema() -> Vec<Attribute> {
    vec![
        Attribute::new("table-id", AttrType::Int, 4),
        Attribute::new("column-name", AttrType::VarChar, NAME_LEN),
        Attribute::new("column-type", AttrType::Int, 4),
        Attribute::new("column-length", AttrType::Int, 4),
        Attribute::new("column-position", AttrType::Int, 4),
        Attribute::new("column-version", AttrType::Int, 4),
    ]
}

pub(crate) fn indexes_schema() -> Vec<Attribute> {
    vec![
        Attribute::new("table-id", AttrType::Int, 4),
        Attribute::new("attribute-name", AttrType::VarChar, NAME_LEN),
        Attribute::new("file-name", AttrType::VarChar, NAME_LEN),
    ]
}

/// Sequential reader over a full-projection API tuple with no nulls.
struct TupleReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> TupleReader<'a> {
    fn new(data: &'a [u8], attr_count: usize) -> Self {
        Self {
            data,
            pos: null_bitmap_len(attr_count),
        }
    }

    fn int(&mut self) -> i32 {
        let value = LittleEndian::read_i32(&self.data[self.pos..]);
        self.pos += 4;
        value
    }

    fn string(&mut self) -> String {
        let len = LittleEndian::read_u32(&self.data[self.pos..]) as usize;
        self.pos += 4;
        let value = String::from_utf8_lossy(&self.data[self.pos..self.pos + len]).into_owned();
        self.pos += len;
        value
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TablesRecord {
    pub table_id: i32,
    pub table_name: String,
    pub file_name: String,
    pub table_version: i32,
}

impl TablesRecord {
    pub fn to_tuple(&self) -> Vec<u8> {
        TupleBuilder::new()
            .int(self.table_id)
            .string(&self.table_name)
            .string(&self.file_name)
            .int(self.table_version)
            .build()
    }

    pub fn from_tuple(data: &[u8]) -> Self {
        let mut rdr = TupleReader::new(data, 4);
        Self {
            table_id: rdr.int(),
            table_name: rdr.string(),
            file_name: rdr.string(),
            table_version: rdr.int(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ColumnsRecord {
    pub table_id: i32,
    pub column_name: String,
    pub column_type: i32,
    pub column_length: i32,
    pub column_position: i32,
    pub column_version: i32,
}

impl ColumnsRecord {
    pub fn to_tuple(&self) -> Vec<u8> {
        TupleBuilder::new()
            .int(self.table_id)
            .string(&self.column_name)
            .int(self.column_type)
            .int(self.column_length)
            .int(self.column_position)
            .int(self.column_version)
            .build()
    }

    pub fn from_tuple(data: &[u8]) -> Self {
        let mut rdr = TupleReader::new(data, 6);
        Self {
            table_id: rdr.int(),
            column_name: rdr.string(),
            column_type: rdr.int(),
            column_length: rdr.int(),
            column_position: rdr.int(),
            column_version: rdr.int(),
        }
    }

    pub fn to_attribute(&self) -> Result<Attribute, crate::errors::DbError> {
        Ok(Attribute {
            name: self.column_name.clone(),
            attr_type: AttrType::from_code(self.column_type)?,
            length: self.column_length as u32,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IndexesRecord {
    pub table_id: i32,
    pub attribute_name: String,
    pub file_name: String,
}

impl IndexesRecord {
    pub fn to_tuple(&self) -> Vec<u8> {
        TupleBuilder::new()
            .int(self.table_id)
            .string(&self.attribute_name)
            .string(&self.file_name)
            .build()
    }

    pub fn from_tuple(data: &[u8]) -> Self {
        let mut rdr = TupleReader::new(data, 3);
        Self {
            table_id: rdr.int(),
            attribute_name: rdr.string(),
            file_name: rdr.string(),
        }
    }
}
