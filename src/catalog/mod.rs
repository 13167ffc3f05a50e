//! Catalog and DML wiring.
//!
//! The three system tables (`Tables`, `Columns`, `Indexes`) are stored as
//! ordinary record files inside the catalog directory and describe
//! themselves: creating the catalog seeds them with their own rows. Every
//! user-visible operation resolves the table through the catalog; inserts,
//! updates and deletes fan out to every index on the table.
//!
//! Reads and scans of system tables are allowed (the seeded rows are how
//! you inspect the catalog); mutating them through the public surface is
//! denied.

mod records;

use std::path::{Path, PathBuf};

use log::{debug, error};

use crate::errors::DbError;
use crate::index::BTreeIndex;
use crate::record::codec::transform_schema;
use crate::record::{RecordFile, ScanState};
use crate::schema::{api_raw_attr, is_attr_null, project_attr, Attribute, CompOp, Rid};

use records::{
    columns_schema, indexes_schema, tables_schema, ColumnsRecord, IndexesRecord, TablesRecord,
    COLUMNS_NAME, INDEXES_NAME, TABLES_NAME,
};

#[derive(Debug)]
pub struct Catalog {
    dir: PathBuf,
}

impl Catalog {
    /// Create the catalog directory with its three system tables, seeded
    /// with their own descriptions.
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self, DbError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        RecordFile::create(dir.join(TABLES_NAME))?;
        RecordFile::create(dir.join(COLUMNS_NAME))?;
        RecordFile::create(dir.join(INDEXES_NAME))?;

        let catalog = Self {
            dir: dir.to_path_buf(),
        };
        catalog.register_table(TABLES_NAME, &tables_schema())?;
        catalog.register_table(COLUMNS_NAME, &columns_schema())?;
        catalog.register_table(INDEXES_NAME, &indexes_schema())?;
        Ok(catalog)
    }

    /// Open an existing catalog directory.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, DbError> {
        let dir = dir.as_ref();
        for name in [TABLES_NAME, COLUMNS_NAME, INDEXES_NAME] {
            if !dir.join(name).exists() {
                return Err(DbError::FileNotExist(dir.join(name).display().to_string()));
            }
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Destroy the three system tables. User table files are untouched.
    pub fn delete(self) -> Result<(), DbError> {
        RecordFile::destroy(self.dir.join(TABLES_NAME))?;
        RecordFile::destroy(self.dir.join(COLUMNS_NAME))?;
        RecordFile::destroy(self.dir.join(INDEXES_NAME))?;
        Ok(())
    }

    fn path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    fn is_system(name: &str) -> bool {
        name == TABLES_NAME || name == COLUMNS_NAME || name == INDEXES_NAME
    }

    fn check_name(name: &str) -> Result<(), DbError> {
        if name.is_empty() {
            return Err(DbError::TableNameInvalid(name.to_string()));
        }
        Ok(())
    }

    fn check_mutable(name: &str) -> Result<(), DbError> {
        Self::check_name(name)?;
        if Self::is_system(name) {
            return Err(DbError::AccessDeniedSysTable(name.to_string()));
        }
        Ok(())
    }

    pub fn create_table(&mut self, name: &str, attrs: &[Attribute]) -> Result<(), DbError> {
        Self::check_mutable(name)?;
        RecordFile::create(self.path(name))?;
        self.register_table(name, attrs)?;
        Ok(())
    }

    /// Insert one `Tables` row and the column set at version 0. The table
    /// file shares the table's name.
    fn register_table(&self, name: &str, attrs: &[Attribute]) -> Result<i32, DbError> {
        let table_id = self.allocate_table_id(name)?;

        let mut tables = RecordFile::open(self.path(TABLES_NAME))?;
        let row = TablesRecord {
            table_id,
            table_name: name.to_string(),
            file_name: name.to_string(),
            table_version: 0,
        };
        tables.insert_record(&tables_schema(), &row.to_tuple())?;
        tables.close()?;

        self.insert_column_rows(table_id, attrs, 0)?;
        debug!("registered table {name} as id {table_id}");
        Ok(table_id)
    }

    fn insert_column_rows(
        &self,
        table_id: i32,
        attrs: &[Attribute],
        version: i32,
    ) -> Result<(), DbError> {
        let mut columns = RecordFile::open(self.path(COLUMNS_NAME))?;
        for (position, attr) in attrs.iter().enumerate() {
            let row = ColumnsRecord {
                table_id,
                column_name: attr.name.clone(),
                column_type: attr.attr_type.code(),
                column_length: attr.length as i32,
                column_position: position as i32 + 1,
                column_version: version,
            };
            columns.insert_record(&columns_schema(), &row.to_tuple())?;
        }
        columns.close()
    }

    /// Known table names keep their id; new names get `max + 1` (ids start
    /// at 0).
    fn allocate_table_id(&self, name: &str) -> Result<i32, DbError> {
        let mut max_id = -1;
        for (_, row) in self.tables_rows("", CompOp::NoOp, None)? {
            if row.table_name == name {
                return Ok(row.table_id);
            }
            max_id = max_id.max(row.table_id);
        }
        Ok(max_id + 1)
    }

    fn tables_rows(
        &self,
        condition_attr: &str,
        op: CompOp,
        value: Option<&[u8]>,
    ) -> Result<Vec<(Rid, TablesRecord)>, DbError> {
        let schema = tables_schema();
        let rows = self.system_rows(TABLES_NAME, &schema, condition_attr, op, value)?;
        Ok(rows
            .into_iter()
            .map(|(rid, data)| (rid, TablesRecord::from_tuple(&data)))
            .collect())
    }

    fn system_rows(
        &self,
        file_name: &str,
        schema: &[Attribute],
        condition_attr: &str,
        op: CompOp,
        value: Option<&[u8]>,
    ) -> Result<Vec<(Rid, Vec<u8>)>, DbError> {
        let mut file = RecordFile::open(self.path(file_name))?;
        let projection: Vec<String> = schema.iter().map(|a| a.name.clone()).collect();
        let rows: Vec<_> = file
            .scan(schema, condition_attr, op, value, &projection)?
            .collect();
        file.close()?;
        Ok(rows)
    }

    fn table_record(&self, name: &str) -> Result<(TablesRecord, Rid), DbError> {
        let value = varchar_value(name);
        let rows = self.tables_rows("table-name", CompOp::Eq, Some(&value))?;
        rows.into_iter()
            .map(|(rid, row)| (row, rid))
            .next()
            .ok_or_else(|| DbError::TableNotExist(name.to_string()))
    }

    fn attributes_for_version(
        &self,
        table_id: i32,
        version: i32,
    ) -> Result<Vec<Attribute>, DbError> {
        let value = int_value(table_id);
        let schema = columns_schema();
        let rows = self.system_rows(COLUMNS_NAME, &schema, "table-id", CompOp::Eq, Some(&value))?;
        let mut columns: Vec<ColumnsRecord> = rows
            .into_iter()
            .map(|(_, data)| ColumnsRecord::from_tuple(&data))
            .filter(|c| c.column_version == version)
            .collect();
        columns.sort_by_key(|c| c.column_position);
        columns.iter().map(|c| c.to_attribute()).collect()
    }

    fn table_indexes(&self, table_id: i32) -> Result<Vec<(Rid, IndexesRecord)>, DbError> {
        let value = int_value(table_id);
        let schema = indexes_schema();
        let rows = self.system_rows(INDEXES_NAME, &schema, "table-id", CompOp::Eq, Some(&value))?;
        Ok(rows
            .into_iter()
            .map(|(rid, data)| (rid, IndexesRecord::from_tuple(&data)))
            .collect())
    }

    /// Latest-version attributes of a table, in column-position order.
    pub fn get_attributes(&self, name: &str) -> Result<Vec<Attribute>, DbError> {
        Self::check_name(name)?;
        let (record, _) = self.table_record(name)?;
        self.attributes_for_version(record.table_id, record.table_version)
    }

    pub fn insert_tuple(&mut self, name: &str, data: &[u8]) -> Result<Rid, DbError> {
        Self::check_mutable(name)?;
        let (record, _) = self.table_record(name)?;
        let attrs = self.attributes_for_version(record.table_id, record.table_version)?;

        let mut file = RecordFile::open(self.path(&record.file_name))?;
        let rid = file.insert_record_versioned(&attrs, data, record.table_version as u8)?;
        file.close()?;

        self.fan_out(&record, &attrs, data, rid, IndexOp::Insert)?;
        Ok(rid)
    }

    pub fn delete_tuple(&mut self, name: &str, rid: Rid) -> Result<(), DbError> {
        Self::check_mutable(name)?;
        let (record, _) = self.table_record(name)?;
        let attrs = self.attributes_for_version(record.table_id, record.table_version)?;

        let old = self.read_tuple_inner(&record, &attrs, rid)?;
        self.fan_out(&record, &attrs, &old, rid, IndexOp::Delete)?;

        let mut file = RecordFile::open(self.path(&record.file_name))?;
        file.delete_record(rid)?;
        file.close()
    }

    pub fn update_tuple(&mut self, name: &str, data: &[u8], rid: Rid) -> Result<(), DbError> {
        Self::check_mutable(name)?;
        let (record, _) = self.table_record(name)?;
        let attrs = self.attributes_for_version(record.table_id, record.table_version)?;

        let old = self.read_tuple_inner(&record, &attrs, rid)?;
        self.fan_out(&record, &attrs, &old, rid, IndexOp::Delete)?;

        let mut file = RecordFile::open(self.path(&record.file_name))?;
        file.update_record_versioned(&attrs, data, record.table_version as u8, rid)?;
        file.close()?;

        self.fan_out(&record, &attrs, data, rid, IndexOp::Insert)?;
        Ok(())
    }

    pub fn read_tuple(&self, name: &str, rid: Rid) -> Result<Vec<u8>, DbError> {
        Self::check_name(name)?;
        let (record, _) = self.table_record(name)?;
        let attrs = self.attributes_for_version(record.table_id, record.table_version)?;
        self.read_tuple_inner(&record, &attrs, rid)
    }

    /// Read and, when the stored record predates the current table
    /// version, upgrade it through the old column set.
    fn read_tuple_inner(
        &self,
        record: &TablesRecord,
        attrs: &[Attribute],
        rid: Rid,
    ) -> Result<Vec<u8>, DbError> {
        let mut file = RecordFile::open(self.path(&record.file_name))?;
        let stored_version = file.read_record_version(rid)? as i32;
        let data = if stored_version == record.table_version {
            file.read_record(attrs, rid)?
        } else {
            let old_attrs = self.attributes_for_version(record.table_id, stored_version)?;
            let old = file.read_record(&old_attrs, rid)?;
            transform_schema(&old_attrs, &old, attrs)
        };
        file.close()?;
        Ok(data)
    }

    pub fn read_attribute(&self, name: &str, rid: Rid, attr_name: &str) -> Result<Vec<u8>, DbError> {
        let (record, _) = self.table_record(name)?;
        let attrs = self.attributes_for_version(record.table_id, record.table_version)?;
        let data = self.read_tuple_inner(&record, &attrs, rid)?;
        project_attr(&attrs, &data, attr_name)
    }

    /// Scan a table (system tables included). Records written under older
    /// schema versions are decoded as stored.
    pub fn scan(
        &self,
        name: &str,
        condition_attr: &str,
        op: CompOp,
        value: Option<&[u8]>,
        projection: &[String],
    ) -> Result<TableScan, DbError> {
        Self::check_name(name)?;
        let (record, _) = self.table_record(name)?;
        let attrs = self.attributes_for_version(record.table_id, record.table_version)?;
        let file = RecordFile::open(self.path(&record.file_name))?;
        let state = ScanState::open(&attrs, condition_attr, op, value, projection)?;
        Ok(TableScan { file, state })
    }

    pub fn create_index(&mut self, name: &str, attr_name: &str) -> Result<(), DbError> {
        Self::check_mutable(name)?;
        let (record, _) = self.table_record(name)?;
        let attrs = self.attributes_for_version(record.table_id, record.table_version)?;
        let position = attrs
            .iter()
            .position(|a| a.name == attr_name)
            .ok_or_else(|| DbError::AttributeNotExist(attr_name.to_string()))?;

        let index_file = format!("{name}_{attr_name}.idx");
        BTreeIndex::create(self.path(&index_file))?;

        let mut indexes = RecordFile::open(self.path(INDEXES_NAME))?;
        let row = IndexesRecord {
            table_id: record.table_id,
            attribute_name: attr_name.to_string(),
            file_name: index_file.clone(),
        };
        indexes.insert_record(&indexes_schema(), &row.to_tuple())?;
        indexes.close()?;

        // Backfill from the rows already in the table.
        let mut index = BTreeIndex::open(self.path(&index_file))?;
        let scan = self.scan(name, "", CompOp::NoOp, None, &[attr_name.to_string()])?;
        for (rid, data) in scan {
            if !is_attr_null(&data, 0) {
                index.insert_entry(&attrs[position], &data[1..], rid)?;
            }
        }
        index.close()
    }

    pub fn destroy_index(&mut self, name: &str, attr_name: &str) -> Result<(), DbError> {
        Self::check_mutable(name)?;
        let (record, _) = self.table_record(name)?;
        let (row_rid, row) = self
            .table_indexes(record.table_id)?
            .into_iter()
            .find(|(_, row)| row.attribute_name == attr_name)
            .ok_or_else(|| DbError::IndexNotExist(name.to_string(), attr_name.to_string()))?;

        let mut indexes = RecordFile::open(self.path(INDEXES_NAME))?;
        indexes.delete_record(row_rid)?;
        indexes.close()?;

        BTreeIndex::destroy(self.path(&row.file_name))
    }

    pub fn index_scan(
        &self,
        name: &str,
        attr_name: &str,
        low: Option<&[u8]>,
        high: Option<&[u8]>,
        low_inclusive: bool,
        high_inclusive: bool,
    ) -> Result<TableIndexScan, DbError> {
        Self::check_name(name)?;
        let (record, _) = self.table_record(name)?;
        let attrs = self.attributes_for_version(record.table_id, record.table_version)?;
        let attr = attrs
            .iter()
            .find(|a| a.name == attr_name)
            .ok_or_else(|| DbError::AttributeNotExist(attr_name.to_string()))?;
        let (_, row) = self
            .table_indexes(record.table_id)?
            .into_iter()
            .find(|(_, row)| row.attribute_name == attr_name)
            .ok_or_else(|| DbError::IndexNotExist(name.to_string(), attr_name.to_string()))?;

        let mut index = BTreeIndex::open(self.path(&row.file_name))?;
        let state = index.open_scan_state(attr, low, high, low_inclusive, high_inclusive)?;
        Ok(TableIndexScan { index, state })
    }

    pub fn delete_table(&mut self, name: &str) -> Result<(), DbError> {
        Self::check_mutable(name)?;
        let (record, tables_rid) = self.table_record(name)?;

        for (row_rid, row) in self.table_indexes(record.table_id)? {
            let mut indexes = RecordFile::open(self.path(INDEXES_NAME))?;
            indexes.delete_record(row_rid)?;
            indexes.close()?;
            BTreeIndex::destroy(self.path(&row.file_name))?;
        }

        let mut tables = RecordFile::open(self.path(TABLES_NAME))?;
        tables.delete_record(tables_rid)?;
        tables.close()?;

        let value = int_value(record.table_id);
        let schema = columns_schema();
        let column_rows =
            self.system_rows(COLUMNS_NAME, &schema, "table-id", CompOp::Eq, Some(&value))?;
        if column_rows.is_empty() {
            error!("table {name} had no column metadata");
            return Err(DbError::Metadata(format!("no columns recorded for {name}")));
        }
        let mut columns = RecordFile::open(self.path(COLUMNS_NAME))?;
        for (rid, _) in column_rows {
            columns.delete_record(rid)?;
        }
        columns.close()?;

        RecordFile::destroy(self.path(&record.file_name))
    }

    /// Add a column: the table version is bumped and a complete column set
    /// is recorded under the new version. Existing rows are upgraded on
    /// read, not rewritten.
    pub fn add_attribute(&mut self, name: &str, attr: Attribute) -> Result<(), DbError> {
        Self::check_mutable(name)?;
        let (mut record, rid) = self.table_record(name)?;
        let mut attrs = self.attributes_for_version(record.table_id, record.table_version)?;
        if attrs.iter().any(|a| a.name == attr.name) {
            return Err(DbError::Metadata(format!(
                "column {} already exists on {name}",
                attr.name
            )));
        }
        attrs.push(attr);
        record.table_version += 1;
        self.insert_column_rows(record.table_id, &attrs, record.table_version)?;
        self.update_tables_row(&record, rid)
    }

    /// Drop a column under a new table version; old records keep their
    /// bytes and lose the column on read.
    pub fn drop_attribute(&mut self, name: &str, attr_name: &str) -> Result<(), DbError> {
        Self::check_mutable(name)?;
        let (mut record, rid) = self.table_record(name)?;
        let mut attrs = self.attributes_for_version(record.table_id, record.table_version)?;
        let position = attrs
            .iter()
            .position(|a| a.name == attr_name)
            .ok_or_else(|| DbError::AttributeNotExist(attr_name.to_string()))?;
        attrs.remove(position);
        record.table_version += 1;
        self.insert_column_rows(record.table_id, &attrs, record.table_version)?;
        self.update_tables_row(&record, rid)
    }

    fn update_tables_row(&self, record: &TablesRecord, rid: Rid) -> Result<(), DbError> {
        let mut tables = RecordFile::open(self.path(TABLES_NAME))?;
        tables.update_record(&tables_schema(), &record.to_tuple(), rid)?;
        tables.close()
    }

    fn fan_out(
        &self,
        record: &TablesRecord,
        attrs: &[Attribute],
        data: &[u8],
        rid: Rid,
        op: IndexOp,
    ) -> Result<(), DbError> {
        for (_, row) in self.table_indexes(record.table_id)? {
            let Some(position) = attrs.iter().position(|a| a.name == row.attribute_name) else {
                continue;
            };
            // NULL keys are not indexed.
            let Some(key) = api_raw_attr(data, attrs, position) else {
                continue;
            };
            let mut index = BTreeIndex::open(self.path(&row.file_name))?;
            match op {
                IndexOp::Insert => index.insert_entry(&attrs[position], key, rid)?,
                IndexOp::Delete => index.delete_entry(&attrs[position], key, rid)?,
            }
            index.close()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum IndexOp {
    Insert,
    Delete,
}

/// Tuple scan owning its table file handle.
#[derive(Debug)]
pub struct TableScan {
    file: RecordFile,
    state: ScanState,
}

impl Iterator for TableScan {
    type Item = (Rid, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        self.state.next_in(&mut self.file)
    }
}

/// Index scan owning its index handle; yields `(key, rid)` pairs.
#[derive(Debug)]
pub struct TableIndexScan {
    index: BTreeIndex,
    state: crate::index::IndexScanState,
}

impl Iterator for TableIndexScan {
    type Item = (Vec<u8>, Rid);

    fn next(&mut self) -> Option<Self::Item> {
        self.state.next_in(self.index.file_mut())
    }
}

fn int_value(value: i32) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

fn varchar_value(value: &str) -> Vec<u8> {
    let mut out = (value.len() as u32).to_le_bytes().to_vec();
    out.extend_from_slice(value.as_bytes());
    out
}
