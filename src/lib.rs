mod catalog;
mod errors;
mod index;
mod paged_file;
mod record;
mod schema;

pub use crate::catalog::{Catalog, TableIndexScan, TableScan};
pub use crate::errors::DbError;
pub use crate::index::{BTreeIndex, BTreeScan, KeyType};
pub use crate::paged_file::{PagedFile, PAGE_SIZE};
pub use crate::record::codec::{decode_record, encode_tuple, transform_schema};
pub use crate::record::{RecordFile, RecordScan};
pub use crate::schema::{
    api_tuple_len, compare_attr, format_tuple, is_attr_null, null_bitmap_len, project_attr,
    set_attr_null, AttrType, Attribute, CompOp, Rid, TupleBuilder,
};
