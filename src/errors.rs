use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("file not found: {0}")]
    FileNotExist(String),

    #[error("file already exists: {0}")]
    FileAlreadyExist(String),

    #[error("page {0} does not exist")]
    PageNotExist(u32),

    #[error("slot {0} does not exist or is deleted")]
    SlotNotExistOrDeleted(u16),

    #[error("record ({0}, {1}) not found")]
    RecordNotFound(u32, u16),

    #[error("index entry not found")]
    EntryNotFound,

    #[error("key type not supported: {0}")]
    KeyTypeNotSupported(String),

    #[error("not enough space on page for {0} bytes")]
    NotEnoughSpace(usize),

    #[error("invalid table name: {0:?}")]
    TableNameInvalid(String),

    #[error("system table {0} cannot be modified")]
    AccessDeniedSysTable(String),

    #[error("table not found: {0}")]
    TableNotExist(String),

    #[error("no index on {0}.{1}")]
    IndexNotExist(String, String),

    #[error("attribute not found: {0}")]
    AttributeNotExist(String),

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("corrupt page: {0}")]
    Corrupt(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
