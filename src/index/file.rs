//! Index file handle.
//!
//! Hidden page 0 holds the index metadata:
//!
//! ```text
//! read (u32) | write (u32) | append (u32) | root (u32) | key_type (u16)
//! ```
//!
//! Index pages are numbered physically: the hidden page is page 0, the
//! first appended page is page 1. That makes 0 a safe null sentinel for
//! every page pointer in the tree (root, parent, next, children).

use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::errors::DbError;
use crate::index::page::{KeyType, NULL_PAGE};
use crate::paged_file::PAGE_SIZE;

const METADATA_LEN: usize = 18;
const KEY_TYPE_UNSET: u16 = 0;

#[derive(Debug)]
pub(crate) struct IndexFile {
    file: File,
    read_count: u32,
    write_count: u32,
    append_count: u32,
    root: u32,
    key_type: Option<KeyType>,
}

impl IndexFile {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<(), DbError> {
        let path = path.as_ref();
        if path.exists() {
            return Err(DbError::FileAlreadyExist(path.display().to_string()));
        }
        let mut file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(path)?;
        file.write_all(&[0u8; PAGE_SIZE])?;
        file.sync_all()?;
        Ok(())
    }

    pub fn destroy<P: AsRef<Path>>(path: P) -> Result<(), DbError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DbError::FileNotExist(path.display().to_string()));
        }
        std::fs::remove_file(path)?;
        Ok(())
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DbError::FileNotExist(path.display().to_string()));
        }
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        file.seek(SeekFrom::Start(0))?;
        let mut buf = [0u8; METADATA_LEN];
        file.read_exact(&mut buf)?;
        let mut rdr = Cursor::new(&buf[..]);
        let read_count = rdr.read_u32::<LittleEndian>()?;
        let write_count = rdr.read_u32::<LittleEndian>()?;
        let append_count = rdr.read_u32::<LittleEndian>()?;
        let root = rdr.read_u32::<LittleEndian>()?;
        let stored_type = rdr.read_u16::<LittleEndian>()?;
        let key_type = if stored_type == KEY_TYPE_UNSET {
            None
        } else {
            Some(KeyType::from_stored(stored_type)?)
        };

        Ok(Self {
            file,
            read_count,
            write_count,
            append_count,
            root,
            key_type,
        })
    }

    pub fn close(mut self) -> Result<(), DbError> {
        self.flush_metadata()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn flush_metadata(&mut self) -> Result<(), DbError> {
        let mut buf = Vec::with_capacity(METADATA_LEN);
        buf.write_u32::<LittleEndian>(self.read_count)?;
        buf.write_u32::<LittleEndian>(self.write_count)?;
        buf.write_u32::<LittleEndian>(self.append_count)?;
        buf.write_u32::<LittleEndian>(self.root)?;
        let stored_type = self.key_type.map_or(KEY_TYPE_UNSET, KeyType::stored);
        buf.write_u16::<LittleEndian>(stored_type)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&buf)?;
        self.file.flush()?;
        Ok(())
    }

    pub fn read_page(&mut self, page: u32) -> Result<Vec<u8>, DbError> {
        if page == NULL_PAGE || page > self.append_count {
            return Err(DbError::PageNotExist(page));
        }
        self.file
            .seek(SeekFrom::Start(page as u64 * PAGE_SIZE as u64))?;
        let mut buf = vec![0u8; PAGE_SIZE];
        self.file.read_exact(&mut buf)?;
        self.read_count += 1;
        Ok(buf)
    }

    pub fn write_page(&mut self, page: u32, data: &[u8]) -> Result<(), DbError> {
        if page == NULL_PAGE || page > self.append_count {
            return Err(DbError::PageNotExist(page));
        }
        self.file
            .seek(SeekFrom::Start(page as u64 * PAGE_SIZE as u64))?;
        self.file.write_all(data)?;
        self.file.flush()?;
        self.write_count += 1;
        self.flush_metadata()?;
        Ok(())
    }

    /// Append a zeroed page and return its (physical) page number.
    pub fn append_page(&mut self) -> Result<u32, DbError> {
        let page = self.append_count + 1;
        self.file
            .seek(SeekFrom::Start(page as u64 * PAGE_SIZE as u64))?;
        self.file.write_all(&[0u8; PAGE_SIZE])?;
        self.file.flush()?;
        self.append_count = page;
        self.flush_metadata()?;
        Ok(page)
    }

    pub fn counters(&self) -> (u32, u32, u32) {
        (self.read_count, self.write_count, self.append_count)
    }

    pub fn root(&self) -> u32 {
        self.root
    }

    pub fn set_root(&mut self, root: u32) -> Result<(), DbError> {
        self.root = root;
        self.flush_metadata()
    }

    pub fn key_type(&self) -> Option<KeyType> {
        self.key_type
    }

    pub fn set_key_type(&mut self, key_type: KeyType) -> Result<(), DbError> {
        self.key_type = Some(key_type);
        self.flush_metadata()
    }
}

impl Drop for IndexFile {
    fn drop(&mut self) {
        let _ = self.flush_metadata();
    }
}
