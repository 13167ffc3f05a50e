//! Page-granular file I/O.
//!
//! Every file reserves a hidden metadata page at physical offset 0 holding
//! the four persisted counters:
//!
//! ```text
//! read_count (u32) | write_count (u32) | append_count (u32) | page_count (u32)
//! ```
//!
//! Logical page `n` therefore lives at file offset `(n + 1) * PAGE_SIZE`,
//! and the hidden page never shows up in the page numbering the callers see.

use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::error;

use crate::errors::DbError;

pub const PAGE_SIZE: usize = 4096;

const COUNTER_AREA_LEN: usize = 16;

/// Handle to one paged file. The handle exclusively owns the descriptor and
/// the in-memory counters; counters are flushed to the hidden page on every
/// mutation and on close.
#[derive(Debug)]
pub struct PagedFile {
    path: PathBuf,
    file: File,
    read_count: u32,
    write_count: u32,
    append_count: u32,
    page_count: u32,
}

impl PagedFile {
    /// Create a new paged file containing only the zeroed hidden page.
    /// Fails if the file already exists.
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
        let mut buf = [0u8; COUNTER_AREA_LEN];
        file.read_exact(&mut buf)?;
        let mut rdr = Cursor::new(&buf[..]);
        let read_count = rdr.read_u32::<LittleEndian>()?;
        let write_count = rdr.read_u32::<LittleEndian>()?;
        let append_count = rdr.read_u32::<LittleEndian>()?;
        let page_count = rdr.read_u32::<LittleEndian>()?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            read_count,
            write_count,
            append_count,
            page_count,
        })
    }

    pub fn close(mut self) -> Result<(), DbError> {
        self.flush_metadata()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn flush_metadata(&mut self) -> Result<(), DbError> {
        let mut buf = Vec::with_capacity(COUNTER_AREA_LEN);
        buf.write_u32::<LittleEndian>(self.read_count)?;
        buf.write_u32::<LittleEndian>(self.write_count)?;
        buf.write_u32::<LittleEndian>(self.append_count)?;
        buf.write_u32::<LittleEndian>(self.page_count)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&buf)?;
        self.file.flush()?;
        Ok(())
    }

    pub fn read_page(&mut self, page: u32) -> Result<Vec<u8>, DbError> {
        if page >= self.page_count {
            return Err(DbError::PageNotExist(page));
        }
        self.file
            .seek(SeekFrom::Start((page as u64 + 1) * PAGE_SIZE as u64))?;
        let mut buf = vec![0u8; PAGE_SIZE];
        self.file.read_exact(&mut buf)?;
        self.read_count += 1;
        Ok(buf)
    }

    pub fn write_page(&mut self, page: u32, data: &[u8]) -> Result<(), DbError> {
        if page >= self.page_count {
            return Err(DbError::PageNotExist(page));
        }
        if data.len() != PAGE_SIZE {
            error!("write_page({}) called with {} bytes", page, data.len());
            return Err(DbError::Corrupt(format!(
                "page buffer must be {PAGE_SIZE} bytes, got {}",
                data.len()
            )));
        }
        self.file
            .seek(SeekFrom::Start((page as u64 + 1) * PAGE_SIZE as u64))?;
        self.file.write_all(data)?;
        self.file.flush()?;
        self.write_count += 1;
        self.flush_metadata()?;
        Ok(())
    }

    /// Append a new page and return its logical page number.
    pub fn append_page(&mut self, data: &[u8]) -> Result<u32, DbError> {
        if data.len() != PAGE_SIZE {
            return Err(DbError::Corrupt(format!(
                "page buffer must be {PAGE_SIZE} bytes, got {}",
                data.len()
            )));
        }
        self.file
            .seek(SeekFrom::Start((self.page_count as u64 + 1) * PAGE_SIZE as u64))?;
        self.file.write_all(data)?;
        self.file.flush()?;
        self.append_count += 1;
        self.page_count += 1;
        self.flush_metadata()?;
        Ok(self.page_count - 1)
    }

    pub fn num_pages(&self) -> u32 {
        self.page_count
    }

    /// (reads, writes, appends) performed through this file since creation.
    pub fn counters(&self) -> (u32, u32, u32) {
        (self.read_count, self.write_count, self.append_count)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PagedFile {
    fn drop(&mut self) {
        // Read counts are only tracked in memory between mutations.
        let _ = self.flush_metadata();
    }
}
