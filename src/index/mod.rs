//! Persistent B+-tree index over one typed attribute.
//!
//! All real entries live in leaf pages; internal pages only route. Inserts
//! recurse from the root: a page with room absorbs the entry, a full page
//! splits and hands `(separator, new right page)` back to its caller. When
//! the split reaches the root a new internal root is allocated, so the
//! tree grows at the top and stays balanced by construction.

use std::cmp::Ordering;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use serde_json::{json, Value};

use crate::errors::DbError;
use crate::schema::{Attribute, Rid};

mod file;
mod internal;
mod leaf;
mod page;
mod scan;

pub use page::KeyType;
pub use scan::BTreeScan;

pub(crate) use file::IndexFile;
pub(crate) use scan::IndexScanState;

use internal::InternalPage;
use leaf::LeafPage;
use page::{compare_keys, format_key, page_kind, PageKind, NULL_PAGE, PARENT_OFFSET};

/// A split propagated upward during recursive insert: the caller must
/// route `separator -> right_page` in its own page.
#[derive(Debug)]
struct SplitInfo {
    separator: Vec<u8>,
    right_page: u32,
}

#[derive(Debug)]
pub struct BTreeIndex {
    file: IndexFile,
}

impl BTreeIndex {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<(), DbError> {
        IndexFile::create(path)
    }

    pub fn destroy<P: AsRef<Path>>(path: P) -> Result<(), DbError> {
        IndexFile::destroy(path)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        Ok(Self {
            file: IndexFile::open(path)?,
        })
    }

    pub fn close(self) -> Result<(), DbError> {
        self.file.close()
    }

    pub fn counters(&self) -> (u32, u32, u32) {
        self.file.counters()
    }

    /// The key type is pinned by the first insert and persisted in the
    /// file header; later calls must agree with it.
    fn resolve_key_type(&mut self, attr: &Attribute, store: bool) -> Result<KeyType, DbError> {
        let key_type = KeyType::from_attr_type(attr.attr_type);
        match self.file.key_type() {
            Some(stored) if stored == key_type => Ok(key_type),
            Some(stored) => Err(DbError::KeyTypeNotSupported(format!(
                "index holds {stored:?} keys, attribute {} is {:?}",
                attr.name, attr.attr_type
            ))),
            None => {
                if store {
                    self.file.set_key_type(key_type)?;
                }
                Ok(key_type)
            }
        }
    }

    pub fn insert_entry(&mut self, attr: &Attribute, key: &[u8], rid: Rid) -> Result<(), DbError> {
        let key_type = self.resolve_key_type(attr, true)?;
        let root = self.file.root();

        if root == NULL_PAGE {
            let page_no = self.file.append_page()?;
            let mut leaf = LeafPage::new_blank(page_no, NULL_PAGE, NULL_PAGE);
            leaf.insert(key, rid, key_type)?;
            leaf.save(&mut self.file)?;
            self.file.set_root(page_no)?;
            return Ok(());
        }

        if let Some(split) = self.insert_recursive(root, key, rid, key_type)? {
            let new_root_no = self.file.append_page()?;
            let mut new_root =
                InternalPage::new_root(new_root_no, root, &split.separator, split.right_page, key_type);
            new_root.save(&mut self.file)?;
            set_page_parent(&mut self.file, root, new_root_no)?;
            set_page_parent(&mut self.file, split.right_page, new_root_no)?;
            self.file.set_root(new_root_no)?;
            debug!("tree grew a new root page {new_root_no}");
        }
        Ok(())
    }

    fn insert_recursive(
        &mut self,
        page_no: u32,
        key: &[u8],
        rid: Rid,
        key_type: KeyType,
    ) -> Result<Option<SplitInfo>, DbError> {
        let buf = self.file.read_page(page_no)?;
        match page_kind(&buf)? {
            PageKind::Leaf => {
                let mut leaf = LeafPage::from_buf(page_no, buf)?;
                if leaf.has_room(key, key_type) {
                    leaf.insert(key, rid, key_type)?;
                    leaf.save(&mut self.file)?;
                    return Ok(None);
                }
                let (separator, right_page) =
                    leaf.split_insert(&mut self.file, key, rid, key_type)?;
                Ok(Some(SplitInfo {
                    separator,
                    right_page,
                }))
            }
            PageKind::Internal => {
                let mut internal = InternalPage::from_buf(page_no, buf)?;
                let child = internal.route(key, key_type);
                let Some(split) = self.insert_recursive(child, key, rid, key_type)? else {
                    return Ok(None);
                };
                if internal.has_room(&split.separator, key_type) {
                    internal.insert_router(&split.separator, split.right_page, key_type)?;
                    internal.save(&mut self.file)?;
                    set_page_parent(&mut self.file, split.right_page, page_no)?;
                    return Ok(None);
                }
                let (separator, right_page) = internal.split_insert(
                    &mut self.file,
                    &split.separator,
                    split.right_page,
                    key_type,
                )?;
                Ok(Some(SplitInfo {
                    separator,
                    right_page,
                }))
            }
        }
    }

    /// Delete the entry matching both key and RID. Starts at the leftmost
    /// leaf that can hold the key and walks right across duplicates that
    /// spilled over leaf boundaries.
    pub fn delete_entry(&mut self, attr: &Attribute, key: &[u8], rid: Rid) -> Result<(), DbError> {
        let key_type = self.resolve_key_type(attr, false)?;
        let mut page_no = find_leaf_low(&mut self.file, Some(key), key_type)?;
        while page_no != NULL_PAGE {
            let mut leaf = LeafPage::load(&mut self.file, page_no)?;
            if !leaf.is_empty()
                && compare_keys(leaf.key_at(0, key_type), key, key_type) == Ordering::Greater
            {
                break;
            }
            match leaf.delete(key, rid, key_type) {
                Ok(()) => {
                    leaf.save(&mut self.file)?;
                    return Ok(());
                }
                Err(DbError::EntryNotFound) => page_no = leaf.next,
                Err(e) => return Err(e),
            }
        }
        Err(DbError::EntryNotFound)
    }

    /// Range scan over `(low, high)`; `None` bounds are unbounded. Keys are
    /// yielded in composite order together with their RIDs.
    pub fn scan(
        &mut self,
        attr: &Attribute,
        low: Option<&[u8]>,
        high: Option<&[u8]>,
        low_inclusive: bool,
        high_inclusive: bool,
    ) -> Result<BTreeScan<'_>, DbError> {
        let state = self.open_scan_state(attr, low, high, low_inclusive, high_inclusive)?;
        Ok(BTreeScan::new(&mut self.file, state))
    }

    /// Cursor state alone, for callers that keep the index handle
    /// themselves (the catalog's owning scan).
    pub(crate) fn open_scan_state(
        &mut self,
        attr: &Attribute,
        low: Option<&[u8]>,
        high: Option<&[u8]>,
        low_inclusive: bool,
        high_inclusive: bool,
    ) -> Result<IndexScanState, DbError> {
        let key_type = self.resolve_key_type(attr, false)?;
        IndexScanState::open(
            &mut self.file,
            key_type,
            low,
            low_inclusive,
            high,
            high_inclusive,
        )
    }

    pub(crate) fn file_mut(&mut self) -> &mut IndexFile {
        &mut self.file
    }

    /// Render the tree pre-order as JSON. Internal nodes carry `keys` and
    /// `children`; leaves collapse duplicate keys behind one entry:
    /// `"5:[(1,1),(1,2)]"`.
    pub fn print_tree(&mut self, attr: &Attribute) -> Result<Value, DbError> {
        let key_type = self.resolve_key_type(attr, false)?;
        let root = self.file.root();
        if root == NULL_PAGE {
            return Ok(json!({ "keys": [] }));
        }
        self.node_json(root, key_type)
    }

    fn node_json(&mut self, page_no: u32, key_type: KeyType) -> Result<Value, DbError> {
        let buf = self.file.read_page(page_no)?;
        match page_kind(&buf)? {
            PageKind::Leaf => {
                let leaf = LeafPage::from_buf(page_no, buf)?;
                let mut keys: Vec<String> = Vec::new();
                let mut run: Option<(String, Vec<Rid>)> = None;
                let mut pos = 0;
                for _ in 0..leaf.counter {
                    let (key, rid) = leaf.entry_at(pos, key_type);
                    let key_str = format_key(key, key_type);
                    match &mut run {
                        Some((current, rids)) if *current == key_str => rids.push(rid),
                        _ => {
                            if let Some(done) = run.take() {
                                keys.push(render_leaf_key(done));
                            }
                            run = Some((key_str, vec![rid]));
                        }
                    }
                    pos += leaf.entry_len_at(pos, key_type);
                }
                if let Some(done) = run.take() {
                    keys.push(render_leaf_key(done));
                }
                Ok(json!({ "keys": keys }))
            }
            PageKind::Internal => {
                let internal = InternalPage::from_buf(page_no, buf)?;
                let (first_child, entries) = internal.entries(key_type);
                let keys: Vec<String> = entries
                    .iter()
                    .map(|(key, _)| format_key(key, key_type))
                    .collect();
                let mut children = vec![self.node_json(first_child, key_type)?];
                for (_, child) in &entries {
                    children.push(self.node_json(*child, key_type)?);
                }
                Ok(json!({ "keys": keys, "children": children }))
            }
        }
    }
}

fn render_leaf_key((key, rids): (String, Vec<Rid>)) -> String {
    let rids: Vec<String> = rids
        .iter()
        .map(|rid| format!("({},{})", rid.page, rid.slot))
        .collect();
    format!("{key}:[{}]", rids.join(","))
}

/// Descend to the leftmost leaf that can contain `key` (`None` descends to
/// the leftmost leaf of the tree).
pub(crate) fn find_leaf_low(
    file: &mut IndexFile,
    key: Option<&[u8]>,
    key_type: KeyType,
) -> Result<u32, DbError> {
    let mut page_no = file.root();
    if page_no == NULL_PAGE {
        return Ok(NULL_PAGE);
    }
    loop {
        let buf = file.read_page(page_no)?;
        match page_kind(&buf)? {
            PageKind::Leaf => return Ok(page_no),
            PageKind::Internal => {
                let internal = InternalPage::from_buf(page_no, buf)?;
                page_no = match key {
                    Some(key) => internal.route_low(key, key_type),
                    None => internal.first_child(),
                };
            }
        }
    }
}

/// Patch the parent pointer of an arbitrary tree page in place.
pub(crate) fn set_page_parent(
    file: &mut IndexFile,
    page_no: u32,
    parent: u32,
) -> Result<(), DbError> {
    if page_no == NULL_PAGE {
        return Ok(());
    }
    let mut buf = file.read_page(page_no)?;
    LittleEndian::write_u32(&mut buf[PARENT_OFFSET..PARENT_OFFSET + 4], parent);
    file.write_page(page_no, &buf)
}
