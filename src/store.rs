//! `Store`: the public entry point tying the block layer, journal, buffer
//! pool, catalog, and B+Tree engine together.
//!
//! `Store::open` implements the startup recovery sequencing: acquire the
//! exclusive file lock, open the database file and its journal sidecar,
//! roll back unconditionally if the journal is non-empty, then read (or
//! initialize) the metadata page.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::btree::{BTree, Cursor};
use crate::catalog::{Catalog, ColumnDef, TableInfo};
use crate::column::DataType;
use crate::config::StoreConfig;
use crate::err;
use crate::error::{Error, Result};
use crate::page::{MetadataPage, PageNumber, SlottedPage};
use crate::pager::Pager;
use crate::row::Row;

pub struct Store {
    pager: Pager,
    metadata: MetadataPage,
    catalog: Catalog,
}

/// A value snapshot of the metadata page's allocator state plus the parsed
/// table catalog -- the consumer-facing view `metadata()`/`update_metadata()`
/// trade in, so a caller never has to touch `MetadataPage`'s raw catalog text
/// directly.
#[derive(Debug, Clone)]
pub struct MetadataView {
    pub total_pages: u32,
    pub free_pages: u32,
    pub first_free_page: u32,
    pub catalog: Catalog,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let path: PathBuf = path.as_ref().to_path_buf();
        info!(path = %path.display(), "opening store");

        let mut pager = Pager::open(&path, &config)?;

        if pager.journal_is_nonempty() {
            warn!("non-empty journal found at startup, rolling back an interrupted statement");
            pager.rollback()?;
        }

        let existed = path.exists() && std::fs::metadata(&path)?.len() > 0;
        let metadata = if existed {
            pager.get_page(0)?
        } else {
            let fresh = MetadataPage::empty();
            pager.update_page(0, &fresh)?;
            pager.commit(true)?;
            fresh
        };
        let catalog = Catalog::parse(&metadata.catalog_text)?;

        Ok(Store {
            pager,
            metadata,
            catalog,
        })
    }

    fn persist_catalog(&mut self) -> Result<()> {
        self.metadata.catalog_text = self.catalog.format();
        self.pager.update_page(0, &self.metadata)?;
        Ok(())
    }

    /// Creates a table with an empty root leaf page and records it in the
    /// catalog.
    pub fn create_table(
        &mut self,
        name: &str,
        pk_data_type: DataType,
        columns: Vec<ColumnDef>,
    ) -> Result<()> {
        if self.catalog.find(name).is_some() {
            return Err(err!(Config, "table '{}' already exists", name));
        }
        let key_type = pk_data_type
            .key_type()
            .ok_or_else(|| err!(Config, "{} cannot be used as a primary key type", pk_data_type))?;

        let root_page = self.pager.alloc_free_page(&mut self.metadata)?;
        self.pager.update_page(root_page, &SlottedPage::new_leaf())?;

        self.catalog.insert(TableInfo {
            name: name.to_string(),
            root_page,
            key_type,
            pk_data_type,
            columns,
        })?;
        self.persist_catalog()?;
        self.pager.commit(true)?;
        info!(table = name, root_page, "table created");
        Ok(())
    }

    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        let table = self
            .catalog
            .find(name)
            .ok_or_else(|| err!(Config, "table '{}' does not exist", name))?
            .clone();
        self.free_subtree(table.root_page)?;
        self.catalog.remove(name)?;
        self.persist_catalog()?;
        self.pager.commit(true)?;
        info!(table = name, "table dropped");
        Ok(())
    }

    fn free_subtree(&mut self, page_num: PageNumber) -> Result<()> {
        let page: SlottedPage = self.pager.get_page(page_num)?;
        if !page.is_leaf() {
            for cell in page.cells() {
                self.free_subtree(cell.left_child)?;
            }
            self.free_subtree(page.right_child)?;
        }
        self.pager.free(&mut self.metadata, page_num)?;
        Ok(())
    }

    fn table(&self, name: &str) -> Result<TableInfo> {
        self.catalog
            .find(name)
            .cloned()
            .ok_or_else(|| err!(Config, "table '{}' does not exist", name))
    }

    fn sync_root(&mut self, table_name: &str, new_root: PageNumber) -> Result<()> {
        let table = self
            .catalog
            .find_mut(table_name)
            .expect("table existed a moment ago");
        if table.root_page != new_root {
            table.root_page = new_root;
            self.persist_catalog()?;
        }
        Ok(())
    }

    /// Inserts `row` into `table_name`, rejecting a duplicate primary key.
    /// Commits on success, rolls back and re-raises on failure.
    pub fn insert(&mut self, table_name: &str, row: &Row) -> Result<()> {
        let table = self.table(table_name)?;
        let key = row.key.encode_key()?;
        let payload = row.encode()?;

        let result = {
            let mut btree = BTree::open(&mut self.pager, table.root_page, table.key_type);
            let result = btree.insert(&key, payload);
            let new_root = btree.root();
            (result, new_root)
        };
        let (result, new_root) = result;

        match result {
            Ok(()) => {
                self.sync_root(table_name, new_root)?;
                self.pager.commit(true)?;
                Ok(())
            }
            Err(e) => {
                self.pager.rollback()?;
                Err(e)
            }
        }
    }

    pub fn update(&mut self, table_name: &str, row: &Row) -> Result<()> {
        let table = self.table(table_name)?;
        let key = row.key.encode_key()?;
        let payload = row.encode()?;

        let result = {
            let mut btree = BTree::open(&mut self.pager, table.root_page, table.key_type);
            let result = btree.update(&key, payload);
            let new_root = btree.root();
            (result, new_root)
        };
        let (result, new_root) = result;

        match result {
            Ok(()) => {
                self.sync_root(table_name, new_root)?;
                self.pager.commit(true)?;
                Ok(())
            }
            Err(e) => {
                self.pager.rollback()?;
                Err(e)
            }
        }
    }

    pub fn delete(&mut self, table_name: &str, key: &crate::column::Value) -> Result<()> {
        let table = self.table(table_name)?;
        let key_bytes = key.encode_key()?;

        let result = {
            let mut btree = BTree::open(&mut self.pager, table.root_page, table.key_type);
            let result = btree.delete(&key_bytes);
            let new_root = btree.root();
            (result, new_root)
        };
        let (result, new_root) = result;

        match result {
            Ok(()) => {
                self.sync_root(table_name, new_root)?;
                self.pager.commit(true)?;
                Ok(())
            }
            Err(e) => {
                self.pager.rollback()?;
                Err(e)
            }
        }
    }

    pub fn search(&mut self, table_name: &str, key: &crate::column::Value) -> Result<Option<Row>> {
        let table = self.table(table_name)?;
        let key_bytes = key.encode_key()?;
        let mut btree = BTree::open(&mut self.pager, table.root_page, table.key_type);
        match btree.search(&key_bytes)? {
            Some(payload) => Ok(Some(Row::decode(&table, &payload)?)),
            None => Ok(None),
        }
    }

    /// Forward cursor over every row in `table_name`, in key order.
    pub fn scan(&mut self, table_name: &str) -> Result<RowIter<'_>> {
        let table = self.table(table_name)?;
        let btree = BTree::open(&mut self.pager, table.root_page, table.key_type);
        let cursor = btree.scan(None)?;
        Ok(RowIter { cursor, table })
    }

    /// A value snapshot of the allocator state and table catalog. Mirrors
    /// the consumer-facing API in spec.md §6: `metadata() -> MetadataView`.
    pub fn metadata(&self) -> MetadataView {
        MetadataView {
            total_pages: self.metadata.total_pages,
            free_pages: self.metadata.free_pages,
            first_free_page: self.metadata.first_free_page,
            catalog: self.catalog.clone(),
        }
    }

    /// Replaces the allocator state and table catalog wholesale, persists
    /// the metadata page, and commits. Mirrors spec.md §6:
    /// `update_metadata(MetadataView)`.
    pub fn update_metadata(&mut self, view: MetadataView) -> Result<()> {
        self.metadata.total_pages = view.total_pages;
        self.metadata.free_pages = view.free_pages;
        self.metadata.first_free_page = view.first_free_page;
        self.catalog = view.catalog;
        self.persist_catalog()?;
        self.pager.commit(true)?;
        info!("metadata updated via update_metadata");
        Ok(())
    }

    /// Walks the on-disk freelist from `first_free_page`, for tests that
    /// need to check it stays disjoint from every page reachable from a
    /// table's root. Goes through the same `Pager::get_page` every other
    /// read uses -- not a raw byte inspection.
    pub fn free_page_chain(&mut self) -> Result<Vec<PageNumber>> {
        let mut chain = Vec::new();
        let mut next = self.metadata.first_free_page;
        while next != 0 {
            chain.push(next);
            let free: crate::page::FreePage = self.pager.get_page(next)?;
            next = free.next;
        }
        Ok(chain)
    }

    /// Every page reachable from `table_name`'s root, for the same
    /// freelist-disjointness check.
    pub fn reachable_pages(&mut self, table_name: &str) -> Result<Vec<PageNumber>> {
        let table = self.table(table_name)?;
        let mut out = Vec::new();
        self.collect_reachable(table.root_page, &mut out)?;
        Ok(out)
    }

    fn collect_reachable(&mut self, page_num: PageNumber, out: &mut Vec<PageNumber>) -> Result<()> {
        out.push(page_num);
        let page: SlottedPage = self.pager.get_page(page_num)?;
        if !page.is_leaf() {
            for cell in page.cells() {
                self.collect_reachable(cell.left_child, out)?;
            }
            self.collect_reachable(page.right_child, out)?;
        }
        Ok(())
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Flushes the metadata page and clears the journal. Called
    /// automatically by every mutating method; exposed for callers that
    /// batch several statements under one commit.
    pub fn commit(&mut self) -> Result<()> {
        self.pager.commit(true)
    }

    pub fn close(mut self) -> Result<()> {
        self.pager.commit(true)?;
        Ok(())
    }
}

pub struct RowIter<'a> {
    cursor: Cursor<'a>,
    table: TableInfo,
}

impl<'a> RowIter<'a> {
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        match self.cursor.next()? {
            Some(payload) => Ok(Some(Row::decode(&self.table, &payload)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Value;

    fn open_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("db"), StoreConfig::default()).unwrap();
        (dir, store)
    }

    fn devices_row(id: i64, reading: i64) -> Row {
        Row {
            key: Value::Int(id),
            columns: vec![Value::Int(reading)],
        }
    }

    #[test]
    fn create_insert_search_roundtrips() {
        let (_dir, mut store) = open_store();
        store
            .create_table(
                "devices",
                DataType::Int,
                vec![ColumnDef {
                    name: "reading".to_string(),
                    data_type: DataType::Int,
                }],
            )
            .unwrap();

        store.insert("devices", &devices_row(1, 42)).unwrap();
        let found = store.search("devices", &Value::Int(1)).unwrap();
        assert_eq!(found, Some(devices_row(1, 42)));
    }

    #[test]
    fn duplicate_insert_rolls_back_cleanly() {
        let (_dir, mut store) = open_store();
        store
            .create_table("devices", DataType::Int, vec![])
            .unwrap();
        store.insert("devices", &devices_row(1, 1)).unwrap();
        let err = store.insert("devices", &devices_row(1, 2));
        assert!(matches!(err, Err(Error::DuplicateKey)));
        // the original row must still be there, unharmed by the rollback.
        let found = store.search("devices", &Value::Int(1)).unwrap().unwrap();
        assert_eq!(found.columns, vec![]);
    }

    #[test]
    fn delete_then_search_returns_none() {
        let (_dir, mut store) = open_store();
        store
            .create_table("devices", DataType::Int, vec![])
            .unwrap();
        store.insert("devices", &devices_row(1, 1)).unwrap();
        store.delete("devices", &Value::Int(1)).unwrap();
        assert_eq!(store.search("devices", &Value::Int(1)).unwrap(), None);
    }

    #[test]
    fn reopen_recovers_committed_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let mut store = Store::open(&path, StoreConfig::default()).unwrap();
            store
                .create_table("devices", DataType::Int, vec![])
                .unwrap();
            store.insert("devices", &devices_row(7, 0)).unwrap();
        }
        let mut reopened = Store::open(&path, StoreConfig::default()).unwrap();
        let found = reopened.search("devices", &Value::Int(7)).unwrap();
        assert_eq!(found, Some(devices_row(7, 0)));
    }

    #[test]
    fn scan_returns_rows_in_key_order() {
        let (_dir, mut store) = open_store();
        store
            .create_table("devices", DataType::Int, vec![])
            .unwrap();
        for id in [3i64, 1, 2] {
            store.insert("devices", &devices_row(id, 0)).unwrap();
        }
        let mut iter = store.scan("devices").unwrap();
        let mut ids = Vec::new();
        while let Some(row) = iter.next_row().unwrap() {
            if let Value::Int(id) = row.key {
                ids.push(id);
            }
        }
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn update_metadata_persists_catalog_changes() {
        let (_dir, mut store) = open_store();
        store
            .create_table("devices", DataType::Int, vec![])
            .unwrap();

        let mut view = store.metadata();
        assert_eq!(view.catalog.tables.len(), 1);
        view.catalog
            .find_mut("devices")
            .unwrap()
            .columns
            .push(ColumnDef {
                name: "reading".to_string(),
                data_type: DataType::Int,
            });
        store.update_metadata(view).unwrap();

        let reloaded = store.metadata();
        assert_eq!(reloaded.catalog.find("devices").unwrap().columns.len(), 1);
    }
}
