//! Buffer pool, allocator, and commit/rollback protocol.
//!
//! Ties the cache, the dirty-page set, the on-disk free list, and the
//! journal together. Page 0 (metadata) is always resident and is only ever
//! marked dirty when genuinely modified.

use std::path::Path;

use tracing::{debug, trace};

use crate::block_io::{BlockIo, PAGE_SIZE};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::journal::Journal;
use crate::page::{FreePage, MetadataPage, PageNumber, SlottedPage};

const MAX_CACHE: usize = crate::config::MAX_CACHE_PAGES;
const MAX_DIRTY: usize = crate::config::MAX_DIRTY_PAGES;

struct CacheEntry {
    page_number: PageNumber,
    image: [u8; PAGE_SIZE],
}

pub struct Pager {
    io: BlockIo,
    journal: Journal,
    cache: heapless::Vec<CacheEntry, MAX_CACHE>,
    dirty: heapless::Vec<PageNumber, MAX_DIRTY>,
    cache_cap: usize,
    dirty_cap: usize,
}

/// Codec for the three page variants the pager moves opaque images for.
pub trait PageCodec: Sized {
    fn decode_image(buf: &[u8; PAGE_SIZE]) -> Result<Self>;
    fn encode_image(&self) -> Result<[u8; PAGE_SIZE]>;
}

impl PageCodec for SlottedPage {
    fn decode_image(buf: &[u8; PAGE_SIZE]) -> Result<Self> {
        SlottedPage::decode(buf)
    }
    fn encode_image(&self) -> Result<[u8; PAGE_SIZE]> {
        Ok(self.encode())
    }
}

impl PageCodec for FreePage {
    fn decode_image(buf: &[u8; PAGE_SIZE]) -> Result<Self> {
        Ok(FreePage::decode(buf))
    }
    fn encode_image(&self) -> Result<[u8; PAGE_SIZE]> {
        Ok(self.encode())
    }
}

impl PageCodec for MetadataPage {
    fn decode_image(buf: &[u8; PAGE_SIZE]) -> Result<Self> {
        MetadataPage::decode(buf)
    }
    fn encode_image(&self) -> Result<[u8; PAGE_SIZE]> {
        self.encode()
    }
}

impl Pager {
    pub fn open<P: AsRef<Path>>(path: P, config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let io = BlockIo::open(path.as_ref())?;
        let journal = Journal::open(path.as_ref(), config.journal_ring_cap)?;
        Ok(Pager {
            io,
            journal,
            cache: heapless::Vec::new(),
            dirty: heapless::Vec::new(),
            cache_cap: config.cache_cap,
            dirty_cap: config.dirty_cap,
        })
    }

    pub fn journal_is_nonempty(&self) -> bool {
        self.journal.is_nonempty()
    }

    fn is_dirty(&self, page_number: PageNumber) -> bool {
        self.dirty.contains(&page_number)
    }

    fn cache_find(&self, page_number: PageNumber) -> Option<usize> {
        self.cache.iter().position(|e| e.page_number == page_number)
    }

    /// Admits `image` for `page_number`, evicting a non-dirty entry if the
    /// cache is at capacity. This must always find a candidate because
    /// `dirty_cap < cache_cap`; failure is `Error::CacheExhausted`, a
    /// surfaced condition rather than a panic.
    fn cache_admit(&mut self, page_number: PageNumber, image: [u8; PAGE_SIZE]) -> Result<()> {
        if let Some(idx) = self.cache_find(page_number) {
            self.cache[idx].image = image;
            return Ok(());
        }

        if self.cache.len() >= self.cache_cap || self.cache.len() >= MAX_CACHE {
            // Page 0 (metadata) is never evicted, per the data model: it's
            // consulted on nearly every operation and is cheap to keep pinned.
            let evict_idx = self
                .cache
                .iter()
                .position(|e| e.page_number != 0 && !self.is_dirty(e.page_number))
                .ok_or(Error::CacheExhausted)?;
            self.cache.swap_remove(evict_idx);
        }

        self.cache
            .push(CacheEntry { page_number, image })
            .map_err(|_| Error::CacheExhausted)?;
        Ok(())
    }

    fn read_image(&mut self, page_number: PageNumber) -> Result<[u8; PAGE_SIZE]> {
        if let Some(idx) = self.cache_find(page_number) {
            return Ok(self.cache[idx].image);
        }
        let mut buf = [0u8; PAGE_SIZE];
        let n = self.io.read(page_number, &mut buf)?;
        if n == 0 {
            return Err(Error::Corruption(format!(
                "read of page {} past end of file",
                page_number
            )));
        }
        self.cache_admit(page_number, buf)?;
        Ok(buf)
    }

    pub fn get_page<T: PageCodec>(&mut self, page_number: PageNumber) -> Result<T> {
        let image = self.read_image(page_number)?;
        T::decode_image(&image)
    }

    /// Serializes `value`, journals the pre-image on first mutation of this
    /// epoch, and installs the new bytes in the cache.
    pub fn update_page<T: PageCodec>(&mut self, page_number: PageNumber, value: &T) -> Result<()> {
        let new_image = value.encode_image()?;

        if !self.is_dirty(page_number) {
            let current = self.read_image(page_number)?;
            if self.dirty.len() >= self.dirty_cap {
                self.commit(false)?;
            }
            self.dirty
                .push(page_number)
                .map_err(|_| Error::CacheExhausted)?;
            self.journal.record(page_number, current)?;
        }

        self.cache_admit(page_number, new_image)?;
        trace!(page_number, "page updated");
        Ok(())
    }

    /// Allocates a page: pops the freelist head, or reserves space past the
    /// current end of file.
    pub fn alloc_free_page(&mut self, metadata: &mut MetadataPage) -> Result<PageNumber> {
        if metadata.first_free_page == 0 {
            let page_number = metadata.total_pages;
            metadata.total_pages += 1;
            self.cache_admit(page_number, FreePage { next: 0 }.encode())?;
            if !self.is_dirty(page_number) {
                if self.dirty.len() >= self.dirty_cap {
                    self.commit(false)?;
                }
                self.dirty
                    .push(page_number)
                    .map_err(|_| Error::CacheExhausted)?;
            }
            self.journal.maybe_set_first_newly_alloced_page(page_number);
            trace!(page_number, "allocated new page past EOF");
            Ok(page_number)
        } else {
            let page_number = metadata.first_free_page;
            let free: FreePage = self.get_page(page_number)?;
            metadata.first_free_page = free.next;
            metadata.free_pages -= 1;
            trace!(page_number, "allocated page from freelist");
            Ok(page_number)
        }
    }

    /// Frees `page_number`: overwrites it with a Free-page image, pushes it
    /// onto the freelist head. Page 0 can never be freed.
    pub fn free(&mut self, metadata: &mut MetadataPage, page_number: PageNumber) -> Result<()> {
        if page_number == 0 {
            return Err(Error::Corruption("refusing to free page 0".into()));
        }
        let free_page = FreePage {
            next: metadata.first_free_page,
        };
        self.update_page(page_number, &free_page)?;
        metadata.first_free_page = page_number;
        metadata.free_pages += 1;
        trace!(page_number, "freed page, pushed onto freelist head");
        Ok(())
    }

    /// Flushes dirty pages to the database file. If `execution_completed`,
    /// also clears the journal; otherwise the journal is left intact so a
    /// later failure still rolls back to the statement's pre-image.
    pub fn commit(&mut self, execution_completed: bool) -> Result<()> {
        if self.dirty.is_empty() {
            if execution_completed {
                self.journal.clear()?;
            }
            return Ok(());
        }

        self.journal.persist()?;

        let mut dirty_sorted: Vec<PageNumber> = self.dirty.iter().copied().collect();
        dirty_sorted.sort_unstable();
        for page_number in dirty_sorted {
            let idx = self
                .cache_find(page_number)
                .ok_or_else(|| Error::Corruption(format!("dirty page {} missing from cache", page_number)))?;
            let image = self.cache[idx].image;
            self.io.write(page_number, &image)?;
        }

        self.dirty.clear();
        debug!(execution_completed, "pager commit flushed dirty pages");

        if execution_completed {
            self.journal.clear()?;
        }
        Ok(())
    }

    /// Restores every journaled pre-image to the database file, truncates
    /// away any pages allocated during the aborted statement, and clears
    /// both the dirty set and the journal.
    pub fn rollback(&mut self) -> Result<()> {
        let mut offset = 0;
        loop {
            let batch = self.journal.batch_get_original_pages(offset)?;
            if batch.is_empty() {
                break;
            }
            for (page_number, image) in &batch {
                self.io.write(*page_number, image)?;
                if let Some(idx) = self.cache_find(*page_number) {
                    self.cache[idx].image = *image;
                }
            }
            offset += batch.len();
        }

        if let Some(first_new) = self.journal.first_new_alloced_page() {
            self.io.truncate(Some(first_new))?;
            self.cache.retain(|e| e.page_number < first_new);
        }

        self.dirty.clear();
        self.journal.clear()?;
        debug!(pages_restored = offset, "pager rollback complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::Cell;

    fn open(dir: &tempfile::TempDir) -> Pager {
        Pager::open(dir.path().join("db"), &StoreConfig::default()).unwrap()
    }

    #[test]
    fn update_then_commit_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut pager = open(&dir);
            let mut page = SlottedPage::new_leaf();
            page.set_cells(vec![Cell {
                left_child: 0,
                payload: vec![1, 2, 3],
            }])
            .unwrap();
            pager.update_page(1, &page).unwrap();
            pager.commit(true).unwrap();
        }

        let mut pager = open(&dir);
        let page: SlottedPage = pager.get_page(1).unwrap();
        assert_eq!(page.num_slots(), 1);
    }

    #[test]
    fn rollback_restores_pre_image() {
        let dir = tempfile::tempdir().unwrap();
        let mut pager = open(&dir);

        let mut original = SlottedPage::new_leaf();
        original
            .set_cells(vec![Cell {
                left_child: 0,
                payload: vec![9],
            }])
            .unwrap();
        pager.update_page(1, &original).unwrap();
        pager.commit(true).unwrap();

        let mut modified = SlottedPage::new_leaf();
        modified
            .set_cells(vec![Cell {
                left_child: 0,
                payload: vec![1, 2],
            }])
            .unwrap();
        pager.update_page(1, &modified).unwrap();

        pager.rollback().unwrap();

        let page: SlottedPage = pager.get_page(1).unwrap();
        assert_eq!(page.cell(0).unwrap().payload, vec![9]);
    }

    #[test]
    fn alloc_then_rollback_truncates_new_pages() {
        let dir = tempfile::tempdir().unwrap();
        let mut pager = open(&dir);
        let mut metadata = MetadataPage::empty();

        let page_number = pager.alloc_free_page(&mut metadata).unwrap();
        assert_eq!(page_number, 1);
        pager.rollback().unwrap();

        let mut buf = [0u8; PAGE_SIZE];
        // after rollback, the pager's own BlockIo handle should read 0
        // bytes back for the truncated-away page.
        let n = pager.io.read(page_number, &mut buf).unwrap();
        assert_eq!(n, 0);
    }
}
