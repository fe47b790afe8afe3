//! Write-ahead rollback journal: a sidecar file recording pre-images of
//! modified pages, plus a marker for the first newly-allocated page, so a
//! failed statement can be rolled back to a consistent database file.
//!
//! File layout: journal page 0 is journal metadata (`u32
//! first_new_alloced_page`, `u32 n_pages`, `u32[1022] recorded_page_numbers`);
//! journal pages `1..=count` hold the corresponding pre-images in the same
//! order. The journal lives beside the database file as `<db-path>.journal`
//! and is truncated (not deleted) by `clear`, so a crash between epochs
//! leaves a harmless empty file rather than requiring the directory entry
//! to be recreated under time pressure.

use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::block_io::{BlockIo, PAGE_SIZE};
use crate::error::{Error, Result};
use crate::page::PageNumber;

pub const MAX_RECORDED_PAGES: usize = 1022;
const JOURNAL_META_HEADER: usize = 8; // u32 first_new_alloced_page + u32 n_pages

struct UnsavedEntry {
    page_number: PageNumber,
    image: [u8; PAGE_SIZE],
}

pub struct Journal {
    io: BlockIo,
    /// Cached copy of journal page 0.
    first_new_alloced_page: u32,
    recorded: heapless::Vec<u32, MAX_RECORDED_PAGES>,
    /// Pending pre-images not yet flushed to the journal file.
    unsaved: heapless::Vec<UnsavedEntry, 64>,
    ring_cap: usize,
}

impl Journal {
    pub fn open<P: AsRef<Path>>(db_path: P, ring_cap: usize) -> Result<Self> {
        let path = journal_path(db_path.as_ref());
        let mut io = BlockIo::open(&path)?;

        let mut meta_buf = [0u8; PAGE_SIZE];
        let (first_new_alloced_page, recorded) = if io.read(0, &mut meta_buf)? == PAGE_SIZE {
            decode_meta(&meta_buf)?
        } else {
            (0, heapless::Vec::new())
        };

        Ok(Journal {
            io,
            first_new_alloced_page,
            recorded,
            unsaved: heapless::Vec::new(),
            ring_cap,
        })
    }

    /// True iff there is anything at all to roll back: either a persisted
    /// entry or an unsaved one. `Store::open` uses this to decide whether a
    /// prior session left an incomplete commit behind.
    pub fn is_nonempty(&self) -> bool {
        !self.recorded.is_empty() || !self.unsaved.is_empty()
    }

    pub fn first_new_alloced_page(&self) -> Option<PageNumber> {
        if self.first_new_alloced_page == 0 {
            None
        } else {
            Some(self.first_new_alloced_page)
        }
    }

    /// Latches the first newly-allocated page number seen this epoch.
    /// Monotonic: later calls are ignored.
    pub fn maybe_set_first_newly_alloced_page(&mut self, page_number: PageNumber) {
        if self.first_new_alloced_page == 0 {
            self.first_new_alloced_page = page_number;
            trace!(page_number, "journal latched first newly-allocated page");
        }
    }

    /// Records `pre_image` for `page_number` unless it's already recorded
    /// (persisted or unsaved) this epoch -- at-most-once per page.
    pub fn record(&mut self, page_number: PageNumber, pre_image: [u8; PAGE_SIZE]) -> Result<()> {
        if self.recorded.contains(&page_number)
            || self.unsaved.iter().any(|e| e.page_number == page_number)
        {
            return Ok(());
        }

        if self.unsaved.len() >= self.ring_cap {
            self.persist()?;
        }

        self.unsaved
            .push(UnsavedEntry {
                page_number,
                image: pre_image,
            })
            .map_err(|_| Error::Corruption("journal ring overflowed after persist".into()))?;
        trace!(page_number, "journal recorded pre-image");
        Ok(())
    }

    /// Flushes every unsaved entry to the journal file: pre-image pages
    /// first, then the updated metadata page. This order is what makes
    /// rollback sound across a crash mid-persist: an unreferenced page
    /// image left by a crash before the metadata write is simply ignored
    /// on next open.
    pub fn persist(&mut self) -> Result<()> {
        if self.unsaved.is_empty() {
            return Ok(());
        }

        for entry in self.unsaved.iter() {
            let journal_page = 1 + self.recorded.len() as u32;
            self.io.write(journal_page, &entry.image)?;
            self.recorded
                .push(entry.page_number)
                .map_err(|_| Error::Corruption("journal metadata array overflowed".into()))?;
        }
        self.unsaved.clear();

        let meta = encode_meta(self.first_new_alloced_page, &self.recorded)?;
        self.io.write(0, &meta)?;
        debug!(recorded = self.recorded.len(), "journal persisted");
        Ok(())
    }

    /// Returns up to 16 consecutive pre-images starting at `offset` into
    /// the journal (persisted entries first, then unsaved ones), for
    /// rollback only.
    pub fn batch_get_original_pages(
        &mut self,
        offset: usize,
    ) -> Result<Vec<(PageNumber, [u8; PAGE_SIZE])>> {
        const BATCH: usize = 16;
        let mut out = Vec::with_capacity(BATCH);

        let mut idx = offset;
        while out.len() < BATCH && idx < self.recorded.len() {
            let page_number = self.recorded[idx];
            let mut buf = [0u8; PAGE_SIZE];
            let journal_page = 1 + idx as u32;
            self.io.read(journal_page, &mut buf)?;
            out.push((page_number, buf));
            idx += 1;
        }

        let unsaved_start = idx.saturating_sub(self.recorded.len());
        for entry in self.unsaved.iter().skip(unsaved_start) {
            if out.len() >= BATCH {
                break;
            }
            out.push((entry.page_number, entry.image));
        }

        Ok(out)
    }

    pub fn total_recorded(&self) -> usize {
        self.recorded.len() + self.unsaved.len()
    }

    /// Resets unsaved ring and metadata, truncates the journal file. Called
    /// only once a statement has committed cleanly.
    pub fn clear(&mut self) -> Result<()> {
        self.unsaved.clear();
        self.recorded.clear();
        self.first_new_alloced_page = 0;
        self.io.truncate(None)?;
        debug!("journal cleared");
        Ok(())
    }
}

fn journal_path(db_path: &Path) -> PathBuf {
    let mut s = db_path.as_os_str().to_owned();
    s.push(".journal");
    PathBuf::from(s)
}

fn encode_meta(
    first_new_alloced_page: u32,
    recorded: &heapless::Vec<u32, MAX_RECORDED_PAGES>,
) -> Result<[u8; PAGE_SIZE]> {
    let mut buf = [0u8; PAGE_SIZE];
    buf[0..4].copy_from_slice(&first_new_alloced_page.to_le_bytes());
    buf[4..8].copy_from_slice(&(recorded.len() as u32).to_le_bytes());
    for (i, page) in recorded.iter().enumerate() {
        let off = JOURNAL_META_HEADER + i * 4;
        buf[off..off + 4].copy_from_slice(&page.to_le_bytes());
    }
    Ok(buf)
}

fn decode_meta(buf: &[u8; PAGE_SIZE]) -> Result<(u32, heapless::Vec<u32, MAX_RECORDED_PAGES>)> {
    let first_new_alloced_page = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let count = u32::from_le_bytes(buf[4..8].try_into().unwrap()) as usize;
    if count > MAX_RECORDED_PAGES {
        return Err(Error::Corruption(format!(
            "journal metadata reports {} recorded pages, max is {}",
            count, MAX_RECORDED_PAGES
        )));
    }
    let mut recorded = heapless::Vec::new();
    for i in 0..count {
        let off = JOURNAL_META_HEADER + i * 4;
        let page = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        recorded
            .push(page)
            .map_err(|_| Error::Corruption("journal metadata array overflowed".into()))?;
    }
    Ok((first_new_alloced_page, recorded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_io::PAGE_SIZE;

    fn image(byte: u8) -> [u8; PAGE_SIZE] {
        [byte; PAGE_SIZE]
    }

    #[test]
    fn record_is_at_most_once_per_page() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("db");
        let mut journal = Journal::open(&db_path, 64).unwrap();

        journal.record(3, image(1)).unwrap();
        journal.record(3, image(2)).unwrap();
        journal.persist().unwrap();

        let batch = journal.batch_get_original_pages(0).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0], (3, image(1)));
    }

    #[test]
    fn persist_then_clear_round_trips_through_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("db");
        {
            let mut journal = Journal::open(&db_path, 64).unwrap();
            journal.record(1, image(9)).unwrap();
            journal.record(2, image(8)).unwrap();
            journal.maybe_set_first_newly_alloced_page(5);
            journal.persist().unwrap();
        }

        let journal = Journal::open(&db_path, 64).unwrap();
        assert!(journal.is_nonempty());
        assert_eq!(journal.first_new_alloced_page(), Some(5));
        let batch = journal.batch_get_original_pages(0).unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn clear_truncates_journal() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("db");
        let mut journal = Journal::open(&db_path, 64).unwrap();
        journal.record(1, image(1)).unwrap();
        journal.persist().unwrap();
        journal.clear().unwrap();
        assert!(!journal.is_nonempty());

        let reopened = Journal::open(&db_path, 64).unwrap();
        assert!(!reopened.is_nonempty());
    }
}
