//! Page-addressed read/write/truncate over a single file handle.
//!
//! This is the thin bottom layer described by the storage core: no framing,
//! no journaling, no caching. Just seek-and-read, seek-and-write, and
//! truncate, all addressed by page number. The file is opened with an
//! exclusive advisory lock so a second process can't open the same database
//! concurrently.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use fs2::FileExt;
use tracing::trace;

use crate::error::{Error, Result};

pub const PAGE_SIZE: usize = 4096;

pub struct BlockIo {
    file: File,
}

impl BlockIo {
    /// Opens (creating if absent) the file at `path` and takes an exclusive
    /// lock on it. Fails with `Error::Locked` if another process already
    /// holds the lock.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path.as_ref())?;

        file.try_lock_exclusive().map_err(|_| {
            Error::Locked(format!(
                "{} is already open in another process",
                path.as_ref().display()
            ))
        })?;

        Ok(BlockIo { file })
    }

    /// Reads one page into `buffer`, returning the number of bytes read.
    /// Returns `Ok(0)` iff `page_number` is past end-of-file. Any read of
    /// 1..PAGE_SIZE-1 bytes is treated as corruption, per the block I/O
    /// contract: a file should only ever hold whole pages.
    pub fn read(&mut self, page_number: u32, buffer: &mut [u8; PAGE_SIZE]) -> Result<usize> {
        self.file
            .seek(SeekFrom::Start(page_number as u64 * PAGE_SIZE as u64))?;

        let mut read_total = 0;
        loop {
            match self.file.read(&mut buffer[read_total..])? {
                0 => break,
                n => {
                    read_total += n;
                    if read_total == PAGE_SIZE {
                        break;
                    }
                }
            }
        }

        if read_total != 0 && read_total != PAGE_SIZE {
            return Err(Error::Corruption(format!(
                "partial read of page {}: got {} of {} bytes",
                page_number, read_total, PAGE_SIZE
            )));
        }

        trace!(page_number, read_total, "block_io read");
        Ok(read_total)
    }

    /// Writes one page. Writing past current end-of-file extends it; this
    /// is how `alloc_free_page` reserves space without a separate resize
    /// call.
    pub fn write(&mut self, page_number: u32, bytes: &[u8; PAGE_SIZE]) -> Result<usize> {
        self.file
            .seek(SeekFrom::Start(page_number as u64 * PAGE_SIZE as u64))?;
        self.file.write_all(bytes)?;
        trace!(page_number, "block_io write");
        Ok(PAGE_SIZE)
    }

    /// Shrinks the file to `page_number` pages, or to zero length if `None`.
    pub fn truncate(&mut self, page_number: Option<u32>) -> Result<()> {
        let new_len = page_number.map(|p| p as u64 * PAGE_SIZE as u64).unwrap_or(0);
        self.file.set_len(new_len)?;
        trace!(new_len, "block_io truncate");
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

impl Drop for BlockIo {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
