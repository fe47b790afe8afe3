//! Tunable capacities for the storage core.
//!
//! The bounded containers in the page manager and journal (cache, dirty
//! set, journal ring, sibling-load fan-out) are sized by these values. The
//! defaults match the compile-time constants the spec describes; embedders
//! that need different capacities can construct a `StoreConfig` directly
//! and pass it to `Store::open_with_config`.

use crate::error::{Error, Result};

/// Upper bound on the number of pages a journal ring or cache-like
/// container may hold in this build. Containers are backed by
/// `heapless::Vec`, whose capacity is a const generic, so `StoreConfig`'s
/// fields are validated against this fixed ceiling rather than being
/// fully dynamic.
pub const MAX_CACHE_PAGES: usize = 1024;
pub const MAX_DIRTY_PAGES: usize = 1000;
pub const MAX_JOURNAL_RING: usize = 64;
pub const MAX_SIBLINGS: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// Page cache capacity (`C` in the spec). Must exceed `dirty_cap`.
    pub cache_cap: usize,
    /// Dirty-page set capacity (`D` in the spec). Must be `< cache_cap`.
    pub dirty_cap: usize,
    /// Journal unsaved-entry ring capacity (`N` in the spec). Must be
    /// `<= dirty_cap`.
    pub journal_ring_cap: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            cache_cap: MAX_CACHE_PAGES,
            dirty_cap: MAX_DIRTY_PAGES,
            journal_ring_cap: 64,
        }
    }
}

impl StoreConfig {
    /// Validates the invariants the spec requires of the bounded
    /// containers: `dirty_cap < cache_cap` and `journal_ring_cap <=
    /// dirty_cap`, plus that nothing exceeds the build's fixed backing
    /// capacity (the `heapless` containers can't grow past that at
    /// runtime no matter what a caller asks for).
    pub fn validate(&self) -> Result<()> {
        if self.cache_cap > MAX_CACHE_PAGES {
            return Err(Error::Config(format!(
                "cache_cap {} exceeds the build's fixed capacity {}",
                self.cache_cap, MAX_CACHE_PAGES
            )));
        }
        if self.dirty_cap > MAX_DIRTY_PAGES {
            return Err(Error::Config(format!(
                "dirty_cap {} exceeds the build's fixed capacity {}",
                self.dirty_cap, MAX_DIRTY_PAGES
            )));
        }
        if self.journal_ring_cap > MAX_JOURNAL_RING {
            return Err(Error::Config(format!(
                "journal_ring_cap {} exceeds the build's fixed capacity {}",
                self.journal_ring_cap, MAX_JOURNAL_RING
            )));
        }
        if self.dirty_cap >= self.cache_cap {
            return Err(Error::Config(format!(
                "dirty_cap ({}) must be strictly less than cache_cap ({})",
                self.dirty_cap, self.cache_cap
            )));
        }
        if self.journal_ring_cap > self.dirty_cap {
            return Err(Error::Config(format!(
                "journal_ring_cap ({}) must not exceed dirty_cap ({})",
                self.journal_ring_cap, self.dirty_cap
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        StoreConfig::default().validate().unwrap();
    }

    #[test]
    fn dirty_cap_must_be_below_cache_cap() {
        let cfg = StoreConfig {
            cache_cap: 10,
            dirty_cap: 10,
            journal_ring_cap: 4,
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn journal_ring_must_not_exceed_dirty_cap() {
        let cfg = StoreConfig {
            cache_cap: 10,
            dirty_cap: 4,
            journal_ring_cap: 5,
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }
}
