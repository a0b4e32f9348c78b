//! Last-written LSN tracking.
//!
//! For every page written out of the buffer cache we need to remember the
//! LSN of its last modification, so that a later read of the page can ask
//! the page server for a version at least that new. Tracking every page
//! ever written is not an option, so the cache holds a bounded number of
//! entries. When an entry is evicted, its LSN is folded into a single
//! watermark that stands in for every page without an entry of its own.
//! That errs on the side of newer read points, which costs page server
//! waiting time but never correctness.

use std::num::NonZeroUsize;

use lru::LruCache;
use pageserver_api::reltag::{BufferTag, RelTag};
use postgres_ffi_types::BlockNumber;
use postgres_ffi_types::constants::REL_METADATA_PSEUDO_BLOCKNO;
use utils::lsn::Lsn;

pub struct LastWrittenLsnCache {
    entries: LruCache<BufferTag, Lsn>,
    /// Highest LSN of any entry evicted so far.
    max_evicted: Lsn,
}

impl LastWrittenLsnCache {
    /// `start_lsn` covers every page modified before the cache was created.
    pub fn new(capacity: NonZeroUsize, start_lsn: Lsn) -> Self {
        LastWrittenLsnCache {
            entries: LruCache::new(capacity),
            max_evicted: start_lsn,
        }
    }

    pub fn get(&mut self, rel: RelTag, blkno: BlockNumber) -> Lsn {
        let tag = BufferTag { rel, blkno };
        match self.entries.get(&tag) {
            Some(lsn) => std::cmp::max(*lsn, self.max_evicted),
            None => self.max_evicted,
        }
    }

    /// Record a modification of one block. The recorded LSN never moves
    /// backwards, and an invalid LSN is ignored.
    pub fn set_for_block(&mut self, lsn: Lsn, rel: RelTag, blkno: BlockNumber) {
        if !lsn.is_valid() {
            return;
        }
        let tag = BufferTag { rel, blkno };
        if let Some(existing) = self.entries.get_mut(&tag) {
            if *existing < lsn {
                *existing = lsn;
            }
            return;
        }
        if let Some((_, evicted)) = self.entries.push(tag, lsn) {
            // push returns the old entry for the same key too, but we just
            // checked there is none
            self.max_evicted = std::cmp::max(self.max_evicted, evicted);
        }
    }

    /// Record a change of the fork as a whole, such as a size change.
    pub fn set_for_relation(&mut self, lsn: Lsn, rel: RelTag) {
        self.set_for_block(lsn, rel, REL_METADATA_PSEUDO_BLOCKNO)
    }

    pub fn get_for_relation(&mut self, rel: RelTag) -> Lsn {
        self.get(rel, REL_METADATA_PSEUDO_BLOCKNO)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
