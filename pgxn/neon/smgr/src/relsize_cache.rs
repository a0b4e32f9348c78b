use std::collections::HashMap;

use pageserver_api::reltag::RelTag;
use postgres_ffi_types::BlockNumber;

/// Known sizes of relation forks, in blocks.
pub trait RelSizeCache {
    fn get(&self, rel: RelTag) -> Option<BlockNumber>;

    fn set(&mut self, rel: RelTag, n_blocks: BlockNumber);

    /// Record a size learned from the page server. Never shrinks an entry:
    /// a concurrent local extension may already have recorded a larger size.
    fn update(&mut self, rel: RelTag, n_blocks: BlockNumber) {
        match self.get(rel) {
            Some(cached) if cached >= n_blocks => {}
            _ => self.set(rel, n_blocks),
        }
    }

    fn forget(&mut self, rel: RelTag);
}

#[derive(Debug, Default)]
pub struct InMemoryRelSizeCache {
    sizes: HashMap<RelTag, BlockNumber>,
}

impl InMemoryRelSizeCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RelSizeCache for InMemoryRelSizeCache {
    fn get(&self, rel: RelTag) -> Option<BlockNumber> {
        self.sizes.get(&rel).copied()
    }

    fn set(&mut self, rel: RelTag, n_blocks: BlockNumber) {
        self.sizes.insert(rel, n_blocks);
    }

    fn forget(&mut self, rel: RelTag) {
        self.sizes.remove(&rel);
    }
}
