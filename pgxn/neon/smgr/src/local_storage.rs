use pageserver_api::reltag::{RelFileNode, RelTag};
use postgres_ffi_types::{BlockNumber, ForkNumber};

/// Plain local relation files, the storage manager's fallback for temporary
/// and unlogged relations and for relations in the middle of an unlogged
/// build.
///
/// Buffers are always exactly `BLCKSZ` bytes.
pub trait LocalStorage {
    fn exists(&mut self, rel: RelTag) -> anyhow::Result<bool>;

    /// If `is_redo` is true, it's okay for the fork to exist already.
    fn create(&mut self, rel: RelTag, is_redo: bool) -> anyhow::Result<()>;

    /// Remove one fork, or every fork if `forknum` is `None`. Missing files
    /// are not an error.
    fn unlink(
        &mut self,
        node: RelFileNode,
        forknum: Option<ForkNumber>,
        is_redo: bool,
    ) -> anyhow::Result<()>;

    fn extend(
        &mut self,
        rel: RelTag,
        blkno: BlockNumber,
        buffer: &[u8],
        skip_fsync: bool,
    ) -> anyhow::Result<()>;

    /// Start reading a block in the background. Returns false if the hint
    /// was not taken.
    fn prefetch(&mut self, rel: RelTag, blkno: BlockNumber) -> anyhow::Result<bool>;

    fn writeback(
        &mut self,
        rel: RelTag,
        blkno: BlockNumber,
        nblocks: BlockNumber,
    ) -> anyhow::Result<()>;

    fn read(&mut self, rel: RelTag, blkno: BlockNumber, buffer: &mut [u8]) -> anyhow::Result<()>;

    fn write(
        &mut self,
        rel: RelTag,
        blkno: BlockNumber,
        buffer: &[u8],
        skip_fsync: bool,
    ) -> anyhow::Result<()>;

    fn nblocks(&mut self, rel: RelTag) -> anyhow::Result<BlockNumber>;

    fn truncate(&mut self, rel: RelTag, nblocks: BlockNumber) -> anyhow::Result<()>;

    fn immedsync(&mut self, rel: RelTag) -> anyhow::Result<()>;

    /// Release any open file for the fork. A no-op if nothing is open.
    fn close(&mut self, rel: RelTag);
}
