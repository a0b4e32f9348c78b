use pageserver_api::reltag::RelTag;
use postgres_ffi_types::BlockNumber;
use utils::lsn::Lsn;

/// The parts of the write-ahead log the storage manager relies on.
pub trait WalService {
    /// WAL-log a full image of a page and return the end LSN of the record.
    /// The image is logged as-is, without assuming a standard page layout.
    fn append_full_page(
        &mut self,
        rel: RelTag,
        blkno: BlockNumber,
        page: &[u8],
    ) -> anyhow::Result<Lsn>;

    /// Make WAL durable up to at least `lsn`.
    fn flush_up_to(&mut self, lsn: Lsn) -> anyhow::Result<()>;

    /// Position the next record will be inserted at.
    fn insert_lsn(&self) -> Lsn;

    /// Position up to which WAL is known to be durable.
    fn flush_lsn(&self) -> Lsn;

    /// Position up to which WAL has been replayed, during recovery.
    fn replay_lsn(&self) -> Lsn;

    fn recovery_in_progress(&self) -> bool;
}
