//! WAL-logging of pages on their way out of the buffer cache.
//!
//! The page server reconstructs pages from WAL alone. A page that is
//! written out of the buffer cache is simply dropped, so the WAL must
//! already cover its current contents. Every eviction goes through here to
//! check that, and to note the page's LSN so that the next read of it asks
//! for a new enough version.

use pageserver_api::reltag::RelTag;
use postgres_ffi_types::page::{page_get_lsn, page_is_empty_heap_page, page_is_new};
use postgres_ffi_types::BlockNumber;
use tracing::{debug, error, trace};
use utils::lsn::Lsn;

use crate::error::{SmgrError, SmgrResult};
use crate::last_written_lsn::LastWrittenLsnCache;
use crate::metrics::FORCE_LOGGED_PAGES;
use crate::wal::WalService;

/// Make sure the WAL covers an evicted page, and remember its LSN.
///
/// Free space map and visibility map pages are modified without WAL-logging
/// every change, so they are logged in full here, unless we are replaying
/// WAL. Pages of other forks must carry an LSN already, with two
/// exceptions: a page that was never initialized, and an initialized heap
/// page with nothing on it. Both are rebuilt identically on the page
/// server. Anything else is a durability violation and an error is
/// returned; the caller must not let the engine continue.
///
/// Returns the LSN the page was recorded with.
pub(crate) fn wallog_page<W: WalService>(
    wal: &mut W,
    last_written: &mut LastWrittenLsnCache,
    rel: RelTag,
    blkno: BlockNumber,
    buffer: &[u8],
) -> SmgrResult<Lsn> {
    let mut lsn = page_get_lsn(buffer);

    let force_log = rel.forknum.is_map() && !wal.recovery_in_progress();

    if force_log {
        lsn = wal.append_full_page(rel, blkno, buffer)?;
        wal.flush_up_to(lsn)?;
        FORCE_LOGGED_PAGES
            .with_label_values(&[rel.forknum.name().unwrap_or("main")])
            .inc();
        debug!("page {blkno} of relation {rel} was force logged, evicted at lsn={lsn}");
    } else if !lsn.is_valid() {
        // A page with zero LSN is only fine if the WAL can't possibly have
        // anything to say about it.
        if page_is_new(buffer) {
            debug!("page {blkno} of relation {rel} is all-zeros");
        } else if page_is_empty_heap_page(buffer) {
            debug!("page {blkno} of relation {rel} is an empty heap page with no LSN");
        } else {
            error!("page {blkno} of relation {rel} is evicted with zero LSN");
            return Err(SmgrError::DurabilityViolation { rel, blkno });
        }
    } else {
        trace!("page {blkno} of relation {rel} is already wal-logged at lsn={lsn}");
    }

    last_written.set_for_block(lsn, rel, blkno);
    Ok(lsn)
}
