//! Choosing the read point for page server requests.

use pageserver_api::reltag::RelTag;
use postgres_ffi_types::BlockNumber;
use tracing::debug;
use utils::lsn::Lsn;

use crate::error::SmgrResult;
use crate::last_written_lsn::LastWrittenLsnCache;
use crate::smgr::BackendKind;
use crate::wal::WalService;

/// The version of the data a request asks for.
///
/// With `latest` set, the page server may return any version at or after
/// `lsn`, including the newest one it has. Otherwise it must return the
/// version as of exactly `lsn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLsn {
    pub lsn: Lsn,
    pub latest: bool,
}

/// Pick the read point for a request about `blkno` of `rel`.
///
/// - During recovery, read the version as of the replay position. Newer
///   versions may exist on the page server, but the replica must not see
///   them yet.
/// - A WAL sender has no local modifications of its own; read the latest.
/// - Otherwise, read no older than the last local modification of the
///   page. That LSN must be durable first: the page server can only have
///   WAL that was flushed, and would otherwise wait for it forever.
pub(crate) fn get_request_lsn<W: WalService>(
    wal: &mut W,
    last_written: &mut LastWrittenLsnCache,
    backend: BackendKind,
    wal_segment_size: usize,
    rel: RelTag,
    blkno: BlockNumber,
) -> SmgrResult<RequestLsn> {
    if wal.recovery_in_progress() {
        let lsn = wal.replay_lsn();
        debug!("request lsn during recovery: replay position {lsn}");
        return Ok(RequestLsn { lsn, latest: false });
    }

    if backend == BackendKind::WalSender {
        return Ok(RequestLsn {
            lsn: Lsn::INVALID,
            latest: true,
        });
    }

    let lsn = last_written.get(rel, blkno).trim_page_header(wal_segment_size);
    let flushed = wal.flush_lsn();
    if lsn > flushed {
        debug!("last-written LSN {lsn} is ahead of last flushed LSN {flushed}");
        wal.flush_up_to(lsn)?;
    }
    Ok(RequestLsn { lsn, latest: true })
}
