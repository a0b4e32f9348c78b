//! Prefetching of pages from the page server.
//!
//! The engine announces the blocks it is about to read with prefetch
//! calls, which only queue them here. Nothing is sent until the next read
//! that has to go to the page server: that read is sent together with
//! every queued block, at the same read point, in one batch. The responses
//! arrive in order. The first one answers the read, and the rest stay on
//! the connection until the following reads consume them. If the block
//! being read was queued itself, it is not sent twice.
//!
//! A buffered response is only good for a read of the same block whose
//! read point it satisfies: either the batch was sent at or after the
//! read's LSN, or the page itself carries at least that LSN. Responses
//! that don't match are read off the connection and dropped. Before any
//! other request goes to the page server, the unconsumed responses are
//! drained so that the next response on the connection is its answer.
//!
//! A block that is written before its queued request went out is taken off
//! the queue; its next read has to go out at the new read point anyway. If
//! the connection breaks, whatever was in flight is lost with it, and the
//! next use of the pipeline starts over on a fresh connection.

use std::cmp::max;
use std::num::NonZeroUsize;

use pageserver_api::models::{PagestreamBeMessage, PagestreamFeMessage, PagestreamGetPageRequest};
use pageserver_api::reltag::{BufferTag, RelTag};
use postgres_ffi_types::BlockNumber;
use postgres_ffi_types::constants::BLCKSZ;
use postgres_ffi_types::page::page_get_lsn;
use tracing::{debug, trace};
use utils::lsn::Lsn;

use crate::error::{SmgrError, SmgrResult};
use crate::metrics::{PREFETCH_DISCARDED, PREFETCH_HITS, PREFETCH_MISSES};
use crate::pageserver::{PageServerConnection, PageServerTransport, unexpected_response};
use crate::request_lsn::RequestLsn;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchStats {
    /// Reads of a block that was prefetched.
    pub hits: u64,
    /// Reads that had to send a request of their own.
    pub misses: u64,
}

pub(crate) struct PrefetchState {
    max_requests: usize,
    /// Blocks queued by prefetch calls, not sent yet.
    requests: Vec<BufferTag>,
    /// Blocks sent in the last batch after the read that sent it, in send
    /// order.
    in_flight: Vec<BufferTag>,
    /// How many of `in_flight` have been read off the connection.
    n_consumed: usize,
    /// Read point of the last batch.
    batch_lsn: Lsn,
    stats: PrefetchStats,
}

impl PrefetchState {
    pub(crate) fn new(max_requests: NonZeroUsize) -> Self {
        PrefetchState {
            max_requests: max_requests.get(),
            requests: Vec::with_capacity(max_requests.get()),
            in_flight: Vec::new(),
            n_consumed: 0,
            batch_lsn: Lsn::INVALID,
            stats: PrefetchStats::default(),
        }
    }

    /// Queue a block. Returns false if the queue is full and the hint was
    /// dropped.
    pub(crate) fn register(&mut self, rel: RelTag, blkno: BlockNumber) -> bool {
        if self.requests.len() >= self.max_requests {
            return false;
        }
        self.requests.push(BufferTag { rel, blkno });
        true
    }

    /// Forget the queued blocks. Responses already in flight are unaffected.
    pub(crate) fn reset_requests(&mut self) {
        self.requests.clear();
    }

    /// Take a block off the queue, if it is there.
    pub(crate) fn forget(&mut self, tag: BufferTag) {
        self.requests.retain(|queued| *queued != tag);
    }

    /// Reconnect a broken connection. The responses in flight went away
    /// with the old one.
    fn ensure_connected<T: PageServerTransport>(
        &mut self,
        conn: &mut PageServerConnection<T>,
    ) -> SmgrResult<()> {
        if conn.is_broken() {
            debug!(
                "dropping {} in-flight prefetch responses of the broken connection",
                self.n_outstanding()
            );
            self.in_flight.clear();
            self.n_consumed = 0;
            conn.reconnect()?;
        }
        Ok(())
    }

    pub(crate) fn n_queued(&self) -> usize {
        self.requests.len()
    }

    /// Responses in flight that no read has consumed yet.
    pub(crate) fn n_outstanding(&self) -> usize {
        self.in_flight.len() - self.n_consumed
    }

    pub(crate) fn stats(&self) -> PrefetchStats {
        self.stats
    }

    /// Read and drop every unconsumed response, so that the connection is
    /// ready for a new request.
    pub(crate) fn drain<T: PageServerTransport>(
        &mut self,
        conn: &mut PageServerConnection<T>,
    ) -> SmgrResult<()> {
        self.ensure_connected(conn)?;
        let outstanding = self.n_outstanding();
        if outstanding == 0 {
            return Ok(());
        }
        trace!("draining {outstanding} prefetch responses");
        self.in_flight.clear();
        self.n_consumed = 0;
        for _ in 0..outstanding {
            conn.receive()?;
            PREFETCH_DISCARDED.inc();
        }
        Ok(())
    }

    /// Read a page at the given read point into `buffer`, from a prefetched
    /// response if one fits, or else from a new request.
    pub(crate) fn read_at_lsn<T: PageServerTransport>(
        &mut self,
        conn: &mut PageServerConnection<T>,
        rel: RelTag,
        blkno: BlockNumber,
        request_lsn: RequestLsn,
        buffer: &mut [u8],
    ) -> SmgrResult<()> {
        if buffer.len() != BLCKSZ {
            return Err(SmgrError::invariant(format!(
                "read buffer is {} bytes, expected {BLCKSZ}",
                buffer.len()
            )));
        }
        self.ensure_connected(conn)?;
        let tag = BufferTag { rel, blkno };

        while self.n_consumed < self.in_flight.len() {
            let sent_for = self.in_flight[self.n_consumed];
            self.n_consumed += 1;
            let resp = conn.receive()?;
            if sent_for == tag {
                if let PagestreamBeMessage::GetPage(page) = &resp {
                    let page_lsn = page_get_lsn(&page.page);
                    if max(self.batch_lsn, page_lsn) >= request_lsn.lsn {
                        buffer.copy_from_slice(&page.page);
                        self.stats.hits += 1;
                        PREFETCH_HITS.inc();
                        self.requests.clear();
                        trace!("prefetch hit for {tag}");
                        return Ok(());
                    }
                    debug!(
                        "prefetched {tag} is too old: batch lsn {}, page lsn {page_lsn}, need {}",
                        self.batch_lsn, request_lsn.lsn
                    );
                }
            }
            PREFETCH_DISCARDED.inc();
        }
        self.in_flight.clear();
        self.n_consumed = 0;

        // If the block itself was queued, it goes out as the head of the
        // batch instead of a second time behind it.
        let n_queued = self.requests.len();
        self.requests.retain(|queued| *queued != tag);
        if self.requests.len() < n_queued {
            self.stats.hits += 1;
            PREFETCH_HITS.inc();
        } else {
            self.stats.misses += 1;
            PREFETCH_MISSES.inc();
        }

        let request = PagestreamGetPageRequest {
            latest: request_lsn.latest,
            lsn: request_lsn.lsn,
            rel,
            blkno,
        };
        let resp = if self.requests.is_empty() {
            conn.request(&PagestreamFeMessage::GetPage(request))?
        } else {
            conn.send(&PagestreamFeMessage::GetPage(request))?;
            let queued = std::mem::take(&mut self.requests);
            for queued in queued {
                conn.send(&PagestreamFeMessage::GetPage(PagestreamGetPageRequest {
                    latest: request_lsn.latest,
                    lsn: request_lsn.lsn,
                    rel: queued.rel,
                    blkno: queued.blkno,
                }))?;
                self.in_flight.push(queued);
            }
            conn.flush()?;
            self.batch_lsn = request_lsn.lsn;
            trace!(
                "sent {tag} with {} prefetch requests at {}",
                self.in_flight.len(),
                request_lsn.lsn
            );
            conn.receive()?
        };

        match resp {
            PagestreamBeMessage::GetPage(page) => {
                buffer.copy_from_slice(&page.page);
                Ok(())
            }
            PagestreamBeMessage::Error(e) => Err(SmgrError::remote_io(
                format!(
                    "could not read block {blkno} in rel {rel} from page server at lsn {}",
                    request_lsn.lsn
                ),
                format!("page server returned error: {}", e.message),
            )),
            other => Err(unexpected_response(&other)),
        }
    }
}
