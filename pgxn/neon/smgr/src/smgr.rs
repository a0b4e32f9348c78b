//! The storage manager interface.
//!
//! [`NeonSmgr`] takes the place of the engine's local-file storage manager.
//! Permanent relations live on the page server: reads are page server
//! requests, and writes only make sure the WAL covers the page, which is
//! then dropped. Temporary and unlogged relations are passed through to
//! local storage.

use pageserver_api::models::{
    PagestreamBeMessage, PagestreamDbSizeRequest, PagestreamExistsRequest, PagestreamFeMessage,
    PagestreamNblocksRequest,
};
use pageserver_api::reltag::{BufferTag, RelFileNode, RelTag};
use postgres_ffi_types::constants::{BLCKSZ, REL_METADATA_PSEUDO_BLOCKNO};
use postgres_ffi_types::page::page_get_lsn;
use postgres_ffi_types::{BlockNumber, ForkNumber, Oid};
use tracing::{debug, info, trace};
use utils::lsn::Lsn;

use crate::config::SmgrConfig;
use crate::error::{SmgrError, SmgrResult};
use crate::last_written_lsn::LastWrittenLsnCache;
use crate::local_storage::LocalStorage;
use crate::pageserver::{PageServerConnection, PageServerTransport, unexpected_response};
use crate::prefetch::{PrefetchState, PrefetchStats};
use crate::relation::{RelPersistence, SmgrRelation};
use crate::relsize_cache::RelSizeCache;
use crate::request_lsn::{RequestLsn, get_request_lsn};
use crate::unlogged_build::UnloggedBuild;
use crate::wal::WalService;
use crate::wallog::wallog_page;

/// What kind of process the storage manager serves.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    #[default]
    Regular,
    /// Streams WAL to replicas. Always reads the latest page versions.
    WalSender,
    /// Not subject to the cluster size limit.
    Autovacuum,
}

pub struct NeonSmgr<L, W, C, T> {
    conf: SmgrConfig,
    backend: BackendKind,
    pub(crate) md: L,
    wal: W,
    pub(crate) relsize: C,
    pageserver: PageServerConnection<T>,
    last_written: LastWrittenLsnCache,
    prefetch: PrefetchState,
    pub(crate) unlogged_build: UnloggedBuild,
    /// Cluster size in bytes, as last reported by the page server side.
    current_cluster_size: u64,
    shutdown_requested: bool,
}

fn unknown_persistence(op: &str) -> SmgrError {
    SmgrError::invariant(format!("cannot call {op} on rel with unknown persistence"))
}

fn check_page_size(op: &str, buffer: &[u8]) -> SmgrResult<()> {
    if buffer.len() != BLCKSZ {
        return Err(SmgrError::invariant(format!(
            "{op} buffer is {} bytes, expected {BLCKSZ}",
            buffer.len()
        )));
    }
    Ok(())
}

impl<L, W, C, T> NeonSmgr<L, W, C, T>
where
    L: LocalStorage,
    W: WalService,
    C: RelSizeCache,
    T: PageServerTransport,
{
    pub fn new(
        conf: SmgrConfig,
        backend: BackendKind,
        md: L,
        wal: W,
        relsize: C,
        transport: T,
    ) -> Self {
        // Pages modified before we started are covered by what's durable now
        let last_written = LastWrittenLsnCache::new(conf.last_written_lsn_cache_size, wal.flush_lsn());
        let prefetch = PrefetchState::new(conf.max_prefetch_requests);
        info!(
            "storage manager initialized: max_cluster_size={}MB, max_prefetch_requests={}",
            conf.max_cluster_size, conf.max_prefetch_requests
        );
        NeonSmgr {
            conf,
            backend,
            md,
            wal,
            relsize,
            pageserver: PageServerConnection::new(transport),
            last_written,
            prefetch,
            unlogged_build: UnloggedBuild::new(),
            current_cluster_size: 0,
            shutdown_requested: false,
        }
    }

    pub fn relsize_cache(&self) -> &C {
        &self.relsize
    }

    pub fn prefetch_stats(&self) -> PrefetchStats {
        self.prefetch.stats()
    }

    /// Prefetch hints queued but not sent yet.
    pub fn prefetch_queued(&self) -> usize {
        self.prefetch.n_queued()
    }

    /// Prefetched responses sent for but not consumed yet.
    pub fn prefetch_in_flight(&self) -> usize {
        self.prefetch.n_outstanding()
    }

    /// Last-written LSN of a block, or of the whole fork if `blkno` is
    /// `REL_METADATA_PSEUDO_BLOCKNO`.
    pub fn last_written_lsn(&mut self, rel: RelTag, blkno: BlockNumber) -> Lsn {
        self.last_written.get(rel, blkno)
    }

    /// Report the current size of the cluster, for the size limit check.
    pub fn set_current_cluster_size(&mut self, bytes: u64) {
        self.current_cluster_size = bytes;
    }

    /// The process is shutting down. Evicted pages are not WAL-logged from
    /// here on.
    pub fn request_shutdown(&mut self) {
        self.shutdown_requested = true;
    }

    /// Read point for a request about `blkno` of `rel`.
    pub fn request_lsn(&mut self, rel: RelTag, blkno: BlockNumber) -> SmgrResult<RequestLsn> {
        get_request_lsn(
            &mut self.wal,
            &mut self.last_written,
            self.backend,
            self.conf.wal_segment_size,
            rel,
            blkno,
        )
    }

    fn wallog_page(&mut self, rel: RelTag, blkno: BlockNumber, buffer: &[u8]) -> SmgrResult<()> {
        if self.shutdown_requested {
            trace!("not wal-logging page {blkno} of relation {rel} during shutdown");
            return Ok(());
        }
        wallog_page(&mut self.wal, &mut self.last_written, rel, blkno, buffer)?;
        Ok(())
    }

    /// Drain prefetched responses, then do one round trip.
    fn pageserver_request(&mut self, req: PagestreamFeMessage) -> SmgrResult<PagestreamBeMessage> {
        self.consume_prefetch_responses()?;
        self.pageserver.request(&req)
    }

    fn consume_prefetch_responses(&mut self) -> SmgrResult<()> {
        self.prefetch.drain(&mut self.pageserver)
    }

    pub fn open(&mut self, reln: &SmgrRelation) {
        trace!("open noop for relation {}", reln.node());
    }

    pub fn close(&mut self, reln: &SmgrRelation, forknum: ForkNumber) {
        self.md.close(reln.tag(forknum));
    }

    pub fn exists(&mut self, reln: &mut SmgrRelation, forknum: ForkNumber) -> SmgrResult<bool> {
        let rel = reln.tag(forknum);
        match reln.persistence() {
            RelPersistence::Unknown => {
                // Might be a temporary or unlogged relation, whose only
                // trace is a local file.
                if reln.has_local_file(&mut self.md, forknum)? {
                    return Ok(true);
                }
            }
            RelPersistence::Permanent => {}
            RelPersistence::Temp | RelPersistence::Unlogged => {
                return Ok(self.md.exists(rel)?);
            }
        }

        if self.relsize.get(rel).is_some() {
            return Ok(true);
        }

        // The 0/0/0 node is used for database-wide requests. It never
        // exists, and the page server would reject a request about it.
        if reln.node() == RelFileNode::INVALID {
            return Ok(false);
        }

        let request_lsn = self.request_lsn(rel, REL_METADATA_PSEUDO_BLOCKNO)?;
        let resp = self.pageserver_request(PagestreamFeMessage::Exists(PagestreamExistsRequest {
            latest: request_lsn.latest,
            lsn: request_lsn.lsn,
            rel,
        }))?;
        let exists = match resp {
            PagestreamBeMessage::Exists(r) => r.exists,
            PagestreamBeMessage::Error(e) => {
                return Err(SmgrError::remote_io(
                    format!(
                        "could not read relation existence of rel {rel} from page server at lsn {}",
                        request_lsn.lsn
                    ),
                    format!("page server returned error: {}", e.message),
                ));
            }
            other => return Err(unexpected_response(&other)),
        };
        trace!(
            "exists: relation {rel} lsn {} (latest {}) exists {exists}",
            request_lsn.lsn, request_lsn.latest
        );
        Ok(exists)
    }

    pub fn create(
        &mut self,
        reln: &mut SmgrRelation,
        forknum: ForkNumber,
        is_redo: bool,
    ) -> SmgrResult<()> {
        let rel = reln.tag(forknum);
        match reln.persistence() {
            RelPersistence::Unknown => return Err(unknown_persistence("create()")),
            RelPersistence::Temp | RelPersistence::Unlogged => {
                self.md.create(rel, is_redo)?;
                return Ok(());
            }
            RelPersistence::Permanent => {}
        }

        trace!("create relation {rel}");
        self.consume_prefetch_responses()?;
        // A new relation is empty, and nothing about it is on the page
        // server until WAL describing it arrives there.
        self.relsize.set(rel, 0);
        Ok(())
    }

    /// Remove one fork, or all forks if `forknum` is `None`.
    pub fn unlink(
        &mut self,
        node: RelFileNode,
        is_temp: bool,
        forknum: Option<ForkNumber>,
        is_redo: bool,
    ) -> SmgrResult<()> {
        // There may be local files even for a permanent relation, left
        // over from an unlogged build.
        self.md.unlink(node, forknum, is_redo)?;
        if is_temp {
            return Ok(());
        }

        self.consume_prefetch_responses()?;
        match forknum {
            Some(forknum) => self.relsize.forget(node.with_forknum(forknum)),
            None => {
                for forknum in ForkNumber::ALL {
                    self.relsize.forget(node.with_forknum(forknum));
                }
            }
        }
        Ok(())
    }

    pub fn extend(
        &mut self,
        reln: &mut SmgrRelation,
        forknum: ForkNumber,
        blkno: BlockNumber,
        buffer: &[u8],
        skip_fsync: bool,
    ) -> SmgrResult<()> {
        let rel = reln.tag(forknum);
        match reln.persistence() {
            RelPersistence::Unknown => return Err(unknown_persistence("extend()")),
            RelPersistence::Temp | RelPersistence::Unlogged => {
                self.md.extend(rel, blkno, buffer, skip_fsync)?;
                return Ok(());
            }
            RelPersistence::Permanent => {}
        }
        check_page_size("extend", buffer)?;

        // autovacuum is exempt
        if let Some(limit) = self.conf.max_cluster_size_bytes() {
            if self.backend != BackendKind::Autovacuum && self.current_cluster_size >= limit {
                return Err(SmgrError::CapacityExceeded {
                    limit_mb: self.conf.max_cluster_size,
                });
            }
        }

        self.consume_prefetch_responses()?;
        self.prefetch.forget(BufferTag { rel, blkno });
        self.wallog_page(rel, blkno, buffer)?;
        self.relsize.set(rel, blkno + 1);

        let mut lsn = page_get_lsn(buffer);
        trace!("extend of {rel} blk {blkno}, page LSN: {lsn}");
        // A zero-filled page has no LSN, but the extension itself must be
        // ordered after anything that came before it.
        if !lsn.is_valid() {
            lsn = self.wal.insert_lsn();
            self.last_written.set_for_block(lsn, rel, blkno);
        }
        self.last_written.set_for_relation(lsn, rel);
        Ok(())
    }

    /// Hint that a block will be read soon. Returns whether the hint was
    /// taken.
    pub fn prefetch(
        &mut self,
        reln: &SmgrRelation,
        forknum: ForkNumber,
        blkno: BlockNumber,
    ) -> SmgrResult<bool> {
        let rel = reln.tag(forknum);
        match reln.persistence() {
            // Nothing to prefetch from.
            RelPersistence::Unknown => Ok(false),
            RelPersistence::Temp | RelPersistence::Unlogged => Ok(self.md.prefetch(rel, blkno)?),
            RelPersistence::Permanent => Ok(self.prefetch.register(rel, blkno)),
        }
    }

    /// Forget queued prefetch hints that haven't been sent yet.
    pub fn reset_prefetch(&mut self) {
        self.prefetch.reset_requests();
    }

    /// Ask the kernel to write back dirty pages. Pages of permanent
    /// relations are never kept locally.
    pub fn writeback(
        &mut self,
        reln: &SmgrRelation,
        forknum: ForkNumber,
        blkno: BlockNumber,
        nblocks: BlockNumber,
    ) -> SmgrResult<()> {
        let rel = reln.tag(forknum);
        match reln.persistence() {
            // A local file may or may not exist; the local writeback is a
            // no-op if there is none.
            RelPersistence::Unknown | RelPersistence::Temp | RelPersistence::Unlogged => {
                self.md.writeback(rel, blkno, nblocks)?;
            }
            RelPersistence::Permanent => {
                trace!("writeback noop for {rel} blocks {blkno}..{}", blkno + nblocks);
            }
        }
        Ok(())
    }

    pub fn read(
        &mut self,
        reln: &SmgrRelation,
        forknum: ForkNumber,
        blkno: BlockNumber,
        buffer: &mut [u8],
    ) -> SmgrResult<()> {
        let rel = reln.tag(forknum);
        match reln.persistence() {
            RelPersistence::Unknown => return Err(unknown_persistence("read()")),
            RelPersistence::Temp | RelPersistence::Unlogged => {
                self.md.read(rel, blkno, buffer)?;
                return Ok(());
            }
            RelPersistence::Permanent => {}
        }

        let request_lsn = self.request_lsn(rel, blkno)?;
        self.read_at_lsn(rel, blkno, request_lsn, buffer)
    }

    /// Read a page of a permanent relation at an explicit read point.
    pub fn read_at_lsn(
        &mut self,
        rel: RelTag,
        blkno: BlockNumber,
        request_lsn: RequestLsn,
        buffer: &mut [u8],
    ) -> SmgrResult<()> {
        self.prefetch
            .read_at_lsn(&mut self.pageserver, rel, blkno, request_lsn, buffer)
    }

    /// Write out a page that is being evicted from the buffer cache.
    pub fn write(
        &mut self,
        reln: &mut SmgrRelation,
        forknum: ForkNumber,
        blkno: BlockNumber,
        buffer: &[u8],
        skip_fsync: bool,
    ) -> SmgrResult<()> {
        let rel = reln.tag(forknum);
        match reln.persistence() {
            RelPersistence::Unknown => {
                // Only a temporary or unlogged relation has a local file.
                // Otherwise it's a permanent relation.
                if reln.has_local_file(&mut self.md, forknum)? {
                    self.md.write(rel, blkno, buffer, skip_fsync)?;
                    return Ok(());
                }
            }
            RelPersistence::Permanent => {}
            RelPersistence::Temp | RelPersistence::Unlogged => {
                self.md.write(rel, blkno, buffer, skip_fsync)?;
                return Ok(());
            }
        }

        check_page_size("write", buffer)?;
        self.consume_prefetch_responses()?;
        // A queued request would go out at the read point of whatever read
        // comes next, which may be older than this write.
        self.prefetch.forget(BufferTag { rel, blkno });
        self.wallog_page(rel, blkno, buffer)?;
        trace!(
            "write of {rel} blk {blkno}, page LSN: {}",
            page_get_lsn(buffer)
        );
        Ok(())
    }

    pub fn nblocks(&mut self, reln: &SmgrRelation, forknum: ForkNumber) -> SmgrResult<BlockNumber> {
        let rel = reln.tag(forknum);
        match reln.persistence() {
            RelPersistence::Unknown => return Err(unknown_persistence("nblocks()")),
            RelPersistence::Temp | RelPersistence::Unlogged => {
                return Ok(self.md.nblocks(rel)?);
            }
            RelPersistence::Permanent => {}
        }

        if let Some(n_blocks) = self.relsize.get(rel) {
            trace!("cached nblocks for {rel}: {n_blocks} blocks");
            return Ok(n_blocks);
        }

        let request_lsn = self.request_lsn(rel, REL_METADATA_PSEUDO_BLOCKNO)?;
        let resp = self.pageserver_request(PagestreamFeMessage::Nblocks(PagestreamNblocksRequest {
            latest: request_lsn.latest,
            lsn: request_lsn.lsn,
            rel,
        }))?;
        let n_blocks = match resp {
            PagestreamBeMessage::Nblocks(r) => r.n_blocks,
            PagestreamBeMessage::Error(e) => {
                return Err(SmgrError::remote_io(
                    format!(
                        "could not read relation size of rel {rel} from page server at lsn {}",
                        request_lsn.lsn
                    ),
                    format!("page server returned error: {}", e.message),
                ));
            }
            other => return Err(unexpected_response(&other)),
        };
        self.relsize.update(rel, n_blocks);
        trace!(
            "nblocks: rel {rel} (request LSN {}, latest {}) returned {n_blocks} blocks",
            request_lsn.lsn, request_lsn.latest
        );
        Ok(n_blocks)
    }

    /// Total size of a database, in bytes.
    pub fn dbsize(&mut self, dbnode: Oid) -> SmgrResult<i64> {
        let dummy = RelFileNode::INVALID.with_forknum(ForkNumber::Main);
        let request_lsn = self.request_lsn(dummy, REL_METADATA_PSEUDO_BLOCKNO)?;
        let resp = self.pageserver_request(PagestreamFeMessage::DbSize(PagestreamDbSizeRequest {
            latest: request_lsn.latest,
            lsn: request_lsn.lsn,
            dbnode,
        }))?;
        let db_size = match resp {
            PagestreamBeMessage::DbSize(r) => r.db_size,
            PagestreamBeMessage::Error(e) => {
                return Err(SmgrError::remote_io(
                    format!(
                        "could not read db size of db {dbnode} from page server at lsn {}",
                        request_lsn.lsn
                    ),
                    format!("page server returned error: {}", e.message),
                ));
            }
            other => return Err(unexpected_response(&other)),
        };
        trace!(
            "dbsize: db {dbnode} (request LSN {}, latest {}) returned {db_size} bytes",
            request_lsn.lsn, request_lsn.latest
        );
        Ok(db_size)
    }

    pub fn truncate(
        &mut self,
        reln: &mut SmgrRelation,
        forknum: ForkNumber,
        nblocks: BlockNumber,
    ) -> SmgrResult<()> {
        let rel = reln.tag(forknum);
        match reln.persistence() {
            RelPersistence::Unknown => return Err(unknown_persistence("truncate()")),
            RelPersistence::Temp | RelPersistence::Unlogged => {
                self.md.truncate(rel, nblocks)?;
                return Ok(());
            }
            RelPersistence::Permanent => {}
        }

        self.consume_prefetch_responses()?;
        self.relsize.set(rel, nblocks);

        // The truncation has been WAL-logged by the caller, but we don't
        // know the exact LSN of the record. The current insert position is
        // after it. Requests for the size or for the truncated blocks must
        // see the truncation, so they must use at least that LSN, and it
        // must be durable for the page server to have it.
        let lsn = self
            .wal
            .insert_lsn()
            .trim_page_header(self.conf.wal_segment_size);
        self.wal.flush_up_to(lsn)?;
        self.last_written.set_for_relation(lsn, rel);
        debug!("truncated {rel} to {nblocks} blocks at lsn {lsn}");
        Ok(())
    }

    pub fn immedsync(&mut self, reln: &SmgrRelation, forknum: ForkNumber) -> SmgrResult<()> {
        let rel = reln.tag(forknum);
        match reln.persistence() {
            RelPersistence::Unknown => Err(unknown_persistence("immedsync()")),
            RelPersistence::Temp | RelPersistence::Unlogged => Ok(self.md.immedsync(rel)?),
            RelPersistence::Permanent => {
                trace!("immedsync noop for {rel}");
                Ok(())
            }
        }
    }
}

