//! In-memory stand-ins for the storage manager's collaborators.
//!
//! Each fake is a cheap handle to shared state, so a test can keep a clone
//! to inspect and steer it after handing another clone to the storage
//! manager.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use neon_smgr::{
    BackendKind, InMemoryRelSizeCache, LocalStorage, NeonSmgr, PageServerTransport, SmgrConfig,
    WalService,
};
use pageserver_api::models::{
    PagestreamBeMessage, PagestreamDbSizeResponse, PagestreamErrorResponse,
    PagestreamExistsResponse, PagestreamFeMessage, PagestreamGetPageResponse,
    PagestreamNblocksResponse,
};
use pageserver_api::reltag::{BufferTag, RelFileNode, RelTag};
use parking_lot::Mutex;
use postgres_ffi_types::constants::{BLCKSZ, DEFAULTTABLESPACE_OID};
use postgres_ffi_types::page::{page_init, page_set_lsn};
use postgres_ffi_types::{BlockNumber, ForkNumber, Oid};
use utils::lsn::Lsn;

pub type TestSmgr = NeonSmgr<FakeLocalStorage, FakeWal, InMemoryRelSizeCache, FakePageServer>;

pub struct Harness {
    pub smgr: TestSmgr,
    pub server: FakePageServer,
    pub wal: FakeWal,
    pub md: FakeLocalStorage,
}

pub fn harness() -> Harness {
    harness_with(SmgrConfig::default(), BackendKind::Regular)
}

pub fn harness_with(conf: SmgrConfig, backend: BackendKind) -> Harness {
    let server = FakePageServer::default();
    let wal = FakeWal::default();
    {
        let mut w = wal.state();
        w.insert = Lsn(0x0100_0000);
        w.flushed = Lsn(0x0100_0000);
    }
    let md = FakeLocalStorage::default();
    let smgr = NeonSmgr::new(
        conf,
        backend,
        md.clone(),
        wal.clone(),
        InMemoryRelSizeCache::new(),
        server.clone(),
    );
    Harness {
        smgr,
        server,
        wal,
        md,
    }
}

pub fn node(relnode: Oid) -> RelFileNode {
    RelFileNode {
        spcnode: DEFAULTTABLESPACE_OID,
        dbnode: 5,
        relnode,
    }
}

/// An initialized page stamped with `lsn`, with `marker` in its last byte.
pub fn page(lsn: Lsn, marker: u8) -> Vec<u8> {
    let mut page = vec![0u8; BLCKSZ];
    page_init(&mut page, 0);
    page_set_lsn(&mut page, lsn);
    page[BLCKSZ - 1] = marker;
    page
}

//
// Page server
//

#[derive(Default)]
pub struct PageServerState {
    pub pages: HashMap<BufferTag, Bytes>,
    pub rel_sizes: HashMap<RelTag, BlockNumber>,
    pub db_sizes: HashMap<Oid, i64>,
    /// Every request received, in order.
    pub requests: Vec<PagestreamFeMessage>,
    pub flushes: usize,
    /// Number of upcoming flushes that fail.
    pub failing_flushes: usize,
    pub reconnects: usize,
    responses: VecDeque<Bytes>,
}

impl PageServerState {
    pub fn outstanding(&self) -> usize {
        self.responses.len()
    }

    pub fn put_page(&mut self, rel: RelTag, blkno: BlockNumber, page: &[u8]) {
        self.pages
            .insert(BufferTag { rel, blkno }, Bytes::copy_from_slice(page));
    }

    /// The (blkno, lsn, latest) of every GetPage request received.
    pub fn get_page_requests(&self) -> Vec<(BlockNumber, Lsn, bool)> {
        self.requests
            .iter()
            .filter_map(|r| match r {
                PagestreamFeMessage::GetPage(r) => Some((r.blkno, r.lsn, r.latest)),
                _ => None,
            })
            .collect()
    }

    fn respond(&self, req: &PagestreamFeMessage) -> PagestreamBeMessage {
        let error = |message: String| PagestreamBeMessage::Error(PagestreamErrorResponse { message });
        match req {
            PagestreamFeMessage::Exists(r) => PagestreamBeMessage::Exists(PagestreamExistsResponse {
                exists: self.rel_sizes.contains_key(&r.rel),
            }),
            PagestreamFeMessage::Nblocks(r) => match self.rel_sizes.get(&r.rel) {
                Some(n_blocks) => PagestreamBeMessage::Nblocks(PagestreamNblocksResponse {
                    n_blocks: *n_blocks,
                }),
                None => error(format!("relation {} not found", r.rel)),
            },
            PagestreamFeMessage::GetPage(r) => {
                let tag = BufferTag {
                    rel: r.rel,
                    blkno: r.blkno,
                };
                match self.pages.get(&tag) {
                    Some(page) => PagestreamBeMessage::GetPage(PagestreamGetPageResponse {
                        page: page.clone(),
                    }),
                    None => error(format!("could not find page {tag}")),
                }
            }
            PagestreamFeMessage::DbSize(r) => match self.db_sizes.get(&r.dbnode) {
                Some(db_size) => PagestreamBeMessage::DbSize(PagestreamDbSizeResponse {
                    db_size: *db_size,
                }),
                None => error(format!("database {} not found", r.dbnode)),
            },
        }
    }
}

#[derive(Clone, Default)]
pub struct FakePageServer(Arc<Mutex<PageServerState>>);

impl FakePageServer {
    pub fn state(&self) -> parking_lot::MutexGuard<'_, PageServerState> {
        self.0.lock()
    }
}

impl PageServerTransport for FakePageServer {
    fn send(&mut self, msg: Bytes) -> anyhow::Result<()> {
        let req = PagestreamFeMessage::parse(&mut &msg[..])?;
        let mut state = self.0.lock();
        // Answer right away: the response reflects the state at the time
        // the request arrived.
        let resp = state.respond(&req).serialize();
        state.requests.push(req);
        state.responses.push_back(resp);
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        let mut state = self.0.lock();
        if state.failing_flushes > 0 {
            state.failing_flushes -= 1;
            anyhow::bail!("transient flush failure");
        }
        state.flushes += 1;
        Ok(())
    }

    fn receive(&mut self) -> anyhow::Result<Bytes> {
        self.0
            .lock()
            .responses
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("connection closed"))
    }

    fn reconnect(&mut self) -> anyhow::Result<()> {
        let mut state = self.0.lock();
        state.reconnects += 1;
        state.responses.clear();
        Ok(())
    }
}

//
// WAL
//

#[derive(Default)]
pub struct WalState {
    pub insert: Lsn,
    pub flushed: Lsn,
    pub replayed: Lsn,
    pub in_recovery: bool,
    /// Full page images appended, in order.
    pub full_pages: Vec<(RelTag, BlockNumber)>,
    pub flush_requests: Vec<Lsn>,
}

#[derive(Clone, Default)]
pub struct FakeWal(Arc<Mutex<WalState>>);

impl FakeWal {
    pub fn state(&self) -> parking_lot::MutexGuard<'_, WalState> {
        self.0.lock()
    }
}

impl WalService for FakeWal {
    fn append_full_page(
        &mut self,
        rel: RelTag,
        blkno: BlockNumber,
        page: &[u8],
    ) -> anyhow::Result<Lsn> {
        let mut state = self.0.lock();
        state.full_pages.push((rel, blkno));
        state.insert += page.len() as u64;
        Ok(state.insert)
    }

    fn flush_up_to(&mut self, lsn: Lsn) -> anyhow::Result<()> {
        let mut state = self.0.lock();
        state.flush_requests.push(lsn);
        if lsn > state.flushed {
            state.flushed = lsn;
        }
        Ok(())
    }

    fn insert_lsn(&self) -> Lsn {
        self.0.lock().insert
    }

    fn flush_lsn(&self) -> Lsn {
        self.0.lock().flushed
    }

    fn replay_lsn(&self) -> Lsn {
        self.0.lock().replayed
    }

    fn recovery_in_progress(&self) -> bool {
        self.0.lock().in_recovery
    }
}

//
// Local storage
//

#[derive(Default)]
pub struct LocalState {
    pub files: HashMap<RelTag, Vec<Vec<u8>>>,
    pub exists_calls: usize,
    pub unlinks: Vec<(RelFileNode, Option<ForkNumber>, bool)>,
    pub closed: Vec<RelTag>,
    /// Unlinking this fork fails.
    pub failing_unlink: Option<ForkNumber>,
}

#[derive(Clone, Default)]
pub struct FakeLocalStorage(Arc<Mutex<LocalState>>);

impl FakeLocalStorage {
    pub fn state(&self) -> parking_lot::MutexGuard<'_, LocalState> {
        self.0.lock()
    }
}

impl LocalStorage for FakeLocalStorage {
    fn exists(&mut self, rel: RelTag) -> anyhow::Result<bool> {
        let mut state = self.0.lock();
        state.exists_calls += 1;
        Ok(state.files.contains_key(&rel))
    }

    fn create(&mut self, rel: RelTag, is_redo: bool) -> anyhow::Result<()> {
        let mut state = self.0.lock();
        if state.files.contains_key(&rel) {
            anyhow::ensure!(is_redo, "file for {rel} already exists");
            return Ok(());
        }
        state.files.insert(rel, Vec::new());
        Ok(())
    }

    fn unlink(
        &mut self,
        node: RelFileNode,
        forknum: Option<ForkNumber>,
        is_redo: bool,
    ) -> anyhow::Result<()> {
        let mut state = self.0.lock();
        if forknum.is_some() && forknum == state.failing_unlink {
            anyhow::bail!("could not remove file for {node}: permission denied");
        }
        state.unlinks.push((node, forknum, is_redo));
        match forknum {
            Some(forknum) => {
                state.files.remove(&node.with_forknum(forknum));
            }
            None => state.files.retain(|rel, _| rel.node() != node),
        }
        Ok(())
    }

    fn extend(
        &mut self,
        rel: RelTag,
        blkno: BlockNumber,
        buffer: &[u8],
        _skip_fsync: bool,
    ) -> anyhow::Result<()> {
        let mut state = self.0.lock();
        let file = state
            .files
            .get_mut(&rel)
            .ok_or_else(|| anyhow::anyhow!("no file for {rel}"))?;
        let blkno = blkno as usize;
        if file.len() <= blkno {
            file.resize(blkno + 1, vec![0u8; BLCKSZ]);
        }
        file[blkno] = buffer.to_vec();
        Ok(())
    }

    fn prefetch(&mut self, _rel: RelTag, _blkno: BlockNumber) -> anyhow::Result<bool> {
        Ok(true)
    }

    fn writeback(
        &mut self,
        _rel: RelTag,
        _blkno: BlockNumber,
        _nblocks: BlockNumber,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn read(&mut self, rel: RelTag, blkno: BlockNumber, buffer: &mut [u8]) -> anyhow::Result<()> {
        let state = self.0.lock();
        let page = state
            .files
            .get(&rel)
            .and_then(|file| file.get(blkno as usize))
            .ok_or_else(|| anyhow::anyhow!("could not read block {blkno} of {rel}"))?;
        buffer.copy_from_slice(page);
        Ok(())
    }

    fn write(
        &mut self,
        rel: RelTag,
        blkno: BlockNumber,
        buffer: &[u8],
        skip_fsync: bool,
    ) -> anyhow::Result<()> {
        self.extend(rel, blkno, buffer, skip_fsync)
    }

    fn nblocks(&mut self, rel: RelTag) -> anyhow::Result<BlockNumber> {
        let state = self.0.lock();
        let file = state
            .files
            .get(&rel)
            .ok_or_else(|| anyhow::anyhow!("no file for {rel}"))?;
        Ok(file.len() as BlockNumber)
    }

    fn truncate(&mut self, rel: RelTag, nblocks: BlockNumber) -> anyhow::Result<()> {
        let mut state = self.0.lock();
        if let Some(file) = state.files.get_mut(&rel) {
            file.truncate(nblocks as usize);
        }
        Ok(())
    }

    fn immedsync(&mut self, _rel: RelTag) -> anyhow::Result<()> {
        Ok(())
    }

    fn close(&mut self, rel: RelTag) {
        self.0.lock().closed.push(rel);
    }
}
