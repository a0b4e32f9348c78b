//! In-memory collaborators for unit tests.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use pageserver_api::models::{
    PagestreamBeMessage, PagestreamErrorResponse, PagestreamFeMessage, PagestreamGetPageResponse,
};
use pageserver_api::reltag::{BufferTag, RelTag};
use postgres_ffi_types::BlockNumber;
use postgres_ffi_types::constants::BLCKSZ;
use postgres_ffi_types::page::page_set_lsn;
use utils::lsn::Lsn;

use crate::pageserver::PageServerTransport;
use crate::wal::WalService;

#[derive(Debug, Default)]
pub(crate) struct TestWal {
    pub insert: Lsn,
    pub flushed: Lsn,
    pub replayed: Lsn,
    pub in_recovery: bool,
    pub logged: Vec<(RelTag, BlockNumber)>,
    pub flush_calls: Vec<Lsn>,
}

impl WalService for TestWal {
    fn append_full_page(
        &mut self,
        rel: RelTag,
        blkno: BlockNumber,
        _page: &[u8],
    ) -> anyhow::Result<Lsn> {
        self.logged.push((rel, blkno));
        self.insert = self.insert + 0x100u64;
        Ok(self.insert)
    }

    fn flush_up_to(&mut self, lsn: Lsn) -> anyhow::Result<()> {
        self.flush_calls.push(lsn);
        if lsn > self.flushed {
            self.flushed = lsn;
        }
        Ok(())
    }

    fn insert_lsn(&self) -> Lsn {
        self.insert
    }

    fn flush_lsn(&self) -> Lsn {
        self.flushed
    }

    fn replay_lsn(&self) -> Lsn {
        self.replayed
    }

    fn recovery_in_progress(&self) -> bool {
        self.in_recovery
    }
}

/// Answers GetPage requests with a page stamped with the LSN stored for
/// the block, or an error if there is none.
#[derive(Debug, Default)]
pub(crate) struct TestPageServer {
    pub pages: HashMap<BufferTag, Lsn>,
    pub requests: Vec<PagestreamFeMessage>,
    pub flushes: usize,
    /// Number of upcoming flushes that fail.
    pub failing_flushes: usize,
    pub reconnects: usize,
    pub(crate) responses: VecDeque<Bytes>,
}

impl TestPageServer {
    pub fn outstanding(&self) -> usize {
        self.responses.len()
    }
}

impl PageServerTransport for TestPageServer {
    fn send(&mut self, msg: Bytes) -> anyhow::Result<()> {
        let req = PagestreamFeMessage::parse(&mut &msg[..])?;
        let resp = match &req {
            PagestreamFeMessage::GetPage(r) => {
                let tag = BufferTag {
                    rel: r.rel,
                    blkno: r.blkno,
                };
                match self.pages.get(&tag) {
                    Some(lsn) => {
                        let mut page = vec![0u8; BLCKSZ];
                        page_set_lsn(&mut page, *lsn);
                        PagestreamBeMessage::GetPage(PagestreamGetPageResponse {
                            page: Bytes::from(page),
                        })
                    }
                    None => PagestreamBeMessage::Error(PagestreamErrorResponse {
                        message: format!("no page {tag}"),
                    }),
                }
            }
            other => anyhow::bail!("unexpected request {other:?}"),
        };
        self.requests.push(req);
        self.responses.push_back(resp.serialize());
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        if self.failing_flushes > 0 {
            self.failing_flushes -= 1;
            anyhow::bail!("connection reset by peer");
        }
        self.flushes += 1;
        Ok(())
    }

    fn receive(&mut self) -> anyhow::Result<Bytes> {
        self.responses
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("nothing to receive"))
    }

    fn reconnect(&mut self) -> anyhow::Result<()> {
        self.reconnects += 1;
        self.responses.clear();
        Ok(())
    }
}
