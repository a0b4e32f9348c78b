//! Connection to the page server.
//!
//! The transport moves opaque pagestream messages; framing and connection
//! management are its business. On top of it, [`PageServerConnection`]
//! encodes requests and decodes responses.
//!
//! Requests and responses are paired only by their order on the
//! connection. Once a send, flush or receive has failed, nobody knows
//! which responses are still coming, so the connection is marked broken
//! and refuses further traffic until it has been re-established.

use bytes::Bytes;
use pageserver_api::models::{PagestreamBeMessage, PagestreamFeMessage};
use tracing::{info, warn};

use crate::error::{SmgrError, SmgrResult};
use crate::metrics::PAGESERVER_REQUESTS;

/// An ordered, blocking message channel to the page server.
///
/// Every message passed to [`send`](Self::send) produces exactly one
/// message from [`receive`](Self::receive), in the order sent.
pub trait PageServerTransport {
    /// Queue a request. It may not leave the process until [`flush`](Self::flush).
    fn send(&mut self, msg: Bytes) -> anyhow::Result<()>;

    fn flush(&mut self) -> anyhow::Result<()>;

    /// Block until the next response arrives.
    fn receive(&mut self) -> anyhow::Result<Bytes>;

    /// Drop the current connection and open a new one. Responses to
    /// requests sent on the old connection must never be received on the
    /// new one.
    fn reconnect(&mut self) -> anyhow::Result<()>;
}

pub(crate) struct PageServerConnection<T> {
    transport: T,
    broken: bool,
}

impl<T: PageServerTransport> PageServerConnection<T> {
    pub(crate) fn new(transport: T) -> Self {
        PageServerConnection {
            transport,
            broken: false,
        }
    }

    /// Whether the request/response pairing was lost and the connection
    /// needs [`reconnect`](Self::reconnect) before it can be used again.
    pub(crate) fn is_broken(&self) -> bool {
        self.broken
    }

    pub(crate) fn reconnect(&mut self) -> SmgrResult<()> {
        info!("reconnecting to page server");
        self.transport.reconnect().map_err(|e| {
            SmgrError::remote_io("could not reconnect to page server", format!("{e:#}"))
        })?;
        self.broken = false;
        Ok(())
    }

    fn check_usable(&self) -> SmgrResult<()> {
        if self.broken {
            return Err(SmgrError::invariant(
                "page server connection used after a failure without reconnecting",
            ));
        }
        Ok(())
    }

    fn mark_broken(&mut self, err: SmgrError) -> SmgrError {
        warn!("page server connection is broken: {err}");
        self.broken = true;
        err
    }

    #[cfg(test)]
    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }

    #[cfg(test)]
    pub(crate) fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub(crate) fn send(&mut self, req: &PagestreamFeMessage) -> SmgrResult<()> {
        self.check_usable()?;
        PAGESERVER_REQUESTS.with_label_values(&[req.kind()]).inc();
        self.transport.send(req.serialize()).map_err(|e| {
            self.mark_broken(SmgrError::remote_io(
                format!("could not send {} request to page server", req.kind()),
                format!("{e:#}"),
            ))
        })
    }

    pub(crate) fn flush(&mut self) -> SmgrResult<()> {
        self.check_usable()?;
        self.transport.flush().map_err(|e| {
            self.mark_broken(SmgrError::remote_io(
                "could not flush page server connection",
                format!("{e:#}"),
            ))
        })
    }

    pub(crate) fn receive(&mut self) -> SmgrResult<PagestreamBeMessage> {
        self.check_usable()?;
        let raw = match self.transport.receive() {
            Ok(raw) => raw,
            Err(e) => {
                return Err(self.mark_broken(SmgrError::remote_io(
                    "could not receive response from page server",
                    format!("{e:#}"),
                )));
            }
        };
        // A message we can't make sense of may have been cut short or run
        // into the next one.
        PagestreamBeMessage::deserialize(raw).map_err(|e| {
            self.mark_broken(SmgrError::from_decode("could not decode page server response", e))
        })
    }

    /// One full round trip.
    pub(crate) fn request(&mut self, req: &PagestreamFeMessage) -> SmgrResult<PagestreamBeMessage> {
        self.send(req)?;
        self.flush()?;
        self.receive()
    }
}

/// Error for a response that doesn't answer the request it was paired with.
pub(crate) fn unexpected_response(resp: &PagestreamBeMessage) -> SmgrError {
    SmgrError::Protocol(format!(
        "unexpected response from page server of kind {}",
        resp.kind()
    ))
}

#[cfg(test)]
mod tests {
    use pageserver_api::models::PagestreamGetPageRequest;
    use pageserver_api::reltag::{BufferTag, RelFileNode, RelTag};
    use postgres_ffi_types::ForkNumber;
    use utils::lsn::Lsn;

    use super::*;
    use crate::testing::TestPageServer;

    fn rel() -> RelTag {
        RelFileNode {
            spcnode: 1663,
            dbnode: 1,
            relnode: 16400,
        }
        .with_forknum(ForkNumber::Main)
    }

    fn get_page(blkno: u32) -> PagestreamFeMessage {
        PagestreamFeMessage::GetPage(PagestreamGetPageRequest {
            latest: true,
            lsn: Lsn(0x20),
            rel: rel(),
            blkno,
        })
    }

    #[test]
    fn failure_breaks_the_connection_until_reconnect() {
        let mut server = TestPageServer {
            failing_flushes: 1,
            ..Default::default()
        };
        server.pages.insert(BufferTag { rel: rel(), blkno: 0 }, Lsn(0x10));
        let mut conn = PageServerConnection::new(server);

        let err = conn.request(&get_page(0)).unwrap_err();
        assert!(matches!(err, SmgrError::RemoteIo { .. }), "{err}");
        assert!(conn.is_broken());

        let err = conn.request(&get_page(0)).unwrap_err();
        assert!(matches!(err, SmgrError::Invariant(_)), "{err}");
        assert_eq!(conn.transport().requests.len(), 1);

        conn.reconnect().unwrap();
        assert!(!conn.is_broken());
        assert_eq!(conn.transport().outstanding(), 0);
        assert!(matches!(
            conn.request(&get_page(0)).unwrap(),
            PagestreamBeMessage::GetPage(_)
        ));
    }

    #[test]
    fn failed_receive_breaks_the_connection() {
        let mut conn = PageServerConnection::new(TestPageServer::default());
        // nothing was sent, so there is nothing to receive
        conn.receive().unwrap_err();
        assert!(conn.is_broken());
    }
}
