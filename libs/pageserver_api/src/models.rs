//! The pagestream protocol spoken between a compute's storage manager and
//! the page server.
//!
//! Every message is one tag byte followed by fixed, big-endian fields. The
//! compute sends [`PagestreamFeMessage`]s and reads back exactly one
//! [`PagestreamBeMessage`] per request, in request order. Both directions are
//! implemented here so that either end of the stream can be built on it.

use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use postgres_ffi_types::constants::BLCKSZ;
use postgres_ffi_types::forknum::FilePathError;
use postgres_ffi_types::{BlockNumber, ForkNumber, Oid};
use utils::lsn::Lsn;

use crate::reltag::RelTag;

// Wrapped in libpq CopyData
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum PagestreamFeMessage {
    Exists(PagestreamExistsRequest),
    Nblocks(PagestreamNblocksRequest),
    GetPage(PagestreamGetPageRequest),
    DbSize(PagestreamDbSizeRequest),
}

// Wrapped in libpq CopyData
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum PagestreamBeMessage {
    Exists(PagestreamExistsResponse),
    Nblocks(PagestreamNblocksResponse),
    GetPage(PagestreamGetPageResponse),
    Error(PagestreamErrorResponse),
    DbSize(PagestreamDbSizeResponse),
}

// Keep in sync with `pagestore_client.h`
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PagestreamFeMessageTag {
    Exists = 0,
    Nblocks = 1,
    GetPage = 2,
    DbSize = 3,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PagestreamBeMessageTag {
    Exists = 100,
    Nblocks = 101,
    GetPage = 102,
    Error = 103,
    DbSize = 104,
}

impl TryFrom<u8> for PagestreamFeMessageTag {
    type Error = PagestreamDecodeError;
    fn try_from(value: u8) -> Result<Self, PagestreamDecodeError> {
        match value {
            0 => Ok(PagestreamFeMessageTag::Exists),
            1 => Ok(PagestreamFeMessageTag::Nblocks),
            2 => Ok(PagestreamFeMessageTag::GetPage),
            3 => Ok(PagestreamFeMessageTag::DbSize),
            _ if PagestreamBeMessageTag::try_from(value).is_ok() => {
                Err(PagestreamDecodeError::UnexpectedResponseTag(value))
            }
            _ => Err(PagestreamDecodeError::UnknownTag(value)),
        }
    }
}

impl TryFrom<u8> for PagestreamBeMessageTag {
    type Error = PagestreamDecodeError;
    fn try_from(value: u8) -> Result<Self, PagestreamDecodeError> {
        match value {
            100 => Ok(PagestreamBeMessageTag::Exists),
            101 => Ok(PagestreamBeMessageTag::Nblocks),
            102 => Ok(PagestreamBeMessageTag::GetPage),
            103 => Ok(PagestreamBeMessageTag::Error),
            104 => Ok(PagestreamBeMessageTag::DbSize),
            0..=3 => Err(PagestreamDecodeError::UnexpectedRequestTag(value)),
            _ => Err(PagestreamDecodeError::UnknownTag(value)),
        }
    }
}

/// Why a pagestream message could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PagestreamDecodeError {
    #[error("empty pagestream message")]
    Empty,
    #[error("unknown pagestream message tag 0x{0:02x}")]
    UnknownTag(u8),
    #[error("unexpected request tag 0x{0:02x} where a response was expected")]
    UnexpectedRequestTag(u8),
    #[error("unexpected response tag 0x{0:02x} where a request was expected")]
    UnexpectedResponseTag(u8),
    #[error(transparent)]
    UnknownFork(#[from] FilePathError),
    #[error("pagestream message with tag 0x{tag:02x} is truncated")]
    Truncated { tag: u8 },
    #[error("{remaining} trailing bytes in pagestream message with tag 0x{tag:02x}")]
    TrailingBytes { tag: u8, remaining: usize },
    #[error("pagestream error message is not a NUL-terminated UTF-8 string")]
    InvalidErrorMessage,
}

impl PagestreamDecodeError {
    /// True if the peer sent something that is not part of the protocol at
    /// all, as opposed to a well-tagged message that arrived mangled.
    pub fn is_protocol_violation(&self) -> bool {
        match self {
            Self::UnknownTag(_)
            | Self::UnexpectedRequestTag(_)
            | Self::UnexpectedResponseTag(_)
            | Self::UnknownFork(_) => true,
            Self::Empty
            | Self::Truncated { .. }
            | Self::TrailingBytes { .. }
            | Self::InvalidErrorMessage => false,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PagestreamExistsRequest {
    pub latest: bool,
    pub lsn: Lsn,
    pub rel: RelTag,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PagestreamNblocksRequest {
    pub latest: bool,
    pub lsn: Lsn,
    pub rel: RelTag,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PagestreamGetPageRequest {
    pub latest: bool,
    pub lsn: Lsn,
    pub rel: RelTag,
    pub blkno: BlockNumber,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PagestreamDbSizeRequest {
    pub latest: bool,
    pub lsn: Lsn,
    pub dbnode: Oid,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PagestreamExistsResponse {
    pub exists: bool,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PagestreamNblocksResponse {
    pub n_blocks: u32,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PagestreamGetPageResponse {
    pub page: Bytes,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PagestreamErrorResponse {
    pub message: String,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PagestreamDbSizeResponse {
    pub db_size: i64,
}

fn put_read_point(bytes: &mut BytesMut, latest: bool, lsn: Lsn) {
    bytes.put_u8(u8::from(latest));
    bytes.put_u64(lsn.0);
}

fn put_rel(bytes: &mut BytesMut, rel: &RelTag) {
    bytes.put_u32(rel.spcnode);
    bytes.put_u32(rel.dbnode);
    bytes.put_u32(rel.relnode);
    bytes.put_u8(u8::from(rel.forknum));
}

fn read_rel<R: Read>(body: &mut R, tag: u8) -> Result<RelTag, PagestreamDecodeError> {
    let truncated = |_| PagestreamDecodeError::Truncated { tag };
    Ok(RelTag {
        spcnode: body.read_u32::<BigEndian>().map_err(truncated)?,
        dbnode: body.read_u32::<BigEndian>().map_err(truncated)?,
        relnode: body.read_u32::<BigEndian>().map_err(truncated)?,
        forknum: ForkNumber::try_from(body.read_u8().map_err(truncated)?)?,
    })
}

impl PagestreamFeMessage {
    pub fn serialize(&self) -> Bytes {
        let mut bytes = BytesMut::new();

        use PagestreamFeMessageTag as Tag;
        match self {
            Self::Exists(req) => {
                bytes.put_u8(Tag::Exists as u8);
                put_read_point(&mut bytes, req.latest, req.lsn);
                put_rel(&mut bytes, &req.rel);
            }

            Self::Nblocks(req) => {
                bytes.put_u8(Tag::Nblocks as u8);
                put_read_point(&mut bytes, req.latest, req.lsn);
                put_rel(&mut bytes, &req.rel);
            }

            Self::GetPage(req) => {
                bytes.put_u8(Tag::GetPage as u8);
                put_read_point(&mut bytes, req.latest, req.lsn);
                put_rel(&mut bytes, &req.rel);
                bytes.put_u32(req.blkno);
            }

            Self::DbSize(req) => {
                bytes.put_u8(Tag::DbSize as u8);
                put_read_point(&mut bytes, req.latest, req.lsn);
                bytes.put_u32(req.dbnode);
            }
        }

        bytes.into()
    }

    pub fn parse<R: std::io::Read>(body: &mut R) -> Result<PagestreamFeMessage, PagestreamDecodeError> {
        let msg_tag = body.read_u8().map_err(|_| PagestreamDecodeError::Empty)?;
        let tag = PagestreamFeMessageTag::try_from(msg_tag)?;

        let truncated = |_| PagestreamDecodeError::Truncated { tag: msg_tag };
        let latest = body.read_u8().map_err(truncated)? != 0;
        let lsn = Lsn::from(body.read_u64::<BigEndian>().map_err(truncated)?);

        use PagestreamFeMessageTag as Tag;
        let msg = match tag {
            Tag::Exists => PagestreamFeMessage::Exists(PagestreamExistsRequest {
                latest,
                lsn,
                rel: read_rel(body, msg_tag)?,
            }),
            Tag::Nblocks => PagestreamFeMessage::Nblocks(PagestreamNblocksRequest {
                latest,
                lsn,
                rel: read_rel(body, msg_tag)?,
            }),
            Tag::GetPage => PagestreamFeMessage::GetPage(PagestreamGetPageRequest {
                latest,
                lsn,
                rel: read_rel(body, msg_tag)?,
                blkno: body.read_u32::<BigEndian>().map_err(truncated)?,
            }),
            Tag::DbSize => PagestreamFeMessage::DbSize(PagestreamDbSizeRequest {
                latest,
                lsn,
                dbnode: body.read_u32::<BigEndian>().map_err(truncated)?,
            }),
        };
        Ok(msg)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Exists(_) => "Exists",
            Self::Nblocks(_) => "Nblocks",
            Self::GetPage(_) => "GetPage",
            Self::DbSize(_) => "DbSize",
        }
    }
}

impl PagestreamBeMessage {
    pub fn serialize(&self) -> Bytes {
        let mut bytes = BytesMut::new();

        use PagestreamBeMessageTag as Tag;
        match self {
            Self::Exists(resp) => {
                bytes.put_u8(Tag::Exists as u8);
                bytes.put_u8(resp.exists as u8);
            }

            Self::Nblocks(resp) => {
                bytes.put_u8(Tag::Nblocks as u8);
                bytes.put_u32(resp.n_blocks);
            }

            Self::GetPage(resp) => {
                bytes.put_u8(Tag::GetPage as u8);
                bytes.put(&resp.page[..]);
            }

            Self::Error(resp) => {
                bytes.put_u8(Tag::Error as u8);
                bytes.put(resp.message.as_bytes());
                bytes.put_u8(0); // null terminator
            }
            Self::DbSize(resp) => {
                bytes.put_u8(Tag::DbSize as u8);
                bytes.put_i64(resp.db_size);
            }
        }

        bytes.into()
    }

    /// Decode a response. A page image is always exactly [`BLCKSZ`] bytes and
    /// is sliced out of `buf` without copying.
    pub fn deserialize(mut buf: Bytes) -> Result<Self, PagestreamDecodeError> {
        if !buf.has_remaining() {
            return Err(PagestreamDecodeError::Empty);
        }
        let msg_tag = buf.get_u8();
        let need = |buf: &Bytes, n: usize| {
            if buf.remaining() < n {
                Err(PagestreamDecodeError::Truncated { tag: msg_tag })
            } else {
                Ok(())
            }
        };

        use PagestreamBeMessageTag as Tag;
        let ok = match Tag::try_from(msg_tag)? {
            Tag::Exists => {
                need(&buf, 1)?;
                Self::Exists(PagestreamExistsResponse {
                    exists: buf.get_u8() != 0,
                })
            }
            Tag::Nblocks => {
                need(&buf, 4)?;
                Self::Nblocks(PagestreamNblocksResponse {
                    n_blocks: buf.get_u32(),
                })
            }
            Tag::GetPage => {
                need(&buf, BLCKSZ)?;
                Self::GetPage(PagestreamGetPageResponse {
                    page: buf.split_to(BLCKSZ),
                })
            }
            Tag::Error => {
                let nul = buf
                    .iter()
                    .position(|b| *b == 0)
                    .ok_or(PagestreamDecodeError::InvalidErrorMessage)?;
                let message = std::str::from_utf8(&buf[..nul])
                    .map_err(|_| PagestreamDecodeError::InvalidErrorMessage)?
                    .to_owned();
                buf.advance(nul + 1);
                Self::Error(PagestreamErrorResponse { message })
            }
            Tag::DbSize => {
                need(&buf, 8)?;
                Self::DbSize(PagestreamDbSizeResponse {
                    db_size: buf.get_i64(),
                })
            }
        };
        if buf.has_remaining() {
            return Err(PagestreamDecodeError::TrailingBytes {
                tag: msg_tag,
                remaining: buf.remaining(),
            });
        }
        Ok(ok)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Exists(_) => "Exists",
            Self::Nblocks(_) => "Nblocks",
            Self::GetPage(_) => "GetPage",
            Self::Error(_) => "Error",
            Self::DbSize(_) => "DbSize",
        }
    }
}
