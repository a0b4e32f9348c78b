//! Server constants the storage manager relies on. All of them are stable
//! across the supported PostgreSQL versions.

use crate::{BlockNumber, Oid};

// From pg_tablespace_d.h
pub const DEFAULTTABLESPACE_OID: Oid = 1663;

/// Relation page size. Page images on the wire are always exactly this long.
pub const BLCKSZ: usize = 8192;

// From block.h
pub const INVALID_BLOCK_NUMBER: BlockNumber = 0xFFFF_FFFF;

/// Block number used to address relation metadata (existence, size) rather
/// than a data page, when tracking last-written LSNs.
pub const REL_METADATA_PSEUDO_BLOCKNO: BlockNumber = INVALID_BLOCK_NUMBER;

// From bufpage.h
pub const SIZE_OF_PAGE_HEADER_DATA: u16 = 24;
pub const PG_PAGE_LAYOUT_VERSION: u16 = 4;
