//! Accessors for the standard Postgres page header (`PageHeaderData` in
//! bufpage.h). All multi-byte header fields are stored little-endian.

use utils::lsn::Lsn;

use crate::constants::{BLCKSZ, PG_PAGE_LAYOUT_VERSION, SIZE_OF_PAGE_HEADER_DATA};

// Byte offsets of the header fields
const PD_LSN: usize = 0;
const PD_LOWER: usize = 12;
const PD_UPPER: usize = 14;
const PD_SPECIAL: usize = 16;
const PD_PAGESIZE_VERSION: usize = 18;

// Check if page is not yet initialized (port of Postgres PageIsNew() macro)
pub fn page_is_new(pg: &[u8]) -> bool {
    pg[PD_UPPER] == 0 && pg[PD_UPPER + 1] == 0 // pg_upper == 0
}

// ExtractLSN from page header
pub fn page_get_lsn(pg: &[u8]) -> Lsn {
    let hi = u32::from_le_bytes([pg[0], pg[1], pg[2], pg[3]]);
    let lo = u32::from_le_bytes([pg[4], pg[5], pg[6], pg[7]]);
    Lsn(((hi as u64) << 32) | lo as u64)
}

pub fn page_set_lsn(pg: &mut [u8], lsn: Lsn) {
    pg[PD_LSN..PD_LSN + 4].copy_from_slice(&((lsn.0 >> 32) as u32).to_le_bytes());
    pg[PD_LSN + 4..PD_LSN + 8].copy_from_slice(&(lsn.0 as u32).to_le_bytes());
}

/// Initialize an empty page with `special_size` bytes of special space
/// (port of Postgres PageInit()).
pub fn page_init(pg: &mut [u8], special_size: u16) {
    let page_size = pg.len() as u16;
    pg.fill(0);
    pg[PD_LOWER..PD_LOWER + 2].copy_from_slice(&SIZE_OF_PAGE_HEADER_DATA.to_le_bytes());
    pg[PD_UPPER..PD_UPPER + 2].copy_from_slice(&(page_size - special_size).to_le_bytes());
    pg[PD_SPECIAL..PD_SPECIAL + 2].copy_from_slice(&(page_size - special_size).to_le_bytes());
    pg[PD_PAGESIZE_VERSION..PD_PAGESIZE_VERSION + 2]
        .copy_from_slice(&(page_size | PG_PAGE_LAYOUT_VERSION).to_le_bytes());
}

/// Is `pg` identical to a freshly initialized empty heap page?
pub fn page_is_empty_heap_page(pg: &[u8]) -> bool {
    let mut empty_page = [0u8; BLCKSZ];
    page_init(&mut empty_page, 0);
    pg == &empty_page[..]
}
