#![warn(missing_docs)]

use std::fmt;
use std::ops::{Add, AddAssign};

/// Transaction log block size in bytes
pub const XLOG_BLCKSZ: u32 = 8192;

/// Default WAL segment size in bytes
pub const DEFAULT_WAL_SEGMENT_SIZE: usize = 16 * 1024 * 1024;

/// Size of the short page header at the start of every WAL page
/// (`SizeOfXLogShortPHD`, MAXALIGNed)
pub const XLOG_SIZE_OF_XLOG_SHORT_PHD: u64 = 24;

/// Size of the long page header at the start of every WAL segment
/// (`SizeOfXLogLongPHD`, MAXALIGNed)
pub const XLOG_SIZE_OF_XLOG_LONG_PHD: u64 = 40;

/// A Postgres LSN (Log Sequence Number), also known as an XLogRecPtr
#[derive(Clone, Copy, Default, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct Lsn(pub u64);

impl Lsn {
    /// Invalid value for InvalidXLogRecPtr, as defined in xlogdefs.h
    pub const INVALID: Lsn = Lsn(0);

    /// Offset into the WAL segment of size `seg_sz`
    #[inline]
    pub fn segment_offset(self, seg_sz: usize) -> usize {
        (self.0 % seg_sz as u64) as usize
    }

    /// Offset into the WAL page
    #[inline]
    pub fn block_offset(self) -> u64 {
        const BLCKSZ: u64 = XLOG_BLCKSZ as u64;
        self.0 % BLCKSZ
    }

    /// Move the LSN back to the page boundary if it points just past a WAL
    /// page header.
    ///
    /// The current insert position is always reported past the header of
    /// the page it falls on, even when no record has been written to that
    /// page yet. Such a position cannot be flushed, and comparing it with
    /// page LSNs is off by the header size. A position that sits right after
    /// a short page header, or right after the long header of a segment's
    /// first page, is returned as the start of that page.
    pub fn trim_page_header(self, seg_sz: usize) -> Lsn {
        if self.block_offset() == XLOG_SIZE_OF_XLOG_SHORT_PHD {
            Lsn(self.0 - XLOG_SIZE_OF_XLOG_SHORT_PHD)
        } else if self.segment_offset(seg_sz) as u64 == XLOG_SIZE_OF_XLOG_LONG_PHD {
            Lsn(self.0 - XLOG_SIZE_OF_XLOG_LONG_PHD)
        } else {
            self
        }
    }

    /// False for [`Lsn::INVALID`], the LSN of a page that was never
    /// WAL-logged.
    pub fn is_valid(self) -> bool {
        self != Lsn::INVALID
    }
}

impl From<u64> for Lsn {
    fn from(n: u64) -> Self {
        Lsn(n)
    }
}

/// Printed the way the server prints WAL positions, `hi/lo` in hex.
impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 as u32)
    }
}

impl fmt::Debug for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Add<u64> for Lsn {
    type Output = Lsn;

    fn add(self, other: u64) -> Self::Output {
        // panic if the addition overflows.
        Lsn(self.0.checked_add(other).unwrap())
    }
}

impl AddAssign<u64> for Lsn {
    fn add_assign(&mut self, other: u64) {
        // panic if the addition overflows.
        self.0 = self.0.checked_add(other).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsn_display() {
        assert_eq!(Lsn(0x12345678AAAA5555).to_string(), "12345678/AAAA5555");
        assert_eq!(Lsn(0x000000010000000A).to_string(), "1/A");
        assert_eq!(format!("{:?}", Lsn::INVALID), "0/0");
    }

    #[test]
    fn lsn_math() {
        let mut lsn = Lsn(1234) + 11u64;
        assert_eq!(lsn, Lsn(1245));
        lsn += 5;
        assert_eq!(lsn, Lsn(1250));

        assert_eq!(Lsn(0x1000007).segment_offset(DEFAULT_WAL_SEGMENT_SIZE), 7);
        assert_eq!(Lsn(0x1002007).block_offset(), 7u64);
        assert!(!Lsn::INVALID.is_valid());
    }

    #[test]
    fn trim_page_header() {
        let seg_sz = DEFAULT_WAL_SEGMENT_SIZE;

        // just past the short header of a page in the middle of a segment
        assert_eq!(Lsn(0x4000 + 24).trim_page_header(seg_sz), Lsn(0x4000));
        // just past the long header of a segment's first page
        assert_eq!(Lsn(0x2000000 + 40).trim_page_header(seg_sz), Lsn(0x2000000));
        // 40 bytes into a page that is not the first of its segment is a real record
        assert_eq!(Lsn(0x4000 + 40).trim_page_header(seg_sz), Lsn(0x4000 + 40));
        // anything else is left alone
        assert_eq!(Lsn(0x4000).trim_page_header(seg_sz), Lsn(0x4000));
        assert_eq!(Lsn(0x4123).trim_page_header(seg_sz), Lsn(0x4123));
    }
}
