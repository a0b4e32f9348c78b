//! Postgres types and constants that don't depend on the server version,
//! plus the handful of page-header accessors the storage manager needs.

pub mod constants;
pub mod forknum;
pub mod page;

pub type Oid = u32;
pub type BlockNumber = u32;

pub use forknum::ForkNumber;
