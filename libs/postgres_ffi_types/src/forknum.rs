use std::fmt;

use serde::{Deserialize, Serialize};

// Fork numbers, from relpath.h
pub const MAIN_FORKNUM: u8 = 0;
pub const FSM_FORKNUM: u8 = 1;
pub const VISIBILITYMAP_FORKNUM: u8 = 2;
pub const INIT_FORKNUM: u8 = 3;

/// One of the physical forks of a relation.
///
/// The discriminants are the on-disk and on-wire fork numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ForkNumber {
    Main = MAIN_FORKNUM,
    Fsm = FSM_FORKNUM,
    VisibilityMap = VISIBILITYMAP_FORKNUM,
    Init = INIT_FORKNUM,
}

impl ForkNumber {
    pub const MAX: ForkNumber = ForkNumber::Init;

    /// Every fork, in fork number order.
    pub const ALL: [ForkNumber; 4] = [
        ForkNumber::Main,
        ForkNumber::Fsm,
        ForkNumber::VisibilityMap,
        ForkNumber::Init,
    ];

    /// Suffix of the relation data file, `None` for the main fork.
    pub fn name(self) -> Option<&'static str> {
        match self {
            ForkNumber::Main => None,
            ForkNumber::Fsm => Some("fsm"),
            ForkNumber::VisibilityMap => Some("vm"),
            ForkNumber::Init => Some("init"),
        }
    }

    /// Free space map and visibility map pages are derived data that the
    /// page server can't always reconstruct on its own.
    pub fn is_map(self) -> bool {
        matches!(self, ForkNumber::Fsm | ForkNumber::VisibilityMap)
    }
}

impl From<ForkNumber> for u8 {
    fn from(forknum: ForkNumber) -> u8 {
        forknum as u8
    }
}

impl TryFrom<u8> for ForkNumber {
    type Error = FilePathError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            MAIN_FORKNUM => Ok(ForkNumber::Main),
            FSM_FORKNUM => Ok(ForkNumber::Fsm),
            VISIBILITYMAP_FORKNUM => Ok(ForkNumber::VisibilityMap),
            INIT_FORKNUM => Ok(ForkNumber::Init),
            _ => Err(FilePathError::InvalidForkNumber(value)),
        }
    }
}

impl fmt::Display for ForkNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FilePathError {
    #[error("invalid relation fork number {0}")]
    InvalidForkNumber(u8),
}
