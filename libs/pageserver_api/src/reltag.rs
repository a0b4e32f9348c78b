use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use postgres_ffi_types::{BlockNumber, ForkNumber, Oid};

///
/// Physical identity of a relation's storage, the `RelFileNode` of native
/// Postgres: tablespace (`spcnode`), database (`dbnode`) and relation
/// (`relnode`) ids. All forks of a relation share it.
///
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Serialize, Deserialize)]
pub struct RelFileNode {
    pub spcnode: Oid,
    pub dbnode: Oid,
    pub relnode: Oid,
}

impl RelFileNode {
    /// The 0/0/0 node, used when a request is about a whole database.
    pub const INVALID: RelFileNode = RelFileNode {
        spcnode: 0,
        dbnode: 0,
        relnode: 0,
    };

    pub fn with_forknum(&self, forknum: ForkNumber) -> RelTag {
        RelTag {
            forknum,
            spcnode: self.spcnode,
            dbnode: self.dbnode,
            relnode: self.relnode,
        }
    }
}

impl fmt::Display for RelFileNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.spcnode, self.dbnode, self.relnode)
    }
}

///
/// Relation data file segment id throughout the Postgres cluster.
///
/// Every data file in Postgres is uniquely identified by 4 numbers:
/// - relation id / node (`relnode`)
/// - database id (`dbnode`)
/// - tablespace id (`spcnode`), in short this is a unique id of a separate
///   directory to store data files.
/// - forknumber (`forknum`) is used to split different kinds of data of the same relation
///   between some set of files (`relnode`, `relnode_fsm`, `relnode_vm`).
///
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
pub struct RelTag {
    pub forknum: ForkNumber,
    pub spcnode: Oid,
    pub dbnode: Oid,
    pub relnode: Oid,
}

impl PartialOrd for RelTag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RelTag {
    fn cmp(&self, other: &Self) -> Ordering {
        self.node()
            .cmp(&other.node())
            .then(self.forknum.cmp(&other.forknum))
    }
}

/// Display RelTag in the same format that's used in most PostgreSQL debug messages:
///
/// ```text
/// <spcnode>/<dbnode>/<relnode>[_fsm|_vm|_init]
/// ```
impl fmt::Display for RelTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(forkname) = self.forknum.name() {
            write!(
                f,
                "{}/{}/{}_{}",
                self.spcnode, self.dbnode, self.relnode, forkname
            )
        } else {
            write!(f, "{}/{}/{}", self.spcnode, self.dbnode, self.relnode)
        }
    }
}

impl RelTag {
    pub fn node(&self) -> RelFileNode {
        RelFileNode {
            spcnode: self.spcnode,
            dbnode: self.dbnode,
            relnode: self.relnode,
        }
    }
}

///
/// Identity of one page: a block of one fork of one relation. The
/// `BufferTag` of native Postgres.
///
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct BufferTag {
    pub rel: RelTag,
    pub blkno: BlockNumber,
}

impl fmt::Display for BufferTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blk {} of relation {}", self.blkno, self.rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reltag_display_and_order() {
        let node = RelFileNode {
            spcnode: 1663,
            dbnode: 5,
            relnode: 16384,
        };
        let main = node.with_forknum(ForkNumber::Main);
        let vm = node.with_forknum(ForkNumber::VisibilityMap);

        assert_eq!(main.to_string(), "1663/5/16384");
        assert_eq!(vm.to_string(), "1663/5/16384_vm");
        assert_eq!(main.node(), node);
        assert!(main < vm);
    }
}
