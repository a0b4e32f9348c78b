use pageserver_api::reltag::{RelFileNode, RelTag};
use postgres_ffi_types::ForkNumber;

use crate::local_storage::LocalStorage;

/// What the caller knows about a relation's persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelPersistence {
    /// Not determined yet. Happens when a buffer is evicted for a relation
    /// that was never opened by this backend. The relation may be a
    /// permanent one, or a temporary or unlogged one with local files.
    Unknown,
    /// Stored by the page server.
    Permanent,
    /// Backend-local temporary relation, stored in local files.
    Temp,
    /// Not WAL-logged, stored in local files.
    Unlogged,
}

/// An open relation handle.
#[derive(Debug)]
pub struct SmgrRelation {
    node: RelFileNode,
    persistence: RelPersistence,
    /// Whether a local file exists, per fork, as last seen while the
    /// persistence was unknown.
    local_file_probes: [Option<bool>; ForkNumber::ALL.len()],
}

impl SmgrRelation {
    pub fn new(node: RelFileNode, persistence: RelPersistence) -> Self {
        SmgrRelation {
            node,
            persistence,
            local_file_probes: [None; ForkNumber::ALL.len()],
        }
    }

    pub fn node(&self) -> RelFileNode {
        self.node
    }

    pub fn persistence(&self) -> RelPersistence {
        self.persistence
    }

    pub fn tag(&self, forknum: ForkNumber) -> RelTag {
        self.node.with_forknum(forknum)
    }

    pub(crate) fn set_persistence(&mut self, persistence: RelPersistence) {
        self.persistence = persistence;
        self.local_file_probes = [None; ForkNumber::ALL.len()];
    }

    /// Check whether the fork has a local file. Only asks local storage the
    /// first time for each fork.
    pub(crate) fn has_local_file<L: LocalStorage>(
        &mut self,
        md: &mut L,
        forknum: ForkNumber,
    ) -> anyhow::Result<bool> {
        let slot = &mut self.local_file_probes[u8::from(forknum) as usize];
        if let Some(exists) = *slot {
            return Ok(exists);
        }
        let exists = md.exists(self.node.with_forknum(forknum))?;
        *slot = Some(exists);
        Ok(exists)
    }
}
