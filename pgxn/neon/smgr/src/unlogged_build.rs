//! Unlogged index builds.
//!
//! Some index access methods build the index without WAL-logging the
//! individual pages, and WAL-log the whole index in one go at the end. On
//! a page server that's a problem: a page evicted mid-build has no WAL
//! behind it and would be lost. So while such a build runs, the relation
//! is treated as unlogged and its pages go to a local file:
//!
//! 1. Phase 1: the index is built into the local file.
//! 2. Phase 2: the pages are WAL-logged. Evictions still go to the local
//!    file, since the WAL records are still being written.
//! 3. At the end, the relation is permanent again and the local file is
//!    removed; the page server has everything by then.
//!
//! Only one build can be in progress per backend. An aborted transaction
//! just forgets the build. A commit with a build still in progress is a
//! bug in the caller.

use pageserver_api::reltag::RelFileNode;
use postgres_ffi_types::ForkNumber;
use tracing::{debug, trace};

use crate::error::{SmgrError, SmgrResult};
use crate::local_storage::LocalStorage;
use crate::pageserver::PageServerTransport;
use crate::relation::{RelPersistence, SmgrRelation};
use crate::relsize_cache::RelSizeCache;
use crate::smgr::NeonSmgr;
use crate::wal::WalService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloggedBuildPhase {
    NotInProgress,
    Phase1,
    Phase2,
    /// The relation is temporary or unlogged anyway, so the build needs no
    /// special treatment.
    NotPermanent,
}

/// Transaction end events the storage manager cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XactEvent {
    Commit,
    ParallelCommit,
    Prepare,
    PreCommit,
    ParallelPreCommit,
    PrePrepare,
    Abort,
    ParallelAbort,
}

#[derive(Debug)]
pub(crate) struct UnloggedBuild {
    phase: UnloggedBuildPhase,
    rel: Option<RelFileNode>,
}

impl UnloggedBuild {
    pub(crate) fn new() -> Self {
        UnloggedBuild {
            phase: UnloggedBuildPhase::NotInProgress,
            rel: None,
        }
    }

    pub(crate) fn phase(&self) -> UnloggedBuildPhase {
        self.phase
    }

    fn check_idle(&self) -> SmgrResult<()> {
        match self.rel {
            Some(active) => Err(SmgrError::invariant(format!(
                "unlogged relation build is already in progress for {active}"
            ))),
            None => Ok(()),
        }
    }

    fn begin(&mut self, node: RelFileNode, phase: UnloggedBuildPhase) -> SmgrResult<()> {
        self.check_idle()?;
        self.rel = Some(node);
        self.phase = phase;
        Ok(())
    }

    /// The phase of the build for `node`, which must be the one in progress.
    fn current_for(&self, node: RelFileNode, op: &str) -> SmgrResult<UnloggedBuildPhase> {
        match self.rel {
            Some(active) if active == node => Ok(self.phase),
            Some(active) => Err(SmgrError::invariant(format!(
                "{op} called for {node}, but the unlogged build in progress is for {active}"
            ))),
            None => Err(SmgrError::invariant(format!(
                "{op} called for {node}, but no unlogged build is in progress"
            ))),
        }
    }

    fn reset(&mut self) {
        self.rel = None;
        self.phase = UnloggedBuildPhase::NotInProgress;
    }

    /// Transaction end hook. Returns an error if a build is still in
    /// progress at commit or prepare time; the state is reset either way.
    pub(crate) fn at_eoxact(&mut self, event: XactEvent) -> SmgrResult<()> {
        let Some(rel) = self.rel else {
            return Ok(());
        };
        match event {
            XactEvent::Abort | XactEvent::ParallelAbort => {
                debug!("forgetting unlogged build of {rel} at transaction abort");
                self.reset();
                Ok(())
            }
            XactEvent::Commit
            | XactEvent::ParallelCommit
            | XactEvent::Prepare
            | XactEvent::PreCommit
            | XactEvent::ParallelPreCommit
            | XactEvent::PrePrepare => {
                self.reset();
                Err(SmgrError::invariant(format!(
                    "unlogged index build of {rel} was not properly finished"
                )))
            }
        }
    }
}

fn check_build_persistence(reln: &SmgrRelation) -> SmgrResult<()> {
    if reln.persistence() != RelPersistence::Unlogged {
        return Err(SmgrError::invariant(format!(
            "relation {} under unlogged build has persistence {:?}",
            reln.node(),
            reln.persistence()
        )));
    }
    Ok(())
}

impl<L, W, C, T> NeonSmgr<L, W, C, T>
where
    L: LocalStorage,
    W: WalService,
    C: RelSizeCache,
    T: PageServerTransport,
{
    /// Start an unlogged build of an empty relation.
    pub fn start_unlogged_build(&mut self, reln: &mut SmgrRelation) -> SmgrResult<()> {
        trace!("starting unlogged build of relation {}", reln.node());
        self.unlogged_build.check_idle()?;

        match reln.persistence() {
            RelPersistence::Unknown => {
                return Err(SmgrError::invariant(
                    "cannot call start_unlogged_build() on rel with unknown persistence",
                ));
            }
            RelPersistence::Temp | RelPersistence::Unlogged => {
                return self
                    .unlogged_build
                    .begin(reln.node(), UnloggedBuildPhase::NotPermanent);
            }
            RelPersistence::Permanent => {}
        }

        if self.nblocks(reln, ForkNumber::Main)? != 0 {
            return Err(SmgrError::invariant(
                "cannot perform unlogged index build, index is not empty",
            ));
        }

        self.unlogged_build.begin(reln.node(), UnloggedBuildPhase::Phase1)?;
        // Evictions go to the local file from now on
        reln.set_persistence(RelPersistence::Unlogged);
        self.md.create(reln.tag(ForkNumber::Main), false)?;
        Ok(())
    }

    /// The index is built; its pages are about to be WAL-logged.
    pub fn finish_unlogged_build_phase_1(&mut self, reln: &mut SmgrRelation) -> SmgrResult<()> {
        trace!("finishing phase 1 of unlogged build of relation {}", reln.node());

        match self
            .unlogged_build
            .current_for(reln.node(), "finish_unlogged_build_phase_1")?
        {
            UnloggedBuildPhase::NotPermanent => Ok(()),
            UnloggedBuildPhase::Phase1 => {
                check_build_persistence(reln)?;
                self.unlogged_build.phase = UnloggedBuildPhase::Phase2;
                Ok(())
            }
            phase => Err(SmgrError::invariant(format!(
                "finish_unlogged_build_phase_1 called in unlogged build phase {phase:?}"
            ))),
        }
    }

    /// Everything is WAL-logged. Make the relation permanent again and
    /// remove the local files.
    pub fn end_unlogged_build(&mut self, reln: &mut SmgrRelation) -> SmgrResult<()> {
        trace!("ending unlogged build of relation {}", reln.node());

        match self
            .unlogged_build
            .current_for(reln.node(), "end_unlogged_build")?
        {
            UnloggedBuildPhase::NotPermanent => {}
            UnloggedBuildPhase::Phase2 => {
                check_build_persistence(reln)?;
                // The build is over even if cleaning up the local files
                // fails below.
                self.unlogged_build.reset();
                reln.set_persistence(RelPersistence::Permanent);

                for forknum in ForkNumber::ALL {
                    let rel = reln.tag(forknum);
                    // the local size is meaningless now
                    self.relsize.forget(rel);
                    self.md.close(rel);
                    self.md.unlink(reln.node(), Some(forknum), true)?;
                }
            }
            phase => {
                return Err(SmgrError::invariant(format!(
                    "end_unlogged_build called in unlogged build phase {phase:?}"
                )));
            }
        }

        self.unlogged_build.reset();
        Ok(())
    }

    /// Transaction end hook.
    pub fn at_eoxact(&mut self, event: XactEvent) -> SmgrResult<()> {
        self.unlogged_build.at_eoxact(event)
    }

    pub fn unlogged_build_phase(&self) -> UnloggedBuildPhase {
        self.unlogged_build.phase()
    }
}
