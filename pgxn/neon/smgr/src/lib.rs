//! Compute-side storage manager.
//!
//! The compute node keeps no permanent relation data of its own. Pages are
//! requested from the page server over the pagestream protocol, at a read
//! point derived from what this node has written itself, and pages leaving
//! the buffer cache are only kept if they are not permanent. See
//! [`NeonSmgr`] for the entry point.

pub mod config;
pub mod error;
pub mod last_written_lsn;
pub mod local_storage;
mod metrics;
pub mod pageserver;
pub mod prefetch;
pub mod relation;
pub mod relsize_cache;
pub mod request_lsn;
pub mod smgr;
pub mod unlogged_build;
pub mod wal;
mod wallog;

#[cfg(test)]
mod testing;

pub use config::SmgrConfig;
pub use error::{SmgrError, SmgrResult};
pub use local_storage::LocalStorage;
pub use pageserver::PageServerTransport;
pub use prefetch::PrefetchStats;
pub use relation::{RelPersistence, SmgrRelation};
pub use relsize_cache::{InMemoryRelSizeCache, RelSizeCache};
pub use request_lsn::RequestLsn;
pub use smgr::{BackendKind, NeonSmgr};
pub use unlogged_build::{UnloggedBuildPhase, XactEvent};
pub use wal::WalService;

/// Set up logging in the format the configuration asks for.
pub fn init_logging(conf: &SmgrConfig) -> anyhow::Result<()> {
    utils::logging::init(conf.log_format, utils::logging::Output::Stderr)
}

#[cfg(test)]
mod tests {
    use utils::logging::LogFormat;

    use super::*;

    #[test]
    fn logging_from_config() {
        let conf = SmgrConfig::parse("log_format = \"test\"").unwrap();
        assert_eq!(conf.log_format, LogFormat::Test);
        init_logging(&conf).unwrap();
        tracing::info!("logging initialized");
    }
}
