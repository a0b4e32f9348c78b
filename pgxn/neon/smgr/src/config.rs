//! Storage manager settings.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration.

use std::num::NonZeroUsize;

use anyhow::{Context, ensure};
use serde::{Deserialize, Serialize};
use utils::logging::LogFormat;
use utils::lsn::{DEFAULT_WAL_SEGMENT_SIZE, XLOG_BLCKSZ};

pub mod defaults {
    pub const DEFAULT_MAX_CLUSTER_SIZE_MB: u64 = 0;
    pub const DEFAULT_MAX_PREFETCH_REQUESTS: usize = 128;
    pub const DEFAULT_LAST_WRITTEN_LSN_CACHE_SIZE: usize = 128 * 1024;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SmgrConfig {
    /// Cluster size limit in MB, checked when a permanent relation is
    /// extended. 0 disables the check.
    pub max_cluster_size: u64,
    /// WAL segment size, needed to recognize positions that sit right after
    /// a segment's long page header.
    pub wal_segment_size: usize,
    /// How many prefetch requests may be queued ahead of a read.
    pub max_prefetch_requests: NonZeroUsize,
    /// Number of per-block entries kept in the last-written LSN cache.
    pub last_written_lsn_cache_size: NonZeroUsize,
    pub log_format: LogFormat,
}

impl Default for SmgrConfig {
    fn default() -> Self {
        use defaults::*;
        SmgrConfig {
            max_cluster_size: DEFAULT_MAX_CLUSTER_SIZE_MB,
            wal_segment_size: DEFAULT_WAL_SEGMENT_SIZE,
            max_prefetch_requests: NonZeroUsize::new(DEFAULT_MAX_PREFETCH_REQUESTS)
                .expect("non-zero constant"),
            last_written_lsn_cache_size: NonZeroUsize::new(DEFAULT_LAST_WRITTEN_LSN_CACHE_SIZE)
                .expect("non-zero constant"),
            log_format: LogFormat::Plain,
        }
    }
}

impl SmgrConfig {
    pub fn parse(toml_str: &str) -> anyhow::Result<SmgrConfig> {
        let conf: SmgrConfig = toml::from_str(toml_str).context("parse smgr config")?;
        conf.validate()?;
        Ok(conf)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.wal_segment_size.is_power_of_two(),
            "wal_segment_size {} is not a power of two",
            self.wal_segment_size
        );
        ensure!(
            self.wal_segment_size >= XLOG_BLCKSZ as usize,
            "wal_segment_size {} is smaller than a WAL page",
            self.wal_segment_size
        );
        Ok(())
    }

    /// The cluster size limit in bytes, if one is configured.
    pub fn max_cluster_size_bytes(&self) -> Option<u64> {
        (self.max_cluster_size > 0).then(|| self.max_cluster_size * 1024 * 1024)
    }
}
