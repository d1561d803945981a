#![allow(clippy::identity_op)] // allow 1 * MiB
#![allow(non_upper_case_globals)] // allow KiB/MiB/GiB names

use crate::rocksdb::column::{Column, ColumnMemoryBudget};
use anyhow::{Context, Result};
use rocksdb::{DBCompressionType, Env, Options};

const KiB: usize = 1024;
const MiB: usize = 1024 * KiB;
const GiB: usize = 1024 * MiB;

/// Default maximum number of block numbers held by a single history shard.
pub const DEFAULT_HISTORY_SHARD_CAPACITY: u64 = 2000;

#[derive(Debug, Clone)]
pub struct RocksDBConfig {
    /// Enable statistics. Statistics will be put in the `LOG` file in the db folder. This can have an effect on performance.
    pub enable_statistics: bool,
    /// Dump statistics every `statistics_period_sec`.
    pub statistics_period_sec: u32,
    /// Memory budget for blocks-related columns
    pub memtable_blocks_budget_bytes: usize,
    /// Memory budget for plain and hashed state columns
    pub memtable_state_budget_bytes: usize,
    /// Memory budget for other columns
    pub memtable_other_budget_bytes: usize,
    /// Maximum number of block numbers in a history index shard.
    pub history_shard_capacity: u64,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            enable_statistics: false,
            statistics_period_sec: 60,
            memtable_blocks_budget_bytes: 1 * GiB,
            memtable_state_budget_bytes: 512 * MiB,
            memtable_other_budget_bytes: 128 * MiB,
            history_shard_capacity: DEFAULT_HISTORY_SHARD_CAPACITY,
        }
    }
}

impl RocksDBConfig {
    pub fn history_shard_capacity(self, history_shard_capacity: u64) -> Self {
        Self { history_shard_capacity, ..self }
    }
}

pub fn rocksdb_global_options(config: &RocksDBConfig) -> Result<Options> {
    let mut options = Options::default();
    options.create_if_missing(true);
    options.create_missing_column_families(true);
    let cores = std::thread::available_parallelism().map(|e| e.get() as i32).unwrap_or(1);
    options.increase_parallelism(cores);
    options.set_max_background_jobs(cores);

    options.set_atomic_flush(true);
    options.set_max_subcompactions(cores as _);

    options.set_max_log_file_size(10 * MiB);
    options.set_max_open_files(2048);
    options.set_keep_log_file_num(3);
    options.set_log_level(rocksdb::LogLevel::Warn);

    if config.enable_statistics {
        options.enable_statistics();
    }
    options.set_stats_dump_period_sec(config.statistics_period_sec);

    let mut env = Env::new().context("Creating rocksdb env")?;
    env.set_low_priority_background_threads(cores); // compaction

    options.set_env(&env);

    Ok(options)
}

impl Column {
    /// Per column rocksdb options: memory budget, compaction profile, point lookups.
    pub(crate) fn rocksdb_options(&self, config: &RocksDBConfig) -> Options {
        let mut options = Options::default();

        options.set_compression_type(DBCompressionType::Zstd);
        match self.budget_tier {
            ColumnMemoryBudget::Blocks => {
                options.optimize_universal_style_compaction(config.memtable_blocks_budget_bytes);
            }
            ColumnMemoryBudget::State => {
                options.optimize_universal_style_compaction(config.memtable_state_budget_bytes);
            }
            ColumnMemoryBudget::Other => {
                options.optimize_universal_style_compaction(config.memtable_other_budget_bytes);
            }
        }

        if self.point_lookup {
            options.optimize_for_point_lookup(5); // 5 MiB
        }

        options
    }
}
