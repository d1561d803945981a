use kc_db::RocksDBConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Clone, Debug, clap::Args, Deserialize, Serialize)]
pub struct DbParams {
    /// The path where kestrel stores the database.
    #[clap(env = "KESTREL_BASE_PATH", long, default_value = "/tmp/kestrel", value_name = "PATH")]
    pub base_path: PathBuf,

    /// Maximum number of block numbers kept in a single history index shard.
    #[clap(env = "KESTREL_HISTORY_SHARD_CAPACITY", long, default_value_t = 2000, value_name = "BLOCKS")]
    pub history_shard_capacity: u64,

    /// Enable rocksdb statistics. This has a small performance cost for every database operation.
    /// Statistics are dumped into the `LOG` file in the rocksdb database directory.
    #[clap(env = "KESTREL_DB_ENABLE_STATISTICS", long)]
    #[serde(default)]
    pub db_enable_statistics: bool,
}

impl DbParams {
    pub fn backend_config(&self) -> RocksDBConfig {
        RocksDBConfig { enable_statistics: self.db_enable_statistics, ..Default::default() }
            .history_shard_capacity(self.history_shard_capacity)
    }
}
