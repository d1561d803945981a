use crate::{error::StorageError, tx::RwTx};
use rocksdb::{BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, FlushOptions, MultiThreaded};
use std::{
    fmt,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

pub mod column;
mod options;

pub(crate) type DB = DBWithThreadMode<MultiThreaded>;

pub use column::{Column, ColumnMemoryBudget, ALL_COLUMNS};
pub use options::{RocksDBConfig, DEFAULT_HISTORY_SHARD_CAPACITY};

pub(crate) struct RocksDBStorageInner {
    pub(crate) db: DB,
    pub(crate) config: RocksDBConfig,
    /// Set while a [RwTx] is alive. There is at most one writer per store.
    pub(crate) writer_active: AtomicBool,
    #[cfg(any(test, feature = "testing"))]
    pub(crate) _temp_dir: Option<tempfile::TempDir>,
}

impl Drop for RocksDBStorageInner {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            tracing::error!("Error when flushing the database: {err:#}");
        }
        self.db.cancel_all_background_work(true);
    }
}

impl fmt::Debug for RocksDBStorageInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DBInner").field("config", &self.config).finish()
    }
}

impl RocksDBStorageInner {
    pub(crate) fn get_column(&self, col: &Column) -> Result<Arc<BoundColumnFamily<'_>>, StorageError> {
        self.get_column_by_name(col.rocksdb_name)
    }

    pub(crate) fn get_column_by_name(&self, name: &'static str) -> Result<Arc<BoundColumnFamily<'_>>, StorageError> {
        self.db.cf_handle(name).ok_or(StorageError::MissingColumn(name))
    }

    fn flush(&self) -> Result<(), StorageError> {
        tracing::debug!("doing a db flush");
        let mut opts = FlushOptions::default();
        opts.set_wait(true);
        // we have to collect twice here :/
        let columns = ALL_COLUMNS.iter().map(|col| self.get_column(col)).collect::<Result<Vec<_>, _>>()?;
        let columns = columns.iter().collect::<Vec<_>>();

        self.db.flush_cfs_opt(&columns, &opts)?;

        Ok(())
    }
}

/// Handle to an opened store. Cheap to clone, every clone shares the same single-writer slot.
#[derive(Debug, Clone)]
pub struct RocksDBStorage(Arc<RocksDBStorageInner>);

impl RocksDBStorage {
    pub fn open(path: &Path, config: &RocksDBConfig) -> anyhow::Result<Self> {
        let opts = options::rocksdb_global_options(config)?;
        tracing::debug!("Opening db at {:?}", path.display());
        let db = DB::open_cf_descriptors(
            &opts,
            path,
            ALL_COLUMNS.iter().map(|col| ColumnFamilyDescriptor::new(col.rocksdb_name, col.rocksdb_options(config))),
        )?;

        Ok(Self(Arc::new(RocksDBStorageInner {
            db,
            config: config.clone(),
            writer_active: AtomicBool::new(false),
            #[cfg(any(test, feature = "testing"))]
            _temp_dir: None,
        })))
    }

    #[cfg(any(test, feature = "testing"))]
    pub fn open_for_testing() -> Self {
        Self::open_for_testing_with_config(&RocksDBConfig::default())
    }

    #[cfg(any(test, feature = "testing"))]
    pub fn open_for_testing_with_config(config: &RocksDBConfig) -> Self {
        let temp_dir = tempfile::TempDir::with_prefix("kestrel-test").unwrap();
        let opts = options::rocksdb_global_options(config).unwrap();
        let db = DB::open_cf_descriptors(
            &opts,
            temp_dir.path(),
            ALL_COLUMNS.iter().map(|col| ColumnFamilyDescriptor::new(col.rocksdb_name, col.rocksdb_options(config))),
        )
        .unwrap();
        Self(Arc::new(RocksDBStorageInner {
            db,
            config: config.clone(),
            writer_active: AtomicBool::new(false),
            _temp_dir: Some(temp_dir),
        }))
    }

    pub fn config(&self) -> &RocksDBConfig {
        &self.0.config
    }

    /// Opens the single read-write transaction of this store.
    ///
    /// Fails with [StorageError::WriterBusy] while another [RwTx] is alive, the slot is released
    /// when that transaction is committed, rolled back or dropped.
    pub fn begin_rw(&self) -> Result<RwTx, StorageError> {
        self.0.writer_active.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).map_err(|_| StorageError::WriterBusy)?;
        Ok(RwTx::new(Arc::clone(&self.0)))
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.0.flush()
    }
}
