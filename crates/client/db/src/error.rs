use std::borrow::Cow;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("Rocksdb error: {0:#}")]
    RocksDB(#[from] rocksdb::Error),
    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("Block number set codec error: {0}")]
    BlockSet(#[from] std::io::Error),
    #[error("Another read-write transaction is already open on this store")]
    WriterBusy,
    #[error("Column {0} not initialized")]
    MissingColumn(&'static str),
    #[error("Inconsistent storage: {0}")]
    InconsistentStorage(Cow<'static, str>),
}

pub type Result<T, E = StorageError> = std::result::Result<T, E>;
