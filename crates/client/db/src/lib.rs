//! Kestrel database backend.
//!
//! A RocksDB store with one column family per bucket, accessed through a single read-write
//! transaction at a time ([RwTx]). On top of the raw buckets this crate provides the pieces the
//! staged sync needs to move state forward and backward:
//!
//! - stage progress records,
//! - plain and hashed state,
//! - the per-block change-set (undo) log,
//! - the sharded block-number history index,
//! - pruning of change-sets and history below a horizon.

mod blocks;
mod changeset;
mod error;
mod genesis;
mod history;
pub mod keys;
mod meta;
mod prune;
pub mod rocksdb;
mod state;
mod tx;

pub use blocks::{BLOCKS_COLUMN, RECEIPTS_COLUMN};
pub use changeset::{Change, ChangeSet, ChangeSetDomain, ACCOUNT_CHANGESETS_COLUMN, STORAGE_CHANGESETS_COLUMN};
pub use error::{Result, StorageError};
pub use history::{shard_key, ACCOUNT_HISTORY_COLUMN, STORAGE_HISTORY_COLUMN};
pub use meta::{META_COLUMN, STAGE_PROGRESS_COLUMN};
pub use prune::PruneMode;
pub use self::rocksdb::{Column, RocksDBConfig, RocksDBStorage};
pub use roaring::RoaringTreemap;
pub use state::{
    hashed_key, HASHED_ACCOUNTS_COLUMN, HASHED_STORAGE_COLUMN, PLAIN_ACCOUNTS_COLUMN, PLAIN_STORAGE_COLUMN,
};
pub use tx::RwTx;
