use alloy_primitives::{Bytes, B256};
use kc_db::{ChangeSetDomain, StorageError};

/// A logic or determinism bug. Never transient: the run stops on the first one.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyViolation {
    #[error(
        "Change-set mismatch: domain={domain}, block={block_n}, key={key}, persisted={persisted}, expected key={expected_key}, expected={expected}"
    )]
    ChangeSetMismatch {
        domain: ChangeSetDomain,
        block_n: u64,
        key: Bytes,
        persisted: Bytes,
        expected_key: Bytes,
        expected: Bytes,
    },
    #[error("Unexpected change-set entry: domain={domain}, block={block_n}, key={key}, persisted={persisted}")]
    UnexpectedChangeSetEntry { domain: ChangeSetDomain, block_n: u64, key: Bytes, persisted: Bytes },
    #[error("Change-set length mismatch: domain={domain}, block={block_n}, persisted={persisted}, expected={expected}")]
    ChangeSetCountMismatch { domain: ChangeSetDomain, block_n: u64, persisted: usize, expected: usize },
    #[error("History index is missing a change: domain={domain}, block={block_n}, key={key}")]
    MissingHistoryEntry { domain: ChangeSetDomain, block_n: u64, key: Bytes },
    #[error("Mined block {block_n} differs from the reference in {field}: reference={reference}, candidate={candidate}")]
    MinedBlockMismatch { block_n: u64, field: &'static str, reference: String, candidate: String },
    #[error("State root mismatch at block {block_n}: header={expected:#x}, computed={computed:#x}")]
    StateRootMismatch { block_n: u64, expected: B256, computed: B256 },
    #[error("Hashed {domain} state diverges from plain state at hashed key {key}: expected={expected:?}, found={found:?}")]
    HashedStateDivergence { domain: ChangeSetDomain, key: Bytes, expected: Option<Bytes>, found: Option<Bytes> },
    #[error("Bucket {column} differs from the reference store at key {key}: ours={ours:?}, reference={reference:?}")]
    ReferenceStoreDivergence { column: &'static str, key: Bytes, ours: Option<Bytes>, reference: Option<Bytes> },
}

#[derive(thiserror::Error, Debug)]
pub enum IntegrityError {
    #[error(transparent)]
    Violation(#[from] ConsistencyViolation),
    #[error("Storage error: {0:#}")]
    Storage(#[from] StorageError),
    #[error("Computing state commitment: {0:#}")]
    Commitment(#[source] anyhow::Error),
    #[error("Header of block {0} not found")]
    MissingHeader(u64),
}
