use crate::{ConsistencyViolation, ExpectedChangeSets, IntegrityError};
use alloy_primitives::Bytes;
use kc_db::{keys, ChangeSet, ChangeSetDomain, RwTx, StorageError};

/// Compares the persisted change-set of `block_n` with `expected`, entry by entry in key order.
pub fn check_change_set(
    tx: &RwTx,
    domain: ChangeSetDomain,
    block_n: u64,
    expected: &ChangeSet,
) -> Result<(), IntegrityError> {
    let mut expected = expected.clone();
    expected.sort();

    let mut seen = 0;
    let mut violation = None;
    tx.walk_changeset_block(domain, block_n, |key, value| {
        let Some(want) = expected.get(seen) else {
            violation = Some(ConsistencyViolation::UnexpectedChangeSetEntry {
                domain,
                block_n,
                key: Bytes::copy_from_slice(key),
                persisted: Bytes::copy_from_slice(value),
            });
            return Ok::<_, StorageError>(false);
        };
        if want.key != key || want.value != value {
            violation = Some(ConsistencyViolation::ChangeSetMismatch {
                domain,
                block_n,
                key: Bytes::copy_from_slice(key),
                persisted: Bytes::copy_from_slice(value),
                expected_key: Bytes::copy_from_slice(&want.key),
                expected: Bytes::copy_from_slice(&want.value),
            });
            return Ok(false);
        }
        seen += 1;
        Ok(true)
    })?;

    if let Some(violation) = violation {
        return Err(violation.into());
    }
    if seen != expected.len() {
        return Err(ConsistencyViolation::ChangeSetCountMismatch {
            domain,
            block_n,
            persisted: seen,
            expected: expected.len(),
        }
        .into());
    }
    Ok(())
}

/// Every change-set entry of `domain` at or above `from_block` must be in the history index.
pub fn check_history(tx: &RwTx, domain: ChangeSetDomain, from_block: u64) -> Result<(), IntegrityError> {
    tx.walk_changesets(domain, from_block, |block_n, key, _| {
        let entity = keys::key_without_incarnation(key);
        let blocks = tx.history_get(domain, &entity, block_n.saturating_sub(1), block_n + 1)?;
        if !blocks.contains(block_n) {
            return Err(IntegrityError::from(ConsistencyViolation::MissingHistoryEntry {
                domain,
                block_n,
                key: entity.into(),
            }));
        }
        Ok(true)
    })
}

/// Checks the shadowed change-sets above `max(exec_at, pruned_to)` against the log, drains the
/// shadow, then checks history completeness of both domains from the same block.
#[tracing::instrument(skip(expected, tx))]
pub fn check_changes(
    expected: &ExpectedChangeSets,
    tx: &RwTx,
    exec_at: u64,
    pruned_to: u64,
) -> Result<(), IntegrityError> {
    let check_from = exec_at.max(pruned_to);
    let mut checked = 0usize;
    for (block_n, (accounts, storage)) in expected.take_all() {
        if block_n <= check_from {
            continue;
        }
        check_change_set(tx, ChangeSetDomain::Account, block_n, &accounts)?;
        check_change_set(tx, ChangeSetDomain::Storage, block_n, &storage)?;
        checked += 1;
    }
    for domain in ChangeSetDomain::ALL {
        check_history(tx, domain, check_from)?;
    }
    tracing::debug!("🔍 Checked change-sets of {checked} blocks, history from block {check_from}");
    Ok(())
}
