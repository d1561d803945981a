use crate::{ConsistencyViolation, IntegrityError};
use alloy_primitives::Bytes;
use itertools::{EitherOrBoth, Itertools};
use kc_db::{hashed_key, ChangeSetDomain, RwTx, StorageError};
use kc_exec::StateCommitment;
use std::collections::BTreeMap;

/// Fast: the commitment over the hashed state equals the header state root of `block_n`.
/// Slow: additionally, the hashed buckets are exactly the plain buckets re-hashed.
#[tracing::instrument(skip(tx, commitment))]
pub fn check_trie(
    tx: &RwTx,
    commitment: &dyn StateCommitment,
    block_n: u64,
    slow: bool,
) -> Result<(), IntegrityError> {
    let header = tx.get_header(block_n)?.ok_or(IntegrityError::MissingHeader(block_n))?;
    let computed = commitment.state_root(tx).map_err(IntegrityError::Commitment)?;
    if computed != header.state_root {
        return Err(ConsistencyViolation::StateRootMismatch { block_n, expected: header.state_root, computed }.into());
    }
    if slow {
        for domain in ChangeSetDomain::ALL {
            check_hashed_state(tx, domain)?;
        }
    }
    tracing::debug!("🌳 State root at block {block_n} verified{}", if slow { " (full scan)" } else { "" });
    Ok(())
}

fn check_hashed_state(tx: &RwTx, domain: ChangeSetDomain) -> Result<(), IntegrityError> {
    let mut expected = BTreeMap::new();
    tx.walk(domain.plain_state_column(), &[], |key, value| {
        expected.insert(hashed_key(domain, key)?, value.to_vec());
        Ok::<_, StorageError>(true)
    })?;

    let mut found = vec![];
    tx.walk(domain.hashed_state_column(), &[], |key, value| {
        found.push((key.to_vec(), value.to_vec()));
        Ok::<_, StorageError>(true)
    })?;

    let divergence = expected.into_iter().merge_join_by(found, |(a, _), (b, _)| a.cmp(b)).find_map(|pair| {
        match pair {
            EitherOrBoth::Both((key, expected), (_, found)) if expected != found => {
                Some((key, Some(expected), Some(found)))
            }
            EitherOrBoth::Both(..) => None,
            EitherOrBoth::Left((key, expected)) => Some((key, Some(expected), None)),
            EitherOrBoth::Right((key, found)) => Some((key, None, Some(found))),
        }
    });
    match divergence {
        Some((key, expected, found)) => Err(ConsistencyViolation::HashedStateDivergence {
            domain,
            key: key.into(),
            expected: expected.map(Bytes::from),
            found: found.map(Bytes::from),
        }
        .into()),
        None => Ok(()),
    }
}
