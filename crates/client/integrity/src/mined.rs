use crate::ConsistencyViolation;
use kp_block::{ChainConfig, Header};
use std::fmt;

fn field<T: PartialEq + fmt::Debug>(
    block_n: u64,
    name: &'static str,
    reference: &T,
    candidate: &T,
) -> Result<(), ConsistencyViolation> {
    if reference == candidate {
        return Ok(());
    }
    Err(ConsistencyViolation::MinedBlockMismatch {
        block_n,
        field: name,
        reference: format!("{reference:?}"),
        candidate: format!("{candidate:?}"),
    })
}

fn compare(reference: &Header, candidate: &Header, chain_config: &ChainConfig) -> Result<(), ConsistencyViolation> {
    let block_n = reference.number;
    field(block_n, "state root", &reference.state_root, &candidate.state_root)?;
    field(block_n, "transactions root", &reference.transactions_root, &candidate.transactions_root)?;
    field(block_n, "parent hash", &reference.parent_hash, &candidate.parent_hash)?;
    field(block_n, "uncle hash", &reference.uncle_hash, &candidate.uncle_hash)?;
    field(block_n, "gas used", &reference.gas_used, &candidate.gas_used)?;
    field(block_n, "extra data", &reference.extra_data, &candidate.extra_data)?;
    if chain_config.is_byzantium(block_n) {
        field(block_n, "receipts root", &reference.receipts_root, &candidate.receipts_root)?;
    }
    Ok(())
}

/// Checks that a block produced locally from the inputs of a known block ends up with the same
/// header commitments. The receipts root only counts from the Byzantium block on.
pub fn check_mined_block(
    reference: &Header,
    candidate: &Header,
    chain_config: &ChainConfig,
) -> Result<(), ConsistencyViolation> {
    compare(reference, candidate, chain_config).inspect_err(|violation| {
        tracing::error!("⛏️ {violation}");
        tracing::error!("Reference header: {reference:#?}");
        tracing::error!("Mined header: {candidate:#?}");
    })
}
