use crate::{Header, Receipt, Transaction};
use alloy_primitives::{keccak256, B256};

/// Hash of empty input, used as the root of every empty list.
pub const EMPTY_HASH: B256 =
    alloy_primitives::b256!("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470");

/// Commitment over an ordered list of item hashes. Each item is bound to its position.
pub fn ordered_root(items: impl IntoIterator<Item = B256>) -> B256 {
    let mut buf = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        buf.extend_from_slice(&(index as u64).to_be_bytes());
        buf.extend_from_slice(item.as_slice());
    }
    keccak256(&buf)
}

pub fn transactions_root(transactions: &[Transaction]) -> B256 {
    ordered_root(transactions.iter().map(Transaction::hash))
}

pub fn receipts_root(receipts: &[Receipt]) -> B256 {
    ordered_root(receipts.iter().map(Receipt::hash))
}

pub fn uncles_hash(uncles: &[Header]) -> B256 {
    ordered_root(uncles.iter().map(Header::hash))
}
