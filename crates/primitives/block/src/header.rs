use alloy_primitives::{keccak256, Address, Bytes, B256, U256};

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Header {
    /// The hash of this block's parent.
    pub parent_hash: B256,
    /// Hash of the uncle headers list.
    pub uncle_hash: B256,
    /// Block author, receives the block reward.
    pub coinbase: Address,
    /// State commitment after applying this block.
    pub state_root: B256,
    pub transactions_root: B256,
    pub receipts_root: B256,
    pub difficulty: U256,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    pub extra_data: Bytes,
    pub nonce: u64,
}

impl Header {
    /// Keccak hash over the canonical field encoding.
    pub fn hash(&self) -> B256 {
        let mut buf = Vec::with_capacity(32 * 7 + 20 + 8 * 5 + self.extra_data.len());
        buf.extend_from_slice(self.parent_hash.as_slice());
        buf.extend_from_slice(self.uncle_hash.as_slice());
        buf.extend_from_slice(self.coinbase.as_slice());
        buf.extend_from_slice(self.state_root.as_slice());
        buf.extend_from_slice(self.transactions_root.as_slice());
        buf.extend_from_slice(self.receipts_root.as_slice());
        buf.extend_from_slice(&self.difficulty.to_be_bytes::<32>());
        buf.extend_from_slice(&self.number.to_be_bytes());
        buf.extend_from_slice(&self.gas_limit.to_be_bytes());
        buf.extend_from_slice(&self.gas_used.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.nonce.to_be_bytes());
        buf.extend_from_slice(&self.extra_data);
        keccak256(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn header() -> Header {
        Header { number: 12, gas_limit: 8_000_000, timestamp: 1_600_000_000, ..Default::default() }
    }

    #[rstest]
    #[case::state_root(Header { state_root: B256::repeat_byte(1), ..header() })]
    #[case::extra_data(Header { extra_data: Bytes::from_static(b"x"), ..header() })]
    #[case::gas_used(Header { gas_used: 21_000, ..header() })]
    #[case::nonce(Header { nonce: 42, ..header() })]
    fn hash_depends_on_field(#[case] changed: Header) {
        assert_ne!(changed.hash(), header().hash());
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(header().hash(), header().clone().hash());
    }
}
