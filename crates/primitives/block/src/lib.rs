//! Block, header, transaction and account primitives shared by every Kestrel crate.

mod account;
mod chain_config;
mod commitments;
mod header;

pub use account::Account;
pub use alloy_primitives::{Address, Bytes, B256, U256};
pub use chain_config::{ChainConfig, ChainPreset};
pub use commitments::{ordered_root, receipts_root, transactions_root, uncles_hash, EMPTY_HASH};
pub use header::Header;

/// Block numbers are plain `u64` everywhere, genesis is block 0.
pub type BlockNumber = u64;

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Transaction {
    pub nonce: u64,
    /// Recovered sender. Signature recovery is done upstream by the senders stage.
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub input: Bytes,
}

impl Transaction {
    pub fn hash(&self) -> B256 {
        let mut buf = Vec::with_capacity(8 + 20 + 20 + 32 + self.input.len());
        buf.extend_from_slice(&self.nonce.to_be_bytes());
        buf.extend_from_slice(self.from.as_slice());
        buf.extend_from_slice(self.to.as_slice());
        buf.extend_from_slice(&self.value.to_be_bytes::<32>());
        buf.extend_from_slice(&self.input);
        alloy_primitives::keccak256(&buf)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Receipt {
    pub success: bool,
    pub cumulative_gas_used: u64,
}

impl Receipt {
    pub fn hash(&self) -> B256 {
        let mut buf = [0u8; 9];
        buf[0] = self.success as u8;
        buf[1..].copy_from_slice(&self.cumulative_gas_used.to_be_bytes());
        alloy_primitives::keccak256(buf)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
    pub uncles: Vec<Header>,
}

impl Block {
    pub fn number(&self) -> BlockNumber {
        self.header.number
    }

    pub fn hash(&self) -> B256 {
        self.header.hash()
    }

    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}
