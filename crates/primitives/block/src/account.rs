use alloy_primitives::{B256, U256};

/// Plain-state account record.
///
/// `incarnation` is bumped every time the account is re-created after a self-destruct, storage
/// slots are keyed by it so that slots written by a previous incarnation become unreachable.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Account {
    pub nonce: u64,
    pub balance: U256,
    pub incarnation: u64,
    pub code_hash: B256,
}

impl Account {
    pub fn with_balance(balance: U256) -> Self {
        Self { balance, incarnation: 1, ..Default::default() }
    }

    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode() {
        let account = Account { nonce: 9, balance: U256::from(77u64), incarnation: 2, code_hash: B256::ZERO };
        assert_eq!(Account::decode(&account.encode().unwrap()).unwrap(), account);
    }

    #[test]
    fn decode_garbage_fails() {
        assert!(Account::decode(&[1, 2, 3]).is_err());
    }
}
