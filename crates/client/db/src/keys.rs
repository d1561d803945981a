//! Key encodings shared by the plain state, hashed state, change-set and history buckets.
//!
//! Block numbers are 8 byte big-endian so that byte order is numeric order. A storage slot is
//! addressed by `address ‖ incarnation ‖ slot`; the history index drops the incarnation so that
//! every incarnation of a slot shares one block set.
use crate::error::{Result, StorageError};
use alloy_primitives::{keccak256, Address, B256};

pub const BLOCK_N_LEN: usize = 8;
pub const ADDRESS_LEN: usize = 20;
pub const INCARNATION_LEN: usize = 8;
pub const SLOT_LEN: usize = 32;
pub const STORAGE_KEY_LEN: usize = ADDRESS_LEN + INCARNATION_LEN + SLOT_LEN;
pub const HASHED_STORAGE_KEY_LEN: usize = 32 + INCARNATION_LEN + 32;

pub fn encode_block_n(block_n: u64) -> [u8; BLOCK_N_LEN] {
    block_n.to_be_bytes()
}

pub fn decode_block_n(bytes: &[u8]) -> Result<u64> {
    let bytes: [u8; BLOCK_N_LEN] = bytes
        .get(..BLOCK_N_LEN)
        .and_then(|b| b.try_into().ok())
        .ok_or(StorageError::InconsistentStorage("Malformated block_n in DB".into()))?;
    Ok(u64::from_be_bytes(bytes))
}

pub fn storage_key(address: &Address, incarnation: u64, slot: &B256) -> [u8; STORAGE_KEY_LEN] {
    let mut key = [0u8; STORAGE_KEY_LEN];
    key[..ADDRESS_LEN].copy_from_slice(address.as_slice());
    key[ADDRESS_LEN..ADDRESS_LEN + INCARNATION_LEN].copy_from_slice(&incarnation.to_be_bytes());
    key[ADDRESS_LEN + INCARNATION_LEN..].copy_from_slice(slot.as_slice());
    key
}

pub fn split_storage_key(key: &[u8]) -> Result<(Address, u64, B256)> {
    if key.len() != STORAGE_KEY_LEN {
        return Err(StorageError::InconsistentStorage(
            format!("Storage key has length {}, expected {STORAGE_KEY_LEN}", key.len()).into(),
        ));
    }
    let address = Address::from_slice(&key[..ADDRESS_LEN]);
    let incarnation = decode_block_n(&key[ADDRESS_LEN..ADDRESS_LEN + INCARNATION_LEN])?;
    let slot = B256::from_slice(&key[ADDRESS_LEN + INCARNATION_LEN..]);
    Ok((address, incarnation, slot))
}

pub fn split_account_key(key: &[u8]) -> Result<Address> {
    if key.len() != ADDRESS_LEN {
        return Err(StorageError::InconsistentStorage(
            format!("Account key has length {}, expected {ADDRESS_LEN}", key.len()).into(),
        ));
    }
    Ok(Address::from_slice(key))
}

/// History entity key: accounts are used as is, storage keys lose their incarnation.
pub fn key_without_incarnation(key: &[u8]) -> Vec<u8> {
    if key.len() == STORAGE_KEY_LEN {
        let mut out = Vec::with_capacity(ADDRESS_LEN + SLOT_LEN);
        out.extend_from_slice(&key[..ADDRESS_LEN]);
        out.extend_from_slice(&key[ADDRESS_LEN + INCARNATION_LEN..]);
        out
    } else {
        key.to_vec()
    }
}

pub fn hashed_account_key(address: &Address) -> B256 {
    keccak256(address)
}

pub fn hashed_storage_key(address: &Address, incarnation: u64, slot: &B256) -> [u8; HASHED_STORAGE_KEY_LEN] {
    let mut key = [0u8; HASHED_STORAGE_KEY_LEN];
    key[..32].copy_from_slice(keccak256(address).as_slice());
    key[32..32 + INCARNATION_LEN].copy_from_slice(&incarnation.to_be_bytes());
    key[32 + INCARNATION_LEN..].copy_from_slice(keccak256(slot).as_slice());
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_key_layout() {
        let address = Address::repeat_byte(0xaa);
        let slot = B256::repeat_byte(0x01);
        let key = storage_key(&address, 3, &slot);
        assert_eq!(split_storage_key(&key).unwrap(), (address, 3, slot));

        let without = key_without_incarnation(&key);
        assert_eq!(without.len(), ADDRESS_LEN + SLOT_LEN);
        assert_eq!(&without[..ADDRESS_LEN], address.as_slice());
        assert_eq!(&without[ADDRESS_LEN..], slot.as_slice());
    }

    #[test]
    fn account_key_is_unchanged_without_incarnation() {
        let address = Address::repeat_byte(0x42);
        assert_eq!(key_without_incarnation(address.as_slice()), address.to_vec());
    }

    #[test]
    fn block_n_order_is_numeric() {
        assert!(encode_block_n(255) < encode_block_n(256));
        assert_eq!(decode_block_n(&encode_block_n(123_456)).unwrap(), 123_456);
        assert!(decode_block_n(&[1, 2]).is_err());
    }
}
