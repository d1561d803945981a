use crate::{changeset::ChangeSetDomain, error::Result, tx::RwTx};
use alloy_primitives::Address;
use kp_block::{Account, Block};

impl RwTx {
    /// Stores block 0 and its allocation in both the plain and the hashed state. Stage progress
    /// is left at 0, which every stage reads as "genesis applied".
    #[tracing::instrument(skip_all, fields(accounts = alloc.len()))]
    pub fn write_genesis(&mut self, genesis: &Block, alloc: &[(Address, Account)]) -> Result<()> {
        self.write_block(genesis)?;
        for (address, account) in alloc {
            self.put_account(address, Some(account))?;
            self.put_hashed_raw(ChangeSetDomain::Account, address.as_slice(), &account.encode()?)?;
        }
        Ok(())
    }
}
