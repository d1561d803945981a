use crate::{changeset::ChangeSetDomain, error::Result, keys, rocksdb::Column, tx::RwTx};

/// Stage name -> last block fully processed by that stage.
pub const STAGE_PROGRESS_COLUMN: Column = Column::new("stage_progress").set_point_lookup();
pub const META_COLUMN: Column = Column::new("meta").set_point_lookup();

const META_ACCOUNT_PRUNE_HORIZON_KEY: &[u8] = b"ACCOUNT_PRUNE_HORIZON";
const META_STORAGE_PRUNE_HORIZON_KEY: &[u8] = b"STORAGE_PRUNE_HORIZON";

fn prune_horizon_key(domain: ChangeSetDomain) -> &'static [u8] {
    match domain {
        ChangeSetDomain::Account => META_ACCOUNT_PRUNE_HORIZON_KEY,
        ChangeSetDomain::Storage => META_STORAGE_PRUNE_HORIZON_KEY,
    }
}

impl RwTx {
    /// Progress of a stage, 0 when it never ran.
    #[tracing::instrument(skip(self))]
    pub fn get_stage_progress(&self, stage: &str) -> Result<u64> {
        match self.get(&STAGE_PROGRESS_COLUMN, stage.as_bytes())? {
            Some(data) => keys::decode_block_n(&data),
            None => Ok(0),
        }
    }

    #[tracing::instrument(skip(self))]
    pub fn write_stage_progress(&mut self, stage: &str, block_n: u64) {
        self.put(&STAGE_PROGRESS_COLUMN, stage.as_bytes(), keys::encode_block_n(block_n));
    }

    /// Blocks below the horizon have no change-set or history detail left.
    pub fn get_prune_horizon(&self, domain: ChangeSetDomain) -> Result<u64> {
        match self.get(&META_COLUMN, prune_horizon_key(domain))? {
            Some(data) => keys::decode_block_n(&data),
            None => Ok(0),
        }
    }

    pub(crate) fn write_prune_horizon(&mut self, domain: ChangeSetDomain, block_n: u64) {
        self.put(&META_COLUMN, prune_horizon_key(domain), keys::encode_block_n(block_n));
    }
}
