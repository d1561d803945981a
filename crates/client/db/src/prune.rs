use crate::{
    changeset::ChangeSetDomain,
    error::{Result, StorageError},
    keys,
    tx::RwTx,
};
use std::collections::BTreeSet;

/// How much change-set and history detail to keep behind the chain head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum PruneMode {
    /// Keep everything.
    #[default]
    Archive,
    /// Keep the last `n` blocks.
    Distance(u64),
}

impl PruneMode {
    /// First block whose detail must be kept when the head is `head`.
    pub fn prune_to(&self, head: u64) -> u64 {
        match self {
            Self::Archive => 0,
            Self::Distance(distance) => head.saturating_sub(*distance),
        }
    }
}

impl RwTx {
    /// Drops change-sets and history of `domain` below `horizon` and records the new horizon.
    /// Returns the number of change-set entries removed.
    #[tracing::instrument(skip(self))]
    pub fn prune_domain(&mut self, domain: ChangeSetDomain, horizon: u64) -> Result<usize> {
        if horizon <= self.get_prune_horizon(domain)? {
            return Ok(0);
        }

        let mut stale = vec![];
        let mut entities = BTreeSet::new();
        self.walk_changesets(domain, 0, |block_n, key, _| {
            if block_n >= horizon {
                return Ok::<_, StorageError>(false);
            }
            let mut full_key = keys::encode_block_n(block_n).to_vec();
            full_key.extend_from_slice(key);
            stale.push(full_key);
            entities.insert(keys::key_without_incarnation(key));
            Ok(true)
        })?;

        for entity in &entities {
            self.history_prune(domain, entity, horizon)?;
        }
        let removed = stale.len();
        for key in stale {
            self.delete(domain.changeset_column(), key);
        }
        self.write_prune_horizon(domain, horizon);
        tracing::debug!("✂️ Pruned {removed} {domain} change-set entries below block {horizon}");
        Ok(removed)
    }
}
