use crate::{
    error::{Result, StorageError},
    keys,
    rocksdb::Column,
    tx::RwTx,
};
use kp_block::{Block, Header, Receipt};

/// block_n -> bincode encoded block.
pub const BLOCKS_COLUMN: Column = Column::new("blocks").use_blocks_mem_budget();
/// block_n -> bincode encoded receipts of the block, written by the execution stage.
pub const RECEIPTS_COLUMN: Column = Column::new("receipts").use_blocks_mem_budget();

impl RwTx {
    pub fn write_block(&mut self, block: &Block) -> Result<()> {
        self.put(&BLOCKS_COLUMN, keys::encode_block_n(block.number()), block.encode()?);
        Ok(())
    }

    pub fn get_block(&self, block_n: u64) -> Result<Option<Block>> {
        let Some(data) = self.get(&BLOCKS_COLUMN, &keys::encode_block_n(block_n))? else {
            return Ok(None);
        };
        Ok(Some(Block::decode(&data)?))
    }

    pub fn get_header(&self, block_n: u64) -> Result<Option<Header>> {
        Ok(self.get_block(block_n)?.map(|block| block.header))
    }

    /// Highest block number present in the blocks bucket.
    pub fn highest_block(&self) -> Result<Option<u64>> {
        self.last_entry(&BLOCKS_COLUMN)?.map(|(key, _)| keys::decode_block_n(&key)).transpose()
    }

    pub fn write_receipts(&mut self, block_n: u64, receipts: &[Receipt]) -> Result<()> {
        self.put(&RECEIPTS_COLUMN, keys::encode_block_n(block_n), bincode::serialize(receipts)?);
        Ok(())
    }

    pub fn get_receipts(&self, block_n: u64) -> Result<Option<Vec<Receipt>>> {
        let Some(data) = self.get(&RECEIPTS_COLUMN, &keys::encode_block_n(block_n))? else {
            return Ok(None);
        };
        Ok(Some(bincode::deserialize(&data)?))
    }

    /// Removes the receipts of every block `>= from_block`.
    pub fn delete_receipts_from(&mut self, from_block: u64) -> Result<()> {
        let mut stale = vec![];
        self.walk(&RECEIPTS_COLUMN, &keys::encode_block_n(from_block), |key, _| {
            stale.push(key.to_vec());
            Ok::<_, StorageError>(true)
        })?;
        for key in stale {
            self.delete(&RECEIPTS_COLUMN, key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::RocksDBStorage;
    use kp_block::{Block, Header, Receipt};

    fn block(number: u64) -> Block {
        Block { header: Header { number, ..Default::default() }, ..Default::default() }
    }

    #[test]
    fn highest_block_and_receipts() {
        let db = RocksDBStorage::open_for_testing();
        let mut tx = db.begin_rw().unwrap();
        assert_eq!(tx.highest_block().unwrap(), None);
        for n in [0, 1, 2, 300] {
            tx.write_block(&block(n)).unwrap();
        }
        assert_eq!(tx.highest_block().unwrap(), Some(300));
        assert_eq!(tx.get_header(2).unwrap().unwrap().number, 2);
        assert!(tx.get_block(3).unwrap().is_none());

        for n in 1..=3 {
            tx.write_receipts(n, &[Receipt { success: true, cumulative_gas_used: n * 21_000 }]).unwrap();
        }
        tx.delete_receipts_from(2).unwrap();
        assert!(tx.get_receipts(1).unwrap().is_some());
        assert!(tx.get_receipts(2).unwrap().is_none());
        assert!(tx.get_receipts(3).unwrap().is_none());
    }
}
