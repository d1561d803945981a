#[derive(Debug, Clone, Copy, Default)]
pub enum ColumnMemoryBudget {
    #[default]
    Other,
    Blocks,
    State,
}

#[derive(Debug)]
pub struct Column {
    pub rocksdb_name: &'static str,
    pub budget_tier: ColumnMemoryBudget,
    pub point_lookup: bool,
}

impl Column {
    pub const fn new(name: &'static str) -> Self {
        Self { rocksdb_name: name, budget_tier: ColumnMemoryBudget::Other, point_lookup: false }
    }

    pub const fn use_blocks_mem_budget(mut self) -> Self {
        self.budget_tier = ColumnMemoryBudget::Blocks;
        self
    }
    pub const fn use_state_mem_budget(mut self) -> Self {
        self.budget_tier = ColumnMemoryBudget::State;
        self
    }
    pub const fn set_point_lookup(mut self) -> Self {
        self.point_lookup = true;
        self
    }
}

pub const ALL_COLUMNS: &[&Column] = &[
    &crate::meta::STAGE_PROGRESS_COLUMN,
    &crate::meta::META_COLUMN,
    &crate::blocks::BLOCKS_COLUMN,
    &crate::blocks::RECEIPTS_COLUMN,
    &crate::state::PLAIN_ACCOUNTS_COLUMN,
    &crate::state::PLAIN_STORAGE_COLUMN,
    &crate::state::HASHED_ACCOUNTS_COLUMN,
    &crate::state::HASHED_STORAGE_COLUMN,
    &crate::changeset::ACCOUNT_CHANGESETS_COLUMN,
    &crate::changeset::STORAGE_CHANGESETS_COLUMN,
    &crate::history::ACCOUNT_HISTORY_COLUMN,
    &crate::history::STORAGE_HISTORY_COLUMN,
];
