use alloy_primitives::{Address, Bytes};
use kc_db::PruneMode;
use kc_stages::{MiningConfig, StepperConfig, SyncError};
use kp_utils::parsers::{parse_byte_size, parse_duration};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn invalid(flag: &'static str) -> impl FnOnce(anyhow::Error) -> SyncError {
    move |err| SyncError::Configuration(format!("--{flag}: {err:#}").into())
}

fn batch_size(s: &str) -> Result<usize, SyncError> {
    let bytes = parse_byte_size(s).map_err(invalid("batch-size"))?;
    usize::try_from(bytes)
        .map_err(|_| SyncError::Configuration(format!("--batch-size: {bytes} bytes does not fit in memory").into()))
}

/// Moves the state stages through the downloaded blocks in small forward and backward steps.
#[derive(Clone, Debug, clap::Args, Deserialize, Serialize)]
pub struct StateStagesParams {
    /// Blocks to unwind after every forward step. Without `--unwind-every`, a single unwind of
    /// this many blocks.
    #[clap(env = "KESTREL_UNWIND", long, default_value_t = 0, value_name = "BLOCKS")]
    pub unwind: u64,

    /// Blocks to execute before every unwind.
    #[clap(env = "KESTREL_UNWIND_EVERY", long, default_value_t = 0, value_name = "BLOCKS")]
    pub unwind_every: u64,

    /// Stop at this block instead of the last downloaded one.
    #[clap(env = "KESTREL_STOP", long = "stop", value_name = "BLOCK NUMBER")]
    pub stop_at: Option<u64>,

    /// Check change-sets, history index and state root after every forward step.
    #[clap(env = "KESTREL_INTEGRITY_FAST", long)]
    #[serde(default)]
    pub integrity_fast: bool,

    /// With `--integrity-fast`, also rebuild the hashed state from the plain state.
    #[clap(env = "KESTREL_INTEGRITY_SLOW", long, requires = "integrity_fast")]
    #[serde(default)]
    pub integrity_slow: bool,

    /// State writes buffered in memory before they go to the database, e.g. `512M`.
    #[clap(env = "KESTREL_BATCH_SIZE", long, default_value = "512M", value_name = "SIZE")]
    pub batch_size: String,

    /// Produce every next known block locally and compare it with the stored one.
    #[clap(env = "KESTREL_MINING", long)]
    #[serde(default)]
    pub mining: bool,

    /// How long to wait for a produced block, e.g. `30s`.
    #[clap(env = "KESTREL_MINING_TIMEOUT", long, default_value = "60s", value_name = "DURATION")]
    pub mining_timeout: String,

    /// Author of blocks produced with the default template.
    #[clap(env = "KESTREL_ETHERBASE", long, value_name = "ADDRESS")]
    pub etherbase: Option<Address>,

    /// Extra data of blocks produced with the default template, hex encoded.
    #[clap(env = "KESTREL_EXTRA_DATA", long, value_name = "HEX")]
    pub extra_data: Option<Bytes>,

    /// Keep change-sets and history for this many blocks behind the head only.
    #[clap(env = "KESTREL_PRUNE_DISTANCE", long, value_name = "BLOCKS")]
    pub prune_distance: Option<u64>,

    /// Database to compare the final state with.
    #[clap(env = "KESTREL_REFERENCE_DB", long, value_name = "PATH")]
    pub reference_db: Option<PathBuf>,
}

impl StateStagesParams {
    pub fn stepper_config(&self) -> Result<StepperConfig, SyncError> {
        let batch_size = batch_size(&self.batch_size)?;
        let result_timeout = parse_duration(&self.mining_timeout).map_err(invalid("mining-timeout"))?;

        let mining = MiningConfig::default()
            .enabled(self.mining)
            .etherbase(self.etherbase.unwrap_or_default())
            .extra_data(self.extra_data.clone().unwrap_or_default())
            .result_timeout(result_timeout);
        let prune_mode = self.prune_distance.map_or(PruneMode::Archive, PruneMode::Distance);

        Ok(StepperConfig::default()
            .unwind(self.unwind)
            .unwind_every(self.unwind_every)
            .stop_at(self.stop_at)
            .integrity(self.integrity_fast, self.integrity_slow)
            .batch_size(batch_size)
            .mining(mining)
            .prune_mode(prune_mode)
            .reference_db(self.reference_db.clone()))
    }
}

/// Re-runs a range of blocks (or of state root computations) over and over, for benchmarking.
#[derive(Clone, Debug, clap::Args, Deserialize, Serialize)]
pub struct LoopParams {
    /// Size of the range, in blocks.
    #[clap(env = "KESTREL_UNWIND", long, value_name = "BLOCKS")]
    pub unwind: u64,

    /// Stop after this many runs instead of waiting for ctrl-c.
    #[clap(env = "KESTREL_ITERATIONS", long, value_name = "RUNS")]
    pub iterations: Option<u64>,

    /// State writes buffered in memory before they go to the database, e.g. `512M`.
    #[clap(env = "KESTREL_BATCH_SIZE", long, default_value = "512M", value_name = "SIZE")]
    pub batch_size: String,
}

impl LoopParams {
    pub fn stepper_config(&self) -> Result<StepperConfig, SyncError> {
        let batch_size = batch_size(&self.batch_size)?;
        Ok(StepperConfig::default().batch_size(batch_size))
    }
}

/// Writes a generated chain into an empty database.
#[derive(Clone, Debug, clap::Args, Deserialize, Serialize)]
pub struct GenerateChainParams {
    /// Number of blocks after genesis.
    #[clap(env = "KESTREL_BLOCKS", long, default_value_t = 1000, value_name = "BLOCKS")]
    pub blocks: u64,

    /// Seed of the transaction generator. The same seed always produces the same chain.
    #[clap(env = "KESTREL_SEED", long, default_value_t = 0)]
    pub seed: u64,

    /// Number of accounts funded at genesis.
    #[clap(env = "KESTREL_FUNDED_ACCOUNTS", long, default_value_t = 16, value_parser = clap::value_parser!(u8).range(1..))]
    pub funded_accounts: u8,
}
