use kp_block::{ChainConfig, ChainPreset};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, clap::ValueEnum, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// Every fork active from genesis.
    Devnet,
    /// Receipt roots only count from block 1000 on.
    Legacy,
}

impl From<Preset> for ChainPreset {
    fn from(value: Preset) -> Self {
        match value {
            Preset::Devnet => Self::Devnet,
            Preset::Legacy => Self::Legacy,
        }
    }
}

#[derive(Clone, Debug, clap::Args, Deserialize, Serialize)]
pub struct ChainParams {
    /// The chain rules blocks are executed with.
    #[clap(env = "KESTREL_PRESET", long, value_enum, default_value = "devnet")]
    pub preset: Preset,
}

impl ChainParams {
    pub fn chain_config(&self) -> ChainConfig {
        ChainConfig::from_preset(self.preset.into())
    }
}
