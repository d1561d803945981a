use alloy_primitives::U256;
use std::str::FromStr;

#[derive(thiserror::Error, Debug)]
#[error("Unknown chain preset {0:?}, expected one of `devnet`, `legacy`")]
pub struct UnknownPreset(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainPreset {
    /// Every fork active from genesis.
    Devnet,
    /// Byzantium activates at block 1000.
    Legacy,
}

impl FromStr for ChainPreset {
    type Err = UnknownPreset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "devnet" => Ok(Self::Devnet),
            "legacy" => Ok(Self::Legacy),
            _ => Err(UnknownPreset(s.into())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChainConfig {
    /// Human readable chain name, for displaying to the console.
    pub chain_name: String,
    pub chain_id: u64,
    /// First block where receipt roots are part of the consensus rules. `None` means never.
    pub byzantium_block: Option<u64>,
    /// Reward credited to the block author.
    pub block_reward: U256,
}

impl ChainConfig {
    pub fn from_preset(preset: ChainPreset) -> Self {
        match preset {
            ChainPreset::Devnet => Self::devnet(),
            ChainPreset::Legacy => Self {
                chain_name: "Kestrel legacy".into(),
                chain_id: 1338,
                byzantium_block: Some(1000),
                block_reward: U256::from(5_000_000_000_000_000_000u128),
            },
        }
    }

    pub fn devnet() -> Self {
        Self {
            chain_name: "Kestrel devnet".into(),
            chain_id: 1337,
            byzantium_block: Some(0),
            block_reward: U256::from(2_000_000_000_000_000_000u128),
        }
    }

    pub fn is_byzantium(&self, block_n: u64) -> bool {
        self.byzantium_block.is_some_and(|fork| block_n >= fork)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::devnet_genesis(ChainPreset::Devnet, 0, true)]
    #[case::legacy_before(ChainPreset::Legacy, 999, false)]
    #[case::legacy_at(ChainPreset::Legacy, 1000, true)]
    fn byzantium_boundary(#[case] preset: ChainPreset, #[case] block_n: u64, #[case] expected: bool) {
        assert_eq!(ChainConfig::from_preset(preset).is_byzantium(block_n), expected);
    }

    #[test]
    fn never_byzantium() {
        let config = ChainConfig { byzantium_block: None, ..ChainConfig::devnet() };
        assert!(!config.is_byzantium(u64::MAX));
    }

    #[test]
    fn parse_preset() {
        assert_eq!("legacy".parse::<ChainPreset>().unwrap(), ChainPreset::Legacy);
        assert!("mainnet".parse::<ChainPreset>().is_err());
    }
}
