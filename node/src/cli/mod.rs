pub mod chain;
pub mod db;
pub mod stages;

pub use chain::*;
pub use db::*;
pub use stages::*;

use anyhow::bail;
use clap::Parser;
use figment::{
    providers::{Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Kestrel: staged sync stepping, benchmarking and consistency checking.
#[derive(Clone, Debug, clap::Parser, Deserialize, Serialize)]
pub struct RunCmd {
    /// Load the arguments from a toml, json or yaml file. Values in the file take precedence.
    #[clap(env = "KESTREL_CONFIG_FILE", long, value_name = "PATH")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    #[clap(flatten)]
    pub db_params: DbParams,

    #[clap(flatten)]
    pub chain_params: ChainParams,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Clone, Debug, clap::Subcommand, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Command {
    StateStages(StateStagesParams),
    /// Re-executes the next `--unwind` blocks until stopped, without committing.
    LoopExec(LoopParams),
    /// Recomputes the state root over the last `--unwind` blocks until stopped, without committing.
    LoopIh(LoopParams),
    GenerateChain(GenerateChainParams),
}

fn merge_file(config: Figment, path: &Path) -> anyhow::Result<Figment> {
    Ok(match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => config.merge(Toml::file(path)),
        Some("json") => config.merge(Json::file(path)),
        Some("yaml") => config.merge(Yaml::file(path)),
        _ => bail!("Unsupported file type for config file: {}", path.display()),
    })
}

impl RunCmd {
    /// Parses the command line, then layers the config file on top of it if one is given.
    pub fn load() -> anyhow::Result<Self> {
        Self::parse().with_config_file()
    }

    pub fn with_config_file(self) -> anyhow::Result<Self> {
        let Some(path) = self.config_file.clone() else {
            return Ok(self);
        };
        let config = merge_file(Figment::new().merge(Serialized::defaults(&self)), &path)?;
        Ok(Self { config_file: Some(path), ..config.extract()? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(args: &[&str]) -> RunCmd {
        RunCmd::try_parse_from(std::iter::once("kestrel").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn file_overrides_command_line() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[db_params]
base_path = "/data/kestrel"

[command.state-stages]
unwind = 7
batch_size = "1G"
"#
        )
        .unwrap();
        let path = file.path().to_str().unwrap();

        let cmd = parse(&["--config-file", path, "state-stages", "--unwind=3", "--unwind-every=10"])
            .with_config_file()
            .unwrap();

        assert_eq!(cmd.db_params.base_path, PathBuf::from("/data/kestrel"));
        assert_eq!(cmd.chain_params.preset, Preset::Devnet);
        let Command::StateStages(params) = cmd.command else { panic!("wrong command {:?}", cmd.command) };
        assert_eq!((params.unwind, params.unwind_every), (7, 10));
        assert_eq!(params.stepper_config().unwrap().batch_size, 1 << 30);
    }

    #[test]
    fn without_file() {
        let cmd = parse(&["--preset=legacy", "loop-exec", "--unwind=5"]).with_config_file().unwrap();
        assert_eq!(cmd.chain_params.chain_config().byzantium_block, Some(1000));
        let Command::LoopExec(params) = cmd.command else { panic!("wrong command {:?}", cmd.command) };
        assert_eq!((params.unwind, params.iterations), (5, None));
    }

    #[test]
    fn unsupported_file_type() {
        let cmd = parse(&["--config-file=kestrel.ini", "loop-ih", "--unwind=5"]);
        assert!(cmd.with_config_file().is_err());
    }
}
