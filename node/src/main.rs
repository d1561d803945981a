//! Kestrel command line.

mod cli;
mod commands;

use anyhow::Context;
use cli::{Command, RunCmd};
use kc_analytics::LoggingConfig;
use kc_db::RocksDBStorage;
use kp_utils::{graceful_shutdown, service::ServiceContext};

const GREET_IMPL_NAME: &str = "Kestrel";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let run_cmd = RunCmd::load()?;
    kc_analytics::setup_logging(&LoggingConfig::default()).context("Initializing logging")?;

    let chain_config = run_cmd.chain_params.chain_config();
    tracing::info!("🪶 {} v{}", GREET_IMPL_NAME, env!("CARGO_PKG_VERSION"));
    tracing::info!("🌐 Chain: {} (chain id {})", chain_config.chain_name, chain_config.chain_id);
    tracing::info!("💾 Database: {}", run_cmd.db_params.base_path.display());

    let db_config = run_cmd.db_params.backend_config();
    let db = RocksDBStorage::open(&run_cmd.db_params.base_path, &db_config).context("Opening database")?;

    let ctx = ServiceContext::new();
    tokio::spawn({
        let ctx = ctx.clone();
        async move {
            graceful_shutdown().await;
            ctx.cancel_global();
        }
    });

    let res = match &run_cmd.command {
        Command::StateStages(params) => commands::state_stages(params, db.clone(), &db_config, chain_config, ctx).await,
        Command::LoopExec(params) => commands::loop_exec(params, db.clone(), chain_config, ctx).await,
        Command::LoopIh(params) => commands::loop_ih(params, db.clone(), chain_config, ctx).await,
        Command::GenerateChain(params) => commands::generate_chain(params, &db, chain_config),
    };
    db.flush().context("Flushing database")?;
    res
}
