//! CFDP server binary

use anyhow::Result;
use cfdp_common::logging::{init_logging, LogConfig};
use cfdp_server::api;
use cfdp_server::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::from_env()?;
    let _log_guard = init_logging(&log_config)?;

    let config = Config::load()?;
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        database = ?config.database.path,
        data_dir = ?config.ingest.data_dir,
        "Starting cfdp-server"
    );

    api::serve(config).await
}
