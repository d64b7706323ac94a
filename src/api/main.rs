use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

#[path = "../api/mod.rs"]
mod api;
#[path = "../apply/mod.rs"]
mod apply;
#[path = "../packages/mod.rs"]
mod packages;
#[path = "../sandbox/mod.rs"]
mod sandbox;
#[path = "../shared/mod.rs"]
mod shared;

#[derive(Parser)]
#[command(name = "spaceapply-api")]
#[command(about = "Applies model-generated code and package changes to live project sandboxes")]
struct Args {
    /// Path to the JSON config file
    #[arg(long, env = "SPACE_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Bind address, overrides the config file
    #[arg(long)]
    host: Option<String>,

    /// Bind port, overrides the config file
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (mut config, config_path) = shared::SpaceConfig::load(args.config)?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    shared::logging::init_service_logging(&config.logging)?;
    info!(path = %config_path.display(), "Loaded configuration");

    api::rest::api::run_rest_server(config).await
}
