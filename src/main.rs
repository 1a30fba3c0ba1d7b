// Main binary that starts the Waitron server
use clap::Parser;
use color_eyre::eyre::{Result, eyre};
use std::io::stderr;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, registry};

use waitron_server::{Config, run as run_server};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Waitron - unattended OS provisioning for network-booted machines",
    long_about = None
)]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, env = "CONFIG_FILE")]
    config: PathBuf,

    /// Address to listen for requests on
    #[arg(short, long, default_value = "0.0.0.0")]
    address: IpAddr,

    /// Port to listen for requests on
    #[arg(short, long, default_value_t = 9090)]
    port: u16,

    /// Verbose output - shows more detailed logs
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let default_directives = format!(
        "waitron={level},waitron_server={level},waitron_pixie={level},tower_http={level},\
         hyper=warn,h2=warn",
        level = default_level
    );
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));
    registry().with(filter).with(fmt::layer().with_writer(stderr)).init();

    let config = Config::load(&cli.config).map_err(|e| eyre!("{:#}", e))?;
    info!(config = %cli.config.display(), "Loaded configuration");

    let addr = SocketAddr::new(cli.address, cli.port);
    run_server(config, addr).await.map_err(|e| eyre!("{:#}", e))?;

    Ok(())
}
