use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use encodarr_controller::config::ControllerConfig;
use encodarr_controller::controller::Controller;
use encodarr_controller::library::scanner::FsScanner;
use encodarr_controller::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "encodarr-controller")]
#[command(about = "Central controller for a distributed media-transcoding fleet")]
struct Args {
    /// Directory holding the database and runtime state
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,

    /// Directory completed files are written to before import
    #[arg(long, default_value = ".")]
    import_dir: PathBuf,

    /// Port to listen on for the Runner API
    #[arg(long, default_value = "8123")]
    port: u16,

    /// Seconds between health-check sweeps of dispatched jobs
    #[arg(long, default_value = "60")]
    health_check_interval: u64,

    /// Seconds a Runner may stay silent before its job is abandoned
    #[arg(long, default_value = "3600")]
    health_check_timeout: u64,

    /// Minutes between filesystem scans of newly registered libraries
    #[arg(long, default_value = "30")]
    fs_check_interval: u64,

    /// Library folder to scan for transcoding candidates (repeatable)
    #[arg(long = "library")]
    libraries: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;

    let config = ControllerConfig {
        config_dir: args.config_dir,
        import_dir: args.import_dir,
        listen_addr,
        health_check_interval: Duration::from_secs(args.health_check_interval),
        health_check_timeout: Duration::from_secs(args.health_check_timeout),
        fs_check_interval: Duration::from_secs(args.fs_check_interval * 60),
        libraries: args.libraries,
    };

    tracing::info!(
        config_dir = %config.config_dir.display(),
        listen_addr = %config.listen_addr,
        libraries = config.libraries.len(),
        "Starting encodarr controller"
    );

    let controller = Controller::new(config, Arc::new(FsScanner)).await?;
    let shutdown = install_shutdown_handler();
    controller.run(shutdown).await?;

    tracing::info!("Controller stopped");
    Ok(())
}
