use clap::Parser;
use pyrelay::cli::Cli;
use pyrelay::config::Config;
use pyrelay::server::{self, AppState};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(all(feature = "performance-allocator", target_os = "windows"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[cfg(all(feature = "performance-allocator", not(target_os = "windows")))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_cli(&cli)?;
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(serve(config))
}

async fn serve(config: Config) -> color_eyre::Result<()> {
    let cache = config.build_cache()?;

    // Warm the project listings so the first installer request is cheap.
    if let Err(err) = cache.list_projects().await {
        warn!("initial project listing failed: {err}");
    }

    let state = Arc::new(AppState {
        cache,
        binary_file_mime_type: config.binary_file_mime_type,
    });
    server::start_server(state, &config.host, config.port).await?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
