use clap::Parser;
use recq::{
    app::config::Config,
    cli::{self, Cli},
};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() {
    // Parse CLI arguments first to get verbose flag
    let cli = Cli::parse();

    // Set config directory override if --config flag was used
    if let Some(ref config_dir) = cli.config {
        recq::util::paths::set_config_dir_override(Some(config_dir.clone()));
    }

    // Load before logging is up so the configured level applies
    let config = Config::load();

    // Get logs directory (creates if needed)
    let logs_dir = recq::util::paths::get_logs_dir().unwrap_or_else(|_| PathBuf::from("."));
    std::fs::create_dir_all(&logs_dir).ok();

    // Set up daily rotating file appender
    let file_appender = tracing_appender::rolling::daily(&logs_dir, "recq.jsonl");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let log_level = if cli.verbose {
        tracing::Level::TRACE
    } else {
        config
            .as_ref()
            .ok()
            .and_then(Config::log_level)
            .unwrap_or(tracing::Level::INFO)
    };

    // Initialize logging with JSON format for structured logs
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(tracing_subscriber::filter::LevelFilter::from_level(
                    log_level,
                )),
        )
        .init();

    tracing::info!("Starting recq {}", env!("CARGO_PKG_VERSION"));
    if let Some(ref config_dir) = cli.config {
        tracing::info!("Using config directory override: {:?}", config_dir);
    }
    match &config {
        Ok(config) => tracing::debug!("Config loaded: {:?}", config),
        Err(e) => tracing::error!("Failed to load config: {:#}", e),
    }
    tracing::trace!("CLI arguments: {:?}", cli);

    let exit_code = cli::handler::handle_command(cli.command, config).await;

    // Flush buffered log lines before exiting
    drop(guard);
    std::process::exit(exit_code);
}
