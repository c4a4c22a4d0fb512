pub mod commands;
pub mod error;
pub mod models;
pub mod modules;
pub mod proxy; // Gateway module
pub mod utils;

#[cfg(test)]
mod test_support;

use clap::Parser;
use modules::logger;

/// Binary entry point
pub async fn run() -> anyhow::Result<()> {
    // Initialize logger
    logger::init_logger();

    let cli = commands::Cli::parse();
    commands::run(cli).await.inspect_err(|e| {
        tracing::error!("{:#}", e);
    })
}
