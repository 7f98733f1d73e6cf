use clap::Parser;

use supernote_sync::client::cli_client::{self, Cli};
use supernote_sync::client::config::ClientConfig;
use supernote_sync::utils::logger;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // .env first so LOG_LEVEL from it applies to the logger
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    logger::init(&log_level);

    let config = ClientConfig::from_env();
    cli_client::run(cli, config).await
}
