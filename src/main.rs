use anyhow::Context;
use rental_scout::config::Config;
use rental_scout::dispatch::Dispatcher;
use rental_scout::monitor::Monitor;
use rental_scout::scrapers::{all_scrapers, PageClient};
use rental_scout::store::Database;
use rental_scout::telegram::TelegramSink;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        "🏠 Rental Scout starting: checking every {:?}, sources: {:?}",
        config.check_interval, config.default_sources
    );

    let db = Database::open(&config.db_path).context("Failed to open database")?;

    let client = Arc::new(PageClient::new()?);
    let scrapers = all_scrapers(client);

    let sink = TelegramSink::new(&config.bot_token)?;
    let dispatcher = Dispatcher::new(Box::new(sink));

    let monitor = Monitor::new(db, scrapers, dispatcher, config);

    // The health handle would be wired into the dashboard server here;
    // the monitoring loop runs until the process is stopped.
    monitor.run().await
}
