mod bot;
mod catalog;
mod config;
mod feed;
mod health;
mod menu;
mod monitor;
mod notifier;
mod platform;
mod scheduler;
mod store;
mod tracker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::BotContext;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::feed::HttpFeedFetcher;
use crate::health::HealthState;
use crate::monitor::Monitor;
use crate::notifier::Notifier;
use crate::platform::telegram::TelegramMessenger;
use crate::scheduler::tasks::register_poll_tasks;
use crate::scheduler::Scheduler;
use crate::store::SubscriptionStore;
use crate::tracker::VersionTracker;

/// Upper bound on waiting for the running poll cycle at shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(120);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,appwatch=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return Err(e);
        }
    };

    let catalog = Arc::new(Catalog::new(config.catalog.clone()));
    info!("Configuration loaded successfully");
    info!("  Catalog: {} apps", catalog.len());
    info!("  Poll interval: {:?}", config.monitor.poll_interval());
    info!("  Prune scope: {:?}", config.monitor.prune_scope);
    info!("  First observation: {:?}", config.monitor.first_observation);

    // validate() guarantees the path is set
    let db_path = config
        .store
        .database_path
        .clone()
        .context("DATABASE_PATH is not configured")?;
    let store = SubscriptionStore::open(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    info!("Subscription store opened at {}", db_path.display());

    let bot = teloxide::Bot::new(&config.telegram.bot_token);
    let messenger = Arc::new(TelegramMessenger::new(bot.clone()));

    let notifier = Notifier::new(
        messenger.clone(),
        store.clone(),
        config.monitor.send_delay(),
        config.monitor.prune_scope,
    );
    let monitor = Arc::new(Monitor::new(
        catalog.clone(),
        Arc::new(HttpFeedFetcher::new()?),
        VersionTracker::new(),
        store.clone(),
        notifier,
        config.monitor.first_observation,
    ));
    let ctx = Arc::new(BotContext::new(
        store.clone(),
        catalog.clone(),
        config.menu.page_size,
        messenger,
    ));

    let cancel = CancellationToken::new();

    // Background polling
    let mut scheduler = Scheduler::new().await?;
    register_poll_tasks(
        &scheduler,
        monitor.clone(),
        cancel.clone(),
        config.monitor.startup_delay(),
        config.monitor.poll_interval(),
    )
    .await?;
    scheduler.start().await?;

    if let Some(port) = config.health.port {
        let state = HealthState {
            monitor: monitor.clone(),
            store: store.clone(),
            catalog_size: catalog.len(),
            bot_token_configured: !config.telegram.bot_token.is_empty(),
            database_configured: config.store.database_path.is_some(),
        };
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = health::serve(port, state, cancel).await {
                error!("Health endpoint stopped: {:#}", e);
            }
        });
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            info!("Shutdown signal received");
            cancel.cancel();
        });
    }

    // Run the Telegram bot
    info!("Bot is starting...");
    let result = platform::telegram::run(bot, ctx, cancel.clone()).await;

    cancel.cancel();
    info!("Waiting for the running poll cycle to finish its current item...");
    if tokio::time::timeout(SHUTDOWN_GRACE, monitor.wait_idle())
        .await
        .is_err()
    {
        warn!("Poll cycle still running after {:?}, exiting anyway", SHUTDOWN_GRACE);
    }
    if let Err(e) = scheduler.shutdown().await {
        error!("{:#}", e);
    }
    info!("Bot stopped");

    result
}
