use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use truckline::bot::{self, Router, TelegramMessenger};
use truckline::config::{AppConfig, StoreBackend};
use truckline::db::{MemoryStore, PostgresStore, Store};
use truckline::localization::init_localization;
use truckline::publishing::{DisabledPublisher, GuardedPublisher, HttpPublisher, Publisher};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json");

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    init_tracing();

    info!("Starting Truckline Telegram Bot");

    let config = AppConfig::from_env()?;
    init_localization(&config.default_language)?;

    let store: Arc<dyn Store> = match &config.store {
        StoreBackend::Postgres(url) => {
            info!("Connecting to PostgreSQL");
            Arc::new(PostgresStore::connect(url).await?)
        }
        StoreBackend::Memory => {
            warn!("DATABASE_URL is not set, using the in-memory demo store; state is lost on restart");
            Arc::new(MemoryStore::demo())
        }
    };

    let publisher: Arc<dyn Publisher> = match &config.publish {
        Some(publish) => Arc::new(GuardedPublisher::new(
            HttpPublisher::new(publish),
            config.recovery.clone(),
        )),
        None => {
            info!("PUBLISH_API_URL is not set, listing publication is disabled");
            Arc::new(DisabledPublisher)
        }
    };

    let bot_token = config
        .bot_token
        .clone()
        .context("TELEGRAM_BOT_TOKEN must be set")?;
    let bot = Bot::new(bot_token);

    let messenger = Arc::new(TelegramMessenger::new(bot.clone()));
    let router = Arc::new(Router::new(store, messenger, publisher, &config));

    info!(page_size = config.page_size, "Bot initialized, starting dispatcher");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint({
            let router = Arc::clone(&router);
            move |msg: Message| {
                let router = Arc::clone(&router);
                async move { bot::message_handler(msg, router).await }
            }
        }))
        .branch(Update::filter_callback_query().endpoint({
            let router = Arc::clone(&router);
            move |bot: Bot, q: CallbackQuery| {
                let router = Arc::clone(&router);
                async move { bot::callback_handler(bot, q, router).await }
            }
        }));

    Dispatcher::builder(bot, handler)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
