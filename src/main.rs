//! psychotropic-bot — entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Init logger at the configured level
//!   4. Build provider → cache → render engine → dispatcher
//!   5. Spawn the console channel and the bot loop
//!   6. Run until Ctrl-C or stdin closes

use std::env;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use psychotropic::bot::{Bot, BotComponent};
use psychotropic::config;
use psychotropic::dispatch::Dispatcher;
use psychotropic::error::AppError;
use psychotropic::logger;
use psychotropic::lookup::{SubjectCache, SubjectSource, bundled::BundledProvider, pnwiki::PnWikiProvider};
use psychotropic::render::RenderEngine;
use psychotropic::runtime::{self, Component};
use psychotropic::transports::console::{ConsoleChannel, ConsoleSink};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present — ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let config = config::load()?;
    logger::init(&config.log_level)?;

    info!(
        bot_name = %config.bot_name,
        work_dir = %config.work_dir.display(),
        log_level = %config.log_level,
        "config loaded"
    );

    // `PSYCHOTROPIC_OFFLINE=1` selects the built-in table — demos and
    // development without network access.
    let source = if env::var("PSYCHOTROPIC_OFFLINE").as_deref() == Ok("1") {
        info!("offline mode — using bundled substance table");
        SubjectSource::Bundled(BundledProvider)
    } else {
        SubjectSource::PnWiki(
            PnWikiProvider::new(&config.upstream)
                .map_err(|e| AppError::Config(format!("upstream client: {e}")))?,
        )
    };

    let cache = SubjectCache::new(source, config.cache.capacity, config.cache.ttl);
    let engine = RenderEngine::new(&config.render)
        .map_err(|e| AppError::Config(format!("render engine: {e}")))?;
    let sink = ConsoleSink::new(config.work_dir.clone());
    let dispatcher = Dispatcher::new(sink, &config.dispatch);
    let bot = Bot::new(config.command_prefix.clone(), cache, engine, dispatcher);

    let (events_tx, events_rx) = mpsc::channel(32);
    let shutdown = CancellationToken::new();

    let components: Vec<Box<dyn Component>> = vec![
        Box::new(ConsoleChannel::new("console0", events_tx)),
        Box::new(BotComponent::new(bot, events_rx)),
    ];
    let handle = runtime::spawn_components(components, shutdown.clone());

    // Ctrl-C cancels the shared token; components stop cooperatively.
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received — shutting down");
            signal_shutdown.cancel();
        }
    });

    handle.join().await
}
