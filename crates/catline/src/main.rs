use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use catline_core::{
    blacklist::Blacklist,
    config::Config,
    handler::RelayState,
    listener::Listener,
    sections::{JsonFileStore, SectionRegistry},
    sink::{
        port::RelaySink,
        throttled::{ThrottleConfig, ThrottledSink},
    },
};
use catline_telegram::{router, Bot, TelegramSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    catline_core::logging::init("catline")?;

    let cfg = Arc::new(Config::load()?);
    cfg.require_telegram()?;

    let registry = SectionRegistry::load(Box::new(JsonFileStore::new(&cfg.sections_file)))?;
    tracing::info!(
        sections = registry.len(),
        file = %cfg.sections_file.display(),
        "section registry loaded"
    );
    let sections = registry.into_shared();

    let bot = Bot::new(cfg.telegram_bot_token.clone());

    // Space out sends so relayed bursts do not trip Telegram flood limits.
    let raw_sink: Arc<dyn RelaySink> = Arc::new(TelegramSink::new(bot.clone()));
    let sink: Arc<dyn RelaySink> =
        Arc::new(ThrottledSink::new(raw_sink, ThrottleConfig::default()));

    let state = RelayState {
        sections: sections.clone(),
        blacklist: Arc::new(Mutex::new(Blacklist::new(cfg.fail_max, cfg.block_time))),
        sink,
        limits: cfg.as_ref().into(),
    };

    let listener = Listener::bind(cfg.listen_addr(), state, cfg.as_ref().into()).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening for relay clients");

    let shutdown = CancellationToken::new();
    let relay = tokio::spawn(listener.run(shutdown.clone()));
    let admin = tokio::spawn(router::run_polling(bot, cfg.clone(), sections));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");

    shutdown.cancel();
    relay.await??;
    admin.abort();

    Ok(())
}
