use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use catline_core::{config::Config, sections::SharedRegistry};

use crate::handlers;

#[derive(Clone)]
pub struct AdminState {
    pub cfg: Arc<Config>,
    pub sections: SharedRegistry,
}

/// Serve admin commands until the task is cancelled.
pub async fn run_polling(
    bot: Bot,
    cfg: Arc<Config>,
    sections: SharedRegistry,
) -> anyhow::Result<()> {
    match bot.get_me().await {
        Ok(me) => tracing::info!(bot = %me.username(), "telegram admin bot started"),
        Err(e) => tracing::warn!("telegram get_me failed: {e}"),
    }
    tracing::info!(admins = cfg.telegram_admin_users.len(), "admin users configured");

    let state = Arc::new(AdminState { cfg, sections });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}
