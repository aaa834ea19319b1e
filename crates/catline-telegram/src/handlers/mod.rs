//! Telegram update handlers.
//!
//! Only admin users may talk to the bot; everything they send that looks
//! like a command is routed to the section admin commands.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use crate::router::AdminState;

mod commands;

pub fn is_authorized(user_id: Option<i64>, admins: &[i64]) -> bool {
    let Some(user_id) = user_id else {
        return false;
    };
    admins.contains(&user_id)
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AdminState>) -> ResponseResult<()> {
    let user_id = msg.from().map(|u| u.id.0 as i64);

    if !is_authorized(user_id, &state.cfg.telegram_admin_users) {
        tracing::debug!(?user_id, "ignoring message from non-admin user");
        if msg.chat.is_private() {
            let _ = bot
                .send_message(msg.chat.id, "Unauthorized. Contact the bot owner for access.")
                .await;
        }
        return Ok(());
    }

    match msg.text() {
        Some(text) if text.starts_with('/') => commands::handle_command(bot, msg, state).await,
        _ => Ok(()),
    }
}
