use std::sync::Arc;

use teloxide::prelude::*;

use catline_core::{
    admin::{help_text, AdminCommand},
    domain::Destination,
};

use crate::{parse_destination, router::AdminState};

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

/// Commands carrying a secret must not be typed into shared chats.
fn needs_private_chat(cmd: &AdminCommand) -> bool {
    matches!(cmd, AdminCommand::Define { .. })
}

/// Refuse section destinations the sink could never deliver to.
fn unsupported_destination(cmd: &AdminCommand) -> Option<String> {
    let AdminCommand::Define { destination, .. } = cmd else {
        return None;
    };
    parse_destination(&Destination(destination.clone()))
        .err()
        .map(|_| {
            format!(
                "Error: unsupported destination {destination:?}, expected a numeric chat id or @channel"
            )
        })
}

pub async fn handle_command(bot: Bot, msg: Message, state: Arc<AdminState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let (name, args) = parse_command(text);

    let reply = match name.as_str() {
        "start" | "help" => help_text(),
        _ => match AdminCommand::parse(&name, &args) {
            None => format!("Unknown command: /{name}\n\n{}", help_text()),
            Some(Err(usage)) => usage,
            Some(Ok(cmd)) if needs_private_chat(&cmd) && !msg.chat.is_private() => {
                "Use this command in a private chat with the bot.".to_string()
            }
            Some(Ok(cmd)) => match unsupported_destination(&cmd) {
                Some(refusal) => refusal,
                None => cmd.execute(&state.sections).await,
            },
        },
    };

    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}
