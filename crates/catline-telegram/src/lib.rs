//! Telegram adapter (teloxide).
//!
//! Implements the `catline-core` RelaySink over the Telegram Bot API and
//! exposes the section admin commands as bot commands.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{ChatId, Recipient},
};

use tokio::time::sleep;

pub mod handlers;
pub mod router;

pub use teloxide::Bot;

use catline_core::{domain::Destination, errors::Error, sink::port::RelaySink, Result};

/// Telegram rejects messages longer than this (in characters).
pub const MAX_MESSAGE_LEN: usize = 4096;

#[derive(Clone)]
pub struct TelegramSink {
    bot: Bot,
}

impl TelegramSink {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

#[async_trait]
impl RelaySink for TelegramSink {
    async fn emit(&self, destination: &Destination, text: &str) -> Result<()> {
        let recipient = parse_destination(destination)?;
        let text = clip(text, MAX_MESSAGE_LEN);
        self.with_retry(|| self.bot.send_message(recipient.clone(), text.clone()))
            .await?;
        Ok(())
    }
}

/// Map a section destination onto a Telegram chat: a numeric chat id
/// (`-1001234567890`) or a public channel/group username (`@channel`).
pub fn parse_destination(destination: &Destination) -> Result<Recipient> {
    let raw = destination.as_str().trim();
    if let Ok(id) = raw.parse::<i64>() {
        return Ok(Recipient::Id(ChatId(id)));
    }
    if raw.len() > 1 && raw.starts_with('@') && !raw.contains(char::is_whitespace) {
        return Ok(Recipient::ChannelUsername(raw.to_string()));
    }
    Err(Error::External(format!(
        "unsupported telegram destination: {raw:?}"
    )))
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    out.push_str("...");
    out
}
