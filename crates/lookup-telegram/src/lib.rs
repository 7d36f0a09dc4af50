//! Telegram front end (teloxide).
//!
//! A Bot API bot that takes handles from allow-listed users, runs them
//! through the `lookup-core` relay and answers with the parsed record.
//! The relay itself talks to the third-party bot through user sessions;
//! this crate only faces the people asking.

use teloxide::{prelude::*, types::ParseMode};

use tokio::time::sleep;

pub mod handlers;
pub mod router;

use lookup_core::{errors::Error, Result};

/// Sends HTML replies, retrying once when Telegram asks us to back off.
#[derive(Clone)]
pub struct Replier {
    bot: Bot,
    safe_limit: usize,
}

impl Replier {
    pub fn new(bot: Bot, safe_limit: usize) -> Self {
        Self {
            bot,
            safe_limit: safe_limit.max(200),
        }
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

    /// Long replies are split on line boundaries.
    pub async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<()> {
        for chunk in split_lines(html, self.safe_limit) {
            self.with_retry(|| {
                self.bot
                    .send_message(chat_id, chunk.clone())
                    .parse_mode(ParseMode::Html)
            })
            .await?;
        }
        Ok(())
    }

    pub async fn send_plain(&self, chat_id: ChatId, text: &str) -> Result<()> {
        self.with_retry(|| self.bot.send_message(chat_id, text.to_string()))
            .await?;
        Ok(())
    }
}

/// Splits at newlines so every chunk stays under `limit` bytes.
///
/// Our HTML closes every tag on the line that opens it, so line boundaries
/// are always safe cut points. A single line longer than `limit` is cut on a
/// char boundary as a last resort.
fn split_lines(text: &str, limit: usize) -> Vec<String> {
    if text.len() <= limit {
        return vec![text.to_string()];
    }

    let mut out = Vec::new();
    let mut chunk = String::new();
    for line in text.split('\n') {
        let needed = if chunk.is_empty() {
            line.len()
        } else {
            chunk.len() + 1 + line.len()
        };
        if needed > limit && !chunk.is_empty() {
            out.push(std::mem::take(&mut chunk));
        }

        let mut rest = line;
        while rest.len() > limit {
            let mut cut = limit;
            while !rest.is_char_boundary(cut) {
                cut -= 1;
            }
            out.push(rest[..cut].to_string());
            rest = &rest[cut..];
        }

        if !chunk.is_empty() {
            chunk.push('\n');
        }
        chunk.push_str(rest);
    }
    if !chunk.is_empty() {
        out.push(chunk);
    }
    out
}
