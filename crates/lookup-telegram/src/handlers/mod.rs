//! Telegram update handlers.
//!
//! Every message passes the allow-list first. Commands go to `commands`;
//! any other text is treated as a handle to look up.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};
use tracing::{debug, warn};

use lookup_core::security::{is_authorized, RequesterId};

use crate::router::AppState;

mod commands;
mod lookup;

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let requester = msg.from().map(|u| RequesterId(u.id.0 as i64));

    if !is_authorized(requester, &state.cfg.telegram_allowed_users) {
        warn!(requester = ?requester, chat = msg.chat.id.0, "unauthorized request");
        let _ = state
            .replier
            .send_plain(msg.chat.id, "Unauthorized. Contact the bot owner for access.")
            .await;
        return Ok(());
    }
    let Some(requester) = requester else {
        return Ok(());
    };

    let Some(text) = msg.text() else {
        debug!(chat = msg.chat.id.0, "ignoring non-text message");
        let _ = state
            .replier
            .send_plain(msg.chat.id, "Send a username, e.g. @durov or t.me/durov.")
            .await;
        return Ok(());
    };

    if text.starts_with('/') {
        return commands::handle_command(bot, msg.chat.id, requester, text, state).await;
    }

    let Some(handle) = lookup::extract_handle(text) else {
        return Ok(());
    };
    lookup::run_lookup(bot, msg.chat.id, requester, handle, state).await
}
