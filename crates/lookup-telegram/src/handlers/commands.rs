use std::sync::Arc;

use chrono::Utc;
use teloxide::prelude::*;

use lookup_core::{formatting::escape_html, security::RequesterId};

use crate::router::AppState;

use super::lookup::{extract_handle, run_lookup};

const HELP_HTML: &str = "🔎 <b>Handle lookup</b>\n\n\
Send a Telegram username and I will look it up.\n\
Accepted forms: <code>@name</code>, <code>name</code>, <code>t.me/name</code>.\n\n\
<b>Commands</b>\n\
/check &lt;handle&gt; - look up a handle\n\
/status - service status\n\
/help - this message";

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

fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        return format!("{hours}h {mins}m {secs}s");
    }
    if mins > 0 {
        return format!("{mins}m {secs}s");
    }
    format!("{secs}s")
}

async fn status_html(state: &AppState, requester: RequesterId) -> String {
    let uptime = Utc::now()
        .signed_duration_since(state.started_at)
        .num_seconds();
    let (found, failed) = state.stats.snapshot();
    let cfg = state.relay.config();
    let (remaining, limit) = {
        let quota = state.quota.lock().await;
        (quota.remaining(requester), quota.limit())
    };

    let mut lines = vec![
        "📊 <b>Lookup status</b>".to_string(),
        format!("Uptime: {}", format_duration(uptime)),
        format!(
            "Target: <code>{}</code>",
            escape_html(cfg.target_peer.as_str())
        ),
        format!("Identities: {}", state.relay.pool().len()),
        format!(
            "Attempts: {} × {}s",
            cfg.max_attempts,
            cfg.per_attempt_timeout.as_secs()
        ),
        format!("Lookups: {found} found, {failed} failed"),
    ];
    if state.cfg.rate_limit_enabled {
        lines.push(format!(
            "Your quota: {remaining}/{limit} per {}s",
            state.cfg.rate_limit_window.as_secs()
        ));
    }
    lines.join("\n")
}

pub async fn handle_command(
    bot: Bot,
    chat_id: ChatId,
    requester: RequesterId,
    text: &str,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let (cmd, args) = parse_command(text);

    match cmd.as_str() {
        "start" | "help" => {
            let _ = state.replier.send_html(chat_id, HELP_HTML).await;
        }
        "check" | "lookup" => match extract_handle(&args) {
            Some(handle) => return run_lookup(bot, chat_id, requester, handle, state).await,
            None => {
                let _ = state
                    .replier
                    .send_html(chat_id, "Usage: /check &lt;handle&gt;")
                    .await;
            }
        },
        "status" => {
            let html = status_html(&state, requester).await;
            let _ = state.replier.send_html(chat_id, &html).await;
        }
        _ => {
            let _ = state
                .replier
                .send_plain(chat_id, "Unknown command. Try /help.")
                .await;
        }
    }

    Ok(())
}
