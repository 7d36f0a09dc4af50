use std::sync::Arc;

use teloxide::{prelude::*, types::ChatAction};
use tracing::{info, warn};

use lookup_core::{
    domain::normalize_handle,
    formatting::{format_failure_html, format_record_html},
    security::RequesterId,
    ParsedRecord, ResolveError,
};

use crate::router::AppState;

/// Pull a handle out of free text: `@alice`, `alice`, `t.me/alice` or a
/// full `https://t.me/alice` link. Only the first word counts.
pub(super) fn extract_handle(text: &str) -> Option<String> {
    let word = text.split_whitespace().next()?;
    let mut rest = word;
    for scheme in ["https://", "http://"] {
        if let Some(r) = rest.strip_prefix(scheme) {
            rest = r;
            break;
        }
    }
    for host in ["t.me/", "telegram.me/"] {
        if let Some(r) = rest.strip_prefix(host) {
            rest = r;
            break;
        }
    }
    let handle = rest.trim_end_matches('/');
    if handle.is_empty() {
        return None;
    }
    Some(handle.to_string())
}

async fn resolve(state: &AppState, handle: &str) -> Result<ParsedRecord, ResolveError> {
    match state.cfg.request_timeout {
        Some(limit) => state.relay.resolve_within(handle, limit).await,
        None => state.relay.resolve(handle).await,
    }
}

pub(super) async fn run_lookup(
    bot: Bot,
    chat_id: ChatId,
    requester: RequesterId,
    handle: String,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    {
        let mut quota = state.quota.lock().await;
        if let Err(retry_after) = quota.try_acquire(requester) {
            let secs = retry_after.as_secs_f64();
            warn!(requester = requester.0, retry_after_s = secs, "front end rate limit hit");
            let _ = state
                .replier
                .send_plain(chat_id, &format!("⏳ Rate limited. Please wait {secs:.1}s."))
                .await;
            return Ok(());
        }
    }

    info!(requester = requester.0, handle = %handle, "lookup requested");

    // Typing loop (best-effort); a lookup can take a minute or more.
    let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel::<()>();
    let bot_for_typing = bot.clone();
    let typing_task = tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(4));
        loop {
            tokio::select! {
              _ = tick.tick() => {
                let _ = bot_for_typing.send_chat_action(chat_id, ChatAction::Typing).await;
              }
              _ = &mut stop_rx => break,
            }
        }
    });

    let result = resolve(&state, &handle).await;

    let _ = stop_tx.send(());
    let _ = typing_task.await;

    state.stats.record(result.is_ok());
    let shown = normalize_handle(&handle);
    let html = match &result {
        Ok(rec) => format_record_html(&shown, rec),
        Err(e) => format_failure_html(&shown, e),
    };
    if let Err(e) = state.replier.send_html(chat_id, &html).await {
        warn!(error = %e, "failed to deliver lookup result");
    }

    Ok(())
}
