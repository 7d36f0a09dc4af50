use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use chrono::{DateTime, Utc};
use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tokio::sync::Mutex;
use tracing::{info, warn};

use lookup_core::{config::Config, security::LookupQuota, Relay};

use crate::handlers;
use crate::Replier;

#[derive(Default)]
pub struct LookupStats {
    found: AtomicU64,
    failed: AtomicU64,
}

impl LookupStats {
    pub fn record(&self, found: bool) {
        let counter = if found { &self.found } else { &self.failed };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// `(found, failed)`.
    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.found.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
        )
    }
}

pub struct AppState {
    pub cfg: Arc<Config>,
    pub relay: Arc<Relay>,
    pub replier: Replier,
    pub quota: Arc<Mutex<LookupQuota>>,
    pub stats: LookupStats,
    pub started_at: DateTime<Utc>,
}

pub async fn run_polling(cfg: Arc<Config>, relay: Arc<Relay>) -> anyhow::Result<()> {
    let token = cfg.telegram_front_end()?;
    let bot = Bot::new(token);

    match bot.get_me().await {
        Ok(me) => info!(bot = %me.username(), "lookup bot started"),
        Err(e) => warn!(error = %e, "getMe failed; continuing"),
    }
    info!(
        allowed_users = cfg.telegram_allowed_users.len(),
        identities = relay.pool().len(),
        target = %relay.config().target_peer,
        "front end ready"
    );

    let state = Arc::new(AppState {
        cfg: cfg.clone(),
        relay,
        replier: Replier::new(bot.clone(), cfg.telegram_safe_limit),
        quota: Arc::new(Mutex::new(LookupQuota::new(
            cfg.rate_limit_enabled,
            cfg.rate_limit_requests,
            cfg.rate_limit_window,
        ))),
        stats: LookupStats::default(),
        started_at: Utc::now(),
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}
