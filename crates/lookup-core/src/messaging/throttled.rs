use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::PeerId,
    messaging::{
        port::RelaySession,
        types::{Message, MessageHandle},
    },
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between any two calls made through one session.
    pub global_min_interval: Duration,
    /// Minimum spacing between sends to the same peer.
    pub per_peer_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40),
            per_peer_min_interval: Duration::from_millis(1050),
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            next: now,
        }
    }

    /// Reserve the next slot and return how long the caller must wait for it.
    fn reserve_at(&mut self, now: Instant) -> Duration {
        let start = self.next.max(now);
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// Session decorator that spaces out upstream calls of one identity.
///
/// History polls only pay the global interval; sends additionally pay the
/// per-peer interval. This reduces flood waits but cannot rule them out, so the
/// relay still handles [`Error::RateLimited`](crate::Error::RateLimited).
pub struct ThrottledSession {
    inner: Arc<dyn RelaySession>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_peer: Mutex<HashMap<PeerId, IntervalLimiter>>,
}

impl ThrottledSession {
    pub fn new(inner: Arc<dyn RelaySession>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval, Instant::now())),
            per_peer: Mutex::new(HashMap::new()),
        }
    }

    async fn throttle_send(&self, peer: &PeerId) {
        let now = Instant::now();
        let global_wait = self.global.lock().await.reserve_at(now);
        let peer_wait = {
            let mut map = self.per_peer.lock().await;
            map.entry(peer.clone())
                .or_insert_with(|| IntervalLimiter::new(self.cfg.per_peer_min_interval, now))
                .reserve_at(now)
        };

        let wait = global_wait.max(peer_wait);
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }

    async fn throttle_global(&self) {
        let wait = self.global.lock().await.reserve_at(Instant::now());
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl RelaySession for ThrottledSession {
    fn label(&self) -> &str {
        self.inner.label()
    }

    async fn send(&self, peer: &PeerId, text: &str) -> Result<MessageHandle> {
        self.throttle_send(peer).await;
        self.inner.send(peer, text).await
    }

    async fn recent_messages(&self, peer: &PeerId, limit: usize) -> Result<Vec<Message>> {
        self.throttle_global().await;
        self.inner.recent_messages(peer, limit).await
    }
}
