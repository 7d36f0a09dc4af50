use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

/// Numeric id of whoever asked a front end for a lookup (a Telegram user id).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequesterId(pub i64);

/// An empty allow-list authorizes nobody.
pub fn is_authorized(requester: Option<RequesterId>, allowed: &[i64]) -> bool {
    let Some(requester) = requester else {
        return false;
    };
    allowed.contains(&requester.0)
}

/// At most `limit` lookups per requester in any sliding `window`.
///
/// Every lookup holds a shared upstream identity for up to a few minutes, so
/// the front end charges the quota before calling into the relay.
#[derive(Clone, Debug)]
pub struct LookupQuota {
    enabled: bool,
    limit: usize,
    window: Duration,
    recent: HashMap<RequesterId, VecDeque<Instant>>,
}

impl LookupQuota {
    pub fn new(enabled: bool, limit: u32, window: Duration) -> Self {
        Self {
            enabled,
            limit: limit as usize,
            window,
            recent: HashMap::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Charges one lookup, or returns how long until the next one is allowed.
    pub fn try_acquire(&mut self, requester: RequesterId) -> Result<(), Duration> {
        self.try_acquire_at(requester, Instant::now())
    }

    pub fn try_acquire_at(&mut self, requester: RequesterId, now: Instant) -> Result<(), Duration> {
        if !self.enabled {
            return Ok(());
        }

        let window = self.window;
        let stamps = self.recent.entry(requester).or_default();
        while stamps
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= window)
        {
            stamps.pop_front();
        }

        if stamps.len() < self.limit {
            stamps.push_back(now);
            return Ok(());
        }
        let wait = stamps
            .front()
            .map(|oldest| window.saturating_sub(now.saturating_duration_since(*oldest)))
            .unwrap_or(window);
        Err(wait)
    }

    pub fn remaining(&self, requester: RequesterId) -> usize {
        self.remaining_at(requester, Instant::now())
    }

    pub fn remaining_at(&self, requester: RequesterId, now: Instant) -> usize {
        let used = self.recent.get(&requester).map_or(0, |stamps| {
            stamps
                .iter()
                .filter(|t| now.saturating_duration_since(**t) < self.window)
                .count()
        });
        self.limit.saturating_sub(used)
    }
}
