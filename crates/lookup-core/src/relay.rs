//! Send/poll/correlate engine.
//!
//! The upstream bot has no request ids: we send `t.me/<handle>` into the
//! conversation and treat the first later, foreign, non-empty message as the
//! answer. Every attempt borrows a freshly rotated identity from the pool.
//!
//! Known limitation: only the newest `reply_scan_depth` messages are scanned.
//! If unrelated traffic pushes the real reply out of that window before a poll
//! sees it, the attempt times out.

use std::{sync::Arc, time::Duration};

use tracing::{debug, info, trace, warn};

use crate::{
    backoff::{BackoffConfig, BackoffController},
    clock::{Clock, TokioClock},
    domain::{PeerId, Query},
    errors::Error,
    messaging::types::{Message, MessageHandle},
    parser::ReplyParser,
    pool::{Identity, IdentityPool},
    record::{FailureKind, ParsedRecord, ResolveError},
    Result,
};

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub target_peer: PeerId,
    /// Prepended to the normalized handle to form the query text.
    pub link_prefix: String,
    pub max_attempts: u32,
    pub per_attempt_timeout: Duration,
    pub poll_interval: Duration,
    /// How many of the newest messages each poll inspects.
    pub reply_scan_depth: usize,
    pub backoff: BackoffConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            target_peer: PeerId::new("@telebrecheddb_bot"),
            link_prefix: "t.me/".to_string(),
            max_attempts: 3,
            per_attempt_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(2),
            reply_scan_depth: 5,
            backoff: BackoffConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.target_peer.as_str().trim().is_empty() {
            return Err(Error::Config("target peer must not be empty".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        if self.reply_scan_depth == 0 {
            return Err(Error::Config(
                "reply_scan_depth must be at least 1".to_string(),
            ));
        }
        if self.per_attempt_timeout.is_zero() || self.poll_interval.is_zero() {
            return Err(Error::Config(
                "per_attempt_timeout and poll_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of one send/poll attempt. Consumed immediately by the retry loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    Matched(String),
    TimedOut,
    RateLimited(Duration),
    Failed(String),
}

impl AttemptOutcome {
    fn from_error(err: Error) -> Self {
        match err {
            Error::RateLimited(wait) => Self::RateLimited(wait),
            other => Self::Failed(other.to_string()),
        }
    }
}

/// Relay states, reported in trace events as a resolution progresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Sending,
    Polling,
    Matched,
    RateLimited,
    TimedOut,
    Failed,
    Exhausted,
}

impl From<&AttemptOutcome> for RelayState {
    fn from(outcome: &AttemptOutcome) -> Self {
        match outcome {
            AttemptOutcome::Matched(_) => Self::Matched,
            AttemptOutcome::TimedOut => Self::TimedOut,
            AttemptOutcome::RateLimited(_) => Self::RateLimited,
            AttemptOutcome::Failed(_) => Self::Failed,
        }
    }
}

/// First message in `history` (as ordered by the session) that answers `baseline`.
pub fn find_reply<'a>(history: &'a [Message], baseline: &MessageHandle) -> Option<&'a Message> {
    history.iter().find(|m| m.replies_to(baseline))
}

pub struct Relay<C: Clock = TokioClock> {
    pool: Arc<IdentityPool>,
    cfg: RelayConfig,
    parser: ReplyParser,
    backoff: BackoffController,
    clock: C,
}

impl Relay<TokioClock> {
    pub fn new(pool: Arc<IdentityPool>, cfg: RelayConfig, parser: ReplyParser) -> Result<Self> {
        Self::with_clock(pool, cfg, parser, TokioClock)
    }
}

impl<C: Clock> Relay<C> {
    /// Refuses to build over an empty pool: with no identities every request
    /// would fail, so the system reports itself not ready instead.
    pub fn with_clock(
        pool: Arc<IdentityPool>,
        cfg: RelayConfig,
        parser: ReplyParser,
        clock: C,
    ) -> Result<Self> {
        if pool.is_empty() {
            return Err(Error::NoIdentities);
        }
        cfg.validate()?;
        Ok(Self {
            pool,
            backoff: BackoffController::new(cfg.backoff),
            cfg,
            parser,
            clock,
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.cfg
    }

    pub fn pool(&self) -> &IdentityPool {
        &self.pool
    }

    /// Resolve a handle, bounded by `limit` overall.
    ///
    /// On expiry the in-flight resolution future is dropped; the poll loop
    /// holds no resources beyond its borrowed session, so nothing leaks.
    pub async fn resolve_within(
        &self,
        handle: &str,
        limit: Duration,
    ) -> std::result::Result<ParsedRecord, ResolveError> {
        match tokio::time::timeout(limit, self.resolve(handle)).await {
            Ok(res) => res,
            Err(_) => {
                warn!(handle, limit_ms = limit.as_millis() as u64, "resolution abandoned");
                Err(ResolveError::new(
                    FailureKind::Cancelled,
                    format!("no result within {}s", limit.as_secs()),
                ))
            }
        }
    }

    pub async fn resolve(&self, handle: &str) -> std::result::Result<ParsedRecord, ResolveError> {
        let query = Query::new(handle)
            .map_err(|e| ResolveError::new(FailureKind::InvalidHandle, e.to_string()))?;
        let payload = query.payload(&self.cfg.link_prefix);
        let max = self.cfg.max_attempts.max(1);

        debug!(handle = %query.normalized_handle, state = ?RelayState::Idle, "resolution started");

        let mut failure = ResolveError::new(FailureKind::NoReply, "No reply from bot");
        for attempt in 1..=max {
            let identity = self
                .pool
                .acquire()
                .map_err(|e| ResolveError::new(FailureKind::NoIdentities, e.to_string()))?;

            let outcome = self.attempt(&identity, &payload).await;
            debug!(
                handle = %query.normalized_handle,
                attempt,
                identity = identity.label(),
                state = ?RelayState::from(&outcome),
                "attempt finished"
            );

            let pause = match outcome {
                AttemptOutcome::Matched(text) => {
                    info!(handle = %query.normalized_handle, attempt, "reply matched");
                    return Ok(self.parser.parse(&text));
                }
                AttemptOutcome::RateLimited(wait) => {
                    warn!(
                        identity = identity.label(),
                        wait_s = wait.as_secs(),
                        "upstream rate limit"
                    );
                    failure = ResolveError::new(
                        FailureKind::RelayFailure,
                        format!("rate limited by upstream (retry after {}s)", wait.as_secs()),
                    );
                    self.backoff.decide(wait)
                }
                AttemptOutcome::TimedOut => {
                    failure = ResolveError::new(FailureKind::NoReply, "No reply from bot");
                    self.backoff.retry_pause()
                }
                AttemptOutcome::Failed(reason) => {
                    warn!(identity = identity.label(), %reason, "attempt failed");
                    failure = ResolveError::new(FailureKind::RelayFailure, reason);
                    self.backoff.retry_pause()
                }
            };

            if attempt < max && !pause.is_zero() {
                self.clock.sleep(pause).await;
            }
        }

        info!(
            handle = %query.normalized_handle,
            attempts = max,
            state = ?RelayState::Exhausted,
            kind = ?failure.kind,
            "resolution exhausted"
        );
        Err(failure)
    }

    async fn attempt(&self, identity: &Identity, payload: &str) -> AttemptOutcome {
        let peer = &self.cfg.target_peer;

        trace!(identity = identity.label(), state = ?RelayState::Sending, %peer, "sending query");
        let baseline = match identity.session.send(peer, payload).await {
            Ok(handle) => handle,
            Err(e) => return AttemptOutcome::from_error(e),
        };
        trace!(
            identity = identity.label(),
            state = ?RelayState::Polling,
            baseline = baseline.sequence_id.0,
            "polling for reply"
        );

        let deadline = self.clock.now() + self.cfg.per_attempt_timeout;
        loop {
            let history = match identity
                .session
                .recent_messages(peer, self.cfg.reply_scan_depth)
                .await
            {
                Ok(h) => h,
                Err(e) => return AttemptOutcome::from_error(e),
            };

            if let Some(reply) = find_reply(&history, &baseline) {
                return AttemptOutcome::Matched(reply.text.clone());
            }

            let now = self.clock.now();
            if now >= deadline {
                return AttemptOutcome::TimedOut;
            }
            let nap = self.cfg.poll_interval.min(deadline - now);
            self.clock.sleep(nap).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        domain::SequenceId,
        messaging::port::RelaySession,
        record::HistoryEntry,
    };
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Script {
        /// Errors returned by the next sends, in order.
        send_failures: VecDeque<Error>,
        /// Bot reply posted once this many polls have happened since the last send.
        reply: Option<(usize, String)>,
        /// Own messages appended right after the reply (another caller's queries).
        own_noise_after_reply: usize,
        /// Error returned by the first history fetch after the Nth successful send.
        fetch_failures: HashMap<usize, Error>,
    }

    #[derive(Default)]
    struct FakeState {
        script: Script,
        history: Vec<Message>,
        next_id: i64,
        polls_since_send: usize,
        replied: bool,
        send_times: Vec<Duration>,
        sent: Vec<String>,
    }

    impl FakeState {
        fn push(&mut self, own: bool, text: &str) -> MessageHandle {
            self.next_id += 1;
            let m = Message {
                sequence_id: SequenceId(self.next_id),
                is_self_originated: own,
                text: text.to_string(),
            };
            let handle = m.handle();
            self.history.push(m);
            handle
        }
    }

    struct FakeSession {
        label: String,
        clock: ManualClock,
        st: Mutex<FakeState>,
    }

    impl FakeSession {
        fn new(label: &str, clock: &ManualClock, script: Script) -> Arc<Self> {
            Arc::new(Self {
                label: label.to_string(),
                clock: clock.clone(),
                st: Mutex::new(FakeState {
                    script,
                    ..FakeState::default()
                }),
            })
        }

        fn seed(&self, own: bool, text: &str) {
            self.st.lock().unwrap().push(own, text);
        }

        fn send_times(&self) -> Vec<Duration> {
            self.st.lock().unwrap().send_times.clone()
        }

        fn sent(&self) -> Vec<String> {
            self.st.lock().unwrap().sent.clone()
        }
    }

    #[async_trait]
    impl RelaySession for FakeSession {
        fn label(&self) -> &str {
            &self.label
        }

        async fn send(&self, _peer: &PeerId, text: &str) -> Result<MessageHandle> {
            let mut st = self.st.lock().unwrap();
            st.send_times.push(self.clock.elapsed());
            if let Some(e) = st.script.send_failures.pop_front() {
                return Err(e);
            }
            st.sent.push(text.to_string());
            st.polls_since_send = 0;
            st.replied = false;
            Ok(st.push(true, text))
        }

        async fn recent_messages(&self, _peer: &PeerId, limit: usize) -> Result<Vec<Message>> {
            let mut st = self.st.lock().unwrap();
            st.polls_since_send += 1;
            let sends = st.sent.len();
            if let Some(e) = st.script.fetch_failures.remove(&sends) {
                return Err(e);
            }
            if let Some((after, text)) = st.script.reply.clone() {
                if !st.replied && st.polls_since_send >= after {
                    st.replied = true;
                    st.push(false, &text);
                    for i in 0..st.script.own_noise_after_reply {
                        st.push(true, &format!("t.me/other{i}"));
                    }
                }
            }
            Ok(st.history.iter().rev().take(limit).cloned().collect())
        }
    }

    /// Never answers a history fetch.
    struct Stalled;

    #[async_trait]
    impl RelaySession for Stalled {
        fn label(&self) -> &str {
            "stalled"
        }

        async fn send(&self, _peer: &PeerId, _text: &str) -> Result<MessageHandle> {
            Ok(MessageHandle {
                sequence_id: SequenceId(1),
                is_self_originated: true,
            })
        }

        async fn recent_messages(&self, _peer: &PeerId, _limit: usize) -> Result<Vec<Message>> {
            std::future::pending().await
        }
    }

    fn cfg() -> RelayConfig {
        RelayConfig {
            max_attempts: 3,
            per_attempt_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(2),
            reply_scan_depth: 5,
            ..RelayConfig::default()
        }
    }

    fn relay(
        sessions: Vec<Arc<dyn RelaySession>>,
        cfg: RelayConfig,
        clock: &ManualClock,
    ) -> Relay<ManualClock> {
        Relay::with_clock(
            Arc::new(IdentityPool::new(sessions)),
            cfg,
            ReplyParser::default(),
            clock.clone(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn single_identity_end_to_end() {
        let clock = ManualClock::new();
        let text =
            "ID: 123456\nPhone: 919999999\nViewed by: 7\n01.01.2023 → @olduser, 111111, 222222";
        let s = FakeSession::new(
            "s0",
            &clock,
            Script {
                reply: Some((2, text.to_string())),
                ..Script::default()
            },
        );
        let r = relay(vec![s.clone()], cfg(), &clock);

        let rec = r.resolve("@alice").await.unwrap();

        assert_eq!(s.sent(), vec!["t.me/alice".to_string()]);
        assert_eq!(
            rec,
            ParsedRecord {
                success: true,
                username: None,
                id: Some("123456".to_string()),
                phone: Some("919999999".to_string()),
                viewed_by: Some(7),
                name_history: vec![HistoryEntry {
                    date: "01.01.2023".to_string(),
                    username: "olduser".to_string(),
                    id: Some("111111".to_string()),
                }],
            }
        );
    }

    #[tokio::test]
    async fn never_matches_stale_or_own_messages() {
        let clock = ManualClock::new();
        let s = FakeSession::new(
            "s0",
            &clock,
            Script {
                reply: Some((3, "ID: 2".to_string())),
                ..Script::default()
            },
        );
        // Earlier bot answer to somebody else's query, already in history.
        s.seed(false, "ID: 1");
        let r = relay(vec![s.clone()], cfg(), &clock);

        let rec = r.resolve("bob").await.unwrap();
        assert_eq!(rec.id.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn exhausts_to_no_reply_after_max_timeouts() {
        let clock = ManualClock::new();
        let s = FakeSession::new("s0", &clock, Script::default());
        let r = relay(vec![s.clone()], cfg(), &clock);

        let err = r.resolve("nobody").await.unwrap_err();

        assert_eq!(err.kind, FailureKind::NoReply);
        assert_eq!(s.sent().len(), 3);
        assert!(clock.elapsed() >= Duration::from_secs(90));
        // Two retry pauses between three attempts; none after the last.
        let pauses = clock
            .sleeps()
            .iter()
            .filter(|d| **d == BackoffConfig::default().retry_pause)
            .count();
        assert_eq!(pauses, 2);
    }

    #[tokio::test]
    async fn rate_limit_wait_is_honored_before_next_send() {
        let clock = ManualClock::new();
        let s = FakeSession::new(
            "s0",
            &clock,
            Script {
                send_failures: VecDeque::from(vec![Error::RateLimited(Duration::from_secs(10))]),
                reply: Some((1, "ID: 9".to_string())),
                ..Script::default()
            },
        );
        let r = relay(vec![s.clone()], cfg(), &clock);

        let rec = r.resolve("carol").await.unwrap();
        assert_eq!(rec.id.as_deref(), Some("9"));

        let times = s.send_times();
        assert_eq!(times.len(), 2);
        assert!(times[1] - times[0] >= Duration::from_secs(10));
        assert!(times[1] - times[0] <= Duration::from_secs(25));
    }

    #[tokio::test]
    async fn failed_identity_is_skipped_by_rotation() {
        let clock = ManualClock::new();
        let broken = FakeSession::new(
            "broken",
            &clock,
            Script {
                send_failures: VecDeque::from(vec![Error::Transport("connection reset".to_string())]),
                ..Script::default()
            },
        );
        let healthy = FakeSession::new(
            "healthy",
            &clock,
            Script {
                reply: Some((1, "t.me/dave\nID: 5".to_string())),
                ..Script::default()
            },
        );
        let r = relay(vec![broken.clone(), healthy.clone()], cfg(), &clock);

        let rec = r.resolve("dave").await.unwrap();
        assert_eq!(rec.username.as_deref(), Some("dave"));
        assert_eq!(broken.send_times().len(), 1);
        assert_eq!(healthy.sent(), vec!["t.me/dave".to_string()]);
    }

    #[tokio::test]
    async fn persistent_failures_exhaust_to_relay_failure() {
        let clock = ManualClock::new();
        let s = FakeSession::new(
            "s0",
            &clock,
            Script {
                send_failures: (0..3).map(|_| Error::Transport("down".to_string())).collect(),
                ..Script::default()
            },
        );
        let r = relay(vec![s.clone()], cfg(), &clock);

        let err = r.resolve("erin").await.unwrap_err();
        assert_eq!(err.kind, FailureKind::RelayFailure);
        assert!(err.reason.contains("down"));
        assert_eq!(s.send_times().len(), 3);
    }

    #[tokio::test]
    async fn final_rate_limit_is_not_slept_on() {
        let clock = ManualClock::new();
        let s = FakeSession::new(
            "s0",
            &clock,
            Script {
                send_failures: VecDeque::from(vec![Error::RateLimited(Duration::from_secs(300))]),
                ..Script::default()
            },
        );
        let r = relay(vec![s], RelayConfig { max_attempts: 1, ..cfg() }, &clock);

        let err = r.resolve("frank").await.unwrap_err();
        assert_eq!(err.kind, FailureKind::RelayFailure);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn rate_limited_fetch_backs_off_and_exhausts_to_relay_failure() {
        let clock = ManualClock::new();
        let s = FakeSession::new(
            "s0",
            &clock,
            Script {
                fetch_failures: (1..=3)
                    .map(|n| (n, Error::RateLimited(Duration::from_secs(10))))
                    .collect(),
                reply: Some((1, "ID: 1".to_string())),
                ..Script::default()
            },
        );
        let r = relay(vec![s.clone()], cfg(), &clock);

        let err = r.resolve("ivan").await.unwrap_err();
        assert_eq!(err.kind, FailureKind::RelayFailure);
        assert_eq!(s.sent().len(), 3);

        // Backoff after the first two attempts only, each wait plus jitter.
        let sleeps = clock.sleeps();
        assert_eq!(sleeps.len(), 2);
        for d in &sleeps {
            assert!(*d >= Duration::from_secs(15) && *d <= Duration::from_secs(25));
        }
        let times = s.send_times();
        assert_eq!(times[1] - times[0], sleeps[0]);
        assert_eq!(times[2] - times[1], sleeps[1]);
    }

    #[tokio::test]
    async fn failed_fetch_is_retried_after_pause() {
        let clock = ManualClock::new();
        let s = FakeSession::new(
            "s0",
            &clock,
            Script {
                fetch_failures: HashMap::from([(1, Error::Transport("connection reset".to_string()))]),
                reply: Some((1, "ID: 4".to_string())),
                ..Script::default()
            },
        );
        let r = relay(vec![s.clone()], cfg(), &clock);

        let rec = r.resolve("judy").await.unwrap();
        assert_eq!(rec.id.as_deref(), Some("4"));
        assert_eq!(s.sent().len(), 2);
        assert_eq!(clock.sleeps(), vec![BackoffConfig::default().retry_pause]);
    }

    #[tokio::test]
    async fn rate_limit_then_timeout_ends_as_no_reply() {
        let clock = ManualClock::new();
        let s = FakeSession::new(
            "s0",
            &clock,
            Script {
                send_failures: VecDeque::from(vec![Error::RateLimited(Duration::from_secs(5))]),
                ..Script::default()
            },
        );
        let r = relay(vec![s.clone()], RelayConfig { max_attempts: 2, ..cfg() }, &clock);

        let err = r.resolve("kate").await.unwrap_err();
        assert_eq!(err.kind, FailureKind::NoReply);
        assert_eq!(s.send_times().len(), 2);
    }

    #[tokio::test]
    async fn timeout_then_failed_fetch_ends_as_relay_failure() {
        let clock = ManualClock::new();
        let s = FakeSession::new(
            "s0",
            &clock,
            Script {
                fetch_failures: HashMap::from([(2, Error::Transport("stream closed".to_string()))]),
                ..Script::default()
            },
        );
        let r = relay(vec![s.clone()], RelayConfig { max_attempts: 2, ..cfg() }, &clock);

        let err = r.resolve("liam").await.unwrap_err();
        assert_eq!(err.kind, FailureKind::RelayFailure);
        assert!(err.reason.contains("stream closed"));
        assert_eq!(s.sent().len(), 2);
    }

    #[tokio::test]
    async fn reply_pushed_out_of_scan_window_times_out() {
        let clock = ManualClock::new();
        let s = FakeSession::new(
            "s0",
            &clock,
            Script {
                reply: Some((1, "ID: 3".to_string())),
                own_noise_after_reply: 5,
                ..Script::default()
            },
        );
        let r = relay(vec![s], RelayConfig { max_attempts: 1, ..cfg() }, &clock);

        let err = r.resolve("gina").await.unwrap_err();
        assert_eq!(err.kind, FailureKind::NoReply);
    }

    #[tokio::test]
    async fn invalid_handle_is_rejected_without_sending() {
        let clock = ManualClock::new();
        let s = FakeSession::new("s0", &clock, Script::default());
        let r = relay(vec![s.clone()], cfg(), &clock);

        let err = r.resolve(" @ ").await.unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidHandle);
        assert!(s.send_times().is_empty());
    }

    #[tokio::test]
    async fn overall_limit_abandons_a_stalled_poll() {
        let clock = ManualClock::new();
        let r = relay(vec![Arc::new(Stalled)], cfg(), &clock);

        let err = r
            .resolve_within("henry", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Cancelled);
    }

    #[test]
    fn empty_pool_refuses_to_build() {
        let res = Relay::new(
            Arc::new(IdentityPool::new(Vec::new())),
            RelayConfig::default(),
            ReplyParser::default(),
        );
        assert!(matches!(res, Err(Error::NoIdentities)));
    }

    #[test]
    fn zero_attempts_is_a_config_error() {
        let bad = RelayConfig {
            max_attempts: 0,
            ..RelayConfig::default()
        };
        assert!(matches!(bad.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn find_reply_takes_first_qualifying_in_session_order() {
        let baseline = MessageHandle {
            sequence_id: SequenceId(5),
            is_self_originated: true,
        };
        let m = |id, own, text: &str| Message {
            sequence_id: SequenceId(id),
            is_self_originated: own,
            text: text.to_string(),
        };
        let history = vec![
            m(9, true, "t.me/x"),
            m(8, false, "newest reply"),
            m(7, false, "older reply"),
            m(5, true, "t.me/me"),
            m(4, false, "stale"),
        ];
        assert_eq!(
            find_reply(&history, &baseline).map(|m| m.text.as_str()),
            Some("newest reply")
        );
        assert!(find_reply(&history[3..], &baseline).is_none());
    }

    #[test]
    fn outcomes_map_to_states() {
        assert_eq!(
            RelayState::from(&AttemptOutcome::TimedOut),
            RelayState::TimedOut
        );
        assert_eq!(
            RelayState::from(&AttemptOutcome::RateLimited(Duration::from_secs(1))),
            RelayState::RateLimited
        );
    }
}
