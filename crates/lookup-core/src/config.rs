use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    backoff::BackoffConfig,
    domain::PeerId,
    errors::Error,
    messaging::throttled::ThrottleConfig,
    parser::{LabelTable, ReplyParser},
    relay::RelayConfig,
    Result,
};

/// A credential that must never reach logs. `Debug` prints a placeholder.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Credentials for one upstream identity, forwarded to the session bridge.
///
/// Establishing the session from these is the bridge's job.
#[derive(Clone, Debug)]
pub struct IdentityCredentials {
    pub label: String,
    pub session_string: Secret,
    pub api_id: Option<i64>,
    pub api_hash: Option<Secret>,
}

/// Typed configuration, loaded from the environment (and `.env` if present).
#[derive(Clone, Debug)]
pub struct Config {
    // Relay
    pub target_peer: String,
    pub link_prefix: String,
    pub max_attempts: u32,
    pub per_attempt_timeout: Duration,
    pub poll_interval: Duration,
    pub reply_scan_depth: usize,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
    pub retry_pause: Duration,
    pub request_timeout: Option<Duration>,
    pub labels_file: Option<PathBuf>,

    // Identities / session bridge
    pub bridge_url: Option<String>,
    pub bridge_timeout: Duration,
    pub identities: Vec<IdentityCredentials>,
    pub send_min_interval: Duration,
    pub global_min_interval: Duration,

    // Telegram front end
    pub telegram_bot_token: Option<Secret>,
    pub telegram_allowed_users: Vec<i64>,
    pub telegram_safe_limit: usize,

    // Front-end rate limiting
    pub rate_limit_enabled: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let relay = RelayConfig::default();
        let throttle = ThrottleConfig::default();
        Self {
            target_peer: relay.target_peer.0,
            link_prefix: relay.link_prefix,
            max_attempts: relay.max_attempts,
            per_attempt_timeout: relay.per_attempt_timeout,
            poll_interval: relay.poll_interval,
            reply_scan_depth: relay.reply_scan_depth,
            jitter_min: relay.backoff.jitter_min,
            jitter_max: relay.backoff.jitter_max,
            retry_pause: relay.backoff.retry_pause,
            request_timeout: None,
            labels_file: None,
            bridge_url: None,
            bridge_timeout: Duration::from_secs(15),
            identities: Vec::new(),
            send_min_interval: throttle.per_peer_min_interval,
            global_min_interval: throttle.global_min_interval,
            telegram_bot_token: None,
            telegram_allowed_users: Vec::new(),
            telegram_safe_limit: 4000,
            rate_limit_enabled: true,
            rate_limit_requests: 20,
            rate_limit_window: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the process env in production).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let d = Self::default();
        let str_of = |key: &str| get(key).and_then(non_empty);
        let u64_of = |key: &str| -> Result<Option<u64>> {
            str_of(key)
                .map(|s| {
                    s.trim()
                        .parse::<u64>()
                        .map_err(|_| Error::Config(format!("{key} must be a non-negative integer")))
                })
                .transpose()
        };
        let ms_of = |key: &str, default: Duration| -> Result<Duration> {
            Ok(u64_of(key)?.map(Duration::from_millis).unwrap_or(default))
        };

        let max_attempts = match u64_of("LOOKUP_MAX_ATTEMPTS")? {
            Some(n) => u32::try_from(n.max(1)).unwrap_or(u32::MAX),
            None => d.max_attempts,
        };
        let reply_scan_depth = match u64_of("LOOKUP_SCAN_DEPTH")? {
            Some(n) => usize::try_from(n.max(1)).unwrap_or(usize::MAX),
            None => d.reply_scan_depth,
        };
        let rate_limit_requests = match u64_of("RATE_LIMIT_REQUESTS")? {
            Some(n) => u32::try_from(n).unwrap_or(u32::MAX),
            None => d.rate_limit_requests,
        };
        let telegram_safe_limit = match u64_of("TELEGRAM_SAFE_LIMIT")? {
            Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
            None => d.telegram_safe_limit,
        };

        let api_id = str_of("API_ID")
            .map(|s| {
                s.trim()
                    .parse::<i64>()
                    .map_err(|_| Error::Config("API_ID must be an integer".to_string()))
            })
            .transpose()?;
        let api_hash = str_of("API_HASH").map(Secret::new);

        // LOOKUP_SESSION_STRINGS takes precedence over the single SESSION_STRING.
        let session_strings = match str_of("LOOKUP_SESSION_STRINGS") {
            Some(list) => parse_csv(&list),
            None => str_of("SESSION_STRING").into_iter().collect(),
        };
        let identities = session_strings
            .into_iter()
            .enumerate()
            .map(|(i, session_string)| IdentityCredentials {
                label: format!("identity-{i}"),
                session_string: Secret::new(session_string),
                api_id,
                api_hash: api_hash.clone(),
            })
            .collect();

        let cfg = Self {
            target_peer: str_of("LOOKUP_TARGET_PEER").unwrap_or(d.target_peer),
            link_prefix: get("LOOKUP_LINK_PREFIX").unwrap_or(d.link_prefix),
            max_attempts,
            per_attempt_timeout: ms_of("LOOKUP_ATTEMPT_TIMEOUT_MS", d.per_attempt_timeout)?,
            poll_interval: ms_of("LOOKUP_POLL_INTERVAL_MS", d.poll_interval)?,
            reply_scan_depth,
            jitter_min: ms_of("LOOKUP_JITTER_MIN_MS", d.jitter_min)?,
            jitter_max: ms_of("LOOKUP_JITTER_MAX_MS", d.jitter_max)?,
            retry_pause: ms_of("LOOKUP_RETRY_PAUSE_MS", d.retry_pause)?,
            request_timeout: u64_of("LOOKUP_REQUEST_TIMEOUT_MS")?
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            labels_file: str_of("LOOKUP_LABELS_FILE").map(PathBuf::from),
            bridge_url: str_of("LOOKUP_BRIDGE_URL").map(|u| u.trim_end_matches('/').to_string()),
            bridge_timeout: ms_of("LOOKUP_BRIDGE_TIMEOUT_MS", d.bridge_timeout)?,
            identities,
            send_min_interval: ms_of("LOOKUP_SEND_MIN_INTERVAL_MS", d.send_min_interval)?,
            global_min_interval: ms_of("LOOKUP_GLOBAL_MIN_INTERVAL_MS", d.global_min_interval)?,
            telegram_bot_token: str_of("TELEGRAM_BOT_TOKEN").map(Secret::new),
            telegram_allowed_users: parse_csv_i64(str_of("TELEGRAM_ALLOWED_USERS")),
            telegram_safe_limit,
            rate_limit_enabled: str_of("RATE_LIMIT_ENABLED")
                .map(|s| parse_bool(&s))
                .unwrap_or(d.rate_limit_enabled),
            rate_limit_requests,
            rate_limit_window: u64_of("RATE_LIMIT_WINDOW")?
                .map(Duration::from_secs)
                .unwrap_or(d.rate_limit_window),
        };

        if !cfg.identities.is_empty() && cfg.bridge_url.is_none() {
            return Err(Error::Config(
                "LOOKUP_BRIDGE_URL is required when session strings are configured".to_string(),
            ));
        }
        cfg.relay_config().validate()?;
        Ok(cfg)
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            target_peer: PeerId::new(self.target_peer.clone()),
            link_prefix: self.link_prefix.clone(),
            max_attempts: self.max_attempts,
            per_attempt_timeout: self.per_attempt_timeout,
            poll_interval: self.poll_interval,
            reply_scan_depth: self.reply_scan_depth,
            backoff: BackoffConfig {
                jitter_min: self.jitter_min,
                jitter_max: self.jitter_max,
                retry_pause: self.retry_pause,
            },
        }
    }

    pub fn throttle_config(&self) -> ThrottleConfig {
        ThrottleConfig {
            global_min_interval: self.global_min_interval,
            per_peer_min_interval: self.send_min_interval,
        }
    }

    /// Reply parser with the default label table plus `LOOKUP_LABELS_FILE`, if set.
    pub fn reply_parser(&self) -> Result<ReplyParser> {
        let labels = match &self.labels_file {
            Some(path) => LabelTable::load(path)?,
            None => LabelTable::default(),
        };
        Ok(ReplyParser::new(labels))
    }

    /// The Telegram front end needs a token and a non-empty allow-list.
    pub fn telegram_front_end(&self) -> Result<&str> {
        let token = self.telegram_bot_token.as_ref().ok_or_else(|| {
            Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
        })?;
        if self.telegram_allowed_users.is_empty() {
            return Err(Error::Config(
                "TELEGRAM_ALLOWED_USERS environment variable is required".to_string(),
            ));
        }
        Ok(token.expose())
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // real env wins
        }

        env::set_var(key, unquote(v.trim()));
    }
}

fn unquote(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return &val[1..val.len() - 1];
    }
    val
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_csv(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
