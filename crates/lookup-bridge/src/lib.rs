//! Session bridge adapter.
//!
//! Implements the `lookup-core` session port over a JSON HTTP bridge that
//! keeps authenticated user sessions alive (logging in is the bridge's
//! business, not ours):
//!
//! - `POST {base}/messages/send` with `{"peer", "text"}` → `{"id", "out"}`
//! - `GET {base}/messages/history?peer=..&limit=..` → `[{"id", "out", "text"}]`, newest first
//!
//! A flood wait comes back as HTTP 420/429, with the wait in `Retry-After`,
//! a `retry_after` JSON field, or a `FLOOD_WAIT_<n>` error string.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{header::HeaderMap, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use lookup_core::{
    config::{Config, IdentityCredentials},
    domain::{PeerId, SequenceId},
    errors::Error,
    messaging::{
        port::RelaySession,
        throttled::ThrottledSession,
        types::{Message, MessageHandle},
    },
    Result,
};

/// Used when the bridge signals a flood wait without saying how long.
const DEFAULT_FLOOD_WAIT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct SendRequest<'a> {
    peer: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: i64,
    #[serde(default = "default_out")]
    out: bool,
}

fn default_out() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    id: i64,
    #[serde(default)]
    out: bool,
    #[serde(default)]
    text: Option<String>,
}

impl From<WireMessage> for Message {
    fn from(m: WireMessage) -> Self {
        Self {
            sequence_id: SequenceId(m.id),
            is_self_originated: m.out,
            // Media without a caption has no text; it can never be a reply.
            text: m.text.unwrap_or_default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BridgeSession {
    base_url: String,
    creds: IdentityCredentials,
    http: reqwest::Client,
}

impl BridgeSession {
    pub fn new(
        base_url: impl Into<String>,
        creds: IdentityCredentials,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("bridge http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            creds,
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        let mut req = req.header("x-session-string", self.creds.session_string.expose());
        if let Some(id) = self.creds.api_id {
            req = req.header("x-api-id", id.to_string());
        }
        if let Some(hash) = &self.creds.api_hash {
            req = req.header("x-api-hash", hash.expose());
        }
        req
    }

    async fn execute(&self, req: RequestBuilder) -> Result<Response> {
        let resp = self
            .authed(req)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("bridge request failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let retry_header = retry_after_header(resp.headers());
        let body = resp.text().await.unwrap_or_default();
        if let Some(wait) = flood_wait(status, retry_header, &body) {
            return Err(Error::RateLimited(wait));
        }
        Err(Error::Transport(format!(
            "bridge returned {status}: {}",
            body.chars().take(200).collect::<String>()
        )))
    }
}

#[async_trait]
impl RelaySession for BridgeSession {
    fn label(&self) -> &str {
        &self.creds.label
    }

    async fn send(&self, peer: &PeerId, text: &str) -> Result<MessageHandle> {
        let req = self.http.post(self.url("messages/send")).json(&SendRequest {
            peer: peer.as_str(),
            text,
        });
        let sent: SentMessage = self
            .execute(req)
            .await?
            .json()
            .await
            .map_err(|e| Error::Transport(format!("bridge send response: {e}")))?;

        debug!(identity = %self.creds.label, id = sent.id, "query sent");
        Ok(MessageHandle {
            sequence_id: SequenceId(sent.id),
            is_self_originated: sent.out,
        })
    }

    async fn recent_messages(&self, peer: &PeerId, limit: usize) -> Result<Vec<Message>> {
        let limit = limit.to_string();
        let req = self
            .http
            .get(self.url("messages/history"))
            .query(&[("peer", peer.as_str()), ("limit", limit.as_str())]);
        let history: Vec<WireMessage> = self
            .execute(req)
            .await?
            .json()
            .await
            .map_err(|e| Error::Transport(format!("bridge history response: {e}")))?;

        Ok(history.into_iter().map(Message::from).collect())
    }
}

/// One throttled bridge session per configured identity.
pub fn sessions_from_config(cfg: &Config) -> Result<Vec<Arc<dyn RelaySession>>> {
    if cfg.identities.is_empty() {
        return Ok(Vec::new());
    }
    let base_url = cfg
        .bridge_url
        .as_deref()
        .ok_or_else(|| Error::Config("LOOKUP_BRIDGE_URL is not set".to_string()))?;

    cfg.identities
        .iter()
        .map(|creds| {
            let raw = BridgeSession::new(base_url, creds.clone(), cfg.bridge_timeout)?;
            let session: Arc<dyn RelaySession> =
                Arc::new(ThrottledSession::new(Arc::new(raw), cfg.throttle_config()));
            Ok(session)
        })
        .collect()
}

fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Mandated wait if this failed response is a flood/rate-limit signal.
fn flood_wait(status: StatusCode, retry_header: Option<Duration>, body: &str) -> Option<Duration> {
    let from_body = flood_wait_from_body(body);
    let is_flood = status == StatusCode::TOO_MANY_REQUESTS
        || status.as_u16() == 420
        || from_body.is_some();
    if !is_flood {
        return None;
    }
    Some(retry_header.or(from_body).unwrap_or(DEFAULT_FLOOD_WAIT))
}

/// `{"retry_after": n}` or any text containing `FLOOD_WAIT_<n>`.
fn flood_wait_from_body(body: &str) -> Option<Duration> {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(secs) = v.get("retry_after").and_then(|x| x.as_u64()) {
            return Some(Duration::from_secs(secs));
        }
    }

    let (_, rest) = body.split_once("FLOOD_WAIT_")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse::<u64>().ok().map(Duration::from_secs)
}
