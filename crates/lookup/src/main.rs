use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info};

use lookup_core::{
    config::Config, pool::IdentityPool, Error, FailureKind, LookupResponse, Relay, ResolveError,
};

#[derive(Serialize)]
struct CliLine<'a> {
    handle: &'a str,
    #[serde(flatten)]
    response: LookupResponse,
}

fn print_line(handle: &str, response: LookupResponse) {
    match serde_json::to_string(&CliLine { handle, response }) {
        Ok(line) => println!("{line}"),
        Err(e) => error!(handle, error = %e, "failed to encode result"),
    }
}

/// `lookup <handle>...`: resolve concurrently, print one JSON line per
/// handle in argument order.
async fn run_cli(cfg: &Config, relay: Arc<Relay>, handles: Vec<String>) {
    let mut set = JoinSet::new();
    for (i, handle) in handles.iter().cloned().enumerate() {
        let relay = relay.clone();
        let limit = cfg.request_timeout;
        set.spawn(async move {
            let res = match limit {
                Some(limit) => relay.resolve_within(&handle, limit).await,
                None => relay.resolve(&handle).await,
            };
            (i, res)
        });
    }

    let mut results: Vec<Option<LookupResponse>> = vec![None; handles.len()];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((i, res)) => results[i] = Some(res.into()),
            Err(e) => error!(error = %e, "lookup task failed"),
        }
    }

    for (handle, res) in handles.iter().zip(results) {
        let response = res.unwrap_or_else(|| {
            ResolveError::new(FailureKind::RelayFailure, "lookup task failed").into()
        });
        print_line(handle, response);
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    lookup_core::logging::init("lookup")?;

    let cfg = Arc::new(Config::load()?);
    let handles: Vec<String> = std::env::args().skip(1).collect();

    let sessions = lookup_bridge::sessions_from_config(&cfg)?;
    let pool = Arc::new(IdentityPool::new(sessions));
    info!(identities = pool.len(), labels = ?pool.labels(), "identity pool ready");

    let relay = match Relay::new(pool, cfg.relay_config(), cfg.reply_parser()?) {
        Ok(relay) => Arc::new(relay),
        Err(Error::NoIdentities) => {
            error!("no identities configured; set LOOKUP_SESSION_STRINGS and LOOKUP_BRIDGE_URL");
            for handle in &handles {
                let err = ResolveError::new(FailureKind::NoIdentities, "no identities available");
                print_line(handle, err.into());
            }
            return Err(Error::NoIdentities);
        }
        Err(e) => return Err(e),
    };

    if !handles.is_empty() {
        run_cli(&cfg, relay, handles).await;
        return Ok(());
    }

    lookup_telegram::router::run_polling(cfg, relay)
        .await
        .map_err(|e| Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
