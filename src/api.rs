//! Thin request/response layer for the sync endpoints. The engine talks to
//! [`ServerApi`]; tests swap in an in-memory implementation.

use crate::context::SessionContext;
use crate::error::EngineError;
use crate::events::WireEvent;
use crate::ids::WalletId;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const PROBE_CACHE_TTL: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct ServerHash {
    pub hash: String,
    pub event_count: i64,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PushOutcome {
    #[serde(default)]
    pub accepted: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<String>,
}

/// The server contract the sync engine depends on. All calls are scoped to a
/// wallet; implementations carry their own auth.
pub trait ServerApi: Send + Sync {
    fn fetch_hash(&self, wallet: &WalletId) -> Result<ServerHash, EngineError>;

    /// Events strictly after `since` (all events when absent), oldest first.
    fn fetch_events(
        &self,
        wallet: &WalletId,
        since: Option<&str>,
    ) -> Result<Vec<WireEvent>, EngineError>;

    fn push_events(
        &self,
        wallet: &WalletId,
        batch: &[WireEvent],
    ) -> Result<PushOutcome, EngineError>;

    /// Cheap cached reachability check. An auth failure still counts as
    /// reachable; that is the host's problem, not the sync loops'.
    fn probe_reachable(&self, wallet: &WalletId) -> bool;
}

#[derive(Deserialize)]
struct HashResponse {
    hash: String,
    event_count: i64,
}

struct ProbeResult {
    at: Instant,
    reachable: bool,
}

/// HTTP implementation over reqwest, driven by an owned runtime so callers
/// stay synchronous.
pub struct HttpApi {
    runtime: tokio::runtime::Runtime,
    client: reqwest::Client,
    probe_client: reqwest::Client,
    base_url: String,
    session: Arc<SessionContext>,
    probe_cache: Mutex<Option<ProbeResult>>,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>, session: Arc<SessionContext>) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("tokio runtime");
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client");
        let probe_client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            runtime,
            client,
            probe_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
            probe_cache: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn headers(&self, wallet: &WalletId) -> Result<reqwest::header::HeaderMap, EngineError> {
        let token = self.session.token().ok_or(EngineError::AuthExpired)?;
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {token}")
                .parse()
                .map_err(|_| EngineError::AuthExpired)?,
        );
        headers.insert(
            reqwest::header::HeaderName::from_static("x-wallet-id"),
            wallet
                .as_str()
                .parse()
                .map_err(|_| EngineError::Malformed("wallet id is not a valid header".into()))?,
        );
        Ok(headers)
    }
}

fn net_err(e: reqwest::Error) -> EngineError {
    EngineError::NetworkUnreachable(e.to_string())
}

fn check_status(status: reqwest::StatusCode, body: &str) -> Result<(), EngineError> {
    match status.as_u16() {
        401 | 403 => Err(EngineError::AuthExpired),
        s if !status.is_success() => Err(EngineError::Server {
            status: s,
            body: body.chars().take(200).collect(),
        }),
        _ => Ok(()),
    }
}

impl ServerApi for HttpApi {
    fn fetch_hash(&self, wallet: &WalletId) -> Result<ServerHash, EngineError> {
        let url = self.url("/api/sync/hash");
        let headers = self.headers(wallet)?;
        self.runtime.block_on(async {
            let resp = self
                .client
                .get(&url)
                .query(&[("wallet_id", wallet.as_str())])
                .headers(headers)
                .send()
                .await
                .map_err(net_err)?;
            let status = resp.status();
            let text = resp.text().await.map_err(net_err)?;
            check_status(status, &text)?;
            let parsed: HashResponse = serde_json::from_str(&text)
                .map_err(|e| EngineError::Malformed(format!("hash response: {e}")))?;
            Ok(ServerHash {
                hash: parsed.hash,
                event_count: parsed.event_count,
            })
        })
    }

    fn fetch_events(
        &self,
        wallet: &WalletId,
        since: Option<&str>,
    ) -> Result<Vec<WireEvent>, EngineError> {
        let url = self.url("/api/sync/events");
        let headers = self.headers(wallet)?;
        let raw: Vec<serde_json::Value> = self.runtime.block_on(async {
            let mut query = vec![("wallet_id", wallet.as_str())];
            if let Some(s) = since {
                query.push(("since", s));
            }
            let resp = self
                .client
                .get(&url)
                .query(&query)
                .headers(headers)
                .send()
                .await
                .map_err(net_err)?;
            let status = resp.status();
            let text = resp.text().await.map_err(net_err)?;
            check_status(status, &text)?;
            serde_json::from_str(&text)
                .map_err(|e| EngineError::Malformed(format!("events response: {e}")))
        })?;
        // One unreadable event must not sink the batch.
        let events = raw
            .into_iter()
            .filter_map(|v| match serde_json::from_value::<WireEvent>(v) {
                Ok(e) => Some(e),
                Err(e) => {
                    warn!(error = %e, "dropping unreadable server event");
                    None
                }
            })
            .collect();
        Ok(events)
    }

    fn push_events(
        &self,
        wallet: &WalletId,
        batch: &[WireEvent],
    ) -> Result<PushOutcome, EngineError> {
        let url = self.url("/api/sync/events");
        let headers = self.headers(wallet)?;
        self.runtime.block_on(async {
            let resp = self
                .client
                .post(&url)
                .query(&[("wallet_id", wallet.as_str())])
                .headers(headers)
                .json(batch)
                .send()
                .await
                .map_err(net_err)?;
            let status = resp.status();
            let text = resp.text().await.map_err(net_err)?;
            check_status(status, &text)?;
            serde_json::from_str(&text)
                .map_err(|e| EngineError::Malformed(format!("push response: {e}")))
        })
    }

    fn probe_reachable(&self, wallet: &WalletId) -> bool {
        {
            let cache = self.probe_cache.lock().unwrap();
            if let Some(p) = &*cache {
                if p.at.elapsed() < PROBE_CACHE_TTL {
                    return p.reachable;
                }
            }
        }
        let url = self.url("/api/sync/hash");
        let reachable = self.runtime.block_on(async {
            let mut req = self
                .probe_client
                .get(&url)
                .query(&[("wallet_id", wallet.as_str())]);
            if let Some(token) = self.session.token() {
                req = req.bearer_auth(token);
            }
            match req.send().await {
                Ok(resp) => matches!(resp.status().as_u16(), 200 | 401),
                Err(e) => {
                    debug!(error = %e, "reachability probe failed");
                    false
                }
            }
        });
        *self.probe_cache.lock().unwrap() = Some(ProbeResult {
            at: Instant::now(),
            reachable,
        });
        reachable
    }
}
