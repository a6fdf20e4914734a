//! Shared test harness: an in-memory server implementing the sync contract,
//! and an engine wired against it.

#![allow(dead_code)]

use debitum_engine::api::{PushOutcome, ServerApi, ServerHash};
use debitum_engine::error::EngineError;
use debitum_engine::events::{now_timestamp, WireEvent};
use debitum_engine::ids::{ContactId, EventId, WalletId};
use debitum_engine::store::hash_event_list;
use debitum_engine::Engine;
use serde_json::json;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Inner {
    events: Vec<WireEvent>,
    offline: bool,
    auth_ok: bool,
    fetch_event_calls: usize,
    push_calls: usize,
}

/// In-memory stand-in for the backend: one wallet, last-writer-wins,
/// client-minted ids are authoritative.
pub struct FakeServer {
    inner: Mutex<Inner>,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                auth_ok: true,
                ..Inner::default()
            }),
        })
    }

    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().unwrap().offline = offline;
    }

    pub fn set_auth_ok(&self, ok: bool) {
        self.inner.lock().unwrap().auth_ok = ok;
    }

    /// Install an event as if another client had pushed it.
    pub fn seed(&self, event: WireEvent) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.events.iter().any(|e| e.id == event.id) {
            inner.events.push(event);
            sort_events(&mut inner.events);
        }
    }

    pub fn event_ids(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .events
            .iter()
            .map(|e| e.id.clone())
            .collect()
    }

    pub fn hash(&self) -> String {
        let inner = self.inner.lock().unwrap();
        hash_event_list(
            inner
                .events
                .iter()
                .map(|e| (e.id.as_str(), e.timestamp.as_str())),
        )
    }

    pub fn fetch_event_calls(&self) -> usize {
        self.inner.lock().unwrap().fetch_event_calls
    }

    pub fn push_calls(&self) -> usize {
        self.inner.lock().unwrap().push_calls
    }

    fn check_available(inner: &Inner) -> Result<(), EngineError> {
        if inner.offline {
            return Err(EngineError::NetworkUnreachable("fake server offline".into()));
        }
        if !inner.auth_ok {
            return Err(EngineError::AuthExpired);
        }
        Ok(())
    }
}

fn sort_events(events: &mut [WireEvent]) {
    events.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.id.cmp(&b.id))
    });
}

impl ServerApi for FakeServer {
    fn fetch_hash(&self, _wallet: &WalletId) -> Result<ServerHash, EngineError> {
        let inner = self.inner.lock().unwrap();
        Self::check_available(&inner)?;
        Ok(ServerHash {
            hash: hash_event_list(
                inner
                    .events
                    .iter()
                    .map(|e| (e.id.as_str(), e.timestamp.as_str())),
            ),
            event_count: inner.events.len() as i64,
        })
    }

    fn fetch_events(
        &self,
        _wallet: &WalletId,
        since: Option<&str>,
    ) -> Result<Vec<WireEvent>, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_available(&inner)?;
        inner.fetch_event_calls += 1;
        let events = inner
            .events
            .iter()
            .filter(|e| match since {
                Some(s) => e.timestamp.as_str() > s,
                None => true,
            })
            .cloned()
            .collect();
        Ok(events)
    }

    fn push_events(
        &self,
        _wallet: &WalletId,
        batch: &[WireEvent],
    ) -> Result<PushOutcome, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_available(&inner)?;
        inner.push_calls += 1;
        let mut outcome = PushOutcome::default();
        for event in batch {
            if inner.events.iter().any(|e| e.id == event.id) {
                outcome.conflicts.push(event.id.clone());
            } else {
                inner.events.push(event.clone());
                outcome.accepted.push(event.id.clone());
            }
        }
        sort_events(&mut inner.events);
        Ok(outcome)
    }

    fn probe_reachable(&self, _wallet: &WalletId) -> bool {
        // Auth failures still mean the network is fine.
        !self.inner.lock().unwrap().offline
    }
}

pub struct TestApp {
    pub engine: Engine,
    pub server: Arc<FakeServer>,
    pub wallet: WalletId,
    _dir: tempfile::TempDir,
}

/// Engine over a fresh store and fake server, with a wallet selected.
pub fn test_app() -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = FakeServer::new();
    let api: Arc<dyn ServerApi> = server.clone();
    let engine = Engine::open_with_api(dir.path(), api).expect("open engine");
    let wallet = WalletId::random();
    engine
        .session
        .set_current_wallet(Some(wallet.clone()))
        .expect("set wallet");
    TestApp {
        engine,
        server,
        wallet,
        _dir: dir,
    }
}

/// A contact CREATED event in wire form, as another device would push it.
pub fn remote_contact_created(wallet: &WalletId, contact_id: &ContactId, name: &str) -> WireEvent {
    let ts = now_timestamp();
    WireEvent {
        id: EventId::random().as_str().to_string(),
        aggregate_type: "contact".into(),
        aggregate_id: contact_id.as_str().to_string(),
        event_type: "CREATED".into(),
        event_data: json!({
            "name": name,
            "timestamp": ts,
            "wallet_id": wallet.as_str(),
        }),
        timestamp: ts,
        version: 1,
    }
}
