//! Offline-first, event-sourced client core for the debt ledger.
//!
//! User intent is recorded as an append-only event log, projected into
//! contacts and transactions with derived balances, and reconciled with the
//! server through content hashes, incremental pulls and a bounded undo
//! window. The app stays fully usable without connectivity; pushes and pulls
//! catch up whenever the network allows.

pub mod api;
pub mod backoff;
pub mod context;
pub mod db;
pub mod error;
pub mod events;
pub mod ids;
pub mod models;
pub mod realtime;
pub mod snapshot;
pub mod state_builder;
pub mod store;
pub mod sync;

pub use api::{HttpApi, PushOutcome, ServerApi, ServerHash};
pub use context::SessionContext;
pub use db::{ContactUpdate, LocalDb, NewContact, NewTransaction, TransactionUpdate};
pub use error::{EngineError, StoreError};
pub use events::{Event, WireEvent};
pub use ids::{ContactId, EventId, TransactionId, WalletId};
pub use models::{AppState, Contact, Currency, Transaction, TransactionDirection, TransactionType};
pub use store::EventStore;
pub use sync::SyncEngine;

use realtime::RealtimeChannel;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub struct EngineConfig {
    pub storage_dir: PathBuf,
    pub base_url: String,
    /// WebSocket endpoint for the realtime control channel; None disables it.
    pub ws_url: Option<String>,
}

/// The assembled client core: store, session, local database and sync
/// engine wired together. Hosts construct one per process.
pub struct Engine {
    pub store: Arc<EventStore>,
    pub session: Arc<SessionContext>,
    pub db: Arc<LocalDb>,
    pub sync: Arc<SyncEngine>,
    ws_url: Option<String>,
    realtime: Mutex<Option<RealtimeChannel>>,
}

impl Engine {
    /// Open against the real HTTP backend.
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        let store = Arc::new(EventStore::open(&config.storage_dir)?);
        let session = Arc::new(SessionContext::attach(Arc::clone(&store))?);
        let api = Arc::new(HttpApi::new(config.base_url, Arc::clone(&session)));
        Self::assemble(store, session, api, config.ws_url)
    }

    /// Open with an injected server implementation (tests, tooling). The
    /// realtime channel stays off; notifications are driven by the caller.
    pub fn open_with_api(
        storage_dir: impl Into<PathBuf>,
        api: Arc<dyn ServerApi>,
    ) -> Result<Self, EngineError> {
        let store = Arc::new(EventStore::open(storage_dir.into())?);
        let session = Arc::new(SessionContext::attach(Arc::clone(&store))?);
        Self::assemble(store, session, api, None)
    }

    fn assemble(
        store: Arc<EventStore>,
        session: Arc<SessionContext>,
        api: Arc<dyn ServerApi>,
        ws_url: Option<String>,
    ) -> Result<Self, EngineError> {
        let (push_signal, push_rx) = sync::push_channel();
        let db = Arc::new(LocalDb::new(
            Arc::clone(&store),
            Arc::clone(&session),
            push_signal.clone(),
        ));
        let sync_engine = Arc::new(SyncEngine::new(
            Arc::clone(&store),
            Arc::clone(&db),
            api,
            Arc::clone(&session),
            push_signal,
            push_rx,
        ));
        Ok(Self {
            store,
            session,
            db,
            sync: sync_engine,
            ws_url,
            realtime: Mutex::new(None),
        })
    }

    /// Start the sync workers and, when configured, the realtime channel.
    pub fn start(&self) {
        self.sync.start();
        if let Some(url) = &self.ws_url {
            let mut slot = self.realtime.lock().unwrap();
            if slot.is_none() {
                *slot = Some(RealtimeChannel::spawn(
                    Arc::clone(&self.sync),
                    Arc::clone(&self.session),
                    url.clone(),
                ));
            }
        }
    }

    /// Stop every background task and wait for them to exit.
    pub fn stop(&self) {
        self.sync.stop();
        if let Some(channel) = self.realtime.lock().unwrap().take() {
            channel.join();
        }
    }
}
