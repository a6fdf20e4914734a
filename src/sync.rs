//! Two independent sync paths: a self-terminating push loop (local to
//! server) and a permanent pull supervisor (server to local), plus the
//! event-driven entry points that feed them. Re-entry into either path is a
//! silent no-op guarded by a check-and-set flag.

use crate::api::ServerApi;
use crate::backoff::RetryBackoff;
use crate::context::SessionContext;
use crate::db::LocalDb;
use crate::error::EngineError;
use crate::events::{now_timestamp, EventType, WireEvent};
use crate::ids::EventId;
use crate::store::{last_sync_key, EventStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const TICK: Duration = Duration::from_secs(1);

/// Coalescing wake-up for the push worker. Raising an already-raised signal
/// is a no-op, so a burst of writes schedules a single push round.
#[derive(Clone)]
pub struct PushSignal {
    tx: SyncSender<()>,
}

impl PushSignal {
    pub fn raise(&self) {
        let _ = self.tx.try_send(());
    }
}

pub(crate) fn push_channel() -> (PushSignal, Receiver<()>) {
    let (tx, rx) = sync_channel(1);
    (PushSignal { tx }, rx)
}

/// Result of one push round.
#[derive(Clone, Copy, Debug, Default)]
pub struct PushReport {
    pub accepted: usize,
    pub conflicts: usize,
    pub remaining: usize,
}

/// Result of one pull attempt.
#[derive(Clone, Copy, Debug, Default)]
pub struct PullReport {
    pub inserted: usize,
}

struct FlagGuard<'a>(&'a AtomicBool);

impl<'a> FlagGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Some(Self(flag))
        } else {
            None
        }
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SyncEngine {
    store: Arc<EventStore>,
    db: Arc<LocalDb>,
    api: Arc<dyn ServerApi>,
    session: Arc<SessionContext>,
    /// Shared by both loops: a success on either side resets it.
    backoff: Mutex<RetryBackoff>,
    is_local_to_server_syncing: AtomicBool,
    is_server_to_local_syncing: AtomicBool,
    needs_retry: AtomicBool,
    has_sync_error: AtomicBool,
    online: AtomicBool,
    stopped: AtomicBool,
    push_signal: PushSignal,
    push_rx: Mutex<Option<Receiver<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    connectivity_observer: Mutex<Option<Box<dyn Fn(bool) + Send + Sync>>>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<EventStore>,
        db: Arc<LocalDb>,
        api: Arc<dyn ServerApi>,
        session: Arc<SessionContext>,
        push_signal: PushSignal,
        push_rx: Receiver<()>,
    ) -> Self {
        Self {
            store,
            db,
            api,
            session,
            backoff: Mutex::new(RetryBackoff::new()),
            is_local_to_server_syncing: AtomicBool::new(false),
            is_server_to_local_syncing: AtomicBool::new(false),
            needs_retry: AtomicBool::new(false),
            has_sync_error: AtomicBool::new(false),
            online: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            push_signal,
            push_rx: Mutex::new(Some(push_rx)),
            workers: Mutex::new(Vec::new()),
            connectivity_observer: Mutex::new(None),
        }
    }

    /// Spawn the push worker and the pull supervisor. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let Some(rx) = self.push_rx.lock().unwrap().take() else {
            return;
        };
        let mut workers = self.workers.lock().unwrap();
        let engine = Arc::clone(self);
        workers.push(std::thread::spawn(move || engine.run_push_worker(rx)));
        let engine = Arc::clone(self);
        workers.push(std::thread::spawn(move || engine.run_pull_supervisor()));
    }

    /// Cancel both workers and wait for them to park.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.push_signal.raise();
        let workers: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        for w in workers {
            let _ = w.join();
        }
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn has_sync_error(&self) -> bool {
        self.has_sync_error.load(Ordering::SeqCst)
    }

    /// Host calls this after re-authenticating.
    pub fn clear_sync_error(&self) {
        self.has_sync_error.store(false, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn set_connectivity_observer(&self, f: impl Fn(bool) + Send + Sync + 'static) {
        *self.connectivity_observer.lock().unwrap() = Some(Box::new(f));
    }

    /// Record connectivity; observers hear about edges only.
    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::SeqCst);
        if was == online {
            return;
        }
        info!(online, "connectivity changed");
        if let Some(observer) = &*self.connectivity_observer.lock().unwrap() {
            observer(online);
        }
    }

    // --- Event-driven entry points ---

    /// Schedule a push round. Cheap; coalesces with pending signals.
    pub fn start_local_to_server_sync(&self) {
        self.push_signal.raise();
    }

    pub fn on_back_online(&self) {
        self.backoff.lock().unwrap().reset();
        self.handle_server_to_local_sync_request();
        if let Some(wallet) = self.session.current_wallet() {
            match self.store.get_unsynced(&wallet) {
                Ok(unsynced) if !unsynced.is_empty() => self.start_local_to_server_sync(),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "could not check for unsynced events"),
            }
        }
    }

    pub fn on_pull_to_refresh(&self) {
        self.backoff.lock().unwrap().reset();
        self.start_local_to_server_sync();
    }

    /// The payload is an opaque trigger, never data.
    pub fn on_realtime_notification(&self, _payload: &str) {
        self.handle_server_to_local_sync_request();
    }

    /// Guarded single pull. Failures arm the supervisor's retry flag.
    pub fn handle_server_to_local_sync_request(&self) {
        let Some(_guard) = FlagGuard::try_acquire(&self.is_server_to_local_syncing) else {
            trace!("pull already in flight, skipping");
            return;
        };
        match self.pull_once() {
            Ok(report) => {
                self.needs_retry.store(false, Ordering::SeqCst);
                self.backoff.lock().unwrap().reset();
                if report.inserted > 0 {
                    debug!(inserted = report.inserted, "pull merged server events");
                }
            }
            Err(EngineError::AuthExpired) => {
                warn!("pull rejected: authentication expired");
                self.has_sync_error.store(true, Ordering::SeqCst);
            }
            Err(e) => {
                debug!(error = %e, "pull failed, will retry");
                self.needs_retry.store(true, Ordering::SeqCst);
            }
        }
    }

    /// One pull attempt: compare hashes, fetch what is missing since the
    /// watermark, merge, rebuild. Unguarded; callers go through
    /// [`Self::handle_server_to_local_sync_request`] in production.
    pub fn pull_once(&self) -> Result<PullReport, EngineError> {
        let Some(wallet) = self.session.current_wallet() else {
            return Ok(PullReport::default());
        };
        if !self.api.probe_reachable(&wallet) {
            return Err(EngineError::NetworkUnreachable("probe failed".into()));
        }
        let server = self.api.fetch_hash(&wallet)?;
        let local_hash = self.store.event_hash(&wallet)?;
        let local_count = self.store.event_count(&wallet)?;
        let watermark_key = last_sync_key(&wallet);
        if server.hash == local_hash && server.event_count == local_count {
            if self.store.config_get(&watermark_key)?.is_none() {
                self.store.config_set(&watermark_key, &now_timestamp())?;
            }
            return Ok(PullReport::default());
        }

        let since = self.store.config_get(&watermark_key)?;
        let wire_events = self.api.fetch_events(&wallet, since.as_deref())?;
        let mut inserted = 0;
        let mut had_undo = false;
        for wire in wire_events {
            let event = match wire.into_event(&wallet, true) {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "dropping malformed server event");
                    continue;
                }
            };
            if self.store.put(&event)? {
                had_undo |= event.event_type == EventType::Undo;
                inserted += 1;
            }
        }
        if inserted > 0 {
            self.db.rebuild_wallet(&wallet, had_undo)?;
        }
        self.store.config_set(&watermark_key, &now_timestamp())?;
        Ok(PullReport { inserted })
    }

    /// One push round: send every unsynced event, mark what the server
    /// accepted. Returns None when another push holds the guard or no wallet
    /// is selected.
    pub fn push_pending(&self) -> Result<Option<PushReport>, EngineError> {
        let Some(_guard) = FlagGuard::try_acquire(&self.is_local_to_server_syncing) else {
            trace!("push already in flight, skipping");
            return Ok(None);
        };
        let Some(wallet) = self.session.current_wallet() else {
            return Ok(None);
        };
        let mut unsynced = self.store.get_unsynced(&wallet)?;
        if unsynced.is_empty() {
            return Ok(Some(PushReport::default()));
        }
        if !self.api.probe_reachable(&wallet) {
            return Err(EngineError::NetworkUnreachable("probe failed".into()));
        }
        // Deletions and undos first, stably, so the server sees an
        // aggregate's removal before any late-arriving update to it.
        unsynced.sort_by_key(|e| push_priority(e.event_type));
        let batch: Vec<WireEvent> = unsynced.iter().map(WireEvent::from).collect();
        debug!(wallet = %wallet, pending = batch.len(), "pushing unsynced events");
        let outcome = self.api.push_events(&wallet, &batch)?;

        let mut accepted = 0;
        for id in &outcome.accepted {
            match EventId::parse(id) {
                Ok(event_id) => {
                    self.store.mark_synced(&event_id)?;
                    accepted += 1;
                }
                Err(_) => warn!(id = %id, "server accepted an id we cannot parse"),
            }
        }
        if accepted > 0 {
            // Pick up the flipped synced flags in the projections.
            self.db.rebuild_wallet(&wallet, false)?;
        }
        if !outcome.conflicts.is_empty() {
            // Server policy is last-writer-wins; its view arrives on the
            // next pull, so nothing to change locally.
            warn!(conflicts = outcome.conflicts.len(), "server reported conflicting events");
        }
        let remaining = self.store.get_unsynced(&wallet)?.len();
        Ok(Some(PushReport {
            accepted,
            conflicts: outcome.conflicts.len(),
            remaining,
        }))
    }

    // --- Workers ---

    fn run_push_worker(self: Arc<Self>, rx: Receiver<()>) {
        loop {
            match rx.recv_timeout(TICK) {
                Ok(()) => {}
                Err(RecvTimeoutError::Timeout) => {
                    if self.stopped() {
                        return;
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => return,
            }
            if self.stopped() {
                return;
            }
            self.run_push_loop();
        }
    }

    /// The temporary push loop: runs until nothing is left unsynced, an auth
    /// failure stops it, or the engine shuts down.
    fn run_push_loop(&self) {
        let mut first = true;
        loop {
            if self.stopped() {
                return;
            }
            if !first {
                let wait = self.backoff.lock().unwrap().next_wait();
                if self.sleep_interruptible(wait) {
                    return;
                }
            }
            first = false;
            match self.push_pending() {
                Ok(None) => return,
                Ok(Some(report)) => {
                    if report.remaining == 0 {
                        self.backoff.lock().unwrap().reset();
                        return;
                    }
                    if report.accepted == 0 {
                        // No progress this round, only conflicts. Stop; the
                        // authoritative view arrives on the next pull.
                        self.backoff.lock().unwrap().reset();
                        return;
                    }
                    self.backoff.lock().unwrap().reset();
                }
                Err(EngineError::AuthExpired) => {
                    warn!("push rejected: authentication expired");
                    self.has_sync_error.store(true, Ordering::SeqCst);
                    return;
                }
                Err(e) if e.is_retryable() => {
                    debug!(error = %e, "push failed, retrying with backoff");
                }
                Err(e) => {
                    error!(error = %e, "push failed");
                }
            }
        }
    }

    /// The permanent pull supervisor: retries failed pulls with backoff.
    fn run_pull_supervisor(self: Arc<Self>) {
        loop {
            if self.sleep_interruptible(TICK) {
                return;
            }
            if !self.needs_retry.load(Ordering::SeqCst) {
                continue;
            }
            let wait = self.backoff.lock().unwrap().next_wait();
            if self.sleep_interruptible(wait) {
                return;
            }
            self.handle_server_to_local_sync_request();
        }
    }

    /// Sleep in small slices so shutdown is prompt. True when stopping.
    fn sleep_interruptible(&self, total: Duration) -> bool {
        let slice = Duration::from_millis(200);
        let mut remaining = total;
        while remaining > Duration::ZERO {
            if self.stopped() {
                return true;
            }
            let step = remaining.min(slice);
            std::thread::sleep(step);
            remaining -= step;
        }
        self.stopped()
    }
}

fn push_priority(event_type: EventType) -> u8 {
    match event_type {
        EventType::Deleted => 0,
        EventType::Undo => 1,
        EventType::Updated => 2,
        EventType::Created => 3,
    }
}
