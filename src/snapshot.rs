//! Materialized projections keyed by event position, so a write does not pay
//! an O(N) rebuild once the log grows.

use crate::error::StoreError;
use crate::events::EventType;
use crate::ids::{EventId, WalletId};
use crate::models::AppState;
use crate::state_builder;
use crate::store::EventStore;
use tracing::debug;

pub const SNAPSHOT_INTERVAL: i64 = 10;
pub const MAX_SNAPSHOTS: usize = 5;

#[derive(Clone, Debug)]
pub struct Snapshot {
    pub snapshot_index: i64,
    pub last_event_id: EventId,
    pub event_count: i64,
    pub state: AppState,
}

/// A snapshot is due every `SNAPSHOT_INTERVAL` events, and always right after
/// an UNDO was applied (so the next rebuild does not pay for it again).
pub fn should_snapshot(event_count: i64, batch_had_undo: bool) -> bool {
    batch_had_undo || (event_count > 0 && event_count % SNAPSHOT_INTERVAL == 0)
}

/// Rebuild the wallet's projection, going through the latest usable snapshot
/// when possible. Any UNDO in the log forces a full rebuild: the undone event
/// may be older than every snapshot.
pub fn rebuild(store: &EventStore, wallet: &WalletId) -> Result<AppState, StoreError> {
    let events = store.get_all(wallet)?;
    let has_undo = events.iter().any(|e| e.event_type == EventType::Undo);
    if !has_undo {
        if let Some(snap) = store.latest_snapshot(wallet)? {
            // A snapshot whose anchor event is gone is unusable.
            if let Some(anchor) = events.iter().find(|e| e.id == snap.last_event_id) {
                let cutoff = anchor.timestamp;
                let after: Vec<_> = events
                    .iter()
                    .filter(|e| e.timestamp >= cutoff)
                    .cloned()
                    .collect();
                debug!(
                    wallet = %wallet,
                    snapshot_index = snap.snapshot_index,
                    replayed = after.len(),
                    "rebuilding from snapshot"
                );
                return Ok(state_builder::apply(snap.state, &after));
            }
        }
    }
    Ok(state_builder::build(&events))
}

/// Record a snapshot of `state` if the policy calls for one, and prune old
/// ones down to `MAX_SNAPSHOTS`.
pub fn maybe_snapshot(
    store: &EventStore,
    wallet: &WalletId,
    state: &AppState,
    batch_had_undo: bool,
) -> Result<(), StoreError> {
    let event_count = store.event_count(wallet)?;
    if !should_snapshot(event_count, batch_had_undo) {
        return Ok(());
    }
    let Some(last) = store.last_event(wallet)? else {
        return Ok(());
    };
    let index = store.save_snapshot(wallet, &last.id, event_count, state)?;
    store.prune_snapshots(wallet, MAX_SNAPSHOTS)?;
    debug!(wallet = %wallet, snapshot_index = index, event_count, "saved projection snapshot");
    Ok(())
}
