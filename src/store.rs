//! SQLite persistence: the append-only event log, per-wallet projection
//! tables, snapshots, and the small config/preferences area.
//!
//! The event store exclusively owns event records. Projections and snapshots
//! are derived copies and may be destroyed without data loss.

use crate::error::StoreError;
use crate::events::{
    canonical_timestamp, parse_timestamp, AggregateType, Event, EventType,
};
use crate::ids::{EventId, WalletId};
use crate::models::{AppState, Contact, Transaction};
use crate::snapshot::Snapshot;
use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;

const DB_FILE: &str = "debitum.db";

const EVENT_COLS: &str =
    "id, wallet_id, aggregate_type, aggregate_id, event_type, event_data, timestamp, version, synced";

/// Rows of either wallet column value belong to the wallet being queried:
/// an empty wallet_id marks rows from before wallets existed, and those are
/// treated as part of whichever wallet is current.
const WALLET_SCOPE: &str = "(wallet_id = ?1 OR wallet_id = '')";

/// Config key of a wallet's last-sync watermark.
pub fn last_sync_key(wallet: &WalletId) -> String {
    format!("last_sync_timestamp_{}", wallet)
}

/// Hash of an ordered event list: concatenate `id + canonical timestamp` per
/// event, SHA-256 over the UTF-8 bytes, lowercase hex. An empty list hashes
/// the empty string. Must match the server for the same wallet partition.
pub fn hash_event_list<'a, I>(events: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut hasher = Sha256::new();
    for (id, timestamp) in events {
        hasher.update(id.as_bytes());
        hasher.update(timestamp.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

pub struct EventStore {
    conn: Mutex<Connection>,
    /// Last timestamp handed to `append`. Event time is causal order per
    /// device, so mints must stay strictly monotone even when the clock
    /// stalls within one microsecond.
    last_mint: Mutex<Option<chrono::DateTime<Utc>>>,
}

impl EventStore {
    /// Open (or create) the store under the given directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let conn = Connection::open(dir.join(DB_FILE))?;
        Self::create_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            last_mint: Mutex::new(None),
        })
    }

    fn create_tables(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS config (key TEXT PRIMARY KEY, value TEXT);
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                wallet_id TEXT NOT NULL DEFAULT '',
                aggregate_type TEXT NOT NULL,
                aggregate_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                event_data TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 1,
                synced INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_events_wallet ON events(wallet_id);
            CREATE INDEX IF NOT EXISTS idx_events_synced ON events(synced);
            CREATE INDEX IF NOT EXISTS idx_events_aggregate
                ON events(wallet_id, aggregate_type, aggregate_id);
            CREATE TABLE IF NOT EXISTS contacts (
                id TEXT PRIMARY KEY,
                wallet_id TEXT NOT NULL DEFAULT '',
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_contacts_wallet ON contacts(wallet_id);
            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                wallet_id TEXT NOT NULL DEFAULT '',
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_transactions_wallet ON transactions(wallet_id);
            CREATE TABLE IF NOT EXISTS projection_snapshots (
                wallet_id TEXT NOT NULL,
                snapshot_index INTEGER NOT NULL,
                last_event_id TEXT NOT NULL,
                event_count INTEGER NOT NULL,
                state_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (wallet_id, snapshot_index)
            );
            "#,
        )?;
        Ok(())
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().unwrap();
        f(&conn).map_err(StoreError::from)
    }

    // --- Events ---

    /// Mint and store a new local event (`synced = false`). Fails only on
    /// storage I/O; logical conflicts are the server's concern.
    pub fn append(
        &self,
        wallet: &WalletId,
        aggregate_type: AggregateType,
        aggregate_id: &str,
        event_type: EventType,
        event_data: Value,
        version: i32,
    ) -> Result<Event, StoreError> {
        let timestamp = self.mint_timestamp();
        let event = Event {
            id: EventId::random(),
            wallet_id: Some(wallet.clone()),
            aggregate_type,
            aggregate_id: aggregate_id.to_string(),
            event_type,
            event_data,
            timestamp,
            version,
            synced: false,
        };
        self.insert(&event)?;
        Ok(event)
    }

    /// Microsecond-granular, strictly increasing per store instance.
    fn mint_timestamp(&self) -> chrono::DateTime<Utc> {
        let mut last = self.last_mint.lock().unwrap();
        let now = Utc::now();
        let now = parse_timestamp(&canonical_timestamp(now)).unwrap_or(now);
        let ts = match *last {
            Some(prev) if now <= prev => prev + chrono::Duration::microseconds(1),
            _ => now,
        };
        *last = Some(ts);
        ts
    }

    /// Idempotent insert used when receiving events from the server; the
    /// caller marks them `synced = true` up front. Returns false when the id
    /// was already present (the row is left untouched).
    pub fn put(&self, event: &Event) -> Result<bool, StoreError> {
        self.insert(event)
    }

    fn insert(&self, e: &Event) -> Result<bool, StoreError> {
        let data = serde_json::to_string(&e.event_data)?;
        self.with_conn(|conn| {
            let inserted = conn.execute(
                r#"
                INSERT OR IGNORE INTO events
                    (id, wallet_id, aggregate_type, aggregate_id, event_type, event_data, timestamp, version, synced)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    e.id.as_str(),
                    e.wallet_id.as_ref().map(|w| w.as_str()).unwrap_or(""),
                    e.aggregate_type.as_str(),
                    e.aggregate_id,
                    e.event_type.as_str(),
                    data,
                    canonical_timestamp(e.timestamp),
                    e.version,
                    e.synced as i32,
                ],
            )?;
            Ok(inserted > 0)
        })
    }

    /// Flip the synced flag, false to true only. Unknown ids are ignored.
    pub fn mark_synced(&self, id: &EventId) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE events SET synced = 1 WHERE id = ?1",
                params![id.as_str()],
            )?;
            Ok(())
        })
    }

    pub fn contains(&self, id: &EventId) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM events WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    pub fn get_all(&self, wallet: &WalletId) -> Result<Vec<Event>, StoreError> {
        self.query_events(
            &format!(
                "SELECT {EVENT_COLS} FROM events WHERE {WALLET_SCOPE} ORDER BY timestamp, id"
            ),
            params![wallet.as_str()],
        )
    }

    pub fn get_for_aggregate(
        &self,
        wallet: &WalletId,
        aggregate_type: AggregateType,
        aggregate_id: &str,
    ) -> Result<Vec<Event>, StoreError> {
        self.query_events(
            &format!(
                "SELECT {EVENT_COLS} FROM events \
                 WHERE {WALLET_SCOPE} AND aggregate_type = ?2 AND aggregate_id = ?3 \
                 ORDER BY timestamp, id"
            ),
            params![wallet.as_str(), aggregate_type.as_str(), aggregate_id],
        )
    }

    pub fn get_unsynced(&self, wallet: &WalletId) -> Result<Vec<Event>, StoreError> {
        self.query_events(
            &format!(
                "SELECT {EVENT_COLS} FROM events \
                 WHERE {WALLET_SCOPE} AND synced = 0 ORDER BY timestamp, id"
            ),
            params![wallet.as_str()],
        )
    }

    /// Events strictly after the given canonical timestamp.
    pub fn get_after(&self, wallet: &WalletId, since: &str) -> Result<Vec<Event>, StoreError> {
        self.query_events(
            &format!(
                "SELECT {EVENT_COLS} FROM events \
                 WHERE {WALLET_SCOPE} AND timestamp > ?2 ORDER BY timestamp, id"
            ),
            params![wallet.as_str(), since],
        )
    }

    pub fn last_event(&self, wallet: &WalletId) -> Result<Option<Event>, StoreError> {
        let mut events = self.query_events(
            &format!(
                "SELECT {EVENT_COLS} FROM events \
                 WHERE {WALLET_SCOPE} ORDER BY timestamp DESC, id DESC LIMIT 1"
            ),
            params![wallet.as_str()],
        )?;
        Ok(events.pop())
    }

    pub fn event_count(&self, wallet: &WalletId) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT COUNT(*) FROM events WHERE {WALLET_SCOPE}"),
                params![wallet.as_str()],
                |row| row.get(0),
            )
        })
    }

    /// Content hash of the wallet's log, ordered by (timestamp, id).
    pub fn event_hash(&self, wallet: &WalletId) -> Result<String, StoreError> {
        let pairs = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT id, timestamp FROM events WHERE {WALLET_SCOPE} ORDER BY timestamp, id"
            ))?;
            let rows = stmt.query_map(params![wallet.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(hash_event_list(
            pairs.iter().map(|(id, ts)| (id.as_str(), ts.as_str())),
        ))
    }

    /// Drop every local trace of a wallet: events, projections, snapshots,
    /// and the sync watermark. The next pull re-fetches from the server.
    pub fn clear_wallet(&self, wallet: &WalletId) -> Result<(), StoreError> {
        let watermark = last_sync_key(wallet);
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM events WHERE wallet_id = ?1",
                params![wallet.as_str()],
            )?;
            conn.execute(
                "DELETE FROM contacts WHERE wallet_id = ?1",
                params![wallet.as_str()],
            )?;
            conn.execute(
                "DELETE FROM transactions WHERE wallet_id = ?1",
                params![wallet.as_str()],
            )?;
            conn.execute(
                "DELETE FROM projection_snapshots WHERE wallet_id = ?1",
                params![wallet.as_str()],
            )?;
            conn.execute("DELETE FROM config WHERE key = ?1", params![watermark])?;
            Ok(())
        })
    }

    fn query_events(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Event>, StoreError> {
        let raw = self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(args, |row| {
                Ok(RawEventRow {
                    id: row.get(0)?,
                    wallet_id: row.get(1)?,
                    aggregate_type: row.get(2)?,
                    aggregate_id: row.get(3)?,
                    event_type: row.get(4)?,
                    event_data: row.get(5)?,
                    timestamp: row.get(6)?,
                    version: row.get(7)?,
                    synced: row.get::<_, i32>(8)? != 0,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(raw.into_iter().filter_map(RawEventRow::decode).collect())
    }

    // --- Config / preferences ---

    pub fn config_get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT value FROM config WHERE key = ?1")?;
            let mut rows = stmt.query(params![key])?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        })
    }

    pub fn config_set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO config (key, value) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = ?2",
                params![key, value],
            )?;
            Ok(())
        })
    }

    pub fn config_remove(&self, key: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM config WHERE key = ?1", params![key])?;
            Ok(())
        })
    }

    // --- Projections ---

    /// Replace the wallet's projection tables. New rows are written first and
    /// removed rows deleted last, so a concurrent reader never observes an
    /// empty state mid-swap.
    pub fn save_projection(&self, wallet: &WalletId, state: &AppState) -> Result<(), StoreError> {
        let contacts: Vec<(String, String)> = state
            .contacts
            .iter()
            .map(|c| Ok((c.id.clone(), serde_json::to_string(c)?)))
            .collect::<Result<_, serde_json::Error>>()?;
        let transactions: Vec<(String, String)> = state
            .transactions
            .iter()
            .map(|t| Ok((t.id.clone(), serde_json::to_string(t)?)))
            .collect::<Result<_, serde_json::Error>>()?;
        self.with_conn(|conn| {
            for (table, rows) in [("contacts", &contacts), ("transactions", &transactions)] {
                let keep: HashSet<&str> = rows.iter().map(|(id, _)| id.as_str()).collect();
                for (id, data) in rows {
                    conn.execute(
                        &format!(
                            "INSERT INTO {table} (id, wallet_id, data) VALUES (?1, ?2, ?3) \
                             ON CONFLICT(id) DO UPDATE SET wallet_id = ?2, data = ?3"
                        ),
                        params![id, wallet.as_str(), data],
                    )?;
                }
                let existing: Vec<String> = {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT id FROM {table} WHERE {WALLET_SCOPE}"
                    ))?;
                    let rows = stmt.query_map(params![wallet.as_str()], |row| row.get(0))?;
                    rows.collect::<rusqlite::Result<_>>()?
                };
                for id in existing.iter().filter(|id| !keep.contains(id.as_str())) {
                    conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])?;
                }
            }
            Ok(())
        })
    }

    pub fn load_projection(&self, wallet: &WalletId) -> Result<AppState, StoreError> {
        let (contact_rows, transaction_rows) = self.with_conn(|conn| {
            let mut contacts = Vec::new();
            let mut stmt =
                conn.prepare(&format!("SELECT data FROM contacts WHERE {WALLET_SCOPE}"))?;
            let rows = stmt.query_map(params![wallet.as_str()], |row| row.get::<_, String>(0))?;
            for r in rows {
                contacts.push(r?);
            }
            let mut transactions = Vec::new();
            let mut stmt =
                conn.prepare(&format!("SELECT data FROM transactions WHERE {WALLET_SCOPE}"))?;
            let rows = stmt.query_map(params![wallet.as_str()], |row| row.get::<_, String>(0))?;
            for r in rows {
                transactions.push(r?);
            }
            Ok((contacts, transactions))
        })?;
        let mut state = AppState {
            contacts: decode_rows::<Contact>(contact_rows),
            transactions: decode_rows::<Transaction>(transaction_rows),
        };
        state.sort();
        Ok(state)
    }

    // --- Snapshots ---

    /// Store a new snapshot under the next monotone index for the wallet.
    pub fn save_snapshot(
        &self,
        wallet: &WalletId,
        last_event_id: &EventId,
        event_count: i64,
        state: &AppState,
    ) -> Result<i64, StoreError> {
        let state_json = serde_json::to_string(state)?;
        let created_at = canonical_timestamp(Utc::now());
        self.with_conn(|conn| {
            let next_index: i64 = conn.query_row(
                "SELECT COALESCE(MAX(snapshot_index), -1) + 1 FROM projection_snapshots \
                 WHERE wallet_id = ?1",
                params![wallet.as_str()],
                |row| row.get(0),
            )?;
            conn.execute(
                r#"
                INSERT INTO projection_snapshots
                    (wallet_id, snapshot_index, last_event_id, event_count, state_json, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    wallet.as_str(),
                    next_index,
                    last_event_id.as_str(),
                    event_count,
                    state_json,
                    created_at,
                ],
            )?;
            Ok(next_index)
        })
    }

    /// Delete all but the newest `keep` snapshots by index.
    pub fn prune_snapshots(&self, wallet: &WalletId, keep: usize) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                DELETE FROM projection_snapshots
                WHERE wallet_id = ?1 AND snapshot_index NOT IN (
                    SELECT snapshot_index FROM projection_snapshots
                    WHERE wallet_id = ?1
                    ORDER BY snapshot_index DESC
                    LIMIT ?2
                )
                "#,
                params![wallet.as_str(), keep as i64],
            )?;
            Ok(())
        })
    }

    pub fn latest_snapshot(&self, wallet: &WalletId) -> Result<Option<Snapshot>, StoreError> {
        let row = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT snapshot_index, last_event_id, event_count, state_json \
                 FROM projection_snapshots WHERE wallet_id = ?1 \
                 ORDER BY snapshot_index DESC LIMIT 1",
            )?;
            let mut rows = stmt.query(params![wallet.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(Some((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))),
                None => Ok(None),
            }
        })?;
        let Some((snapshot_index, last_event_id, event_count, state_json)) = row else {
            return Ok(None);
        };
        let last_event_id = match EventId::parse(&last_event_id) {
            Ok(id) => id,
            Err(_) => {
                warn!(snapshot_index, "snapshot has an invalid last_event_id, ignoring");
                return Ok(None);
            }
        };
        match serde_json::from_str::<AppState>(&state_json) {
            Ok(state) => Ok(Some(Snapshot {
                snapshot_index,
                last_event_id,
                event_count,
                state,
            })),
            Err(e) => {
                warn!(snapshot_index, error = %e, "snapshot state does not parse, ignoring");
                Ok(None)
            }
        }
    }

    pub fn snapshot_indexes(&self, wallet: &WalletId) -> Result<Vec<i64>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT snapshot_index FROM projection_snapshots \
                 WHERE wallet_id = ?1 ORDER BY snapshot_index",
            )?;
            let rows = stmt.query_map(params![wallet.as_str()], |row| row.get(0))?;
            rows.collect()
        })
    }
}

struct RawEventRow {
    id: String,
    wallet_id: String,
    aggregate_type: String,
    aggregate_id: String,
    event_type: String,
    event_data: String,
    timestamp: String,
    version: i32,
    synced: bool,
}

impl RawEventRow {
    fn decode(self) -> Option<Event> {
        let id = match EventId::parse(&self.id) {
            Ok(id) => id,
            Err(_) => {
                warn!(id = %self.id, "skipping event row with invalid id");
                return None;
            }
        };
        let Some(aggregate_type) = AggregateType::parse(&self.aggregate_type) else {
            warn!(id = %self.id, kind = %self.aggregate_type, "skipping event row with unknown aggregate type");
            return None;
        };
        let Some(event_type) = EventType::parse(&self.event_type) else {
            warn!(id = %self.id, kind = %self.event_type, "skipping event row with unknown event type");
            return None;
        };
        let Some(timestamp) = parse_timestamp(&self.timestamp) else {
            warn!(id = %self.id, timestamp = %self.timestamp, "skipping event row with unparseable timestamp");
            return None;
        };
        let event_data =
            serde_json::from_str::<Value>(&self.event_data).unwrap_or(Value::Null);
        let wallet_id = if self.wallet_id.is_empty() {
            None
        } else {
            WalletId::parse(&self.wallet_id).ok()
        };
        Some(Event {
            id,
            wallet_id,
            aggregate_type,
            aggregate_id: self.aggregate_id,
            event_type,
            event_data,
            timestamp,
            version: self.version,
            synced: self.synced,
        })
    }
}

fn decode_rows<T: serde::de::DeserializeOwned>(rows: Vec<String>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|data| match serde_json::from_str(&data) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, "skipping projection row that does not parse");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn open_store() -> (tempfile::TempDir, EventStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = EventStore::open(dir.path()).expect("open");
        (dir, store)
    }

    #[test]
    fn empty_wallet_hashes_the_empty_string() {
        let (_dir, store) = open_store();
        let wallet = WalletId::random();
        assert_eq!(store.event_hash(&wallet).unwrap(), EMPTY_SHA256);
        assert_eq!(store.event_count(&wallet).unwrap(), 0);
    }

    #[test]
    fn append_stores_unsynced_and_mark_synced_is_monotone() {
        let (_dir, store) = open_store();
        let wallet = WalletId::random();
        let event = store
            .append(
                &wallet,
                AggregateType::Contact,
                "c1",
                EventType::Created,
                json!({"name": "A"}),
                1,
            )
            .unwrap();
        assert!(!event.synced);
        assert_eq!(store.get_unsynced(&wallet).unwrap().len(), 1);

        store.mark_synced(&event.id).unwrap();
        assert!(store.get_unsynced(&wallet).unwrap().is_empty());
        assert!(store.get_all(&wallet).unwrap()[0].synced);

        // Marking again and marking unknown ids are both no-ops.
        store.mark_synced(&event.id).unwrap();
        store.mark_synced(&EventId::random()).unwrap();
        assert!(store.get_all(&wallet).unwrap()[0].synced);
    }

    #[test]
    fn put_is_idempotent_and_never_duplicates() {
        let (_dir, store) = open_store();
        let wallet = WalletId::random();
        let event = store
            .append(
                &wallet,
                AggregateType::Contact,
                "c1",
                EventType::Created,
                json!({"name": "A"}),
                1,
            )
            .unwrap();
        let mut copy = event.clone();
        copy.synced = true;
        assert!(!store.put(&copy).unwrap(), "same id must not insert twice");
        let all = store.get_all(&wallet).unwrap();
        assert_eq!(all.len(), 1);
        assert!(!all[0].synced, "put must leave the stored row untouched");
    }

    #[test]
    fn get_after_is_strictly_after() {
        let (_dir, store) = open_store();
        let wallet = WalletId::random();
        let e1 = store
            .append(
                &wallet,
                AggregateType::Contact,
                "c1",
                EventType::Created,
                json!({}),
                1,
            )
            .unwrap();
        let e2 = store
            .append(
                &wallet,
                AggregateType::Contact,
                "c1",
                EventType::Updated,
                json!({}),
                1,
            )
            .unwrap();
        let after = store.get_after(&wallet, &e1.timestamp_text()).unwrap();
        assert_eq!(after.iter().map(|e| &e.id).collect::<Vec<_>>(), [&e2.id]);
        assert!(store
            .get_after(&wallet, &e2.timestamp_text())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn hash_tracks_id_and_timestamp_sets() {
        let (_dir, store_a) = open_store();
        let (_dir2, store_b) = open_store();
        let wallet = WalletId::random();
        let event = store_a
            .append(
                &wallet,
                AggregateType::Contact,
                "c1",
                EventType::Created,
                json!({"name": "A"}),
                1,
            )
            .unwrap();
        let mut copy = event.clone();
        copy.synced = true;
        store_b.put(&copy).unwrap();
        assert_eq!(
            store_a.event_hash(&wallet).unwrap(),
            store_b.event_hash(&wallet).unwrap(),
            "same id/timestamp set must hash identically regardless of synced flags"
        );

        store_b
            .append(
                &wallet,
                AggregateType::Contact,
                "c2",
                EventType::Created,
                json!({"name": "B"}),
                1,
            )
            .unwrap();
        assert_ne!(
            store_a.event_hash(&wallet).unwrap(),
            store_b.event_hash(&wallet).unwrap()
        );
    }

    #[test]
    fn legacy_rows_without_wallet_belong_to_the_current_wallet() {
        let (_dir, store) = open_store();
        let wallet = WalletId::random();
        let mut event = store
            .append(
                &wallet,
                AggregateType::Contact,
                "c1",
                EventType::Created,
                json!({}),
                1,
            )
            .unwrap();
        event.id = EventId::random();
        event.wallet_id = None;
        store.put(&event).unwrap();

        assert_eq!(store.get_all(&wallet).unwrap().len(), 2);
        assert_eq!(store.get_unsynced(&wallet).unwrap().len(), 2);
        assert_eq!(store.event_count(&wallet).unwrap(), 2);
    }

    #[test]
    fn snapshots_keep_only_the_newest_by_index() {
        let (_dir, store) = open_store();
        let wallet = WalletId::random();
        let state = AppState::default();
        for _ in 0..8 {
            store
                .save_snapshot(&wallet, &EventId::random(), 10, &state)
                .unwrap();
            store.prune_snapshots(&wallet, 5).unwrap();
        }
        assert_eq!(store.snapshot_indexes(&wallet).unwrap(), [3, 4, 5, 6, 7]);
        let latest = store.latest_snapshot(&wallet).unwrap().unwrap();
        assert_eq!(latest.snapshot_index, 7);
    }

    #[test]
    fn projection_swap_removes_stale_rows() {
        let (_dir, store) = open_store();
        let wallet = WalletId::random();
        let contact = |id: &str| Contact {
            id: id.to_string(),
            name: format!("name-{id}"),
            username: None,
            phone: None,
            email: None,
            notes: None,
            created_at: canonical_timestamp(Utc::now()),
            updated_at: canonical_timestamp(Utc::now()),
            is_synced: false,
            balance: 0,
            wallet_id: Some(wallet.as_str().to_string()),
        };
        let state = AppState {
            contacts: vec![contact("a"), contact("b")],
            transactions: vec![],
        };
        store.save_projection(&wallet, &state).unwrap();
        let state = AppState {
            contacts: vec![contact("b"), contact("c")],
            transactions: vec![],
        };
        store.save_projection(&wallet, &state).unwrap();
        let loaded = store.load_projection(&wallet).unwrap();
        let ids: Vec<&str> = loaded.contacts.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["b", "c"]);
    }
}
