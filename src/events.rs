//! Event envelope, closed payload types, and the wire JSON codec.
//!
//! The envelope keeps `event_data` as raw JSON so pushed events round-trip
//! byte-for-byte; the state builder parses it into [`EventBody`], a closed
//! sum type, and skips anything that does not fit.

use crate::error::EngineError;
use crate::ids::{EventId, WalletId};
use crate::models::{Currency, TransactionDirection, TransactionType};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical timestamp text: RFC3339, UTC, `Z` suffix, fixed 6-digit
/// microseconds. Fixed-width text keeps string order equal to time order,
/// which the store's `ORDER BY timestamp, id` relies on.
pub fn canonical_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_timestamp() -> String {
    canonical_timestamp(Utc::now())
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Re-express any RFC3339 text in the canonical form. Server timestamps go
/// through this on insert so local and remote hashes agree bit-for-bit.
pub fn canonicalize_timestamp(s: &str) -> Option<String> {
    parse_timestamp(s).map(canonical_timestamp)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateType {
    Contact,
    Transaction,
}

impl AggregateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateType::Contact => "contact",
            AggregateType::Transaction => "transaction",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "contact" => Some(AggregateType::Contact),
            "transaction" => Some(AggregateType::Transaction),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Created,
    Updated,
    Deleted,
    Undo,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Created => "CREATED",
            EventType::Updated => "UPDATED",
            EventType::Deleted => "DELETED",
            EventType::Undo => "UNDO",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(EventType::Created),
            "UPDATED" => Some(EventType::Updated),
            "DELETED" => Some(EventType::Deleted),
            "UNDO" => Some(EventType::Undo),
            _ => None,
        }
    }
}

/// An immutable fact about one aggregate. The only field that ever changes
/// after storage is `synced`, and only from false to true.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub id: EventId,
    /// None only for rows written before wallets existed; such rows are
    /// treated as belonging to whichever wallet is current.
    pub wallet_id: Option<WalletId>,
    pub aggregate_type: AggregateType,
    pub aggregate_id: String,
    pub event_type: EventType,
    pub event_data: Value,
    pub timestamp: DateTime<Utc>,
    pub version: i32,
    pub synced: bool,
}

impl Event {
    pub fn timestamp_text(&self) -> String {
        canonical_timestamp(self.timestamp)
    }
}

/// Wire shape shared by the pull response and the push request body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireEvent {
    pub id: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub event_data: Value,
    pub timestamp: String,
    #[serde(default = "default_version")]
    pub version: i32,
}

fn default_version() -> i32 {
    1
}

impl From<&Event> for WireEvent {
    fn from(e: &Event) -> Self {
        WireEvent {
            id: e.id.as_str().to_string(),
            aggregate_type: e.aggregate_type.as_str().to_string(),
            aggregate_id: e.aggregate_id.clone(),
            event_type: e.event_type.as_str().to_string(),
            event_data: e.event_data.clone(),
            timestamp: e.timestamp_text(),
            version: e.version,
        }
    }
}

impl WireEvent {
    /// Validate a server event into the envelope. `wallet_id` is the wallet
    /// the pull was scoped to; failures are the malformed kind and the
    /// caller drops the event without aborting the batch.
    pub fn into_event(self, wallet_id: &WalletId, synced: bool) -> Result<Event, EngineError> {
        let id = EventId::parse(&self.id)?;
        let aggregate_type = AggregateType::parse(&self.aggregate_type).ok_or_else(|| {
            EngineError::Malformed(format!("unknown aggregate_type '{}'", self.aggregate_type))
        })?;
        let event_type = EventType::parse(&self.event_type).ok_or_else(|| {
            EngineError::Malformed(format!("unknown event_type '{}'", self.event_type))
        })?;
        let timestamp = parse_timestamp(&self.timestamp)
            .ok_or_else(|| EngineError::Malformed(format!("bad timestamp '{}'", self.timestamp)))?;
        Ok(Event {
            id,
            wallet_id: Some(wallet_id.clone()),
            aggregate_type,
            aggregate_id: self.aggregate_id,
            event_type,
            event_data: self.event_data,
            timestamp,
            version: self.version,
            synced,
        })
    }
}

// --- Closed payload types ---

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ContactData {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<String>,
}

/// Contact update: omitted fields inherit from the prior state.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ContactPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionData {
    pub contact_id: String,
    #[serde(rename = "type", default)]
    pub kind: TransactionType,
    #[serde(default)]
    pub direction: TransactionDirection,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub currency: Currency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TransactionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<TransactionType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<TransactionDirection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<Currency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<String>,
}

/// Payload of DELETED events for either aggregate type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TombstoneData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UndoData {
    pub undone_event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<String>,
}

/// The in-memory representation of `event_data`, closed over the shapes the
/// builder understands. The wire format stays JSON-with-shape-tag.
#[derive(Clone, Debug)]
pub enum EventBody {
    ContactCreated(ContactData),
    ContactUpdated(ContactPatch),
    ContactDeleted(TombstoneData),
    TransactionCreated(TransactionData),
    TransactionUpdated(TransactionPatch),
    TransactionDeleted(TombstoneData),
    Undo(UndoData),
}

impl EventBody {
    pub fn parse(event: &Event) -> Result<Self, EngineError> {
        let data = event.event_data.clone();
        let body = match (event.aggregate_type, event.event_type) {
            (_, EventType::Undo) => EventBody::Undo(from_value(data)?),
            (AggregateType::Contact, EventType::Created) => {
                EventBody::ContactCreated(from_value(data)?)
            }
            (AggregateType::Contact, EventType::Updated) => {
                EventBody::ContactUpdated(from_value(data)?)
            }
            (AggregateType::Contact, EventType::Deleted) => {
                EventBody::ContactDeleted(from_value(data)?)
            }
            (AggregateType::Transaction, EventType::Created) => {
                EventBody::TransactionCreated(from_value(data)?)
            }
            (AggregateType::Transaction, EventType::Updated) => {
                EventBody::TransactionUpdated(from_value(data)?)
            }
            (AggregateType::Transaction, EventType::Deleted) => {
                EventBody::TransactionDeleted(from_value(data)?)
            }
        };
        Ok(body)
    }

    pub fn to_value(&self) -> Result<Value, EngineError> {
        let value = match self {
            EventBody::ContactCreated(d) => serde_json::to_value(d)?,
            EventBody::ContactUpdated(d) => serde_json::to_value(d)?,
            EventBody::ContactDeleted(d) => serde_json::to_value(d)?,
            EventBody::TransactionCreated(d) => serde_json::to_value(d)?,
            EventBody::TransactionUpdated(d) => serde_json::to_value(d)?,
            EventBody::TransactionDeleted(d) => serde_json::to_value(d)?,
            EventBody::Undo(d) => serde_json::to_value(d)?,
        };
        Ok(value)
    }

    pub fn event_type(&self) -> EventType {
        match self {
            EventBody::ContactCreated(_) | EventBody::TransactionCreated(_) => EventType::Created,
            EventBody::ContactUpdated(_) | EventBody::TransactionUpdated(_) => EventType::Updated,
            EventBody::ContactDeleted(_) | EventBody::TransactionDeleted(_) => EventType::Deleted,
            EventBody::Undo(_) => EventType::Undo,
        }
    }
}

fn from_value<T: serde::de::DeserializeOwned>(v: Value) -> Result<T, EngineError> {
    serde_json::from_value(v).map_err(|e| EngineError::Malformed(e.to_string()))
}
