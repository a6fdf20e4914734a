//! Local database facade: every write appends an event, rebuilds the
//! projection, and signals the push worker. The caller sees the updated
//! projection before the call returns; the server push completes later.

use crate::context::SessionContext;
use crate::error::EngineError;
use crate::events::{
    now_timestamp, AggregateType, ContactData, ContactPatch, Event, EventBody, EventType,
    TombstoneData, TransactionData, TransactionPatch, UndoData,
};
use crate::ids::{ContactId, TransactionId, WalletId};
use crate::models::{
    AppState, Contact, Currency, Transaction, TransactionDirection, TransactionType,
};
use crate::snapshot;
use crate::store::EventStore;
use crate::sync::PushSignal;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::debug;

/// How long after an event the same aggregate can still be "undone" by
/// appending an UNDO instead of a DELETED.
pub const UNDO_WINDOW_SECS: i64 = 5;

pub struct NewContact {
    pub name: String,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
}

/// Contact update; None fields keep their prior value.
#[derive(Default)]
pub struct ContactUpdate {
    pub name: Option<String>,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
}

pub struct NewTransaction {
    pub contact_id: ContactId,
    pub kind: TransactionType,
    pub direction: TransactionDirection,
    pub amount: i64,
    pub currency: Currency,
    pub description: Option<String>,
    /// `YYYY-MM-DD`
    pub transaction_date: String,
    pub due_date: Option<String>,
}

/// Transaction update; None fields keep their prior value.
#[derive(Default)]
pub struct TransactionUpdate {
    pub contact_id: Option<ContactId>,
    pub kind: Option<TransactionType>,
    pub direction: Option<TransactionDirection>,
    pub amount: Option<i64>,
    pub currency: Option<Currency>,
    pub description: Option<String>,
    pub transaction_date: Option<String>,
    pub due_date: Option<String>,
}

pub struct LocalDb {
    store: Arc<EventStore>,
    session: Arc<SessionContext>,
    push_signal: PushSignal,
}

impl LocalDb {
    pub fn new(
        store: Arc<EventStore>,
        session: Arc<SessionContext>,
        push_signal: PushSignal,
    ) -> Self {
        Self {
            store,
            session,
            push_signal,
        }
    }

    fn wallet(&self) -> Result<WalletId, EngineError> {
        self.session.current_wallet().ok_or(EngineError::NoWallet)
    }

    /// Append, rebuild, persist the projection, signal the push worker.
    fn commit(
        &self,
        wallet: &WalletId,
        aggregate_type: AggregateType,
        aggregate_id: &str,
        body: EventBody,
    ) -> Result<AppState, EngineError> {
        let event_type = body.event_type();
        let data = body.to_value()?;
        debug!(wallet = %wallet, aggregate = %aggregate_id, kind = event_type.as_str(), "appending event");
        self.store
            .append(wallet, aggregate_type, aggregate_id, event_type, data, 1)?;
        let state = self.rebuild_wallet(wallet, event_type == EventType::Undo)?;
        self.push_signal.raise();
        Ok(state)
    }

    /// Recompute and persist the wallet's projection, creating a snapshot
    /// when the policy calls for one.
    pub fn rebuild_wallet(
        &self,
        wallet: &WalletId,
        batch_had_undo: bool,
    ) -> Result<AppState, EngineError> {
        let state = snapshot::rebuild(&self.store, wallet)?;
        self.store.save_projection(wallet, &state)?;
        snapshot::maybe_snapshot(&self.store, wallet, &state, batch_had_undo)?;
        Ok(state)
    }

    // --- Contacts ---

    pub fn create_contact(&self, input: NewContact) -> Result<Contact, EngineError> {
        let wallet = self.wallet()?;
        let id = ContactId::random();
        let body = EventBody::ContactCreated(ContactData {
            name: input.name,
            username: input.username,
            phone: input.phone,
            email: input.email,
            notes: input.notes,
            comment: None,
            timestamp: Some(now_timestamp()),
            wallet_id: Some(wallet.as_str().to_string()),
        });
        let state = self.commit(&wallet, AggregateType::Contact, id.as_str(), body)?;
        state
            .contact(id.as_str())
            .cloned()
            .ok_or(EngineError::NotFound("contact"))
    }

    pub fn update_contact(
        &self,
        id: &ContactId,
        update: ContactUpdate,
    ) -> Result<Contact, EngineError> {
        let wallet = self.wallet()?;
        let body = EventBody::ContactUpdated(ContactPatch {
            name: update.name,
            username: update.username,
            phone: update.phone,
            email: update.email,
            notes: update.notes,
            comment: None,
            timestamp: Some(now_timestamp()),
            wallet_id: Some(wallet.as_str().to_string()),
        });
        let state = self.commit(&wallet, AggregateType::Contact, id.as_str(), body)?;
        state
            .contact(id.as_str())
            .cloned()
            .ok_or(EngineError::NotFound("contact"))
    }

    /// Delete a contact. Within the undo window of its last event this
    /// appends an UNDO instead of a DELETED, which rolls the aggregate back
    /// rather than tombstoning it.
    pub fn delete_contact(&self, id: &ContactId) -> Result<(), EngineError> {
        self.delete_aggregate(AggregateType::Contact, id.as_str(), "Contact deleted")
    }

    pub fn undo_contact_action(&self, id: &ContactId) -> Result<(), EngineError> {
        self.undo_aggregate(AggregateType::Contact, id.as_str(), "contact")
    }

    pub fn bulk_delete_contacts(&self, ids: &[ContactId]) -> Result<(), EngineError> {
        for id in ids {
            self.delete_contact(id)?;
        }
        Ok(())
    }

    // --- Transactions ---

    pub fn create_transaction(&self, input: NewTransaction) -> Result<Transaction, EngineError> {
        let wallet = self.wallet()?;
        if input.amount < 0 {
            return Err(EngineError::Malformed(format!(
                "amount must be non-negative, got {}",
                input.amount
            )));
        }
        let transaction_date = parse_date(&input.transaction_date, "transaction_date")?;
        let due_date = input
            .due_date
            .as_deref()
            .map(|d| parse_date(d, "due_date"))
            .transpose()?;
        let id = TransactionId::random();
        let body = EventBody::TransactionCreated(TransactionData {
            contact_id: input.contact_id.as_str().to_string(),
            kind: input.kind,
            direction: input.direction,
            amount: input.amount,
            currency: input.currency,
            description: input.description,
            transaction_date: Some(transaction_date),
            due_date,
            timestamp: Some(now_timestamp()),
            wallet_id: Some(wallet.as_str().to_string()),
        });
        let state = self.commit(&wallet, AggregateType::Transaction, id.as_str(), body)?;
        state
            .transaction(id.as_str())
            .cloned()
            .ok_or(EngineError::NotFound("transaction"))
    }

    pub fn update_transaction(
        &self,
        id: &TransactionId,
        update: TransactionUpdate,
    ) -> Result<Transaction, EngineError> {
        let wallet = self.wallet()?;
        if matches!(update.amount, Some(a) if a < 0) {
            return Err(EngineError::Malformed(
                "amount must be non-negative".to_string(),
            ));
        }
        let transaction_date = update
            .transaction_date
            .as_deref()
            .map(|d| parse_date(d, "transaction_date"))
            .transpose()?;
        let due_date = update
            .due_date
            .as_deref()
            .map(|d| parse_date(d, "due_date"))
            .transpose()?;
        let body = EventBody::TransactionUpdated(TransactionPatch {
            contact_id: update.contact_id.map(|c| c.as_str().to_string()),
            kind: update.kind,
            direction: update.direction,
            amount: update.amount,
            currency: update.currency,
            description: update.description,
            transaction_date,
            due_date,
            timestamp: Some(now_timestamp()),
            wallet_id: Some(wallet.as_str().to_string()),
        });
        let state = self.commit(&wallet, AggregateType::Transaction, id.as_str(), body)?;
        state
            .transaction(id.as_str())
            .cloned()
            .ok_or(EngineError::NotFound("transaction"))
    }

    /// Delete a transaction, preferring an UNDO when the last event on the
    /// aggregate is still inside the undo window.
    pub fn delete_transaction(&self, id: &TransactionId) -> Result<(), EngineError> {
        self.delete_aggregate(AggregateType::Transaction, id.as_str(), "Transaction deleted")
    }

    pub fn undo_transaction_action(&self, id: &TransactionId) -> Result<(), EngineError> {
        self.undo_aggregate(AggregateType::Transaction, id.as_str(), "transaction")
    }

    pub fn bulk_delete_transactions(&self, ids: &[TransactionId]) -> Result<(), EngineError> {
        for id in ids {
            self.delete_transaction(id)?;
        }
        Ok(())
    }

    // --- Reads (empty when no wallet is selected) ---

    pub fn state(&self) -> Result<AppState, EngineError> {
        let Some(wallet) = self.session.current_wallet() else {
            return Ok(AppState::default());
        };
        let state = self.store.load_projection(&wallet)?;
        if state.contacts.is_empty()
            && state.transactions.is_empty()
            && self.store.event_count(&wallet)? > 0
        {
            // Events exist but the projection was never materialized here.
            return self.rebuild_wallet(&wallet, false);
        }
        Ok(state)
    }

    pub fn contacts(&self) -> Result<Vec<Contact>, EngineError> {
        Ok(self.state()?.contacts)
    }

    pub fn transactions(&self) -> Result<Vec<Transaction>, EngineError> {
        Ok(self.state()?.transactions)
    }

    pub fn contact(&self, id: &ContactId) -> Result<Option<Contact>, EngineError> {
        Ok(self.state()?.contact(id.as_str()).cloned())
    }

    pub fn transaction(&self, id: &TransactionId) -> Result<Option<Transaction>, EngineError> {
        Ok(self.state()?.transaction(id.as_str()).cloned())
    }

    pub fn events(&self) -> Result<Vec<Event>, EngineError> {
        match self.session.current_wallet() {
            Some(wallet) => Ok(self.store.get_all(&wallet)?),
            None => Ok(Vec::new()),
        }
    }

    /// Drop a wallet's local copy so the next pull rebuilds it from the
    /// server.
    pub fn clear_wallet_data(&self, wallet: &WalletId) -> Result<(), EngineError> {
        Ok(self.store.clear_wallet(wallet)?)
    }

    // --- Undo protocol ---

    fn last_event(
        &self,
        wallet: &WalletId,
        aggregate_type: AggregateType,
        aggregate_id: &str,
    ) -> Result<Option<Event>, EngineError> {
        let mut events = self
            .store
            .get_for_aggregate(wallet, aggregate_type, aggregate_id)?;
        Ok(events.pop())
    }

    fn delete_aggregate(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: &str,
        comment: &str,
    ) -> Result<(), EngineError> {
        let wallet = self.wallet()?;
        let last = self
            .last_event(&wallet, aggregate_type, aggregate_id)?
            .ok_or(EngineError::NotFound(aggregate_type.as_str()))?;
        let body = if within_undo_window(&last) {
            EventBody::Undo(UndoData {
                undone_event_id: last.id.as_str().to_string(),
                comment: Some(format!("{comment} (undo)")),
                timestamp: Some(now_timestamp()),
                wallet_id: Some(wallet.as_str().to_string()),
            })
        } else {
            let tombstone = TombstoneData {
                comment: Some(comment.to_string()),
                timestamp: Some(now_timestamp()),
                wallet_id: Some(wallet.as_str().to_string()),
            };
            match aggregate_type {
                AggregateType::Contact => EventBody::ContactDeleted(tombstone),
                AggregateType::Transaction => EventBody::TransactionDeleted(tombstone),
            }
        };
        self.commit(&wallet, aggregate_type, aggregate_id, body)?;
        Ok(())
    }

    fn undo_aggregate(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: &str,
        what: &'static str,
    ) -> Result<(), EngineError> {
        let wallet = self.wallet()?;
        let last = self
            .last_event(&wallet, aggregate_type, aggregate_id)?
            .ok_or(EngineError::NotFound(what))?;
        if !within_undo_window(&last) {
            return Err(EngineError::UndoExpired);
        }
        let body = EventBody::Undo(UndoData {
            undone_event_id: last.id.as_str().to_string(),
            comment: Some("Action undone".to_string()),
            timestamp: Some(now_timestamp()),
            wallet_id: Some(wallet.as_str().to_string()),
        });
        self.commit(&wallet, aggregate_type, aggregate_id, body)?;
        Ok(())
    }
}

fn within_undo_window(e: &Event) -> bool {
    (Utc::now() - e.timestamp).num_seconds() < UNDO_WINDOW_SECS
}

fn parse_date(s: &str, field: &str) -> Result<String, EngineError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|e| EngineError::Malformed(format!("invalid {field}: {e}")))
}
