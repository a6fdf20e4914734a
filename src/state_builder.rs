//! Pure projection of an event list into contacts, transactions and
//! balances. Given the same wallet partition, every device computes an
//! identical [`AppState`]; the output vectors are sorted by id so equality
//! holds down to the serialized bytes.

use crate::events::{canonicalize_timestamp, Event, EventBody, EventType};
use crate::models::{AppState, Contact, Transaction};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Full rebuild from scratch.
pub fn build(events: &[Event]) -> AppState {
    apply(AppState::default(), events)
}

/// Fold `new_events` onto an already-built state, then recompute balances.
/// The snapshot path uses this; it must never be handed a batch containing
/// an UNDO that references events outside `new_events`.
pub fn apply(state: AppState, new_events: &[Event]) -> AppState {
    let mut contacts: HashMap<String, Contact> = state
        .contacts
        .into_iter()
        .map(|c| (c.id.clone(), c))
        .collect();
    let mut transactions: HashMap<String, Transaction> = state
        .transactions
        .into_iter()
        .map(|t| (t.id.clone(), t))
        .collect();

    let mut sorted: Vec<&Event> = new_events.iter().collect();
    sorted.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.id.as_str().cmp(b.id.as_str()))
    });

    let undone: HashSet<String> = sorted
        .iter()
        .filter(|e| e.event_type == EventType::Undo)
        .filter_map(|e| match EventBody::parse(e) {
            Ok(EventBody::Undo(u)) => Some(u.undone_event_id),
            _ => {
                warn!(id = %e.id, "dropping UNDO event without a parseable reference");
                None
            }
        })
        .collect();

    for event in sorted {
        if event.event_type == EventType::Undo || undone.contains(event.id.as_str()) {
            continue;
        }
        let body = match EventBody::parse(event) {
            Ok(body) => body,
            Err(e) => {
                warn!(id = %event.id, error = %e, "skipping malformed event");
                continue;
            }
        };
        match body {
            EventBody::ContactCreated(d) => {
                let ts = payload_ts(&d.timestamp, event);
                contacts.insert(
                    event.aggregate_id.clone(),
                    Contact {
                        id: event.aggregate_id.clone(),
                        name: d.name,
                        username: d.username,
                        phone: d.phone,
                        email: d.email,
                        notes: d.notes,
                        created_at: ts.clone(),
                        updated_at: ts,
                        is_synced: event.synced,
                        balance: 0,
                        wallet_id: record_wallet(d.wallet_id, event),
                    },
                );
            }
            EventBody::ContactUpdated(p) => {
                if let Some(existing) = contacts.get_mut(&event.aggregate_id) {
                    if let Some(name) = p.name {
                        existing.name = name;
                    }
                    existing.username = p.username.or(existing.username.take());
                    existing.phone = p.phone.or(existing.phone.take());
                    existing.email = p.email.or(existing.email.take());
                    existing.notes = p.notes.or(existing.notes.take());
                    existing.wallet_id = p.wallet_id.or(existing.wallet_id.take());
                    existing.updated_at = payload_ts(&p.timestamp, event);
                    existing.is_synced = event.synced;
                }
            }
            EventBody::ContactDeleted(_) => {
                contacts.remove(&event.aggregate_id);
                // A contact takes its transactions with it.
                transactions.retain(|_, t| t.contact_id != event.aggregate_id);
            }
            EventBody::TransactionCreated(d) => {
                if d.contact_id.is_empty() || !contacts.contains_key(&d.contact_id) {
                    continue;
                }
                let ts = payload_ts(&d.timestamp, event);
                transactions.insert(
                    event.aggregate_id.clone(),
                    Transaction {
                        id: event.aggregate_id.clone(),
                        contact_id: d.contact_id,
                        kind: d.kind,
                        direction: d.direction,
                        amount: d.amount,
                        currency: d.currency,
                        description: d.description,
                        transaction_date: d
                            .transaction_date
                            .as_deref()
                            .and_then(normalize_date)
                            .unwrap_or_else(today),
                        due_date: d.due_date.as_deref().and_then(normalize_date),
                        created_at: ts.clone(),
                        updated_at: ts,
                        is_synced: event.synced,
                        wallet_id: record_wallet(d.wallet_id, event),
                    },
                );
            }
            EventBody::TransactionUpdated(p) => {
                if let Some(existing) = transactions.get_mut(&event.aggregate_id) {
                    if let Some(contact_id) = p.contact_id {
                        existing.contact_id = contact_id;
                    }
                    if let Some(kind) = p.kind {
                        existing.kind = kind;
                    }
                    if let Some(direction) = p.direction {
                        existing.direction = direction;
                    }
                    if let Some(amount) = p.amount {
                        existing.amount = amount;
                    }
                    if let Some(currency) = p.currency {
                        existing.currency = currency;
                    }
                    existing.description = p.description.or(existing.description.take());
                    if let Some(date) = p.transaction_date.as_deref().and_then(normalize_date) {
                        existing.transaction_date = date;
                    }
                    existing.due_date = p
                        .due_date
                        .as_deref()
                        .and_then(normalize_date)
                        .or(existing.due_date.take());
                    existing.wallet_id = p.wallet_id.or(existing.wallet_id.take());
                    existing.updated_at = payload_ts(&p.timestamp, event);
                    existing.is_synced = event.synced;
                }
            }
            EventBody::TransactionDeleted(_) => {
                transactions.remove(&event.aggregate_id);
            }
            EventBody::Undo(_) => {}
        }
    }

    recompute_balances(&mut contacts, &transactions);

    let mut out = AppState {
        contacts: contacts.into_values().collect(),
        transactions: transactions.into_values().collect(),
    };
    out.sort();
    out
}

fn recompute_balances(
    contacts: &mut HashMap<String, Contact>,
    transactions: &HashMap<String, Transaction>,
) {
    for c in contacts.values_mut() {
        c.balance = 0;
    }
    for t in transactions.values() {
        if let Some(c) = contacts.get_mut(&t.contact_id) {
            c.balance += t.direction.signed(t.amount);
        }
    }
}

fn payload_ts(payload: &Option<String>, event: &Event) -> String {
    payload
        .as_deref()
        .and_then(canonicalize_timestamp)
        .unwrap_or_else(|| event.timestamp_text())
}

fn record_wallet(payload: Option<String>, event: &Event) -> Option<String> {
    payload.or_else(|| event.wallet_id.as_ref().map(|w| w.as_str().to_string()))
}

/// Accepts `YYYY-MM-DD` as well as full datetimes; keeps the date part.
fn normalize_date(s: &str) -> Option<String> {
    let date_part = s.split(['T', ' ']).next().unwrap_or(s);
    chrono::NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

fn today() -> String {
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_normalization_keeps_the_date_part() {
        assert_eq!(normalize_date("2026-02-04").as_deref(), Some("2026-02-04"));
        assert_eq!(
            normalize_date("2026-02-04T10:30:00Z").as_deref(),
            Some("2026-02-04")
        );
        assert_eq!(
            normalize_date("2026-02-04 10:30:00").as_deref(),
            Some("2026-02-04")
        );
        assert_eq!(normalize_date("04/02/2026"), None);
    }
}
