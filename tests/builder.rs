//! State builder properties: determinism, order-independence, undo
//! correctness, merge semantics and the balance law.

use debitum_engine::events::{parse_timestamp, AggregateType, Event, EventType};
use debitum_engine::ids::EventId;
use debitum_engine::state_builder::{apply, build};
use serde_json::{json, Value};

fn ev(
    aggregate_type: AggregateType,
    event_type: EventType,
    aggregate_id: &str,
    data: Value,
    ts: &str,
) -> Event {
    Event {
        id: EventId::random(),
        wallet_id: None,
        aggregate_type,
        aggregate_id: aggregate_id.to_string(),
        event_type,
        event_data: data,
        timestamp: parse_timestamp(ts).expect("test timestamp"),
        version: 1,
        synced: false,
    }
}

fn contact_created(id: &str, name: &str, ts: &str) -> Event {
    ev(
        AggregateType::Contact,
        EventType::Created,
        id,
        json!({"name": name, "timestamp": ts}),
        ts,
    )
}

fn txn_created(id: &str, contact: &str, direction: &str, amount: i64, ts: &str) -> Event {
    ev(
        AggregateType::Transaction,
        EventType::Created,
        id,
        json!({
            "contact_id": contact,
            "type": "money",
            "direction": direction,
            "amount": amount,
            "currency": "IQD",
            "transaction_date": "2026-02-04",
            "timestamp": ts,
        }),
        ts,
    )
}

fn undo(target: &Event, ts: &str) -> Event {
    ev(
        target.aggregate_type,
        EventType::Undo,
        &target.aggregate_id,
        json!({"undone_event_id": target.id.as_str(), "timestamp": ts}),
        ts,
    )
}

#[test]
fn build_is_deterministic() {
    let events = vec![
        contact_created("A", "John", "2026-02-04T10:00:00Z"),
        txn_created("t1", "A", "lent", 100_000, "2026-02-04T10:00:01Z"),
        txn_created("t2", "A", "owed", 30_000, "2026-02-04T10:00:02Z"),
    ];
    let a = build(&events);
    let b = build(&events);
    assert_eq!(a, b);
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap(),
        "equal states must serialize identically"
    );
}

#[test]
fn build_is_input_order_independent() {
    let events = vec![
        contact_created("A", "John", "2026-02-04T10:00:00Z"),
        contact_created("B", "Jane", "2026-02-04T10:00:01Z"),
        txn_created("t1", "A", "lent", 500, "2026-02-04T10:00:02Z"),
        txn_created("t2", "B", "owed", 700, "2026-02-04T10:00:03Z"),
        ev(
            AggregateType::Contact,
            EventType::Updated,
            "A",
            json!({"name": "John Q", "timestamp": "2026-02-04T10:00:04Z"}),
            "2026-02-04T10:00:04Z",
        ),
    ];
    let mut scrambled = events.clone();
    scrambled.reverse();
    scrambled.rotate_left(2);
    assert_eq!(build(&events), build(&scrambled));
}

#[test]
fn lent_and_owed_balance_out() {
    // Lend 100000, get owed 30000: the contact owes us 70000 net.
    let events = vec![
        contact_created("A", "John", "2026-02-04T10:00:00Z"),
        txn_created("t1", "A", "lent", 100_000, "2026-02-04T10:00:01Z"),
    ];
    let state = build(&events);
    assert_eq!(state.contact("A").unwrap().balance, 100_000);

    let mut events = events;
    events.push(txn_created("t2", "A", "owed", 30_000, "2026-02-04T10:00:02Z"));
    let state = build(&events);
    assert_eq!(state.contact("A").unwrap().balance, 70_000);
    assert_eq!(state.transactions.len(), 2);
}

#[test]
fn balance_law_holds_across_contacts() {
    let events = vec![
        contact_created("A", "John", "2026-02-04T10:00:00Z"),
        contact_created("B", "Jane", "2026-02-04T10:00:01Z"),
        txn_created("t1", "A", "lent", 1_000, "2026-02-04T10:00:02Z"),
        txn_created("t2", "A", "owed", 400, "2026-02-04T10:00:03Z"),
        txn_created("t3", "B", "owed", 250, "2026-02-04T10:00:04Z"),
    ];
    let state = build(&events);
    for contact in &state.contacts {
        let expected: i64 = state
            .transactions
            .iter()
            .filter(|t| t.contact_id == contact.id)
            .map(|t| t.direction.signed(t.amount))
            .sum();
        assert_eq!(contact.balance, expected, "contact {}", contact.id);
    }
}

#[test]
fn undone_events_vanish_from_the_projection() {
    let txn = txn_created("t1", "A", "lent", 50_000, "2026-02-04T10:00:01Z");
    let mut events = vec![
        contact_created("A", "Jane", "2026-02-04T10:00:00Z"),
        txn.clone(),
        undo(&txn, "2026-02-04T10:00:03Z"),
    ];
    let with_undo = build(&events);
    assert_eq!(with_undo.contact("A").unwrap().balance, 0);
    assert!(with_undo.transactions.is_empty());

    // Removing the undone event (and keeping the UNDO) changes nothing.
    events.remove(1);
    assert_eq!(build(&events), with_undo);
}

#[test]
fn contact_update_merges_only_present_fields() {
    let events = vec![
        ev(
            AggregateType::Contact,
            EventType::Created,
            "A",
            json!({
                "name": "John",
                "phone": "0770",
                "notes": "friend",
                "timestamp": "2026-02-04T10:00:00Z",
            }),
            "2026-02-04T10:00:00Z",
        ),
        ev(
            AggregateType::Contact,
            EventType::Updated,
            "A",
            json!({"phone": "0771", "timestamp": "2026-02-04T10:00:05Z"}),
            "2026-02-04T10:00:05Z",
        ),
    ];
    let state = build(&events);
    let c = state.contact("A").unwrap();
    assert_eq!(c.name, "John");
    assert_eq!(c.phone.as_deref(), Some("0771"));
    assert_eq!(c.notes.as_deref(), Some("friend"));
}

#[test]
fn transaction_for_unknown_contact_is_ignored() {
    let events = vec![txn_created("t1", "ghost", "lent", 100, "2026-02-04T10:00:00Z")];
    let state = build(&events);
    assert!(state.transactions.is_empty());

    // An update or delete before the create is ignored the same way.
    let events = vec![
        ev(
            AggregateType::Contact,
            EventType::Updated,
            "A",
            json!({"name": "early", "timestamp": "2026-02-04T09:00:00Z"}),
            "2026-02-04T09:00:00Z",
        ),
        contact_created("A", "John", "2026-02-04T10:00:00Z"),
    ];
    assert_eq!(build(&events).contact("A").unwrap().name, "John");
}

#[test]
fn deleting_a_contact_takes_its_transactions() {
    let events = vec![
        contact_created("A", "John", "2026-02-04T10:00:00Z"),
        contact_created("B", "Jane", "2026-02-04T10:00:01Z"),
        txn_created("t1", "A", "lent", 100, "2026-02-04T10:00:02Z"),
        txn_created("t2", "B", "lent", 200, "2026-02-04T10:00:03Z"),
        ev(
            AggregateType::Contact,
            EventType::Deleted,
            "A",
            json!({"timestamp": "2026-02-04T10:00:04Z"}),
            "2026-02-04T10:00:04Z",
        ),
    ];
    let state = build(&events);
    assert!(state.contact("A").is_none());
    assert!(state.transaction("t1").is_none());
    assert_eq!(state.contact("B").unwrap().balance, 200);
}

#[test]
fn malformed_events_are_skipped_without_sinking_the_batch() {
    let events = vec![
        contact_created("A", "John", "2026-02-04T10:00:00Z"),
        ev(
            AggregateType::Transaction,
            EventType::Created,
            "t1",
            json!("not an object"),
            "2026-02-04T10:00:01Z",
        ),
        txn_created("t2", "A", "lent", 300, "2026-02-04T10:00:02Z"),
    ];
    let state = build(&events);
    assert_eq!(state.transactions.len(), 1);
    assert_eq!(state.contact("A").unwrap().balance, 300);
}

#[test]
fn incremental_apply_matches_full_build() {
    let older = vec![
        contact_created("A", "John", "2026-02-04T10:00:00Z"),
        txn_created("t1", "A", "lent", 1_000, "2026-02-04T10:00:01Z"),
    ];
    let newer = vec![
        txn_created("t2", "A", "owed", 400, "2026-02-04T10:00:02Z"),
        ev(
            AggregateType::Contact,
            EventType::Updated,
            "A",
            json!({"name": "John Q", "timestamp": "2026-02-04T10:00:03Z"}),
            "2026-02-04T10:00:03Z",
        ),
    ];
    let mut all = older.clone();
    all.extend(newer.iter().cloned());
    assert_eq!(apply(build(&older), &newer), build(&all));
}
