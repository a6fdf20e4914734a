//! Push/pull flows against the in-memory server: offline catch-up,
//! notification-driven pulls, divergence repair, and idempotence.

mod common;

use common::{remote_contact_created, test_app};
use debitum_engine::api::ServerApi;
use debitum_engine::db::{NewContact, NewTransaction};
use debitum_engine::ids::ContactId;
use debitum_engine::models::{Currency, TransactionDirection, TransactionType};
use debitum_engine::store::last_sync_key;
use std::time::{Duration, Instant};

fn new_contact(name: &str) -> NewContact {
    NewContact {
        name: name.to_string(),
        username: None,
        phone: None,
        email: None,
        notes: None,
    }
}

fn new_txn(contact: &ContactId, amount: i64) -> NewTransaction {
    NewTransaction {
        contact_id: contact.clone(),
        kind: TransactionType::Money,
        direction: TransactionDirection::Lent,
        amount,
        currency: Currency::IQD,
        description: None,
        transaction_date: "2026-02-04".to_string(),
        due_date: None,
    }
}

#[test]
fn offline_writes_catch_up_after_reconnect() {
    let app = test_app();
    app.server.set_offline(true);

    let mut contacts = Vec::new();
    for name in ["A", "B", "C"] {
        contacts.push(app.engine.db.create_contact(new_contact(name)).unwrap());
    }
    let first = ContactId::parse(&contacts[0].id).unwrap();
    app.engine.db.create_transaction(new_txn(&first, 100)).unwrap();
    app.engine.db.create_transaction(new_txn(&first, 200)).unwrap();

    assert_eq!(app.engine.store.get_unsynced(&app.wallet).unwrap().len(), 5);
    let err = app.engine.sync.push_pending().unwrap_err();
    assert!(err.is_retryable(), "offline push must be retryable, got {err}");

    app.server.set_offline(false);
    app.engine.sync.on_back_online();
    let report = app.engine.sync.push_pending().unwrap().unwrap();
    assert_eq!(report.accepted, 5);
    assert_eq!(report.remaining, 0);

    assert!(app.engine.store.get_unsynced(&app.wallet).unwrap().is_empty());
    assert_eq!(
        app.engine.store.event_hash(&app.wallet).unwrap(),
        app.server.hash(),
        "client and server hashes must agree after the push"
    );
}

#[test]
fn notification_pulls_a_server_originated_change() {
    let app = test_app();
    let contact_id = ContactId::random();
    app.server
        .seed(remote_contact_created(&app.wallet, &contact_id, "Remote"));

    app.engine.sync.on_realtime_notification("{\"anything\": 1}");

    let contacts = app.engine.db.contacts().unwrap();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].name, "Remote");
    assert!(contacts[0].is_synced);
    let events = app.engine.db.events().unwrap();
    assert!(events[0].synced, "pulled events arrive already synced");
    assert!(
        app.engine
            .store
            .config_get(&last_sync_key(&app.wallet))
            .unwrap()
            .is_some(),
        "watermark must be set after a pull"
    );
}

#[test]
fn pull_twice_changes_nothing_the_second_time() {
    let app = test_app();
    app.server
        .seed(remote_contact_created(&app.wallet, &ContactId::random(), "Once"));

    let first = app.engine.sync.pull_once().unwrap();
    assert_eq!(first.inserted, 1);
    let state = app.engine.db.state().unwrap();

    let second = app.engine.sync.pull_once().unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(app.engine.db.state().unwrap(), state);
}

#[test]
fn equal_hashes_skip_the_event_fetch() {
    let app = test_app();
    // Nothing on either side: hash and count agree, no fetch happens.
    app.engine.sync.pull_once().unwrap();
    assert_eq!(app.server.fetch_event_calls(), 0);
    assert!(
        app.engine
            .store
            .config_get(&last_sync_key(&app.wallet))
            .unwrap()
            .is_some(),
        "the equal-hash path still plants a watermark"
    );
}

#[test]
fn divergent_logs_converge_after_pull_then_push() {
    let app = test_app();

    // E1 lives on both sides already.
    let e1 = remote_contact_created(&app.wallet, &ContactId::random(), "Shared");
    app.server.seed(e1.clone());
    let e1_local = e1.clone().into_event(&app.wallet, true).unwrap();
    app.engine.store.put(&e1_local).unwrap();

    // E2 is local only; E3 is server only.
    app.engine.db.create_contact(new_contact("LocalOnly")).unwrap();
    let e3 = remote_contact_created(&app.wallet, &ContactId::random(), "ServerOnly");
    app.server.seed(e3.clone());

    let pulled = app.engine.sync.pull_once().unwrap();
    assert_eq!(pulled.inserted, 1, "only E3 is new locally");
    let report = app.engine.sync.push_pending().unwrap().unwrap();
    assert_eq!(report.accepted, 1, "only E2 was unsynced");

    let mut server_ids = app.server.event_ids();
    server_ids.sort();
    let mut local_ids: Vec<String> = app
        .engine
        .store
        .get_all(&app.wallet)
        .unwrap()
        .iter()
        .map(|e| e.id.as_str().to_string())
        .collect();
    local_ids.sort();
    assert_eq!(server_ids, local_ids);
    assert_eq!(server_ids.len(), 3);
    assert_eq!(
        app.engine.store.event_hash(&app.wallet).unwrap(),
        app.server.hash()
    );
}

#[test]
fn resubmitting_a_pushed_event_conflicts_without_duplicating() {
    let app = test_app();
    app.engine.db.create_contact(new_contact("Once")).unwrap();
    let report = app.engine.sync.push_pending().unwrap().unwrap();
    assert_eq!(report.accepted, 1);
    let server_count = app.server.event_ids().len();

    // Force the same event through again.
    let event = app.engine.store.get_all(&app.wallet).unwrap().remove(0);
    let batch = vec![debitum_engine::events::WireEvent::from(&event)];
    let outcome = app.server.push_events(&app.wallet, &batch).unwrap();
    assert_eq!(outcome.accepted.len(), 0);
    assert_eq!(outcome.conflicts.len(), 1);
    assert_eq!(app.server.event_ids().len(), server_count, "no duplicate stored");
}

#[test]
fn auth_failures_raise_the_sync_error_flag_once() {
    let app = test_app();
    app.server.set_auth_ok(false);
    app.server
        .seed(remote_contact_created(&app.wallet, &ContactId::random(), "X"));

    assert!(!app.engine.sync.has_sync_error());
    app.engine.sync.handle_server_to_local_sync_request();
    assert!(app.engine.sync.has_sync_error());

    app.server.set_auth_ok(true);
    app.engine.sync.clear_sync_error();
    app.engine.sync.handle_server_to_local_sync_request();
    assert!(!app.engine.sync.has_sync_error());
    assert_eq!(app.engine.db.contacts().unwrap().len(), 1);
}

#[test]
fn synced_flags_never_flip_back() {
    let app = test_app();
    app.engine.db.create_contact(new_contact("Keep")).unwrap();
    app.engine.sync.push_pending().unwrap();
    assert!(app.engine.db.events().unwrap()[0].synced);

    // A later pull that re-delivers the event must not unmark it.
    app.engine.sync.pull_once().unwrap();
    assert!(app.engine.db.events().unwrap()[0].synced);
}

#[test]
fn started_engine_pushes_writes_in_the_background() {
    let app = test_app();
    app.engine.start();

    app.engine.db.create_contact(new_contact("Background")).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if app.engine.store.get_unsynced(&app.wallet).unwrap().is_empty() {
            break;
        }
        assert!(Instant::now() < deadline, "push worker never drained the queue");
        std::thread::sleep(Duration::from_millis(50));
    }
    assert_eq!(app.server.event_ids().len(), 1);

    app.engine.stop();
}
