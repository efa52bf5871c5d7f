use serde_json::{Value, json};
use sidkit::store::StoreError;
use sidkit::store::memory::MemoryStore;
use sidkit::store::sqlite::SqliteStore;
use sidkit::store::worker::SqliteWorkerStore;
use sidkit::{AsyncSessionStore, SessionId};

async fn make_worker_store() -> SqliteWorkerStore {
    let store = SqliteWorkerStore::in_memory();
    store.init().await.expect("could not start the worker");
    store
}

/// Runs a test body against every store implementation.
macro_rules! store_test {
    ($name:ident, $body:ident) => {
        mod $name {
            use super::*;

            #[tokio::test]
            async fn memory() {
                $body(&MemoryStore::new()).await;
            }

            #[tokio::test]
            async fn sqlite() {
                $body(&SqliteStore::open_in_memory().unwrap()).await;
            }

            #[tokio::test]
            async fn sqlite_worker() {
                $body(&make_worker_store().await).await;
            }
        }
    };
}

async fn create_returns_empty_session(store: &impl AsyncSessionStore) {
    let sid = store.create_session().await.unwrap();

    assert!(store.get_session(&sid).await.unwrap().is_empty());
}
store_test!(test_create, create_returns_empty_session);

async fn created_ids_are_distinct(store: &impl AsyncSessionStore) {
    let first = store.create_session().await.unwrap();
    let second = store.create_session().await.unwrap();

    assert_ne!(first, second);
}
store_test!(test_distinct_ids, created_ids_are_distinct);

async fn set_then_get(store: &impl AsyncSessionStore) {
    let sid = store.create_session().await.unwrap();

    store.set(&sid, "abc", json!("shantaram")).await.unwrap();

    assert_eq!(
        store.get(&sid, "abc").await.unwrap(),
        Some(json!("shantaram"))
    );
}
store_test!(test_set_get, set_then_get);

async fn set_keeps_other_keys(store: &impl AsyncSessionStore) {
    let sid = store.create_session().await.unwrap();

    store.set(&sid, "name", json!("shantaram")).await.unwrap();
    store.set(&sid, "website", json!("shantaram.xyz")).await.unwrap();
    store.set(&sid, "name", json!("lin")).await.unwrap();

    let document = store.get_session(&sid).await.unwrap();
    assert_eq!(document.len(), 2);
    assert_eq!(document.get("name"), Some(&json!("lin")));
    assert_eq!(document.get("website"), Some(&json!("shantaram.xyz")));
}
store_test!(test_set_keeps_other_keys, set_keeps_other_keys);

async fn get_missing_key(store: &impl AsyncSessionStore) {
    let sid = store.create_session().await.unwrap();

    assert_eq!(store.get(&sid, "nothing here").await.unwrap(), None);
}
store_test!(test_get_missing_key, get_missing_key);

async fn falsy_values_are_present(store: &impl AsyncSessionStore) {
    let sid = store.create_session().await.unwrap();

    for (key, value) in [
        ("zero", json!(0)),
        ("false", json!(false)),
        ("empty", json!("")),
        ("null", Value::Null),
    ] {
        store.set(&sid, key, value.clone()).await.unwrap();
        assert_eq!(store.get(&sid, key).await.unwrap(), Some(value));
    }
}
store_test!(test_falsy_values, falsy_values_are_present);

async fn delete_key(store: &impl AsyncSessionStore) {
    let sid = store.create_session().await.unwrap();
    store.set(&sid, "abc", json!("shantaram")).await.unwrap();
    store.set(&sid, "keep", json!(1)).await.unwrap();

    store.delete(&sid, "abc").await.unwrap();
    // deleting an absent key is fine
    store.delete(&sid, "abc").await.unwrap();

    assert_eq!(store.get(&sid, "abc").await.unwrap(), None);
    assert_eq!(store.get(&sid, "keep").await.unwrap(), Some(json!(1)));
}
store_test!(test_delete, delete_key);

async fn clear_session(store: &impl AsyncSessionStore) {
    let sid = store.create_session().await.unwrap();
    store.set(&sid, "abc", json!("shantaram")).await.unwrap();
    store.set(&sid, "def", json!([1, 2, 3])).await.unwrap();

    store.clear(&sid).await.unwrap();

    assert!(store.get_session(&sid).await.unwrap().is_empty());
    assert_eq!(store.get(&sid, "abc").await.unwrap(), None);
}
store_test!(test_clear, clear_session);

async fn never_created_session_is_empty(store: &impl AsyncSessionStore) {
    let sid = SessionId::generate();

    assert_eq!(store.get(&sid, "abc").await.unwrap(), None);
    store.set(&sid, "abc", json!("shantaram")).await.unwrap();
    assert_eq!(
        store.get(&sid, "abc").await.unwrap(),
        Some(json!("shantaram"))
    );
}
store_test!(test_get_or_create, never_created_session_is_empty);

async fn sessions_are_isolated(store: &impl AsyncSessionStore) {
    let first = store.create_session().await.unwrap();
    let second = store.create_session().await.unwrap();

    store.set(&first, "abc", json!("first")).await.unwrap();
    store.set(&second, "abc", json!("second")).await.unwrap();
    store.clear(&second).await.unwrap();

    assert_eq!(store.get(&first, "abc").await.unwrap(), Some(json!("first")));
    assert_eq!(store.get(&second, "abc").await.unwrap(), None);
}
store_test!(test_isolation, sessions_are_isolated);

async fn remove_session(store: &impl AsyncSessionStore) {
    let sid = store.create_session().await.unwrap();
    store.set(&sid, "abc", json!("shantaram")).await.unwrap();

    store.remove_session(&sid).await.unwrap();
    store.remove_session(&sid).await.unwrap();

    // fetching again starts over with an empty document
    assert!(store.get_session(&sid).await.unwrap().is_empty());
}
store_test!(test_remove_session, remove_session);

async fn nested_values(store: &impl AsyncSessionStore) {
    let sid = store.create_session().await.unwrap();
    let cart = json!({"items": [{"sku": "a-1", "qty": 2}], "total": 19.5});

    store.set(&sid, "cart", cart.clone()).await.unwrap();

    assert_eq!(store.get(&sid, "cart").await.unwrap(), Some(cart));
}
store_test!(test_nested_values, nested_values);

async fn document_follows_mutations(store: &impl AsyncSessionStore) {
    let sid = store.create_session().await.unwrap();

    store.set(&sid, "name", json!("shantaram")).await.unwrap();
    store.set(&sid, "website", json!("shantaram.xyz")).await.unwrap();
    assert_eq!(
        Value::from(store.get_session(&sid).await.unwrap()),
        json!({"name": "shantaram", "website": "shantaram.xyz"})
    );

    store.delete(&sid, "name").await.unwrap();
    assert_eq!(store.get(&sid, "name").await.unwrap(), None);
    assert_eq!(
        Value::from(store.get_session(&sid).await.unwrap()),
        json!({"website": "shantaram.xyz"})
    );

    store.clear(&sid).await.unwrap();
    assert_eq!(Value::from(store.get_session(&sid).await.unwrap()), json!({}));
}
store_test!(test_document_follows_mutations, document_follows_mutations);

async fn get_session_is_idempotent(store: &impl AsyncSessionStore) {
    let sid = store.create_session().await.unwrap();
    store.set(&sid, "abc", json!("shantaram")).await.unwrap();

    let first = store.get_session(&sid).await.unwrap();
    let second = store.get_session(&sid).await.unwrap();
    assert_eq!(first, second);

    let fresh = SessionId::generate();
    let first = store.get_session(&fresh).await.unwrap();
    let second = store.get_session(&fresh).await.unwrap();
    assert_eq!(first, second);
    assert!(second.is_empty());
}
store_test!(test_get_session_idempotent, get_session_is_idempotent);

#[tokio::test]
async fn worker_store_reports_malformed_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.sqlite3");
    let store = SqliteWorkerStore::new(&path);
    store.init().await.unwrap();
    let sid = store.create_session().await.unwrap();

    rusqlite::Connection::open(&path)
        .unwrap()
        .execute(
            "UPDATE sessions SET data = '[1, 2]' WHERE id = ?1",
            [sid.as_str()],
        )
        .unwrap();

    let error = store.get(&sid, "abc").await.unwrap_err();
    assert!(matches!(error, StoreError::MalformedDocument(_)));
    let error = store.set(&sid, "abc", json!(1)).await.unwrap_err();
    assert!(matches!(error, StoreError::MalformedDocument(_)));
}

#[tokio::test]
async fn worker_store_is_unusable_before_init() {
    let store = SqliteWorkerStore::in_memory();
    let sid = SessionId::generate();

    let error = store.set(&sid, "abc", json!("shantaram")).await.unwrap_err();
    assert!(matches!(error, StoreError::NotInitialized));

    store.init().await.unwrap();
    store.set(&sid, "abc", json!("shantaram")).await.unwrap();
    assert_eq!(
        store.get(&sid, "abc").await.unwrap(),
        Some(json!("shantaram"))
    );
}

#[tokio::test]
async fn worker_store_persists_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.sqlite3");

    let sid = {
        let store = SqliteWorkerStore::new(&path);
        store.init().await.unwrap();
        let sid = store.create_session().await.unwrap();
        store.set(&sid, "abc", json!("shantaram")).await.unwrap();
        sid
    };

    let store = SqliteWorkerStore::new(&path);
    store.init().await.unwrap();
    assert_eq!(
        store.get(&sid, "abc").await.unwrap(),
        Some(json!("shantaram"))
    );
}
