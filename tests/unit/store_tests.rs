//! Unit tests for the persisted session-mapping store.

use std::fs;

use agent_conduit::persistence::session_store::SessionStore;
use agent_conduit::AppError;

/// Writing N mappings then reopening the store reproduces the same
/// associations.
#[test]
fn mappings_round_trip_across_instances() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("sessions.json");

    {
        let mut store = SessionStore::open(&path).expect("open");
        store.insert("chan-1", "sess-a").expect("insert");
        store.insert("chan-2", "sess-b").expect("insert");
        store.insert("chan-3", "sess-c").expect("insert");
    }

    let reopened = SessionStore::open(&path).expect("reopen");
    assert_eq!(reopened.len(), 3);
    assert_eq!(reopened.get("chan-1"), Some("sess-a"));
    assert_eq!(reopened.get("chan-2"), Some("sess-b"));
    assert_eq!(reopened.get("chan-3"), Some("sess-c"));
}

/// A missing file yields an empty store, and the parent directory is
/// created on demand.
#[test]
fn missing_file_yields_empty_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("sessions.json");

    let store = SessionStore::open(&path).expect("open");
    assert!(store.is_empty());
    assert!(path.parent().expect("parent").exists());
}

/// Every mutation rewrites the file in full — the on-disk object always
/// matches the in-memory mapping exactly.
#[test]
fn insert_rewrites_file_in_full() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("sessions.json");
    let mut store = SessionStore::open(&path).expect("open");

    store.insert("chan-42", "sess-old").expect("insert");
    store.insert("chan-42", "sess-new").expect("replace");

    let raw = fs::read_to_string(&path).expect("read");
    let on_disk: serde_json::Value = serde_json::from_str(&raw).expect("parse");
    assert_eq!(on_disk, serde_json::json!({ "chan-42": "sess-new" }));
}

/// Removal persists immediately and reports whether a mapping existed.
#[test]
fn remove_is_write_through() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("sessions.json");
    let mut store = SessionStore::open(&path).expect("open");
    store.insert("chan-1", "sess-a").expect("insert");

    assert!(store.remove("chan-1").expect("remove"));
    assert!(!store.remove("chan-1").expect("second remove"));

    let reopened = SessionStore::open(&path).expect("reopen");
    assert!(reopened.is_empty());
}

/// A corrupt mapping file is an error, not a silent empty store — starting
/// empty would orphan every mapped session.
#[test]
fn corrupt_file_is_a_persist_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("sessions.json");
    fs::write(&path, "{not valid json").expect("write");

    let result = SessionStore::open(&path);
    assert!(
        matches!(result, Err(AppError::Persist(_))),
        "corrupt file must yield AppError::Persist, got: {result:?}"
    );
}
