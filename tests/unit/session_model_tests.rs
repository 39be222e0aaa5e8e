//! Unit tests for the per-conversation session record.

use agent_conduit::models::session::SessionRecord;

/// A fresh record is not resident under any connection generation.
#[test]
fn new_record_is_not_loaded() {
    let record = SessionRecord::new("sess-1".into());

    assert_eq!(record.remote_id, "sess-1");
    assert_eq!(record.message_count, 0);
    assert!(!record.is_loaded(1));
}

/// Residency is tied to the generation it was established under; a restart
/// (new generation) invalidates it implicitly.
#[test]
fn loaded_flag_is_generation_scoped() {
    let mut record = SessionRecord::new("sess-1".into());

    record.mark_loaded(1);
    assert!(record.is_loaded(1));
    assert!(!record.is_loaded(2), "a restart must invalidate residency");

    record.mark_loaded(2);
    assert!(record.is_loaded(2));
    assert!(!record.is_loaded(1));
}

/// `touch` counts the exchange and advances the activity timestamp.
#[test]
fn touch_updates_activity() {
    let mut record = SessionRecord::new("sess-1".into());
    let created = record.last_activity;

    record.touch();
    record.touch();

    assert_eq!(record.message_count, 2);
    assert!(record.last_activity >= created);
}
