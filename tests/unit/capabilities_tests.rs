//! Unit tests for the capability set and its cache.

use serde_json::json;

use agent_conduit::acp::capabilities::{CapabilityCache, CapabilitySet};

/// A full `initialize` result populates every flag.
#[test]
fn full_initialize_result_is_parsed() {
    let result = json!({
        "protocolVersion": "v1",
        "agentCapabilities": {
            "loadSession": true,
            "promptCapabilities": { "image": true, "audio": false, "embeddedContext": true },
        },
    });

    let set = CapabilitySet::from_initialize_result(&result);
    assert!(set.load_session);
    assert!(set.prompt_capabilities.image);
    assert!(!set.prompt_capabilities.audio);
    assert!(set.prompt_capabilities.embedded_context);
}

/// Missing fields default to `false`; an absent capabilities object yields
/// an all-false set.
#[test]
fn missing_fields_default_to_false() {
    let sparse = CapabilitySet::from_initialize_result(&json!({
        "agentCapabilities": { "loadSession": true },
    }));
    assert!(sparse.load_session);
    assert!(!sparse.prompt_capabilities.image);

    let absent = CapabilitySet::from_initialize_result(&json!({ "protocolVersion": "v1" }));
    assert_eq!(absent, CapabilitySet::default());
}

/// Before any handshake every query answers `false`.
#[test]
fn empty_cache_answers_false() {
    let cache = CapabilityCache::new();

    assert!(!cache.is_negotiated());
    assert!(!cache.supports_load_session());
    assert!(!cache.supports_image_attachments());
    assert!(cache.snapshot().is_none());
}

/// A handshake result replaces the cache wholesale — flags absent from the
/// new set do not survive from the old one.
#[test]
fn replace_is_wholesale() {
    let cache = CapabilityCache::new();

    cache.replace(CapabilitySet::from_initialize_result(&json!({
        "agentCapabilities": {
            "loadSession": true,
            "promptCapabilities": { "image": true },
        },
    })));
    assert!(cache.supports_load_session());
    assert!(cache.supports_image_attachments());

    // Re-handshake with a narrower declaration.
    cache.replace(CapabilitySet::from_initialize_result(&json!({
        "agentCapabilities": { "promptCapabilities": { "image": true } },
    })));
    assert!(
        !cache.supports_load_session(),
        "old loadSession flag must not survive the replacement"
    );
    assert!(cache.supports_image_attachments());
}

/// Clearing the cache returns it to the pre-handshake state.
#[test]
fn clear_resets_to_unnegotiated() {
    let cache = CapabilityCache::new();
    cache.replace(CapabilitySet::from_initialize_result(&json!({
        "agentCapabilities": { "loadSession": true },
    })));
    assert!(cache.is_negotiated());

    cache.clear();
    assert!(!cache.is_negotiated());
    assert!(!cache.supports_load_session());
}
