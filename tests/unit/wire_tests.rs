//! Unit tests for JSON-RPC wire classification and session-update decoding.

use serde_json::{json, Value};

use agent_conduit::acp::wire::{classify, Inbound, Notification, OutgoingRequest, SessionUpdate};
use agent_conduit::AppError;

// ── Outgoing requests ─────────────────────────────────────────────────────────

/// Requests serialise with `jsonrpc: "2.0"` and omit `params` when empty.
#[test]
fn request_omits_empty_params() {
    let line = OutgoingRequest::new("initialize", 7, None)
        .to_line()
        .expect("serialise");
    let parsed: Value = serde_json::from_str(&line).expect("valid json");

    assert_eq!(parsed["jsonrpc"], "2.0");
    assert_eq!(parsed["method"], "initialize");
    assert_eq!(parsed["id"], 7);
    assert!(
        parsed.get("params").is_none(),
        "empty params must be omitted entirely"
    );
    assert!(!line.contains('\n'), "one request must be one line");
}

/// Present params are serialised inline.
#[test]
fn request_includes_params_when_present() {
    let line = OutgoingRequest::new("session/new", 1, Some(json!({"cwd": "/tmp"})))
        .to_line()
        .expect("serialise");
    let parsed: Value = serde_json::from_str(&line).expect("valid json");

    assert_eq!(parsed["params"]["cwd"], "/tmp");
}

// ── Inbound classification ────────────────────────────────────────────────────

/// A message bearing an `id` is a response, even with a `method` present.
#[test]
fn message_with_id_is_a_response() {
    let inbound = classify(r#"{"jsonrpc":"2.0","id":3,"result":{"ok":true}}"#).expect("classify");

    match inbound {
        Inbound::Response(response) => {
            assert_eq!(response.id, 3);
            assert!(response.is_ok());
        }
        Inbound::Notification(_) => panic!("expected a response"),
    }
}

/// A message with a `method` and no `id` is a notification — exactly the
/// discriminator.
#[test]
fn method_without_id_is_a_notification() {
    let inbound = classify(r#"{"jsonrpc":"2.0","method":"session/update","params":{"x":1}}"#)
        .expect("classify");

    match inbound {
        Inbound::Notification(notification) => {
            assert_eq!(notification.method, "session/update");
            assert_eq!(notification.params["x"], 1);
        }
        Inbound::Response(_) => panic!("expected a notification"),
    }
}

/// An agent-declared error object is carried on the response.
#[test]
fn error_response_is_classified() {
    let inbound =
        classify(r#"{"jsonrpc":"2.0","id":9,"error":{"code":-32001,"message":"Session not found"}}"#)
            .expect("classify");

    match inbound {
        Inbound::Response(response) => {
            assert!(!response.is_ok());
            let error = response.error.expect("error object");
            assert_eq!(error.code, -32001);
            assert!(error.is_session_not_found());
        }
        Inbound::Notification(_) => panic!("expected a response"),
    }
}

/// Unparsable text is an `AppError::Acp`, for the read loop to skip.
#[test]
fn malformed_json_is_an_acp_error() {
    let result = classify("not-json{{{");
    assert!(
        matches!(result, Err(AppError::Acp(_))),
        "malformed line must classify as Err(AppError::Acp), got: {result:?}"
    );
}

/// A JSON object with neither `id` nor `method` fits no shape.
#[test]
fn message_with_neither_id_nor_method_is_rejected() {
    let result = classify(r#"{"jsonrpc":"2.0","params":{}}"#);
    assert!(matches!(result, Err(AppError::Acp(_))));
}

/// Unrelated error messages are not mistaken for stale sessions.
#[test]
fn generic_errors_are_not_session_not_found() {
    let inbound = classify(r#"{"id":1,"error":{"code":1,"message":"tool crashed"}}"#)
        .expect("classify");
    let Inbound::Response(response) = inbound else {
        panic!("expected a response");
    };
    assert!(!response.error.expect("error").is_session_not_found());
}

// ── Session updates ───────────────────────────────────────────────────────────

fn update_notification(params: Value) -> Notification {
    Notification {
        method: "session/update".to_owned(),
        params,
    }
}

/// The normal shape: the update object sits under `params.update`.
#[test]
fn chunk_under_params_update_is_decoded() {
    let notification = update_notification(json!({
        "sessionId": "sess-1",
        "update": {
            "sessionUpdate": "agentMessageChunk",
            "content": { "type": "text", "text": "Hi" },
        },
    }));

    match SessionUpdate::from_notification(&notification) {
        Some(SessionUpdate::MessageChunk { text }) => assert_eq!(text, "Hi"),
        other => panic!("expected MessageChunk, got: {other:?}"),
    }
}

/// Fallback shape: `params` itself carries the `sessionUpdate` discriminator.
#[test]
fn bare_params_update_shape_is_accepted() {
    let notification = update_notification(json!({
        "sessionUpdate": "agentMessageChunk",
        "content": { "text": "fallback" },
    }));

    match SessionUpdate::from_notification(&notification) {
        Some(SessionUpdate::MessageChunk { text }) => assert_eq!(text, "fallback"),
        other => panic!("expected MessageChunk, got: {other:?}"),
    }
}

/// Both discriminator spellings decode to the same variants.
#[test]
fn snake_case_spellings_are_aliases() {
    for kind in ["tool_call", "toolCall"] {
        let notification =
            update_notification(json!({ "update": { "sessionUpdate": kind, "title": "ls" } }));
        assert!(
            matches!(
                SessionUpdate::from_notification(&notification),
                Some(SessionUpdate::ToolCall(_))
            ),
            "{kind} must decode as ToolCall"
        );
    }
}

/// The legacy `session/notification` method is decoded like `session/update`.
#[test]
fn legacy_notification_method_is_accepted() {
    let notification = Notification {
        method: "session/notification".to_owned(),
        params: json!({ "update": { "sessionUpdate": "complete" } }),
    };

    assert!(matches!(
        SessionUpdate::from_notification(&notification),
        Some(SessionUpdate::Complete)
    ));
}

/// Unknown discriminators are preserved, not guessed at.
#[test]
fn unknown_update_kind_is_preserved() {
    let notification =
        update_notification(json!({ "update": { "sessionUpdate": "somethingNew" } }));

    match SessionUpdate::from_notification(&notification) {
        Some(SessionUpdate::Unknown(kind)) => assert_eq!(kind, "somethingNew"),
        other => panic!("expected Unknown, got: {other:?}"),
    }
}

/// Notifications with other methods are not session updates.
#[test]
fn unrelated_methods_are_not_updates() {
    let notification = Notification {
        method: "log/trace".to_owned(),
        params: json!({ "update": { "sessionUpdate": "complete" } }),
    };

    assert!(SessionUpdate::from_notification(&notification).is_none());
}

/// A chunk without `content.text` decodes with empty text rather than
/// failing the stream.
#[test]
fn chunk_without_text_decodes_empty() {
    let notification = update_notification(json!({
        "update": { "sessionUpdate": "agentMessageChunk", "content": { "type": "image" } },
    }));

    match SessionUpdate::from_notification(&notification) {
        Some(SessionUpdate::MessageChunk { text }) => assert!(text.is_empty()),
        other => panic!("expected MessageChunk, got: {other:?}"),
    }
}
