//! Session bridge: conversation keys → agent sessions.
//!
//! Callers address conversations by an opaque, stable key (a channel id, a
//! console handle). The bridge owns the mapping from that key to the agent's
//! own session id, persists it across restarts, and implements the
//! create-or-resume-or-recreate decision procedure on top of the protocol
//! engine.
//!
//! The mapping table has its own lock, independent of the protocol lock;
//! two conversations still serialise through the single agent connection,
//! but the long prompt exchange itself runs outside the table lock.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::acp::client::{AcpClient, CallOutcome, SupervisorState};
use crate::acp::wire::SessionUpdate;
use crate::config::GlobalConfig;
use crate::models::session::SessionRecord;
use crate::persistence::session_store::SessionStore;
use crate::{AppError, Result};

/// Fixed reason returned for session deletion attempts.
pub const DELETE_UNSUPPORTED: &str =
    "session deletion is not provided by the agent protocol; remove the persisted mapping out of band";

/// Fixed reason returned for session listing attempts.
pub const LIST_UNSUPPORTED: &str =
    "session listing is not provided by the agent protocol; the persisted mapping is the only inventory";

/// An image attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// MIME type, e.g. `image/png`.
    pub mime_type: String,
    /// Base64-encoded payload.
    pub data: String,
}

/// Mapping table plus its write-through backing store.
struct SessionTable {
    store: SessionStore,
    records: HashMap<String, SessionRecord>,
}

/// Bridges conversation keys to agent sessions over one shared connection.
pub struct SessionBridge {
    client: Arc<AcpClient>,
    table: Mutex<SessionTable>,
    workspace_root: PathBuf,
    instructions: Option<String>,
}

impl SessionBridge {
    /// Create a bridge over an existing client and store.
    #[must_use]
    pub fn new(
        client: Arc<AcpClient>,
        store: SessionStore,
        workspace_root: PathBuf,
        instructions: Option<String>,
    ) -> Self {
        Self {
            client,
            table: Mutex::new(SessionTable {
                store,
                records: HashMap::new(),
            }),
            workspace_root,
            instructions,
        }
    }

    /// Build the full client + store + bridge stack from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persist` if the mapping file exists but cannot be
    /// loaded.
    pub fn from_config(config: &GlobalConfig) -> Result<Self> {
        let client = Arc::new(AcpClient::new(config.agent.clone()));
        let store = SessionStore::open(config.session_map_path())?;
        Ok(Self::new(
            client,
            store,
            config.workspace_root.clone(),
            config.instructions.clone(),
        ))
    }

    /// The underlying protocol client.
    #[must_use]
    pub fn client(&self) -> &Arc<AcpClient> {
        &self.client
    }

    /// Start the agent process and perform the capability handshake.
    ///
    /// # Errors
    ///
    /// Propagates spawn and handshake failures from the client.
    pub async fn start(&self) -> Result<()> {
        self.client.start().await?;
        self.client.initialize().await?;
        Ok(())
    }

    /// Stop the agent connection. Idempotent.
    pub async fn stop(&self) {
        self.client.stop().await;
    }

    /// Send a message to the conversation's session and return the agent's
    /// reply text.
    ///
    /// Resolves (or creates) the session for `conversation_key`, then sends
    /// the prompt. When the agent reports the session as gone at prompt time
    /// — a race against its own housekeeping — the bridge recreates the
    /// session and resends exactly once, skipping any resume attempt.
    ///
    /// With `on_chunk` set, reply fragments are forwarded to the sink as
    /// they arrive and the returned string is whatever final text the agent
    /// put in the response (often empty — the chunks were the reply).
    /// Without it, the reply is reconstructed from the buffered chunk
    /// notifications.
    ///
    /// # Errors
    ///
    /// - Lifecycle errors from the client (`NotRunning`, `ShuttingDown`, …).
    /// - `AppError::Protocol` if the agent rejects the prompt.
    /// - `AppError::SessionNotFound` if the session is still gone after the
    ///   single recreation retry.
    /// - `AppError::Acp` if the stream ends before a response.
    pub async fn send_message(
        &self,
        conversation_key: &str,
        text: &str,
        attachments: &[Attachment],
        mut on_chunk: Option<&mut (dyn FnMut(&str) + Send + '_)>,
    ) -> Result<String> {
        self.ensure_started().await?;

        let session_id = self.resolve(conversation_key, false).await?;
        let prompt = self.build_prompt(text, attachments);

        let mut outcome = self
            .client
            .prompt(&session_id, prompt.clone(), on_chunk.as_deref_mut())
            .await?;

        if let Some(reason) = stale_session_reason(&outcome) {
            warn!(
                conversation_key,
                session_id, reason, "session gone at prompt time; recreating once"
            );
            let session_id = self.resolve(conversation_key, true).await?;
            outcome = self
                .client
                .prompt(&session_id, prompt, on_chunk.as_deref_mut())
                .await?;
        }

        let reply = finalize_reply(outcome)?;

        let mut table = self.table.lock().await;
        if let Some(record) = table.records.get_mut(conversation_key) {
            record.touch();
        }

        Ok(reply)
    }

    /// Ask the agent to cancel the in-progress prompt for a conversation.
    ///
    /// Cooperative only: an exchange already in flight still runs to normal
    /// completion. Returns `false` when the conversation has no session.
    ///
    /// # Errors
    ///
    /// Propagates client call failures.
    pub async fn cancel(&self, conversation_key: &str) -> Result<bool> {
        let session_id = {
            let table = self.table.lock().await;
            table.store.get(conversation_key).map(ToOwned::to_owned)
        };
        match session_id {
            Some(session_id) => self.client.cancel(&session_id).await,
            None => Ok(false),
        }
    }

    /// Forget the conversation's session mapping. Returns whether a mapping
    /// existed. The agent-side session is not touched — see
    /// [`delete_session`](Self::delete_session).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persist` if the mapping file rewrite fails.
    pub async fn clear(&self, conversation_key: &str) -> Result<bool> {
        let mut table = self.table.lock().await;
        table.records.remove(conversation_key);
        let removed = table.store.remove(conversation_key)?;
        if removed {
            info!(conversation_key, "cleared session mapping");
        }
        Ok(removed)
    }

    /// Deliberately unsupported: the upstream protocol has no session
    /// deletion. Always returns the same `Unsupported` failure without
    /// touching the transport.
    ///
    /// # Errors
    ///
    /// Always `AppError::Unsupported` with [`DELETE_UNSUPPORTED`].
    pub fn delete_session(&self, _conversation_key: &str) -> Result<()> {
        Err(AppError::Unsupported(DELETE_UNSUPPORTED.into()))
    }

    /// Deliberately unsupported: the upstream protocol has no session
    /// listing. Always returns the same `Unsupported` failure without
    /// touching the transport.
    ///
    /// # Errors
    ///
    /// Always `AppError::Unsupported` with [`LIST_UNSUPPORTED`].
    pub fn list_sessions(&self) -> Result<Vec<String>> {
        Err(AppError::Unsupported(LIST_UNSUPPORTED.into()))
    }

    /// Number of conversations with a persisted mapping.
    pub async fn mapped_conversations(&self) -> usize {
        self.table.lock().await.store.len()
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Start and handshake lazily so the first message can bring the whole
    /// stack up.
    async fn ensure_started(&self) -> Result<()> {
        if self.client.state().await == SupervisorState::Stopped {
            self.client.start().await?;
        }
        if !self.client.capabilities().is_negotiated() {
            self.client.initialize().await?;
        }
        Ok(())
    }

    /// Resolve `conversation_key` to a live session id.
    ///
    /// Mapped and resident: returned directly. Mapped but not resident
    /// (fresh process): `session/load`, falling through to creation when the
    /// agent refuses or cannot load at all. Unmapped, fall-through, or
    /// `force_recreate`: `session/new` plus an immediate write-through of
    /// the new mapping.
    async fn resolve(&self, conversation_key: &str, force_recreate: bool) -> Result<String> {
        let mut table = self.table.lock().await;
        let generation = self.client.generation();
        let cwd = self.workspace_root.to_string_lossy().into_owned();

        if !force_recreate {
            if let Some(remote_id) = table.store.get(conversation_key).map(ToOwned::to_owned) {
                let resident = table
                    .records
                    .get(conversation_key)
                    .is_some_and(|r| r.is_loaded(generation));
                if resident {
                    return Ok(remote_id);
                }

                if self.client.capabilities().supports_load_session() {
                    let (loaded, _history) = self.client.load_session(&remote_id, &cwd).await?;
                    if loaded {
                        table
                            .records
                            .entry(conversation_key.to_owned())
                            .or_insert_with(|| SessionRecord::new(remote_id.clone()))
                            .mark_loaded(generation);
                        return Ok(remote_id);
                    }
                    warn!(
                        conversation_key,
                        remote_id, "session load failed; creating a replacement"
                    );
                } else {
                    warn!(
                        conversation_key,
                        "agent cannot load sessions; creating a replacement"
                    );
                }
            }
        }

        let remote_id = self
            .client
            .new_session(&cwd, self.instructions.as_deref())
            .await?;
        table.store.insert(conversation_key, &remote_id)?;

        let mut record = SessionRecord::new(remote_id.clone());
        record.mark_loaded(generation);
        table.records.insert(conversation_key.to_owned(), record);

        info!(conversation_key, remote_id, "mapped conversation to new session");
        Ok(remote_id)
    }

    /// Assemble the prompt content blocks.
    fn build_prompt(&self, text: &str, attachments: &[Attachment]) -> Value {
        let mut blocks = vec![json!({ "type": "text", "text": text })];

        if !attachments.is_empty() {
            if self.client.capabilities().supports_image_attachments() {
                for attachment in attachments {
                    blocks.push(json!({
                        "type": "image",
                        "mimeType": attachment.mime_type,
                        "data": attachment.data,
                    }));
                }
            } else {
                warn!(
                    dropped = attachments.len(),
                    "agent does not accept image attachments; sending text only"
                );
            }
        }

        Value::from(blocks)
    }
}

/// The reason string when the outcome is an agent-declared stale-session
/// error, `None` otherwise.
fn stale_session_reason(outcome: &CallOutcome) -> Option<String> {
    outcome
        .response
        .as_ref()?
        .error
        .as_ref()
        .filter(|err| err.is_session_not_found())
        .map(|err| err.message.clone())
}

/// Turn a prompt outcome into the reply text.
fn finalize_reply(outcome: CallOutcome) -> Result<String> {
    let Some(response) = outcome.response else {
        return Err(AppError::Acp("stream ended before prompt response".into()));
    };

    if let Some(err) = response.error {
        if err.is_session_not_found() {
            return Err(AppError::SessionNotFound(err.message));
        }
        return Err(AppError::Protocol(format!(
            "prompt failed: {} (code {})",
            err.message, err.code
        )));
    }

    // Buffered mode: the reply is the concatenation of the chunk texts
    // observed before the response. Streamed mode arrives here with an empty
    // notification list and falls through to the result text.
    let mut reply = String::new();
    for notification in &outcome.notifications {
        if let Some(SessionUpdate::MessageChunk { text }) =
            SessionUpdate::from_notification(notification)
        {
            reply.push_str(&text);
        }
    }

    if reply.is_empty() {
        if let Some(text) = response.result.as_ref().and_then(Value::as_str) {
            reply.push_str(text);
        } else {
            debug!("prompt returned a structured result with no chunk text");
        }
    }

    Ok(reply)
}
