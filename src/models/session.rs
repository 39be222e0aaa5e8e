//! Session record tracked per conversation key.

use chrono::{DateTime, Utc};

/// In-memory state for one conversation's agent session.
///
/// Only the key → remote-id mapping is persisted; everything else is
/// process-lifetime bookkeeping. The loaded flag is tied to a connection
/// generation so a process restart implicitly invalidates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Opaque session identifier issued by the agent.
    pub remote_id: String,
    /// When this record was created.
    pub created_at: DateTime<Utc>,
    /// Last successful message exchange.
    pub last_activity: DateTime<Utc>,
    /// Messages sent through this session.
    pub message_count: u64,
    /// Connection generation under which the agent last had this session
    /// resident. `None` until the first load or creation.
    loaded_generation: Option<u64>,
}

impl SessionRecord {
    /// Construct a record for a freshly mapped session.
    #[must_use]
    pub fn new(remote_id: String) -> Self {
        let now = Utc::now();
        Self {
            remote_id,
            created_at: now,
            last_activity: now,
            message_count: 0,
            loaded_generation: None,
        }
    }

    /// Whether the agent process of generation `generation` has this
    /// session's state resident.
    #[must_use]
    pub fn is_loaded(&self, generation: u64) -> bool {
        self.loaded_generation == Some(generation)
    }

    /// Mark the session resident under the given connection generation.
    pub fn mark_loaded(&mut self, generation: u64) {
        self.loaded_generation = Some(generation);
    }

    /// Record a successful message exchange.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
        self.message_count += 1;
    }
}
