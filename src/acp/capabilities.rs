//! Agent capability cache.
//!
//! The `initialize` handshake returns an `agentCapabilities` object; this
//! module caches it for the lifetime of the connection. The set is replaced
//! wholesale on every re-handshake and never merged field-by-field.

use serde::Deserialize;
use serde_json::Value;
use std::sync::RwLock;

/// Optional prompt-content features the agent declares.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptCapabilities {
    /// Whether prompts may carry image content blocks.
    pub image: bool,
    /// Whether prompts may carry audio content blocks.
    pub audio: bool,
    /// Whether prompts may carry embedded-context blocks.
    pub embedded_context: bool,
}

/// Capability flags declared by the agent at handshake time.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct CapabilitySet {
    /// Whether the agent can reload a previously created session.
    pub load_session: bool,
    /// Prompt-content feature flags.
    pub prompt_capabilities: PromptCapabilities,
}

impl CapabilitySet {
    /// Extract the capability set from an `initialize` result payload.
    ///
    /// Unknown or missing fields default to `false`; an absent
    /// `agentCapabilities` object yields an all-false set.
    #[must_use]
    pub fn from_initialize_result(result: &Value) -> Self {
        result
            .get("agentCapabilities")
            .and_then(|caps| serde_json::from_value(caps.clone()).ok())
            .unwrap_or_default()
    }
}

/// Process-wide capability cache: written once per handshake, read by all
/// later calls.
#[derive(Debug, Default)]
pub struct CapabilityCache {
    inner: RwLock<Option<CapabilitySet>>,
}

impl CapabilityCache {
    /// Create an empty cache (no handshake performed yet).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached set with a fresh handshake result.
    pub fn replace(&self, set: CapabilitySet) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = Some(set);
        }
    }

    /// Drop the cached set (connection lost).
    pub fn clear(&self) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = None;
        }
    }

    /// Whether a handshake has populated the cache.
    #[must_use]
    pub fn is_negotiated(&self) -> bool {
        self.inner.read().map(|g| g.is_some()).unwrap_or(false)
    }

    /// Whether the agent supports `session/load`. `false` before handshake.
    #[must_use]
    pub fn supports_load_session(&self) -> bool {
        self.inner
            .read()
            .ok()
            .and_then(|g| g.as_ref().map(|c| c.load_session))
            .unwrap_or(false)
    }

    /// Whether the agent accepts image content blocks. `false` before handshake.
    #[must_use]
    pub fn supports_image_attachments(&self) -> bool {
        self.inner
            .read()
            .ok()
            .and_then(|g| g.as_ref().map(|c| c.prompt_capabilities.image))
            .unwrap_or(false)
    }

    /// Snapshot of the cached set, if negotiated.
    #[must_use]
    pub fn snapshot(&self) -> Option<CapabilitySet> {
        self.inner.read().ok().and_then(|g| g.clone())
    }
}
