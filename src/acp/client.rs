//! Protocol engine for the agent's stdio connection.
//!
//! Owns the agent process lifecycle and the single request channel. The
//! transport has no inherent multiplexing — ids are advisory on one line
//! stream — so correctness requires that only one request be outstanding.
//! [`AcpClient::call`] holds an exclusive lock for the entire request round
//! trip (write through matching response), and concurrent callers queue
//! behind that lock rather than racing on id assignment. The serialisation
//! is the stated contract of this type, not an implementation detail.
//!
//! Inbound demultiplexing happens inside the same call: each line is either
//! the awaited response (id match), a notification (method, no id), a stale
//! response (other id — discarded), or transport noise (logged, skipped).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use crate::acp::capabilities::{CapabilityCache, CapabilitySet};
use crate::acp::codec::LineCodec;
use crate::acp::spawner;
use crate::acp::wire::{classify, Inbound, Notification, OutgoingRequest, Response, SessionUpdate};
use crate::config::AgentConfig;
use crate::{AppError, Result};

/// Lifecycle states of the supervised agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// No process attached.
    Stopped,
    /// Spawn in progress.
    Starting,
    /// Process attached and accepting requests.
    Running,
    /// `stop()` in progress; new requests fail fast.
    Stopping,
}

/// How a call consumes the notifications observed while it is pending.
pub enum CallMode<'a> {
    /// Accumulate notifications and return them alongside the response.
    Buffer,
    /// Hand each notification to the sink as it arrives; the call returns
    /// an empty notification list.
    Stream(&'a mut (dyn FnMut(Notification) + Send)),
}

/// Result of one request round trip.
///
/// `response: None` means the stream ended before a matching response
/// arrived. That is a normal, possibly degraded result the caller must
/// check — not a protocol failure.
#[derive(Debug)]
pub struct CallOutcome {
    /// The response whose id matched the request, if one arrived.
    pub response: Option<Response>,
    /// Notifications observed before the response, in arrival order.
    /// Empty in [`CallMode::Stream`].
    pub notifications: Vec<Notification>,
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The exclusive write/await section: protocol streams plus the id counter.
struct Conn {
    writer: FramedWrite<BoxedWriter, LineCodec>,
    reader: FramedRead<BoxedReader, LineCodec>,
    next_id: u64,
}

impl Conn {
    fn new(reader: BoxedReader, writer: BoxedWriter) -> Self {
        Self {
            writer: FramedWrite::new(writer, LineCodec::new()),
            reader: FramedRead::new(reader, LineCodec::new()),
            next_id: 0,
        }
    }
}

/// Attached child process plus its stderr drain task.
struct ChildHandle {
    child: Child,
    stderr_task: JoinHandle<()>,
}

/// Client for the agent's stdio JSON-RPC connection.
pub struct AcpClient {
    agent: AgentConfig,
    state: tokio::sync::Mutex<SupervisorState>,
    conn: tokio::sync::Mutex<Option<Conn>>,
    child: tokio::sync::Mutex<Option<ChildHandle>>,
    shutting_down: AtomicBool,
    generation: AtomicU64,
    capabilities: CapabilityCache,
}

impl AcpClient {
    /// Create a client for the configured agent. No process is spawned yet.
    #[must_use]
    pub fn new(agent: AgentConfig) -> Self {
        Self {
            agent,
            state: tokio::sync::Mutex::new(SupervisorState::Stopped),
            conn: tokio::sync::Mutex::new(None),
            child: tokio::sync::Mutex::new(None),
            shutting_down: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            capabilities: CapabilityCache::new(),
        }
    }

    /// Current supervisor state.
    pub async fn state(&self) -> SupervisorState {
        *self.state.lock().await
    }

    /// Connection generation, incremented on every successful `start()` or
    /// `attach()`. Session state loaded under an older generation is no
    /// longer resident in the agent process.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// The capability cache populated by [`initialize`](Self::initialize).
    #[must_use]
    pub fn capabilities(&self) -> &CapabilityCache {
        &self.capabilities
    }

    /// Spawn the agent process and attach its protocol streams.
    ///
    /// # Errors
    ///
    /// - `AppError::AlreadyRunning` unless the state is `Stopped`.
    /// - `AppError::Acp` if the process cannot be spawned; the state returns
    ///   to `Stopped`.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if *state != SupervisorState::Stopped {
                return Err(AppError::AlreadyRunning);
            }
            *state = SupervisorState::Starting;
        }

        let spawned = match spawner::spawn_agent(&self.agent) {
            Ok(spawned) => spawned,
            Err(err) => {
                *self.state.lock().await = SupervisorState::Stopped;
                error!(%err, "agent spawn failed");
                return Err(err);
            }
        };

        *self.conn.lock().await = Some(Conn::new(
            Box::new(spawned.stdout),
            Box::new(spawned.stdin),
        ));
        *self.child.lock().await = Some(ChildHandle {
            child: spawned.child,
            stderr_task: spawned.stderr_task,
        });

        self.shutting_down.store(false, Ordering::SeqCst);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.state.lock().await = SupervisorState::Running;
        info!(generation, "agent process running");
        Ok(())
    }

    /// Attach an already-established transport instead of spawning a
    /// process. Used for in-memory connections.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AlreadyRunning` unless the state is `Stopped`.
    pub async fn attach<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut state = self.state.lock().await;
        if *state != SupervisorState::Stopped {
            return Err(AppError::AlreadyRunning);
        }
        *self.conn.lock().await = Some(Conn::new(Box::new(reader), Box::new(writer)));
        self.shutting_down.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        *state = SupervisorState::Running;
        Ok(())
    }

    /// Stop the agent connection.
    ///
    /// Marks the connection as shutting down (new calls fail fast), asks the
    /// process to exit, waits up to the configured grace period, force-kills
    /// on timeout, then transitions to `Stopped` unconditionally. Calling
    /// `stop()` when already stopped is a no-op.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().await;
            match *state {
                SupervisorState::Stopped | SupervisorState::Stopping => return,
                SupervisorState::Starting | SupervisorState::Running => {
                    *state = SupervisorState::Stopping;
                }
            }
        }
        self.shutting_down.store(true, Ordering::SeqCst);

        if let Some(mut handle) = self.child.lock().await.take() {
            spawner::terminate_child(&mut handle.child, self.agent.stop_grace()).await;
            handle.stderr_task.abort();
        }

        // The process is gone, so an in-flight call has observed EOF and
        // released the connection lock; dropping the connection closes our
        // ends of the pipes.
        *self.conn.lock().await = None;
        self.capabilities.clear();

        *self.state.lock().await = SupervisorState::Stopped;
        self.shutting_down.store(false, Ordering::SeqCst);
        info!("agent connection stopped");
    }

    /// Send one request and read the stream until its response arrives.
    ///
    /// Blocks other callers for the entire round trip. Malformed lines and
    /// responses bearing a foreign id are logged and skipped; end of stream
    /// before a matching response yields `CallOutcome { response: None, … }`.
    ///
    /// # Errors
    ///
    /// - `AppError::ShuttingDown` while `stop()` is in progress.
    /// - `AppError::NotRunning` with no attached connection.
    /// - `AppError::Acp` / `AppError::Io` if the request cannot be written.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        mode: CallMode<'_>,
    ) -> Result<CallOutcome> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(AppError::ShuttingDown);
        }

        let mut guard = self.conn.lock().await;
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(AppError::ShuttingDown);
        }
        let conn = guard.as_mut().ok_or(AppError::NotRunning)?;

        conn.next_id += 1;
        let id = conn.next_id;
        let line = OutgoingRequest::new(method, id, params).to_line()?;
        debug!(method, id, "sending request");
        conn.writer.send(line).await?;

        let mut mode = mode;
        let mut buffered = Vec::new();

        loop {
            match conn.reader.next().await {
                None => {
                    warn!(method, id, "stream ended before response");
                    return Ok(CallOutcome {
                        response: None,
                        notifications: buffered,
                    });
                }
                Some(Err(AppError::Acp(msg))) => {
                    // Framing noise must never abort the session.
                    warn!(method, id, error = %msg, "skipping unreadable line");
                }
                Some(Err(err)) => {
                    warn!(method, id, %err, "stream error before response");
                    return Ok(CallOutcome {
                        response: None,
                        notifications: buffered,
                    });
                }
                Some(Ok(line)) => match classify(&line) {
                    Err(err) => {
                        warn!(method, id, %err, "skipping malformed line");
                    }
                    Ok(Inbound::Notification(notification)) => match &mut mode {
                        CallMode::Buffer => buffered.push(notification),
                        CallMode::Stream(sink) => sink(notification),
                    },
                    Ok(Inbound::Response(response)) if response.id == id => {
                        debug!(method, id, "response received");
                        return Ok(CallOutcome {
                            response: Some(response),
                            notifications: buffered,
                        });
                    }
                    Ok(Inbound::Response(stale)) => {
                        debug!(method, id, stale_id = stale.id, "discarding stale response");
                    }
                },
            }
        }
    }

    // ── Higher-level operations ───────────────────────────────────────────────

    /// Perform the capability handshake and populate the capability cache.
    ///
    /// Calling this again re-negotiates; the cached set is replaced
    /// wholesale.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the agent rejects the handshake or the
    /// stream ends without a response, in addition to the [`call`](Self::call)
    /// failure modes.
    pub async fn initialize(&self) -> Result<CapabilitySet> {
        let params = json!({
            "protocolVersion": "v1",
            "clientCapabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let outcome = self.call("initialize", Some(params), CallMode::Buffer).await?;
        let Some(response) = outcome.response else {
            return Err(AppError::Protocol("no response to initialize".into()));
        };
        if let Some(err) = response.error {
            return Err(AppError::Protocol(format!(
                "initialize failed: {} (code {})",
                err.message, err.code
            )));
        }
        let Some(result) = response.result else {
            return Err(AppError::Protocol("initialize returned no result".into()));
        };

        let set = CapabilitySet::from_initialize_result(&result);
        info!(
            load_session = set.load_session,
            image = set.prompt_capabilities.image,
            "capabilities negotiated"
        );
        self.capabilities.replace(set.clone());
        Ok(set)
    }

    /// Create a new agent session and return its remote id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the agent refuses or the stream ends
    /// without a response.
    pub async fn new_session(&self, cwd: &str, instructions: Option<&str>) -> Result<String> {
        let mut params = json!({
            "mcpServers": [],
            "cwd": cwd,
        });
        if let Some(instructions) = instructions {
            params["instructions"] = Value::from(instructions);
        }

        let outcome = self
            .call("session/new", Some(params), CallMode::Buffer)
            .await?;
        let Some(response) = outcome.response else {
            return Err(AppError::Protocol(
                "stream ended before session/new response".into(),
            ));
        };
        if let Some(err) = response.error {
            return Err(AppError::Protocol(format!(
                "session/new failed: {} (code {})",
                err.message, err.code
            )));
        }

        let session_id = response
            .result
            .as_ref()
            .and_then(|r| r.get("sessionId"))
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Protocol("session/new result lacks sessionId".into()))?
            .to_owned();

        info!(session_id, "created new session");
        Ok(session_id)
    }

    /// Load a previously created session into the agent process.
    ///
    /// Always buffers: the returned notifications are the replayed history,
    /// which the caller did not ask to consume chunk-by-chunk at load time.
    /// A refusal from the agent is reported as `success == false`, not as an
    /// error — the session bridge recovers by recreating the session.
    ///
    /// # Errors
    ///
    /// Only the [`call`](Self::call) failure modes.
    pub async fn load_session(&self, session_id: &str, cwd: &str) -> Result<(bool, Vec<Notification>)> {
        let params = json!({
            "sessionId": session_id,
            "mcpServers": [],
            "cwd": cwd,
        });

        let outcome = self
            .call("session/load", Some(params), CallMode::Buffer)
            .await?;
        match outcome.response {
            Some(response) if response.is_ok() => {
                info!(
                    session_id,
                    history = outcome.notifications.len(),
                    "session loaded"
                );
                Ok((true, outcome.notifications))
            }
            Some(response) => {
                let reason = response
                    .error
                    .map_or_else(|| "empty result".to_owned(), |e| e.message);
                warn!(session_id, reason, "session/load refused");
                Ok((false, Vec::new()))
            }
            None => {
                warn!(session_id, "stream ended before session/load response");
                Ok((false, Vec::new()))
            }
        }
    }

    /// Send a prompt to a session.
    ///
    /// With a chunk sink the call runs in [`CallMode::Stream`]: updates whose
    /// kind is a message chunk have their text forwarded to the sink; tool
    /// calls, errors, and completion markers are observed and logged only.
    /// Without a sink the call buffers, and the caller reconstructs the reply
    /// from the returned notifications.
    ///
    /// The agent's `error` object, if any, is left in the outcome for the
    /// caller to inspect — the session bridge uses it to detect stale
    /// session ids.
    ///
    /// # Errors
    ///
    /// Only the [`call`](Self::call) failure modes.
    pub async fn prompt(
        &self,
        session_id: &str,
        prompt: Value,
        on_chunk: Option<&mut (dyn FnMut(&str) + Send + '_)>,
    ) -> Result<CallOutcome> {
        let params = json!({
            "sessionId": session_id,
            "prompt": prompt,
        });

        match on_chunk {
            Some(sink) => {
                let mut handler = |notification: Notification| {
                    route_update(&notification, sink);
                };
                self.call(
                    "session/prompt",
                    Some(params),
                    CallMode::Stream(&mut handler),
                )
                .await
            }
            None => {
                self.call("session/prompt", Some(params), CallMode::Buffer)
                    .await
            }
        }
    }

    /// Ask the agent to cancel the in-progress prompt for a session.
    ///
    /// Cancellation is cooperative on the agent side: this call does not
    /// truncate or unblock any outstanding exchange, it queues behind the
    /// protocol lock like any other request.
    ///
    /// # Errors
    ///
    /// Only the [`call`](Self::call) failure modes.
    pub async fn cancel(&self, session_id: &str) -> Result<bool> {
        let params = json!({ "sessionId": session_id });
        let outcome = self
            .call("session/cancel", Some(params), CallMode::Buffer)
            .await?;

        match outcome.response {
            Some(response) if response.is_ok() => {
                info!(session_id, "prompt cancelled");
                Ok(true)
            }
            Some(response) => {
                let reason = response
                    .error
                    .map_or_else(|| "empty result".to_owned(), |e| e.message);
                warn!(session_id, reason, "session/cancel refused");
                Ok(false)
            }
            None => {
                warn!(session_id, "stream ended before session/cancel response");
                Ok(false)
            }
        }
    }
}

/// Route one streamed notification: chunk text goes to the sink, everything
/// else is logged.
fn route_update(notification: &Notification, sink: &mut (dyn FnMut(&str) + Send)) {
    let Some(update) = SessionUpdate::from_notification(notification) else {
        debug!(method = %notification.method, "ignoring non-update notification");
        return;
    };

    match update {
        SessionUpdate::MessageChunk { text } => {
            if !text.is_empty() {
                sink(&text);
            }
        }
        SessionUpdate::ToolCall(payload) => debug!(%payload, "tool call"),
        SessionUpdate::ToolCallUpdate(payload) => debug!(%payload, "tool call update"),
        SessionUpdate::Error(payload) => error!(%payload, "session error update"),
        SessionUpdate::Complete => debug!("prompt complete"),
        SessionUpdate::Unknown(kind) => debug!(kind, "unknown update kind"),
    }
}
