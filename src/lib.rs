#![forbid(unsafe_code)]

//! `agent-conduit` — bridge between a chat front end and a long-running
//! ACP agent process.
//!
//! The protocol engine ([`acp::client::AcpClient`]) multiplexes JSON-RPC
//! requests, responses, and streamed notifications over the agent's stdio;
//! the session bridge ([`bridge::SessionBridge`]) maps caller conversation
//! keys to agent session ids and keeps that mapping across restarts.

pub mod acp;
pub mod bridge;
pub mod config;
pub mod errors;
pub mod models;
pub mod persistence;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
