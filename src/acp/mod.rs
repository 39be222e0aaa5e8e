//! Agent Client Protocol (ACP) connection handling.
//!
//! Everything that talks to the agent process directly lives here:
//!
//! - `spawner`: process launch, stderr drain, grace-then-kill termination.
//! - `codec`: newline-delimited UTF-8 framing with a max-line guard.
//! - `wire`: JSON-RPC request/response/notification shapes and the
//!   `sessionUpdate` tagged variant.
//! - `capabilities`: the handshake result cache.
//! - `client`: the protocol engine — one exclusive request channel with
//!   inbound demultiplexing.

pub mod capabilities;
pub mod client;
pub mod codec;
pub mod spawner;
pub mod wire;
