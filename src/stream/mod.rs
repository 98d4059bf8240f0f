//! Realtime session stream modules.
//!
//! - `client`: websocket worker, lifecycle state, and teardown handle.
//! - `proto`: push messages sent by the backend.

/// Websocket connection and lifecycle handling.
pub mod client;
/// Stream protocol messages.
pub mod proto;
