//! Rust SDK for inHook webhook-capture sessions.
//!
//! The crate is organized by transport surface:
//! - `api`: HTTP client for creating and fetching sessions and their events.
//! - `stream`: per-session websocket that pushes newly captured events.
//! - `session`: controller that merges both into a live, newest-first timeline.
//! - `retry`: shared backoff and timeout utilities.

/// Session and event HTTP client.
pub mod api;
/// Clipboard seam used to copy webhook URLs.
pub mod clipboard;
/// Backend addressing and environment loading.
pub mod config;
/// Session and captured-request wire types.
pub mod model;
/// Retry and timeout helpers used across the SDK.
pub mod retry;
/// Session controller and observable state.
pub mod session;
/// Realtime stream client and protocol types.
pub mod stream;
/// Deduplicated newest-first event collection.
pub mod timeline;

pub use api::{ApiClient, ApiClientOptions, ApiError};
pub use config::ClientConfig;
pub use model::{Event, WebhookSession};
pub use session::{SessionController, SessionError, SessionView};
