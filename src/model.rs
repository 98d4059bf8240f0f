//! Wire types shared by the HTTP API and the realtime stream.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// One inbound HTTP request captured against a session's webhook URL.
///
/// Events are immutable once the backend records them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Server-assigned identifier, unique within a session.
    pub id: String,
    /// HTTP method of the captured request.
    pub method: String,
    /// Request target as received (path plus query string).
    pub url: String,
    /// Captured headers. Key casing is whatever the backend reports.
    #[serde(default, deserialize_with = "null_as_default")]
    pub headers: BTreeMap<String, String>,
    /// Raw request body.
    #[serde(default)]
    pub body: String,
    /// Captured query parameters.
    #[serde(default, deserialize_with = "null_as_default")]
    pub query_params: BTreeMap<String, String>,
    /// Origin address of the caller.
    #[serde(default)]
    pub ip: String,
    /// Capture time, ISO-8601 as produced by the backend.
    #[serde(default)]
    pub timestamp: String,
    /// Recorded outcome of the capture.
    #[serde(default)]
    pub status: u16,
}

/// Inspection session with its public capture URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookSession {
    pub id: String,
    /// Externally reachable capture endpoint.
    pub url: String,
    /// Event snapshot at load time.
    #[serde(default, deserialize_with = "null_as_default")]
    pub events: Vec<Event>,
}

/// Treats an explicit `null` the same as a missing field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
