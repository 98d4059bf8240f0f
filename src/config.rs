//! Backend addressing for the HTTP API and the realtime stream.

use reqwest::Url;
use thiserror::Error;

/// Local development backend address.
pub const LOCAL_API_BASE_URL: &str = "http://localhost:8080";
/// Environment variable holding the backend base address.
pub const API_BASE_ENV: &str = "INHOOK_API_BASE";
/// Environment variable overriding the stream base address.
pub const STREAM_BASE_ENV: &str = "INHOOK_STREAM_BASE";

/// Backend addresses used by the API and stream clients.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    api_base_url: String,
    stream_base_url: Option<String>,
}

impl ClientConfig {
    /// Creates a config rooted at `api_base_url`.
    ///
    /// The stream address is derived from the API address unless
    /// [`ClientConfig::with_stream_base`] sets one explicitly.
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: normalize_base(&api_base_url.into()),
            stream_base_url: None,
        }
    }

    /// Reads `INHOOK_API_BASE` and `INHOOK_STREAM_BASE`, falling back to the
    /// local backend.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let api_base = non_blank(API_BASE_ENV).unwrap_or_else(|| LOCAL_API_BASE_URL.to_string());
        let config = Self::new(api_base);
        match non_blank(STREAM_BASE_ENV) {
            Some(stream_base) => config.with_stream_base(stream_base),
            None => config,
        }
    }

    /// Sets an explicit stream base address such as `ws://host:8080`.
    pub fn with_stream_base(mut self, stream_base_url: impl Into<String>) -> Self {
        self.stream_base_url = Some(normalize_base(&stream_base_url.into()));
        self
    }

    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    /// Returns the stream base address, deriving `ws`/`wss` from the API
    /// scheme when no explicit base is configured.
    pub fn stream_base_url(&self) -> Result<String, ConfigError> {
        if let Some(stream_base) = self.stream_base_url.as_deref() {
            return Ok(stream_base.to_string());
        }

        if let Some(rest) = self.api_base_url.strip_prefix("https://") {
            return Ok(format!("wss://{rest}"));
        }
        if let Some(rest) = self.api_base_url.strip_prefix("http://") {
            return Ok(format!("ws://{rest}"));
        }

        Err(ConfigError::InvalidBaseUrl(self.api_base_url.clone()))
    }

    /// Stream address for one session: `<stream base>/ws/{session_id}`.
    ///
    /// The id is percent-encoded as a single path segment.
    pub fn stream_url(&self, session_id: &str) -> Result<String, ConfigError> {
        let url = join_path(
            &self.stream_base_url()?,
            &["ws", checked_session_id(session_id)?],
        )?;
        Ok(url.into())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(LOCAL_API_BASE_URL)
    }
}

/// Invalid backend addressing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The API base has no `http`/`https` scheme to derive a stream address from.
    #[error("cannot derive stream address from base url {0:?}")]
    InvalidBaseUrl(String),

    /// Empty, `.` or `..`: ids that cannot name a single path segment.
    #[error("invalid session id {0:?}")]
    InvalidSessionId(String),
}

/// Appends `segments` to the path of `base`, percent-encoding each one so
/// `/`, `?` and `#` stay inside their segment.
pub(crate) fn join_path(base: &str, segments: &[&str]) -> Result<Url, ConfigError> {
    let invalid = || ConfigError::InvalidBaseUrl(base.to_string());
    let mut url = Url::parse(base).map_err(|_| invalid())?;
    url.path_segments_mut()
        .map_err(|()| invalid())?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub(crate) fn checked_session_id(id: &str) -> Result<&str, ConfigError> {
    match id {
        "" | "." | ".." => Err(ConfigError::InvalidSessionId(id.to_string())),
        _ => Ok(id),
    }
}

fn normalize_base(base: &str) -> String {
    base.trim().trim_end_matches('/').to_string()
}
