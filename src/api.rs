//! HTTP client for creating and fetching capture sessions.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::config::{checked_session_id, join_path, ClientConfig, ConfigError};
use crate::model::{Event, WebhookSession};
use crate::retry::{retry_async, with_optional_timeout, RetryPolicy};

pub use reqwest::StatusCode;

const ERROR_BODY_SNIPPET_LEN: usize = 220;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ApiDefaults;

impl ApiDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
}

#[derive(Clone, Debug)]
pub struct ApiClientOptions {
    pub connect_timeout: Duration,
    /// Whole-request deadline. `None` waits for the backend indefinitely.
    pub request_timeout: Option<Duration>,
    /// Retry policy for idempotent reads. Session creation is never retried.
    pub read_retry: RetryPolicy,
}

impl Default for ApiClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: ApiDefaults::CONNECT_TIMEOUT,
            request_timeout: Some(ApiDefaults::REQUEST_TIMEOUT),
            read_retry: RetryPolicy::none(),
        }
    }
}

/// Stateless request/response client for the session API.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    request_timeout: Option<Duration>,
    read_retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        Self::with_options(config, ApiClientOptions::default())
    }

    pub fn with_options(
        config: &ClientConfig,
        options: ApiClientOptions,
    ) -> Result<Self, ApiError> {
        let http = Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(ApiError::Transport)?;

        Ok(Self {
            http,
            base_url: config.api_base_url().to_string(),
            request_timeout: options.request_timeout,
            read_retry: options.read_retry,
        })
    }

    /// `POST /api/sessions`. Every call creates a new session.
    pub async fn create_session(&self) -> Result<WebhookSession, ApiError> {
        let request = self
            .http
            .post(self.endpoint(&["api", "sessions"])?)
            .header(CONTENT_TYPE, "application/json");
        self.send_attempt(Operation::CreateSession, request).await
    }

    /// `GET /api/sessions/{id}`, including the session's event history.
    ///
    /// `id` is sent as one percent-encoded path segment.
    pub async fn get_session(&self, id: &str) -> Result<WebhookSession, ApiError> {
        let endpoint = self.endpoint(&["api", "sessions", checked_session_id(id)?])?;
        self.read(Operation::GetSession, &endpoint).await
    }

    /// `GET /api/events/{id}`: the event history without the session object.
    pub async fn get_events(&self, id: &str) -> Result<Vec<Event>, ApiError> {
        let endpoint = self.endpoint(&["api", "events", checked_session_id(id)?])?;
        let events: Option<Vec<Event>> = self.read(Operation::GetEvents, &endpoint).await?;
        Ok(events.unwrap_or_default())
    }

    /// Normalized API base address.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ConfigError> {
        join_path(&self.base_url, segments)
    }

    async fn read<T>(&self, operation: Operation, endpoint: &Url) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        retry_async(
            &self.read_retry,
            |_| async move {
                let request = self.http.get(endpoint.clone());
                self.send_attempt(operation, request).await
            },
            ApiError::is_retryable,
        )
        .await
    }

    async fn send_attempt<T>(
        &self,
        operation: Operation,
        request: RequestBuilder,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let exchange = async {
            let response = request.send().await.map_err(ApiError::Transport)?;
            let status = response.status();
            let body = response.text().await.map_err(ApiError::Transport)?;
            Ok::<_, ApiError>((status, body))
        };

        let (status, body) = with_optional_timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| ApiError::Timeout { operation })??;

        debug!(event = "api_response", %operation, status = status.as_u16());

        if !status.is_success() {
            return Err(ApiError::HttpStatus {
                operation,
                status,
                body: summarize_error_body(&body),
            });
        }

        serde_json::from_str(&body).map_err(|err| ApiError::Parse {
            operation,
            message: err.to_string(),
        })
    }
}

/// API call that produced an error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operation {
    CreateSession,
    GetSession,
    GetEvents,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::CreateSession => "create session",
            Self::GetSession => "get session",
            Self::GetEvents => "get events",
        })
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// The request address could not be built from the base url or session id.
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("request failed: {0}")]
    Transport(reqwest::Error),

    #[error("failed to {operation}: request timed out")]
    Timeout { operation: Operation },

    /// Non-success status. Display carries the status text, e.g. `404 Not Found`.
    #[error("failed to {operation}: {status}{}", detail_suffix(.body))]
    HttpStatus {
        operation: Operation,
        status: StatusCode,
        body: String,
    },

    #[error("failed to {operation}: invalid response: {message}")]
    Parse {
        operation: Operation,
        message: String,
    },
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Transport(err) => err.is_timeout() || err.is_connect(),
            Self::Timeout { .. } => true,
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Parse { .. } => false,
        }
    }

    /// HTTP status of a non-success response.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn detail_suffix(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(" ({body})")
    }
}

fn summarize_error_body(body: &str) -> String {
    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.error.or(parsed.message) {
            return message;
        }
    }

    body.trim().chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}
