//! Session controller: session lifecycle plus live event reconciliation.
//!
//! [`SessionController`] creates or resumes a session through [`ApiClient`],
//! opens one stream per session, and folds pushed messages into a newest-first
//! [`Timeline`]. State is published as a [`SessionView`] over a
//! `tokio::sync::watch` channel; only the controller mutates it.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::clipboard::{default_clipboard, Clipboard};
use crate::config::ClientConfig;
use crate::model::{Event, WebhookSession};
use crate::stream::client::{
    ConnectionState, StreamClient, StreamConnection, StreamEvent, StreamHandle,
};
use crate::stream::proto::ServerMessage;
use crate::timeline::Timeline;

/// Read-only snapshot of controller state.
#[derive(Clone, Debug, Default)]
pub struct SessionView {
    session: Option<WebhookSession>,
    timeline: Timeline,
    loading: bool,
    error: Option<String>,
    stream_epoch: Option<u64>,
}

impl SessionView {
    pub fn session(&self) -> Option<&WebhookSession> {
        self.session.as_ref()
    }

    /// Events, most recent first.
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.timeline.iter()
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// True while a create/load/refresh call is in flight.
    pub fn loading(&self) -> bool {
        self.loading
    }

    /// Message of the last failed request, cleared when the next one starts.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Capture URL of the loaded session, or `""` when none is loaded.
    pub fn webhook_url(&self) -> &str {
        self.session
            .as_ref()
            .map(|session| session.url.as_str())
            .unwrap_or("")
    }

    pub fn event_count(&self) -> usize {
        self.timeline.len()
    }
}

/// Failures of controller operations that need a loaded session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("no session loaded")]
    NoSession,
}

struct SessionStore {
    view: watch::Sender<SessionView>,
}

impl SessionStore {
    fn new() -> Self {
        let (view, _) = watch::channel(SessionView::default());
        Self { view }
    }

    fn begin_loading(self: &Arc<Self>) -> LoadingGuard {
        self.view.send_modify(|view| {
            view.loading = true;
            view.error = None;
        });
        LoadingGuard {
            store: Arc::clone(self),
        }
    }

    fn set_error(&self, message: String) {
        self.view.send_modify(|view| view.error = Some(message));
    }

    fn install(&self, session: WebhookSession, stream_epoch: Option<u64>) {
        self.view.send_modify(|view| {
            view.timeline.replace(session.events.clone());
            view.session = Some(session);
            view.stream_epoch = stream_epoch;
        });
    }

    fn replace_events(&self, events: Vec<Event>) {
        self.view.send_modify(|view| view.timeline.replace(events));
    }

    fn clear_events(&self) {
        self.view.send_modify(|view| view.timeline.clear());
    }

    /// Applies `message` only while `epoch` is the attached stream.
    fn apply(&self, epoch: u64, message: ServerMessage) -> bool {
        self.view.send_if_modified(|view| {
            if view.stream_epoch != Some(epoch) {
                return false;
            }
            apply_server_message(&mut view.timeline, message)
        })
    }

    fn detach(&self, epoch: u64) {
        self.view.send_if_modified(|view| {
            if view.stream_epoch == Some(epoch) {
                view.stream_epoch = None;
            }
            false
        });
    }

    fn session_id(&self) -> Option<String> {
        self.view
            .borrow()
            .session
            .as_ref()
            .map(|session| session.id.clone())
    }
}

/// Clears the loading flag on every exit path, including cancellation.
struct LoadingGuard {
    store: Arc<SessionStore>,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.store.view.send_modify(|view| view.loading = false);
    }
}

fn apply_server_message(timeline: &mut Timeline, message: ServerMessage) -> bool {
    match message {
        ServerMessage::NewEvent { event: Some(event) } => {
            let id = event.id.clone();
            let inserted = timeline.prepend(event);
            if !inserted {
                debug!(event = "duplicate_event_dropped", id = %id);
            }
            inserted
        }
        ServerMessage::InitialEvents {
            events: Some(events),
        } => {
            timeline.replace(events);
            true
        }
        ServerMessage::NewEvent { event: None } | ServerMessage::InitialEvents { events: None } => {
            false
        }
        ServerMessage::Unknown => {
            debug!(event = "unknown_stream_message_ignored");
            false
        }
    }
}

struct ActiveStream {
    epoch: u64,
    handle: StreamHandle,
    dispatch: JoinHandle<()>,
}

/// Owns one session, its event timeline, and at most one live stream.
///
/// Dropping the controller disconnects the stream.
pub struct SessionController {
    api: ApiClient,
    stream: StreamClient,
    clipboard: Option<Box<dyn Clipboard>>,
    store: Arc<SessionStore>,
    active: Option<ActiveStream>,
    next_epoch: u64,
}

impl SessionController {
    /// Builds API and stream clients from `config`.
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let api = ApiClient::new(&config)?;
        Ok(Self::from_parts(api, StreamClient::new(config)))
    }

    /// Uses preconfigured clients, e.g. with custom timeouts or reconnects.
    pub fn from_parts(api: ApiClient, stream: StreamClient) -> Self {
        Self {
            api,
            stream,
            clipboard: default_clipboard(),
            store: Arc::new(SessionStore::new()),
            active: None,
            next_epoch: 0,
        }
    }

    /// Uses `clipboard` for [`SessionController::copy_webhook_url`].
    pub fn with_clipboard(mut self, clipboard: impl Clipboard + 'static) -> Self {
        self.clipboard = Some(Box::new(clipboard));
        self
    }

    /// Disables clipboard writes; copying then always reports `false`.
    pub fn without_clipboard(mut self) -> Self {
        self.clipboard = None;
        self
    }

    /// Creates a new session and starts streaming its events.
    ///
    /// On failure the error message is recorded in the view and the error is
    /// returned. No stream is opened for a failed attempt.
    pub async fn create_session(&mut self) -> Result<WebhookSession, ApiError> {
        let _loading = self.store.begin_loading();
        match self.api.create_session().await {
            Ok(session) => {
                info!(event = "session_created", session_id = %session.id);
                self.activate(session.clone());
                Ok(session)
            }
            Err(err) => Err(self.record_failure(err)),
        }
    }

    /// Resumes session `id` with its event history and starts streaming.
    pub async fn load_session(&mut self, id: &str) -> Result<WebhookSession, ApiError> {
        let _loading = self.store.begin_loading();
        match self.api.get_session(id).await {
            Ok(session) => {
                info!(event = "session_loaded", session_id = %session.id);
                self.activate(session.clone());
                Ok(session)
            }
            Err(err) => Err(self.record_failure(err)),
        }
    }

    /// Replaces the timeline with the backend's event history for the loaded
    /// session. Returns the resulting event count.
    pub async fn refresh_events(&mut self) -> Result<usize, SessionError> {
        let id = self.store.session_id().ok_or(SessionError::NoSession)?;
        let _loading = self.store.begin_loading();
        match self.api.get_events(&id).await {
            Ok(events) => {
                self.store.replace_events(events);
                Ok(self.event_count())
            }
            Err(err) => Err(self.record_failure(err).into()),
        }
    }

    /// Empties the local timeline. Server state and the stream are untouched.
    pub fn clear_events(&self) {
        self.store.clear_events();
    }

    /// Copies the webhook URL to the clipboard.
    ///
    /// Returns `false` without touching the clipboard when no session is
    /// loaded, and `false` when the write fails.
    pub fn copy_webhook_url(&mut self) -> bool {
        let url = self.webhook_url();
        if url.is_empty() {
            return false;
        }

        let Some(clipboard) = self.clipboard.as_mut() else {
            warn!(event = "clipboard_write_failed", error = "no clipboard configured");
            return false;
        };
        match clipboard.set_text(&url) {
            Ok(()) => true,
            Err(err) => {
                warn!(event = "clipboard_write_failed", error = %err);
                false
            }
        }
    }

    /// Disconnects the active stream, if any. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.store.detach(active.epoch);
        active.handle.disconnect();
        active.dispatch.abort();
        debug!(event = "stream_detached", epoch = active.epoch);
    }

    /// Disconnects and consumes the controller.
    pub fn close(mut self) {
        self.disconnect();
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.store.view.subscribe()
    }

    /// Snapshot of the current state.
    pub fn view(&self) -> SessionView {
        self.store.view.borrow().clone()
    }

    /// The loaded session, if any.
    pub fn session(&self) -> Option<WebhookSession> {
        self.store.view.borrow().session.clone()
    }

    /// Events, most recent first.
    pub fn events(&self) -> Vec<Event> {
        self.store.view.borrow().timeline.to_vec()
    }

    /// True while a create/load/refresh call is in flight.
    pub fn loading(&self) -> bool {
        self.store.view.borrow().loading
    }

    /// Message of the last failed request.
    pub fn error(&self) -> Option<String> {
        self.store.view.borrow().error.clone()
    }

    /// Capture URL of the loaded session, or an empty string.
    pub fn webhook_url(&self) -> String {
        self.store.view.borrow().webhook_url().to_string()
    }

    /// Number of events in the timeline.
    pub fn event_count(&self) -> usize {
        self.store.view.borrow().event_count()
    }

    /// Lifecycle of the active stream, `None` when no stream is attached.
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.active.as_ref().map(|active| active.handle.state())
    }

    /// Receiver for lifecycle changes of the active stream.
    pub fn watch_connection(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.active.as_ref().map(|active| active.handle.watch_state())
    }

    fn record_failure(&self, err: ApiError) -> ApiError {
        let message = err.to_string();
        warn!(event = "session_request_failed", error = %message);
        self.store.set_error(message);
        err
    }

    /// Swaps in `session` and replaces any prior stream with a fresh one.
    fn activate(&mut self, session: WebhookSession) {
        self.disconnect();

        let connection = match self.stream.open(&session.id) {
            Ok(connection) => connection,
            Err(err) => {
                warn!(event = "stream_open_failed", session_id = %session.id, error = %err);
                self.store.install(session, None);
                return;
            }
        };

        let epoch = self.next_epoch;
        self.next_epoch += 1;
        self.store.install(session, Some(epoch));

        let handle = connection.handle();
        let store = Arc::clone(&self.store);
        let dispatch = tokio::spawn(dispatch_stream_events(store, epoch, connection));
        self.active = Some(ActiveStream {
            epoch,
            handle,
            dispatch,
        });
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Applies stream events one at a time, in arrival order.
async fn dispatch_stream_events(
    store: Arc<SessionStore>,
    epoch: u64,
    mut connection: StreamConnection,
) {
    while let Some(stream_event) = connection.recv().await {
        match stream_event {
            StreamEvent::Opened => debug!(event = "stream_attached", epoch),
            StreamEvent::Message(message) => {
                store.apply(epoch, message);
            }
            StreamEvent::Error(err) => {
                warn!(event = "stream_connection_error", epoch, error = %err)
            }
            StreamEvent::Closed => info!(event = "stream_connection_closed", epoch),
        }
    }
}
