use serde::{Deserialize, Serialize};

use crate::model::Event;

/// Push message sent by the backend over a session's stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A single freshly captured event.
    NewEvent {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event: Option<Event>,
    },
    /// Full event list replacing the client's current view.
    InitialEvents {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        events: Option<Vec<Event>>,
    },
    /// Any message type this client does not understand.
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    pub fn new_event(event: Event) -> Self {
        Self::NewEvent { event: Some(event) }
    }

    pub fn initial_events(events: Vec<Event>) -> Self {
        Self::InitialEvents {
            events: Some(events),
        }
    }

    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
