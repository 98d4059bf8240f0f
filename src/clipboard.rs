//! Clipboard access for copying a session's webhook URL.

use thiserror::Error;

/// Destination for copied text.
pub trait Clipboard: Send {
    fn set_text(&mut self, text: &str) -> Result<(), ClipboardError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClipboardError {
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),
}

/// Operating-system clipboard.
///
/// A fresh platform handle is opened per write, so headless hosts fail at copy
/// time instead of at construction.
#[cfg(feature = "clipboard")]
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClipboard;

#[cfg(feature = "clipboard")]
impl Clipboard for SystemClipboard {
    fn set_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        let mut clipboard =
            arboard::Clipboard::new().map_err(|err| ClipboardError::Unavailable(err.to_string()))?;
        clipboard
            .set_text(text.to_string())
            .map_err(|err| ClipboardError::Unavailable(err.to_string()))
    }
}

/// Clipboard used when none is configured.
pub(crate) fn default_clipboard() -> Option<Box<dyn Clipboard>> {
    #[cfg(feature = "clipboard")]
    {
        Some(Box::new(SystemClipboard))
    }
    #[cfg(not(feature = "clipboard"))]
    {
        None
    }
}
