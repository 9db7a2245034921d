//! Shared state helpers for connections and cursors.

use crate::error::Error;

/// Handle state error for consistent error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The connection has been closed.
    Closed,
    /// The cursor has been closed or lost its connection.
    CursorClosed,
}

impl ConnectionState {
    /// Returns the error message for this state.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Closed => "connection is closed",
            Self::CursorClosed => "cursor is closed",
        }
    }

    /// Converts this state into an [`Error::InvalidState`].
    #[must_use]
    pub fn into_error(self) -> Error {
        Error::invalid_state(self.message())
    }
}

impl From<ConnectionState> for Error {
    fn from(state: ConnectionState) -> Self {
        state.into_error()
    }
}
