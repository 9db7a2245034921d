//! Error types and driver error classification.
//!
//! Driver failures keep the DB-API 2.0 categories:
//! - `Interface`: connection parameters, driver issues
//! - `Operational`: connection lost, timeout, busy database
//! - `Programming`: SQL syntax, wrong table name, closed handle
//! - `Integrity`: constraint violation
//! - `Data`: value conversion issues
//! - `NotSupported`: unsupported feature
//! - `Internal`: unexpected internal error
//!
//! [`Error`] wraps them with the adapter's own failure modes (closed handles,
//! pool shutdown, invalid configuration).

use std::fmt;

use thiserror::Error;

/// SQLSTATE codes meaning the backing session is gone.
///
/// Errors carrying one of these close the owning connection before they are
/// returned, so a dead connection never goes back into a pool.
pub const CONNECTION_CLOSED_STATES: &[(&str, &str)] = &[
    ("08S01", "Communication link failure"),
    ("08003", "Connection does not exist"),
    ("08007", "Connection failure during transaction"),
];

/// DB-API 2.0 category of a driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverErrorKind {
    /// Interface error (connection parameters, driver issues).
    Interface,
    /// Operational error (connection lost, timeout).
    Operational,
    /// Programming error (SQL syntax, wrong table name).
    Programming,
    /// Integrity error (constraint violation).
    Integrity,
    /// Data error (value conversion issues).
    Data,
    /// Not supported error (unsupported feature).
    NotSupported,
    /// Internal error (unexpected internal error).
    Internal,
}

impl DriverErrorKind {
    /// DB-API exception name for this category.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Interface => "InterfaceError",
            Self::Operational => "OperationalError",
            Self::Programming => "ProgrammingError",
            Self::Integrity => "IntegrityError",
            Self::Data => "DataError",
            Self::NotSupported => "NotSupportedError",
            Self::Internal => "InternalError",
        }
    }
}

impl fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error raised by a native driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    kind: DriverErrorKind,
    sqlstate: Option<String>,
    message: String,
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sqlstate {
            Some(state) => write!(f, "{}: [{state}] {}", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for DriverError {}

impl DriverError {
    /// Create a driver error of the given category.
    #[must_use]
    pub fn new(kind: DriverErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            sqlstate: None,
            message: msg.into(),
        }
    }

    /// Create an interface error.
    #[must_use]
    pub fn interface(msg: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Interface, msg)
    }

    /// Create an operational error.
    #[must_use]
    pub fn operational(msg: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Operational, msg)
    }

    /// Create a programming error.
    #[must_use]
    pub fn programming(msg: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Programming, msg)
    }

    /// Create an integrity error.
    #[must_use]
    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Integrity, msg)
    }

    /// Create a data error.
    #[must_use]
    pub fn data(msg: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Data, msg)
    }

    /// Create a not supported error.
    #[must_use]
    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::NotSupported, msg)
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Internal, msg)
    }

    /// Attach a SQLSTATE code.
    #[must_use]
    pub fn with_sqlstate(mut self, sqlstate: impl Into<String>) -> Self {
        self.sqlstate = Some(sqlstate.into());
        self
    }

    #[must_use]
    pub const fn kind(&self) -> DriverErrorKind {
        self.kind
    }

    #[must_use]
    pub fn sqlstate(&self) -> Option<&str> {
        self.sqlstate.as_deref()
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether this error means the underlying session died.
    #[must_use]
    pub fn is_connection_closed(&self) -> bool {
        if self.kind != DriverErrorKind::Operational {
            return false;
        }
        self.sqlstate
            .as_deref()
            .is_some_and(|state| CONNECTION_CLOSED_STATES.iter().any(|(code, _)| *code == state))
    }
}

/// Adapter error.
#[derive(Debug, Error)]
pub enum Error {
    /// The native connect call failed.
    #[error("ConnectionError: {0}")]
    Connection(#[source] DriverError),

    /// Operation attempted on a closed connection or cursor.
    #[error("InvalidStateError: {0}")]
    InvalidState(String),

    /// A driver call failed.
    #[error("OperationError: {0}")]
    Operation(#[from] DriverError),

    /// Acquire attempted after the pool started closing.
    #[error("PoolClosingError: cannot acquire connection after closing pool")]
    PoolClosing,

    /// Pool API used out of order.
    #[error("IllegalStateError: {0}")]
    IllegalState(String),

    /// Invalid construction parameters.
    #[error("ValueError: {0}")]
    Value(String),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The blocking worker could not run or finish the call.
    #[error("DispatchError: {0}")]
    Dispatch(String),
}

impl Error {
    /// Create an invalid state error.
    #[must_use]
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create an illegal state error.
    #[must_use]
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    /// Create a value error.
    #[must_use]
    pub fn value(msg: impl Into<String>) -> Self {
        Self::Value(msg.into())
    }

    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    #[must_use]
    pub const fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState(_))
    }

    #[must_use]
    pub const fn is_operation(&self) -> bool {
        matches!(self, Self::Operation(_))
    }

    #[must_use]
    pub const fn is_pool_closing(&self) -> bool {
        matches!(self, Self::PoolClosing)
    }

    #[must_use]
    pub const fn is_illegal_state(&self) -> bool {
        matches!(self, Self::IllegalState(_))
    }

    #[must_use]
    pub const fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    /// Whether this is a driver error that terminated the session.
    #[must_use]
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::Operation(err) if err.is_connection_closed())
    }

    /// The underlying driver error, if any.
    #[must_use]
    pub const fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::Connection(err) | Self::Operation(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
