//! Errors this crate can emit.
use crate::queue::QueueError;
use crate::store::StoreError;

use std::fmt::{self, Display, Formatter};

/// A specialized `Result` type for this crate.
pub type Result<T, E = Error> = ::std::result::Result<T, E>;

/// The value returned in this crate when an error occurs.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct Error(pub(crate) ErrorRepr);

impl Error {
    /// The category of the error.
    pub fn kind(&self) -> ErrorKind {
        match self.0 {
            ErrorRepr::Closed => ErrorKind::Closed,
            ErrorRepr::Missing(_, _) | ErrorRepr::Config(_) | ErrorRepr::DirectoryFormat(_) => {
                ErrorKind::Config
            }
            ErrorRepr::Io(_) => ErrorKind::Io,
            ErrorRepr::Store(_) => ErrorKind::Store,
            ErrorRepr::Queue(_) => ErrorKind::Queue,
        }
    }

    /// Whether this error was raised by submitting to a closed journal.
    pub fn is_closed(&self) -> bool {
        matches!(self.0, ErrorRepr::Closed)
    }
}

impl From<ErrorRepr> for Error {
    fn from(value: ErrorRepr) -> Self {
        Self(value)
    }
}

impl From<StoreError> for Error {
    fn from(value: StoreError) -> Self {
        Self(ErrorRepr::Store(value))
    }
}

impl From<QueueError> for Error {
    fn from(value: QueueError) -> Self {
        Self(ErrorRepr::Queue(value))
    }
}

/// The category of the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The journal was closed before the operation.
    Closed,
    /// Invalid or incomplete configuration.
    Config,
    /// A local filesystem failure.
    Io,
    /// An object store failure.
    Store,
    /// A durable queue failure.
    Queue,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Config => write!(f, "config"),
            Self::Io => write!(f, "io"),
            Self::Store => write!(f, "store"),
            Self::Queue => write!(f, "queue"),
        }
    }
}

/// Internal error type that we are free to change at will.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ErrorRepr {
    #[error("journal is closed")]
    Closed,
    #[error("{0} missing required field: {1}")]
    Missing(&'static str, &'static str),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("invalid directory format: {0}")]
    DirectoryFormat(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}
