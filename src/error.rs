use std::fmt;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid handle state: {0}")]
    InvalidState(String),

    #[error("pool unavailable: {0}")]
    PoolUnavailable(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("work item faulted: {0}")]
    Faulted(Failure),

    #[error("operation canceled")]
    Canceled,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{} work item(s) failed", .0.len())]
    Aggregate(Vec<Failure>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidState,
    PoolUnavailable,
    Configuration,
    Faulted,
    Canceled,
    Timeout,
}

impl Error {
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Error::InvalidState(msg.into())
    }

    pub fn unavailable<S: Into<String>>(msg: S) -> Self {
        Error::PoolUnavailable(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidState(_) => ErrorKind::InvalidState,
            Error::PoolUnavailable(_) | Error::Io(_) => ErrorKind::PoolUnavailable,
            Error::Config(_) => ErrorKind::Configuration,
            Error::Faulted(_) | Error::Aggregate(_) => ErrorKind::Faulted,
            Error::Canceled => ErrorKind::Canceled,
            Error::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// Lookup key for a display string describing this error.
    ///
    /// The key is opaque to the coordinator; a [`MessageLookup`](crate::report::MessageLookup)
    /// turns it into text.
    pub fn message_key(&self) -> &'static str {
        match self {
            Error::InvalidState(_) => "error.invalid_state",
            Error::PoolUnavailable(_) => "error.pool_unavailable",
            Error::Config(_) => "error.pool_config",
            Error::Faulted(_) => "error.faulted",
            Error::Canceled => "error.canceled",
            Error::Timeout(_) => "error.timeout",
            Error::Aggregate(_) => "error.aggregate",
            Error::Io(_) => "error.thread_spawn",
        }
    }

    /// Failures carried by this error, if any.
    pub fn failures(&self) -> &[Failure] {
        match self {
            Error::Faulted(f) => std::slice::from_ref(f),
            Error::Aggregate(all) => all,
            _ => &[],
        }
    }
}

/// Where a captured failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FailureOrigin {
    /// The work returned an error value.
    Error,
    /// The work panicked.
    Panic,
}

/// A failure captured from a unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Failure {
    message: String,
    origin: FailureOrigin,
}

impl Failure {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            origin: FailureOrigin::Error,
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        Self {
            message,
            origin: FailureOrigin::Panic,
        }
    }

    pub(crate) fn from_error(err: &Error) -> Self {
        match err {
            Error::Faulted(f) => f.clone(),
            other => Self::new(other.to_string()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn origin(&self) -> FailureOrigin {
        self.origin
    }

    pub fn is_panic(&self) -> bool {
        self.origin == FailureOrigin::Panic
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin {
            FailureOrigin::Error => f.write_str(&self.message),
            FailureOrigin::Panic => write!(f, "panicked: {}", self.message),
        }
    }
}

impl std::error::Error for Failure {}

impl From<&str> for Failure {
    fn from(s: &str) -> Self {
        Failure::new(s)
    }
}

impl From<String> for Failure {
    fn from(s: String) -> Self {
        Failure::new(s)
    }
}

/// Outcome of a body that may fail without panicking.
///
/// Implemented for `()` and for `Result<(), E>` with a displayable error, so
/// loop bodies can be written either way.
pub trait Fallible {
    fn into_failure(self) -> Option<Failure>;
}

impl Fallible for () {
    fn into_failure(self) -> Option<Failure> {
        None
    }
}

impl<E: fmt::Display> Fallible for std::result::Result<(), E> {
    fn into_failure(self) -> Option<Failure> {
        self.err().map(|e| Failure::new(e.to_string()))
    }
}
