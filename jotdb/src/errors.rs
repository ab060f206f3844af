use backtrace::Backtrace;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;

/// Error kinds for jotdb operations.
///
/// Each kind describes one failure category of the engine. Every kind maps
/// to a stable numeric code through [`ErrorKind::code`]; the handle facade
/// surfaces that code together with the error message so a binding layer
/// can rebuild its own exception type from the pair.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    /// Operation attempted on a closed or never-opened database
    NotOpen,
    /// Referenced record does not exist
    NotFound,
    /// Referenced collection does not exist
    CollectionNotFound,
    /// Document bytes fail to decode
    MalformedDocument,
    /// A query specification cannot be compiled
    MalformedQuery,
    /// A unique index constraint was violated
    UniqueViolation,
    /// Underlying storage read/write/sync failure
    Io,
    /// Stored data fails structural validation
    Corrupted,
    /// An index with a conflicting definition already exists
    IndexExists,
    /// The provided object identifier is not a valid 12-byte OID
    InvalidOid,
    /// Mutation attempted on a read-only database
    ReadOnly,
    /// Access to an already-closed result set
    ResultSetClosed,
    /// The database directory is locked by another process
    Locked,
    /// A caller-supplied argument is out of range or malformed
    InvalidArgument,
    /// Internal error (usually indicates a bug)
    Internal,
}

impl ErrorKind {
    /// Stable numeric code for this kind, used across the handle facade.
    pub fn code(&self) -> i32 {
        match self {
            ErrorKind::NotOpen => 1,
            ErrorKind::NotFound => 2,
            ErrorKind::CollectionNotFound => 3,
            ErrorKind::MalformedDocument => 4,
            ErrorKind::MalformedQuery => 5,
            ErrorKind::UniqueViolation => 6,
            ErrorKind::Io => 7,
            ErrorKind::Corrupted => 8,
            ErrorKind::IndexExists => 9,
            ErrorKind::InvalidOid => 10,
            ErrorKind::ReadOnly => 11,
            ErrorKind::ResultSetClosed => 12,
            ErrorKind::Locked => 13,
            ErrorKind::InvalidArgument => 14,
            ErrorKind::Internal => 100,
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NotOpen => write!(f, "Database not open"),
            ErrorKind::NotFound => write!(f, "Not found"),
            ErrorKind::CollectionNotFound => write!(f, "Collection not found"),
            ErrorKind::MalformedDocument => write!(f, "Malformed document"),
            ErrorKind::MalformedQuery => write!(f, "Malformed query"),
            ErrorKind::UniqueViolation => write!(f, "Unique constraint violation"),
            ErrorKind::Io => write!(f, "IO error"),
            ErrorKind::Corrupted => write!(f, "Corrupted data"),
            ErrorKind::IndexExists => write!(f, "Index already exists"),
            ErrorKind::InvalidOid => write!(f, "Invalid object id"),
            ErrorKind::ReadOnly => write!(f, "Database is read-only"),
            ErrorKind::ResultSetClosed => write!(f, "Result set closed"),
            ErrorKind::Locked => write!(f, "Database locked"),
            ErrorKind::InvalidArgument => write!(f, "Invalid argument"),
            ErrorKind::Internal => write!(f, "Internal error"),
        }
    }
}

/// Engine error type.
///
/// `JotError` carries the error message, its [`ErrorKind`] and an optional
/// cause for chaining. A backtrace is captured at construction to aid
/// debugging of internal failures.
///
/// The engine never throws across its own component boundaries; every
/// fallible operation returns [`JotResult`].
#[derive(Clone)]
pub struct JotError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<JotError>>,
    backtrace: Backtrace,
}

impl JotError {
    /// Creates a new `JotError` with the specified message and error kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        JotError {
            message: message.to_string(),
            error_kind,
            cause: None,
            backtrace: Backtrace::new_unresolved(),
        }
    }

    /// Creates a new `JotError` with a cause error attached.
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: JotError) -> Self {
        JotError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            backtrace: Backtrace::new_unresolved(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    /// Numeric code of this error's kind, for the handle facade.
    pub fn code(&self) -> i32 {
        self.error_kind.code()
    }

    pub fn cause(&self) -> Option<&JotError> {
        self.cause.as_deref()
    }
}

impl Display for JotError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for JotError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut backtrace = self.backtrace.clone();
        backtrace.resolve();
        match &self.cause {
            Some(cause) => write!(f, "{}\nCaused by: {:?}", self.message, cause),
            None => write!(f, "{}\n{:?}", self.message, backtrace),
        }
    }
}

impl Error for JotError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

impl From<std::io::Error> for JotError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::ReadOnly,
            _ => ErrorKind::Io,
        };
        JotError::new(&err.to_string(), kind)
    }
}

/// A result type alias for jotdb operations.
///
/// `JotResult<T>` is shorthand for `Result<T, JotError>`. All fallible
/// engine operations return this type.
pub type JotResult<T> = Result<T, JotError>;
