use std::borrow::Cow;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Classifies a backend failure independently of the driver that raised it.
/// Drivers map their native error codes onto these kinds so callers can
/// match on behaviour rather than on driver types.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DatabaseErrorKind {
    /// Lost connection, server gone away and similar.
    Disconnection,
    /// Constraint violations: unique, foreign key, not null, check.
    Integrity,
    /// Malformed statement, unknown table or column.
    Programming,
    /// Deadlocks, serialization failures, resource exhaustion.
    Operational,
    /// Driver misuse, for instance executing on a closed cursor.
    Interface,
    /// Data errors: overflow, division by zero, invalid cast.
    Data,
    /// Feature not supported by the backend.
    NotSupported,
    /// Anything the driver could not classify further.
    Internal,
}

/// A failure reported by the database backend, already classified.
#[derive(Clone, Debug, Error)]
#[error("{kind:?} error from the database: {message}")]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
    pub message: String,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, Error)]
pub enum Error {
    /// An expression could not be translated to SQL by the active dialect.
    #[error("Cannot compile expression: {0}")]
    Compile(Cow<'static, str>),
    /// A value was rejected by a variable's type or validator.
    #[error("Unacceptable value: {0}")]
    Value(Cow<'static, str>),
    /// NULL offered to a variable declared NOT NULL.
    #[error("None isn't acceptable as a value for {0}")]
    NoneViolation(Cow<'static, str>),
    /// Class registration problems: missing table, bad primary key.
    #[error("Invalid class registration: {0}")]
    Class(Cow<'static, str>),
    /// A dotted property path did not resolve to exactly one property.
    #[error("Property path error: {0}")]
    PropertyPath(Cow<'static, str>),
    /// Misuse of a store: wrong store, unsupported object.
    #[error("Store error: {0}")]
    Store(Cow<'static, str>),
    /// `one()` matched more than one row.
    #[error("one() used with more than one result available")]
    NotOne,
    /// `first()`/`last()` on a result set with no defined order.
    #[error("Can't find first/last without an order")]
    Unordered,
    /// A feature was used that the active backend cannot provide.
    #[error("Feature not supported: {0}")]
    FeatureUnsupported(Cow<'static, str>),
    /// Data needed from the database is not available before a flush.
    #[error("Not flushed: {0}")]
    NotFlushed(Cow<'static, str>),
    /// The flush ordering constraints form a cycle.
    #[error("Can't flush due to ordering loop")]
    OrderLoop,
    /// The connection was closed and can no longer execute.
    #[error("Connection is closed")]
    ConnectionClosed,
    /// A malformed database URI.
    #[error("Malformed URI: {0}")]
    Uri(Cow<'static, str>),
    /// A tracer aborted the statement before it reached the backend.
    #[error("Statement aborted by a tracer: {0}")]
    StatementAborted(Cow<'static, str>),
    /// The per-transaction time budget ran out.
    #[error("Timeout: {0}")]
    Timeout(Cow<'static, str>),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl Error {
    pub fn compile(message: impl Into<Cow<'static, str>>) -> Self {
        Error::Compile(message.into())
    }
    pub fn value(message: impl Into<Cow<'static, str>>) -> Self {
        Error::Value(message.into())
    }
    pub fn store(message: impl Into<Cow<'static, str>>) -> Self {
        Error::Store(message.into())
    }
}
