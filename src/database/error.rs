use std::fmt::{Display, Formatter};

use crate::database::backend::{codes, BackendError, SdkException};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DatabaseErrorCode {
    PermissionDenied,
    Unavailable,
    TooBig,
    /// A location expression could not be turned into a reference.
    Location,
    UnknownSubscription,
    /// The query could not be applied to the reference it was compiled against.
    BadQuery,
    /// The backend reported a code with no dedicated kind; the message keeps the raw code.
    OtherBackend,
    /// The backend rejected the call while it was being initiated.
    Operation,
}

impl DatabaseErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseErrorCode::PermissionDenied => "database/permission-denied",
            DatabaseErrorCode::Unavailable => "database/unavailable",
            DatabaseErrorCode::TooBig => "database/too-big",
            DatabaseErrorCode::Location => "database/location",
            DatabaseErrorCode::UnknownSubscription => "database/unknown-subscription",
            DatabaseErrorCode::BadQuery => "database/bad-query",
            DatabaseErrorCode::OtherBackend => "database/other-backend",
            DatabaseErrorCode::Operation => "database/operation",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseError {
    pub code: DatabaseErrorCode,
    message: String,
}

impl DatabaseError {
    pub fn new(code: DatabaseErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    /// The diagnostic text as reported by the backend or the failing call.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for DatabaseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl std::error::Error for DatabaseError {}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

pub fn permission_denied(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::PermissionDenied, message)
}

pub fn unavailable(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::Unavailable, message)
}

pub fn too_big(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::TooBig, message)
}

pub fn location_error(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::Location, message)
}

pub fn unknown_subscription(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::UnknownSubscription, message)
}

pub fn bad_query(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::BadQuery, message)
}

pub fn other_backend(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::OtherBackend, message)
}

pub fn operation_error(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::Operation, message)
}

/// Maps an error reported asynchronously by the backend.
pub fn translate(err: &BackendError) -> DatabaseError {
    match err.code() {
        codes::PERMISSION_DENIED => permission_denied(err.message()),
        codes::UNAVAILABLE => unavailable(err.message()),
        codes::TOO_BIG => too_big(err.message()),
        _ => other_backend(err.to_string()),
    }
}

/// Maps an exception raised while initiating a backend call.
pub fn translate_exception(err: &SdkException) -> DatabaseError {
    operation_error(err.to_string())
}
