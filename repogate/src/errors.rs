use crate::api::models::response::{Envelope, ResponseCode};
use crate::cache::CacheError;
use crate::db::errors::DbError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use std::fmt;
use thiserror::Error as ThisError;

/// The closed set of failure kinds. Each kind has a fixed HTTP status and a default response code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadRequest,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    Conflict,
    InternalServer,
    /// Raised by whoever enforces a deadline; nothing in the pipeline itself times out
    Timeout,
}

impl ErrorKind {
    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::InternalServer => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Timeout => StatusCode::REQUEST_TIMEOUT,
        }
    }

    pub fn default_code(self) -> ResponseCode {
        match self {
            ErrorKind::BadRequest | ErrorKind::MethodNotAllowed | ErrorKind::Conflict => ResponseCode::ErrorNotIdentified,
            ErrorKind::Forbidden => ResponseCode::Forbidden,
            ErrorKind::NotFound => ResponseCode::NotFound,
            ErrorKind::InternalServer => ResponseCode::InternalServer,
            ErrorKind::Timeout => ResponseCode::ProcessTimeout,
        }
    }

    pub fn default_message(self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "Bad request",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::NotFound => "Not found",
            ErrorKind::MethodNotAllowed => "Method not allowed",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::InternalServer => "Internal server error",
            ErrorKind::Timeout => "Process time out",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(ThisError, Debug)]
pub enum Error {
    /// A failure from the closed taxonomy, raised deliberately by handlers, authenticators and
    /// the request pipeline
    #[error("{kind}: {message}")]
    Structured {
        kind: ErrorKind,
        code: ResponseCode,
        message: String,
        details: Value,
    },

    /// Relational store error, mapped onto the taxonomy when rendered
    #[error(transparent)]
    Database(#[from] DbError),

    /// Anything not raised as part of the taxonomy
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Error::Structured {
            kind,
            code: kind.default_code(),
            message: kind.default_message().to_string(),
            details: json!({}),
        }
    }

    pub fn bad_request() -> Self {
        Self::new(ErrorKind::BadRequest)
    }

    pub fn forbidden() -> Self {
        Self::new(ErrorKind::Forbidden)
    }

    pub fn not_found() -> Self {
        Self::new(ErrorKind::NotFound)
    }

    pub fn method_not_allowed() -> Self {
        Self::new(ErrorKind::MethodNotAllowed)
    }

    pub fn conflict() -> Self {
        Self::new(ErrorKind::Conflict)
    }

    pub fn internal() -> Self {
        Self::new(ErrorKind::InternalServer)
    }

    pub fn timeout() -> Self {
        Self::new(ErrorKind::Timeout)
    }

    /// A validation failure: 400 with the "fail format" code and per-field details
    pub fn fail_format(details: impl Into<Value>) -> Self {
        Self::bad_request()
            .with_code(ResponseCode::FailFormat)
            .with_message(ResponseCode::FailFormat.detail())
            .with_details(details)
    }

    /// Replace the response code. No-op on non-structured errors.
    pub fn with_code(mut self, new_code: ResponseCode) -> Self {
        if let Error::Structured { code, .. } = &mut self {
            *code = new_code;
        }
        self
    }

    pub fn with_message(mut self, new_message: impl Into<String>) -> Self {
        if let Error::Structured { message, .. } = &mut self {
            *message = new_message.into();
        }
        self
    }

    pub fn with_details(mut self, new_details: impl Into<Value>) -> Self {
        if let Error::Structured { details, .. } = &mut self {
            *details = new_details.into();
        }
        self
    }

    /// The taxonomy kind, or `None` for unidentified errors
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Structured { kind, .. } => Some(*kind),
            Error::Database(db_err) => Some(match db_err {
                DbError::NotFound => ErrorKind::NotFound,
                DbError::UniqueViolation { .. } => ErrorKind::Conflict,
                DbError::ForeignKeyViolation { .. } | DbError::CheckViolation { .. } => ErrorKind::BadRequest,
                DbError::UnknownColumn { .. } | DbError::InvalidArgument { .. } | DbError::Other(_) => ErrorKind::InternalServer,
            }),
            Error::Other(_) => None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.kind().map(ErrorKind::status_code).unwrap_or(StatusCode::BAD_REQUEST)
    }

    pub fn code(&self) -> ResponseCode {
        match self {
            Error::Structured { code, .. } => *code,
            _ => self.kind().map(ErrorKind::default_code).unwrap_or(ResponseCode::ErrorNotIdentified),
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Structured { message, .. } => message.clone(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { .. } => "Resource already exists".to_string(),
                DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
                DbError::CheckViolation { .. } => "Invalid data provided".to_string(),
                DbError::UnknownColumn { .. } | DbError::InvalidArgument { .. } | DbError::Other(_) => {
                    "Database error occurred".to_string()
                }
            },
            Error::Other(_) => ResponseCode::ErrorNotIdentified.detail().to_string(),
        }
    }

    /// The `errors` member of the rendered envelope
    pub fn details(&self) -> Value {
        match self {
            Error::Structured { details, .. } => details.clone(),
            Error::Database(_) => json!({}),
            Error::Other(err) => Value::String(err.to_string()),
        }
    }

    /// Whether this error belongs to the closed taxonomy (database errors included)
    pub fn is_declared(&self) -> bool {
        !matches!(self, Error::Other(_))
    }

    pub fn to_envelope(&self) -> Envelope {
        Envelope::failure(self.code(), self.user_message(), self.details())
    }
}

/// Rendering only; the request pipeline decides whether and how loudly a failure is logged
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        tracing::debug!(status = %self.status_code(), code = %self.code(), "Rendering error response: {}", self);
        let status = self.status_code();
        self.to_envelope().into_response_with(status)
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Database(DbError::from(err))
    }
}

/// Cache failures that reach a handler are not part of the taxonomy
impl From<CacheError> for Error {
    fn from(err: CacheError) -> Self {
        Error::Other(anyhow::Error::from(err))
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
