use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bad magic: expected {expected:#x}, found {found:#x}")]
    BadMagic { expected: u32, found: u32 },

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u32),

    #[error("format error: {0}")]
    Format(String),

    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    #[error("invalid contig: {0}")]
    InvalidContig(String),

    #[error("unknown contig: {0}")]
    UnknownContig(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("truncated record: {0}")]
    TruncatedRecord(String),

    #[error("unexpected end of data at offset {offset}: {needed} more bytes needed")]
    UnexpectedEof { offset: usize, needed: usize },

    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("empty input: {0}")]
    EmptyInput(&'static str),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub r#type: &'static str,
    pub message: String,
}

impl Error {
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::BadMagic { .. } | Error::UnsupportedVersion(_) | Error::Format(_) => {
                "FormatError"
            }
            Error::CorruptIndex(_) => "CorruptIndex",
            Error::InvalidContig(_) => "InvalidContig",
            Error::UnknownContig(_) => "UnknownContig",
            Error::InvalidRange(_) => "InvalidRange",
            Error::TruncatedRecord(_) => "TruncatedRecord",
            Error::UnexpectedEof { .. } => "UnexpectedEof",
            Error::NetworkFailure(_) => "NetworkFailure",
            Error::NotFound(_) => "NotFound",
            Error::InvalidInput(_) => "InvalidInput",
            Error::EmptyInput(_) | Error::Io(_) | Error::Internal(_) => "InternalError",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidContig(_) | Error::UnknownContig(_) | Error::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Error::InvalidRange(_) | Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::NetworkFailure(_) => StatusCode::BAD_GATEWAY,
            Error::BadMagic { .. }
            | Error::UnsupportedVersion(_)
            | Error::Format(_)
            | Error::CorruptIndex(_)
            | Error::TruncatedRecord(_)
            | Error::UnexpectedEof { .. }
            | Error::EmptyInput(_)
            | Error::Io(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorBody {
                r#type: self.error_type(),
                message: self.to_string(),
            },
        };
        (self.status_code(), axum::Json(body)).into_response()
    }
}
