use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use std::fmt;

/// Failure of one export stage.
///
/// Every variant carries the underlying message verbatim; the response body is
/// `TAG: message` so callers can branch on the prefix.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportError {
    /// Payload shape violation, fixable by the caller
    BadRequest(String),
    /// Template asset missing on disk
    TemplateNotFound(String),
    /// Template unreadable or not a workbook
    TemplateLoadFailed(String),
    /// Any failure while populating the sheets
    WriteFailed(String),
    /// Workbook serialization failure
    OutputFailed(String),
    /// Export exceeded the request deadline
    Timeout(String),
    /// Anything not covered by a stage
    Uncaught(String),
}

impl ExportError {
    pub fn tag(&self) -> &'static str {
        match self {
            ExportError::BadRequest(_) => "BAD_REQUEST",
            ExportError::TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
            ExportError::TemplateLoadFailed(_) => "TEMPLATE_LOAD_FAILED",
            ExportError::WriteFailed(_) => "WRITE_SHEETS_FAILED",
            ExportError::OutputFailed(_) => "WORKBOOK_OUTPUT_FAILED",
            ExportError::Timeout(_) => "TIMEOUT",
            ExportError::Uncaught(_) => "UNCAUGHT_ERROR",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ExportError::BadRequest(msg)
            | ExportError::TemplateNotFound(msg)
            | ExportError::TemplateLoadFailed(msg)
            | ExportError::WriteFailed(msg)
            | ExportError::OutputFailed(msg)
            | ExportError::Timeout(msg)
            | ExportError::Uncaught(msg) => msg,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ExportError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.tag(), self.message())
    }
}

impl std::error::Error for ExportError {}

impl IntoResponse for ExportError {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}
