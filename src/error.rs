//! Error types shared across the server.
//!
//! Errors fall into classes that decide what the poller does with them:
//! transport errors abort the tick, everything else is answered on the
//! session and tears only that session down.

use std::io;

use thiserror::Error;

use crate::http::response::StatusCode;

/// Fatal errors surfaced by the poller to its owner.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("listener is not bound")]
    NotBound,

    #[error("readiness wait failed: {0}")]
    Poll(#[source] io::Error),

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    #[error("socket receive failed: {0}")]
    Recv(#[source] io::Error),

    #[error("listener restarted {restarts} times, last error: {last}")]
    RestartLimit { restarts: u32, last: String },
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Malformed `name=value` input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("pair is missing '='")]
    MissingEquals,

    #[error("bad percent escape at offset {0}")]
    BadEscape(usize),
}

/// Errors raised while generating a response body.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("malformed directive: {0}")]
    Format(&'static str),

    #[error("include nesting deeper than {0}")]
    IncludeDepth(usize),

    #[error("generated output exceeds {0} bytes")]
    OutputFull(usize),

    #[error("backend i/o: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Hook(String),

    #[error(transparent)]
    Form(#[from] FormError),
}

impl ContentError {
    /// Status sent to the client when the header has not gone out yet.
    pub fn status(&self) -> StatusCode {
        match self {
            ContentError::NotFound(_) => StatusCode::NotFound,
            ContentError::Format(_) | ContentError::Form(_) => StatusCode::BadRequest,
            ContentError::IncludeDepth(_)
            | ContentError::OutputFull(_)
            | ContentError::Io(_)
            | ContentError::Hook(_) => StatusCode::ServiceUnavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_errors_map_to_client_visible_status() {
        assert_eq!(
            ContentError::NotFound("x.htm".into()).status(),
            StatusCode::NotFound
        );
        assert_eq!(
            ContentError::Form(FormError::MissingEquals).status(),
            StatusCode::BadRequest
        );
        assert_eq!(
            ContentError::OutputFull(10).status(),
            StatusCode::ServiceUnavailable
        );
    }
}
