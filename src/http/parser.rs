use crate::http::request::{Method, Request};
use crate::http::response::StatusCode;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed request line")]
    InvalidRequest,
    #[error("unsupported method")]
    UnsupportedMethod,
    #[error("bad Content-Length")]
    InvalidContentLength,
    #[error("header does not fit the receive buffer")]
    HeaderTooLarge,
    #[error("body does not fit the receive buffer")]
    BodyTooLarge,
}

impl ParseError {
    pub fn status(&self) -> StatusCode {
        match self {
            ParseError::UnsupportedMethod => StatusCode::NotImplemented,
            _ => StatusCode::BadRequest,
        }
    }
}

const TERMINATOR: &[u8] = b"\r\n\r\n";

/// Parses the request head once the blank line has arrived.
///
/// Returns `Ok(None)` while the terminator is still missing; callers simply
/// try again after the next read. `default_document` replaces a bare `/`.
pub fn parse_request(buf: &[u8], default_document: &str) -> Result<Option<Request>, ParseError> {
    let Some(headers_end) = find_headers_end(buf) else {
        return Ok(None);
    };
    let head = &buf[..headers_end + 2];

    let method = Method::from_prefix(head).ok_or(ParseError::UnsupportedMethod)?;

    let target = next_arg(head, 0).ok_or(ParseError::InvalidRequest)?;
    let token = arg_at(head, target);
    let token = std::str::from_utf8(token).map_err(|_| ParseError::InvalidRequest)?;

    // Only GET carries its form in the query; POST pairs arrive in the body.
    let (path, query) = match token.split_once('?') {
        Some((path, query)) => (path, (method == Method::GET).then(|| query.to_string())),
        None => (token, None),
    };
    let uri = match path.strip_prefix('/') {
        Some("") => default_document.to_string(),
        Some(rest) => rest.to_string(),
        None => path.to_string(),
    };

    let content_length = match get_line(head, "Content-Length:") {
        Some(v) => v.parse().map_err(|_| ParseError::InvalidContentLength)?,
        None => 0,
    };

    Ok(Some(Request {
        method,
        uri,
        query,
        authorization: get_line(head, "Authorization:"),
        referer: get_line(head, "Referer:"),
        host: get_line(head, "Host:"),
        content_length,
        connection: get_line(head, "Connection:"),
        header_len: headers_end + TERMINATOR.len(),
    }))
}

pub fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == TERMINATOR)
}

/// Returns the trimmed remainder of the first header line starting with
/// `label` (case-insensitive), scanning only up to the header terminator.
pub fn get_line(head: &[u8], label: &str) -> Option<String> {
    let label = label.as_bytes();
    let end = find_headers_end(head).unwrap_or(head.len());

    head[..end]
        .split(|b| *b == b'\n')
        .skip(1)
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .find(|line| line.len() >= label.len() && line[..label.len()].eq_ignore_ascii_case(label))
        .map(|line| {
            String::from_utf8_lossy(line[label.len()..].trim_ascii()).into_owned()
        })
}

/// Index of the next space-delimited field after the one at `from`, or
/// `None` when the line ends first.
pub fn next_arg(buf: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i < buf.len() && buf[i] > b' ' {
        i += 1;
    }
    if buf.get(i) != Some(&b' ') {
        return None;
    }
    while buf.get(i) == Some(&b' ') {
        i += 1;
    }
    match buf.get(i) {
        Some(b) if *b > b' ' => Some(i),
        _ => None,
    }
}

fn arg_at(buf: &[u8], start: usize) -> &[u8] {
    let len = buf[start..].iter().take_while(|b| **b > b' ').count();
    &buf[start..start + len]
}
