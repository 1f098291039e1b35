//! Directive markers embedded in served text.
//!
//! Two directives are understood:
//!
//! ```text
//! <!--#include file="name"-->        file="name?a=1" layers a form,
//!                                    text after a space is ignored
//! <!--#exec cmd_argument='arg'-->    hands `arg` to the exec hook
//! ```
//!
//! Anything else between the markers is consumed and dropped.

use crate::error::ContentError;

pub const OPEN: &[u8] = b"<!--#";
pub const CLOSE: &[u8] = b"-->";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive<'a> {
    Include { file: &'a str, query: Option<&'a str> },
    Exec { argument: &'a str },
    Other(&'a str),
}

impl<'a> Directive<'a> {
    /// Parses the text between the opening and closing markers.
    pub fn parse(body: &'a str) -> Result<Self, ContentError> {
        let body = body.trim();
        let (name, rest) = body
            .split_once(|c: char| c.is_ascii_whitespace())
            .unwrap_or((body, ""));

        match name {
            "include" => {
                let value = quoted_value(rest, "file=")?;
                let (file, query) = match value.split_once('?') {
                    Some((file, query)) => (file, Some(query)),
                    None => (value, None),
                };
                let file = file.split(' ').next().unwrap_or(file);
                if file.is_empty() {
                    return Err(ContentError::Format("include names no file"));
                }
                Ok(Directive::Include { file, query })
            }
            "exec" => Ok(Directive::Exec {
                argument: quoted_value(rest, "cmd_argument=")?,
            }),
            other => Ok(Directive::Other(other)),
        }
    }
}

fn quoted_value<'a>(text: &'a str, key: &str) -> Result<&'a str, ContentError> {
    let start = text
        .find(key)
        .ok_or(ContentError::Format("missing attribute"))?
        + key.len();
    let rest = &text[start..];
    let quote = rest
        .chars()
        .next()
        .filter(|c| *c == '"' || *c == '\'')
        .ok_or(ContentError::Format("attribute value is not quoted"))?;
    let inner = &rest[1..];
    let end = inner
        .find(quote)
        .ok_or(ContentError::Format("unterminated attribute value"))?;
    Ok(&inner[..end])
}

pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Length of the longest tail of `data` that could still grow into an
/// opening marker once more bytes are read.
pub fn partial_open(data: &[u8]) -> usize {
    (1..OPEN.len())
        .rev()
        .find(|&n| data.ends_with(&OPEN[..n]))
        .unwrap_or(0)
}
