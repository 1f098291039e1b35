//! Decoding of `name=value&name=value` text from query strings and POST
//! bodies.

use crate::error::FormError;

/// Ordered name/value pairs decoded from one query string or body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Form {
    pairs: Vec<(String, String)>,
}

impl Form {
    /// Decodes pairs up to the first control or space byte.
    ///
    /// The pair count is taken from the number of `=` signs, so the pair
    /// array is sized exactly once. A non-empty segment without `=`
    /// rejects the whole form.
    ///
    /// # Example
    ///
    /// ```
    /// # use vane::http::form::Form;
    /// let form = Form::parse(b"a=1&b=2%20x").unwrap();
    /// assert_eq!(form.get("b"), Some("2 x"));
    /// assert!(Form::parse(b"a=1&flag").is_err());
    /// ```
    pub fn parse(input: &[u8]) -> Result<Self, FormError> {
        let end = input.iter().position(|b| *b <= b' ').unwrap_or(input.len());
        let text = &input[..end];
        let count = text.iter().filter(|b| **b == b'=').count();

        let mut pairs = Vec::with_capacity(count);
        for segment in text.split(|b| *b == b'&').filter(|s| !s.is_empty()) {
            let eq = segment
                .iter()
                .position(|b| *b == b'=')
                .ok_or(FormError::MissingEquals)?;
            pairs.push((decode_text(&segment[..eq])?, decode_text(&segment[eq + 1..])?));
        }

        Ok(Self { pairs })
    }

    /// Value of the first pair called `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

fn decode_text(raw: &[u8]) -> Result<String, FormError> {
    let bytes = url_decode(raw)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Decodes `+` to space and `%XX` to the byte it names.
///
/// A `%` not followed by two hex digits is rejected rather than copied.
pub fn url_decode(input: &[u8]) -> Result<Vec<u8>, FormError> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                let hi = input.get(i + 1).and_then(|b| hex_value(*b));
                let lo = input.get(i + 2).and_then(|b| hex_value(*b));
                match (hi, lo) {
                    (Some(hi), Some(lo)) => out.push(hi << 4 | lo),
                    _ => return Err(FormError::BadEscape(i)),
                }
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Ok(out)
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
