//! Basic authentication header decoding.

use base64ct::{Base64, Encoding};

/// Longest encoded credential accepted before giving up.
const MAX_ENCODED: usize = 80;

/// Decoded user name and password.
///
/// Unsupported schemes and undecodable payloads yield empty credentials,
/// which backends treat like an anonymous probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    /// Decodes the value of an `Authorization:` header.
    ///
    /// # Example
    ///
    /// ```
    /// # use vane::http::auth::Credentials;
    /// let creds = Credentials::from_header("Basic Z3Vlc3Q6dG91cmlzdA==");
    /// assert_eq!(creds.user, "guest");
    /// assert_eq!(creds.password, "tourist");
    /// ```
    pub fn from_header(value: &str) -> Self {
        let mut parts = value.trim().splitn(2, ' ');
        let scheme = parts.next().unwrap_or_default();
        if !scheme.eq_ignore_ascii_case("Basic") {
            tracing::debug!(scheme, "unsupported authorization scheme");
            return Self::default();
        }

        let encoded = parts.next().unwrap_or_default().trim();
        if encoded.len() > MAX_ENCODED {
            tracing::warn!(len = encoded.len(), "authorization payload too long");
            return Self::default();
        }

        let Ok(decoded) = Base64::decode_vec(encoded) else {
            return Self::default();
        };
        let decoded = String::from_utf8_lossy(&decoded);
        match decoded.split_once(':') {
            Some((user, password)) => Self {
                user: user.to_string(),
                password: password.to_string(),
            },
            None => Self::default(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user.is_empty() && self.password.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_colon_yields_anonymous() {
        // "guest" alone
        let creds = Credentials::from_header("Basic Z3Vlc3Q=");
        assert!(creds.is_anonymous());
    }

    #[test]
    fn other_schemes_are_anonymous() {
        assert!(Credentials::from_header("Digest username=x").is_anonymous());
        assert!(Credentials::from_header("Basic !!!").is_anonymous());
    }

    #[test]
    fn password_may_contain_colons() {
        // "a:b:c"
        let creds = Credentials::from_header("basic YTpiOmM=");
        assert_eq!(creds.user, "a");
        assert_eq!(creds.password, "b:c");
    }
}
