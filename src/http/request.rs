/// HTTP request methods.
///
/// Only the three methods the engine serves are represented; anything else
/// is answered with 501 before a `Request` is ever built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Submit a form body
    POST,
    /// PUT - Store the body as a file
    PUT,
}

impl Method {
    /// Identifies the method from the first four bytes of the request line.
    ///
    /// # Example
    ///
    /// ```
    /// # use vane::http::request::Method;
    /// assert_eq!(Method::from_prefix(b"GET /index.htm"), Some(Method::GET));
    /// assert_eq!(Method::from_prefix(b"POST /form"), Some(Method::POST));
    /// assert_eq!(Method::from_prefix(b"HEAD / HTTP/1.1"), None);
    /// ```
    pub fn from_prefix(line: &[u8]) -> Option<Self> {
        let prefix: [u8; 4] = line.get(..4)?.try_into().ok()?;
        match &prefix {
            b"GET " => Some(Method::GET),
            b"POST" => Some(Method::POST),
            b"PUT " => Some(Method::PUT),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
        }
    }
}

/// Parsed request line and the header lines the engine cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// The HTTP method (GET, POST, PUT)
    pub method: Method,
    /// Resource name with the leading slash removed; bare `/` is already
    /// mapped to the default document
    pub uri: String,
    /// Raw text after `?` on a GET, not yet decoded
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub referer: Option<String>,
    pub host: Option<String>,
    /// Declared body length, 0 when absent
    pub content_length: usize,
    /// Value of the `Connection:` header
    pub connection: Option<String>,
    /// Offset of the first body byte in the receive buffer
    pub header_len: usize,
}

impl Request {
    /// Determines whether the client asked for the connection to stay open.
    pub fn keep_alive(&self) -> bool {
        self.connection
            .as_deref()
            .map(|v| v.eq_ignore_ascii_case("keep-alive"))
            .unwrap_or(false)
    }
}
