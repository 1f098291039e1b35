use chrono::Utc;

/// HTTP status codes the server produces.
///
/// - `Ok` (200): resource served
/// - `Accepted` (202): shutdown request acknowledged
/// - `Found` (302): form handler redirected the client
/// - `BadRequest` (400): malformed header, query or body
/// - `Unauthorized` (401): resource requires credentials
/// - `PaymentRequired` (402): reserved for handlers
/// - `NotFound` (404): no backend has the resource
/// - `NotImplemented` (501): unsupported method or failed upload
/// - `ServiceUnavailable` (503): resource or memory exhaustion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 200 OK
    Ok,
    /// 202 Accepted
    Accepted,
    /// 302 Found
    Found,
    /// 400 Bad Request
    BadRequest,
    /// 401 Unauthorized
    Unauthorized,
    /// 402 Payment Required
    PaymentRequired,
    /// 404 Not Found
    NotFound,
    /// 501 Not Implemented
    NotImplemented,
    /// 503 Service Unavailable
    ServiceUnavailable,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use vane::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::NotFound.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::Accepted => 202,
            StatusCode::Found => 302,
            StatusCode::BadRequest => 400,
            StatusCode::Unauthorized => 401,
            StatusCode::PaymentRequired => 402,
            StatusCode::NotFound => 404,
            StatusCode::NotImplemented => 501,
            StatusCode::ServiceUnavailable => 503,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use vane::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
    /// assert_eq!(StatusCode::Unauthorized.reason_phrase(), "Unauthorized");
    /// ```
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Accepted => "Accepted",
            StatusCode::Found => "Found",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Unauthorized => "Unauthorized",
            StatusCode::PaymentRequired => "Payment Required",
            StatusCode::NotFound => "Not Found",
            StatusCode::NotImplemented => "Not Implemented",
            StatusCode::ServiceUnavailable => "Service Unavailable",
        }
    }
}

/// Current time in the `Date:` header format.
pub fn http_date() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// A response head plus an optional inline body.
///
/// Headers keep insertion order so the wire layout is stable.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```ignore
/// let response = ResponseBuilder::new(StatusCode::Ok)
///     .header("Content-Type", "text/html")
///     .body(b"<html></html>".to_vec())
///     .build();
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    delimit_by_close: bool,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            delimit_by_close: false,
        }
    }

    /// Adds or replaces a header. Names compare case-insensitively.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&key))
        {
            Some(slot) => slot.1 = value,
            None => self.headers.push((key, value)),
        }
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Omits `Content-Length`; the body ends when the connection closes.
    pub fn delimit_by_close(mut self) -> Self {
        self.delimit_by_close = true;
        self
    }

    /// Builds the final Response.
    ///
    /// Adds `Content-Length` from the inline body unless one is already set
    /// or the body is close-delimited.
    pub fn build(self) -> Response {
        let needs_length = !self.delimit_by_close
            && !self
                .headers
                .iter()
                .any(|(k, _)| k.eq_ignore_ascii_case("Content-Length"));
        let len = self.body.len();
        let mut builder = self;
        if needs_length {
            builder = builder.header("Content-Length", len.to_string());
        }

        Response {
            status: builder.status,
            headers: builder.headers,
            body: builder.body,
        }
    }
}

impl Response {
    /// Header for a successful reply whose body is sent separately.
    ///
    /// `content_length` of `None` leaves the body close-delimited.
    pub fn reply_head(
        server: &str,
        content_type: &str,
        content_length: Option<u64>,
        persistent: bool,
    ) -> Self {
        let builder = ResponseBuilder::new(StatusCode::Ok)
            .header("Date", http_date())
            .header("Server", server)
            .header("Connection", if persistent { "keep-alive" } else { "close" })
            .header("Content-Type", content_type);
        match content_length {
            Some(len) => builder.header("Content-Length", len.to_string()).build(),
            None => builder.delimit_by_close().build(),
        }
    }

    /// Complete error reply with a small HTML page naming the file.
    pub fn error(status: StatusCode, server: &str, uri: Option<&str>) -> Self {
        let code = status.as_u16();
        let text = status.reason_phrase();
        let mut page = format!(
            "<html><head><title>Error {code}</title></head>\r\n<body><h2>Error {code}: {text}<br></h2>\r\n"
        );
        if let Some(uri) = uri {
            page.push_str(&format!("File: {uri}<br>\r\n"));
        }
        page.push_str("</body></html>\r\n");

        let mut builder = ResponseBuilder::new(status).header("Date", http_date());
        if status == StatusCode::Unauthorized {
            builder = builder.header(
                "WWW-Authenticate",
                format!("Basic realm=\"{}\"", uri.unwrap_or("")),
            );
        }
        builder
            .header("Server", server)
            .header("Connection", "close")
            .header("Content-Type", "text/html")
            .body(page.into_bytes())
            .build()
    }

    /// `302 Found` pointing the client at `location`.
    pub fn redirect(server: &str, location: &str) -> Self {
        ResponseBuilder::new(StatusCode::Found)
            .header("Date", http_date())
            .header("Server", server)
            .header("Location", location)
            .header("Connection", "close")
            .build()
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// Markup wrapped around the message a failing form handler returns.
pub fn form_error_page(message: &str) -> String {
    format!(
        "<html><head><title>Form Error</title></head>\r\n<body><center><br><br><br><h2>Error in form: {message} <br></h2></body></html>\r\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_names_realm() {
        let resp = Response::error(StatusCode::Unauthorized, "test", Some("secret.htm"));
        assert_eq!(
            resp.header("WWW-Authenticate"),
            Some("Basic realm=\"secret.htm\"")
        );
        assert_eq!(resp.header("Connection"), Some("close"));
    }

    #[test]
    fn reply_head_without_length_is_close_delimited() {
        let resp = Response::reply_head("test", "text/html", None, false);
        assert!(resp.header("Content-Length").is_none());
        let resp = Response::reply_head("test", "image/png", Some(1234), false);
        assert_eq!(resp.header("Content-Length"), Some("1234"));
    }
}
