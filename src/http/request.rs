use std::collections::HashMap;

use serde::Deserialize;

use crate::http::parser::ParseError;
use crate::http::response::StatusCode;

/// HTTP request methods.
///
/// Every method token the parser recognises. Only GET, POST, DELETE and
/// HEAD are served; the rest are answered with 501 Not Implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
    /// CONNECT - Establish a tunnel
    CONNECT,
    /// TRACE - Loop-back test
    TRACE,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// # Returns
    ///
    /// `Some(Method)` if the string matches a known method, `None` otherwise.
    ///
    /// # Example
    ///
    /// ```
    /// # use webserv::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "HEAD" => Some(Method::HEAD),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            "CONNECT" => Some(Method::CONNECT),
            "TRACE" => Some(Method::TRACE),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::CONNECT => "CONNECT",
            Method::TRACE => "TRACE",
        }
    }

    /// Whether the server has a handler for this method at all.
    pub fn is_implemented(&self) -> bool {
        matches!(self, Method::GET | Method::POST | Method::DELETE | Method::HEAD)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The parser's view of one request.
///
/// Built fresh for every parse. When `error` is set, `complete` is false
/// and only the fields filled before the failing check are meaningful.
#[derive(Debug, Clone, Default)]
pub struct ParsedRequest {
    /// `None` until the request line has been accepted.
    pub method: Option<Method>,
    /// Percent-decoded, traversal-normalised path without the query.
    pub path: String,
    /// The raw request target as it appeared on the request line.
    pub target: String,
    /// Decoded query string (everything after `?`).
    pub query_string: String,
    pub queries: HashMap<String, String>,
    pub version: String,
    /// Header names are kept as received.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Bytes of header block plus body.
    pub total_size: usize,
    pub complete: bool,
    pub error: Option<ParseError>,
}

impl ParsedRequest {
    /// Looks a header up by its exact name first, then case-insensitively.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .get(key)
            .or_else(|| {
                self.headers
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(key))
                    .map(|(_, value)| value)
            })
            .map(|v| v.as_str())
    }

    /// Determines whether the connection should remain open after the response.
    ///
    /// For HTTP/1.1 the default is keep-alive; only `Connection: close`
    /// ends the connection.
    pub fn keep_alive(&self) -> bool {
        self.header("Connection")
            .map(|v| !v.trim().eq_ignore_ascii_case("close"))
            .unwrap_or(true)
    }

    /// The `Host` header without its port.
    pub fn hostname(&self) -> &str {
        self.header("Host")
            .map(|h| h.split(':').next().unwrap_or(h))
            .unwrap_or("")
    }

    /// The status a failed parse should be answered with.
    pub fn error_status(&self) -> Option<StatusCode> {
        self.error.map(|e| e.status())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }
}
