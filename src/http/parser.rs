use std::collections::HashMap;

use thiserror::Error;

use crate::http::request::{Method, ParsedRequest};
use crate::http::response::StatusCode;
use crate::http::uri;

/// Reasons a request is rejected. Each maps to exactly one status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("header block is not terminated by a blank line")]
    MissingBlankLine,
    #[error("malformed request line")]
    MalformedRequestLine,
    #[error("malformed header line")]
    MalformedHeader,
    #[error("unknown method")]
    InvalidMethod,
    #[error("method not implemented")]
    MethodNotImplemented,
    #[error("invalid character in request target")]
    InvalidUriChar,
    #[error("invalid percent-encoding")]
    InvalidPercentEncoding,
    #[error("path escapes the document root")]
    Traversal,
    #[error("malformed query string")]
    MalformedQuery,
    #[error("request target too long")]
    UriTooLong,
    #[error("malformed protocol version")]
    MalformedVersion,
    #[error("protocol version not supported")]
    VersionNotSupported,
    #[error("missing Host header")]
    MissingHost,
    #[error("invalid Host header")]
    InvalidHost,
    #[error("invalid Content-Length")]
    InvalidContentLength,
}

impl ParseError {
    pub fn status(&self) -> StatusCode {
        match self {
            ParseError::MethodNotImplemented => StatusCode::NotImplemented,
            ParseError::Traversal => StatusCode::Forbidden,
            ParseError::UriTooLong => StatusCode::UriTooLong,
            ParseError::VersionNotSupported => StatusCode::HttpVersionNotSupported,
            _ => StatusCode::BadRequest,
        }
    }
}

/// Limits applied while validating a request.
#[derive(Debug, Clone, Copy)]
pub struct ParseLimits {
    pub max_uri_length: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self { max_uri_length: 512 }
    }
}

/// Reports whether `buf` holds a whole request.
///
/// True once the header block is terminated and either no Content-Length
/// is declared or the declared body has fully arrived. Chunked bodies are
/// not decoded, so such requests count as complete once the headers are in.
pub fn is_complete(buf: &[u8]) -> bool {
    let Some(headers_end) = find_headers_end(buf) else {
        return false;
    };

    match declared_content_length(&buf[..headers_end]) {
        Some(length) => buf.len() >= (headers_end + 4).saturating_add(length),
        None => true,
    }
}

/// Leading-digit value of the first Content-Length header, if any.
///
/// A value with no leading digits is treated as absent here; the parser
/// rejects it once the request is dispatched.
pub(crate) fn declared_content_length(head: &[u8]) -> Option<usize> {
    head.split(|&b| b == b'\n').find_map(|line| {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let colon = line.iter().position(|&b| b == b':')?;
        if !line[..colon].eq_ignore_ascii_case(b"content-length") {
            return None;
        }
        let digits: Vec<u8> = line[colon + 1..]
            .iter()
            .skip_while(|b| b.is_ascii_whitespace())
            .take_while(|b| b.is_ascii_digit())
            .copied()
            .collect();
        std::str::from_utf8(&digits).ok()?.parse().ok()
    })
}

/// Parses and validates one request.
///
/// Never fails outright: a rejected request comes back with `error` set
/// and `complete` false.
pub fn parse_request(buf: &[u8], limits: &ParseLimits) -> ParsedRequest {
    let mut request = ParsedRequest::default();

    match parse_into(&mut request, buf, limits) {
        Ok(()) => request.complete = true,
        Err(e) => {
            request.error = Some(e);
            request.complete = false;
        }
    }

    request
}

fn parse_into(req: &mut ParsedRequest, buf: &[u8], limits: &ParseLimits) -> Result<(), ParseError> {
    let headers_end = find_headers_end(buf).ok_or(ParseError::MissingBlankLine)?;
    let head = std::str::from_utf8(&buf[..headers_end]).map_err(|_| ParseError::MalformedRequestLine)?;
    let body_bytes = &buf[headers_end + 4..];

    let mut lines = head.split("\r\n");

    // Request line: exactly two separating spaces.
    let request_line = lines.next().ok_or(ParseError::MalformedRequestLine)?;
    let (method, rest) = request_line.split_once(' ').ok_or(ParseError::MalformedRequestLine)?;
    let (target, version) = rest.split_once(' ').ok_or(ParseError::MalformedRequestLine)?;
    if method.is_empty() || target.is_empty() || version.is_empty() {
        return Err(ParseError::MalformedRequestLine);
    }

    req.target = target.to_string();
    req.version = version.to_string();

    let method = Method::from_str(method).ok_or(ParseError::InvalidMethod)?;
    if !method.is_implemented() {
        return Err(ParseError::MethodNotImplemented);
    }
    req.method = Some(method);

    validate_target(req, target, limits)?;
    validate_version(version)?;

    for line in lines {
        let (name, value) = line.split_once(": ").ok_or(ParseError::MalformedHeader)?;
        req.headers.insert(name.to_string(), value.trim().to_string());
    }

    validate_host(req)?;
    read_body(req, body_bytes, headers_end + 4)
}

fn validate_target(req: &mut ParsedRequest, target: &str, limits: &ParseLimits) -> Result<(), ParseError> {
    if !target.bytes().all(uri::is_uri_char) {
        return Err(ParseError::InvalidUriChar);
    }

    let (raw_path, raw_query) = match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target, ""),
    };

    let path = uri::percent_decode(raw_path)?;
    let query = uri::percent_decode(raw_query)?;
    req.path = uri::normalize_path(&path)?;

    let mut queries = HashMap::new();
    for (key, value) in uri::parse_query(raw_query)? {
        queries.insert(uri::percent_decode(&key)?, uri::percent_decode(&value)?);
    }
    req.queries = queries;
    req.query_string = query;

    // Measured on the decoded path; the query does not count.
    if req.path.len() > limits.max_uri_length {
        return Err(ParseError::UriTooLong);
    }
    Ok(())
}

fn validate_version(version: &str) -> Result<(), ParseError> {
    if !version.starts_with("HTTP/") {
        return Err(ParseError::MalformedVersion);
    }
    if version != "HTTP/1.1" {
        return Err(ParseError::VersionNotSupported);
    }
    Ok(())
}

fn validate_host(req: &ParsedRequest) -> Result<(), ParseError> {
    let host = req.header("Host").ok_or(ParseError::MissingHost)?;
    if uri::is_valid_host(host) {
        Ok(())
    } else {
        Err(ParseError::InvalidHost)
    }
}

fn read_body(req: &mut ParsedRequest, body: &[u8], head_len: usize) -> Result<(), ParseError> {
    if req.header("Transfer-Encoding").is_some() {
        // Taken as-is: inbound chunked bodies are not decoded.
        req.body = body.to_vec();
        req.total_size = head_len + body.len();
        return Ok(());
    }

    let length = match req.header("Content-Length") {
        Some(value) => {
            if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ParseError::InvalidContentLength);
            }
            value.parse::<usize>().map_err(|_| ParseError::InvalidContentLength)?
        }
        None => 0,
    };

    req.body = body[..length.min(body.len())].to_vec();
    req.total_size = head_len + req.body.len();
    Ok(())
}

pub(crate) fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
