use webserv::http::parser::{ParseError, ParseLimits, is_complete, parse_request};
use webserv::http::request::Method;
use webserv::http::response::StatusCode;

fn parse(raw: &[u8]) -> webserv::http::request::ParsedRequest {
    parse_request(raw, &ParseLimits::default())
}

#[test]
fn test_parse_simple_get_request() {
    let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let parsed = parse(req);

    assert!(parsed.complete);
    assert_eq!(parsed.error, None);
    assert_eq!(parsed.method, Some(Method::GET));
    assert_eq!(parsed.path, "/");
    assert_eq!(parsed.version, "HTTP/1.1");
    assert_eq!(parsed.headers.get("Host").unwrap(), "example.com");
    assert_eq!(parsed.total_size, req.len());
}

#[test]
fn test_parse_post_request_with_body() {
    let req = b"POST /api HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello";
    let parsed = parse(req);

    assert!(parsed.complete);
    assert_eq!(parsed.method, Some(Method::POST));
    assert_eq!(parsed.path, "/api");
    assert_eq!(parsed.body, b"hello".to_vec());
    assert_eq!(parsed.total_size, req.len());
}

#[test]
fn test_header_names_kept_as_received() {
    let parsed = parse(b"GET / HTTP/1.1\r\nhost: localhost\r\nX-Thing: a b \r\n\r\n");

    assert!(parsed.complete);
    assert!(parsed.headers.contains_key("host"));
    assert!(!parsed.headers.contains_key("Host"));
    assert_eq!(parsed.header("Host"), Some("localhost"));
    assert_eq!(parsed.header("X-Thing"), Some("a b"));
}

#[test]
fn test_query_string_split_and_decoded() {
    let parsed = parse(b"GET /search%20me?q=rust%20lang&page=2 HTTP/1.1\r\nHost: localhost\r\n\r\n");

    assert!(parsed.complete);
    assert_eq!(parsed.path, "/search me");
    assert_eq!(parsed.target, "/search%20me?q=rust%20lang&page=2");
    assert_eq!(parsed.query_string, "q=rust lang&page=2");
    assert_eq!(parsed.queries.get("q").unwrap(), "rust lang");
    assert_eq!(parsed.queries.get("page").unwrap(), "2");
}

#[test]
fn test_path_is_normalized() {
    let parsed = parse(b"GET /a/./b/../c.html HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(parsed.path, "/a/c.html");
}

#[test]
fn test_traversal_above_root_is_forbidden() {
    let parsed = parse(b"GET /../etc/passwd HTTP/1.1\r\nHost: localhost\r\n\r\n");

    assert!(!parsed.complete);
    assert_eq!(parsed.error, Some(ParseError::Traversal));
    assert_eq!(parsed.error_status(), Some(StatusCode::Forbidden));
}

#[test]
fn test_encoded_traversal_is_forbidden() {
    let parsed = parse(b"GET /a/%2E%2E/%2E%2E/secret HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(parsed.error_status(), Some(StatusCode::Forbidden));
}

#[test]
fn test_method_classes() {
    for (method, expected) in [
        ("PUT", Some(StatusCode::NotImplemented)),
        ("PATCH", Some(StatusCode::NotImplemented)),
        ("OPTIONS", Some(StatusCode::NotImplemented)),
        ("CONNECT", Some(StatusCode::NotImplemented)),
        ("TRACE", Some(StatusCode::NotImplemented)),
        ("BREW", Some(StatusCode::BadRequest)),
        ("get", Some(StatusCode::BadRequest)),
        ("HEAD", None),
        ("DELETE", None),
    ] {
        let raw = format!("{method} / HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let parsed = parse(raw.as_bytes());
        assert_eq!(parsed.error_status(), expected, "method {method}");
    }
}

#[test]
fn test_malformed_request_line() {
    let parsed = parse(b"GET/HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(parsed.error, Some(ParseError::MalformedRequestLine));
    assert!(!parsed.complete);
}

#[test]
fn test_header_without_colon_space() {
    let parsed = parse(b"GET / HTTP/1.1\r\nHost:localhost\r\n\r\n");
    assert_eq!(parsed.error, Some(ParseError::MalformedHeader));
    assert_eq!(parsed.error_status(), Some(StatusCode::BadRequest));
}

#[test]
fn test_bad_characters_and_escapes() {
    let parsed = parse(b"GET /a<b HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(parsed.error, Some(ParseError::InvalidUriChar));

    let parsed = parse(b"GET /a%zzb HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(parsed.error, Some(ParseError::InvalidPercentEncoding));
}

#[test]
fn test_malformed_query() {
    let parsed = parse(b"GET /p?flag HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(parsed.error, Some(ParseError::MalformedQuery));
}

#[test]
fn test_uri_too_long() {
    let limits = ParseLimits { max_uri_length: 16 };
    let parsed = parse_request(b"GET /0123456789abcdef HTTP/1.1\r\nHost: localhost\r\n\r\n", &limits);
    assert_eq!(parsed.error_status(), Some(StatusCode::UriTooLong));

    let parsed = parse_request(b"GET /0123456789 HTTP/1.1\r\nHost: localhost\r\n\r\n", &limits);
    assert!(parsed.complete);
}

#[test]
fn test_uri_length_counts_decoded_path_only() {
    let limits = ParseLimits { max_uri_length: 512 };
    let target = format!("/{}", "%41".repeat(200));
    let raw = format!("GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n");
    let parsed = parse_request(raw.as_bytes(), &limits);
    assert!(parsed.complete, "{:?}", parsed.error);
    assert_eq!(parsed.path.len(), 201);

    let query = format!("q={}", "x".repeat(600));
    let raw = format!("GET /short?{query} HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert!(parse_request(raw.as_bytes(), &limits).complete);

    let raw = format!("GET /{} HTTP/1.1\r\nHost: localhost\r\n\r\n", "%41".repeat(600));
    let parsed = parse_request(raw.as_bytes(), &limits);
    assert_eq!(parsed.error, Some(ParseError::UriTooLong));
}

#[test]
fn test_request_line_checked_before_headers() {
    let parsed = parse(b"PUT / HTTP/1.1\r\nBadHeader\r\n\r\n");
    assert_eq!(parsed.error_status(), Some(StatusCode::NotImplemented));

    let parsed = parse(b"GET /../x HTTP/1.1\r\nBadHeader\r\n\r\n");
    assert_eq!(parsed.error_status(), Some(StatusCode::Forbidden));

    let parsed = parse(b"GET / HTTP/1.0\r\nBadHeader\r\n\r\n");
    assert_eq!(parsed.error_status(), Some(StatusCode::HttpVersionNotSupported));

    let parsed = parse(b"GET / HTTP/1.1\r\nBadHeader\r\n\r\n");
    assert_eq!(parsed.error, Some(ParseError::MalformedHeader));
}

#[test]
fn test_versions() {
    let parsed = parse(b"GET / HTTP/1.0\r\nHost: localhost\r\n\r\n");
    assert_eq!(parsed.error_status(), Some(StatusCode::HttpVersionNotSupported));

    let parsed = parse(b"GET / HTTP/2\r\nHost: localhost\r\n\r\n");
    assert_eq!(parsed.error_status(), Some(StatusCode::HttpVersionNotSupported));

    let parsed = parse(b"GET / FTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(parsed.error, Some(ParseError::MalformedVersion));
    assert_eq!(parsed.error_status(), Some(StatusCode::BadRequest));
}

#[test]
fn test_host_is_required_and_validated() {
    let parsed = parse(b"GET / HTTP/1.1\r\nAccept: */*\r\n\r\n");
    assert_eq!(parsed.error, Some(ParseError::MissingHost));

    let parsed = parse(b"GET / HTTP/1.1\r\nHost: 999.999.999.999\r\n\r\n");
    assert_eq!(parsed.error, Some(ParseError::InvalidHost));
    assert_eq!(parsed.error_status(), Some(StatusCode::BadRequest));

    let parsed = parse(b"GET / HTTP/1.1\r\nHost: example.com:80x\r\n\r\n");
    assert_eq!(parsed.error, Some(ParseError::InvalidHost));

    let parsed = parse(b"GET / HTTP/1.1\r\nHost: 10.0.0.1:8080\r\n\r\n");
    assert!(parsed.complete);
    assert_eq!(parsed.hostname(), "10.0.0.1");
}

#[test]
fn test_content_length_must_be_numeric() {
    let parsed = parse(b"POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: 12abc\r\n\r\n");
    assert_eq!(parsed.error, Some(ParseError::InvalidContentLength));

    let parsed = parse(b"POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: -1\r\n\r\n");
    assert_eq!(parsed.error, Some(ParseError::InvalidContentLength));
}

#[test]
fn test_transfer_encoding_skips_body_validation() {
    let raw = b"POST / HTTP/1.1\r\nHost: localhost\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n";
    let parsed = parse(raw);

    assert!(parsed.complete);
    assert_eq!(parsed.body, b"5\r\nhello\r\n0\r\n\r\n".to_vec());
    assert_eq!(parsed.total_size, raw.len());
}

#[test]
fn test_keep_alive_defaults_on() {
    let parsed = parse(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert!(parsed.keep_alive());

    let parsed = parse(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    assert!(!parsed.keep_alive());
}

#[test]
fn test_is_complete_headers_only() {
    assert!(!is_complete(b""));
    assert!(!is_complete(b"GET / HTTP/1.1\r\nHost: localhost\r\n"));
    assert!(is_complete(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n"));
}

#[test]
fn test_is_complete_waits_for_declared_body() {
    let head = b"POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: 50\r\n\r\n".to_vec();
    let mut partial = head.clone();
    partial.extend_from_slice(&[b'x'; 30]);
    assert!(!is_complete(&partial));

    let mut full = head;
    full.extend_from_slice(&[b'x'; 50]);
    assert!(is_complete(&full));
}

#[test]
fn test_is_complete_with_chunked_body_needs_headers_only() {
    assert!(is_complete(b"POST / HTTP/1.1\r\nHost: localhost\r\nTransfer-Encoding: chunked\r\n\r\n"));
}

#[test]
fn test_error_means_incomplete() {
    for raw in [
        &b"BREW / HTTP/1.1\r\nHost: localhost\r\n\r\n"[..],
        b"GET / HTTP/1.1\r\n\r\n",
        b"GET /%G0 HTTP/1.1\r\nHost: localhost\r\n\r\n",
    ] {
        let parsed = parse(raw);
        assert!(parsed.error.is_some());
        assert!(!parsed.complete);
    }
}
