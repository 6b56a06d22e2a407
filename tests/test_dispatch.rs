use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};
use webserv::config::{Config, LocationConfig};
use webserv::handler::{Outcome, RequestContext, dispatch};
use webserv::http::parser::{ParseLimits, parse_request};
use webserv::http::response::StatusCode;
use webserv::http::transfer::Framing;

struct Site {
    dir: TempDir,
    config: Config,
}

impl Site {
    fn new() -> Self {
        let tmp = tempdir().unwrap();
        let dir = tmp.path();
        let www = dir.join("www");
        fs::create_dir_all(www.join("listing/sub")).unwrap();
        fs::create_dir_all(www.join("closed")).unwrap();
        fs::create_dir_all(www.join("docs")).unwrap();
        fs::create_dir_all(www.join("protected")).unwrap();
        fs::create_dir_all(dir.join("errors")).unwrap();
        fs::write(www.join("index.html"), "<h1>home</h1>").unwrap();
        fs::write(www.join("docs/index.html"), "<h1>docs</h1>").unwrap();
        fs::write(www.join("listing/a.txt"), "a").unwrap();
        fs::write(www.join("protected/file.txt"), "keep me").unwrap();
        fs::write(www.join("victim.txt"), "bye").unwrap();
        fs::write(www.join("script.sh"), "echo hi").unwrap();
        fs::write(dir.join("errors/404.html"), "<h1>custom 404</h1>").unwrap();

        let yaml = format!(
            r#"
servers:
  - listen: 8080
    root: {www}
    client_max_body_size: 256
    upload_path: {uploads}
    error_pages:
      404: {errors}/404.html
    cgi:
      .sh: /bin/sh
    redirects:
      /moved: /docs/
    locations:
      - path: /listing
        root: {www}/listing
        autoindex: true
      - path: /protected
        root: {www}/protected
        allowed_methods: [GET]
      - path: /away
        return:
          code: 302
          target: https://example.com/
"#,
            www = www.display(),
            uploads = dir.join("uploads").display(),
            errors = dir.join("errors").display(),
        );
        let config = Config::from_yaml_str(&yaml).unwrap();
        Self { dir: tmp, config }
    }

    fn run(&self, raw: &[u8]) -> Outcome {
        let request = parse_request(raw, &ParseLimits::default());
        let location: LocationConfig = self.config.resolve(request.hostname(), 8080, &request.path);
        let ctx = RequestContext {
            peer: "127.0.0.1:40000".parse::<SocketAddr>().unwrap(),
            port: 8080,
        };
        dispatch(&request, &location, &ctx)
    }

    fn www(&self) -> PathBuf {
        self.dir.path().join("www")
    }
}

fn expect_stream(outcome: Outcome) -> (PathBuf, StatusCode, Framing) {
    match outcome {
        Outcome::Stream { path, status, framing } => (path, status, framing),
        other => panic!("expected a stream, got {other:?}"),
    }
}

fn expect_response(outcome: Outcome) -> webserv::http::response::Response {
    match outcome {
        Outcome::Respond(response) => response,
        other => panic!("expected a response, got {other:?}"),
    }
}

#[test]
fn test_get_existing_file_streams_chunked() {
    let site = Site::new();
    let (path, status, framing) = expect_stream(site.run(b"GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n"));

    assert_eq!(path, site.www().join("index.html"));
    assert_eq!(status, StatusCode::Ok);
    assert_eq!(framing, Framing::Chunked);
}

#[test]
fn test_get_directory_uses_index() {
    let site = Site::new();
    let (path, _, _) = expect_stream(site.run(b"GET /docs/ HTTP/1.1\r\nHost: localhost\r\n\r\n"));
    assert_eq!(path, site.www().join("docs").join("index.html"));
}

#[test]
fn test_get_directory_listing_and_forbidden() {
    let site = Site::new();

    let response = expect_response(site.run(b"GET /listing/ HTTP/1.1\r\nHost: localhost\r\n\r\n"));
    assert_eq!(response.status, StatusCode::Ok);
    let html = String::from_utf8(response.body).unwrap();
    assert!(html.contains("sub/"));
    assert!(html.contains("a.txt"));

    let response = expect_response(site.run(b"GET /closed HTTP/1.1\r\nHost: localhost\r\n\r\n"));
    assert_eq!(response.status, StatusCode::Forbidden);
}

#[test]
fn test_missing_file_uses_configured_error_page() {
    let site = Site::new();
    let (path, status, framing) = expect_stream(site.run(b"GET /nope.html HTTP/1.1\r\nHost: localhost\r\n\r\n"));

    assert_eq!(status, StatusCode::NotFound);
    assert_eq!(framing, Framing::Fixed);
    assert!(path.ends_with("errors/404.html"));
}

#[test]
fn test_parse_errors_become_error_responses() {
    let site = Site::new();

    let response = expect_response(site.run(b"GET / HTTP/1.1\r\nHost: 999.999.999.999\r\n\r\n"));
    assert_eq!(response.status, StatusCode::BadRequest);

    let response = expect_response(site.run(b"PUT / HTTP/1.1\r\nHost: localhost\r\n\r\n"));
    assert_eq!(response.status, StatusCode::NotImplemented);
}

#[test]
fn test_disallowed_method_is_405() {
    let site = Site::new();
    let response = expect_response(site.run(b"DELETE /protected/file.txt HTTP/1.1\r\nHost: localhost\r\n\r\n"));

    assert_eq!(response.status, StatusCode::MethodNotAllowed);
    assert!(site.www().join("protected/file.txt").exists());
}

#[test]
fn test_body_over_limit_is_413() {
    let site = Site::new();
    let body = "x".repeat(257);
    let raw = format!(
        "POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Type: text/plain\r\nContent-Length: 257\r\n\r\n{body}"
    );
    let response = expect_response(site.run(raw.as_bytes()));
    assert_eq!(response.status, StatusCode::PayloadTooLarge);
}

#[test]
fn test_head_has_length_but_no_body() {
    let site = Site::new();
    let response = expect_response(site.run(b"HEAD /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n"));

    assert_eq!(response.status, StatusCode::Ok);
    assert!(response.body.is_empty());
    assert_eq!(response.headers.get("Content-Length").unwrap(), "13");
    assert_eq!(response.headers.get("Content-Type").unwrap(), "text/html");

    // An error page for HEAD is also reduced to headers.
    let response = expect_response(site.run(b"HEAD /nope.html HTTP/1.1\r\nHost: localhost\r\n\r\n"));
    assert_eq!(response.status, StatusCode::NotFound);
    assert!(response.body.is_empty());
    assert_eq!(response.headers.get("Content-Length").unwrap(), "19");
}

#[test]
fn test_redirects() {
    let site = Site::new();

    match site.run(b"GET /away/anything HTTP/1.1\r\nHost: localhost\r\n\r\n") {
        Outcome::Redirect { location, status } => {
            assert_eq!(location, "https://example.com/");
            assert_eq!(status, StatusCode::Found);
        }
        other => panic!("expected redirect, got {other:?}"),
    }

    match site.run(b"GET /moved HTTP/1.1\r\nHost: localhost\r\n\r\n") {
        Outcome::Redirect { location, status } => {
            assert_eq!(location, "/docs/");
            assert_eq!(status, StatusCode::MovedPermanently);
        }
        other => panic!("expected redirect, got {other:?}"),
    }
}

#[test]
fn test_cgi_extension_produces_cgi_request() {
    let site = Site::new();
    match site.run(b"GET /script.sh?x=1 HTTP/1.1\r\nHost: localhost\r\n\r\n") {
        Outcome::Cgi(request) => {
            assert_eq!(request.interpreter, Path::new("/bin/sh"));
            assert!(request.script.ends_with("script.sh"));
            assert_eq!(request.env["QUERY_STRING"], "x=1");
        }
        other => panic!("expected CGI, got {other:?}"),
    }
}

#[test]
fn test_post_multipart_upload_saves_file() {
    let site = Site::new();
    let body = "--b0\r\nContent-Disposition: form-data; name=\"file\"; filename=\"../../evil.txt\"\r\n\r\nuploaded!\r\n--b0--\r\n";
    let raw = format!(
        "POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Type: multipart/form-data; boundary=b0\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );

    let response = expect_response(site.run(raw.as_bytes()));
    assert_eq!(response.status, StatusCode::Ok);

    let saved = site.dir.path().join("uploads").join("evil.txt");
    assert_eq!(fs::read_to_string(saved).unwrap(), "uploaded!");
    assert!(!site.dir.path().join("evil.txt").exists());
}

#[test]
fn test_post_content_type_rules() {
    let site = Site::new();

    let response = expect_response(site.run(b"POST /x HTTP/1.1\r\nHost: localhost\r\nContent-Length: 2\r\n\r\nhi"));
    assert_eq!(response.status, StatusCode::BadRequest);

    let response = expect_response(
        site.run(b"POST /x HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: 2\r\n\r\n{}"),
    );
    assert_eq!(response.status, StatusCode::UnsupportedMediaType);
}

#[test]
fn test_delete_then_missing() {
    let site = Site::new();
    let raw = b"DELETE /victim.txt HTTP/1.1\r\nHost: localhost\r\n\r\n";

    let response = expect_response(site.run(raw));
    assert_eq!(response.status, StatusCode::NoContent);
    assert!(!site.www().join("victim.txt").exists());

    let (_, status, _) = expect_stream(site.run(raw));
    assert_eq!(status, StatusCode::NotFound);
}
