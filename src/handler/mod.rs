//! Request dispatch.
//!
//! Handlers never touch sockets. They inspect the request and the resolved
//! location and return an [`Outcome`] that the event loop turns into bytes
//! on the wire.

pub mod autoindex;
pub mod delete;
pub mod files;
pub mod get;
pub mod head;
pub mod post;

use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::cgi::CgiRequest;
use crate::config::LocationConfig;
use crate::http::mime;
use crate::http::request::{Method, ParsedRequest};
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::http::transfer::Framing;

/// What the event loop should send back.
#[derive(Debug)]
pub enum Outcome {
    /// A response held entirely in memory.
    Respond(Response),
    /// Stream a file from disk.
    Stream {
        path: PathBuf,
        status: StatusCode,
        framing: Framing,
    },
    /// Run a script; its output becomes the response.
    Cgi(CgiRequest),
    Redirect { location: String, status: StatusCode },
}

impl Outcome {
    pub fn status(&self) -> StatusCode {
        match self {
            Outcome::Respond(response) => response.status,
            Outcome::Stream { status, .. } | Outcome::Redirect { status, .. } => *status,
            Outcome::Cgi(_) => StatusCode::Ok,
        }
    }

    /// Same headers, no body: for answering HEAD.
    fn into_head(self) -> Outcome {
        match self {
            Outcome::Respond(mut response) => {
                response.body.clear();
                Outcome::Respond(response)
            }
            Outcome::Stream { path, status, .. } => match fs::metadata(&path) {
                Ok(meta) => Outcome::Respond(head_response(status, &path, meta.len())),
                Err(_) => Outcome::Respond(bodiless(Response::internal_error())),
            },
            other => other,
        }
    }
}

/// Connection facts a handler may need beyond the request itself.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    pub peer: SocketAddr,
    pub port: u16,
}

/// Routes one parsed request to its method handler.
pub fn dispatch(request: &ParsedRequest, location: &LocationConfig, ctx: &RequestContext) -> Outcome {
    let outcome = route(request, location, ctx);
    if request.method == Some(Method::HEAD) {
        outcome.into_head()
    } else {
        outcome
    }
}

fn route(request: &ParsedRequest, location: &LocationConfig, ctx: &RequestContext) -> Outcome {
    if let Some(status) = request.error_status() {
        return error_outcome(status, location);
    }
    let Some(method) = request.method else {
        return error_outcome(StatusCode::BadRequest, location);
    };

    if request.body.len() > location.client_max_body_size {
        debug!(size = request.body.len(), limit = location.client_max_body_size, "body too large");
        return error_outcome(StatusCode::PayloadTooLarge, location);
    }
    if !location.allows(method) {
        debug!(%method, location = %location.path, "method not allowed");
        return error_outcome(StatusCode::MethodNotAllowed, location);
    }

    match method {
        Method::GET => get::handle(request, location, ctx),
        Method::HEAD => head::handle(request, location),
        Method::POST => post::handle(request, location, ctx),
        Method::DELETE => delete::handle(request, location),
        _ => error_outcome(StatusCode::NotImplemented, location),
    }
}

/// A configured HTML error page if one exists, else the built-in page.
pub fn error_outcome(status: StatusCode, location: &LocationConfig) -> Outcome {
    match location.error_pages.get(&status.as_u16()) {
        Some(page) if is_html(page) && page.is_file() => Outcome::Stream {
            path: page.clone(),
            status,
            framing: Framing::Fixed,
        },
        _ => Outcome::Respond(Response::error_page(status)),
    }
}

fn is_html(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("html") | Some("htm"))
}

pub(crate) fn head_response(status: StatusCode, path: &Path, size: u64) -> Response {
    ResponseBuilder::new(status)
        .header("Content-Type", mime::content_type(path))
        .header("Content-Length", size.to_string())
        .build()
}

fn bodiless(mut response: Response) -> Response {
    response.body.clear();
    response
}

/// A location `return` or a matching `redirects` entry.
pub(crate) fn redirect_for(request: &ParsedRequest, location: &LocationConfig) -> Option<Outcome> {
    if let Some(ret) = &location.return_to {
        return Some(Outcome::Redirect {
            location: ret.target.clone(),
            status: StatusCode::from_u16(ret.code).unwrap_or(StatusCode::Found),
        });
    }
    files::check_redirect(&request.path, &location.redirects).map(|target| Outcome::Redirect {
        location: target,
        status: StatusCode::MovedPermanently,
    })
}

/// What a GET or HEAD path refers to once directories are resolved.
pub(crate) enum Target {
    File(PathBuf),
    Listing(PathBuf),
}

/// Applies the existence, permission and directory rules shared by GET
/// and HEAD.
pub(crate) fn resolve_target(path: &Path, location: &LocationConfig) -> Result<Target, StatusCode> {
    let meta = fs::metadata(path).map_err(|e| io_status(&e))?;

    let file = if meta.is_dir() {
        match files::find_index_file(path, &location.index) {
            Some(index) => index,
            None if location.autoindex => return Ok(Target::Listing(path.to_path_buf())),
            None => return Err(StatusCode::Forbidden),
        }
    } else {
        path.to_path_buf()
    };

    fs::File::open(&file).map_err(|e| io_status(&e))?;
    Ok(Target::File(file))
}

pub(crate) fn io_status(error: &io::Error) -> StatusCode {
    match error.kind() {
        io::ErrorKind::NotFound => StatusCode::NotFound,
        io::ErrorKind::PermissionDenied => StatusCode::Forbidden,
        _ => StatusCode::InternalServerError,
    }
}
