use std::fs;
use std::path::Path;

use tracing::{info, warn};

use super::{Outcome, RequestContext, autoindex::escape_html, error_outcome, files};
use crate::cgi::CgiRequest;
use crate::config::LocationConfig;
use crate::http::multipart::{self, Part};
use crate::http::request::ParsedRequest;
use crate::http::response::{Response, StatusCode};

pub fn handle(request: &ParsedRequest, location: &LocationConfig, ctx: &RequestContext) -> Outcome {
    let path = files::construct_file_path(&location.root, &location.path, &request.path);
    if path.is_file() {
        if let Some(interpreter) = location.cgi_interpreter(&path) {
            return Outcome::Cgi(CgiRequest::from_request(request, &path, interpreter, ctx.peer, ctx.port));
        }
    }

    let Some(content_type) = request.content_type() else {
        return error_outcome(StatusCode::BadRequest, location);
    };

    if let Some(boundary) = multipart::boundary(content_type) {
        let parts = multipart::parse(&request.body, boundary);
        if parts.is_empty() {
            return error_outcome(StatusCode::BadRequest, location);
        }
        return save_upload(&parts, &location.upload_path, location);
    }

    if content_type.trim_start().starts_with("multipart/form-data") {
        // multipart without a usable boundary
        return error_outcome(StatusCode::BadRequest, location);
    }

    error_outcome(StatusCode::UnsupportedMediaType, location)
}

fn save_upload(parts: &[Part], dir: &Path, location: &LocationConfig) -> Outcome {
    if let Err(e) = fs::create_dir_all(dir) {
        warn!(dir = %dir.display(), error = %e, "cannot create upload directory");
        return error_outcome(StatusCode::InternalServerError, location);
    }

    let mut summary = String::from("<html><body><h1>Upload complete</h1><ul>\n");

    for part in parts {
        match &part.filename {
            Some(filename) => {
                // Only the final component of a client-supplied name is kept.
                let Some(name) = Path::new(filename).file_name() else {
                    continue;
                };
                let target = dir.join(name);
                if let Err(e) = fs::write(&target, &part.data) {
                    warn!(file = %target.display(), error = %e, "upload write failed");
                    return error_outcome(StatusCode::InternalServerError, location);
                }
                info!(file = %target.display(), bytes = part.data.len(), "file uploaded");
                summary.push_str(&format!(
                    "<li>{}: {} ({} bytes)</li>\n",
                    escape_html(&part.name),
                    escape_html(&name.to_string_lossy()),
                    part.data.len()
                ));
            }
            None => {
                summary.push_str(&format!(
                    "<li>{} = {}</li>\n",
                    escape_html(&part.name),
                    escape_html(&String::from_utf8_lossy(&part.data))
                ));
            }
        }
    }

    summary.push_str("</ul></body></html>\n");
    Outcome::Respond(Response::html(StatusCode::Ok, summary))
}
