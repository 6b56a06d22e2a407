use std::fs;

use super::{Outcome, Target, autoindex, error_outcome, files, head_response, redirect_for, resolve_target};
use crate::config::LocationConfig;
use crate::http::request::ParsedRequest;
use crate::http::response::{ResponseBuilder, StatusCode};

/// Headers GET would send, without ever opening a body stream.
pub fn handle(request: &ParsedRequest, location: &LocationConfig) -> Outcome {
    if let Some(redirect) = redirect_for(request, location) {
        return redirect;
    }

    let path = files::construct_file_path(&location.root, &location.path, &request.path);
    match resolve_target(&path, location) {
        Ok(Target::File(file)) => match fs::metadata(&file) {
            Ok(meta) => Outcome::Respond(head_response(StatusCode::Ok, &file, meta.len())),
            Err(_) => error_outcome(StatusCode::InternalServerError, location),
        },
        Ok(Target::Listing(dir)) => match autoindex::render(&dir, &request.path) {
            Ok(html) => Outcome::Respond(
                ResponseBuilder::new(StatusCode::Ok)
                    .header("Content-Type", "text/html")
                    .header("Content-Length", html.len().to_string())
                    .build(),
            ),
            Err(_) => error_outcome(StatusCode::InternalServerError, location),
        },
        Err(status) => error_outcome(status, location),
    }
}
