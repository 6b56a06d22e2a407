use std::fs;

use tracing::{info, warn};

use super::{Outcome, error_outcome, files, io_status};
use crate::config::LocationConfig;
use crate::http::request::ParsedRequest;
use crate::http::response::{ResponseBuilder, StatusCode};

/// Removes a file, or a directory with everything below it.
pub fn handle(request: &ParsedRequest, location: &LocationConfig) -> Outcome {
    let path = files::construct_file_path(&location.root, &location.path, &request.path);
    if path == location.root {
        return error_outcome(StatusCode::Forbidden, location);
    }

    let meta = match fs::symlink_metadata(&path) {
        Ok(meta) => meta,
        Err(e) => return error_outcome(io_status(&e), location),
    };

    let removed = if meta.is_dir() {
        fs::remove_dir_all(&path)
    } else {
        fs::remove_file(&path)
    };

    match removed {
        Ok(()) => {
            info!(path = %path.display(), "deleted");
            Outcome::Respond(ResponseBuilder::new(StatusCode::NoContent).build())
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "delete failed");
            error_outcome(io_status(&e), location)
        }
    }
}
