use tracing::{debug, warn};

use super::{Outcome, RequestContext, Target, autoindex, error_outcome, files, redirect_for, resolve_target};
use crate::cgi::CgiRequest;
use crate::config::LocationConfig;
use crate::http::request::ParsedRequest;
use crate::http::response::{Response, StatusCode};
use crate::http::transfer::Framing;

pub fn handle(request: &ParsedRequest, location: &LocationConfig, ctx: &RequestContext) -> Outcome {
    if let Some(redirect) = redirect_for(request, location) {
        return redirect;
    }

    let path = files::construct_file_path(&location.root, &location.path, &request.path);
    debug!(path = %path.display(), "GET");

    match resolve_target(&path, location) {
        Ok(Target::File(file)) => match location.cgi_interpreter(&file) {
            Some(interpreter) => Outcome::Cgi(CgiRequest::from_request(
                request,
                &file,
                interpreter,
                ctx.peer,
                ctx.port,
            )),
            None => Outcome::Stream {
                path: file,
                status: StatusCode::Ok,
                framing: Framing::Chunked,
            },
        },
        Ok(Target::Listing(dir)) => match autoindex::render(&dir, &request.path) {
            Ok(html) => Outcome::Respond(Response::html(StatusCode::Ok, html)),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "directory listing failed");
                error_outcome(StatusCode::InternalServerError, location)
            }
        },
        Err(status) => error_outcome(status, location),
    }
}
