//! CGI execution.
//!
//! One child process per request, stdout piped back, stdin closed. The
//! event loop waits for the child synchronously: while a script runs no
//! other connection is served, so the deadline bounds that stall.

use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::runtime::Runtime;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::http::multipart;
use crate::http::request::ParsedRequest;
use crate::http::response::{Response, SERVER_NAME, StatusCode};

/// Everything needed to start one script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgiRequest {
    pub interpreter: PathBuf,
    pub script: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl CgiRequest {
    pub fn from_request(
        request: &ParsedRequest,
        script: &Path,
        interpreter: &Path,
        peer: SocketAddr,
        port: u16,
    ) -> Self {
        let script = std::fs::canonicalize(script).unwrap_or_else(|_| script.to_path_buf());
        let method = request.method.map(|m| m.as_str()).unwrap_or("GET");

        let mut env = BTreeMap::new();
        env.insert("GATEWAY_INTERFACE".into(), "CGI/1.1".into());
        env.insert("SERVER_PROTOCOL".into(), "HTTP/1.1".into());
        env.insert("SERVER_SOFTWARE".into(), SERVER_NAME.into());
        env.insert("SERVER_PORT".into(), port.to_string());
        env.insert("REQUEST_METHOD".into(), method.into());
        env.insert("REQUEST_URI".into(), request.target.clone());
        env.insert("SCRIPT_NAME".into(), request.path.clone());
        env.insert("SCRIPT_FILENAME".into(), script.display().to_string());
        env.insert("QUERY_STRING".into(), query_string(request));
        env.insert("REMOTE_ADDR".into(), peer.ip().to_string());
        env.insert("CONTENT_LENGTH".into(), request.body.len().to_string());
        if let Some(content_type) = request.content_type() {
            env.insert("CONTENT_TYPE".into(), content_type.to_string());
        }
        if let Ok(path) = std::env::var("PATH") {
            env.insert("PATH".into(), path);
        }

        Self {
            interpreter: interpreter.to_path_buf(),
            script,
            env,
        }
    }
}

/// The URL query joined with any form fields carried in the body.
fn query_string(request: &ParsedRequest) -> String {
    let mut pieces: Vec<String> = Vec::new();
    if !request.query_string.is_empty() {
        pieces.push(request.query_string.clone());
    }

    let content_type = request.content_type().unwrap_or("");
    if content_type.starts_with("application/x-www-form-urlencoded") {
        let form = String::from_utf8_lossy(&request.body);
        let form = form.trim();
        if !form.is_empty() {
            pieces.push(form.to_string());
        }
    } else if let Some(boundary) = multipart::boundary(content_type) {
        pieces.extend(
            multipart::parse(&request.body, boundary)
                .into_iter()
                .filter(|p| p.filename.is_none())
                .map(|p| format!("{}={}", p.name, String::from_utf8_lossy(&p.data))),
        );
    }

    pieces.join("&")
}

#[derive(Debug, Error)]
pub enum CgiError {
    #[error("failed to start interpreter: {0}")]
    Spawn(#[source] io::Error),
    #[error("child stdout was not captured")]
    NoPipe,
    #[error("reading script output failed: {0}")]
    Io(#[from] io::Error),
    #[error("script exited with {0}")]
    Exit(ExitStatus),
}

#[derive(Debug)]
pub enum CgiOutcome {
    /// Zero exit status; the collected stdout.
    Completed(Vec<u8>),
    /// Deadline passed; the child was killed and reaped.
    TimedOut,
    Failed(CgiError),
}

impl CgiOutcome {
    pub fn status(&self) -> StatusCode {
        match self {
            CgiOutcome::Completed(_) => StatusCode::Ok,
            CgiOutcome::TimedOut => StatusCode::RequestTimeout,
            CgiOutcome::Failed(_) => StatusCode::InternalServerError,
        }
    }

    /// Completed output becomes the body; anything else is an error page.
    pub fn into_response(self) -> Response {
        match self {
            CgiOutcome::Completed(body) => Response::html(StatusCode::Ok, body),
            other => Response::error_page(other.status()),
        }
    }
}

/// A running child and the read end of its stdout pipe.
struct CgiInvocation {
    child: Child,
    stdout: ChildStdout,
    started: Instant,
    deadline: Instant,
}

impl CgiInvocation {
    async fn collect(&mut self) -> Result<(Vec<u8>, ExitStatus), CgiError> {
        let mut output = Vec::new();
        self.stdout.read_to_end(&mut output).await?;
        let status = self.child.wait().await?;
        Ok((output, status))
    }

    async fn terminate(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(error = %e, "kill after deadline failed");
        }
        if let Err(e) = self.child.wait().await {
            warn!(error = %e, "failed to reap CGI child");
        }
    }
}

/// Runs scripts to completion on a private single-threaded runtime.
pub struct CgiRunner {
    runtime: Runtime,
    timeout: Duration,
}

impl CgiRunner {
    pub fn new(timeout: Duration) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self { runtime, timeout })
    }

    /// Blocks until the script exits or the deadline passes.
    pub fn run(&self, request: &CgiRequest) -> CgiOutcome {
        self.runtime.block_on(self.supervise(request))
    }

    async fn supervise(&self, request: &CgiRequest) -> CgiOutcome {
        let mut invocation = match self.spawn(request) {
            Ok(invocation) => invocation,
            Err(e) => {
                warn!(script = %request.script.display(), error = %e, "CGI spawn failed");
                return CgiOutcome::Failed(e);
            }
        };

        let collected = tokio::time::timeout_at(invocation.deadline, invocation.collect()).await;
        let elapsed = invocation.started.elapsed();

        match collected {
            Ok(Ok((output, status))) if status.success() => {
                debug!(script = %request.script.display(), bytes = output.len(), ?elapsed, "CGI finished");
                CgiOutcome::Completed(output)
            }
            Ok(Ok((_, status))) => {
                warn!(script = %request.script.display(), %status, "CGI exited with failure");
                CgiOutcome::Failed(CgiError::Exit(status))
            }
            Ok(Err(e)) => {
                invocation.terminate().await;
                warn!(script = %request.script.display(), error = %e, "CGI output error");
                CgiOutcome::Failed(e)
            }
            Err(_) => {
                invocation.terminate().await;
                warn!(script = %request.script.display(), ?elapsed, "CGI deadline exceeded");
                CgiOutcome::TimedOut
            }
        }
    }

    fn spawn(&self, request: &CgiRequest) -> Result<CgiInvocation, CgiError> {
        let mut command = Command::new(&request.interpreter);
        command
            .arg(&request.script)
            .env_clear()
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = request.script.parent().filter(|d| !d.as_os_str().is_empty()) {
            command.current_dir(dir);
        }

        let started = Instant::now();
        let mut child = command.spawn().map_err(CgiError::Spawn)?;
        let stdout = child.stdout.take().ok_or(CgiError::NoPipe)?;

        Ok(CgiInvocation {
            child,
            stdout,
            started,
            deadline: started + self.timeout,
        })
    }
}
