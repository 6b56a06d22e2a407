use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors that stop (or restart) the event loop.
///
/// Per-connection failures never surface here; they only close the
/// connection that caused them.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("no listening socket could be opened")]
    NoListeners,

    #[error("readiness poll failed: {0}")]
    Poll(#[source] io::Error),

    #[error("event loop gave up after {0} restart attempts")]
    RestartBudgetExhausted(u32),

    #[error(transparent)]
    Io(#[from] io::Error),
}
