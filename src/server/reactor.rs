//! The single-threaded event loop.
//!
//! One `mio::Poll` watches every listening and client socket. Each
//! iteration polls with a bounded wait, accepts new clients up to
//! `max_clients`, drains readable sockets, dispatches complete requests
//! and pushes pending output. Idle clients are swept at the end of every
//! iteration.
//!
//! A failure of the poll itself tears everything down and restarts the
//! cycle, up to [`MAX_RESTART_ATTEMPTS`] times:
//!
//! ```text
//!   Running ──poll error──▶ Restarting(n) ──n ≤ max──▶ Running
//!      │                         │
//!      │ shutdown                └──n > max──▶ fatal error
//!      ▼
//!   ShuttingDown
//! ```

use std::collections::HashMap;
use std::io::{self, Write};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::event::Event;
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use tracing::{debug, error, info, trace, warn};

use crate::cgi::{CgiOutcome, CgiRunner};
use crate::config::{Config, LocationConfig};
use crate::error::ServerError;
use crate::handler::{self, Outcome, RequestContext};
use crate::http::parser::{self, ParseLimits};
use crate::http::response::Response;
use crate::http::transfer::TransferState;
use crate::http::writer::ResponseWriter;
use crate::server::connection::{Connection, WriteStep};
use crate::server::listener::Listener;
use crate::server::shutdown::Shutdown;

/// Upper bound on one poll wait.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5);
pub const MAX_RESTART_ATTEMPTS: u32 = 10;
pub const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Sent verbatim to clients beyond `max_clients`.
pub const BUSY_RESPONSE: &[u8] =
    b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 21\r\n\r\nServer is overloaded.";

const WAKER: Token = Token(usize::MAX);
const FIRST_CLIENT: usize = 1 << 16;
const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Running,
    Restarting { attempt: u32 },
    ShuttingDown,
}

/// What to do with a connection after handling its event.
enum Disposition {
    Keep,
    Close(&'static str),
}

pub struct Reactor {
    config: Config,
    limits: ParseLimits,
    listeners: Vec<Listener>,
    connections: HashMap<Token, Connection>,
    next_id: u64,
    cgi: CgiRunner,
    shutdown: Arc<Shutdown>,
    state: LoopState,
}

impl Reactor {
    pub fn new(config: Config, shutdown: Arc<Shutdown>) -> Result<Self, ServerError> {
        let cgi = CgiRunner::new(config.cgi_timeout())?;
        Ok(Self {
            limits: config.parse_limits(),
            config,
            listeners: Vec::new(),
            connections: HashMap::new(),
            next_id: 0,
            cgi,
            shutdown,
            state: LoopState::Running,
        })
    }

    /// Binds a listening socket right away.
    ///
    /// A failure is returned to the caller and does not stop the server
    /// as long as some other listener succeeds.
    pub fn add_listener(&mut self, port: u16, address: IpAddr) -> Result<SocketAddr, ServerError> {
        let listener = Listener::bind(SocketAddr::new(address, port))?;
        let addr = listener.local_addr();
        self.listeners.push(listener);
        Ok(addr)
    }

    /// Binds every address the configuration names, logging failures.
    /// Returns the addresses actually bound.
    pub fn listen_configured(&mut self) -> Vec<SocketAddr> {
        let mut bound = Vec::new();
        for addr in self.config.listen_addresses() {
            match self.add_listener(addr.port(), addr.ip()) {
                Ok(local) => bound.push(local),
                Err(e) => error!(error = %e, "listener unavailable"),
            }
        }
        bound
    }

    /// Serves until shutdown is requested or the restart budget runs out.
    ///
    /// Every socket is closed before this returns.
    pub fn run(&mut self) -> Result<(), ServerError> {
        if self.listeners.is_empty() {
            return Err(ServerError::NoListeners);
        }
        self.state = LoopState::Running;
        let mut restarts = 0;

        loop {
            match self.state {
                LoopState::Running => match self.run_cycle() {
                    Ok(()) => self.state = LoopState::ShuttingDown,
                    Err(ServerError::Poll(e)) => {
                        restarts += 1;
                        error!(error = %e, attempt = restarts, "event loop failed, restarting");
                        self.state = LoopState::Restarting { attempt: restarts };
                    }
                    Err(e) => {
                        error!(error = %e, "event loop stopped");
                        return Err(e);
                    }
                },
                LoopState::Restarting { attempt } => {
                    if attempt > MAX_RESTART_ATTEMPTS {
                        error!(attempts = MAX_RESTART_ATTEMPTS, "restart budget exhausted");
                        return Err(ServerError::RestartBudgetExhausted(MAX_RESTART_ATTEMPTS));
                    }
                    std::thread::sleep(RESTART_DELAY);
                    if self.shutdown.is_requested() {
                        self.state = LoopState::ShuttingDown;
                    } else {
                        info!(attempt, "restarting event loop");
                        self.state = LoopState::Running;
                    }
                }
                LoopState::ShuttingDown => {
                    info!("Server stopped");
                    return Ok(());
                }
            }
        }
    }

    /// One poll instance from setup to teardown.
    fn run_cycle(&mut self) -> Result<(), ServerError> {
        let mut poll = Poll::new().map_err(ServerError::Poll)?;
        let waker = Waker::new(poll.registry(), WAKER).map_err(ServerError::Poll)?;
        self.shutdown.attach(Arc::new(waker));

        let result = self
            .open_listeners(poll.registry())
            .and_then(|()| self.serve(&mut poll));

        self.teardown(poll.registry());
        result
    }

    fn open_listeners(&mut self, registry: &Registry) -> Result<(), ServerError> {
        let mut open = 0;
        for (index, listener) in self.listeners.iter_mut().enumerate() {
            match listener.register(registry, Token(index)) {
                Ok(()) => open += 1,
                Err(e) => error!(addr = %listener.local_addr(), error = %e, "listener unavailable"),
            }
        }
        if open == 0 {
            return Err(ServerError::NoListeners);
        }
        Ok(())
    }

    fn serve(&mut self, poll: &mut Poll) -> Result<(), ServerError> {
        let mut events = Events::with_capacity(EVENT_CAPACITY);
        let wait = POLL_TIMEOUT.min(self.config.keep_alive().max(Duration::from_millis(100)));

        while !self.shutdown.is_requested() {
            if let Err(e) = poll.poll(&mut events, Some(wait)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ServerError::Poll(e));
            }

            for event in events.iter() {
                match event.token() {
                    WAKER => trace!("woken"),
                    Token(index) if index < self.listeners.len() => self.accept(poll.registry(), index),
                    token => self.client_event(poll.registry(), token, event),
                }
            }

            self.close_idle(poll.registry());
        }

        info!(open = self.connections.len(), "Shutting down");
        Ok(())
    }

    fn accept(&mut self, registry: &Registry, index: usize) {
        let port = self.listeners[index].port();

        loop {
            let (mut stream, peer) = match self.listeners[index].accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(port, error = %e, "accept failed");
                    break;
                }
            };

            if self.connections.len() >= self.config.max_clients {
                warn!(%peer, port, limit = self.config.max_clients, "Server busy, rejecting client");
                if let Err(e) = stream.write_all(BUSY_RESPONSE) {
                    debug!(%peer, error = %e, "busy response not delivered");
                }
                continue;
            }

            let id = self.next_id;
            self.next_id += 1;
            let token = Token(FIRST_CLIENT + id as usize);

            if let Err(e) = registry.register(&mut stream, token, Interest::READABLE | Interest::WRITABLE) {
                warn!(%peer, error = %e, "could not register client");
                continue;
            }

            debug!(client_id = id, %peer, port, "Accepted connection");
            self.connections.insert(token, Connection::new(id, port, peer, stream));
        }
    }

    fn client_event(&mut self, registry: &Registry, token: Token, event: &Event) {
        let Some(mut conn) = self.connections.remove(&token) else {
            return;
        };

        if event.is_writable() {
            conn.mark_writable();
        }

        if event.is_readable() || event.is_read_closed() {
            if let Err(e) = conn.read_available() {
                debug!(client_id = conn.id(), error = %e, "read failed");
                self.close(registry, conn, "read error");
                return;
            }
        }

        if event.is_error() {
            self.close(registry, conn, "socket error");
            return;
        }

        match self.drive(registry, token, &mut conn) {
            Disposition::Keep => {
                self.connections.insert(token, conn);
            }
            Disposition::Close(reason) => self.close(registry, conn, reason),
        }
    }

    /// Moves a connection as far as it can go without blocking.
    fn drive(&mut self, registry: &Registry, token: Token, conn: &mut Connection) -> Disposition {
        loop {
            if conn.has_pending_output() {
                if !conn.write_ready() {
                    break;
                }
                match conn.write_step() {
                    Ok(WriteStep::Complete) => {
                        trace!(client_id = conn.id(), "response complete");
                        if !conn.keep_alive() {
                            return Disposition::Close("response complete");
                        }
                    }
                    Ok(WriteStep::Blocked) => break,
                    Ok(WriteStep::MoreReady) => {
                        // Edge-triggered: ask for a fresh writable event so
                        // other connections get their turn in between.
                        if let Err(e) = registry.reregister(
                            conn.stream_mut(),
                            token,
                            Interest::READABLE | Interest::WRITABLE,
                        ) {
                            debug!(client_id = conn.id(), error = %e, "rearm failed");
                            return Disposition::Close("rearm failed");
                        }
                        break;
                    }
                    Err(e) => {
                        debug!(client_id = conn.id(), error = %e, "send failed");
                        return Disposition::Close("send failed");
                    }
                }
            }

            if !conn.has_pending_output() && conn.request_complete() {
                self.dispatch(conn);
                continue;
            }
            break;
        }

        if conn.peer_closed() && !conn.has_pending_output() {
            if conn.bytes_received() > 0 {
                debug!(
                    client_id = conn.id(),
                    received = conn.bytes_received(),
                    declared = conn.content_length(),
                    "peer closed mid-request"
                );
            }
            return Disposition::Close("peer closed");
        }
        Disposition::Keep
    }

    /// Parses the buffered request and installs its response.
    fn dispatch(&mut self, conn: &mut Connection) {
        let raw = conn.take_request();
        let request = parser::parse_request(&raw, &self.limits);
        let keep_alive = request.keep_alive();

        let location = self.config.resolve(request.hostname(), conn.port(), &request.path);
        let ctx = RequestContext {
            peer: conn.peer(),
            port: conn.port(),
        };
        let outcome = handler::dispatch(&request, &location, &ctx);

        info!(
            client_id = conn.id(),
            method = request.method.map(|m| m.as_str()).unwrap_or("-"),
            target = %request.target,
            status = outcome.status().as_u16(),
            "request"
        );

        self.realize(conn, outcome, keep_alive, &location);
    }

    fn realize(&mut self, conn: &mut Connection, outcome: Outcome, keep_alive: bool, location: &LocationConfig) {
        match outcome {
            Outcome::Respond(response) => respond(conn, response, keep_alive),
            Outcome::Redirect { location: target, status } => {
                respond(conn, Response::redirect(&target, status), keep_alive)
            }
            Outcome::Stream { path, status, framing } => {
                match TransferState::open(&path, status, framing, keep_alive) {
                    Ok(transfer) => {
                        debug!(client_id = conn.id(), file = %path.display(), size = transfer.size(), "streaming");
                        conn.start_stream(transfer, keep_alive);
                    }
                    Err(e) => {
                        warn!(client_id = conn.id(), file = %path.display(), error = %e, "cannot open file");
                        respond(conn, Response::internal_error(), keep_alive);
                    }
                }
            }
            Outcome::Cgi(request) => match self.cgi.run(&request) {
                done @ CgiOutcome::Completed(_) => respond(conn, done.into_response(), keep_alive),
                failed => {
                    let fallback = handler::error_outcome(failed.status(), location);
                    self.realize(conn, fallback, keep_alive, location);
                }
            },
        }
    }

    fn close_idle(&mut self, registry: &Registry) {
        let timeout = self.config.keep_alive();
        let now = Instant::now();

        let expired: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.idle_for(now) > timeout)
            .map(|(token, _)| *token)
            .collect();

        for token in expired {
            if let Some(conn) = self.connections.remove(&token) {
                self.close(registry, conn, "idle timeout");
            }
        }
    }

    /// The only place a client socket is closed: deregistered, then dropped.
    fn close(&mut self, registry: &Registry, mut conn: Connection, reason: &'static str) {
        if let Err(e) = registry.deregister(conn.stream_mut()) {
            trace!(client_id = conn.id(), error = %e, "deregister");
        }
        debug!(client_id = conn.id(), peer = %conn.peer(), reason, "Connection closed");
    }

    fn teardown(&mut self, registry: &Registry) {
        let tokens: Vec<Token> = self.connections.keys().copied().collect();
        for token in tokens {
            if let Some(conn) = self.connections.remove(&token) {
                self.close(registry, conn, "teardown");
            }
        }
        for listener in &mut self.listeners {
            listener.close(registry);
        }
    }
}

fn respond(conn: &mut Connection, mut response: Response, keep_alive: bool) {
    response.finalize(keep_alive);
    conn.start_response(ResponseWriter::new(&response), keep_alive);
}
