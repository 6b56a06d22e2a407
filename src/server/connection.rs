use std::io::{self, Read};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use mio::net::TcpStream;
use tracing::debug;

use crate::http::parser;
use crate::http::transfer::{TransferProgress, TransferState};
use crate::http::writer::{Flush, ResponseWriter, SendError};

/// Bytes pulled from the socket per read call.
pub const READ_CHUNK: usize = 4096;

/// Outbound side of a connection.
#[derive(Debug)]
pub enum ConnectionState {
    /// No response in flight; waiting for a complete request.
    Reading,
    /// Sending a buffered response.
    Writing(ResponseWriter),
    /// Streaming a file.
    Streaming(Box<TransferState>),
}

/// Result of one write step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStep {
    /// The whole response is out.
    Complete,
    /// The socket is full; wait for the next writable event.
    Blocked,
    /// A transfer made progress and has more to send.
    MoreReady,
}

/// One accepted client, owned by the event loop.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    port: u16,
    peer: SocketAddr,
    stream: TcpStream,
    inbound: BytesMut,
    bytes_received: usize,
    content_length: usize,
    request_complete: bool,
    last_activity: Instant,
    write_ready: bool,
    keep_alive: bool,
    peer_closed: bool,
    state: ConnectionState,
}

impl Connection {
    pub fn new(id: u64, port: u16, peer: SocketAddr, stream: TcpStream) -> Self {
        Self {
            id,
            port,
            peer,
            stream,
            inbound: BytesMut::with_capacity(READ_CHUNK),
            bytes_received: 0,
            content_length: 0,
            request_complete: false,
            last_activity: Instant::now(),
            write_ready: false,
            keep_alive: true,
            peer_closed: false,
            state: ConnectionState::Reading,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn bytes_received(&self) -> usize {
        self.bytes_received
    }

    pub fn content_length(&self) -> usize {
        self.content_length
    }

    pub fn request_complete(&self) -> bool {
        self.request_complete
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn peer_closed(&self) -> bool {
        self.peer_closed
    }

    pub fn mark_writable(&mut self) {
        self.write_ready = true;
    }

    pub fn write_ready(&self) -> bool {
        self.write_ready
    }

    pub fn has_pending_output(&self) -> bool {
        !matches!(self.state, ConnectionState::Reading)
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Drains the socket into the inbound buffer until it would block.
    ///
    /// A zero-length read marks the peer as closed. Returns the number of
    /// bytes read.
    pub fn read_available(&mut self) -> io::Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut total = 0;

        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.peer_closed = true;
                    break;
                }
                Ok(n) => {
                    self.inbound.extend_from_slice(&chunk[..n]);
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if total > 0 {
            self.bytes_received += total;
            self.last_activity = Instant::now();
            self.request_complete = parser::is_complete(&self.inbound);
            if let Some(end) = parser::find_headers_end(&self.inbound) {
                self.content_length = parser::declared_content_length(&self.inbound[..end]).unwrap_or(0);
            }
        }

        Ok(total)
    }

    /// Hands the buffered request to the caller and resets the read side.
    pub fn take_request(&mut self) -> BytesMut {
        let request = self.inbound.split();
        self.bytes_received = 0;
        self.content_length = 0;
        self.request_complete = false;
        request
    }

    pub fn start_response(&mut self, writer: ResponseWriter, keep_alive: bool) {
        self.keep_alive = keep_alive;
        self.state = ConnectionState::Writing(writer);
    }

    pub fn start_stream(&mut self, transfer: TransferState, keep_alive: bool) {
        self.keep_alive = keep_alive;
        self.state = ConnectionState::Streaming(Box::new(transfer));
    }

    /// Buffered responses are pushed until the socket blocks; a file
    /// transfer gets a single write attempt.
    pub fn write_step(&mut self) -> Result<WriteStep, SendError> {
        let step = match &mut self.state {
            ConnectionState::Reading => return Ok(WriteStep::Complete),
            ConnectionState::Writing(writer) => match writer.write_to(&mut self.stream)? {
                Flush::Done => WriteStep::Complete,
                Flush::Pending => WriteStep::Blocked,
            },
            ConnectionState::Streaming(transfer) => match transfer.advance(&mut self.stream)? {
                TransferProgress::Finished => {
                    debug!(client_id = self.id, bytes = transfer.bytes_sent(), "transfer finished");
                    WriteStep::Complete
                }
                TransferProgress::WouldBlock => WriteStep::Blocked,
                TransferProgress::Progress => WriteStep::MoreReady,
            },
        };

        match step {
            WriteStep::Complete => {
                self.state = ConnectionState::Reading;
                self.last_activity = Instant::now();
            }
            WriteStep::Blocked => self.write_ready = false,
            WriteStep::MoreReady => self.last_activity = Instant::now(),
        }
        Ok(step)
    }
}
