use std::io::{self, Write};

use thiserror::Error;

use crate::http::response::Response;

const HTTP_VERSION: &str = "HTTP/1.1";

/// Why a send stopped for good.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("peer closed the connection")]
    Closed,
    #[error("socket write failed: {0}")]
    Io(#[from] io::Error),
}

/// Result of a write attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// Every byte has been handed to the socket.
    Done,
    /// The socket stopped accepting bytes; retry on the next write readiness.
    Pending,
}

/// Status line and headers, terminated by the blank line.
pub fn serialize_head(resp: &Response) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);

    let status_line = format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        resp.status.as_u16(),
        resp.status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    for (k, v) in &resp.headers {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    buf.extend_from_slice(b"\r\n");
    buf
}

pub fn serialize_response(resp: &Response) -> Vec<u8> {
    let mut buf = serialize_head(resp);
    buf.extend_from_slice(&resp.body);
    buf
}

/// A fully buffered outbound message and how much of it has been sent.
#[derive(Debug)]
pub struct ResponseWriter {
    buffer: Vec<u8>,
    written: usize,
}

impl ResponseWriter {
    pub fn new(response: &Response) -> Self {
        Self::from_bytes(serialize_response(response))
    }

    pub fn from_bytes(buffer: Vec<u8>) -> Self {
        Self { buffer, written: 0 }
    }

    pub fn is_done(&self) -> bool {
        self.written >= self.buffer.len()
    }

    /// Pushes as much of the buffer as the socket takes right now.
    ///
    /// The offset survives a `Pending` return, so the next call resumes
    /// where this one stopped.
    pub fn write_to<W: Write>(&mut self, stream: &mut W) -> Result<Flush, SendError> {
        while self.written < self.buffer.len() {
            match stream.write(&self.buffer[self.written..]) {
                Ok(0) => return Err(SendError::Closed),
                Ok(n) => self.written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Flush::Pending),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Flush::Done)
    }
}
