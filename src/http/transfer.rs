//! Streaming a file to a non-blocking socket.
//!
//! A [`TransferState`] owns the open file and a wire buffer allocated once
//! at open time. Each call to [`TransferState::advance`] performs at most
//! one socket write; the buffer offsets carry the position across calls.
//!
//! ```text
//!   New ──headers written──▶ HeadersSent ──first block──▶ Streaming ──last frame──▶ Finished
//!                                                          │    ▲
//!                                                          └────┘ would block / next block
//! ```

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use crate::http::mime;
use crate::http::response::{ResponseBuilder, StatusCode};
use crate::http::writer::{serialize_head, SendError};

/// Payload bytes read from the file per block.
pub const BLOCK_SIZE: usize = 4096;

/// Room reserved in front of a block for its hex size line.
const PREFIX_ROOM: usize = 18;
const CHUNK_TERMINATOR: &[u8] = b"0\r\n\r\n";

/// How the body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `Content-Length` equal to the file size.
    Fixed,
    /// `Transfer-Encoding: chunked`, closed by a zero-length chunk.
    Chunked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    New,
    HeadersSent,
    Streaming,
    Finished,
}

/// Outcome of one [`TransferState::advance`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferProgress {
    /// Some bytes went out; more remain.
    Progress,
    /// The socket is full. Nothing was lost.
    WouldBlock,
    /// The last byte of the response has been written.
    Finished,
}

#[derive(Debug)]
pub struct TransferState {
    file: File,
    size: u64,
    bytes_sent: u64,
    phase: Phase,
    framing: Framing,
    wire: Vec<u8>,
    filled: usize,
    consumed: usize,
    /// File payload carried by the frame currently staged in `wire`.
    block_len: usize,
    terminated: bool,
}

impl TransferState {
    /// Opens `path` and stages the response head.
    ///
    /// Fails if the file cannot be opened or is not a regular file; in
    /// that case no state exists and the caller answers with a 500.
    pub fn open(path: &Path, status: StatusCode, framing: Framing, keep_alive: bool) -> io::Result<Self> {
        let file = File::open(path)?;
        let meta = file.metadata()?;
        if !meta.is_file() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"));
        }
        let size = meta.len();

        let builder = ResponseBuilder::new(status).header("Content-Type", mime::content_type(path));
        let builder = match framing {
            Framing::Fixed => builder.header("Content-Length", size.to_string()),
            Framing::Chunked => builder.chunked(),
        };
        let mut head = builder.build();
        head.finalize(keep_alive);
        let head = serialize_head(&head);

        let mut wire = vec![0u8; head.len().max(PREFIX_ROOM + BLOCK_SIZE + 2)];
        wire[..head.len()].copy_from_slice(&head);

        Ok(Self {
            file,
            size,
            bytes_sent: 0,
            phase: Phase::New,
            framing,
            wire,
            filled: head.len(),
            consumed: 0,
            block_len: 0,
            terminated: false,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// File bytes whose frames have been written completely.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    /// Makes one write attempt.
    ///
    /// A new block is read from the file only after the previous frame has
    /// been fully written.
    pub fn advance<W: Write>(&mut self, out: &mut W) -> Result<TransferProgress, SendError> {
        if self.phase == Phase::Finished {
            return Ok(TransferProgress::Finished);
        }

        if self.consumed == self.filled && !self.stage_next()? {
            self.phase = Phase::Finished;
            return Ok(TransferProgress::Finished);
        }

        match out.write(&self.wire[self.consumed..self.filled]) {
            Ok(0) => Err(SendError::Closed),
            Ok(n) => {
                self.consumed += n;
                if self.consumed == self.filled {
                    self.complete_frame();
                }
                if self.phase == Phase::Finished {
                    Ok(TransferProgress::Finished)
                } else {
                    Ok(TransferProgress::Progress)
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(TransferProgress::WouldBlock),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(TransferProgress::Progress),
            Err(e) => Err(SendError::Io(e)),
        }
    }

    fn complete_frame(&mut self) {
        self.bytes_sent += self.block_len as u64;
        self.block_len = 0;

        if self.phase == Phase::New {
            self.phase = Phase::HeadersSent;
        }

        let done = match self.framing {
            Framing::Fixed => self.bytes_sent >= self.size,
            Framing::Chunked => self.terminated,
        };
        if done {
            self.phase = Phase::Finished;
        }
    }

    /// Fills `wire` with the next frame. Returns false when nothing is left.
    fn stage_next(&mut self) -> Result<bool, SendError> {
        if self.bytes_sent >= self.size {
            if self.framing == Framing::Chunked && !self.terminated {
                self.wire[..CHUNK_TERMINATOR.len()].copy_from_slice(CHUNK_TERMINATOR);
                self.consumed = 0;
                self.filled = CHUNK_TERMINATOR.len();
                self.terminated = true;
                return Ok(true);
            }
            return Ok(false);
        }

        let remaining = self.size - self.bytes_sent;
        let want = (remaining.min(BLOCK_SIZE as u64)) as usize;

        match self.framing {
            Framing::Fixed => {
                read_block(&mut self.file, &mut self.wire[..want])?;
                self.consumed = 0;
                self.filled = want;
            }
            Framing::Chunked => {
                read_block(&mut self.file, &mut self.wire[PREFIX_ROOM..PREFIX_ROOM + want])?;
                let prefix = format!("{want:x}\r\n");
                let start = PREFIX_ROOM - prefix.len();
                self.wire[start..PREFIX_ROOM].copy_from_slice(prefix.as_bytes());
                self.wire[PREFIX_ROOM + want..PREFIX_ROOM + want + 2].copy_from_slice(b"\r\n");
                self.consumed = start;
                self.filled = PREFIX_ROOM + want + 2;
            }
        }

        self.block_len = want;
        self.phase = Phase::Streaming;
        Ok(true)
    }
}

fn read_block(file: &mut File, buf: &mut [u8]) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "file shrank while streaming",
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
