use std::io;
use std::net::SocketAddr;

use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};
use tracing::{debug, info};

use crate::error::ServerError;

/// One listening socket.
///
/// The socket is dropped on teardown and bound again to the same address
/// when the loop restarts.
#[derive(Debug)]
pub struct Listener {
    socket: Option<TcpListener>,
    addr: SocketAddr,
}

impl Listener {
    pub fn bind(addr: SocketAddr) -> Result<Self, ServerError> {
        let socket = TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })?;
        // Port 0 resolves here; rebinds reuse the concrete port.
        let addr = socket.local_addr()?;
        info!(%addr, "Listening");
        Ok(Self {
            socket: Some(socket),
            addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Binds again if closed, then registers for accept readiness.
    pub(crate) fn register(&mut self, registry: &Registry, token: Token) -> Result<(), ServerError> {
        let addr = self.addr;
        let socket = match self.socket.take() {
            Some(socket) => socket,
            None => TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })?,
        };
        let socket = self.socket.insert(socket);
        registry.register(socket, token, Interest::READABLE)?;
        Ok(())
    }

    pub(crate) fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        match &self.socket {
            Some(socket) => socket.accept(),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    pub(crate) fn close(&mut self, registry: &Registry) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = registry.deregister(&mut socket) {
                debug!(addr = %self.addr, error = %e, "deregister listener");
            }
        }
    }
}
