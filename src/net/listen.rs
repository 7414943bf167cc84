//! Listener socket collaborator.
//!
//! Accept handling lives outside the coordination core; this type carries
//! only the bind/open/close contract the connection manager drives.

use std::net::{SocketAddr, TcpListener};

/// Listening socket opened on the first free port of a caller-supplied
/// range.
pub struct Listen {
    socket: Option<TcpListener>,
    port: u16,
}

impl Listen {
    /// Creates a closed listener.
    pub fn new() -> Self {
        Self {
            socket: None,
            port: 0,
        }
    }

    /// Binds to the first free port in `first..=last` on `bind_address`.
    ///
    /// `backlog` is carried as policy for the embedder's accept machinery;
    /// the queue depth of the underlying socket is left to the OS. Returns
    /// `false` when no port in the range could be bound.
    pub fn open(&mut self, first: u16, last: u16, backlog: i32, bind_address: SocketAddr) -> bool {
        tracing::debug!("opening listener (range: {first}-{last} backlog: {backlog})");
        self.close();

        for port in first..=last {
            let mut address = bind_address;
            address.set_port(port);

            match TcpListener::bind(address) {
                Ok(socket) => {
                    tracing::info!("listener open on port {port}");
                    self.socket = Some(socket);
                    self.port = port;
                    return true;
                }
                Err(error) => {
                    tracing::debug!("listener bind to {address} failed: {error}");
                }
            }
        }

        false
    }

    /// Closes the listening socket if open.
    pub fn close(&mut self) {
        if self.socket.take().is_some() {
            tracing::info!("listener closed on port {}", self.port);
        }
        self.port = 0;
    }

    /// Whether a socket is currently open.
    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Port the open socket is bound to, zero when closed.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Default for Listen {
    fn default() -> Self {
        Self::new()
    }
}
