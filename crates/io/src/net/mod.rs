//! TCP and pipe sockets and servers.
//!
//! ```no_run
//! use micro_io::events::EventSource;
//! use micro_io::net::{self, ServerEvent, ServerEventKind, SocketEvent, SocketEventKind};
//! use micro_io::runtime::EventLoop;
//!
//! let event_loop = EventLoop::new().unwrap();
//! event_loop.run(|| {
//!     let server = net::create_server(|socket| {
//!         let echo = socket.clone();
//!         socket.on(SocketEventKind::Data, move |event| {
//!             if let SocketEvent::Data(chunk) = event {
//!                 echo.write(chunk.clone().into_bytes());
//!             }
//!         });
//!     });
//!     server.listen(("127.0.0.1", 7000));
//! });
//! ```

mod error;
mod options;
mod server;
mod socket;

pub use error::NetError;
pub use options::{Address, ConnectTarget, DEFAULT_BACKLOG, DEFAULT_CONNECT_HOST, ListenOptions, ListenTarget, ServerOptions, SocketOptions};
pub use server::{Server, ServerEvent, ServerEventKind, ServerState};
pub use socket::{Ingest, Socket, SocketEvent, SocketEventKind, SocketInput, SocketState, WeakSocket};

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::events::EventSource;

/// Creates a server that calls `on_connection` for every accepted socket.
pub fn create_server<F>(on_connection: F) -> Server
where
    F: Fn(&Socket) + 'static,
{
    let server = Server::new();
    server.on(ServerEventKind::Connection, move |event| {
        if let ServerEvent::Connection(socket) = event {
            on_connection(socket);
        }
    });
    server
}

/// Creates a socket and starts connecting it to `target`.
pub fn create_connection<T>(target: T) -> Socket
where
    T: Into<ConnectTarget>,
{
    let socket = Socket::new();
    socket.connect(target);
    socket
}

/// Like [`create_connection`], running `on_connect` once connected.
pub fn connect<T, F>(target: T, on_connect: F) -> Socket
where
    T: Into<ConnectTarget>,
    F: FnOnce() + 'static,
{
    let socket = Socket::new();
    socket.connect_with(target, on_connect);
    socket
}

/// Returns 4 or 6 for an IPv4 or IPv6 literal, 0 otherwise.
pub fn is_ip(input: &str) -> u8 {
    if is_ipv4(input) {
        4
    } else if is_ipv6(input) {
        6
    } else {
        0
    }
}

pub fn is_ipv4(input: &str) -> bool {
    input.parse::<Ipv4Addr>().is_ok()
}

pub fn is_ipv6(input: &str) -> bool {
    input.parse::<Ipv6Addr>().is_ok()
}

#[cfg(test)]
mod tests;
