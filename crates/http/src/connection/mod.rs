//! Per-socket request handling for the HTTP server.
//!
//! [`HttpConnection`] sits between an accepted [`Socket`](micro_io::net::Socket) and the
//! [`Server`](crate::Server):
//!
//! - parses pipelined requests off the socket input
//! - answers them in order, one response owning the socket at a time
//! - sends `100 Continue` for requests that expect it
//! - keeps the connection open or ends it after each response, per HTTP version and the
//!   `Connection` header
//! - hands the socket over on protocol upgrades

mod http_connection;

pub(crate) use http_connection::HttpConnection;
