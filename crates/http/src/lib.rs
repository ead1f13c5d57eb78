//! An HTTP/1.1 server for the `micro-io` event loop
//!
//! Requests and responses are streams driven by callbacks on a single thread, in the
//! style of a classic evented server: the server emits a `request` event with an
//! [`IncomingMessage`] to read the body from and a [`ServerResponse`] to write the answer
//! to.
//!
//! # Features
//!
//! - Pipelined requests, answered in order
//! - Keep-alive per HTTP version and `Connection` header
//! - Chunked request bodies with trailers, chunked or length framed responses
//! - Backpressure: pausing a request stops reading from its socket
//! - Automatic `100 Continue`
//! - Protocol upgrades hand the raw socket to the application
//!
//! # Example
//!
//! ```no_run
//! use micro_io::events::EventSource;
//! use micro_io::runtime::EventLoop;
//! use micro_io_http::{IncomingEvent, IncomingEventKind};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use tracing::{Level, info};
//! use tracing_subscriber::FmtSubscriber;
//!
//! let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
//! tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
//!
//! let event_loop = EventLoop::new().unwrap();
//! event_loop.run(|| {
//!     let server = micro_io_http::create_server(|request, response| {
//!         info!(url = %request.url(), "request");
//!         let body = Rc::new(RefCell::new(Vec::new()));
//!
//!         let received = Rc::clone(&body);
//!         request.on(IncomingEventKind::Data, move |event| {
//!             if let IncomingEvent::Data(chunk) = event {
//!                 received.borrow_mut().extend_from_slice(chunk.as_bytes());
//!             }
//!         });
//!         let response = response.clone();
//!         request.on(IncomingEventKind::End, move |_| {
//!             response.set_header("Content-Type", "text/plain").unwrap();
//!             response.end_with(format!("received {} bytes\n", body.borrow().len()));
//!         });
//!     });
//!     server.listen(8080);
//! });
//! ```
//!
//! # Architecture
//!
//! - [`codec`]: the request decoder and the response head and body encoders
//! - [`protocol`]: request and response heads, framing, folded headers and errors
//! - [`IncomingMessage`] and [`ServerResponse`]: the two halves of an exchange
//! - [`Server`]: wraps a [`micro_io::net::Server`] and attaches a connection to each socket
//!
//! # Limitations
//!
//! - HTTP/1.x only
//! - No TLS support (use a reverse proxy for HTTPS)
//! - Maximum header size: 8KB
//! - Maximum number of headers: 64

pub mod codec;
pub mod protocol;

mod connection;
mod date;
mod incoming;
mod response;
mod server;

mod utils;
pub(crate) use utils::ensure;

pub use incoming::{IncomingEvent, IncomingEventKind, IncomingMessage};
pub use response::{ResponseEvent, ResponseEventKind, ServerResponse};
pub use server::{Server, ServerEvent, ServerEventKind, create_server};
