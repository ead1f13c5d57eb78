//! Callback driven sockets and streams on a single threaded event loop.
//!
//! The crate is layered leaf first:
//!
//! - [`events`]: typed publish/subscribe used by every other component
//! - [`runtime`]: the [`EventLoop`](runtime::EventLoop) and its deferred ("next tick") queue
//! - [`stream`]: the readable/writable contract and streaming text decoding
//! - [`reactor`]: connection and listening handles over tokio
//! - [`net`]: [`Socket`](net::Socket) and [`Server`](net::Server)
//!
//! Nothing in this crate is `Send`. All callbacks run on the thread that called
//! [`EventLoop::run`](runtime::EventLoop::run), and every event triggered by a call into a
//! socket or server is delivered on a later loop iteration, never inside the call itself.

pub mod events;
pub mod net;
pub mod reactor;
pub mod runtime;
pub mod stream;
