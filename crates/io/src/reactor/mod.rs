//! Asynchronous connection handles over tokio.
//!
//! This is the only module that touches tokio's networking types. A handle reports
//! completions through plain callbacks invoked on the loop thread; the wrappers in
//! [`net`](crate::net) turn them into events.

mod halves;
mod listen_handle;
mod stream_handle;

pub use listen_handle::{ListenHandle, OnConnection};
pub use stream_handle::{OnRead, ReadEvent, StreamHandle, WriteCallback, WriteStatus};

/// Transport behind a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Tcp,
    Pipe,
}
