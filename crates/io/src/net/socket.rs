use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};

use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{ConnectTarget, NetError, SocketOptions};
use crate::events::{Event, EventEmitter, EventSource};
use crate::reactor::{ReadEvent, StreamHandle, WriteStatus};
use crate::runtime::Handle;
use crate::stream::{Chunk, Encoding, Readable, StringDecoder, Writable};

/// Events emitted by a [`Socket`].
#[derive(Debug)]
pub enum SocketEvent {
    Connect,
    Data(Chunk),
    /// The peer ended its writable side.
    End,
    /// The write queue was flushed after a `write` returned `false`.
    Drain,
    Error(NetError),
    Close { had_error: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketEventKind {
    Connect,
    Data,
    End,
    Drain,
    Error,
    Close,
}

impl Event for SocketEvent {
    type Kind = SocketEventKind;

    fn kind(&self) -> SocketEventKind {
        match self {
            SocketEvent::Connect => SocketEventKind::Connect,
            SocketEvent::Data(_) => SocketEventKind::Data,
            SocketEvent::End => SocketEventKind::End,
            SocketEvent::Drain => SocketEventKind::Drain,
            SocketEvent::Error(_) => SocketEventKind::Error,
            SocketEvent::Close { .. } => SocketEventKind::Close,
        }
    }
}

/// Lifecycle position of a [`Socket`].
///
/// The two sides of an open socket close independently; `Destroyed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Unconnected,
    Connecting,
    Open { readable: bool, writable: bool },
    Destroyed,
}

impl SocketState {
    fn can_become(self, next: SocketState) -> bool {
        match (self, next) {
            (SocketState::Destroyed, _) => false,
            (_, SocketState::Destroyed) => true,
            (SocketState::Unconnected, SocketState::Connecting)
            | (SocketState::Unconnected | SocketState::Connecting, SocketState::Open { readable: true, writable: true }) => {
                true
            }
            // a closed side never opens again
            (SocketState::Open { readable, writable }, SocketState::Open { readable: next_readable, writable: next_writable }) => {
                (readable || !next_readable) && (writable || !next_writable)
            }
            _ => false,
        }
    }

    pub fn is_readable(self) -> bool {
        matches!(self, SocketState::Open { readable: true, .. })
    }

    pub fn is_writable(self) -> bool {
        matches!(self, SocketState::Open { writable: true, .. })
    }
}

/// Raw input handed to an ingest hook instead of `data` and `end` events.
#[derive(Debug)]
pub enum SocketInput {
    Data(Bytes),
    End,
}

pub type Ingest = Rc<dyn Fn(SocketInput)>;

type WriteDone = Box<dyn FnOnce()>;

struct SocketInner {
    loop_handle: Handle,
    allow_half_open: bool,
    state: Cell<SocketState>,
    handle: RefCell<Option<StreamHandle>>,
    connect_task: RefCell<Option<JoinHandle<()>>>,
    // writes and a possible end issued before the connection is established
    connect_queue: RefCell<VecDeque<(Bytes, Option<WriteDone>)>>,
    end_requested: Cell<bool>,
    paused: Cell<bool>,
    // writes handed to the handle whose completion has not run yet
    pending_writes: Cell<usize>,
    need_drain: Cell<bool>,
    unref_requested: Cell<bool>,
    decoder: RefCell<Option<StringDecoder>>,
    ingest: RefCell<Option<Ingest>>,
    bytes_read: Cell<u64>,
    bytes_written: Cell<u64>,
    events: EventEmitter<SocketEvent>,
}

/// A readable and writable byte stream over one TCP or pipe connection.
///
/// Every event caused by a call on the socket is delivered on a later loop iteration. The
/// socket keeps itself alive while its connection is open; listeners are dropped after the
/// `close` event.
#[derive(Clone)]
pub struct Socket {
    inner: Rc<SocketInner>,
}

/// A non-owning reference to a [`Socket`].
#[derive(Clone, Default)]
pub struct WeakSocket {
    inner: Weak<SocketInner>,
}

impl WeakSocket {
    pub fn new() -> Self {
        Self { inner: Weak::new() }
    }

    pub fn upgrade(&self) -> Option<Socket> {
        self.inner.upgrade().map(|inner| Socket { inner })
    }
}

impl fmt::Debug for WeakSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakSocket").field("alive", &(self.inner.strong_count() > 0)).finish()
    }
}

impl Socket {
    /// Creates an unconnected socket on the current loop.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a running [`EventLoop`](crate::runtime::EventLoop).
    pub fn new() -> Self {
        Self::with_options(SocketOptions::default())
    }

    pub fn with_options(options: SocketOptions) -> Self {
        Self::build(Handle::current(), options, SocketState::Unconnected)
    }

    pub(crate) fn from_accepted(loop_handle: Handle, handle: StreamHandle, options: SocketOptions) -> Self {
        let socket = Self::build(loop_handle, options, SocketState::Open { readable: true, writable: true });
        socket.attach(handle);
        socket
    }

    fn build(loop_handle: Handle, options: SocketOptions, state: SocketState) -> Self {
        Self {
            inner: Rc::new(SocketInner {
                loop_handle,
                allow_half_open: options.allow_half_open,
                state: Cell::new(state),
                handle: RefCell::new(None),
                connect_task: RefCell::new(None),
                connect_queue: RefCell::new(VecDeque::new()),
                end_requested: Cell::new(false),
                paused: Cell::new(false),
                pending_writes: Cell::new(0),
                need_drain: Cell::new(false),
                unref_requested: Cell::new(false),
                decoder: RefCell::new(None),
                ingest: RefCell::new(None),
                bytes_read: Cell::new(0),
                bytes_written: Cell::new(0),
                events: EventEmitter::new(),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakSocket {
        WeakSocket { inner: Rc::downgrade(&self.inner) }
    }

    pub fn ptr_eq(&self, other: &Socket) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn state(&self) -> SocketState {
        self.inner.state.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == SocketState::Destroyed
    }

    pub fn allow_half_open(&self) -> bool {
        self.inner.allow_half_open
    }

    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.stream_handle().and_then(|handle| handle.peer_addr())
    }

    pub fn local_address(&self) -> Option<SocketAddr> {
        self.stream_handle().and_then(|handle| handle.local_addr())
    }

    pub fn bytes_read(&self) -> u64 {
        self.inner.bytes_read.get()
    }

    pub fn bytes_written(&self) -> u64 {
        self.inner.bytes_written.get()
    }

    /// Bytes accepted by `write` that are not flushed yet.
    pub fn buffer_size(&self) -> usize {
        let queued: usize = self.inner.connect_queue.borrow().iter().map(|(data, _)| data.len()).sum();
        queued + self.stream_handle().map_or(0, |handle| handle.write_queue_size())
    }

    pub fn connect<T>(&self, target: T) -> bool
    where
        T: Into<ConnectTarget>,
    {
        self.connect_inner(target.into(), None)
    }

    /// Connects and runs `callback` once, on the `connect` event.
    pub fn connect_with<T, F>(&self, target: T, callback: F) -> bool
    where
        T: Into<ConnectTarget>,
        F: FnOnce() + 'static,
    {
        self.connect_inner(target.into(), Some(Box::new(callback)))
    }

    fn connect_inner(&self, target: ConnectTarget, callback: Option<Box<dyn FnOnce()>>) -> bool {
        if self.state() != SocketState::Unconnected {
            warn!(state = ?self.state(), %target, "connect on a socket that is already in use");
            return false;
        }
        if let Some(callback) = callback {
            self.once(SocketEventKind::Connect, move |_| callback());
        }

        self.set_state(SocketState::Connecting);
        debug!(%target, "connect");

        let this = self.clone();
        let on_connect = move |result| this.after_connect(result);
        let task = match target {
            ConnectTarget::Tcp { host, port } => StreamHandle::connect_tcp(&self.inner.loop_handle, host, port, on_connect),
            #[cfg(unix)]
            ConnectTarget::Pipe(path) => StreamHandle::connect_pipe(&self.inner.loop_handle, path, on_connect),
            #[cfg(not(unix))]
            ConnectTarget::Pipe(_) => {
                let error = io::Error::new(io::ErrorKind::Unsupported, "pipes are not supported on this platform");
                self.destroy_with(Some(NetError::connect(error)));
                return true;
            }
        };
        *self.inner.connect_task.borrow_mut() = Some(task);
        true
    }

    fn after_connect(&self, result: io::Result<StreamHandle>) {
        self.inner.connect_task.borrow_mut().take();
        if self.state() != SocketState::Connecting {
            if let Ok(handle) = result {
                handle.close();
            }
            return;
        }

        let handle = match result {
            Ok(handle) => handle,
            Err(e) => {
                debug!(cause = %e, "connect failed");
                self.destroy_with(Some(NetError::connect(e)));
                return;
            }
        };

        if self.inner.unref_requested.get() {
            handle.unref_handle();
        }
        self.attach(handle);
        self.set_state(SocketState::Open { readable: true, writable: true });

        let queued = std::mem::take(&mut *self.inner.connect_queue.borrow_mut());
        for (data, callback) in queued {
            if self.is_destroyed() {
                return;
            }
            self.submit(data, callback);
        }
        if self.inner.end_requested.get() {
            self.end_inner(None);
        }

        let this = self.clone();
        self.inner.loop_handle.next_tick(move || {
            if this.is_destroyed() {
                return;
            }
            this.emit(SocketEvent::Connect);
            this.start_reading();
        });
    }

    fn attach(&self, handle: StreamHandle) {
        let this = self.clone();
        handle.set_on_read(Rc::new(move |event| this.on_read(event)));
        *self.inner.handle.borrow_mut() = Some(handle);
    }

    pub(crate) fn start_reading(&self) {
        if self.inner.paused.get() || !self.state().is_readable() {
            return;
        }
        if let Some(handle) = self.stream_handle() {
            handle.read_start();
        }
    }

    fn stream_handle(&self) -> Option<StreamHandle> {
        self.inner.handle.borrow().clone()
    }

    fn set_state(&self, next: SocketState) {
        let current = self.inner.state.get();
        debug_assert!(current.can_become(next), "invalid socket transition {current:?} -> {next:?}");
        trace!(from = ?current, to = ?next, "socket state");
        self.inner.state.set(next);
    }

    pub(crate) fn emit(&self, event: SocketEvent) -> bool {
        self.inner.events.emit(event)
    }

    /// Routes incoming bytes and the peer's end to `ingest` instead of `data` and `end`
    /// events; used by protocol parsers that own the connection.
    pub fn set_ingest(&self, ingest: Option<Ingest>) {
        *self.inner.ingest.borrow_mut() = ingest;
    }

    fn on_read(&self, event: ReadEvent) {
        match event {
            ReadEvent::Data(bytes) => {
                self.inner.bytes_read.set(self.inner.bytes_read.get() + bytes.len() as u64);
                let ingest = self.inner.ingest.borrow().clone();
                match ingest {
                    Some(ingest) => ingest(SocketInput::Data(bytes)),
                    None => self.emit_data(&bytes),
                }
            }
            ReadEvent::Eof => self.on_end(),
            ReadEvent::Error(e) => self.destroy_with(Some(NetError::read(e))),
        }
    }

    fn emit_data(&self, bytes: &Bytes) {
        let chunk = {
            let mut decoder = self.inner.decoder.borrow_mut();
            match decoder.as_mut() {
                Some(decoder) => Chunk::Text(decoder.write(bytes)),
                None => Chunk::Bytes(bytes.clone()),
            }
        };
        if !chunk.is_empty() {
            self.emit(SocketEvent::Data(chunk));
        }
    }

    fn on_end(&self) {
        let SocketState::Open { writable, .. } = self.state() else {
            return;
        };
        debug!(peer = ?self.remote_address(), "peer ended the connection");
        self.set_state(SocketState::Open { readable: false, writable });

        let ingest = self.inner.ingest.borrow().clone();

        // close is deferred, so `end` below is still seen first
        if !writable {
            self.destroy();
        } else if !self.inner.allow_half_open {
            self.end();
        }

        if let Some(ingest) = ingest {
            ingest(SocketInput::End);
            return;
        }

        let tail = self.inner.decoder.borrow_mut().as_mut().map(StringDecoder::end);
        if let Some(text) = tail.filter(|text| !text.is_empty()) {
            self.emit(SocketEvent::Data(Chunk::Text(text)));
        }
        self.emit(SocketEvent::End);
    }

    pub fn readable(&self) -> bool {
        self.state().is_readable()
    }

    pub fn writable(&self) -> bool {
        match self.state() {
            SocketState::Connecting => !self.inner.end_requested.get(),
            state => state.is_writable(),
        }
    }

    /// Decodes incoming data to text; returns `false` for an unknown encoding.
    pub fn set_encoding<E>(&self, encoding: E) -> bool
    where
        E: TryInto<Encoding>,
    {
        match encoding.try_into() {
            Ok(encoding) => {
                *self.inner.decoder.borrow_mut() = Some(StringDecoder::new(encoding));
                true
            }
            Err(_) => false,
        }
    }

    /// Stops reading from the connection until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.inner.paused.set(true);
        if let Some(handle) = self.stream_handle() {
            handle.read_stop();
        }
    }

    pub fn resume(&self) {
        self.inner.paused.set(false);
        self.start_reading();
    }

    /// Returns `false` when the data was queued; wait for `drain` before writing more.
    pub fn write<B>(&self, data: B) -> bool
    where
        B: Into<Bytes>,
    {
        self.write_inner(data.into(), None)
    }

    /// Ends the writable side once queued writes are flushed.
    pub fn end(&self) -> bool {
        self.end_inner(None)
    }

    /// Closes the connection right away. Safe to call more than once.
    pub fn destroy(&self) {
        self.destroy_with(None);
    }

    /// Writes `data` and runs `callback` once it has been flushed to the connection.
    pub fn write_with<B, F>(&self, data: B, callback: F) -> bool
    where
        B: Into<Bytes>,
        F: FnOnce() + 'static,
    {
        self.write_inner(data.into(), Some(Box::new(callback)))
    }

    fn write_inner(&self, data: Bytes, callback: Option<WriteDone>) -> bool {
        match self.state() {
            SocketState::Connecting if !self.inner.end_requested.get() => {
                self.inner.connect_queue.borrow_mut().push_back((data, callback));
                self.inner.need_drain.set(true);
                false
            }
            SocketState::Open { writable: true, .. } => self.submit(data, callback),
            state => {
                warn!(?state, len = data.len(), "write after end or destroy");
                false
            }
        }
    }

    fn submit(&self, data: Bytes, callback: Option<WriteDone>) -> bool {
        let Some(handle) = self.stream_handle() else {
            return false;
        };

        let len = data.len();
        let this = self.clone();
        let result = handle.write(data, Box::new(move |result| this.after_write(result, len, callback)));
        if result.is_ok() {
            self.inner.pending_writes.set(self.inner.pending_writes.get() + 1);
        }
        match result {
            Ok(WriteStatus::Flushed) => true,
            Ok(WriteStatus::Queued) => {
                self.inner.need_drain.set(true);
                false
            }
            Err(e) => {
                self.destroy_with(Some(NetError::write(e)));
                false
            }
        }
    }

    fn after_write(&self, result: io::Result<()>, len: usize, callback: Option<WriteDone>) {
        self.inner.pending_writes.set(self.inner.pending_writes.get().saturating_sub(1));
        if self.is_destroyed() {
            return;
        }
        if let Err(e) = result {
            self.destroy_with(Some(NetError::write(e)));
            return;
        }

        self.inner.bytes_written.set(self.inner.bytes_written.get() + len as u64);
        if let Some(callback) = callback {
            callback();
        }

        if self.inner.pending_writes.get() == 0 && self.inner.need_drain.replace(false) {
            self.emit(SocketEvent::Drain);
        }
    }

    /// Writes `data`, then ends the writable side.
    pub fn end_with<B>(&self, data: B) -> bool
    where
        B: Into<Bytes>,
    {
        self.end_inner(Some(data.into()))
    }

    fn end_inner(&self, data: Option<Bytes>) -> bool {
        match self.state() {
            SocketState::Connecting if !self.inner.end_requested.get() => {
                if let Some(data) = data {
                    self.inner.connect_queue.borrow_mut().push_back((data, None));
                }
                self.inner.end_requested.set(true);
                true
            }
            SocketState::Open { writable: true, .. } => {
                if let Some(data) = data {
                    self.submit(data, None);
                }
                // the write above may have failed and destroyed the socket
                let SocketState::Open { readable, writable: true } = self.state() else {
                    return false;
                };
                self.set_state(SocketState::Open { readable, writable: false });
                self.shutdown_write();
                true
            }
            _ => false,
        }
    }

    fn shutdown_write(&self) {
        let Some(handle) = self.stream_handle() else {
            return;
        };
        let this = self.clone();
        if let Err(e) = handle.shutdown(Box::new(move |result| this.after_shutdown(result))) {
            self.destroy_with(Some(NetError::shutdown(e)));
        }
    }

    fn after_shutdown(&self, result: io::Result<()>) {
        if self.is_destroyed() {
            return;
        }
        if let Err(e) = result {
            debug!(cause = %e, "shutdown failed");
        }
        if !self.state().is_readable() {
            self.destroy();
        }
    }

    pub fn set_no_delay(&self, no_delay: bool) -> io::Result<()> {
        self.stream_handle().map_or(Ok(()), |handle| handle.set_no_delay(no_delay))
    }

    /// Keeps the loop alive while this socket is open; the default.
    pub fn ref_handle(&self) {
        self.inner.unref_requested.set(false);
        if let Some(handle) = self.stream_handle() {
            handle.ref_handle();
        }
    }

    /// Lets the loop finish even though this socket is still open.
    pub fn unref_handle(&self) {
        self.inner.unref_requested.set(true);
        if let Some(handle) = self.stream_handle() {
            handle.unref_handle();
        }
    }

    fn destroy_with(&self, error: Option<NetError>) {
        if self.is_destroyed() {
            return;
        }
        match &error {
            Some(e) => debug!(cause = %e, code = e.code(), "destroy socket"),
            None => trace!("destroy socket"),
        }
        self.set_state(SocketState::Destroyed);

        let connect_task = self.inner.connect_task.borrow_mut().take();
        if let Some(task) = connect_task {
            task.abort();
        }
        let dropped = std::mem::take(&mut *self.inner.connect_queue.borrow_mut());
        let ingest = self.inner.ingest.borrow_mut().take();
        let handle = self.inner.handle.borrow_mut().take();
        if let Some(handle) = handle {
            handle.close();
        }
        drop((dropped, ingest));

        let this = self.clone();
        self.inner.loop_handle.next_tick(move || {
            let had_error = error.is_some();
            if let Some(error) = error {
                this.emit(SocketEvent::Error(error));
            }
            this.emit(SocketEvent::Close { had_error });
            this.inner.events.remove_all_listeners(None);
        });
    }
}

impl Readable for Socket {
    fn readable(&self) -> bool {
        Socket::readable(self)
    }

    fn set_encoding<E>(&self, encoding: E) -> bool
    where
        E: TryInto<Encoding>,
    {
        Socket::set_encoding(self, encoding)
    }

    fn pause(&self) {
        Socket::pause(self);
    }

    fn resume(&self) {
        Socket::resume(self);
    }

    fn destroy(&self) {
        Socket::destroy(self);
    }
}

impl Writable for Socket {
    fn writable(&self) -> bool {
        Socket::writable(self)
    }

    fn write<B>(&self, data: B) -> bool
    where
        B: Into<Bytes>,
    {
        Socket::write(self, data)
    }

    fn end(&self) -> bool {
        Socket::end(self)
    }

    fn destroy(&self) {
        Socket::destroy(self);
    }
}

impl EventSource for Socket {
    type Event = SocketEvent;

    fn emitter(&self) -> &EventEmitter<SocketEvent> {
        &self.inner.events
    }
}

impl Default for Socket {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("state", &self.state())
            .field("handle", &*self.inner.handle.borrow())
            .field("bytes_read", &self.bytes_read())
            .field("bytes_written", &self.bytes_written())
            .finish_non_exhaustive()
    }
}
