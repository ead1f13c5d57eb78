use std::cell::{Cell, RefCell};
use std::fmt;
use std::io;
use std::rc::Rc;

use tracing::{debug, error, info, warn};

use super::{Address, ListenOptions, ListenTarget, NetError, ServerOptions, Socket, SocketEvent, SocketEventKind, SocketOptions};
use crate::events::{Event, EventEmitter, EventSource};
use crate::reactor::{ListenHandle, OnConnection, StreamHandle};
use crate::runtime::Handle;

/// Events emitted by a [`Server`].
#[derive(Debug)]
pub enum ServerEvent {
    Listening,
    Connection(Socket),
    Error(NetError),
    /// The listening handle is gone and every accepted connection has closed.
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerEventKind {
    Listening,
    Connection,
    Error,
    Close,
}

impl Event for ServerEvent {
    type Kind = ServerEventKind;

    fn kind(&self) -> ServerEventKind {
        match self {
            ServerEvent::Listening => ServerEventKind::Listening,
            ServerEvent::Connection(_) => ServerEventKind::Connection,
            ServerEvent::Error(_) => ServerEventKind::Error,
            ServerEvent::Close => ServerEventKind::Close,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Listening,
    Closed,
}

struct ServerInner {
    loop_handle: Handle,
    options: ServerOptions,
    state: Cell<ServerState>,
    handle: RefCell<Option<ListenHandle>>,
    connections: Cell<usize>,
    max_connections: Cell<Option<usize>>,
    unref_requested: Cell<bool>,
    events: EventEmitter<ServerEvent>,
}

/// Accepts TCP or pipe connections and hands each one out as a [`Socket`].
///
/// The server only counts its connections. Closing it stops accepting right away, while
/// the `close` event waits until every accepted socket has closed on its own.
#[derive(Clone)]
pub struct Server {
    inner: Rc<ServerInner>,
}

impl Server {
    /// Creates a server on the current loop.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a running [`EventLoop`](crate::runtime::EventLoop).
    pub fn new() -> Self {
        Self::with_options(ServerOptions::default())
    }

    pub fn with_options(options: ServerOptions) -> Self {
        Self {
            inner: Rc::new(ServerInner {
                loop_handle: Handle::current(),
                options,
                state: Cell::new(ServerState::Idle),
                handle: RefCell::new(None),
                connections: Cell::new(0),
                max_connections: Cell::new(None),
                unref_requested: Cell::new(false),
                events: EventEmitter::new(),
            }),
        }
    }

    pub fn state(&self) -> ServerState {
        self.inner.state.get()
    }

    pub fn listening(&self) -> bool {
        self.state() == ServerState::Listening
    }

    /// Number of accepted connections that have not closed yet.
    pub fn connections(&self) -> usize {
        self.inner.connections.get()
    }

    /// Connections accepted beyond `max` are closed immediately.
    pub fn set_max_connections(&self, max: Option<usize>) {
        self.inner.max_connections.set(max);
    }

    pub fn address(&self) -> Option<Address> {
        let handle = self.inner.handle.borrow();
        let handle = handle.as_ref()?;
        match (handle.local_addr(), handle.path()) {
            (Some(addr), _) => Some(Address::Tcp(addr)),
            (None, Some(path)) => Some(Address::Pipe(path.to_path_buf())),
            (None, None) => None,
        }
    }

    /// Binds and starts listening. Returns `false` when a listening handle already exists
    /// or when binding failed; the latter is also reported through `error`.
    pub fn listen<O>(&self, options: O) -> bool
    where
        O: Into<ListenOptions>,
    {
        self.listen_inner(options.into(), None)
    }

    /// Like [`listen`](Self::listen), running `callback` on the `listening` event.
    pub fn listen_with<O, F>(&self, options: O, callback: F) -> bool
    where
        O: Into<ListenOptions>,
        F: FnOnce() + 'static,
    {
        self.listen_inner(options.into(), Some(Box::new(callback)))
    }

    fn listen_inner(&self, options: ListenOptions, callback: Option<Box<dyn FnOnce()>>) -> bool {
        if self.inner.handle.borrow().is_some() {
            warn!(state = ?self.state(), "server is already listening");
            return false;
        }
        let id = callback.map(|callback| self.once(ServerEventKind::Listening, move |_| callback()));
        let forget_callback = || {
            if let Some(id) = id {
                self.remove_listener(id);
            }
        };

        let handle = match self.create_handle(&options) {
            Ok(handle) => handle,
            Err(e) => {
                error!(cause = %e, "bind server error");
                forget_callback();
                self.emit_error_soon(e);
                return false;
            }
        };

        let this = self.clone();
        let on_connection: OnConnection = Rc::new(move |accepted| this.on_connection(accepted));
        if let Err(e) = handle.listen(options.backlog_size(), on_connection) {
            error!(cause = %e, "listen server error");
            handle.close();
            forget_callback();
            self.emit_error_soon(NetError::listen(e));
            return false;
        }
        if self.inner.unref_requested.get() {
            handle.unref_handle();
        }

        *self.inner.handle.borrow_mut() = Some(handle);
        self.inner.state.set(ServerState::Listening);
        if let Some(address) = self.address() {
            info!(%address, "server listening");
        }

        let this = self.clone();
        self.inner.loop_handle.next_tick(move || {
            this.emit(ServerEvent::Listening);
        });
        true
    }

    fn create_handle(&self, options: &ListenOptions) -> Result<ListenHandle, NetError> {
        let loop_handle = &self.inner.loop_handle;
        match options.target() {
            ListenTarget::Tcp { host, port } => {
                let addr = ListenOptions::resolve(host.as_deref(), *port).map_err(NetError::bind)?;
                ListenHandle::bind_tcp(loop_handle, addr).map_err(NetError::bind)
            }
            #[cfg(unix)]
            ListenTarget::Pipe(path) => ListenHandle::bind_pipe(loop_handle, path).map_err(NetError::bind),
            #[cfg(not(unix))]
            ListenTarget::Pipe(_) => Err(NetError::bind(io::Error::new(
                io::ErrorKind::Unsupported,
                "pipes are not supported on this platform",
            ))),
        }
    }

    fn on_connection(&self, accepted: io::Result<StreamHandle>) {
        let stream = match accepted {
            Ok(stream) => stream,
            Err(e) => {
                self.emit(ServerEvent::Error(NetError::accept(e)));
                return;
            }
        };

        let connections = self.inner.connections.get();
        if let Some(max) = self.inner.max_connections.get()
            && connections >= max
        {
            debug!(connections, max, "refuse connection over the limit");
            stream.close();
            return;
        }

        let options = SocketOptions { allow_half_open: self.inner.options.allow_half_open };
        let socket = Socket::from_accepted(self.inner.loop_handle.clone(), stream, options);
        socket.start_reading();
        self.inner.connections.set(connections + 1);

        let server = self.clone();
        socket.once(SocketEventKind::Close, move |_| {
            server.inner.connections.set(server.inner.connections.get().saturating_sub(1));
            server.emit_close_if_drained();
        });

        self.emit(ServerEvent::Connection(socket.clone()));
        socket.emit(SocketEvent::Connect);
    }

    /// Stops accepting. Returns `false` when the server was not listening.
    pub fn close(&self) -> bool {
        self.close_inner(None)
    }

    /// Like [`close`](Self::close), running `callback` on the `close` event.
    pub fn close_with<F>(&self, callback: F) -> bool
    where
        F: FnOnce() + 'static,
    {
        self.close_inner(Some(Box::new(callback)))
    }

    fn close_inner(&self, callback: Option<Box<dyn FnOnce()>>) -> bool {
        let Some(handle) = self.inner.handle.borrow_mut().take() else {
            return false;
        };
        if let Some(callback) = callback {
            self.once(ServerEventKind::Close, move |_| callback());
        }

        handle.close();
        self.inner.state.set(ServerState::Closed);
        info!(connections = self.connections(), "server stopped listening");
        self.emit_close_if_drained();
        true
    }

    fn emit_close_if_drained(&self) {
        if self.inner.handle.borrow().is_some() || self.inner.connections.get() > 0 {
            return;
        }
        let this = self.clone();
        self.inner.loop_handle.next_tick(move || {
            this.emit(ServerEvent::Close);
        });
    }

    fn emit_error_soon(&self, error: NetError) {
        let this = self.clone();
        self.inner.loop_handle.next_tick(move || {
            this.emit(ServerEvent::Error(error));
        });
    }

    fn emit(&self, event: ServerEvent) -> bool {
        self.inner.events.emit(event)
    }

    pub fn ref_handle(&self) {
        self.inner.unref_requested.set(false);
        if let Some(handle) = self.inner.handle.borrow().as_ref() {
            handle.ref_handle();
        }
    }

    pub fn unref_handle(&self) {
        self.inner.unref_requested.set(true);
        if let Some(handle) = self.inner.handle.borrow().as_ref() {
            handle.unref_handle();
        }
    }
}

impl EventSource for Server {
    type Event = ServerEvent;

    fn emitter(&self) -> &EventEmitter<ServerEvent> {
        &self.inner.events
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("state", &self.state())
            .field("address", &self.address())
            .field("connections", &self.connections())
            .finish_non_exhaustive()
    }
}
