use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use bytes::Bytes;
use micro_io::events::{Event, EventEmitter, EventSource};
use micro_io::net::{self, Address, ListenOptions, NetError, ServerOptions, Socket};
use tracing::{debug, error};

use crate::connection::HttpConnection;
use crate::incoming::IncomingMessage;
use crate::protocol::ParseError;
use crate::response::ServerResponse;

/// Events emitted by an HTTP [`Server`].
#[derive(Debug)]
pub enum ServerEvent {
    /// A request head was parsed; its body follows as `data` events on the message.
    Request(IncomingMessage, ServerResponse),
    Connection(Socket),
    /// A request could not be parsed. Listeners own the socket from here on; without
    /// one the server answers `400 Bad Request` or destroys the connection.
    ClientError { error: ParseError, socket: Socket },
    /// A request asked to switch protocols. `head` holds the bytes already read past the
    /// request head; the socket no longer belongs to the server.
    Upgrade { request: IncomingMessage, socket: Socket, head: Bytes },
    Listening,
    Close,
    Error(NetError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerEventKind {
    Request,
    Connection,
    ClientError,
    Upgrade,
    Listening,
    Close,
    Error,
}

impl Event for ServerEvent {
    type Kind = ServerEventKind;

    fn kind(&self) -> ServerEventKind {
        match self {
            ServerEvent::Request(..) => ServerEventKind::Request,
            ServerEvent::Connection(_) => ServerEventKind::Connection,
            ServerEvent::ClientError { .. } => ServerEventKind::ClientError,
            ServerEvent::Upgrade { .. } => ServerEventKind::Upgrade,
            ServerEvent::Listening => ServerEventKind::Listening,
            ServerEvent::Close => ServerEventKind::Close,
            ServerEvent::Error(_) => ServerEventKind::Error,
        }
    }
}

struct ServerInner {
    net: net::Server,
    // set while listening so the server outlives the handles the caller dropped
    listening_ref: RefCell<Option<Server>>,
    events: EventEmitter<ServerEvent>,
}

/// An HTTP/1.1 server on top of a [`net::Server`](micro_io::net::Server).
///
/// Every accepted socket gets a connection that parses requests off it and answers them
/// in order. Sockets are half-open, so a client that ends its side still receives the
/// responses to the requests it already sent.
#[derive(Clone)]
pub struct Server {
    inner: Rc<ServerInner>,
}

impl Server {
    /// # Panics
    ///
    /// Panics when called outside of a running [`EventLoop`](micro_io::runtime::EventLoop).
    pub fn new() -> Self {
        let net = net::Server::with_options(ServerOptions { allow_half_open: true });
        let inner = Rc::new(ServerInner { net: net.clone(), listening_ref: RefCell::new(None), events: EventEmitter::new() });

        let weak = Rc::downgrade(&inner);
        net.on(net::ServerEventKind::Connection, move |event| {
            if let (Some(server), net::ServerEvent::Connection(socket)) = (upgrade(&weak), event) {
                server.on_connection(socket);
            }
        });
        let weak = Rc::downgrade(&inner);
        net.on(net::ServerEventKind::Listening, move |_| {
            if let Some(server) = upgrade(&weak) {
                server.emit(ServerEvent::Listening);
            }
        });
        let weak = Rc::downgrade(&inner);
        net.on(net::ServerEventKind::Error, move |event| {
            if let (Some(server), net::ServerEvent::Error(e)) = (upgrade(&weak), event) {
                error!(cause = %e, "http server error");
                server.emit(ServerEvent::Error(e.clone()));
            }
        });
        let weak = Rc::downgrade(&inner);
        net.on(net::ServerEventKind::Close, move |_| {
            if let Some(server) = upgrade(&weak) {
                let listening_ref = server.inner.listening_ref.borrow_mut().take();
                server.emit(ServerEvent::Close);
                drop(listening_ref);
            }
        });

        Self { inner }
    }

    fn on_connection(&self, socket: &Socket) {
        debug!(peer = ?socket.remote_address(), "http connection");
        HttpConnection::attach(self, socket);
        self.emit(ServerEvent::Connection(socket.clone()));
    }

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
        if self.inner.net.listening() {
            return false;
        }
        let id = callback.map(|callback| self.once(ServerEventKind::Listening, move |_| callback()));
        if !self.inner.net.listen(options) {
            if let Some(id) = id {
                self.remove_listener(id);
            }
            return false;
        }
        *self.inner.listening_ref.borrow_mut() = Some(self.clone());
        true
    }

    /// Stops accepting; `close` follows once every open connection is gone.
    pub fn close(&self) -> bool {
        self.inner.net.close()
    }

    pub fn close_with<F>(&self, callback: F) -> bool
    where
        F: FnOnce() + 'static,
    {
        if !self.inner.net.listening() {
            return false;
        }
        self.once(ServerEventKind::Close, move |_| callback());
        self.inner.net.close()
    }

    pub fn listening(&self) -> bool {
        self.inner.net.listening()
    }

    pub fn address(&self) -> Option<Address> {
        self.inner.net.address()
    }

    pub fn connections(&self) -> usize {
        self.inner.net.connections()
    }

    pub fn set_max_connections(&self, max: Option<usize>) {
        self.inner.net.set_max_connections(max);
    }

    pub fn ref_handle(&self) {
        self.inner.net.ref_handle();
    }

    pub fn unref_handle(&self) {
        self.inner.net.unref_handle();
    }

    pub(crate) fn emit(&self, event: ServerEvent) -> bool {
        self.inner.events.emit(event)
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

fn upgrade(weak: &Weak<ServerInner>) -> Option<Server> {
    weak.upgrade().map(|inner| Server { inner })
}

impl EventSource for Server {
    type Event = ServerEvent;

    fn emitter(&self) -> &EventEmitter<ServerEvent> {
        &self.inner.events
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("listening", &self.listening())
            .field("connections", &self.connections())
            .finish_non_exhaustive()
    }
}

/// Creates a server that calls `on_request` for every parsed request.
///
/// ```no_run
/// use micro_io::runtime::EventLoop;
///
/// let event_loop = EventLoop::new().unwrap();
/// event_loop.run(|| {
///     let server = micro_io_http::create_server(|_request, response| {
///         response.set_header("Content-Type", "text/plain").unwrap();
///         response.end_with("hello world\n");
///     });
///     server.listen(8080);
/// });
/// ```
pub fn create_server<F>(on_request: F) -> Server
where
    F: Fn(&IncomingMessage, &ServerResponse) + 'static,
{
    let server = Server::new();
    server.on(ServerEventKind::Request, move |event| {
        if let ServerEvent::Request(request, response) = event {
            on_request(request, response);
        }
    });
    server
}
