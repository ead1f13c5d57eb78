use std::cell::RefCell;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket};
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use super::{HandleKind, StreamHandle};
use crate::runtime::{Handle, LoopRef};

/// Accept notification: a new connection handle, or the accept error.
pub type OnConnection = Rc<dyn Fn(io::Result<StreamHandle>)>;

enum State {
    Bound(TcpSocket),
    #[cfg(unix)]
    BoundPipe(UnixListener),
    Listening(JoinHandle<()>),
    Closed,
}

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Pipe(UnixListener),
}

struct Inner {
    kind: HandleKind,
    loop_handle: Handle,
    loop_ref: LoopRef,
    local_addr: Option<SocketAddr>,
    path: Option<PathBuf>,
    state: RefCell<State>,
}

/// A bound, and later listening, TCP socket or unix domain socket.
#[derive(Clone)]
pub struct ListenHandle {
    inner: Rc<Inner>,
}

impl ListenHandle {
    pub fn bind_tcp(loop_handle: &Handle, addr: SocketAddr) -> io::Result<Self> {
        let socket = if addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
        #[cfg(unix)]
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let local_addr = socket.local_addr()?;

        Ok(Self::new(loop_handle, HandleKind::Tcp, Some(local_addr), None, State::Bound(socket)))
    }

    #[cfg(unix)]
    pub fn bind_pipe(loop_handle: &Handle, path: &Path) -> io::Result<Self> {
        let listener = UnixListener::bind(path)?;
        Ok(Self::new(loop_handle, HandleKind::Pipe, None, Some(path.to_path_buf()), State::BoundPipe(listener)))
    }

    fn new(loop_handle: &Handle, kind: HandleKind, local_addr: Option<SocketAddr>, path: Option<PathBuf>, state: State) -> Self {
        Self {
            inner: Rc::new(Inner {
                kind,
                loop_handle: loop_handle.clone(),
                loop_ref: LoopRef::new(loop_handle),
                local_addr,
                path,
                state: RefCell::new(state),
            }),
        }
    }

    pub fn kind(&self) -> HandleKind {
        self.inner.kind
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn is_listening(&self) -> bool {
        matches!(*self.inner.state.borrow(), State::Listening(_))
    }

    /// Starts accepting; every accepted connection, or accept failure, goes to `on_connection`.
    pub fn listen(&self, backlog: u32, on_connection: OnConnection) -> io::Result<()> {
        let state = std::mem::replace(&mut *self.inner.state.borrow_mut(), State::Closed);
        let listener = match state {
            State::Bound(socket) => Listener::Tcp(socket.listen(backlog)?),
            #[cfg(unix)]
            State::BoundPipe(listener) => Listener::Pipe(listener),
            other => {
                *self.inner.state.borrow_mut() = other;
                return Err(io::Error::new(io::ErrorKind::InvalidInput, "handle is not bound"));
            }
        };

        trace!(kind = ?self.inner.kind, backlog, "start accepting");
        let task = self.inner.loop_handle.spawn(accept_loop(listener, self.inner.loop_handle.clone(), on_connection));
        *self.inner.state.borrow_mut() = State::Listening(task);
        Ok(())
    }

    pub fn ref_handle(&self) {
        self.inner.loop_ref.ref_handle();
    }

    pub fn unref_handle(&self) {
        self.inner.loop_ref.unref_handle();
    }

    pub fn has_ref(&self) -> bool {
        self.inner.loop_ref.has_ref()
    }

    /// Stops accepting. A pipe's path is unlinked so it can be bound again.
    pub fn close(&self) {
        let state = std::mem::replace(&mut *self.inner.state.borrow_mut(), State::Closed);
        if matches!(state, State::Closed) {
            return;
        }
        if let State::Listening(task) = state {
            task.abort();
        }
        if let Some(path) = &self.inner.path
            && let Err(e) = std::fs::remove_file(path)
        {
            warn!(cause = %e, path = %path.display(), "failed to unlink pipe");
        }
        self.inner.loop_ref.release();
    }
}

impl fmt::Debug for ListenHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenHandle")
            .field("kind", &self.inner.kind)
            .field("local_addr", &self.inner.local_addr)
            .field("listening", &self.is_listening())
            .finish()
    }
}

/// Delay before accepting again after a failure, doubled on every consecutive failure.
#[derive(Debug)]
struct AcceptBackoff {
    delay: Option<Duration>,
}

impl AcceptBackoff {
    const INITIAL: Duration = Duration::from_millis(5);
    const MAX: Duration = Duration::from_secs(1);

    fn new() -> Self {
        Self { delay: None }
    }

    fn on_error(&mut self) -> Duration {
        let delay = self.delay.map_or(Self::INITIAL, |delay| (delay * 2).min(Self::MAX));
        self.delay = Some(delay);
        delay
    }

    fn reset(&mut self) {
        self.delay = None;
    }
}

async fn accept_loop(listener: Listener, loop_handle: Handle, on_connection: OnConnection) {
    let mut backoff = AcceptBackoff::new();
    loop {
        let accepted = match &listener {
            Listener::Tcp(listener) => listener.accept().await.map(|(stream, peer)| {
                trace!(%peer, "accepted connection");
                StreamHandle::from_tcp(&loop_handle, stream)
            }),
            #[cfg(unix)]
            Listener::Pipe(listener) => {
                listener.accept().await.map(|(stream, _)| StreamHandle::from_pipe(&loop_handle, stream))
            }
        };

        let failed = accepted.is_err();
        if let Err(e) = &accepted {
            warn!(cause = %e, "failed to accept");
        }
        on_connection(accepted);

        // persistent failures such as EMFILE would otherwise spin
        if failed {
            tokio::time::sleep(backoff.on_error()).await;
        } else {
            backoff.reset();
        }
    }
}
