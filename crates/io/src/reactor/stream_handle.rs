use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::SocketAddr;
#[cfg(unix)]
use std::path::PathBuf;
use std::rc::Rc;

use bytes::{Buf, Bytes, BytesMut};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::trace;

use super::HandleKind;
use super::halves::{self, ReadHalf, Split, WriteHalf};
use crate::runtime::{Handle, LoopRef};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// What a read notification carries. `Eof` and `Error` are terminal for the read side.
#[derive(Debug)]
pub enum ReadEvent {
    Data(Bytes),
    Eof,
    Error(io::Error),
}

pub type OnRead = Rc<dyn Fn(ReadEvent)>;

pub type WriteCallback = Box<dyn FnOnce(io::Result<()>)>;

/// Outcome of [`StreamHandle::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// The kernel took every byte.
    Flushed,
    /// Some bytes are waiting in the handle's write queue.
    Queued,
}

struct WriteReq {
    data: Bytes,
    callback: WriteCallback,
}

struct Inner {
    kind: HandleKind,
    loop_handle: Handle,
    loop_ref: LoopRef,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,

    reader: RefCell<Option<ReadHalf>>,
    on_read: RefCell<Option<OnRead>>,
    reading: Cell<bool>,
    read_control: Notify,
    read_task: RefCell<Option<JoinHandle<()>>>,

    writer: RefCell<Option<WriteHalf>>,
    write_queue: RefCell<VecDeque<WriteReq>>,
    write_queue_size: Cell<usize>,
    write_wakeup: Notify,
    write_task: RefCell<Option<JoinHandle<()>>>,
    shutdown: RefCell<Option<WriteCallback>>,
    shutdown_requested: Cell<bool>,

    closed: Cell<bool>,
}

/// A connected TCP or pipe stream.
///
/// Reads are delivered to the callback installed with [`set_on_read`](Self::set_on_read)
/// while reading is started. Writes are attempted right away and queued on a short write.
/// Every write and shutdown callback runs from the loop's deferred queue.
#[derive(Clone)]
pub struct StreamHandle {
    inner: Rc<Inner>,
}

impl StreamHandle {
    pub fn from_tcp(loop_handle: &Handle, stream: TcpStream) -> Self {
        Self::from_split(loop_handle, halves::split_tcp(stream))
    }

    #[cfg(unix)]
    pub fn from_pipe(loop_handle: &Handle, stream: UnixStream) -> Self {
        Self::from_split(loop_handle, halves::split_pipe(stream))
    }

    fn from_split(loop_handle: &Handle, split: Split) -> Self {
        let Split { kind, reader, writer, local_addr, peer_addr } = split;
        Self {
            inner: Rc::new(Inner {
                kind,
                loop_handle: loop_handle.clone(),
                loop_ref: LoopRef::new(loop_handle),
                local_addr,
                peer_addr,
                reader: RefCell::new(Some(reader)),
                on_read: RefCell::new(None),
                reading: Cell::new(false),
                read_control: Notify::new(),
                read_task: RefCell::new(None),
                writer: RefCell::new(Some(writer)),
                write_queue: RefCell::new(VecDeque::new()),
                write_queue_size: Cell::new(0),
                write_wakeup: Notify::new(),
                write_task: RefCell::new(None),
                shutdown: RefCell::new(None),
                shutdown_requested: Cell::new(false),
                closed: Cell::new(false),
            }),
        }
    }

    /// Opens a TCP connection; `on_connect` runs on the loop once it is established or failed.
    ///
    /// The loop stays alive while the attempt is pending. Aborting the returned task cancels it.
    pub fn connect_tcp<F>(loop_handle: &Handle, host: String, port: u16, on_connect: F) -> JoinHandle<()>
    where
        F: FnOnce(io::Result<StreamHandle>) + 'static,
    {
        let pending = LoopRef::new(loop_handle);
        let loop_handle = loop_handle.clone();
        let spawner = loop_handle.clone();
        spawner.spawn(async move {
            trace!(%host, port, "connecting");
            let result = TcpStream::connect((host.as_str(), port)).await;
            let result = result.map(|stream| StreamHandle::from_tcp(&loop_handle, stream));
            drop(pending);
            on_connect(result);
        })
    }

    #[cfg(unix)]
    pub fn connect_pipe<F>(loop_handle: &Handle, path: PathBuf, on_connect: F) -> JoinHandle<()>
    where
        F: FnOnce(io::Result<StreamHandle>) + 'static,
    {
        let pending = LoopRef::new(loop_handle);
        let loop_handle = loop_handle.clone();
        let spawner = loop_handle.clone();
        spawner.spawn(async move {
            trace!(path = %path.display(), "connecting");
            let result = UnixStream::connect(&path).await;
            let result = result.map(|stream| StreamHandle::from_pipe(&loop_handle, stream));
            drop(pending);
            on_connect(result);
        })
    }

    pub fn kind(&self) -> HandleKind {
        self.inner.kind
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    pub fn set_on_read(&self, on_read: OnRead) {
        *self.inner.on_read.borrow_mut() = Some(on_read);
    }

    pub fn read_start(&self) {
        let inner = &self.inner;
        if inner.closed.get() || inner.reading.replace(true) {
            return;
        }

        if inner.read_task.borrow().is_none() {
            let reader = inner.reader.borrow_mut().take();
            if let Some(reader) = reader {
                let task = inner.loop_handle.spawn(read_loop(Rc::clone(inner), reader));
                *inner.read_task.borrow_mut() = Some(task);
            }
        }
        inner.read_control.notify_one();
    }

    pub fn read_stop(&self) {
        if self.inner.reading.replace(false) {
            self.inner.read_control.notify_one();
        }
    }

    pub fn is_reading(&self) -> bool {
        self.inner.reading.get()
    }

    /// Bytes accepted by [`write`](Self::write) but not yet handed to the kernel.
    pub fn write_queue_size(&self) -> usize {
        self.inner.write_queue_size.get()
    }

    pub fn write(&self, mut data: Bytes, callback: WriteCallback) -> io::Result<WriteStatus> {
        let inner = &self.inner;
        if inner.closed.get() || inner.shutdown_requested.get() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "stream is not writable"));
        }

        if inner.write_queue.borrow().is_empty() {
            let written = {
                let guard = inner.writer.borrow();
                match guard.as_ref() {
                    Some(writer) => writer.try_write(&data),
                    None => Err(io::Error::from(io::ErrorKind::NotConnected)),
                }
            };
            match written {
                Ok(n) if n == data.len() => {
                    inner.loop_handle.next_tick(move || callback(Ok(())));
                    return Ok(WriteStatus::Flushed);
                }
                Ok(n) => data.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
        }

        trace!(len = data.len(), "queue write");
        inner.write_queue_size.set(inner.write_queue_size.get() + data.len());
        inner.write_queue.borrow_mut().push_back(WriteReq { data, callback });
        self.ensure_writer();
        Ok(WriteStatus::Queued)
    }

    /// Shuts the write side down once every queued write has been flushed.
    pub fn shutdown(&self, callback: WriteCallback) -> io::Result<()> {
        let inner = &self.inner;
        if inner.closed.get() || inner.shutdown_requested.replace(true) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "stream is already shut down"));
        }
        *inner.shutdown.borrow_mut() = Some(callback);
        self.ensure_writer();
        Ok(())
    }

    pub fn set_no_delay(&self, no_delay: bool) -> io::Result<()> {
        match self.inner.writer.try_borrow() {
            Ok(writer) => writer.as_ref().map_or(Ok(()), |writer| writer.set_no_delay(no_delay)),
            Err(_) => Ok(()),
        }
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

    /// Stops all I/O and releases the connection. Pending write callbacks are dropped.
    pub fn close(&self) {
        let inner = &self.inner;
        if inner.closed.replace(true) {
            return;
        }
        trace!(kind = ?inner.kind, "close stream handle");

        inner.reading.set(false);
        let read_task = inner.read_task.borrow_mut().take();
        let write_task = inner.write_task.borrow_mut().take();
        for task in read_task.into_iter().chain(write_task) {
            task.abort();
        }

        let on_read = inner.on_read.borrow_mut().take();
        let queue = std::mem::take(&mut *inner.write_queue.borrow_mut());
        let shutdown = inner.shutdown.borrow_mut().take();
        inner.write_queue_size.set(0);
        drop((on_read, queue, shutdown));

        let reader = inner.reader.borrow_mut().take();
        drop(reader);
        // an aborted writer task may still hold a borrow until it is dropped
        if let Ok(mut writer) = inner.writer.try_borrow_mut() {
            writer.take();
        }

        inner.loop_ref.release();
    }

    fn ensure_writer(&self) {
        let inner = &self.inner;
        if inner.write_task.borrow().is_none() {
            let task = inner.loop_handle.spawn(write_loop(Rc::clone(inner)));
            *inner.write_task.borrow_mut() = Some(task);
        }
        inner.write_wakeup.notify_one();
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("kind", &self.inner.kind)
            .field("peer_addr", &self.inner.peer_addr)
            .field("reading", &self.inner.reading.get())
            .field("write_queue_size", &self.inner.write_queue_size.get())
            .field("closed", &self.inner.closed.get())
            .finish()
    }
}

async fn read_loop(inner: Rc<Inner>, mut reader: ReadHalf) {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    loop {
        if inner.closed.get() {
            return;
        }
        if !inner.reading.get() {
            inner.read_control.notified().await;
            continue;
        }

        buf.reserve(READ_BUFFER_SIZE);
        let result = tokio::select! {
            result = reader.read_buf(&mut buf) => result,
            () = inner.read_control.notified() => continue,
        };

        let event = match result {
            Ok(0) => ReadEvent::Eof,
            Ok(n) => {
                trace!(len = n, "read bytes");
                ReadEvent::Data(buf.split().freeze())
            }
            Err(e) => ReadEvent::Error(e),
        };
        let terminal = !matches!(event, ReadEvent::Data(_));

        let on_read = inner.on_read.borrow().clone();
        if let Some(on_read) = on_read {
            on_read(event);
        }
        if terminal {
            return;
        }
    }
}

async fn write_loop(inner: Rc<Inner>) {
    loop {
        let front = inner.write_queue.borrow().front().map(|req| req.data.clone());
        let Some(data) = front else {
            if inner.shutdown_requested.get() {
                finish_shutdown(&inner).await;
                return;
            }
            inner.write_wakeup.notified().await;
            continue;
        };

        match write_some(&inner, &data).await {
            Ok(written) => advance_queue(&inner, written),
            Err(e) => {
                fail_queue(&inner, e);
                return;
            }
        }
    }
}

async fn write_some(inner: &Inner, data: &[u8]) -> io::Result<usize> {
    loop {
        let guard = inner.writer.borrow();
        let Some(writer) = guard.as_ref() else {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        };
        writer.writable().await?;
        match writer.try_write(data) {
            Ok(written) => return Ok(written),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }
    }
}

fn advance_queue(inner: &Inner, written: usize) {
    inner.write_queue_size.set(inner.write_queue_size.get().saturating_sub(written));
    let completed = {
        let mut queue = inner.write_queue.borrow_mut();
        match queue.front_mut() {
            Some(front) if written < front.data.len() => {
                front.data.advance(written);
                None
            }
            Some(_) => queue.pop_front(),
            None => None,
        }
    };
    if let Some(req) = completed {
        inner.loop_handle.next_tick(move || (req.callback)(Ok(())));
    }
}

fn fail_queue(inner: &Inner, error: io::Error) {
    let queue = std::mem::take(&mut *inner.write_queue.borrow_mut());
    inner.write_queue_size.set(0);
    let shutdown = inner.shutdown.borrow_mut().take();

    let kind = error.kind();
    let mut first = Some(error);
    for req in queue {
        let result = Err(first.take().unwrap_or_else(|| io::Error::new(kind, "write aborted")));
        inner.loop_handle.next_tick(move || (req.callback)(result));
    }
    if let Some(callback) = shutdown {
        let error = first.take().unwrap_or_else(|| io::Error::new(kind, "shutdown aborted"));
        inner.loop_handle.next_tick(move || callback(Err(error)));
    }
}

async fn finish_shutdown(inner: &Inner) {
    let writer = inner.writer.borrow_mut().take();
    let result = match writer {
        Some(mut writer) => writer.shutdown().await,
        None => Ok(()),
    };
    trace!(ok = result.is_ok(), "shutdown write side");

    let callback = inner.shutdown.borrow_mut().take();
    if let Some(callback) = callback {
        inner.loop_handle.next_tick(move || callback(result));
    }
}
