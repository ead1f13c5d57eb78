use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use bytes::Bytes;
use http::Method;
use micro_io::events::{Event, EventEmitter, EventSource};
use micro_io::net::{Socket, WeakSocket};
use micro_io::runtime::Handle;
use micro_io::stream::{Chunk, Encoding, Readable, StringDecoder};
use tracing::{debug, trace, warn};

use crate::protocol::{FieldValue, Headers, PayloadItem};

/// Events emitted by an [`IncomingMessage`].
#[derive(Debug)]
pub enum IncomingEvent {
    Data(Chunk),
    End,
    /// The connection closed before the whole message arrived.
    Aborted,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IncomingEventKind {
    Data,
    End,
    Aborted,
    Close,
}

impl Event for IncomingEvent {
    type Kind = IncomingEventKind;

    fn kind(&self) -> IncomingEventKind {
        match self {
            IncomingEvent::Data(_) => IncomingEventKind::Data,
            IncomingEvent::End => IncomingEventKind::End,
            IncomingEvent::Aborted => IncomingEventKind::Aborted,
            IncomingEvent::Close => IncomingEventKind::Close,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct MessageFlags {
    /// the parser saw the end of the body; further header lines are trailers
    complete: bool,
    readable: bool,
    paused: bool,
    end_emitted: bool,
    upgrade: bool,
}

struct IncomingInner {
    loop_handle: Handle,
    socket: WeakSocket,
    status_code: Cell<u16>,
    http_version: RefCell<String>,
    method: RefCell<Option<Method>>,
    url: RefCell<String>,
    headers: RefCell<Headers>,
    trailers: RefCell<Headers>,
    // body chunks not emitted yet; an `Eof` can only be the last entry
    pendings: RefCell<VecDeque<PayloadItem>>,
    decoder: RefCell<Option<StringDecoder>>,
    flags: Cell<MessageFlags>,
    closed: Cell<bool>,
    events: EventEmitter<IncomingEvent>,
}

/// A request received by the HTTP server, readable as a stream of body chunks.
///
/// The connection fills the message in while parsing: the request line and headers first,
/// then body chunks through [`push_data`](Self::push_data) and the end through
/// [`push_end`](Self::push_end). While the message is paused, chunks wait in a pending
/// queue and are pumped out on a later loop iteration after [`resume`](Self::resume), so
/// `data` events always arrive in body order and `end` fires once, after the last chunk.
///
/// The message only holds a weak reference to its socket.
#[derive(Clone)]
pub struct IncomingMessage {
    inner: Rc<IncomingInner>,
}

impl IncomingMessage {
    /// # Panics
    ///
    /// Panics when called outside of a running [`EventLoop`](micro_io::runtime::EventLoop).
    pub fn new(socket: &Socket) -> Self {
        Self {
            inner: Rc::new(IncomingInner {
                loop_handle: Handle::current(),
                socket: socket.downgrade(),
                status_code: Cell::new(0),
                http_version: RefCell::new(String::new()),
                method: RefCell::new(None),
                url: RefCell::new(String::new()),
                headers: RefCell::new(Headers::new()),
                trailers: RefCell::new(Headers::new()),
                pendings: RefCell::new(VecDeque::new()),
                decoder: RefCell::new(None),
                flags: Cell::new(MessageFlags { readable: true, ..MessageFlags::default() }),
                closed: Cell::new(false),
                events: EventEmitter::new(),
            }),
        }
    }

    /// The connection the message arrived on, while it is still alive.
    pub fn socket(&self) -> Option<Socket> {
        self.inner.socket.upgrade()
    }

    pub fn status_code(&self) -> u16 {
        self.inner.status_code.get()
    }

    pub fn set_status_code(&self, status_code: u16) {
        self.inner.status_code.set(status_code);
    }

    /// `"1.1"` or `"1.0"`.
    pub fn http_version(&self) -> String {
        self.inner.http_version.borrow().clone()
    }

    pub fn set_http_version(&self, version: impl Into<String>) {
        *self.inner.http_version.borrow_mut() = version.into();
    }

    pub fn method(&self) -> Option<Method> {
        self.inner.method.borrow().clone()
    }

    pub fn set_method(&self, method: Method) {
        *self.inner.method.borrow_mut() = Some(method);
    }

    pub fn url(&self) -> String {
        self.inner.url.borrow().clone()
    }

    pub fn set_url(&self, url: impl Into<String>) {
        *self.inner.url.borrow_mut() = url.into();
    }

    /// Folded request headers, keyed by lowercase name.
    pub fn headers(&self) -> Headers {
        self.inner.headers.borrow().clone()
    }

    pub fn header(&self, name: &str) -> Option<FieldValue> {
        self.inner.headers.borrow().get(name).cloned()
    }

    /// Trailer fields of a chunked body; empty until the message is complete.
    pub fn trailers(&self) -> Headers {
        self.inner.trailers.borrow().clone()
    }

    /// Sets a header, replacing any previous value.
    pub fn set_header(&self, name: &str, value: &str) {
        self.inner.headers.borrow_mut().insert(name, value);
    }

    /// Adds one raw header line. Once the message is complete the line is a trailer.
    pub fn add_header_line(&self, name: &str, value: &str) {
        let target = if self.flags().complete { &self.inner.trailers } else { &self.inner.headers };
        target.borrow_mut().add_line(name, value);
    }

    pub fn is_complete(&self) -> bool {
        self.flags().complete
    }

    pub fn set_complete(&self) {
        self.update_flags(|flags| flags.complete = true);
    }

    pub fn upgrade(&self) -> bool {
        self.flags().upgrade
    }

    pub fn set_upgrade(&self, upgrade: bool) {
        self.update_flags(|flags| flags.upgrade = upgrade);
    }

    pub fn is_paused(&self) -> bool {
        self.flags().paused
    }

    pub fn readable(&self) -> bool {
        self.flags().readable
    }

    pub fn encoding(&self) -> Option<Encoding> {
        self.inner.decoder.borrow().as_ref().map(StringDecoder::encoding)
    }

    /// Emits body data as text from now on; returns `false` for an unknown encoding.
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

    /// Emits `data` with `bytes`, decoded when an encoding is set.
    ///
    /// A decoder may hold back an incomplete character, in which case nothing is emitted.
    pub fn emit_data(&self, bytes: Bytes) {
        let decoded = self.inner.decoder.borrow_mut().as_mut().map(|decoder| decoder.write(&bytes));
        match decoded {
            Some(text) if text.is_empty() => {}
            Some(text) => {
                self.emit(IncomingEvent::Data(Chunk::Text(text)));
            }
            None => {
                self.emit(IncomingEvent::Data(Chunk::Bytes(bytes)));
            }
        }
    }

    /// Emits `end` unless it was emitted before.
    ///
    /// Whatever the decoder still holds is flushed as a last `data` event first.
    pub fn emit_end(&self) {
        if !self.flags().end_emitted {
            let tail = self.inner.decoder.borrow_mut().as_mut().map(StringDecoder::end);
            if let Some(text) = tail.filter(|text| !text.is_empty()) {
                self.emit(IncomingEvent::Data(Chunk::Text(text)));
            }
            self.emit(IncomingEvent::End);
        }
        self.update_flags(|flags| flags.end_emitted = true);
    }

    /// Pumps the pending queue on a later loop iteration.
    pub fn emit_pending(&self) {
        self.emit_pending_inner(None);
    }

    /// Pumps the pending queue, then runs `callback`.
    ///
    /// With nothing pending `callback` runs right away; otherwise pumping and `callback`
    /// both happen on a later loop iteration.
    pub fn emit_pending_with<F>(&self, callback: F)
    where
        F: FnOnce() + 'static,
    {
        self.emit_pending_inner(Some(Box::new(callback)));
    }

    fn emit_pending_inner(&self, callback: Option<Box<dyn FnOnce()>>) {
        if self.inner.pendings.borrow().is_empty() {
            if let Some(callback) = callback {
                callback();
            }
            return;
        }

        let this = self.clone();
        self.inner.loop_handle.next_tick(move || {
            this.pump();
            if let Some(callback) = callback {
                callback();
            }
        });
    }

    fn pump(&self) {
        // a data listener may pause the message, so check before every item
        while !self.flags().paused {
            let next = self.inner.pendings.borrow_mut().pop_front();
            match next {
                Some(PayloadItem::Chunk(bytes)) => self.emit_data(bytes),
                Some(PayloadItem::Eof) => {
                    debug_assert!(self.inner.pendings.borrow().is_empty(), "data queued after the end of a message");
                    self.update_flags(|flags| flags.readable = false);
                    self.emit_end();
                }
                None => break,
            }
        }
    }

    fn has_pending_end(&self) -> bool {
        matches!(self.inner.pendings.borrow().back(), Some(PayloadItem::Eof))
    }

    /// Hands one body chunk to the message: emitted now, or queued behind earlier chunks
    /// while paused.
    pub fn push_data(&self, bytes: Bytes) {
        if self.has_pending_end() || self.flags().end_emitted {
            warn!(len = bytes.len(), "body data after the end of a message");
            return;
        }
        if self.flags().paused || !self.inner.pendings.borrow().is_empty() {
            trace!(len = bytes.len(), "queue body data");
            self.inner.pendings.borrow_mut().push_back(PayloadItem::Chunk(bytes));
            return;
        }
        self.emit_data(bytes);
    }

    /// Marks the body as finished: `end` is emitted now, or queued behind pending chunks.
    pub fn push_end(&self) {
        self.set_complete();
        if self.upgrade() || self.has_pending_end() || self.flags().end_emitted {
            return;
        }
        if self.flags().paused || !self.inner.pendings.borrow().is_empty() {
            self.inner.pendings.borrow_mut().push_back(PayloadItem::Eof);
            return;
        }
        self.update_flags(|flags| flags.readable = false);
        self.emit_end();
    }

    /// Stops `data` events and reading from the socket until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.update_flags(|flags| flags.paused = true);
        if let Some(socket) = self.socket() {
            socket.pause();
        }
    }

    pub fn resume(&self) {
        self.update_flags(|flags| flags.paused = false);
        if let Some(socket) = self.socket() {
            socket.resume();
        }
        self.emit_pending();
    }

    /// Destroys the underlying connection.
    pub fn destroy(&self) {
        if let Some(socket) = self.socket() {
            socket.destroy();
        }
    }

    /// The connection went away: `aborted` first if the body was incomplete, then `close`.
    pub(crate) fn abort(&self) {
        if !self.is_complete() && !self.inner.closed.get() {
            self.emit(IncomingEvent::Aborted);
        }
        self.close();
    }

    /// Emits `close` once and drops every listener.
    ///
    /// A message paused by its reader gives the socket back: the rest of its body is
    /// discarded and reading resumes, so later requests on the connection are parsed.
    pub(crate) fn close(&self) {
        if self.inner.closed.replace(true) {
            return;
        }
        let paused = self.flags().paused;
        self.update_flags(|flags| {
            flags.readable = false;
            flags.paused = false;
        });
        let discarded = std::mem::take(&mut *self.inner.pendings.borrow_mut());
        if !discarded.is_empty() {
            debug!(pending = discarded.len(), "discard unread body of a closed message");
        }
        if paused && let Some(socket) = self.socket() {
            socket.resume();
        }

        self.emit(IncomingEvent::Close);
        self.inner.events.remove_all_listeners(None);
    }

    fn flags(&self) -> MessageFlags {
        self.inner.flags.get()
    }

    fn update_flags(&self, update: impl FnOnce(&mut MessageFlags)) {
        let mut flags = self.inner.flags.get();
        update(&mut flags);
        self.inner.flags.set(flags);
    }

    fn emit(&self, event: IncomingEvent) -> bool {
        self.inner.events.emit(event)
    }
}

impl Readable for IncomingMessage {
    fn readable(&self) -> bool {
        IncomingMessage::readable(self)
    }

    fn set_encoding<E>(&self, encoding: E) -> bool
    where
        E: TryInto<Encoding>,
    {
        IncomingMessage::set_encoding(self, encoding)
    }

    fn pause(&self) {
        IncomingMessage::pause(self);
    }

    fn resume(&self) {
        IncomingMessage::resume(self);
    }

    fn destroy(&self) {
        IncomingMessage::destroy(self);
    }
}

impl EventSource for IncomingMessage {
    type Event = IncomingEvent;

    fn emitter(&self) -> &EventEmitter<IncomingEvent> {
        &self.inner.events
    }
}

impl fmt::Debug for IncomingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingMessage")
            .field("method", &*self.inner.method.borrow())
            .field("url", &*self.inner.url.borrow())
            .field("http_version", &*self.inner.http_version.borrow())
            .field("flags", &self.flags())
            .field("pending", &self.inner.pendings.borrow().len())
            .finish_non_exhaustive()
    }
}
