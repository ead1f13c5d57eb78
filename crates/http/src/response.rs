use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use http::header::{self, HeaderName, HeaderValue};
use http::{Method, StatusCode, Version};
use micro_io::events::{Event, EventEmitter, EventSource};
use micro_io::net::Socket;
use micro_io::runtime::Handle;
use micro_io::stream::Writable;
use tokio_util::codec::Encoder;
use tracing::{debug, warn};

use crate::codec::{HeaderEncoder, PayloadEncoder, is_chunked};
use crate::date::http_date;
use crate::protocol::{PayloadItem, PayloadSize, RequestHead, ResponseHead, SendError};

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Events emitted by a [`ServerResponse`].
#[derive(Debug)]
pub enum ResponseEvent {
    /// Buffered output was flushed; writing may continue.
    Drain,
    /// The last byte of the response was handed to the connection.
    Finish,
    /// The connection closed before the response finished.
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseEventKind {
    Drain,
    Finish,
    Close,
}

impl Event for ResponseEvent {
    type Kind = ResponseEventKind;

    fn kind(&self) -> ResponseEventKind {
        match self {
            ResponseEvent::Drain => ResponseEventKind::Drain,
            ResponseEvent::Finish => ResponseEventKind::Finish,
            ResponseEvent::Close => ResponseEventKind::Close,
        }
    }
}

type WriteDone = Box<dyn FnOnce()>;

struct ResponseInner {
    loop_handle: Handle,
    head: RefCell<ResponseHead>,
    head_request: bool,
    send_date: Cell<bool>,
    keep_alive: Cell<bool>,
    headers_sent: Cell<bool>,
    finished: Cell<bool>,
    closed: Cell<bool>,
    encoder: RefCell<Option<PayloadEncoder>>,
    // serialized head waiting for the first body write
    pending_head: RefCell<BytesMut>,
    socket: RefCell<Option<Socket>>,
    // output produced while an earlier response still owns the connection
    output: RefCell<VecDeque<(Bytes, Option<WriteDone>)>>,
    need_drain: Cell<bool>,
    finish_hook: RefCell<Option<WriteDone>>,
    events: EventEmitter<ResponseEvent>,
}

/// The response to one [`IncomingMessage`](crate::IncomingMessage).
///
/// Headers can be changed until the head is sent, either explicitly through
/// [`write_head`](Self::write_head) or implicitly by the first write. The body framing is
/// picked when the head goes out:
///
/// 1. no body at all for `HEAD` requests and `1xx`, `204` and `304` responses
/// 2. `Content-Length` when the header was set, or when [`end_with`](Self::end_with) is the
///    only write
/// 3. chunked when `Transfer-Encoding: chunked` was set, or for HTTP/1.1 clients
/// 4. otherwise the body runs until the connection closes
///
/// Responses to pipelined requests buffer their output until every earlier response has
/// finished.
#[derive(Clone)]
pub struct ServerResponse {
    inner: Rc<ResponseInner>,
}

impl ServerResponse {
    pub(crate) fn new(request: &RequestHead) -> Self {
        let mut head = ResponseHead::new(StatusCode::OK);
        head.set_version(if request.version() == Version::HTTP_10 { Version::HTTP_10 } else { Version::HTTP_11 });

        Self {
            inner: Rc::new(ResponseInner {
                loop_handle: Handle::current(),
                head: RefCell::new(head),
                head_request: request.method() == Method::HEAD,
                send_date: Cell::new(true),
                keep_alive: Cell::new(request.should_keep_alive()),
                headers_sent: Cell::new(false),
                finished: Cell::new(false),
                closed: Cell::new(false),
                encoder: RefCell::new(None),
                pending_head: RefCell::new(BytesMut::new()),
                socket: RefCell::new(None),
                output: RefCell::new(VecDeque::new()),
                need_drain: Cell::new(false),
                finish_hook: RefCell::new(None),
                events: EventEmitter::new(),
            }),
        }
    }

    pub fn status_code(&self) -> u16 {
        self.inner.head.borrow().status().as_u16()
    }

    pub fn set_status_code(&self, status_code: u16) -> Result<(), SendError> {
        if self.headers_sent() {
            return Err(SendError::HeadersSent);
        }
        let status = StatusCode::from_u16(status_code).map_err(|_| SendError::InvalidStatus(status_code))?;
        self.inner.head.borrow_mut().set_status(status);
        Ok(())
    }

    pub fn headers_sent(&self) -> bool {
        self.inner.headers_sent.get()
    }

    pub fn finished(&self) -> bool {
        self.inner.finished.get()
    }

    pub fn send_date(&self) -> bool {
        self.inner.send_date.get()
    }

    /// Whether a `Date` header is added when the response does not set one; on by default.
    pub fn set_send_date(&self, send_date: bool) {
        self.inner.send_date.set(send_date);
    }

    /// Whether the connection stays open after this response.
    pub fn keep_alive(&self) -> bool {
        self.inner.keep_alive.get()
    }

    /// Sets a header, replacing previous values.
    pub fn set_header(&self, name: &str, value: &str) -> Result<(), SendError> {
        let (name, value) = self.header_pair(name, value)?;
        self.inner.head.borrow_mut().headers_mut().insert(name, value);
        Ok(())
    }

    /// Adds a header value next to the existing ones, e.g. another `Set-Cookie`.
    pub fn append_header(&self, name: &str, value: &str) -> Result<(), SendError> {
        let (name, value) = self.header_pair(name, value)?;
        self.inner.head.borrow_mut().headers_mut().append(name, value);
        Ok(())
    }

    /// First value of the header `name`, when it is visible ASCII.
    pub fn get_header(&self, name: &str) -> Option<String> {
        let head = self.inner.head.borrow();
        let value = head.headers().get(name)?;
        value.to_str().ok().map(str::to_owned)
    }

    pub fn remove_header(&self, name: &str) -> Result<(), SendError> {
        if self.headers_sent() {
            return Err(SendError::HeadersSent);
        }
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            self.inner.head.borrow_mut().headers_mut().remove(name);
        }
        Ok(())
    }

    fn header_pair(&self, name: &str, value: &str) -> Result<(HeaderName, HeaderValue), SendError> {
        if self.headers_sent() {
            return Err(SendError::HeadersSent);
        }
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| SendError::invalid_header(format!("{name:?}: {e}")))?;
        let value = HeaderValue::from_str(value).map_err(|e| SendError::invalid_header(format!("{name}: {e}")))?;
        Ok((name, value))
    }

    /// Sets the status, an optional custom reason phrase and extra headers, then sends the
    /// head with the next write.
    pub fn write_head(&self, status_code: u16, reason: Option<&str>, headers: &[(&str, &str)]) -> Result<(), SendError> {
        self.set_status_code(status_code)?;
        for (name, value) in headers {
            self.set_header(name, value)?;
        }
        self.inner.head.borrow_mut().set_reason(reason.map(str::to_owned));
        self.send_head(None)
    }

    /// Sends `100 Continue` ahead of the real response.
    pub fn write_continue(&self) -> bool {
        self.send(Bytes::from_static(CONTINUE), None)
    }

    /// Returns `false` when the output was buffered; wait for `drain` before writing more.
    pub fn write<B>(&self, data: B) -> bool
    where
        B: Into<Bytes>,
    {
        self.write_inner(data.into(), None)
    }

    /// Writes `data` and runs `callback` once it reached the connection.
    pub fn write_with<B, F>(&self, data: B, callback: F) -> bool
    where
        B: Into<Bytes>,
        F: FnOnce() + 'static,
    {
        self.write_inner(data.into(), Some(Box::new(callback)))
    }

    /// Finishes the response. Returns `false` when it was already finished.
    pub fn end(&self) -> bool {
        self.end_inner(None)
    }

    /// Writes `data` as the last piece of the body and finishes the response.
    pub fn end_with<B>(&self, data: B) -> bool
    where
        B: Into<Bytes>,
    {
        self.end_inner(Some(data.into()))
    }

    fn write_inner(&self, data: Bytes, callback: Option<WriteDone>) -> bool {
        if self.finished() {
            warn!(len = data.len(), "write after end of response");
            return false;
        }
        if !self.headers_sent()
            && let Err(e) = self.send_head(None)
        {
            warn!(cause = %e, "failed to write response head");
            return false;
        }

        let mut buf = self.inner.pending_head.take();
        if let Err(e) = self.encode(PayloadItem::Chunk(data), &mut buf) {
            warn!(cause = %e, "failed to encode response body");
            return false;
        }
        if buf.is_empty() && callback.is_none() {
            return true;
        }
        self.send(buf.freeze(), callback)
    }

    fn end_inner(&self, data: Option<Bytes>) -> bool {
        if self.finished() {
            return false;
        }
        if !self.headers_sent() {
            let hint = data.as_ref().map_or(0, Bytes::len) as u64;
            if let Err(e) = self.send_head(Some(hint)) {
                warn!(cause = %e, "failed to write response head");
                return false;
            }
        }

        let mut buf = self.inner.pending_head.take();
        let encoded = match data {
            Some(data) => self.encode(PayloadItem::Chunk(data), &mut buf).and_then(|()| self.encode(PayloadItem::Eof, &mut buf)),
            None => self.encode(PayloadItem::Eof, &mut buf),
        };
        if let Err(e) = encoded {
            warn!(cause = %e, "failed to encode response body");
            return false;
        }

        self.inner.finished.set(true);
        let this = self.clone();
        self.send(buf.freeze(), Some(Box::new(move || this.on_finish())));
        true
    }

    fn encode(&self, item: PayloadItem, dst: &mut BytesMut) -> Result<(), SendError> {
        match self.inner.encoder.borrow_mut().as_mut() {
            Some(encoder) => encoder.encode(item, dst),
            None => Err(SendError::invalid_body("response head was not sent")),
        }
    }

    /// Picks the framing and serializes the head into the pending buffer.
    fn send_head(&self, length_hint: Option<u64>) -> Result<(), SendError> {
        if self.headers_sent() {
            return Err(SendError::HeadersSent);
        }

        let mut head = self.inner.head.borrow_mut();
        if has_token(head.headers().get(header::CONNECTION), "close") {
            self.inner.keep_alive.set(false);
        }

        let (payload_size, encoder) = self.framing(&head, length_hint)?;

        let keep_alive = self.inner.keep_alive.get();
        let version = head.version();
        let headers = head.headers_mut();
        if !headers.contains_key(header::CONNECTION) {
            if !keep_alive {
                headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
            } else if version == Version::HTTP_10 {
                headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
            }
        }
        if self.send_date()
            && !headers.contains_key(header::DATE)
            && let Some(date) = http_date()
        {
            headers.insert(header::DATE, date);
        }

        debug!(status = head.status().as_u16(), ?payload_size, keep_alive, "response head ready");
        HeaderEncoder.encode((head.clone(), payload_size), &mut *self.inner.pending_head.borrow_mut())?;

        *self.inner.encoder.borrow_mut() = Some(encoder);
        self.inner.headers_sent.set(true);
        Ok(())
    }

    fn framing(&self, head: &ResponseHead, length_hint: Option<u64>) -> Result<(PayloadSize, PayloadEncoder), SendError> {
        let status = head.status();
        if status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
            return Ok((PayloadSize::Unframed, PayloadEncoder::empty()));
        }
        let (payload_size, encoder) = self.body_framing(head, length_hint)?;
        // a HEAD response announces the body it would have had
        if self.inner.head_request {
            return Ok((payload_size, PayloadEncoder::empty()));
        }
        Ok((payload_size, encoder))
    }

    fn body_framing(&self, head: &ResponseHead, length_hint: Option<u64>) -> Result<(PayloadSize, PayloadEncoder), SendError> {
        if let Some(value) = head.headers().get(header::CONTENT_LENGTH) {
            let length = value
                .to_str()
                .ok()
                .and_then(|value| value.trim().parse::<u64>().ok())
                .ok_or_else(|| SendError::invalid_header("content-length is not a number"))?;
            return Ok((PayloadSize::Length(length), PayloadEncoder::fix_length(length)));
        }

        if let Some(value) = head.headers().get(header::TRANSFER_ENCODING) {
            if is_chunked(value.to_str().ok()) {
                return Ok((PayloadSize::Chunked, PayloadEncoder::chunked()));
            }
            // the body can only end with the connection
            self.inner.keep_alive.set(false);
            return Ok((PayloadSize::Unframed, PayloadEncoder::unframed()));
        }

        if let Some(length) = length_hint {
            return Ok((PayloadSize::Length(length), PayloadEncoder::fix_length(length)));
        }

        if head.version() == Version::HTTP_11 {
            return Ok((PayloadSize::Chunked, PayloadEncoder::chunked()));
        }

        self.inner.keep_alive.set(false);
        Ok((PayloadSize::Unframed, PayloadEncoder::unframed()))
    }

    fn send(&self, data: Bytes, callback: Option<WriteDone>) -> bool {
        let socket = self.inner.socket.borrow().clone();
        let flushed = match socket {
            Some(socket) => match callback {
                Some(callback) => socket.write_with(data, callback),
                None => socket.write(data),
            },
            None => {
                self.inner.output.borrow_mut().push_back((data, callback));
                false
            }
        };
        if !flushed {
            self.inner.need_drain.set(true);
        }
        flushed
    }

    fn on_finish(&self) {
        self.emit(ResponseEvent::Finish);
        let hook = self.inner.finish_hook.borrow_mut().take();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Runs `hook` after the `finish` event; the connection uses it to move on.
    pub(crate) fn set_finish_hook<F>(&self, hook: F)
    where
        F: FnOnce() + 'static,
    {
        *self.inner.finish_hook.borrow_mut() = Some(Box::new(hook));
    }

    /// Hands the connection to this response and flushes what was buffered so far.
    pub(crate) fn assign_socket(&self, socket: &Socket) {
        *self.inner.socket.borrow_mut() = Some(socket.clone());

        let queued = self.inner.output.take();
        let mut flushed = true;
        for (data, callback) in queued {
            flushed = match callback {
                Some(callback) => socket.write_with(data, callback),
                None => socket.write(data),
            };
        }

        if flushed && self.inner.need_drain.get() {
            let this = self.clone();
            self.inner.loop_handle.next_tick(move || this.on_socket_drain());
        }
    }

    pub(crate) fn detach_socket(&self) {
        self.inner.socket.borrow_mut().take();
    }

    pub(crate) fn on_socket_drain(&self) {
        if self.inner.need_drain.replace(false) {
            self.emit(ResponseEvent::Drain);
        }
    }

    /// The connection closed: emits `close` unless the response finished, then drops every
    /// listener.
    pub(crate) fn on_socket_close(&self) {
        if self.inner.closed.replace(true) {
            return;
        }
        self.inner.finish_hook.borrow_mut().take();
        if !self.finished() || self.inner.socket.borrow().is_some() {
            self.emit(ResponseEvent::Close);
        }
        self.detach_socket();
        self.inner.events.remove_all_listeners(None);
    }

    /// Bytes waiting for the connection, for inspecting the wire format in tests.
    #[cfg(test)]
    fn buffered_output(&self) -> Vec<u8> {
        self.inner.output.borrow().iter().flat_map(|(data, _)| data.iter().copied()).collect()
    }

    fn emit(&self, event: ResponseEvent) -> bool {
        self.inner.events.emit(event)
    }
}

fn has_token(value: Option<&HeaderValue>, token: &str) -> bool {
    value
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.split(',').any(|item| item.trim().eq_ignore_ascii_case(token)))
}

impl Writable for ServerResponse {
    fn writable(&self) -> bool {
        !self.finished() && !self.inner.closed.get()
    }

    fn write<B>(&self, data: B) -> bool
    where
        B: Into<Bytes>,
    {
        ServerResponse::write(self, data)
    }

    fn end(&self) -> bool {
        ServerResponse::end(self)
    }

    /// Destroys the connection the response is written to.
    fn destroy(&self) {
        let socket = self.inner.socket.borrow().clone();
        if let Some(socket) = socket {
            socket.destroy();
        }
    }
}

impl EventSource for ServerResponse {
    type Event = ResponseEvent;

    fn emitter(&self) -> &EventEmitter<ResponseEvent> {
        &self.inner.events
    }
}

impl fmt::Debug for ServerResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerResponse")
            .field("status", &self.status_code())
            .field("headers_sent", &self.headers_sent())
            .field("finished", &self.finished())
            .field("keep_alive", &self.keep_alive())
            .finish_non_exhaustive()
    }
}
