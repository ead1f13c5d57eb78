use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use micro_io::events::EventSource;
use micro_io::net::{Socket, SocketEvent, SocketEventKind, SocketInput};
use tokio_util::codec::Decoder;
use tracing::{debug, info, trace, warn};

use crate::codec::RequestDecoder;
use crate::incoming::IncomingMessage;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHead};
use crate::response::ServerResponse;
use crate::server::{Server, ServerEvent, ServerEventKind};

const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";

type Decoded = Message<(RequestHead, PayloadSize)>;

/// Glue between one accepted socket and the HTTP server.
///
/// The connection takes the socket's input, runs it through a [`RequestDecoder`] and turns
/// the result into [`IncomingMessage`] / [`ServerResponse`] pairs. Responses are queued in
/// request order and only the oldest one writes to the socket; the next one takes over
/// when it finishes.
pub(crate) struct HttpConnection {
    server: Server,
    socket: Socket,
    state: RefCell<ConnectionState>,
}

#[derive(Default)]
struct ConnectionState {
    decoder: RequestDecoder,
    buffer: BytesMut,
    // the request whose body is being parsed
    incoming: Option<IncomingMessage>,
    outstanding: VecDeque<(IncomingMessage, ServerResponse)>,
    peer_ended: bool,
    // upgraded, failed or closed: nothing more is parsed
    detached: bool,
}

impl HttpConnection {
    /// Takes over the input of `socket`.
    ///
    /// The socket owns the connection through its ingest callback and listeners, both of
    /// which are dropped when it closes.
    pub(crate) fn attach(server: &Server, socket: &Socket) {
        let connection = Rc::new(Self { server: server.clone(), socket: socket.clone(), state: RefCell::default() });

        let ingest = Rc::clone(&connection);
        socket.set_ingest(Some(Rc::new(move |input| ingest.on_input(input))));

        let drain = Rc::downgrade(&connection);
        socket.on(SocketEventKind::Drain, move |_| {
            if let Some(connection) = drain.upgrade() {
                connection.on_socket_drain();
            }
        });
        socket.on(SocketEventKind::Error, |event| {
            if let SocketEvent::Error(e) = event {
                debug!(cause = %e, code = e.code(), "http connection error");
            }
        });
        socket.on(SocketEventKind::Close, move |_| connection.on_socket_close());
    }

    fn on_input(self: &Rc<Self>, input: SocketInput) {
        match input {
            SocketInput::Data(bytes) => {
                self.state.borrow_mut().buffer.extend_from_slice(&bytes);
                self.parse();
            }
            SocketInput::End => self.on_peer_end(),
        }
    }

    fn parse(self: &Rc<Self>) {
        loop {
            match self.decode_next() {
                Ok(Some(Message::Header((head, payload_size)))) => self.on_head(head, payload_size),
                Ok(Some(Message::Payload(PayloadItem::Chunk(bytes)))) => self.on_body(bytes),
                Ok(Some(Message::Payload(PayloadItem::Eof))) => self.on_message_complete(),
                Ok(None) => return,
                Err(e) => {
                    self.on_parse_error(e);
                    return;
                }
            }
        }
    }

    fn decode_next(&self) -> Result<Option<Decoded>, ParseError> {
        let mut state = self.state.borrow_mut();
        if state.detached {
            return Ok(None);
        }
        let ConnectionState { decoder, buffer, .. } = &mut *state;
        decoder.decode(buffer)
    }

    fn on_head(self: &Rc<Self>, head: RequestHead, payload_size: PayloadSize) {
        trace!(method = %head.method(), url = head.url(), ?payload_size, "request head");

        let request = IncomingMessage::new(&self.socket);
        request.set_method(head.method().clone());
        request.set_url(head.url());
        request.set_http_version(head.http_version());
        for (name, value) in head.headers() {
            request.add_header_line(name, value);
        }

        if head.is_upgrade() {
            self.on_upgrade(request);
            return;
        }

        let response = ServerResponse::new(&head);
        let connection = Rc::downgrade(self);
        response.set_finish_hook(move || {
            if let Some(connection) = connection.upgrade() {
                connection.on_response_finish();
            }
        });

        let first = {
            let mut state = self.state.borrow_mut();
            state.incoming = Some(request.clone());
            state.outstanding.push_back((request.clone(), response.clone()));
            state.outstanding.len() == 1
        };
        if first {
            response.assign_socket(&self.socket);
        }
        if head.expects_continue() {
            debug!("receive expect request header, sent continue response");
            response.write_continue();
        }

        self.server.emit(ServerEvent::Request(request, response));
    }

    fn on_upgrade(&self, request: IncomingMessage) {
        request.set_upgrade(true);
        request.set_complete();
        let head = {
            let mut state = self.state.borrow_mut();
            state.detached = true;
            state.buffer.split().freeze()
        };

        if self.server.listener_count(ServerEventKind::Upgrade) == 0 {
            warn!(url = %request.url(), "upgrade request without an upgrade listener, destroy connection");
            self.socket.destroy();
            return;
        }

        self.socket.set_ingest(None);
        self.server.emit(ServerEvent::Upgrade { request, socket: self.socket.clone(), head });
    }

    fn on_body(&self, bytes: Bytes) {
        let incoming = self.state.borrow().incoming.clone();
        if let Some(incoming) = incoming {
            incoming.push_data(bytes);
        }
    }

    fn on_message_complete(&self) {
        let (incoming, trailers) = {
            let mut state = self.state.borrow_mut();
            (state.incoming.take(), state.decoder.take_trailers())
        };
        let Some(incoming) = incoming else {
            return;
        };

        incoming.set_complete();
        for (name, value) in &trailers {
            incoming.add_header_line(name, value);
        }
        incoming.push_end();
    }

    fn on_parse_error(&self, error: ParseError) {
        warn!(cause = %error, peer = ?self.socket.remote_address(), "failed to parse request");
        let idle = {
            let mut state = self.state.borrow_mut();
            state.detached = true;
            state.outstanding.is_empty()
        };

        if self.server.listener_count(ServerEventKind::ClientError) > 0 {
            self.server.emit(ServerEvent::ClientError { error, socket: self.socket.clone() });
        } else if idle {
            self.socket.end_with(Bytes::from_static(BAD_REQUEST));
        } else {
            self.socket.destroy();
        }
    }

    fn on_peer_end(&self) {
        let idle = {
            let mut state = self.state.borrow_mut();
            state.peer_ended = true;
            state.outstanding.is_empty()
        };
        debug!(idle, "client ended the connection");
        if idle {
            self.socket.end();
        }
    }

    fn on_response_finish(&self) {
        let (finished, next, peer_ended) = {
            let mut state = self.state.borrow_mut();
            let finished = state.outstanding.pop_front();
            let next = state.outstanding.front().map(|(_, response)| response.clone());
            (finished, next, state.peer_ended)
        };
        let Some((request, response)) = finished else {
            return;
        };
        response.detach_socket();
        request.close();

        if !response.keep_alive() {
            info!("response asked to close the connection");
            self.state.borrow_mut().detached = true;
            self.socket.end();
            return;
        }
        match next {
            Some(next) => next.assign_socket(&self.socket),
            None if peer_ended => {
                self.socket.end();
            }
            None => {}
        }
    }

    fn on_socket_drain(&self) {
        let front = self.state.borrow().outstanding.front().map(|(_, response)| response.clone());
        if let Some(response) = front {
            response.on_socket_drain();
        }
    }

    fn on_socket_close(&self) {
        let outstanding = {
            let mut state = self.state.borrow_mut();
            state.detached = true;
            state.incoming = None;
            std::mem::take(&mut state.outstanding)
        };
        if !outstanding.is_empty() {
            debug!(outstanding = outstanding.len(), "connection closed with requests in flight");
        }
        for (request, response) in outstanding {
            request.abort();
            response.on_socket_close();
        }
    }
}
