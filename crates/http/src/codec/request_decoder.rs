//! Streaming request decoder.
//!
//! Alternates between two states: waiting for a head ([`HeaderDecoder`]) and reading the body
//! of the request just parsed ([`PayloadDecoder`]). Several pipelined requests in one buffer
//! come out one after the other.

use crate::codec::body::PayloadDecoder;
use crate::codec::header::HeaderDecoder;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHead};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

#[derive(Debug)]
pub struct RequestDecoder {
    header_decoder: HeaderDecoder,
    payload_decoder: Option<PayloadDecoder>,
    trailers: Vec<(String, String)>,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Whether the decoder is in the middle of a request body.
    pub fn in_body(&self) -> bool {
        self.payload_decoder.is_some()
    }

    /// Trailer fields of the last chunked body, available after its `Eof`.
    pub fn take_trailers(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.trailers)
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self { header_decoder: HeaderDecoder, payload_decoder: None, trailers: Vec::new() }
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHead, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // parse payload if have payload_decoder
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = match payload_decoder.decode(src)? {
                Some(item @ PayloadItem::Chunk(_)) => Some(Message::Payload(item)),
                Some(item @ PayloadItem::Eof) => {
                    self.trailers = payload_decoder.take_trailers();
                    // the next bytes belong to another request
                    self.payload_decoder.take();
                    Some(Message::Payload(item))
                }
                None => None,
            };

            return Ok(message);
        }

        let message = match self.header_decoder.decode(src)? {
            Some((head, payload_size)) => {
                self.payload_decoder = Some(payload_size.into());
                Some(Message::Header((head, payload_size)))
            }
            None => None,
        };

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::Method;
    use indoc::indoc;

    fn drain(decoder: &mut RequestDecoder, buffer: &mut BytesMut) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(message) = decoder.decode(buffer).unwrap() {
            out.push(match message {
                Message::Header((head, _)) => format!("head {} {}", head.method(), head.url()),
                Message::Payload(PayloadItem::Chunk(bytes)) => format!("chunk {}", String::from_utf8_lossy(&bytes)),
                Message::Payload(PayloadItem::Eof) => "eof".to_owned(),
            });
        }
        out
    }

    #[test]
    fn pipelined_requests() {
        let mut buffer = BytesMut::from(indoc! {"
            GET /first HTTP/1.1
            Host: localhost

            POST /second HTTP/1.1
            Content-Length: 4

            bodyGET /third HTTP/1.1
            Host: localhost

        "});
        let mut decoder = RequestDecoder::new();

        assert_eq!(
            drain(&mut decoder, &mut buffer),
            ["head GET /first", "eof", "head POST /second", "chunk body", "eof", "head GET /third", "eof"]
        );
        assert!(buffer.is_empty());
        assert!(!decoder.in_body());
    }

    #[test]
    fn chunked_request_with_trailers() {
        let mut buffer = BytesMut::from("PUT /upload HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\nX-Checksum: 1f\r\n\r\n");
        let mut decoder = RequestDecoder::new();

        let Some(Message::Header((head, payload_size))) = decoder.decode(&mut buffer).unwrap() else {
            panic!("expected a head");
        };
        assert_eq!(head.method(), &Method::PUT);
        assert!(payload_size.is_chunked());

        let chunk = decoder.decode(&mut buffer).unwrap().and_then(Message::into_payload_item);
        assert_eq!(chunk, Some(PayloadItem::Chunk(Bytes::from_static(b"abc"))));
        assert!(decoder.take_trailers().is_empty());

        let eof = decoder.decode(&mut buffer).unwrap().and_then(Message::into_payload_item);
        assert_eq!(eof, Some(PayloadItem::Eof));
        assert_eq!(decoder.take_trailers(), vec![("X-Checksum".to_owned(), "1f".to_owned())]);
    }

    #[test]
    fn body_arrives_in_pieces() {
        let mut buffer = BytesMut::from("POST / HTTP/1.1\r\nContent-Length: 6\r\n\r\nab");
        let mut decoder = RequestDecoder::new();

        assert_eq!(drain(&mut decoder, &mut buffer), ["head POST /", "chunk ab"]);
        assert!(decoder.in_body());

        buffer.extend_from_slice(b"cdef");
        assert_eq!(drain(&mut decoder, &mut buffer), ["chunk cdef", "eof"]);
    }

    #[test]
    fn malformed_request_line() {
        let mut buffer = BytesMut::from("GET / HTTP/9.9\r\nHost: localhost\r\n\r\n");
        assert!(RequestDecoder::new().decode(&mut buffer).is_err());
    }

    #[test]
    fn debug_shows_the_body_state() {
        let mut decoder = RequestDecoder::new();
        assert!(format!("{decoder:?}").starts_with("RequestDecoder { header_decoder: HeaderDecoder, payload_decoder: None"));

        let mut buffer = BytesMut::from("POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nbo");
        while decoder.decode(&mut buffer).unwrap().is_some() {}
        assert!(decoder.in_body());
        assert!(format!("{decoder:?}").contains("payload_decoder: Some("));
    }
}
