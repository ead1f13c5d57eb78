//! Serializes a [`ResponseHead`] into a status line and header block.
//!
//! The framing fields follow the [`PayloadSize`] passed along with the head, overriding
//! whatever `Content-Length` or `Transfer-Encoding` the head carried. `Unframed` leaves the
//! head as it is.

use crate::protocol::{PayloadSize, ResponseHead, SendError};

use bytes::{BufMut, BytesMut};

use http::{HeaderValue, Version, header};
use std::io;
use std::io::{ErrorKind, Write};
use tokio_util::codec::Encoder;
use tracing::error;

const INIT_HEADER_SIZE: usize = 4 * 1024;

#[derive(Debug)]
pub struct HeaderEncoder;

impl Encoder<(ResponseHead, PayloadSize)> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (ResponseHead, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut head, payload_size) = item;

        dst.reserve(INIT_HEADER_SIZE);
        let version = match head.version() {
            Version::HTTP_11 => "HTTP/1.1",
            Version::HTTP_10 => "HTTP/1.0",
            v => {
                error!(http_version = ?v, "unsupported http version");
                return Err(io::Error::from(ErrorKind::Unsupported).into());
            }
        };
        let reason = head.reason().or_else(|| head.status().canonical_reason()).unwrap_or("unknown");
        write!(FastWrite(dst), "{version} {} {reason}\r\n", head.status().as_str())?;

        match payload_size {
            PayloadSize::Length(n) => {
                head.headers_mut().remove(header::TRANSFER_ENCODING);
                head.headers_mut().insert(header::CONTENT_LENGTH, n.into());
            }
            PayloadSize::Chunked => {
                const CHUNKED_VALUE: HeaderValue = HeaderValue::from_static("chunked");
                head.headers_mut().remove(header::CONTENT_LENGTH);
                head.headers_mut().insert(header::TRANSFER_ENCODING, CHUNKED_VALUE);
            }
            PayloadSize::Empty => {
                const ZERO_VALUE: HeaderValue = HeaderValue::from_static("0");
                head.headers_mut().remove(header::TRANSFER_ENCODING);
                head.headers_mut().insert(header::CONTENT_LENGTH, ZERO_VALUE);
            }
            PayloadSize::Unframed => {}
        }

        for (header_name, header_value) in head.headers() {
            dst.put_slice(header_name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(header_value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

pub(crate) struct FastWrite<'a>(pub(crate) &'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use indoc::indoc;

    fn encode(head: ResponseHead, payload_size: PayloadSize) -> String {
        let mut dst = BytesMut::new();
        HeaderEncoder.encode((head, payload_size), &mut dst).unwrap();
        String::from_utf8(dst.to_vec()).unwrap().replace("\r\n", "\n")
    }

    #[test]
    fn length_framing() {
        let mut head = ResponseHead::new(StatusCode::OK);
        head.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        let expected = indoc! {"
            HTTP/1.1 200 OK
            content-type: text/plain
            content-length: 12

        "};
        assert_eq!(encode(head, PayloadSize::Length(12)), expected);
    }

    #[test]
    fn chunked_framing_replaces_content_length() {
        let mut head = ResponseHead::new(StatusCode::NOT_FOUND);
        head.headers_mut().insert(header::CONTENT_LENGTH, HeaderValue::from_static("3"));

        let expected = indoc! {"
            HTTP/1.1 404 Not Found
            transfer-encoding: chunked

        "};
        assert_eq!(encode(head, PayloadSize::Chunked), expected);
    }

    #[test]
    fn custom_reason_and_version() {
        let mut head = ResponseHead::new(StatusCode::from_u16(299).unwrap());
        head.set_version(Version::HTTP_10);
        assert_eq!(encode(head.clone(), PayloadSize::Unframed), "HTTP/1.0 299 unknown\n\n");

        head.set_reason(Some("Fine".to_owned()));
        assert_eq!(encode(head, PayloadSize::Unframed), "HTTP/1.0 299 Fine\n\n");
    }

    #[test]
    fn unsupported_version() {
        let mut head = ResponseHead::new(StatusCode::OK);
        head.set_version(Version::HTTP_2);
        let mut dst = BytesMut::new();
        assert!(HeaderEncoder.encode((head, PayloadSize::Empty), &mut dst).is_err());
    }
}
