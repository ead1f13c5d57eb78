//! Encoder for response bodies.
//!
//! Frames each [`PayloadItem`] the way the response head announced:
//! - `Length`: passes bytes through until the announced length is reached
//! - `Chunked`: wraps each chunk in a size line, `Eof` writes the last chunk
//! - `Unframed`: passes bytes through; the connection closing ends the body
//! - `NoBody`: drops everything (`HEAD`, `1xx`, `204`, `304`)

use crate::codec::header::FastWrite;
use crate::protocol::{PayloadItem, PayloadSize, SendError};
use bytes::{Buf, BytesMut};
use std::io::Write;

use tokio_util::codec::Encoder;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEncoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    /// bytes still allowed
    Length(u64),

    Chunked { eof: bool },

    Unframed { eof: bool },

    NoBody,
}

impl PayloadEncoder {
    pub fn empty() -> Self {
        Self { kind: Kind::NoBody }
    }

    pub fn chunked() -> Self {
        Self { kind: Kind::Chunked { eof: false } }
    }

    pub fn fix_length(size: u64) -> Self {
        Self { kind: Kind::Length(size) }
    }

    pub fn unframed() -> Self {
        Self { kind: Kind::Unframed { eof: false } }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self.kind, Kind::Chunked { .. })
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.kind, Kind::NoBody)
    }

    pub fn is_fix_length(&self) -> bool {
        matches!(self.kind, Kind::Length(_))
    }

    pub fn is_finish(&self) -> bool {
        match &self.kind {
            Kind::Length(remaining) => *remaining == 0,
            Kind::Chunked { eof } | Kind::Unframed { eof } => *eof,
            Kind::NoBody => true,
        }
    }
}

impl From<PayloadSize> for PayloadEncoder {
    fn from(payload_size: PayloadSize) -> Self {
        match payload_size {
            PayloadSize::Length(n) => PayloadEncoder::fix_length(n),
            PayloadSize::Chunked => PayloadEncoder::chunked(),
            PayloadSize::Empty => PayloadEncoder::empty(),
            PayloadSize::Unframed => PayloadEncoder::unframed(),
        }
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for PayloadEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match (&mut self.kind, item) {
            (Kind::NoBody, _) => Ok(()),

            (Kind::Length(remaining), PayloadItem::Chunk(mut bytes)) => {
                if !bytes.has_remaining() {
                    return Ok(());
                }
                let len = bytes.remaining() as u64;
                if len > *remaining {
                    warn!(len, remaining = *remaining, "body is longer than its content-length, extra bytes dropped");
                }
                let mut allowed = usize::try_from((*remaining).min(len)).unwrap_or(usize::MAX);
                *remaining -= allowed as u64;
                while allowed > 0 {
                    let chunk = bytes.chunk();
                    let n = chunk.len().min(allowed);
                    dst.extend_from_slice(&chunk[..n]);
                    bytes.advance(n);
                    allowed -= n;
                }
                Ok(())
            }
            (Kind::Length(remaining), PayloadItem::Eof) => {
                if *remaining > 0 {
                    warn!(remaining = *remaining, "body ended before its content-length");
                }
                Ok(())
            }

            (Kind::Chunked { eof: true } | Kind::Unframed { eof: true }, _) => Ok(()),

            (Kind::Chunked { .. }, PayloadItem::Chunk(mut bytes)) => {
                if !bytes.has_remaining() {
                    // an empty chunk would read as the last one
                    return Ok(());
                }
                write!(FastWrite(dst), "{:X}\r\n", bytes.remaining())?;
                dst.reserve(bytes.remaining() + 2);
                while bytes.has_remaining() {
                    let n = bytes.chunk().len();
                    dst.extend_from_slice(bytes.chunk());
                    bytes.advance(n);
                }
                dst.extend_from_slice(b"\r\n");
                Ok(())
            }
            (Kind::Chunked { eof }, PayloadItem::Eof) => {
                *eof = true;
                dst.extend_from_slice(b"0\r\n\r\n");
                Ok(())
            }

            (Kind::Unframed { .. }, PayloadItem::Chunk(mut bytes)) => {
                while bytes.has_remaining() {
                    let n = bytes.chunk().len();
                    dst.extend_from_slice(bytes.chunk());
                    bytes.advance(n);
                }
                Ok(())
            }
            (Kind::Unframed { eof }, PayloadItem::Eof) => {
                *eof = true;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn encode_all(encoder: &mut PayloadEncoder, items: Vec<PayloadItem>) -> BytesMut {
        let mut dst = BytesMut::new();
        for item in items {
            encoder.encode(item, &mut dst).unwrap();
        }
        dst
    }

    #[test]
    fn chunked() {
        let mut encoder = PayloadEncoder::chunked();
        let dst = encode_all(
            &mut encoder,
            vec![
                PayloadItem::Chunk(Bytes::from_static(b"hello")),
                PayloadItem::Chunk(Bytes::new()),
                PayloadItem::Chunk(Bytes::from(vec![b'a'; 26])),
                PayloadItem::Eof,
                PayloadItem::Chunk(Bytes::from_static(b"late")),
            ],
        );
        assert_eq!(&dst[..], &b"5\r\nhello\r\n1A\r\naaaaaaaaaaaaaaaaaaaaaaaaaa\r\n0\r\n\r\n"[..]);
        assert!(encoder.is_finish());
    }

    #[test]
    fn length_stops_at_the_announced_size() {
        let mut encoder = PayloadEncoder::fix_length(4);
        let dst = encode_all(
            &mut encoder,
            vec![PayloadItem::Chunk(Bytes::from_static(b"abc")), PayloadItem::Chunk(Bytes::from_static(b"def")), PayloadItem::Eof],
        );
        assert_eq!(&dst[..], b"abcd");
        assert!(encoder.is_finish());
    }

    #[test]
    fn unframed_and_no_body() {
        let mut encoder = PayloadEncoder::from(PayloadSize::Unframed);
        let dst = encode_all(&mut encoder, vec![PayloadItem::Chunk(Bytes::from_static(b"raw")), PayloadItem::Eof]);
        assert_eq!(&dst[..], b"raw");
        assert!(encoder.is_finish());

        let mut encoder = PayloadEncoder::empty();
        let dst = encode_all(&mut encoder, vec![PayloadItem::Chunk(Bytes::from_static(b"dropped")), PayloadItem::Eof]);
        assert!(dst.is_empty());
    }
}
