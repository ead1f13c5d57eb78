//! Decoder for request bodies.
//!
//! Handles the three framings a request can carry:
//! - `Content-Length` payloads
//! - chunked transfer encoding, including trailers
//! - no body at all

use std::cmp;

use crate::codec::body::chunked_decoder::ChunkedDecoder;
use crate::protocol::{ParseError, PayloadItem, PayloadSize};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadDecoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    /// bytes still expected
    Length(u64),

    Chunked(ChunkedDecoder),

    NoBody,
}

impl PayloadDecoder {
    pub fn empty() -> Self {
        Self { kind: Kind::NoBody }
    }

    pub fn chunked() -> Self {
        Self { kind: Kind::Chunked(ChunkedDecoder::new()) }
    }

    pub fn fix_length(size: u64) -> Self {
        Self { kind: Kind::Length(size) }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self.kind, Kind::Chunked(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.kind, Kind::NoBody)
    }

    pub fn is_fix_length(&self) -> bool {
        matches!(self.kind, Kind::Length(_))
    }

    /// Trailer fields of a chunked body; empty for any other framing.
    pub fn take_trailers(&mut self) -> Vec<(String, String)> {
        match &mut self.kind {
            Kind::Chunked(chunked_decoder) => chunked_decoder.take_trailers(),
            Kind::Length(_) | Kind::NoBody => Vec::new(),
        }
    }
}

impl From<PayloadSize> for PayloadDecoder {
    fn from(payload_size: PayloadSize) -> Self {
        match payload_size {
            PayloadSize::Length(n) => PayloadDecoder::fix_length(n),
            PayloadSize::Chunked => PayloadDecoder::chunked(),
            // a request body is never delimited by the connection closing
            PayloadSize::Empty | PayloadSize::Unframed => PayloadDecoder::empty(),
        }
    }
}

impl Decoder for PayloadDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match &mut self.kind {
            Kind::Length(length) => Ok(decode_length(length, src)),
            Kind::Chunked(chunked_decoder) => chunked_decoder.decode(src),
            Kind::NoBody => Ok(Some(PayloadItem::Eof)),
        }
    }
}

fn decode_length(length: &mut u64, src: &mut BytesMut) -> Option<PayloadItem> {
    if *length == 0 {
        return Some(PayloadItem::Eof);
    }

    if src.is_empty() {
        return None;
    }

    // read the minimum of remaining length and available bytes
    let len = cmp::min(*length, src.len() as u64);
    let bytes = src.split_to(usize::try_from(len).unwrap_or(usize::MAX)).freeze();

    *length -= bytes.len() as u64;
    Some(PayloadItem::Chunk(bytes))
}
