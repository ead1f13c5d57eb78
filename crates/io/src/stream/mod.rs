//! Readable and writable stream capabilities.
//!
//! These traits only describe the contract; [`Socket`](crate::net::Socket) and the HTTP
//! message types implement them against their own state.

mod decoder;

pub use decoder::{Encoding, StringDecoder, UnknownEncoding};

use bytes::Bytes;

/// One unit of stream data: raw bytes, or text once an encoding was configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Bytes(Bytes),
    Text(String),
}

impl Chunk {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Chunk::Bytes(bytes) => bytes,
            Chunk::Text(text) => text.as_bytes(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            Chunk::Bytes(bytes) => bytes,
            Chunk::Text(text) => Bytes::from(text),
        }
    }
}

impl From<Bytes> for Chunk {
    fn from(bytes: Bytes) -> Self {
        Chunk::Bytes(bytes)
    }
}

impl From<String> for Chunk {
    fn from(text: String) -> Self {
        Chunk::Text(text)
    }
}

/// The readable side of a stream: `data` zero or more times, then `end` at most once.
pub trait Readable {
    fn readable(&self) -> bool;

    /// Decodes subsequent `data` as text; returns `false` for an unknown encoding.
    fn set_encoding<E>(&self, encoding: E) -> bool
    where
        E: TryInto<Encoding>;

    fn pause(&self);

    fn resume(&self);

    fn destroy(&self);
}

/// The writable side of a stream.
///
/// `write` returns `false` when the data had to be buffered; callers should wait for `drain`.
pub trait Writable {
    fn writable(&self) -> bool;

    fn write<B>(&self, data: B) -> bool
    where
        B: Into<Bytes>;

    fn end(&self) -> bool;

    fn destroy(&self);
}
