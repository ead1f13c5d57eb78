//! Request head decoding and response head encoding.
//!
//! - [`HeaderDecoder`]: request line and header block into a
//!   [`RequestHead`](crate::protocol::RequestHead), plus the body framing
//! - [`HeaderEncoder`]: [`ResponseHead`](crate::protocol::ResponseHead) into a status line and
//!   header block

mod header_decoder;
mod header_encoder;

pub use header_decoder::HeaderDecoder;
pub use header_encoder::HeaderEncoder;

pub(crate) use header_decoder::{MAX_HEADER_BYTES, is_chunked};
pub(crate) use header_encoder::FastWrite;
