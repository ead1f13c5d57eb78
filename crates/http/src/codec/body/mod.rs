//! Request body decoding and response body encoding.
//!
//! - [`PayloadDecoder`]: reads a `Content-Length` or chunked request body
//! - [`PayloadEncoder`]: frames response body bytes as its head announced

mod chunked_decoder;
mod payload_decoder;
mod payload_encoder;

pub use chunked_decoder::ChunkedDecoder;
pub use payload_decoder::PayloadDecoder;
pub use payload_encoder::PayloadEncoder;
