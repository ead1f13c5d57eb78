//! HTTP/1.1 wire codec.
//!
//! Request side: [`RequestDecoder`] turns connection bytes into a stream of
//! [`Message`](crate::protocol::Message)s, a head then the body. Response side:
//! [`HeaderEncoder`] writes the status line and header block, [`PayloadEncoder`] frames the
//! body that follows.
//!
//! ```
//! use bytes::BytesMut;
//! use micro_io_http::codec::RequestDecoder;
//! use micro_io_http::protocol::{Message, PayloadItem};
//! use tokio_util::codec::Decoder;
//!
//! let mut decoder = RequestDecoder::new();
//! let mut buffer = BytesMut::from("POST /echo HTTP/1.1\r\nContent-Length: 2\r\n\r\nhi");
//!
//! let Some(Message::Header((head, _))) = decoder.decode(&mut buffer).unwrap() else { panic!() };
//! assert_eq!(head.url(), "/echo");
//! let Some(Message::Payload(PayloadItem::Chunk(body))) = decoder.decode(&mut buffer).unwrap() else { panic!() };
//! assert_eq!(body, "hi");
//! assert!(matches!(decoder.decode(&mut buffer).unwrap(), Some(Message::Payload(PayloadItem::Eof))));
//! ```

mod body;
mod header;
mod request_decoder;

pub use body::{ChunkedDecoder, PayloadDecoder, PayloadEncoder};
pub use header::{HeaderDecoder, HeaderEncoder};
pub use request_decoder::RequestDecoder;

pub(crate) use header::is_chunked;
