//! Protocol types shared by the codec and the message layer.
//!
//! - [`message`]: what the request decoder yields ([`Message`], [`PayloadItem`]) and how a
//!   body is framed on the wire ([`PayloadSize`])
//! - [`request`]: the parsed request line and raw header lines ([`RequestHead`])
//! - [`response`]: the status line and header fields of a response ([`ResponseHead`])
//! - [`headers`]: the folded, lowercase header map exposed by
//!   [`IncomingMessage`](crate::IncomingMessage)
//! - [`error`]: [`ParseError`] and [`SendError`]

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RequestHead;

mod response;
pub use response::ResponseHead;

mod headers;
pub use headers::COMMA_SEPARATED;
pub use headers::FieldValue;
pub use headers::Headers;

mod error;
pub use error::ParseError;
pub use error::SendError;
