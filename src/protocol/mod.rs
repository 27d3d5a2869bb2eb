//! Core HTTP protocol abstractions.
//!
//! This module holds the building blocks shared by the parser, codec and
//! connection layers:
//!
//! - **Message framing** ([`message`]): [`Message`] splits a stream into a
//!   header part followed by payload items; [`PayloadSize`] carries the
//!   framing decision (known length, chunked, or empty).
//!
//! - **Body streaming** ([`body`]): [`ReqBody`] is the consumer side of an
//!   incoming request body, fed chunk by chunk as the connection parses
//!   socket bytes.
//!
//! - **Response bodies** ([`response`]): [`ResponseBody`] covers empty,
//!   fully buffered (text, forms, multipart) and streaming payloads.
//!
//! - **Error handling** ([`error`]): [`HttpError`] with [`ParseError`] on
//!   the receive path and [`SendError`] on the send path.

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;

pub mod body;
pub use body::ReqBody;

mod response;
pub use response::BoxError;
pub use response::Multipart;
pub use response::Part;
pub use response::ResponseBody;
