//! Body framing strategies for outgoing responses.
//!
//! [`PayloadEncoder`] picks between fixed-length pass-through
//! ([`LengthEncoder`]), chunked transfer encoding ([`ChunkedEncoder`]) and a
//! no-op for bodyless responses, based on the [`PayloadSize`] decided when
//! the headers were written.
//!
//! [`PayloadSize`]: crate::protocol::PayloadSize

mod chunked_encoder;
mod length_encoder;
mod payload_encoder;

pub use payload_encoder::PayloadEncoder;
