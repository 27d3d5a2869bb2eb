//! Wire serialization for outgoing responses.
//!
//! The connection layer drives a [`ResponseEncoder`] through a
//! `FramedWrite`, feeding it a header message followed by payload items.
//! Header serialization lives in [`header_encoder`], body framing in
//! [`body`].

pub mod body;
mod header_encoder;

mod response_encoder;
pub use response_encoder::ResponseEncoder;
