use std::io::{self, ErrorKind};

use bytes::{Buf, BytesMut};
use http::response::Parts;
use tokio_util::codec::Encoder;
use tracing::error;

use crate::codec::body::PayloadEncoder;
use crate::codec::header_encoder::HeaderEncoder;
use crate::protocol::{Message, PayloadSize, SendError};

/// Stateful encoder for one response after another on a connection.
///
/// Each response starts with a `Message::Header` carrying the head and its
/// framing decision, followed by payload items and a final
/// [`PayloadItem::Eof`](crate::protocol::PayloadItem::Eof). A trailing `Eof`
/// after the body already finished is accepted as a no-op so callers can
/// terminate unconditionally.
pub struct ResponseEncoder {
    payload_encoder: Option<PayloadEncoder>,
}

impl ResponseEncoder {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Default for ResponseEncoder {
    fn default() -> Self {
        Self { payload_encoder: None }
    }
}

impl<D: Buf> Encoder<Message<(Parts, PayloadSize), D>> for ResponseEncoder {
    type Error = SendError;

    fn encode(
        &mut self,
        item: Message<(Parts, PayloadSize), D>,
        dst: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        match item {
            Message::Header((parts, payload_size)) => {
                if self.payload_encoder.is_some() {
                    error!("expected payload item but received response head");
                    return Err(io::Error::from(ErrorKind::InvalidInput).into());
                }

                self.payload_encoder = Some(PayloadEncoder::new(payload_size));
                HeaderEncoder.encode((parts, payload_size), dst)
            }

            Message::Payload(payload_item) => {
                let Some(payload_encoder) = &mut self.payload_encoder else {
                    if payload_item.is_eof() {
                        return Ok(());
                    }
                    error!("expected response head but received payload item");
                    return Err(io::Error::from(ErrorKind::InvalidInput).into());
                };

                let result = payload_encoder.encode(payload_item, dst);

                if payload_encoder.is_finish() {
                    self.payload_encoder.take();
                }

                result
            }
        }
    }
}
