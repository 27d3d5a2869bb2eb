use std::io::{self, ErrorKind, Write};

use bytes::{BufMut, BytesMut};
use http::response::Parts;
use http::{HeaderValue, Version, header};
use tokio_util::codec::Encoder;
use tracing::error;

use crate::protocol::{PayloadSize, SendError};

/// Room reserved before serializing a header block.
const INIT_HEADER_SIZE: usize = 4 * 1024;

/// Serializes the status line and header block of a response.
///
/// The framing header is owned here: `Content-Length` or
/// `Transfer-Encoding: chunked` is inserted (or overwritten) to match the
/// [`PayloadSize`] the body encoder will honor, so handlers cannot desync
/// the two.
pub struct HeaderEncoder;

impl Encoder<(Parts, PayloadSize)> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (Parts, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut parts, payload_size) = item;

        dst.reserve(INIT_HEADER_SIZE);
        match parts.version {
            Version::HTTP_10 | Version::HTTP_11 => {
                write!(
                    FastWrite(dst),
                    "HTTP/1.1 {} {}\r\n",
                    parts.status.as_str(),
                    parts.status.canonical_reason().unwrap_or("Unknown"),
                )?;
            }
            v => {
                error!(http_version = ?v, "unsupported http version");
                return Err(io::Error::from(ErrorKind::Unsupported).into());
            }
        }

        match payload_size {
            PayloadSize::Length(n) => {
                parts.headers.insert(header::CONTENT_LENGTH, n.into());
            }
            PayloadSize::Chunked => {
                parts
                    .headers
                    .insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            }
            PayloadSize::Empty => {
                parts.headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
            }
        }

        for (name, value) in parts.headers.iter() {
            dst.put_slice(name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

/// Writes into an already reserved `BytesMut` without intermediate buffering.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
