//! Response body kinds.
//!
//! A [`ResponseBody`] is either nothing, a fully materialized byte value, or
//! a stream. Concrete values (text, bytes, url-encoded forms, multipart
//! forms) are serialized up front so they carry an exact size and go out with
//! a `Content-Length`; streams without a known length are chunk-encoded by
//! the writer.

use std::error::Error;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::{BoxStream, Stream, StreamExt};
use http_body::{Body, Frame, SizeHint};
use mime::Mime;
use serde::Serialize;

use super::SendError;

pub type BoxError = Box<dyn Error + Send + Sync>;

/// Body of an outgoing response.
pub struct ResponseBody {
    kind: Kind,
}

enum Kind {
    Empty,
    Full(Option<Bytes>),
    Stream { stream: BoxStream<'static, Result<Bytes, BoxError>>, length: Option<u64> },
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self { kind: Kind::Empty }
    }

    /// A fully buffered body with a known length.
    pub fn full(bytes: impl Into<Bytes>) -> Self {
        Self { kind: Kind::Full(Some(bytes.into())) }
    }

    /// An `application/x-www-form-urlencoded` body serialized from key/value
    /// pairs.
    pub fn form<T: Serialize>(form: &T) -> Result<Self, SendError> {
        let encoded = serde_urlencoded::to_string(form).map_err(SendError::invalid_body)?;
        Ok(Self::full(encoded))
    }

    /// A `multipart/form-data` body; pair it with
    /// [`Multipart::content_type`] on the response headers.
    pub fn multipart(multipart: &Multipart) -> Self {
        Self::full(multipart.encode())
    }

    /// A streaming body of unknown length, sent with chunked transfer
    /// encoding.
    pub fn stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self { kind: Kind::Stream { stream: stream.map(|r| r.map_err(Into::into)).boxed(), length: None } }
    }

    /// A streaming body whose total length is known up front, sent raw.
    pub fn sized_stream<S, E>(stream: S, length: u64) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self { kind: Kind::Stream { stream: stream.map(|r| r.map_err(Into::into)).boxed(), length: Some(length) } }
    }
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match &mut self.get_mut().kind {
            Kind::Empty => Poll::Ready(None),
            Kind::Full(bytes) => Poll::Ready(bytes.take().map(|b| Ok(Frame::data(b)))),
            Kind::Stream { stream, .. } => match futures::ready!(stream.poll_next_unpin(cx)) {
                Some(Ok(bytes)) => Poll::Ready(Some(Ok(Frame::data(bytes)))),
                Some(Err(e)) => Poll::Ready(Some(Err(e))),
                None => Poll::Ready(None),
            },
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.kind {
            Kind::Empty => SizeHint::with_exact(0),
            Kind::Full(bytes) => SizeHint::with_exact(bytes.as_ref().map_or(0, |b| b.len() as u64)),
            Kind::Stream { length, .. } => length.map_or_else(SizeHint::new, SizeHint::with_exact),
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Empty => f.write_str("ResponseBody::Empty"),
            Kind::Full(bytes) => {
                write!(f, "ResponseBody::Full({} bytes)", bytes.as_ref().map_or(0, Bytes::len))
            }
            Kind::Stream { length, .. } => write!(f, "ResponseBody::Stream(length: {length:?})"),
        }
    }
}

impl From<&'static str> for ResponseBody {
    fn from(value: &'static str) -> Self {
        Self::full(value)
    }
}

impl From<String> for ResponseBody {
    fn from(value: String) -> Self {
        Self::full(value)
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(value: Vec<u8>) -> Self {
        Self::full(value)
    }
}

impl From<Bytes> for ResponseBody {
    fn from(value: Bytes) -> Self {
        Self::full(value)
    }
}

/// A `multipart/form-data` payload under construction.
#[derive(Debug)]
pub struct Multipart {
    boundary: String,
    parts: Vec<Part>,
}

/// One part of a multipart payload.
#[derive(Debug)]
pub struct Part {
    name: String,
    filename: Option<String>,
    content_type: Option<Mime>,
    data: Bytes,
}

impl Part {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), filename: None, content_type: None, data: Bytes::from(value.into()) }
    }

    pub fn bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self { name: name.into(), filename: None, content_type: None, data: data.into() }
    }

    pub fn file(
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: Mime,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            filename: Some(filename.into()),
            content_type: Some(content_type),
            data: data.into(),
        }
    }
}

impl Multipart {
    /// Starts an empty payload with a freshly synthesized boundary token.
    pub fn new() -> Self {
        Self { boundary: format!("----FilamentBoundary{:016x}", fastrand::u64(..)), parts: Vec::new() }
    }

    pub fn part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the response's `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        for (i, part) in self.parts.iter().enumerate() {
            // The CRLF before a delimiter belongs to the delimiter, so the
            // first boundary carries none.
            if i > 0 {
                buf.put_slice(b"\r\n");
            }
            buf.put_slice(format!("--{}\r\n", self.boundary).as_bytes());
            buf.put_slice(format!("Content-Disposition: form-data; name=\"{}\"", part.name).as_bytes());
            if let Some(filename) = &part.filename {
                buf.put_slice(format!("; filename=\"{filename}\"").as_bytes());
            }
            buf.put_slice(b"\r\n");
            if let Some(content_type) = &part.content_type {
                buf.put_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
            } else if part.filename.is_some() {
                buf.put_slice(format!("Content-Type: {}\r\n", mime::APPLICATION_OCTET_STREAM).as_bytes());
            }
            buf.put_slice(b"\r\n");
            buf.put_slice(&part.data);
        }

        buf.put_slice(format!("\r\n--{}--\r\n", self.boundary).as_bytes());
        buf.freeze()
    }
}

impl Default for Multipart {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn full_body_yields_one_frame_with_exact_size() {
        let body = ResponseBody::full("hello");
        assert_eq!(body.size_hint().exact(), Some(5));

        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(collected, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn form_body_is_urlencoded() {
        let body = ResponseBody::form(&[("a", "b"), ("key", "hello world")]).unwrap();
        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(collected, Bytes::from_static(b"a=b&key=hello+world"));
    }

    #[tokio::test]
    async fn stream_body_concatenates_in_order() {
        let chunks: Vec<Result<Bytes, BoxError>> =
            vec![Ok(Bytes::from_static(b"one")), Ok(Bytes::from_static(b"two"))];
        let body = ResponseBody::stream(futures::stream::iter(chunks));
        assert_eq!(body.size_hint().exact(), None);

        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(collected, Bytes::from_static(b"onetwo"));
    }

    #[test]
    fn multipart_layout() {
        let multipart = Multipart::new()
            .part(Part::text("field", "value"))
            .part(Part::file("upload", "a.bin", mime::APPLICATION_OCTET_STREAM, &b"\x00\x01"[..]));
        let boundary = multipart.boundary().to_string();

        let body = ResponseBody::multipart(&multipart);
        let encoded = match &body.kind {
            Kind::Full(Some(bytes)) => bytes.clone(),
            _ => panic!("multipart should be fully buffered"),
        };
        let text = String::from_utf8_lossy(&encoded);

        assert!(text.starts_with(&format!("--{boundary}\r\n")));
        assert!(text.contains(&format!("value\r\n--{boundary}\r\n")));
        assert!(text.contains("Content-Disposition: form-data; name=\"field\"\r\n\r\nvalue"));
        assert!(text.contains("filename=\"a.bin\""));
        assert!(text.contains("Content-Type: application/octet-stream"));
        assert!(text.ends_with(&format!("\r\n--{boundary}--\r\n")));
    }
}
