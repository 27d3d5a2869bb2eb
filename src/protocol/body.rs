//! Request body streaming.
//!
//! Parser callbacks run synchronously in whatever stack frame fed the socket
//! bytes, while the request handler consumes the body asynchronously and
//! possibly much later. [`BodySender`] and [`ReqBody`] bridge the two: chunks
//! pushed before the consumer polls are buffered in arrival order, then the
//! backlog is drained in order and live chunks flow directly. End-of-stream
//! and errors queue behind buffered chunks, so a consumer always sees the
//! complete prefix that was parsed.
//!
//! There is exactly one consumer: [`ReqBody`] owns the receiving half and is
//! not cloneable.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::StreamExt;
use futures::channel::mpsc;
use http_body::{Body, Frame, SizeHint};

use super::{ParseError, PayloadSize};

/// Streaming request body handed to the request handler.
#[derive(Debug)]
pub struct ReqBody {
    receiver: mpsc::UnboundedReceiver<Result<Bytes, ParseError>>,
    size: PayloadSize,
}

impl ReqBody {
    /// Creates a body stream pair: the consumer half for the handler and the
    /// producer half for parser callbacks.
    pub(crate) fn channel(size: PayloadSize) -> (ReqBody, BodySender) {
        let (sender, receiver) = mpsc::unbounded();
        (ReqBody { receiver, size }, BodySender { sender: Some(sender) })
    }

    /// A body that ends immediately, used for bodyless methods.
    pub fn empty() -> ReqBody {
        let (body, sender) = ReqBody::channel(PayloadSize::Empty);
        sender.complete();
        body
    }
}

impl Body for ReqBody {
    type Data = Bytes;
    type Error = ParseError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match futures::ready!(this.receiver.poll_next_unpin(cx)) {
            Some(Ok(bytes)) => Poll::Ready(Some(Ok(Frame::data(bytes)))),
            Some(Err(e)) => Poll::Ready(Some(Err(e))),
            None => Poll::Ready(None),
        }
    }

    fn size_hint(&self) -> SizeHint {
        self.size.into()
    }
}

/// Producer half of a request body stream.
///
/// Pushing never blocks: the parser callback that produces chunks cannot
/// await. If the consumer was dropped, chunks are discarded so the parser can
/// still drain the message and find the next keep-alive request boundary.
#[derive(Debug)]
pub(crate) struct BodySender {
    sender: Option<mpsc::UnboundedSender<Result<Bytes, ParseError>>>,
}

impl BodySender {
    pub(crate) fn push(&self, chunk: Bytes) {
        if let Some(sender) = &self.sender {
            let _ = sender.unbounded_send(Ok(chunk));
        }
    }

    /// Marks end-of-stream; buffered chunks are still delivered first.
    pub(crate) fn complete(mut self) {
        self.sender.take();
    }

    /// Delivers `error` to the consumer after any buffered chunks, then ends
    /// the stream.
    pub(crate) fn error(mut self, error: ParseError) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.unbounded_send(Err(error));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn next_data(body: &mut ReqBody) -> Option<Result<Bytes, ParseError>> {
        let frame = body.frame().await?;
        Some(frame.map(|f| f.into_data().expect("expected data frame")))
    }

    #[tokio::test]
    async fn buffered_chunks_flush_in_order_then_eof() {
        let (mut body, sender) = ReqBody::channel(PayloadSize::Chunked);

        // production happens entirely before the consumer attaches
        sender.push(Bytes::from_static(b"first"));
        sender.push(Bytes::from_static(b"second"));
        sender.complete();

        assert_eq!(next_data(&mut body).await.unwrap().unwrap(), Bytes::from_static(b"first"));
        assert_eq!(next_data(&mut body).await.unwrap().unwrap(), Bytes::from_static(b"second"));
        assert!(next_data(&mut body).await.is_none());
    }

    #[tokio::test]
    async fn error_is_stored_and_delivered_after_backlog() {
        let (mut body, sender) = ReqBody::channel(PayloadSize::Chunked);
        sender.push(Bytes::from_static(b"partial"));
        sender.error(ParseError::UnexpectedEof);

        assert_eq!(next_data(&mut body).await.unwrap().unwrap(), Bytes::from_static(b"partial"));
        assert!(matches!(next_data(&mut body).await, Some(Err(ParseError::UnexpectedEof))));
        assert!(next_data(&mut body).await.is_none());
    }

    #[tokio::test]
    async fn push_after_consumer_dropped_is_discarded() {
        let (body, sender) = ReqBody::channel(PayloadSize::Length(4));
        drop(body);

        // must not panic or error: the parser keeps draining the wire
        sender.push(Bytes::from_static(b"late"));
        sender.complete();
    }

    #[tokio::test]
    async fn empty_body_ends_immediately() {
        let mut body = ReqBody::empty();
        assert_eq!(body.size_hint().exact(), Some(0));
        assert!(next_data(&mut body).await.is_none());
    }
}
