//! Per-connection request/response loop.
//!
//! [`HttpConnection`] owns one socket for its whole life: it reads bytes into
//! a buffer, feeds them to a [`ParseSession`], dispatches each completed
//! request to the [`Handler`], and writes the response through the
//! [`ResponseEncoder`]. Bytes the parser left unconsumed at a message
//! boundary stay in the buffer and are replayed before the next socket read,
//! so pipelined requests are never dropped.
//!
//! The loop ends when the peer closes between messages, the keep-alive idle
//! timeout fires, the per-connection request cap is reached, or the response
//! says `Connection: close`. A close or stall in the middle of a message is
//! truncation and surfaces as an error instead.

use std::error::Error;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use futures::SinkExt;
use http::header::CONNECTION;
use http::{HeaderValue, Response, StatusCode, Version};
use http_body::Body;
use http_body_util::{BodyExt, Empty};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::FramedWrite;
use tracing::{debug, error, info};

use crate::codec::ResponseEncoder;
use crate::handler::Handler;
use crate::parser::{CompletedMessage, Origin, ParseSession};
use crate::protocol::{HttpError, Message, ParseError, PayloadItem, PayloadSize, SendError};

const READ_BUF_SIZE: usize = 8 * 1024;

/// Peer address of the connection, attached to every request's extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteAddr(pub SocketAddr);

/// Tunables for one connection's lifecycle.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long to wait for the next byte before giving up on the peer.
    pub keep_alive_timeout: Duration,
    /// Requests served before the connection is closed regardless of
    /// keep-alive.
    pub max_requests: usize,
    /// Scheme and authority for absolutizing origin-form targets.
    pub origin: Origin,
    /// Peer address, when known.
    pub remote_addr: Option<SocketAddr>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            keep_alive_timeout: Duration::from_secs(5),
            max_requests: 1000,
            origin: Origin { secure: false, host: "localhost".into() },
            remote_addr: None,
        }
    }
}

/// Drives one accepted socket until it closes.
pub struct HttpConnection<R, W> {
    reader: R,
    framed_write: FramedWrite<W, ResponseEncoder>,
    session: ParseSession,
    read_buf: BytesMut,
    served: usize,
    config: ConnectionConfig,
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, config: ConnectionConfig) -> Self {
        Self {
            reader,
            framed_write: FramedWrite::new(writer, ResponseEncoder::new()),
            session: ParseSession::new(config.origin.clone()),
            read_buf: BytesMut::with_capacity(READ_BUF_SIZE),
            served: 0,
            config,
        }
    }

    /// Serves requests until the connection winds down.
    ///
    /// Returns `Ok(())` on a clean close (peer finished between messages,
    /// idle timeout, or request cap). Parse failures close the connection
    /// without a response; the error carries the reason.
    pub async fn process<H>(mut self, handler: Arc<H>) -> Result<(), HttpError>
    where
        H: Handler,
        H::RespBody: Body<Data = Bytes> + Unpin,
        <H::RespBody as Body>::Error: Display,
    {
        loop {
            let message = match self.next_message().await? {
                Some(message) => message,
                None => {
                    debug!("peer finished between messages, closing");
                    return Ok(());
                }
            };

            self.served += 1;
            let close = !message.should_keep_alive || self.served >= self.config.max_requests;

            let CompletedMessage { mut request, .. } = message;
            let version = request.version();
            if let Some(addr) = self.config.remote_addr {
                request.extensions_mut().insert(RemoteAddr(addr));
            }

            let response_result = handler.call(request).await;
            self.send_response(response_result, version, close).await?;

            if close {
                debug!(served = self.served, "closing connection");
                let _ = self.framed_write.get_mut().shutdown().await;
                return Ok(());
            }
        }
    }

    /// Parses buffered bytes, reading from the socket only when the buffer
    /// runs dry.
    async fn next_message(&mut self) -> Result<Option<CompletedMessage>, HttpError> {
        loop {
            if !self.read_buf.is_empty() {
                let feed = self.session.feed(&self.read_buf).map_err(HttpError::from)?;
                self.read_buf.advance(feed.consumed);

                if self.session.take_expect_continue() {
                    self.send_continue().await?;
                }
                if let Some(message) = feed.message {
                    return Ok(Some(message));
                }
                continue;
            }

            let idle = self.session.is_idle();
            let read = tokio::time::timeout(
                self.config.keep_alive_timeout,
                self.reader.read_buf(&mut self.read_buf),
            )
            .await;

            match read {
                Ok(Ok(0)) if idle => return Ok(None),
                Ok(Ok(0)) => {
                    info!("peer closed mid-message");
                    return Err(ParseError::UnexpectedEof.into());
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(ParseError::io(e).into()),
                Err(_) if idle => {
                    debug!("keep-alive idle timeout");
                    return Ok(None);
                }
                Err(_) => {
                    info!("peer stalled mid-message");
                    return Err(ParseError::UnexpectedEof.into());
                }
            }
        }
    }

    /// Interim `100 Continue`, written raw since it is not a final response.
    async fn send_continue(&mut self) -> Result<(), HttpError> {
        let writer = self.framed_write.get_mut();
        writer
            .write_all(b"HTTP/1.1 100 Continue\r\n\r\n")
            .await
            .map_err(SendError::io)?;
        writer.flush().await.map_err(SendError::io)?;
        debug!("sent 100 continue");
        Ok(())
    }

    async fn send_response<T, E>(
        &mut self,
        response_result: Result<Response<T>, E>,
        version: Version,
        close: bool,
    ) -> Result<(), HttpError>
    where
        T: Body + Unpin,
        T::Error: Display,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        match response_result {
            Ok(response) => self.do_send_response(response, version, close).await,
            Err(e) => {
                error!("handler failed: {}", e.into());
                let error_response = build_error_response(StatusCode::INTERNAL_SERVER_ERROR);
                self.do_send_response(error_response, version, close).await
            }
        }
    }

    async fn do_send_response<T>(
        &mut self,
        mut response: Response<T>,
        version: Version,
        close: bool,
    ) -> Result<(), HttpError>
    where
        T: Body + Unpin,
        T::Error: Display,
    {
        if close {
            response.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
        } else if version == Version::HTTP_10 {
            // HTTP/1.0 defaults to close, so continuing must be explicit.
            response.headers_mut().insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        }

        let (parts, mut body) = response.into_parts();
        let payload_size = PayloadSize::from(body.size_hint());

        self.framed_write
            .feed(Message::<_, T::Data>::Header((parts, payload_size)))
            .await?;

        // Each chunk is flushed on its own so slow readers exert
        // backpressure on the body stream.
        loop {
            match body.frame().await {
                Some(Ok(frame)) => {
                    let payload_item = frame
                        .into_data()
                        .map(PayloadItem::Chunk)
                        .map_err(|_| SendError::invalid_body("unexpected non-data frame"))?;
                    self.framed_write.send(Message::Payload(payload_item)).await?;
                }
                Some(Err(e)) => {
                    return Err(SendError::invalid_body(format!("response body failed: {e}")).into());
                }
                None => {
                    self.framed_write.send(Message::Payload(PayloadItem::<T::Data>::Eof)).await?;
                    return Ok(());
                }
            }
        }
    }
}

fn build_error_response(status_code: StatusCode) -> Response<Empty<Bytes>> {
    let mut response = Response::new(Empty::new());
    *response.status_mut() = status_code;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::make_handler;
    use crate::protocol::{ReqBody, ResponseBody};
    use http::Request;
    use std::convert::Infallible;
    use tokio::io::AsyncWriteExt;

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            origin: Origin { secure: false, host: "test.example".into() },
            ..Default::default()
        }
    }

    fn echo_path_handler() -> Arc<impl Handler<RespBody = ResponseBody, Error = Infallible>> {
        Arc::new(make_handler(|req: Request<ReqBody>| async move {
            let body = ResponseBody::full(req.uri().path().to_string());
            Ok::<_, Infallible>(Response::new(body))
        }))
    }

    async fn run_client<F, Fut>(config: ConnectionConfig, client: F) -> Result<(), HttpError>
    where
        F: FnOnce(tokio::io::DuplexStream) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (read_half, write_half) = tokio::io::split(server_io);
        let connection = HttpConnection::new(read_half, write_half, config);

        let server = tokio::spawn(connection.process(echo_path_handler()));
        client(client_io).await;
        server.await.unwrap()
    }

    async fn send_and_collect(io: &mut tokio::io::DuplexStream, request: &str) -> String {
        io.write_all(request.as_bytes()).await.unwrap();
        read_available(io).await
    }

    async fn read_available(io: &mut tokio::io::DuplexStream) -> String {
        let mut collected = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match tokio::time::timeout(Duration::from_millis(200), io.read(&mut buf)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => collected.extend_from_slice(&buf[..n]),
                Ok(Err(_)) => break,
            }
        }
        String::from_utf8(collected).unwrap()
    }

    #[tokio::test]
    async fn serves_single_request_and_closes_cleanly() {
        let result = run_client(config(), |mut io| async move {
            let response = send_and_collect(&mut io, "GET /hello HTTP/1.1\r\nHost: a\r\n\r\n").await;
            assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
            assert!(response.contains("content-length: 6\r\n"));
            assert!(response.ends_with("/hello"));
            io.shutdown().await.unwrap();
        })
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn pipelined_requests_are_all_answered() {
        let result = run_client(config(), |mut io| async move {
            let raw = "GET /one HTTP/1.1\r\nHost: a\r\n\r\nGET /two HTTP/1.1\r\nHost: a\r\n\r\n";
            let response = send_and_collect(&mut io, raw).await;

            assert!(response.contains("/one"));
            assert!(response.contains("/two"));
            assert_eq!(response.matches("HTTP/1.1 200 OK").count(), 2);
            io.shutdown().await.unwrap();
        })
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn request_cap_closes_connection() {
        let config = ConnectionConfig { max_requests: 2, ..config() };
        let result = run_client(config, |mut io| async move {
            let raw = "GET /1 HTTP/1.1\r\nHost: a\r\n\r\n\
                       GET /2 HTTP/1.1\r\nHost: a\r\n\r\n\
                       GET /3 HTTP/1.1\r\nHost: a\r\n\r\n";
            let response = send_and_collect(&mut io, raw).await;

            assert_eq!(response.matches("HTTP/1.1 200 OK").count(), 2);
            assert!(response.contains("connection: close\r\n"));
            assert!(!response.contains("/3"));
        })
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn http10_without_keep_alive_closes_after_response() {
        let result = run_client(config(), |mut io| async move {
            let response = send_and_collect(&mut io, "GET /old HTTP/1.0\r\n\r\n").await;
            assert!(response.contains("connection: close\r\n"));
            assert!(response.ends_with("/old"));
        })
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn http10_keep_alive_is_echoed_and_connection_stays_open() {
        let result = run_client(config(), |mut io| async move {
            let first = send_and_collect(
                &mut io,
                "GET /ka HTTP/1.0\r\nConnection: keep-alive\r\n\r\n",
            )
            .await;
            assert!(first.contains("connection: keep-alive\r\n"));
            assert!(first.ends_with("/ka"));

            let second = send_and_collect(
                &mut io,
                "GET /again HTTP/1.0\r\nConnection: keep-alive\r\n\r\n",
            )
            .await;
            assert!(second.contains("connection: keep-alive\r\n"));
            assert!(second.ends_with("/again"));
            io.shutdown().await.unwrap();
        })
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn chunked_streaming_response_round_trips() {
        let streaming = Arc::new(make_handler(|_req: Request<ReqBody>| async move {
            let chunks: Vec<Result<Bytes, crate::protocol::BoxError>> = vec![
                Ok(Bytes::from_static(b"alpha")),
                Ok(Bytes::from_static(b"beta")),
                Ok(Bytes::from_static(b"gamma")),
            ];
            let body = ResponseBody::stream(futures::stream::iter(chunks));
            Ok::<_, Infallible>(Response::new(body))
        }));

        let (mut client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (read_half, write_half) = tokio::io::split(server_io);
        let connection = HttpConnection::new(read_half, write_half, config());
        let server = tokio::spawn(connection.process(streaming));

        let response =
            send_and_collect(&mut client_io, "GET /stream HTTP/1.1\r\nHost: a\r\n\r\n").await;
        let (head, body) = response.split_once("\r\n\r\n").unwrap();
        assert!(head.contains("transfer-encoding: chunked"));

        // De-chunked, the payload is the original sequence; exactly one
        // zero-size terminator ends the stream.
        assert_eq!(body, "5\r\nalpha\r\n4\r\nbeta\r\n5\r\ngamma\r\n0\r\n\r\n");
        assert_eq!(body.matches("0\r\n\r\n").count(), 1);

        client_io.shutdown().await.unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_between_messages_is_a_clean_close() {
        let result = run_client(config(), |io| async move {
            // Keep the socket open without sending anything.
            let _io = io;
            tokio::time::sleep(Duration::from_secs(30)).await;
        })
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn stall_mid_message_is_truncation() {
        let result = run_client(config(), |mut io| async move {
            io.write_all(b"GET /partial HTTP/1.1\r\nHost:").await.unwrap();
            // Hold the connection open without finishing the message.
            tokio::time::sleep(Duration::from_secs(30)).await;
        })
        .await;

        assert!(matches!(result, Err(HttpError::RequestError { source: ParseError::UnexpectedEof })));
    }

    #[tokio::test]
    async fn malformed_request_gets_no_response() {
        let result = run_client(config(), |mut io| async move {
            let response = send_and_collect(&mut io, "NONSENSE\r\n\r\n").await;
            assert!(response.is_empty());
        })
        .await;

        assert!(matches!(result, Err(HttpError::RequestError { .. })));
    }

    #[tokio::test]
    async fn handler_failure_turns_into_500() {
        let failing = Arc::new(make_handler(|_req: Request<ReqBody>| async move {
            Err::<Response<ResponseBody>, _>(std::io::Error::other("boom"))
        }));

        let (mut client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (read_half, write_half) = tokio::io::split(server_io);
        let connection = HttpConnection::new(read_half, write_half, config());
        let server = tokio::spawn(connection.process(failing));

        let response =
            send_and_collect(&mut client_io, "GET / HTTP/1.1\r\nHost: a\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(response.contains("content-length: 0\r\n"));

        client_io.shutdown().await.unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn expect_continue_gets_interim_response() {
        let result = run_client(config(), |mut io| async move {
            io.write_all(
                b"POST /upload HTTP/1.1\r\nHost: a\r\nContent-Length: 4\r\nExpect: 100-continue\r\n\r\n",
            )
            .await
            .unwrap();

            let interim = read_available(&mut io).await;
            assert!(interim.starts_with("HTTP/1.1 100 Continue\r\n\r\n"));

            let response = send_and_collect(&mut io, "data").await;
            assert!(response.contains("HTTP/1.1 200 OK"));
            io.shutdown().await.unwrap();
        })
        .await;

        assert!(result.is_ok());
    }
}
