//! Per-connection parsing session.
//!
//! A [`ParseSession`] owns one parser handle in the global engine and turns
//! its span callbacks into [`http::Request`] values. Spans borrow from the
//! buffer under parse, so everything kept past a [`feed`](ParseSession::feed)
//! call is copied into owned storage here. Header fields and values may each
//! arrive across several callback invocations when a buffer ends mid-token;
//! the collector glues consecutive spans of the same kind back together.
//!
//! A request surfaces only once its message is complete, body included, so a
//! [`CompletedMessage`] always carries a fully buffered body channel. The
//! engine pauses at message boundaries, which means `feed` reports how many
//! bytes it consumed and the caller replays the remainder before reading
//! more from the socket.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Uri, Version};
use tracing::debug;

use crate::engine::{
    self, BodyFraming, CallbackResult, Callbacks, EngineError, Handle, MessageHead, ParserKind,
    Reject, method_name,
};
use crate::protocol::body::{BodySender, ReqBody};
use crate::protocol::{ParseError, PayloadSize};

/// Scheme and authority used to absolutize origin-form request targets.
#[derive(Debug, Clone)]
pub struct Origin {
    pub secure: bool,
    pub host: String,
}

impl Origin {
    fn scheme(&self) -> &'static str {
        if self.secure { "https" } else { "http" }
    }
}

/// A fully parsed request handed up to the connection.
#[derive(Debug)]
pub struct CompletedMessage {
    pub request: Request<ReqBody>,
    pub should_keep_alive: bool,
}

/// Outcome of one [`ParseSession::feed`] call.
#[derive(Debug)]
pub struct Feed {
    /// Bytes consumed from the input. Less than the input length when the
    /// parser paused at a message boundary.
    pub consumed: usize,
    pub message: Option<CompletedMessage>,
}

/// One connection's parser handle plus the state accumulated between
/// callbacks.
#[derive(Debug)]
pub struct ParseSession {
    handle: Option<Handle>,
    collector: Collector,
}

impl ParseSession {
    pub fn new(origin: Origin) -> Self {
        let handle = engine::with_global(|engine| engine.allocate(ParserKind::Request));
        Self { handle: Some(handle), collector: Collector::new(origin) }
    }

    /// Parses `buf`, returning the consumed byte count and at most one
    /// completed request.
    ///
    /// After an error the session is unusable and must be destroyed; the
    /// engine keeps the failure reason until then.
    pub fn feed(&mut self, buf: &[u8]) -> Result<Feed, ParseError> {
        let handle = self.handle.ok_or(ParseError::Engine(EngineError::StaleHandle))?;
        let outcome =
            engine::with_global(|engine| engine.execute(handle, &mut self.collector, buf));

        match outcome {
            Ok(consumed) => {
                Ok(Feed { consumed, message: self.collector.completed.take() })
            }
            Err(EngineError::Callback) => {
                self.collector.abort_pending();
                let error = self
                    .collector
                    .failure
                    .take()
                    .unwrap_or(ParseError::Engine(EngineError::Callback));
                debug!(%error, "request rejected");
                Err(error)
            }
            Err(e) => {
                self.collector.abort_pending();
                debug!(error = %e, "parse failed");
                Err(ParseError::Engine(e))
            }
        }
    }

    /// True when the last fed headers carried `Expect: 100-continue`.
    ///
    /// Consumes the flag, so the interim response goes out exactly once per
    /// message.
    pub fn take_expect_continue(&mut self) -> bool {
        std::mem::take(&mut self.collector.expect_continue)
    }

    /// True while the parser sits between messages, with no request line in
    /// flight. Decides whether a peer close is clean or truncation.
    pub fn is_idle(&self) -> bool {
        self.handle
            .is_some_and(|handle| engine::with_global(|engine| engine.is_idle(handle)))
    }

    /// Failure reason kept by the engine after a parse error.
    pub fn error_reason(&self) -> Option<&'static str> {
        self.handle
            .and_then(|handle| engine::with_global(|engine| engine.error_reason(handle)))
    }

    /// Releases the engine handle. Safe to call more than once; later calls
    /// do nothing.
    pub fn destroy(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = engine::with_global(|engine| engine.free(handle));
        }
    }
}

impl Drop for ParseSession {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Which span kind the previous callback carried, for continuation gluing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastSpan {
    None,
    Field,
    Value,
}

/// Accumulates callback spans into an owned request.
#[derive(Debug)]
struct Collector {
    origin: Origin,
    url: Vec<u8>,
    fields: Vec<Vec<u8>>,
    values: Vec<Vec<u8>>,
    last_span: LastSpan,
    pending: Option<Pending>,
    completed: Option<CompletedMessage>,
    failure: Option<ParseError>,
    expect_continue: bool,
}

/// A request whose headers are parsed but whose body is still streaming in.
#[derive(Debug)]
struct Pending {
    request: Request<ReqBody>,
    sender: Option<BodySender>,
    should_keep_alive: bool,
}

impl Collector {
    fn new(origin: Origin) -> Self {
        Self {
            origin,
            url: Vec::new(),
            fields: Vec::new(),
            values: Vec::new(),
            last_span: LastSpan::None,
            pending: None,
            completed: None,
            failure: None,
            expect_continue: false,
        }
    }

    fn reject(&mut self, error: ParseError) -> Reject {
        self.failure = Some(error);
        Reject
    }

    /// Fails the half-built message after a parse error or rejection.
    ///
    /// The request never surfaced, so this mostly exists to close out the
    /// body channel cleanly wherever it may have traveled.
    fn abort_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            if let Some(sender) = pending.sender {
                sender.error(ParseError::invalid_body("parsing failed before the body completed"));
            }
        }
    }

    fn build_uri(&mut self) -> Result<Uri, Reject> {
        // Absolute-form and asterisk-form targets parse as they stand;
        // origin-form needs the scheme and authority filled in.
        let absolute = self.url.starts_with(b"http://")
            || self.url.starts_with(b"https://")
            || self.url == b"*";

        let uri = if absolute {
            Uri::try_from(self.url.as_slice())
        } else {
            let host = self.host_header().unwrap_or(&self.origin.host);
            let target = String::from_utf8_lossy(&self.url);
            Uri::try_from(format!("{}://{}{}", self.origin.scheme(), host, target))
        };

        uri.map_err(|_| self.reject(ParseError::InvalidUri))
    }

    /// Value of the `Host` header, when present and valid UTF-8.
    fn host_header(&self) -> Option<&str> {
        self.fields
            .iter()
            .position(|field| field.eq_ignore_ascii_case(b"host"))
            .and_then(|i| std::str::from_utf8(self.values.get(i)?).ok())
            .filter(|host| !host.is_empty())
    }

    fn build_headers(&mut self) -> Result<HeaderMap, Reject> {
        let mut headers = HeaderMap::with_capacity(self.fields.len());
        for (field, value) in self.fields.iter().zip(&self.values) {
            let name = HeaderName::from_bytes(field)
                .map_err(|_| ParseError::invalid_header("malformed header name"));
            let name = match name {
                Ok(name) => name,
                Err(e) => return Err(self.reject(e)),
            };
            match HeaderValue::from_bytes(value) {
                Ok(value) => headers.append(name, value),
                Err(_) => {
                    return Err(self.reject(ParseError::invalid_header("malformed header value")));
                }
            };
        }
        Ok(headers)
    }
}

impl Callbacks for Collector {
    fn on_message_begin(&mut self) -> CallbackResult {
        self.url.clear();
        self.fields.clear();
        self.values.clear();
        self.last_span = LastSpan::None;
        Ok(())
    }

    fn on_url(&mut self, raw: &[u8]) -> CallbackResult {
        self.url.extend_from_slice(raw);
        Ok(())
    }

    fn on_header_field(&mut self, raw: &[u8]) -> CallbackResult {
        if self.last_span == LastSpan::Field {
            if let Some(field) = self.fields.last_mut() {
                field.extend_from_slice(raw);
            }
        } else {
            self.fields.push(raw.to_vec());
        }
        self.last_span = LastSpan::Field;
        Ok(())
    }

    fn on_header_value(&mut self, raw: &[u8]) -> CallbackResult {
        if self.last_span == LastSpan::Value {
            if let Some(value) = self.values.last_mut() {
                value.extend_from_slice(raw);
            }
        } else {
            self.values.push(raw.to_vec());
        }
        self.last_span = LastSpan::Value;
        Ok(())
    }

    fn on_headers_complete(&mut self, head: &MessageHead) -> CallbackResult {
        let method = method_name(head.method)
            .and_then(|name| Method::from_bytes(name.as_bytes()).ok())
            .ok_or_else(|| self.reject(ParseError::InvalidMethod))?;
        let uri = self.build_uri()?;
        let headers = self.build_headers()?;

        let version = match head.version_minor {
            0 => Version::HTTP_10,
            _ => Version::HTTP_11,
        };

        let (body, sender) = match head.framing {
            BodyFraming::None => (ReqBody::empty(), None),
            BodyFraming::Length(n) => {
                let (body, sender) = ReqBody::channel(PayloadSize::Length(n));
                (body, Some(sender))
            }
            BodyFraming::Chunked => {
                let (body, sender) = ReqBody::channel(PayloadSize::Chunked);
                (body, Some(sender))
            }
        };

        self.expect_continue = self
            .fields
            .iter()
            .position(|field| field.eq_ignore_ascii_case(b"expect"))
            .and_then(|i| self.values.get(i))
            .is_some_and(|value| value.starts_with(b"100-"));

        let mut builder = Request::builder().method(method).uri(uri).version(version);
        if let Some(header_map) = builder.headers_mut() {
            *header_map = headers;
        }
        let request = builder.body(body).map_err(|_| self.reject(ParseError::InvalidUri))?;

        self.pending =
            Some(Pending { request, sender, should_keep_alive: head.should_keep_alive });
        Ok(())
    }

    fn on_body(&mut self, chunk: &[u8]) -> CallbackResult {
        if let Some(sender) = self.pending.as_ref().and_then(|p| p.sender.as_ref()) {
            sender.push(Bytes::copy_from_slice(chunk));
        }
        Ok(())
    }

    fn on_message_complete(&mut self) -> CallbackResult {
        if let Some(pending) = self.pending.take() {
            if let Some(sender) = pending.sender {
                sender.complete();
            }
            self.completed = Some(CompletedMessage {
                request: pending.request,
                should_keep_alive: pending.should_keep_alive,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use indoc::indoc;

    fn session() -> ParseSession {
        ParseSession::new(Origin { secure: false, host: "fallback.example".into() })
    }

    #[tokio::test]
    async fn parses_get_with_query_string() {
        let mut session = session();
        let raw = indoc! {"
            GET /test?a=b&c=d HTTP/1.1\r
            Host: example.com\r
            Accept: */*\r
            \r
        "};

        let feed = session.feed(raw.as_bytes()).unwrap();
        assert_eq!(feed.consumed, raw.len());

        let message = feed.message.unwrap();
        assert!(message.should_keep_alive);

        let request = message.request;
        assert_eq!(request.method(), Method::GET);
        assert_eq!(request.uri().to_string(), "http://example.com/test?a=b&c=d");
        assert_eq!(request.uri().query(), Some("a=b&c=d"));
        assert_eq!(request.version(), Version::HTTP_11);
        assert_eq!(request.headers().get("accept").unwrap(), "*/*");

        let body = request.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn parses_post_body_before_surfacing_request() {
        let mut session = session();
        let raw = "POST /submit HTTP/1.1\r\nHost: example.com\r\nContent-Length: 11\r\n\r\nhello world";

        let feed = session.feed(raw.as_bytes()).unwrap();
        let request = feed.message.unwrap().request;
        assert_eq!(request.method(), Method::POST);

        let body = request.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"hello world"));
    }

    #[test]
    fn missing_host_falls_back_to_session_origin() {
        let mut session = session();
        let raw = "GET /path HTTP/1.0\r\n\r\n";

        let feed = session.feed(raw.as_bytes()).unwrap();
        let message = feed.message.unwrap();
        assert!(!message.should_keep_alive);
        assert_eq!(message.request.uri().to_string(), "http://fallback.example/path");
    }

    #[test]
    fn absolute_form_target_is_kept_verbatim() {
        let mut session = session();
        let raw = "GET https://other.example/abs HTTP/1.1\r\nHost: example.com\r\n\r\n";

        let feed = session.feed(raw.as_bytes()).unwrap();
        let uri = feed.message.unwrap().request.uri().clone();
        assert_eq!(uri.scheme_str(), Some("https"));
        assert_eq!(uri.host(), Some("other.example"));
        assert_eq!(uri.path(), "/abs");
    }

    #[test]
    fn header_split_across_feeds_is_reassembled() {
        let mut session = session();
        let first = "GET / HTTP/1.1\r\nHost: exam";
        let second = "ple.com\r\nX-Cust";
        let third = "om: split-value\r\n\r\n";

        assert!(session.feed(first.as_bytes()).unwrap().message.is_none());
        assert!(session.feed(second.as_bytes()).unwrap().message.is_none());

        let message = session.feed(third.as_bytes()).unwrap().message.unwrap();
        let request = message.request;
        assert_eq!(request.uri().host(), Some("example.com"));
        assert_eq!(request.headers().get("x-custom").unwrap(), "split-value");
    }

    #[test]
    fn session_resets_between_keep_alive_messages() {
        let mut session = session();
        let raw = "GET /one HTTP/1.1\r\nHost: a.example\r\n\r\nGET /two HTTP/1.1\r\nHost: b.example\r\n\r\n";

        let first = session.feed(raw.as_bytes()).unwrap();
        assert!(first.consumed < raw.len());
        assert_eq!(first.message.unwrap().request.uri().to_string(), "http://a.example/one");

        let second = session.feed(&raw.as_bytes()[first.consumed..]).unwrap();
        assert_eq!(second.message.unwrap().request.uri().to_string(), "http://b.example/two");
        assert!(session.is_idle());
    }

    #[test]
    fn malformed_input_reports_reason_until_destroy() {
        let mut session = session();
        let result = session.feed(b"BOGUS-METHOD / HTTP/1.1\r\n\r\n");

        assert!(matches!(result, Err(ParseError::Engine(EngineError::Parse { .. }))));
        assert!(session.error_reason().is_some());

        session.destroy();
        assert!(session.error_reason().is_none());

        // A destroyed session stays destroyed.
        session.destroy();
        assert!(session.feed(b"GET / HTTP/1.1\r\n\r\n").is_err());
    }
}
