//! Byte-level HTTP/1.1 request grammar as a restartable state machine.
//!
//! The machine consumes raw bytes in arbitrary-sized fragments and reports
//! structure through synchronous [`Callbacks`]. It keeps no heap state of its
//! own beyond a few fixed-size scratch buffers: URL and header bytes are
//! handed to the callbacks as borrowed spans and must be copied by the
//! receiver if kept. A span callback may fire several times for one logical
//! element when the element straddles an `execute` boundary; continuation is
//! the receiver's concern.
//!
//! After each complete message the machine pauses and reports how many bytes
//! it consumed, leaving pipelined bytes untouched for the caller to replay.

use tracing::trace;

use super::EngineError;

/// Recognized request methods, indexed by method code.
pub(crate) const METHODS: [&str; 9] =
    ["GET", "HEAD", "POST", "PUT", "DELETE", "CONNECT", "OPTIONS", "TRACE", "PATCH"];

/// Resolves a method code reported in [`MessageHead`] back to its token.
pub fn method_name(code: u8) -> Option<&'static str> {
    METHODS.get(code as usize).copied()
}

const MAX_METHOD_LEN: usize = 7;
const MAX_SPECIAL_NAME_LEN: usize = 17; // "transfer-encoding"
const MAX_SPECIAL_VALUE_LEN: usize = 64;

/// Returned by a callback to abort the current message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reject;

pub type CallbackResult = Result<(), Reject>;

/// Structured facts about a message, reported once headers are complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHead {
    /// Method code, resolvable through [`method_name`].
    pub method: u8,
    pub version_major: u8,
    pub version_minor: u8,
    /// Keep-alive verdict from the protocol version and `Connection` tokens.
    pub should_keep_alive: bool,
    pub framing: BodyFraming,
}

/// How the message body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body follows the headers.
    None,
    /// `Content-Length` body of exactly this many bytes.
    Length(u64),
    /// `Transfer-Encoding: chunked` body.
    Chunked,
}

/// Event sink for [`Machine::execute`].
///
/// Span arguments borrow from the buffer passed to `execute` and are only
/// valid for the duration of the call.
pub trait Callbacks {
    fn on_message_begin(&mut self) -> CallbackResult {
        Ok(())
    }

    fn on_url(&mut self, _raw: &[u8]) -> CallbackResult {
        Ok(())
    }

    fn on_header_field(&mut self, _raw: &[u8]) -> CallbackResult {
        Ok(())
    }

    fn on_header_value(&mut self, _raw: &[u8]) -> CallbackResult {
        Ok(())
    }

    fn on_headers_complete(&mut self, _head: &MessageHead) -> CallbackResult {
        Ok(())
    }

    fn on_body(&mut self, _chunk: &[u8]) -> CallbackResult {
        Ok(())
    }

    fn on_message_complete(&mut self) -> CallbackResult {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Method,
    BeforeTarget,
    Target,
    BeforeVersion,
    VersionPrefix,
    VersionMajor,
    VersionDot,
    VersionMinor,
    RequestLineEnd,
    RequestLineLf,
    HeaderStart,
    HeaderField,
    HeaderValueStart,
    HeaderValue,
    HeaderLineLf,
    HeadersEndLf,
    BodyIdentity,
    ChunkSizeStart,
    ChunkSize,
    ChunkSizeLws,
    ChunkExtension,
    ChunkSizeLf,
    ChunkData,
    ChunkDataCr,
    ChunkDataLf,
    TrailerStart,
    TrailerLine,
    TrailerLineLf,
    TrailerEndLf,
    Dead,
}

/// Header names the machine itself must understand to frame the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Special {
    None,
    ContentLength,
    TransferEncoding,
    Connection,
}

/// Incremental HTTP/1.1 request parser.
///
/// One machine parses one connection's byte stream, message after message.
/// State never leaks between messages: all per-message bookkeeping is reset
/// when the first byte of the next request arrives.
#[derive(Debug)]
pub struct Machine {
    state: State,
    reason: Option<&'static str>,

    method_buf: [u8; MAX_METHOD_LEN],
    method_len: usize,
    method_code: u8,
    version_idx: usize,
    version_minor: u8,

    special: Special,
    special_name: [u8; MAX_SPECIAL_NAME_LEN],
    special_name_len: usize,
    name_overflow: bool,
    special_value: [u8; MAX_SPECIAL_VALUE_LEN],
    special_value_len: usize,
    value_overflow: bool,
    value_emitted: bool,

    content_length: Option<u64>,
    chunked: bool,
    conn_close: bool,
    conn_keep_alive: bool,
    remaining: u64,
}

impl Machine {
    pub fn new() -> Self {
        Self {
            state: State::Start,
            reason: None,
            method_buf: [0; MAX_METHOD_LEN],
            method_len: 0,
            method_code: 0,
            version_idx: 0,
            version_minor: 0,
            special: Special::None,
            special_name: [0; MAX_SPECIAL_NAME_LEN],
            special_name_len: 0,
            name_overflow: false,
            special_value: [0; MAX_SPECIAL_VALUE_LEN],
            special_value_len: 0,
            value_overflow: false,
            value_emitted: false,
            content_length: None,
            chunked: false,
            conn_close: false,
            conn_keep_alive: false,
            remaining: 0,
        }
    }

    /// Human-readable reason for the failure that killed this machine.
    pub fn error_reason(&self) -> Option<&'static str> {
        self.reason
    }

    /// True while the machine sits at a message boundary.
    pub fn is_idle(&self) -> bool {
        self.state == State::Start
    }

    /// Drives the grammar across `buf`, invoking callbacks as structure is
    /// recognized.
    ///
    /// Returns the number of bytes consumed. The machine pauses after each
    /// `on_message_complete`, so the return value may be less than
    /// `buf.len()` when pipelined bytes follow; feed the remainder to parse
    /// the next message.
    pub fn execute<C: Callbacks>(&mut self, cb: &mut C, buf: &[u8]) -> Result<usize, EngineError> {
        if self.state == State::Dead {
            let reason = self.reason.unwrap_or("parser previously failed");
            return Err(EngineError::Parse { reason });
        }

        let len = buf.len();
        let mut i = 0;
        // Continuation of a span interrupted by the previous execute call.
        let mut span: Option<usize> =
            matches!(self.state, State::Target | State::HeaderField | State::HeaderValue).then_some(0);

        while i < len {
            let b = buf[i];

            match self.state {
                State::Start => match b {
                    // stray CRLF between pipelined messages
                    b'\r' | b'\n' => {}
                    _ if b.is_ascii_uppercase() => {
                        cb.on_message_begin().map_err(|_| self.abort())?;
                        self.reset_message();
                        self.method_buf[0] = b;
                        self.method_len = 1;
                        self.state = State::Method;
                    }
                    _ => return Err(self.die("invalid method token")),
                },

                State::Method => match b {
                    b' ' => {
                        self.resolve_method()?;
                        self.state = State::BeforeTarget;
                    }
                    _ if b.is_ascii_uppercase() => {
                        if self.method_len == MAX_METHOD_LEN {
                            return Err(self.die("unknown method"));
                        }
                        self.method_buf[self.method_len] = b;
                        self.method_len += 1;
                    }
                    _ => return Err(self.die("invalid method token")),
                },

                State::BeforeTarget => match b {
                    b' ' => {}
                    b'\r' | b'\n' => return Err(self.die("missing request target")),
                    _ if is_target_byte(b) => {
                        span = Some(i);
                        self.state = State::Target;
                    }
                    _ => return Err(self.die("invalid request target")),
                },

                State::Target => match b {
                    b' ' => {
                        self.flush_span(cb, buf, &mut span, i)?;
                        self.state = State::BeforeVersion;
                    }
                    b'\r' | b'\n' => return Err(self.die("missing HTTP version")),
                    _ if is_target_byte(b) => {}
                    _ => return Err(self.die("invalid request target")),
                },

                State::BeforeVersion => match b {
                    b' ' => {}
                    b'H' => {
                        self.version_idx = 1;
                        self.state = State::VersionPrefix;
                    }
                    _ => return Err(self.die("invalid HTTP version")),
                },

                State::VersionPrefix => {
                    const PREFIX: &[u8] = b"HTTP/";
                    if self.version_idx < PREFIX.len() && b == PREFIX[self.version_idx] {
                        self.version_idx += 1;
                        if self.version_idx == PREFIX.len() {
                            self.state = State::VersionMajor;
                        }
                    } else {
                        return Err(self.die("invalid HTTP version"));
                    }
                }

                State::VersionMajor => match b {
                    b'1' => self.state = State::VersionDot,
                    b'0'..=b'9' => return Err(self.die("unsupported HTTP version")),
                    _ => return Err(self.die("invalid HTTP version")),
                },

                State::VersionDot => match b {
                    b'.' => self.state = State::VersionMinor,
                    _ => return Err(self.die("invalid HTTP version")),
                },

                State::VersionMinor => match b {
                    b'0' => {
                        self.version_minor = 0;
                        self.state = State::RequestLineEnd;
                    }
                    b'1' => {
                        self.version_minor = 1;
                        self.state = State::RequestLineEnd;
                    }
                    b'2'..=b'9' => return Err(self.die("unsupported HTTP version")),
                    _ => return Err(self.die("invalid HTTP version")),
                },

                State::RequestLineEnd => match b {
                    b'\r' => self.state = State::RequestLineLf,
                    b'\n' => self.state = State::HeaderStart,
                    _ => return Err(self.die("invalid request line")),
                },

                State::RequestLineLf => match b {
                    b'\n' => self.state = State::HeaderStart,
                    _ => return Err(self.die("expected line feed after request line")),
                },

                State::HeaderStart => match b {
                    b'\r' => self.state = State::HeadersEndLf,
                    b'\n' => {
                        if let Some(consumed) = self.headers_done(cb, i)? {
                            return Ok(consumed);
                        }
                    }
                    b' ' | b'\t' => return Err(self.die("folded header lines are not supported")),
                    _ if is_token_byte(b) => {
                        span = Some(i);
                        self.push_special_name(b);
                        self.state = State::HeaderField;
                    }
                    _ => return Err(self.die("invalid header field name")),
                },

                State::HeaderField => match b {
                    b':' => {
                        self.flush_span(cb, buf, &mut span, i)?;
                        self.special = self.classify_special_name();
                        self.special_value_len = 0;
                        self.value_overflow = false;
                        self.value_emitted = false;
                        self.state = State::HeaderValueStart;
                    }
                    _ if is_token_byte(b) => self.push_special_name(b),
                    _ => return Err(self.die("invalid header field name")),
                },

                State::HeaderValueStart => match b {
                    b' ' | b'\t' => {}
                    b'\r' => self.state = State::HeaderLineLf,
                    b'\n' => {
                        self.finish_header_line(cb)?;
                        self.state = State::HeaderStart;
                    }
                    _ if is_value_byte(b) => {
                        span = Some(i);
                        self.push_special_value(b);
                        self.state = State::HeaderValue;
                    }
                    _ => return Err(self.die("invalid header value")),
                },

                State::HeaderValue => match b {
                    b'\r' => {
                        self.flush_span(cb, buf, &mut span, i)?;
                        self.state = State::HeaderLineLf;
                    }
                    b'\n' => {
                        self.flush_span(cb, buf, &mut span, i)?;
                        self.finish_header_line(cb)?;
                        self.state = State::HeaderStart;
                    }
                    _ if is_value_byte(b) => self.push_special_value(b),
                    _ => return Err(self.die("invalid header value")),
                },

                State::HeaderLineLf => match b {
                    b'\n' => {
                        self.finish_header_line(cb)?;
                        self.state = State::HeaderStart;
                    }
                    _ => return Err(self.die("expected line feed after header line")),
                },

                State::HeadersEndLf => match b {
                    b'\n' => {
                        if let Some(consumed) = self.headers_done(cb, i)? {
                            return Ok(consumed);
                        }
                    }
                    _ => return Err(self.die("expected line feed after headers")),
                },

                State::BodyIdentity => {
                    let take = self.remaining.min((len - i) as u64) as usize;
                    cb.on_body(&buf[i..i + take]).map_err(|_| self.abort())?;
                    self.remaining -= take as u64;
                    i += take;
                    if self.remaining == 0 {
                        return self.finish_message(cb, i);
                    }
                    continue;
                }

                State::ChunkSizeStart => match hex_digit(b) {
                    Some(v) => {
                        self.remaining = u64::from(v);
                        self.state = State::ChunkSize;
                    }
                    None => return Err(self.die("invalid chunk size")),
                },

                State::ChunkSize => match b {
                    b';' => self.state = State::ChunkExtension,
                    b' ' | b'\t' => self.state = State::ChunkSizeLws,
                    b'\r' => self.state = State::ChunkSizeLf,
                    b'\n' => self.chunk_size_done(),
                    _ => match hex_digit(b) {
                        Some(v) => {
                            self.remaining = self
                                .remaining
                                .checked_mul(16)
                                .and_then(|n| n.checked_add(u64::from(v)))
                                .ok_or_else(|| self.die("chunk size overflow"))?;
                        }
                        None => return Err(self.die("invalid chunk size")),
                    },
                },

                State::ChunkSizeLws => match b {
                    b' ' | b'\t' => {}
                    b';' => self.state = State::ChunkExtension,
                    b'\r' => self.state = State::ChunkSizeLf,
                    b'\n' => self.chunk_size_done(),
                    _ => return Err(self.die("invalid chunk size line")),
                },

                State::ChunkExtension => match b {
                    b'\r' => self.state = State::ChunkSizeLf,
                    b'\n' => self.chunk_size_done(),
                    _ => {}
                },

                State::ChunkSizeLf => match b {
                    b'\n' => self.chunk_size_done(),
                    _ => return Err(self.die("expected line feed after chunk size")),
                },

                State::ChunkData => {
                    let take = self.remaining.min((len - i) as u64) as usize;
                    trace!(len = take, "read chunk data");
                    cb.on_body(&buf[i..i + take]).map_err(|_| self.abort())?;
                    self.remaining -= take as u64;
                    i += take;
                    if self.remaining == 0 {
                        self.state = State::ChunkDataCr;
                    }
                    continue;
                }

                State::ChunkDataCr => match b {
                    b'\r' => self.state = State::ChunkDataLf,
                    b'\n' => self.state = State::ChunkSizeStart,
                    _ => return Err(self.die("expected CRLF after chunk data")),
                },

                State::ChunkDataLf => match b {
                    b'\n' => self.state = State::ChunkSizeStart,
                    _ => return Err(self.die("expected line feed after chunk data")),
                },

                State::TrailerStart => match b {
                    b'\r' => self.state = State::TrailerEndLf,
                    b'\n' => return self.finish_message(cb, i + 1),
                    _ => self.state = State::TrailerLine,
                },

                // Trailer fields are tolerated and discarded.
                State::TrailerLine => match b {
                    b'\r' => self.state = State::TrailerLineLf,
                    b'\n' => self.state = State::TrailerStart,
                    _ => {}
                },

                State::TrailerLineLf => match b {
                    b'\n' => self.state = State::TrailerStart,
                    _ => return Err(self.die("expected line feed after trailer line")),
                },

                State::TrailerEndLf => match b {
                    b'\n' => return self.finish_message(cb, i + 1),
                    _ => return Err(self.die("expected line feed at end of trailers")),
                },

                State::Dead => unreachable!("execute checked for dead state"),
            }

            i += 1;
        }

        // Emit the span still open at the end of the buffer, if any.
        if let Some(s) = span {
            if s < len {
                match self.state {
                    State::Target => cb.on_url(&buf[s..]).map_err(|_| self.abort())?,
                    State::HeaderField => cb.on_header_field(&buf[s..]).map_err(|_| self.abort())?,
                    State::HeaderValue => {
                        self.value_emitted = true;
                        cb.on_header_value(&buf[s..]).map_err(|_| self.abort())?;
                    }
                    _ => {}
                }
            }
        }

        Ok(len)
    }

    fn flush_span<C: Callbacks>(
        &mut self,
        cb: &mut C,
        buf: &[u8],
        span: &mut Option<usize>,
        end: usize,
    ) -> Result<(), EngineError> {
        if let Some(s) = span.take() {
            if s == end {
                return Ok(());
            }
            let bytes = &buf[s..end];
            match self.state {
                State::Target => cb.on_url(bytes).map_err(|_| self.abort())?,
                State::HeaderField => cb.on_header_field(bytes).map_err(|_| self.abort())?,
                State::HeaderValue => {
                    self.value_emitted = true;
                    cb.on_header_value(bytes).map_err(|_| self.abort())?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn reset_message(&mut self) {
        self.method_len = 0;
        self.method_code = 0;
        self.version_idx = 0;
        self.version_minor = 0;
        self.special = Special::None;
        self.special_name_len = 0;
        self.name_overflow = false;
        self.special_value_len = 0;
        self.value_overflow = false;
        self.value_emitted = false;
        self.content_length = None;
        self.chunked = false;
        self.conn_close = false;
        self.conn_keep_alive = false;
        self.remaining = 0;
    }

    fn resolve_method(&mut self) -> Result<(), EngineError> {
        let token = &self.method_buf[..self.method_len];
        match METHODS.iter().position(|m| m.as_bytes() == token) {
            Some(code) => {
                self.method_code = code as u8;
                Ok(())
            }
            None => Err(self.die("unknown method")),
        }
    }

    fn push_special_name(&mut self, b: u8) {
        if self.special_name_len == MAX_SPECIAL_NAME_LEN {
            self.name_overflow = true;
            return;
        }
        self.special_name[self.special_name_len] = b.to_ascii_lowercase();
        self.special_name_len += 1;
    }

    fn push_special_value(&mut self, b: u8) {
        if self.special == Special::None {
            return;
        }
        if self.special_value_len == MAX_SPECIAL_VALUE_LEN {
            self.value_overflow = true;
            return;
        }
        self.special_value[self.special_value_len] = b;
        self.special_value_len += 1;
    }

    fn classify_special_name(&self) -> Special {
        if self.name_overflow {
            return Special::None;
        }
        match &self.special_name[..self.special_name_len] {
            b"content-length" => Special::ContentLength,
            b"transfer-encoding" => Special::TransferEncoding,
            b"connection" => Special::Connection,
            _ => Special::None,
        }
    }

    /// Closes out one header line: guarantees a value callback fired for the
    /// line (so field/value events stay paired) and applies framing headers.
    fn finish_header_line<C: Callbacks>(&mut self, cb: &mut C) -> Result<(), EngineError> {
        if !self.value_emitted {
            cb.on_header_value(&[]).map_err(|_| self.abort())?;
        }
        self.process_special()?;
        self.special = Special::None;
        self.special_name_len = 0;
        self.name_overflow = false;
        self.special_value_len = 0;
        self.value_overflow = false;
        self.value_emitted = false;
        Ok(())
    }

    fn process_special(&mut self) -> Result<(), EngineError> {
        let value_len = self.special_value_len;
        match self.special {
            Special::None => Ok(()),

            Special::ContentLength => {
                if self.chunked {
                    return Err(self.die("both content-length and transfer-encoding present"));
                }
                if self.value_overflow {
                    return Err(self.die("invalid content-length"));
                }
                let value = {
                    let raw = trim_ascii(&self.special_value[..value_len]);
                    std::str::from_utf8(raw).ok().and_then(|s| s.parse::<u64>().ok())
                };
                let Some(n) = value else {
                    return Err(self.die("invalid content-length"));
                };
                match self.content_length {
                    Some(prev) if prev != n => Err(self.die("conflicting content-length headers")),
                    _ => {
                        self.content_length = Some(n);
                        Ok(())
                    }
                }
            }

            Special::TransferEncoding => {
                if self.content_length.is_some() {
                    return Err(self.die("both content-length and transfer-encoding present"));
                }
                if self.value_overflow {
                    return Err(self.die("invalid transfer-encoding"));
                }
                // chunked counts only as the final encoding, per RFC 9112 §6.1
                let last = self.special_value[..value_len].split(|b| *b == b',').next_back();
                if let Some(token) = last {
                    if trim_ascii(token).eq_ignore_ascii_case(b"chunked") {
                        self.chunked = true;
                    }
                }
                Ok(())
            }

            Special::Connection => {
                if !self.value_overflow {
                    for token in self.special_value[..value_len].split(|b| *b == b',') {
                        let token = trim_ascii(token);
                        if token.eq_ignore_ascii_case(b"close") {
                            self.conn_close = true;
                        } else if token.eq_ignore_ascii_case(b"keep-alive") {
                            self.conn_keep_alive = true;
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Fires `on_headers_complete` and switches to body parsing.
    ///
    /// Returns `Some(consumed)` when the message has no body and therefore
    /// completed on the spot.
    fn headers_done<C: Callbacks>(&mut self, cb: &mut C, i: usize) -> Result<Option<usize>, EngineError> {
        let framing = if self.chunked {
            BodyFraming::Chunked
        } else {
            match self.content_length {
                Some(0) | None => BodyFraming::None,
                Some(n) => BodyFraming::Length(n),
            }
        };

        let should_keep_alive = if self.conn_close {
            false
        } else if self.version_minor >= 1 {
            true
        } else {
            self.conn_keep_alive
        };

        let head = MessageHead {
            method: self.method_code,
            version_major: 1,
            version_minor: self.version_minor,
            should_keep_alive,
            framing,
        };
        trace!(?head, "headers complete");
        cb.on_headers_complete(&head).map_err(|_| self.abort())?;

        match framing {
            BodyFraming::None => self.finish_message(cb, i + 1).map(Some),
            BodyFraming::Length(n) => {
                self.remaining = n;
                self.state = State::BodyIdentity;
                Ok(None)
            }
            BodyFraming::Chunked => {
                self.state = State::ChunkSizeStart;
                Ok(None)
            }
        }
    }

    fn chunk_size_done(&mut self) {
        if self.remaining == 0 {
            self.state = State::TrailerStart;
        } else {
            self.state = State::ChunkData;
        }
    }

    fn finish_message<C: Callbacks>(&mut self, cb: &mut C, consumed: usize) -> Result<usize, EngineError> {
        cb.on_message_complete().map_err(|_| self.abort())?;
        self.state = State::Start;
        Ok(consumed)
    }

    fn die(&mut self, reason: &'static str) -> EngineError {
        self.state = State::Dead;
        self.reason = Some(reason);
        EngineError::Parse { reason }
    }

    fn abort(&mut self) -> EngineError {
        self.state = State::Dead;
        self.reason = Some("aborted by callback");
        EngineError::Callback
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

fn is_value_byte(b: u8) -> bool {
    b == b'\t' || (b >= 0x20 && b != 0x7f)
}

fn is_target_byte(b: u8) -> bool {
    b > 0x20 && b != 0x7f
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn trim_ascii(mut s: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = s {
        if first.is_ascii_whitespace() {
            s = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = s {
        if last.is_ascii_whitespace() {
            s = rest;
        } else {
            break;
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Collects coalesced events the way a real session would, including
    /// field/value continuation across execute boundaries.
    #[derive(Debug, Default, Clone, PartialEq, Eq)]
    struct Recorder {
        begun: usize,
        url: Vec<u8>,
        fields: Vec<Vec<u8>>,
        values: Vec<Vec<u8>>,
        last_was_value: bool,
        head: Option<MessageHead>,
        body: Vec<u8>,
        completed: usize,
    }

    impl Callbacks for Recorder {
        fn on_message_begin(&mut self) -> CallbackResult {
            self.begun += 1;
            Ok(())
        }

        fn on_url(&mut self, raw: &[u8]) -> CallbackResult {
            self.url.extend_from_slice(raw);
            Ok(())
        }

        fn on_header_field(&mut self, raw: &[u8]) -> CallbackResult {
            if self.last_was_value || self.fields.is_empty() {
                self.fields.push(raw.to_vec());
            } else {
                self.fields.last_mut().unwrap().extend_from_slice(raw);
            }
            self.last_was_value = false;
            Ok(())
        }

        fn on_header_value(&mut self, raw: &[u8]) -> CallbackResult {
            if self.last_was_value {
                self.values.last_mut().unwrap().extend_from_slice(raw);
            } else {
                self.values.push(raw.to_vec());
            }
            self.last_was_value = true;
            Ok(())
        }

        fn on_headers_complete(&mut self, head: &MessageHead) -> CallbackResult {
            self.head = Some(head.clone());
            self.last_was_value = false;
            Ok(())
        }

        fn on_body(&mut self, chunk: &[u8]) -> CallbackResult {
            self.body.extend_from_slice(chunk);
            Ok(())
        }

        fn on_message_complete(&mut self) -> CallbackResult {
            self.completed += 1;
            Ok(())
        }
    }

    fn parse_whole(input: &[u8]) -> Recorder {
        let mut machine = Machine::new();
        let mut recorder = Recorder::default();
        let consumed = machine.execute(&mut recorder, input).unwrap();
        assert_eq!(consumed, input.len());
        assert_eq!(recorder.completed, 1);
        recorder
    }

    #[test]
    fn get_with_query_string() {
        let recorder = parse_whole(b"GET /test?a=b&c=d HTTP/1.1\r\nHost: x\r\n\r\n");

        let head = recorder.head.unwrap();
        assert_eq!(method_name(head.method), Some("GET"));
        assert_eq!((head.version_major, head.version_minor), (1, 1));
        assert!(head.should_keep_alive);
        assert_eq!(head.framing, BodyFraming::None);

        assert_eq!(recorder.url, b"/test?a=b&c=d");
        assert_eq!(recorder.fields, vec![b"Host".to_vec()]);
        assert_eq!(recorder.values, vec![b"x".to_vec()]);
    }

    #[test]
    fn post_with_content_length_body() {
        let recorder =
            parse_whole(b"POST /owo HTTP/1.1\r\nX: Y\r\nContent-Length: 9\r\n\r\nuh, meow?");

        let head = recorder.head.unwrap();
        assert_eq!(method_name(head.method), Some("POST"));
        assert_eq!(head.framing, BodyFraming::Length(9));
        assert_eq!(recorder.body, b"uh, meow?");
    }

    #[test]
    fn chunked_body_with_extensions_and_trailers() {
        let recorder = parse_whole(
            b"POST /upload HTTP/1.1\r\n\
              Transfer-Encoding: chunked\r\n\r\n\
              5;ext=1\r\nhello\r\n\
              7\r\n, world\r\n\
              0\r\nTrailer: ignored\r\n\r\n",
        );

        assert_eq!(recorder.head.unwrap().framing, BodyFraming::Chunked);
        assert_eq!(recorder.body, b"hello, world");
    }

    #[test]
    fn fragmentation_invariance() {
        let input: &[u8] = b"POST /items?page=2 HTTP/1.1\r\n\
              Host: example.com\r\n\
              X-Custom-Header: split me anywhere\r\n\
              Content-Length: 11\r\n\r\n\
              hello world";
        let expected = parse_whole(input);

        // Every two-fragment split must produce identical coalesced events.
        for split in 1..input.len() {
            let mut machine = Machine::new();
            let mut recorder = Recorder::default();
            let consumed = machine.execute(&mut recorder, &input[..split]).unwrap();
            assert_eq!(consumed, split);
            machine.execute(&mut recorder, &input[split..]).unwrap();
            assert_eq!(recorder, expected, "split at byte {split}");
        }

        // And so must feeding one byte at a time.
        let mut machine = Machine::new();
        let mut recorder = Recorder::default();
        for b in input {
            machine.execute(&mut recorder, std::slice::from_ref(b)).unwrap();
        }
        assert_eq!(recorder, expected);
    }

    #[test]
    fn pipelined_messages_pause_at_boundary() {
        let input: &[u8] = b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        let mut machine = Machine::new();
        let mut recorder = Recorder::default();

        let consumed = machine.execute(&mut recorder, input).unwrap();
        assert_eq!(consumed, 19);
        assert_eq!(recorder.completed, 1);
        assert_eq!(recorder.url, b"/a");

        let mut second = Recorder::default();
        let consumed = machine.execute(&mut second, &input[consumed..]).unwrap();
        assert_eq!(consumed, 19);
        assert_eq!(second.url, b"/b");
    }

    #[test]
    fn keep_alive_verdicts() {
        let v10_plain = parse_whole(b"GET / HTTP/1.0\r\n\r\n");
        assert!(!v10_plain.head.unwrap().should_keep_alive);

        let v10_keep = parse_whole(b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n");
        assert!(v10_keep.head.unwrap().should_keep_alive);

        let v11_plain = parse_whole(b"GET / HTTP/1.1\r\n\r\n");
        assert!(v11_plain.head.unwrap().should_keep_alive);

        let v11_close = parse_whole(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n");
        assert!(!v11_close.head.unwrap().should_keep_alive);
    }

    #[test]
    fn empty_header_value_keeps_lists_paired() {
        let recorder = parse_whole(b"GET / HTTP/1.1\r\nX-Empty:\r\nHost: y\r\n\r\n");
        assert_eq!(recorder.fields, vec![b"X-Empty".to_vec(), b"Host".to_vec()]);
        assert_eq!(recorder.values, vec![b"".to_vec(), b"y".to_vec()]);
    }

    #[test]
    fn conflicting_framing_headers_are_fatal() {
        let mut machine = Machine::new();
        let err = machine
            .execute(
                &mut Recorder::default(),
                b"POST / HTTP/1.1\r\nContent-Length: 3\r\nTransfer-Encoding: chunked\r\n\r\n",
            )
            .unwrap_err();
        assert_eq!(err, EngineError::Parse { reason: "both content-length and transfer-encoding present" });
        assert_eq!(machine.error_reason(), Some("both content-length and transfer-encoding present"));
    }

    #[test]
    fn unknown_method_is_fatal_and_machine_stays_dead() {
        let mut machine = Machine::new();
        let mut recorder = Recorder::default();
        assert!(machine.execute(&mut recorder, b"FLY / HTTP/1.1\r\n\r\n").is_err());
        assert!(machine.error_reason().is_some());

        // once dead, always dead
        assert!(machine.execute(&mut recorder, b"GET / HTTP/1.1\r\n\r\n").is_err());
    }

    #[test]
    fn bare_lf_line_endings_are_tolerated() {
        let recorder = parse_whole(b"GET /lf HTTP/1.1\nHost: x\n\n");
        assert_eq!(recorder.url, b"/lf");
        assert_eq!(recorder.values, vec![b"x".to_vec()]);
    }

    #[test]
    fn callback_rejection_aborts_execute() {
        struct RefuseBody;
        impl Callbacks for RefuseBody {
            fn on_body(&mut self, _chunk: &[u8]) -> CallbackResult {
                Err(Reject)
            }
        }

        let mut machine = Machine::new();
        let err = machine
            .execute(&mut RefuseBody, b"POST / HTTP/1.1\r\nContent-Length: 2\r\n\r\nhi")
            .unwrap_err();
        assert_eq!(err, EngineError::Callback);
    }
}
