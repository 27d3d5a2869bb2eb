//! The parsing engine: a process-wide pool of incremental HTTP/1.1 parsers
//! addressed by opaque handles.
//!
//! The engine plays the role a precompiled parsing library would: callers
//! allocate a parser, repeatedly [`execute`](Engine::execute) byte buffers
//! against it while callbacks fire synchronously, and free it exactly once
//! when the connection closes. Parser state lives in a generation-tagged
//! [`Arena`], so a handle kept past its free is detected instead of reading
//! another connection's parser.
//!
//! One engine exists per process (see [`global`]); every connection allocates
//! its own handle from it. Handles from different connections never interact,
//! and `&mut` access through the lock guarantees at most one `execute` is in
//! flight per handle.

mod arena;
mod machine;

use std::sync::{Mutex, OnceLock};

use thiserror::Error;
use tracing::trace;

pub use arena::{Arena, Handle};
pub use machine::{
    BodyFraming, CallbackResult, Callbacks, Machine, MessageHead, Reject, method_name,
};

/// Failures surfaced by the engine boundary.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// The byte stream violated the HTTP/1.1 grammar.
    #[error("parse error: {reason}")]
    Parse { reason: &'static str },

    /// A callback refused the current message.
    #[error("message aborted by callback")]
    Callback,

    /// The handle was already freed, or never belonged to this engine.
    #[error("stale parser handle")]
    StaleHandle,
}

/// What kind of message a parser is allocated for.
///
/// Only request parsing exists today; the parameter keeps the allocation
/// contract explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParserKind {
    Request,
}

/// Pool of parser state machines addressed by [`Handle`].
#[derive(Debug, Default)]
pub struct Engine {
    parsers: Arena<Machine>,
}

impl Engine {
    pub fn new() -> Self {
        Self { parsers: Arena::new() }
    }

    /// Allocates a fresh parser and returns its handle.
    pub fn allocate(&mut self, kind: ParserKind) -> Handle {
        debug_assert!(matches!(kind, ParserKind::Request));
        let handle = self.parsers.insert(Machine::new());
        trace!(handle = handle.index(), "allocated parser");
        handle
    }

    /// Drives the parser behind `handle` across `buf`.
    ///
    /// Callbacks fire synchronously in the caller's stack frame; span
    /// arguments borrow from `buf` and must be copied if kept. Returns the
    /// number of bytes consumed — less than `buf.len()` when the parser
    /// paused at a message boundary with pipelined bytes left over.
    pub fn execute<C: Callbacks>(
        &mut self,
        handle: Handle,
        callbacks: &mut C,
        buf: &[u8],
    ) -> Result<usize, EngineError> {
        let machine = self.parsers.get_mut(handle).ok_or(EngineError::StaleHandle)?;
        machine.execute(callbacks, buf)
    }

    /// Human-readable reason for the parse failure on `handle`, if any.
    pub fn error_reason(&self, handle: Handle) -> Option<&'static str> {
        self.parsers.get(handle).and_then(Machine::error_reason)
    }

    /// True while the parser sits between messages.
    pub fn is_idle(&self, handle: Handle) -> bool {
        self.parsers.get(handle).is_some_and(Machine::is_idle)
    }

    /// Releases the parser behind `handle`.
    ///
    /// Freeing twice (or freeing a foreign handle) fails with
    /// [`EngineError::StaleHandle`] rather than touching another parser.
    pub fn free(&mut self, handle: Handle) -> Result<(), EngineError> {
        match self.parsers.remove(handle) {
            Some(_) => {
                trace!(handle = handle.index(), "freed parser");
                Ok(())
            }
            None => Err(EngineError::StaleHandle),
        }
    }

    /// Number of live parsers.
    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}

static ENGINE: OnceLock<Mutex<Engine>> = OnceLock::new();

/// The process-wide engine instance.
///
/// `execute` never awaits while holding the lock, so contention is bounded by
/// the synchronous parsing work itself.
pub fn global() -> &'static Mutex<Engine> {
    ENGINE.get_or_init(|| Mutex::new(Engine::new()))
}

/// Runs `f` with exclusive access to the global engine.
pub(crate) fn with_global<R>(f: impl FnOnce(&mut Engine) -> R) -> R {
    let mut guard = global().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut guard)
}
