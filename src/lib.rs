//! An asynchronous HTTP/1.1 server engine
//!
//! This crate implements the wire side of an HTTP/1.1 server on top of
//! tokio: an incremental request parser driven through callbacks, a
//! per-connection lifecycle with keep-alive, pipelining and idle timeouts,
//! and a response serializer with chunked transfer encoding.
//!
//! # Features
//!
//! - Incremental, fragmentation-safe HTTP/1.1 request parsing
//! - Handle-addressed parser pool shared across connections
//! - Keep-alive with idle timeout and per-connection request caps
//! - Pipelined requests replayed from leftover bytes, never dropped
//! - Streaming response bodies with chunked transfer encoding
//! - Expect-continue handling
//!
//! # Example
//!
//! ```no_run
//! use std::convert::Infallible;
//!
//! use http::{Request, Response};
//! use filament_http::handler::make_handler;
//! use filament_http::protocol::{ReqBody, ResponseBody};
//! use filament_http::server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let handler = make_handler(|request: Request<ReqBody>| async move {
//!         let greeting = format!("Hello from {}!\r\n", request.uri().path());
//!         Ok::<_, Infallible>(Response::new(ResponseBody::full(greeting)))
//!     });
//!
//!     let config = ServerConfig { port: 8080, ..Default::default() };
//!     let handle = Server::new(config, handler).listen().await?;
//!     println!("listening on {}", handle.local_addr());
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`engine`]: handle-addressed pool of byte-level parser state machines
//! - [`parser`]: per-connection session turning parser callbacks into requests
//! - [`protocol`]: shared message, body and error types
//! - [`codec`]: response serialization for the write half
//! - [`connection`]: request/response loop for one socket
//! - [`handler`]: the request handler trait and function adapter
//! - [`server`]: TCP accept loop and graceful shutdown
//!
//! # Limitations
//!
//! - HTTP/1.x only; no TLS and no HTTP/2 or later
//! - Request parsing only; this is a server, not a client
//! - No routing or middleware, handlers see raw requests

pub mod codec;
pub mod connection;
pub mod engine;
pub mod handler;
pub mod parser;
pub mod protocol;
pub mod server;
