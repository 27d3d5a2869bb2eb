//! TCP accept loop and server lifecycle.
//!
//! [`Server::listen`] binds a listener and returns a [`ServerHandle`]; the
//! accept loop runs in the background, spawning one task per connection.
//! [`ServerHandle::close`] stops accepting, cancels in-flight connections
//! and waits for their tasks to finish.

use std::fmt::Display;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body::Body;
use tokio::net::TcpListener;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::connection::{ConnectionConfig, HttpConnection};
use crate::handler::Handler;
use crate::parser::Origin;
use crate::protocol::HttpError;

type ErrorCallback = Arc<dyn Fn(&HttpError) + Send + Sync>;

/// Server-wide tunables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Idle limit between requests on a keep-alive connection.
    pub keep_alive_timeout: Duration,
    /// Requests served on one connection before it is closed.
    pub max_requests_per_connection: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            keep_alive_timeout: Duration::from_secs(5),
            max_requests_per_connection: 1000,
        }
    }
}

/// An HTTP server ready to bind.
pub struct Server<H> {
    handler: Arc<H>,
    config: ServerConfig,
    on_error: Option<ErrorCallback>,
}

impl<H> Server<H>
where
    H: Handler + 'static,
    H::Error: Send,
    H::RespBody: Body<Data = Bytes> + Unpin + Send,
    <H::RespBody as Body>::Error: Display + Send,
{
    pub fn new(config: ServerConfig, handler: H) -> Self {
        Self { handler: Arc::new(handler), config, on_error: None }
    }

    /// Registers a callback invoked for every connection-level failure.
    ///
    /// Failures are connection-scoped and already logged; this hook exists
    /// for metrics or custom reporting.
    pub fn on_error(mut self, f: impl Fn(&HttpError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Binds the listener and starts accepting in the background.
    pub async fn listen(self) -> io::Result<ServerHandle> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "listening");

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        let accept_cancel = cancel.clone();
        let accept_tracker = tracker.clone();
        let handler = self.handler;
        let config = self.config;
        let on_error = self.on_error;

        tracker.spawn(async move {
            loop {
                let accepted = select! {
                    _ = accept_cancel.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };

                let (stream, remote_addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(cause = %e, "failed to accept");
                        continue;
                    }
                };

                debug!(%remote_addr, "accepted connection");
                let connection_config = ConnectionConfig {
                    keep_alive_timeout: config.keep_alive_timeout,
                    max_requests: config.max_requests_per_connection,
                    origin: Origin { secure: false, host: local_addr.to_string() },
                    remote_addr: Some(remote_addr),
                };

                let handler = handler.clone();
                let connection_cancel = accept_cancel.clone();
                let on_error = on_error.clone();
                accept_tracker.spawn(async move {
                    let (reader, writer) = stream.into_split();
                    let connection = HttpConnection::new(reader, writer, connection_config);

                    select! {
                        result = connection.process(handler) => match result {
                            Ok(()) => debug!(%remote_addr, "connection finished"),
                            Err(e) => {
                                error!(%remote_addr, cause = %e, "connection failed");
                                if let Some(on_error) = &on_error {
                                    on_error(&e);
                                }
                            }
                        },
                        _ = connection_cancel.cancelled() => {
                            debug!(%remote_addr, "connection cancelled by shutdown");
                        }
                    }
                });
            }
            info!("accept loop stopped");
        });

        Ok(ServerHandle { local_addr, cancel, tracker })
    }
}

/// Control handle for a running server.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: std::net::SocketAddr,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl ServerHandle {
    /// Address the listener actually bound, useful with port 0.
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Stops accepting, cancels open connections and waits for all tasks.
    pub async fn close(self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
