//! Server builder and serve loops.
//!
//! The [`ServerBuilder`] provides a fluent API for registering handlers
//! and starting the server. The [`Server`] manages the lifecycle:
//! 1. Bind listener (removing a stale pathname entry)
//! 2. Accept connections on a background task
//! 3. Serve each connection on its own task: read request, dispatch,
//!    write exactly one reply, repeat
//! 4. On destroy: stop accepting, close every connection, remove the
//!    pathname entry
//!
//! # Example
//!
//! ```ignore
//! use localrpc::{Address, Server, TaggedValue};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder(Address::abstract_name("demo"))
//!         .handler("INCREMENT", |_conn, _name, value: TaggedValue| {
//!             value.as_i32().map(|n| TaggedValue::Int32(n + 1)).ok_or("expected int32".into())
//!         })
//!         .start()
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.destroy().await;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::error::{RpcError, Result};
use crate::handler::{ConnectionId, Handler, HandlerRegistry, HandlerResult};
use crate::protocol::{parse_request, Frame, TaggedValue, DEFAULT_MAX_MESSAGE_SIZE};
use crate::transport::{Address, Connection, Listener, Received, SocketFile};

/// Delay before retrying after a failed accept.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Builder for configuring and starting a server.
pub struct ServerBuilder {
    address: Address,
    registry: HandlerRegistry,
    max_message_size: usize,
}

impl ServerBuilder {
    /// Create a new server builder for `address`.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            registry: HandlerRegistry::new(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Register a request handler.
    pub fn handler<F>(self, name: &str, handler: F) -> Self
    where
        F: Fn(ConnectionId, &str, TaggedValue) -> HandlerResult + Send + Sync + 'static,
    {
        self.registry.register(name, handler);
        self
    }

    /// Set the largest request message accepted from a client.
    ///
    /// Default: 16 MiB
    pub fn max_message_size(mut self, limit: usize) -> Self {
        self.max_message_size = limit;
        self
    }

    /// Bind the listener and start accepting connections.
    pub async fn start(self) -> Result<Server> {
        Server::start(self.address, self.registry, self.max_message_size).await
    }
}

/// A running server.
///
/// Handlers may be registered at any time; registration is visible to
/// requests dispatched afterwards on every connection.
pub struct Server {
    address: Address,
    registry: Arc<HandlerRegistry>,
    shutdown: watch::Sender<bool>,
    socket_file: Option<SocketFile>,
    accept_task: Option<JoinHandle<()>>,
}

impl Server {
    /// Create a new server builder.
    pub fn builder(address: Address) -> ServerBuilder {
        ServerBuilder::new(address)
    }

    /// Start a server with no handlers registered yet.
    pub async fn create(address: Address) -> Result<Self> {
        ServerBuilder::new(address).start().await
    }

    async fn start(
        address: Address,
        registry: HandlerRegistry,
        max_message_size: usize,
    ) -> Result<Self> {
        let listener = Listener::bind(&address).await?;
        tracing::info!("Server listening on {}", address);

        let socket_file = listener.socket_file().cloned();
        let registry = Arc::new(registry);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            registry.clone(),
            shutdown_rx,
            max_message_size,
        ));

        Ok(Self {
            address,
            registry,
            shutdown,
            socket_file,
            accept_task: Some(accept_task),
        })
    }

    /// Register a request handler, replacing any handler of the same name.
    pub fn register_handler<F>(&self, name: &str, handler: F) -> bool
    where
        F: Fn(ConnectionId, &str, TaggedValue) -> HandlerResult + Send + Sync + 'static,
    {
        self.registry.register(name, handler)
    }

    /// Register an already shared handler.
    pub fn register_shared_handler(&self, name: &str, handler: Arc<dyn Handler>) -> bool {
        self.registry.register_arc(name, handler)
    }

    /// Sorted list of registered request names.
    pub fn handler_names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Get the bound address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Stop accepting, close every connection and remove the pathname
    /// entry.
    ///
    /// Clients with a request in flight observe the close as a
    /// transport error. A reply computed after this point is dropped.
    pub async fn destroy(mut self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.accept_task.take() {
            task.abort();
            // Dropping the task's state drops the listener and the
            // JoinSet, which aborts every connection task.
            let _ = task.await;
        }
        tracing::info!("Server on {} destroyed", self.address);
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.accept_task.take() {
            task.abort();
            // The listener is dropped later on the runtime; remove the
            // entry now, unless something else has bound the path since.
            if let Some(socket_file) = &self.socket_file {
                socket_file.remove();
            }
        }
    }
}

/// Accept connections and spawn one serve task for each.
///
/// Owns the listener and every connection task, so aborting this task
/// tears all of them down.
async fn accept_loop(
    listener: Listener,
    registry: Arc<HandlerRegistry>,
    shutdown: watch::Receiver<bool>,
    max_message_size: usize,
) {
    let mut connections = JoinSet::new();
    let mut next_id: u64 = 1;

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(mut conn) => {
                    let id = ConnectionId(next_id);
                    next_id += 1;
                    tracing::debug!("{}: accepted on {}", id, listener.address());

                    conn.set_max_message_size(max_message_size);
                    connections.spawn(serve_connection(
                        id,
                        conn,
                        registry.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    tracing::error!("Accept error on {}: {}", listener.address(), e);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            },
            Some(joined) = connections.join_next() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        tracing::error!("Connection task panicked: {}", e);
                    }
                }
            }
        }
    }
}

/// Serve one connection until the peer closes or the server stops.
///
/// Errors end this connection only.
async fn serve_connection(
    id: ConnectionId,
    mut conn: Connection,
    registry: Arc<HandlerRegistry>,
    mut shutdown: watch::Receiver<bool>,
) {
    match serve_requests(id, &mut conn, &registry, &mut shutdown).await {
        Ok(()) => tracing::debug!("{}: connection finished", id),
        Err(e) => tracing::warn!("{}: closing connection: {}", id, e),
    }
}

async fn serve_requests(
    id: ConnectionId,
    conn: &mut Connection,
    registry: &HandlerRegistry,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    loop {
        let received = tokio::select! {
            received = conn.receive() => received?,
            _ = shutdown.wait_for(|stopped| *stopped) => return Ok(()),
        };
        let message = match received {
            Received::Message(message) => message,
            Received::PeerClosed => return Ok(()),
        };

        let (name, value) = parse_request(&message)?;
        tracing::trace!("{}: request {:?}", id, name);

        let reply = registry.dispatch(id, &name, value);
        if *shutdown.borrow() {
            tracing::debug!("{}: server stopped, dropping reply to {:?}", id, name);
            return Ok(());
        }
        conn.send_frame(&Frame::from(reply)).await?;
    }
}

/// Start a server at `address` in the chosen namespace.
pub async fn create_server(address: &str, use_abstract_namespace: bool) -> Result<Server> {
    if address.is_empty() {
        return Err(RpcError::UnsupportedAddress("empty address".to_string()));
    }
    Server::create(Address::new(address, use_abstract_namespace)).await
}
