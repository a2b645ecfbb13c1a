//! Client builder and request engine.
//!
//! A [`Client`] owns one connection. The send side is used by the
//! caller; a dedicated background task owns the receive side:
//!
//! ```text
//! caller ── send_request ──► socket ──► server
//!                                          │
//! on_complete ◄── receive task ◄── socket ◄┘
//! ```
//!
//! At most one request may be outstanding per connection. The receive
//! task hands the raw reply to that request's `on_complete`, or, if the
//! connection ends first, a transport error. Either way `on_complete`
//! runs exactly once.
//!
//! # Example
//!
//! ```ignore
//! use localrpc::{Address, Client, Reply, TaggedValue};
//!
//! let client = Client::connect(Address::abstract_name("demo")).await?;
//!
//! // Callback style
//! client
//!     .send_request("INCREMENT", TaggedValue::Int32(3), |result| {
//!         println!("{:?}", result.and_then(|raw| raw.decode()));
//!     })
//!     .await?;
//!
//! // Await style
//! let reply = client.request("INCREMENT", TaggedValue::Int32(3)).await?;
//! assert_eq!(reply, Reply::Ok(TaggedValue::Int32(4)));
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::error::{RpcError, Result};
use crate::protocol::{
    encode_message, parse_reply, peek_frame_kind, Frame, FrameKind, Reply, TaggedValue,
    DEFAULT_MAX_MESSAGE_SIZE,
};
use crate::transport::{Address, Connection, ConnectionReader, ConnectionWriter, Received};

/// A reply as received, classified by kind but not yet decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReply {
    kind: FrameKind,
    bytes: Bytes,
}

impl RawReply {
    /// Classify raw frame bytes. Fails unless they start with a reply kind.
    pub fn new(bytes: Bytes) -> Result<Self> {
        let kind = peek_frame_kind(&bytes)?;
        if !kind.is_reply() {
            return Err(RpcError::malformed("expected reply, got request"));
        }
        Ok(Self { kind, bytes })
    }

    /// Get the reply kind.
    #[inline]
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Check if this is an error reply.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.kind == FrameKind::ReplyError
    }

    /// Get the raw frame bytes.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decode into the success value or the error message.
    pub fn decode(&self) -> Result<Reply> {
        parse_reply(&self.bytes)
    }
}

/// Callback invoked once with the outcome of a request.
type Completion = Box<dyn FnOnce(Result<RawReply>) + Send + 'static>;

/// Request slot of one connection.
enum Pending {
    Idle,
    Waiting(Completion),
    Closed,
}

/// State shared between the caller side and the receive task.
struct Shared {
    pending: Mutex<Pending>,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a completion if no request is in flight.
    fn begin(&self, on_complete: Completion) -> Result<()> {
        let mut pending = self.lock();
        match *pending {
            Pending::Idle => {
                *pending = Pending::Waiting(on_complete);
                Ok(())
            }
            Pending::Waiting(_) => Err(RpcError::RequestInFlight),
            Pending::Closed => Err(RpcError::ConnectionClosed),
        }
    }

    /// Take the waiting completion, leaving the slot idle.
    fn take(&self) -> Option<Completion> {
        let mut pending = self.lock();
        match std::mem::replace(&mut *pending, Pending::Idle) {
            Pending::Waiting(on_complete) => Some(on_complete),
            other => {
                *pending = other;
                None
            }
        }
    }

    /// Mark the connection closed and fail any waiting completion.
    fn close(&self, error: RpcError) {
        let previous = std::mem::replace(&mut *self.lock(), Pending::Closed);
        if let Pending::Waiting(on_complete) = previous {
            on_complete(Err(error));
        }
    }

    fn is_closed(&self) -> bool {
        matches!(*self.lock(), Pending::Closed)
    }

    fn is_waiting(&self) -> bool {
        matches!(*self.lock(), Pending::Waiting(_))
    }
}

/// Builder for configuring and connecting a client.
pub struct ClientBuilder {
    address: Address,
    max_message_size: usize,
}

impl ClientBuilder {
    /// Create a new client builder for `address`.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Set the largest reply message accepted from the server.
    ///
    /// Default: 16 MiB
    pub fn max_message_size(mut self, limit: usize) -> Self {
        self.max_message_size = limit;
        self
    }

    /// Connect and start the receive task.
    pub async fn connect(self) -> Result<Client> {
        let mut conn = Connection::connect(&self.address).await?;
        conn.set_max_message_size(self.max_message_size);
        tracing::debug!("Connected to {}", self.address);
        Ok(Client::start(self.address, conn))
    }
}

/// A connected client.
pub struct Client {
    address: Address,
    writer: Arc<AsyncMutex<ConnectionWriter>>,
    shared: Arc<Shared>,
    receive_task: Option<JoinHandle<()>>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder(address: Address) -> ClientBuilder {
        ClientBuilder::new(address)
    }

    /// Connect with default settings.
    pub async fn connect(address: Address) -> Result<Self> {
        ClientBuilder::new(address).connect().await
    }

    fn start(address: Address, conn: Connection) -> Self {
        let (reader, writer) = conn.into_split();
        let shared = Arc::new(Shared {
            pending: Mutex::new(Pending::Idle),
        });
        let receive_task = tokio::spawn(receive_loop(reader, shared.clone()));

        Self {
            address,
            writer: Arc::new(AsyncMutex::new(writer)),
            shared,
            receive_task: Some(receive_task),
        }
    }

    /// Send one request; `on_complete` runs on the receive task.
    ///
    /// Returns once the request frame is written. If this returns an
    /// error, `on_complete` is never called. Otherwise it is called
    /// exactly once, with the raw reply or with a transport error.
    ///
    /// Fails with `RequestInFlight` if the previous request has not
    /// completed yet.
    ///
    /// Dropping the returned future before the write finishes closes
    /// the connection; `on_complete` then receives `ConnectionClosed`.
    pub async fn send_request<F>(
        &self,
        name: &str,
        value: TaggedValue,
        on_complete: F,
    ) -> Result<()>
    where
        F: FnOnce(Result<RawReply>) + Send + 'static,
    {
        let message = encode_message(&Frame::request(name, value))?;
        self.shared.begin(Box::new(on_complete))?;

        let guard = WriteGuard {
            client: self,
            armed: true,
        };
        let written = {
            let mut writer = self.writer.lock().await;
            writer.send_encoded(&message).await
        };
        guard.disarm();

        if let Err(e) = written {
            tracing::warn!("Failed to send {:?} to {}: {}", name, self.address, e);
            // Reclaim the completion; if the receive task already
            // failed it, the caller has its outcome.
            if self.shared.take().is_some() {
                self.shared.close(RpcError::ConnectionClosed);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Send one request and wait for its reply.
    pub async fn request(&self, name: &str, value: TaggedValue) -> Result<Reply> {
        let (tx, rx) = oneshot::channel();
        self.send_request(name, value, move |result| {
            let _ = tx.send(result);
        })
        .await?;

        match rx.await {
            Ok(result) => result?.decode(),
            Err(_) => Err(RpcError::ConnectionClosed),
        }
    }

    /// Get the server address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Check if a request is waiting for its reply.
    pub fn is_request_pending(&self) -> bool {
        self.shared.is_waiting()
    }

    /// Check if the connection has ended.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Close the connection.
    ///
    /// A request still in flight completes with `ConnectionClosed`.
    pub async fn destroy(mut self) {
        self.shared.close(RpcError::ConnectionClosed);
        if let Some(task) = self.receive_task.take() {
            task.abort();
            let _ = task.await;
        }
        let _ = self.writer.lock().await.shutdown().await;
        tracing::debug!("Client for {} destroyed", self.address);
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shared.close(RpcError::ConnectionClosed);
        if let Some(task) = self.receive_task.take() {
            task.abort();
        }
    }
}

/// Closes the connection if `send_request` is dropped mid-write.
///
/// A partly written frame leaves the stream unusable.
struct WriteGuard<'a> {
    client: &'a Client,
    armed: bool,
}

impl WriteGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!(
            "Request to {} cancelled, closing connection",
            self.client.address
        );
        self.client.shared.close(RpcError::ConnectionClosed);

        let writer = self.client.writer.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = writer.lock().await.shutdown().await;
            });
        }
    }
}

/// Receive replies and hand each to the waiting completion.
///
/// Runs until the peer closes or the stream fails, then fails any
/// waiting completion with that outcome.
async fn receive_loop(mut reader: ConnectionReader, shared: Arc<Shared>) {
    let error = loop {
        let bytes = match reader.receive().await {
            Ok(Received::Message(bytes)) => bytes,
            Ok(Received::PeerClosed) => break RpcError::ConnectionClosed,
            Err(e) => break e,
        };

        let reply = match RawReply::new(bytes) {
            Ok(reply) => reply,
            Err(e) => break e,
        };

        match shared.take() {
            Some(on_complete) => on_complete(Ok(reply)),
            None => break RpcError::malformed("reply received with no request in flight"),
        }
    };

    tracing::debug!("Receive loop ended: {}", error);
    shared.close(error);
}

/// Connect to a server at `address` in the chosen namespace.
pub async fn create_client(address: &str, use_abstract_namespace: bool) -> Result<Client> {
    Client::connect(Address::new(address, use_abstract_namespace)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Listener;

    async fn pair() -> (tempfile::TempDir, Listener, Client) {
        let dir = tempfile::tempdir().unwrap();
        let address = Address::pathname(dir.path().join("client.sock").to_string_lossy());
        let listener = Listener::bind(&address).await.unwrap();
        let client = Client::connect(address).await.unwrap();
        (dir, listener, client)
    }

    #[test]
    fn test_raw_reply_classification() {
        let ok = Frame::reply_ok(TaggedValue::Int32(4)).to_vec();
        let ok = RawReply::new(Bytes::from(ok)).unwrap();
        assert_eq!(ok.kind(), FrameKind::ReplyOk);
        assert!(!ok.is_error());
        assert_eq!(ok.decode().unwrap(), Reply::Ok(TaggedValue::Int32(4)));

        let err = RawReply::new(Bytes::from(Frame::reply_error("no").to_vec())).unwrap();
        assert!(err.is_error());
        assert_eq!(err.decode().unwrap(), Reply::Error("no".to_string()));

        let request = Bytes::from(Frame::request("x", TaggedValue::None).to_vec());
        assert!(RawReply::new(request).is_err());
        assert!(RawReply::new(Bytes::new()).is_err());
    }

    #[test]
    fn test_builder_configuration() {
        let builder = Client::builder(Address::abstract_name("cfg")).max_message_size(512);
        assert_eq!(builder.max_message_size, 512);
    }

    #[tokio::test]
    async fn test_completion_receives_reply() {
        let (_dir, listener, client) = pair().await;
        let mut server = listener.accept().await.unwrap();

        let (tx, rx) = oneshot::channel();
        client
            .send_request("INCREMENT", TaggedValue::Int32(3), move |result| {
                let _ = tx.send(result);
            })
            .await
            .unwrap();
        assert!(client.is_request_pending());

        let Received::Message(bytes) = server.receive().await.unwrap() else {
            panic!("expected request");
        };
        assert_eq!(
            Frame::decode(&bytes).unwrap(),
            Frame::request("INCREMENT", TaggedValue::Int32(3))
        );
        server.send_frame(&Frame::reply_ok(TaggedValue::Int32(4))).await.unwrap();

        let raw = rx.await.unwrap().unwrap();
        assert_eq!(raw.decode().unwrap(), Reply::Ok(TaggedValue::Int32(4)));
        assert!(!client.is_request_pending());
    }

    #[tokio::test]
    async fn test_second_request_in_flight_rejected() {
        let (_dir, listener, client) = pair().await;
        let _server = listener.accept().await.unwrap();

        client.send_request("A", TaggedValue::None, |_| {}).await.unwrap();
        let err = client
            .send_request("B", TaggedValue::None, |_| panic!("must not be called"))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::RequestInFlight));
    }

    #[tokio::test]
    async fn test_cancelled_send_closes_connection() {
        let (_dir, listener, client) = pair().await;
        let mut server = listener.accept().await.unwrap();

        // Far larger than the socket buffer; the peer is not reading yet.
        let big = TaggedValue::from("x".repeat(4 * 1024 * 1024));
        let (tx, rx) = oneshot::channel();
        let sent = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            client.send_request("BIG", big, move |result| {
                let _ = tx.send(result);
            }),
        )
        .await;
        assert!(sent.is_err(), "write should still be blocked");

        assert!(client.is_closed());
        assert!(!client.is_request_pending());
        assert!(matches!(rx.await.unwrap(), Err(RpcError::ConnectionClosed)));
        assert!(matches!(
            client.send_request("NEXT", TaggedValue::None, |_| {}).await,
            Err(RpcError::ConnectionClosed)
        ));

        // The truncated frame ends in an error on the peer, not a hang.
        let received = tokio::time::timeout(std::time::Duration::from_secs(5), server.receive())
            .await
            .expect("peer must see the write side close");
        assert!(matches!(received, Err(RpcError::Io(_))));
    }

    #[tokio::test]
    async fn test_peer_close_fails_pending_request() {
        let (_dir, listener, client) = pair().await;
        let mut server = listener.accept().await.unwrap();

        let (tx, rx) = oneshot::channel();
        client
            .send_request("SLOW", TaggedValue::None, move |result| {
                let _ = tx.send(result);
            })
            .await
            .unwrap();

        // Read the request, then hang up without replying.
        assert!(matches!(server.receive().await.unwrap(), Received::Message(_)));
        drop(server);

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), rx)
            .await
            .expect("completion must fire")
            .unwrap();
        assert!(matches!(result, Err(RpcError::ConnectionClosed)));
        assert!(client.is_closed());

        assert!(matches!(
            client.request("AGAIN", TaggedValue::None).await,
            Err(RpcError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_destroy_fails_pending_request() {
        let (_dir, listener, client) = pair().await;
        let _server = listener.accept().await.unwrap();

        let (tx, rx) = oneshot::channel();
        client
            .send_request("SLOW", TaggedValue::None, move |result| {
                let _ = tx.send(result);
            })
            .await
            .unwrap();

        client.destroy().await;
        assert!(matches!(rx.await.unwrap(), Err(RpcError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_unsolicited_reply_closes_connection() {
        let (_dir, listener, client) = pair().await;
        let mut server = listener.accept().await.unwrap();

        server.send_frame(&Frame::reply_ok(TaggedValue::None)).await.unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !client.is_closed() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("client should close");
    }

    #[tokio::test]
    async fn test_request_frame_from_server_fails_request() {
        let (_dir, listener, client) = pair().await;
        let mut server = listener.accept().await.unwrap();

        let request = tokio::spawn(async move { client.request("Q", TaggedValue::None).await });
        assert!(matches!(server.receive().await.unwrap(), Received::Message(_)));
        server.send_frame(&Frame::request("bogus", TaggedValue::None)).await.unwrap();

        let result = request.await.unwrap();
        assert!(matches!(result, Err(RpcError::Malformed(_))));
    }
}
