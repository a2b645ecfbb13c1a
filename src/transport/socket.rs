//! Unix domain socket listener and connection.
//!
//! Two addressing modes:
//! - pathname: backed by a filesystem entry, removed before bind and
//!   again when the listener is dropped
//! - abstract (Linux only): lives in the abstract socket namespace, no
//!   cleanup needed
//!
//! # Example
//!
//! ```ignore
//! use localrpc::transport::{Address, Connection, Listener};
//!
//! let address = Address::pathname("/tmp/localrpc-demo.sock");
//! let listener = Listener::bind(&address).await?;
//! let mut conn = listener.accept().await?;
//! ```

use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};

use crate::error::{RpcError, Result};
use crate::protocol::{encode_message, frame_message, Frame, FrameBuffer, DEFAULT_MAX_MESSAGE_SIZE};

/// Size of the scratch buffer used for each socket read.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Generate a socket name unique to this process and moment.
///
/// Format: `localrpc-{pid}-{random}`. Usable directly as an abstract
/// name, or joined onto a directory for pathname mode.
pub fn generate_socket_name() -> String {
    format!("localrpc-{}-{:x}", std::process::id(), rand_u64())
}

/// Simple random u64 using system time, process ID and a counter.
fn rand_u64() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id() as u64;

    (nanos ^ seq.rotate_left(32)).wrapping_mul(0x517c_c1b7_2722_0a95) ^ pid
}

/// Where a channel lives.
///
/// Server and client must agree on both the name and the mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    name: String,
    use_abstract_namespace: bool,
}

impl Address {
    /// Create an address from a name and addressing mode flag.
    pub fn new(name: impl Into<String>, use_abstract_namespace: bool) -> Self {
        Self {
            name: name.into(),
            use_abstract_namespace,
        }
    }

    /// Filesystem-backed address.
    pub fn pathname(path: impl Into<String>) -> Self {
        Self::new(path, false)
    }

    /// Abstract-namespace address.
    pub fn abstract_name(name: impl Into<String>) -> Self {
        Self::new(name, true)
    }

    /// Get the address string.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if this address uses the abstract namespace.
    pub fn is_abstract(&self) -> bool {
        self.use_abstract_namespace
    }

    /// Filesystem path, for pathname addresses.
    pub fn path(&self) -> Option<&Path> {
        (!self.use_abstract_namespace).then(|| Path::new(&self.name))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.use_abstract_namespace {
            write!(f, "@{}", self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}

#[cfg(target_os = "linux")]
fn bind_abstract(name: &str) -> Result<UnixListener> {
    use std::os::linux::net::SocketAddrExt;

    let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
    let listener = std::os::unix::net::UnixListener::bind_addr(&addr)?;
    listener.set_nonblocking(true)?;
    Ok(UnixListener::from_std(listener)?)
}

/// Connects on the blocking pool; std has no non-blocking connect for
/// abstract addresses.
#[cfg(target_os = "linux")]
async fn connect_abstract(name: &str) -> Result<UnixStream> {
    use std::os::linux::net::SocketAddrExt;

    let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
    let stream = tokio::task::spawn_blocking(move || {
        std::os::unix::net::UnixStream::connect_addr(&addr)
    })
    .await
    .map_err(io::Error::other)??;
    stream.set_nonblocking(true)?;
    Ok(UnixStream::from_std(stream)?)
}

#[cfg(not(target_os = "linux"))]
fn bind_abstract(name: &str) -> Result<UnixListener> {
    Err(RpcError::UnsupportedAddress(format!(
        "abstract namespace is Linux-only: @{}",
        name
    )))
}

#[cfg(not(target_os = "linux"))]
async fn connect_abstract(name: &str) -> Result<UnixStream> {
    Err(RpcError::UnsupportedAddress(format!(
        "abstract namespace is Linux-only: @{}",
        name
    )))
}

/// Filesystem entry created by a pathname bind.
///
/// Identified by device and inode, so removal leaves alone a newer
/// socket bound at the same path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketFile {
    path: PathBuf,
    dev: u64,
    ino: u64,
}

impl SocketFile {
    fn capture(path: PathBuf) -> io::Result<Self> {
        let meta = std::fs::symlink_metadata(&path)?;
        Ok(Self {
            path,
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    /// Get the socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the entry if it is still the one this bind created.
    ///
    /// Returns `true` if the entry was removed.
    pub fn remove(&self) -> bool {
        match std::fs::symlink_metadata(&self.path) {
            Ok(meta) if meta.dev() == self.dev && meta.ino() == self.ino => {
                std::fs::remove_file(&self.path).is_ok()
            }
            Ok(_) => {
                tracing::debug!("Socket {} was rebound, leaving it", self.path.display());
                false
            }
            Err(_) => false,
        }
    }
}

/// Unix domain socket listener.
///
/// Pathname listeners remove their socket file when dropped.
pub struct Listener {
    listener: UnixListener,
    address: Address,
    socket_file: Option<SocketFile>,
}

impl Listener {
    /// Bind a listener at `address`.
    ///
    /// For pathname addresses any existing entry is removed first.
    pub async fn bind(address: &Address) -> Result<Self> {
        if address.is_abstract() {
            let listener = bind_abstract(address.name())?;
            return Ok(Self {
                listener,
                address: address.clone(),
                socket_file: None,
            });
        }

        let path = PathBuf::from(address.name());
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!("Removed stale socket {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(RpcError::Io(e)),
        }

        let listener = UnixListener::bind(&path)?;
        let socket_file = match SocketFile::capture(path.clone()) {
            Ok(socket_file) => socket_file,
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                return Err(RpcError::Io(e));
            }
        };
        Ok(Self {
            listener,
            address: address.clone(),
            socket_file: Some(socket_file),
        })
    }

    /// Accept a single connection.
    pub async fn accept(&self) -> Result<Connection> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(Connection::new(stream))
    }

    /// Get the bound address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Filesystem entry owned by this listener, for pathname addresses.
    pub fn socket_file(&self) -> Option<&SocketFile> {
        self.socket_file.as_ref()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(socket_file) = self.socket_file.take() {
            socket_file.remove();
        }
    }
}

/// Outcome of a receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// One complete message (frame bytes, no length prefix).
    Message(Bytes),
    /// The peer closed the stream cleanly between messages.
    PeerClosed,
}

/// A connected byte stream carrying length-prefixed messages.
pub struct Connection {
    reader: ConnectionReader,
    writer: ConnectionWriter,
}

impl Connection {
    fn new(stream: UnixStream) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: ConnectionReader::new(read, DEFAULT_MAX_MESSAGE_SIZE),
            writer: ConnectionWriter { write },
        }
    }

    /// Connect to a listening server.
    pub async fn connect(address: &Address) -> Result<Self> {
        let stream = if address.is_abstract() {
            connect_abstract(address.name()).await?
        } else {
            UnixStream::connect(address.name()).await?
        };
        Ok(Self::new(stream))
    }

    /// Change the largest message this connection will accept.
    ///
    /// Bytes already buffered are kept.
    pub fn set_max_message_size(&mut self, max_message_size: usize) {
        self.reader.buffer.set_max_message_size(max_message_size);
    }

    /// Send one message (frame bytes, prefixed here).
    pub async fn send(&mut self, frame_bytes: &[u8]) -> Result<()> {
        self.writer.send(frame_bytes).await
    }

    /// Encode and send one frame.
    pub async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        self.writer.send_frame(frame).await
    }

    /// Block until one full message arrives or the peer closes.
    pub async fn receive(&mut self) -> Result<Received> {
        self.reader.receive().await
    }

    /// Split into read and write halves.
    pub fn into_split(self) -> (ConnectionReader, ConnectionWriter) {
        (self.reader, self.writer)
    }
}

/// Receive half of a [`Connection`].
pub struct ConnectionReader {
    read: OwnedReadHalf,
    buffer: FrameBuffer,
    scratch: Vec<u8>,
}

impl ConnectionReader {
    fn new(read: OwnedReadHalf, max_message_size: usize) -> Self {
        Self {
            read,
            buffer: FrameBuffer::with_max_message_size(max_message_size),
            scratch: vec![0u8; READ_CHUNK_SIZE],
        }
    }

    /// Block until one full message arrives or the peer closes.
    ///
    /// EOF between messages is `PeerClosed`; EOF inside a message is an
    /// `UnexpectedEof` I/O error.
    pub async fn receive(&mut self) -> Result<Received> {
        loop {
            if let Some(message) = self.buffer.try_extract_one()? {
                return Ok(Received::Message(message));
            }

            let n = self.read.read(&mut self.scratch).await?;
            if n == 0 {
                if self.buffer.is_at_boundary() {
                    return Ok(Received::PeerClosed);
                }
                return Err(RpcError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("peer closed with {} bytes of a partial message", self.buffer.len()),
                )));
            }
            self.buffer.extend(&self.scratch[..n]);
        }
    }
}

/// Send half of a [`Connection`].
pub struct ConnectionWriter {
    write: OwnedWriteHalf,
}

impl ConnectionWriter {
    /// Send one message (frame bytes, prefixed here).
    pub async fn send(&mut self, frame_bytes: &[u8]) -> Result<()> {
        let message = frame_message(frame_bytes)?;
        self.send_encoded(&message).await
    }

    /// Encode and send one frame.
    pub async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        let message = encode_message(frame)?;
        self.send_encoded(&message).await
    }

    /// Send a message that already carries its length prefix.
    pub async fn send_encoded(&mut self, message: &[u8]) -> Result<()> {
        self.write.write_all(message).await?;
        Ok(())
    }

    /// Shut down the write direction; the peer sees EOF.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.write.shutdown().await?;
        Ok(())
    }
}
