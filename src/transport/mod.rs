//! Transport module - local stream sockets.
//!
//! Provides:
//! - Unix Domain Sockets addressed by filesystem path
//! - Linux abstract-namespace sockets
//!
//! Every message on the stream is prefixed with its u32 LE length.

mod socket;

pub use socket::{
    generate_socket_name, Address, Connection, ConnectionReader, ConnectionWriter, Listener,
    Received, SocketFile,
};
