//! # localrpc
//!
//! Minimal local request/reply IPC over Unix domain sockets.
//!
//! A long-lived process exposes named operations with a [`Server`];
//! short-lived local peers call them through a [`Client`].
//!
//! ## Layers
//!
//! - **protocol**: tagged values, request/reply frames, length-prefixed framing
//! - **transport**: pathname and abstract-namespace socket listener/connection
//! - **handler**: name → handler registry with exactly-one-reply dispatch
//! - **server** / **client**: serve loops and the request/completion engine
//!
//! ## Example
//!
//! ```ignore
//! use localrpc::{Address, Client, Reply, Server, TaggedValue};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let address = Address::abstract_name("demo");
//!     let server = Server::builder(address.clone())
//!         .handler("INCREMENT", |_conn, _name, value| match value {
//!             TaggedValue::Int32(n) => Ok(TaggedValue::Int32(n + 1)),
//!             _ => Err("expected int32".to_string()),
//!         })
//!         .start()
//!         .await?;
//!
//!     let client = Client::connect(address).await?;
//!     let reply = client.request("INCREMENT", TaggedValue::Int32(3)).await?;
//!     assert_eq!(reply, Reply::Ok(TaggedValue::Int32(4)));
//!
//!     client.destroy().await;
//!     server.destroy().await;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod handler;
pub mod protocol;
pub mod transport;

mod client;
mod server;

pub use client::{create_client, Client, ClientBuilder, RawReply};
pub use error::{Result, RpcError};
pub use handler::{ConnectionId, HandlerResult};
pub use protocol::{Frame, Reply, TaggedValue};
pub use server::{create_server, Server, ServerBuilder};
pub use transport::Address;
