//! Handler module - request handling and dispatch.
//!
//! Provides:
//! - [`HandlerRegistry`] - maps request names to handlers
//! - [`Handler`] - implemented by any `Fn(ConnectionId, &str, TaggedValue) -> HandlerResult`
//!
//! Handlers return exactly one outcome; the server writes the reply.

mod registry;

pub use registry::{
    ConnectionId, Handler, HandlerRegistry, HandlerResult, HANDLER_NOT_FOUND, HANDLER_PANICKED,
};
