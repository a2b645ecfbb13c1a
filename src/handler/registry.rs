//! Handler registry for dispatching requests by name.
//!
//! The registry maps request names to handlers. It is owned by one
//! server instance and guarded by an internal lock, so handlers can be
//! registered while connections are being served.
//!
//! # Example
//!
//! ```
//! use localrpc::handler::HandlerRegistry;
//! use localrpc::protocol::{Reply, TaggedValue};
//! use localrpc::ConnectionId;
//!
//! let registry = HandlerRegistry::new();
//! registry.register("INCREMENT", |_conn: ConnectionId, _name: &str, value: TaggedValue| {
//!     value
//!         .as_i32()
//!         .map(|n| TaggedValue::Int32(n + 1))
//!         .ok_or_else(|| "expected int32".to_string())
//! });
//!
//! let reply = registry.dispatch(ConnectionId(1), "INCREMENT", TaggedValue::Int32(3));
//! assert_eq!(reply, Reply::Ok(TaggedValue::Int32(4)));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use crate::protocol::{Reply, TaggedValue};

/// Error message sent when no handler matches a request name.
pub const HANDLER_NOT_FOUND: &str = "request handler not found";

/// Error message sent when a handler panics.
pub const HANDLER_PANICKED: &str = "request handler panicked";

/// Identity of one accepted server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Result type for handler functions: a success value or an error message.
pub type HandlerResult = std::result::Result<TaggedValue, String>;

/// Trait for handler functions.
///
/// Handlers run inline on the connection's serve task. Long operations
/// should be offloaded by the handler itself.
pub trait Handler: Send + Sync + 'static {
    /// Handle one request.
    fn call(&self, connection: ConnectionId, name: &str, value: TaggedValue) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(ConnectionId, &str, TaggedValue) -> HandlerResult + Send + Sync + 'static,
{
    fn call(&self, connection: ConnectionId, name: &str, value: TaggedValue) -> HandlerResult {
        self(connection, name, value)
    }
}

/// Registry mapping request names to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`.
    ///
    /// A later registration under the same name replaces the earlier
    /// one. Returns `true` if a handler was replaced.
    pub fn register<F>(&self, name: &str, handler: F) -> bool
    where
        F: Fn(ConnectionId, &str, TaggedValue) -> HandlerResult + Send + Sync + 'static,
    {
        self.register_arc(name, Arc::new(handler))
    }

    /// Register an already shared handler.
    pub fn register_arc(&self, name: &str, handler: Arc<dyn Handler>) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let replaced = handlers.insert(name.to_string(), handler).is_some();
        if replaced {
            tracing::debug!("Replaced handler for {:?}", name);
        }
        replaced
    }

    /// Get a handler by request name.
    ///
    /// The lock is released before the handler is returned, so calling
    /// it never blocks registration.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        handlers.get(name).cloned()
    }

    /// Check if a handler is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Sorted list of registered request names.
    pub fn names(&self) -> Vec<String> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispatch a request and produce exactly one reply.
    ///
    /// Unknown names yield [`HANDLER_NOT_FOUND`]; a panicking handler
    /// yields [`HANDLER_PANICKED`].
    pub fn dispatch(&self, connection: ConnectionId, name: &str, value: TaggedValue) -> Reply {
        let Some(handler) = self.get(name) else {
            tracing::debug!("{}: no handler for {:?}", connection, name);
            return Reply::Error(HANDLER_NOT_FOUND.to_string());
        };

        match catch_unwind(AssertUnwindSafe(|| handler.call(connection, name, value))) {
            Ok(result) => result.into(),
            Err(_) => {
                tracing::error!("{}: handler for {:?} panicked", connection, name);
                Reply::Error(HANDLER_PANICKED.to_string())
            }
        }
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("names", &self.names())
            .finish()
    }
}
