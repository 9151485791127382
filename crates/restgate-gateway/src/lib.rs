//! RESTCONF gateway lifecycle.
//!
//! The gateway opens a schema context, builds the protocol handler tree over
//! the backend services, mounts it (plus the `/.well-known` discovery tree)
//! on an HTTP listener, and tears everything down in order on stop. The
//! listener is either owned by the gateway or shared with another component.

pub mod discovery;
pub mod handler;
pub mod lifecycle;
pub mod module;
pub mod schema;
pub mod server;

pub use discovery::RootDiscoveryEndpoint;
pub use handler::{ProtocolHandler, ProtocolHandlerFactory};
pub use lifecycle::{Lifecycle, LifecycleGroup};
pub use module::{GatewayModule, ListenerSlot, ModuleState};
pub use schema::{SchemaContextHandle, SchemaContextLifecycle};
pub use server::{HttpListener, ListenerState, SharedListener};
