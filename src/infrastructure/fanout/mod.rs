//! Fan-out stage: client registry, downstream WebSocket server, and the
//! periodic broadcaster.

/// Tenant clients and their connection sets.
pub mod registry;

/// `/ws` server and broadcaster.
pub mod server;

pub use registry::{Client, ClientRegistry, ConnectionId};
pub use server::{FanoutServer, FanoutServerError, FanoutState};
