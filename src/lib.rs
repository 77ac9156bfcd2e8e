//! ASGI-style application bridge for per-event cloud functions.
//!
//! Runs an application written against the ASGI message protocol inside a
//! stateless function runtime, for HTTP requests and for WebSocket
//! connections that arrive as separate CONNECT / MESSAGE / DISCONNECT
//! invocations correlated by a connection id.

pub mod adapter;
pub mod aws;
pub mod config;
pub mod connection;
pub mod observability;
pub mod protocol;
pub mod store;

pub use adapter::{AdapterError, Bridge, InvocationResponse};
pub use config::schema::BridgeConfig;
pub use connection::{Connection, ConnectionError, ConnectionState};
pub use protocol::{Application, ConnectionScope, CycleResult, HttpCycle, WebSocketCycle};
pub use store::{ConnectionStore, StoreError};
