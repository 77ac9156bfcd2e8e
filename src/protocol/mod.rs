//! Application protocol cycles.
//!
//! # Data Flow
//! ```text
//! bridge
//!     → enqueue inbound messages (http.request | websocket.connect + websocket.receive)
//!     → run(application)
//!         ├── HttpCycle: collect response-start + body chunks → CycleResult
//!         └── WebSocketCycle: relay each websocket.send → CycleResult (status only)
//! ```
//!
//! # Design Decisions
//! - One cycle per invocation; cycles are consumed by `run`
//! - Application failures never escape a cycle; they become a generic result
//! - The lifespan task is the only long-lived piece and is owned by the bridge

pub mod cycle;
pub mod http;
pub mod lifespan;
pub mod message;
pub mod scope;
pub mod websocket;

pub use cycle::{
    AppError, Application, BodyEncoding, CycleConfig, CycleError, CycleResult, Inbound, Outbound,
};
pub use http::{HttpCycle, HttpCycleState};
pub use lifespan::{Lifespan, LifespanError};
pub use message::{InboundMessage, OutboundMessage, Payload};
pub use scope::{ConnectionScope, Headers, InvocationMetadata, ScopeKind};
pub use websocket::{WebSocketCycle, WebSocketCycleState};
