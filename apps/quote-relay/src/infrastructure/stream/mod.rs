//! Price Stream Adapters
//!
//! Everything needed to keep one persistent connection to a
//! price-distribution endpoint alive:
//!
//! - `supervisor`: connection state machine, replay and outbound queue
//! - `reconnect`: exponential backoff with an attempt ceiling
//! - `frames`: JSON wire codec
//! - `websocket`: `tokio-tungstenite` transport

pub mod frames;
pub mod reconnect;
pub mod supervisor;
pub mod websocket;

pub use frames::{CodecError, FrameCodec};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use supervisor::{LinkStatus, StreamSupervisor, SupervisorConfig};
pub use websocket::WebSocketConnector;
