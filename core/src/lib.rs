//! # GridMQ Core Library
//!
//! GridMQ layers queue and topic messaging over a distributed in-memory data
//! grid and bridges it to remote clients through a STOMP-style text wire
//! protocol.
//!
//! ## Architecture Overview
//!
//! - [`grid`] - facade over the grid's two primitives: a replicated FIFO
//!   blocking collection and a replicated publish/subscribe feed
//! - [`protocol`] - destination and message data model
//! - [`broker`] - channel engine: [`broker::Broker`],
//!   [`broker::ChannelContext`], [`broker::Channel`]
//! - [`request_reply`] - correlation-based request/reply with timeouts and
//!   temporary reply destinations
//! - [`stomp`] - wire adapter: frame codec, frame/message converter,
//!   per-connection sessions, TCP server
//! - [`config`] - broker and adapter configuration
//! - [`metrics`] - operational counters
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gridmq::{Broker, BrokerConfig, LocalGrid, StompServer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BrokerConfig::default().with_port(61613);
//!     let broker = Arc::new(Broker::new(Arc::new(LocalGrid::new()), config));
//!
//!     let server = StompServer::new(broker).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod config;
pub mod grid;
pub mod metrics;
pub mod protocol;
pub mod request_reply;
pub mod stomp;

pub use broker::{Broker, Channel, ChannelContext};
pub use config::BrokerConfig;
pub use grid::{GridConnector, GridQueue, GridTopic, LocalGrid};
pub use metrics::{BrokerMetrics, MetricsSnapshot};
pub use protocol::{Destination, DestinationKind, HeaderValue, Headers, Message};
pub use request_reply::RequestReplyCoordinator;
pub use stomp::{Command, Frame, FrameConverter, StompServer};

use thiserror::Error;

/// GridMQ error types.
///
/// # Error Categories
///
/// - **Lifecycle**: operations on closed contexts or channels
/// - **Request/Reply**: correlated replies that never arrive in time
/// - **Wire**: frame codec and frame/message conversion failures
/// - **Grid**: connectivity loss to the backing data grid
#[derive(Debug, Error)]
pub enum GridMqError {
    /// Operation attempted on a closed channel context or channel. Never
    /// retried automatically.
    #[error("channel context is closed")]
    ContextClosed,

    /// No correlated reply arrived within the configured window.
    #[error("no reply within {timeout_ms}ms")]
    RequestTimeout { timeout_ms: u64 },

    /// Inbound frame could not be mapped to a message.
    #[error("conversion error: {0}")]
    Conversion(#[from] stomp::ConversionError),

    /// Wire framing failure.
    #[error("codec error: {0}")]
    Codec(#[from] stomp::StompCodecError),

    /// Connectivity to the backing grid was lost; affected contexts are
    /// invalidated and must be recreated by the caller.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// Protocol state machine violation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Configuration validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// Grid item serialization failure.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias used throughout GridMQ.
pub type Result<T> = std::result::Result<T, GridMqError>;
