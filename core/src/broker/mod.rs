//! # GridMQ Broker Module
//!
//! The channel/session messaging engine: destination-addressed send and
//! receive on top of the grid facade.
//!
//! ## Architecture
//!
//! The engine is built around three types:
//!
//! - [`Broker`] - entry point holding the grid handle and configuration;
//!   the only way collaborators obtain contexts
//! - [`ChannelContext`] - owning scope for a set of channels and any
//!   temporary destinations it creates; closing it cascades
//! - [`Channel`] - one producer/consumer handle bound to a single
//!   destination, with timeout-bounded blocking receive
//!
//! ## Lifecycle
//!
//! A channel never outlives its context. Closing a context cancels every
//! in-flight `receive` (which returns a closed error rather than blocking),
//! closes every owned channel best-effort, and destroys every temporary
//! destination the context created - each exactly once.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use gridmq::broker::Broker;
//! use gridmq::config::BrokerConfig;
//! use gridmq::grid::LocalGrid;
//! use gridmq::protocol::{Destination, Message};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = Broker::new(Arc::new(LocalGrid::new()), BrokerConfig::default());
//!     let context = broker.create_context();
//!
//!     let destination = Destination::queue("demo.test");
//!     let channel = context.create_channel(&destination)?;
//!     channel.send(Message::new("Hello World!"))?;
//!
//!     let received = channel.receive(Duration::from_secs(1)).await?;
//!     assert!(received.is_some());
//!
//!     context.close();
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod context;

pub use channel::Channel;
pub use context::ChannelContext;

use crate::config::BrokerConfig;
use crate::grid::GridConnector;
use std::sync::Arc;

/// Messaging engine entry point.
///
/// Holds the explicit grid-facade handle; there is no process-wide grid
/// singleton.
pub struct Broker {
    grid: Arc<dyn GridConnector>,
    config: BrokerConfig,
}

impl Broker {
    pub fn new(grid: Arc<dyn GridConnector>, config: BrokerConfig) -> Self {
        Self { grid, config }
    }

    /// Open a new channel context scoped to this broker's grid.
    pub fn create_context(&self) -> ChannelContext {
        ChannelContext::new(Arc::clone(&self.grid))
    }

    pub fn grid(&self) -> &Arc<dyn GridConnector> {
        &self.grid
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }
}
