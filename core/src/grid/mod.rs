//! # Grid Facade
//!
//! Thin facade over the external data grid's two primitives:
//!
//! - a replicated FIFO blocking collection per queue destination
//!   ([`GridQueue`]: `offer` / `poll`)
//! - a replicated publish/subscribe feed per topic destination
//!   ([`GridTopic`]: `publish` / `add_listener` / `remove_listener`)
//!
//! The grid itself (replication, partitioning, failover) is an external
//! collaborator; everything above this module only sees the traits. Items are
//! opaque bytes - the facade owns the [`Message`] encoding so no other layer
//! touches the wire representation of grid entries.
//!
//! [`LocalGrid`] is the in-process single-node implementation used by the
//! bundled server binary and the test suites.

pub mod local;
mod tests;

pub use local::LocalGrid;

use crate::protocol::Message;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Opaque handle identifying a registered topic listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(pub(crate) u64);

/// Access to named grid collections.
///
/// Handles are created on demand; asking for the same name twice returns
/// handles backed by the same replicated collection.
pub trait GridConnector: Send + Sync + 'static {
    fn queue(&self, name: &str) -> Arc<dyn GridQueue>;
    fn topic(&self, name: &str) -> Arc<dyn GridTopic>;

    /// Drop the named queue and everything in it.
    fn destroy_queue(&self, name: &str);

    /// Drop the named topic and detach all listeners.
    fn destroy_topic(&self, name: &str);
}

/// Replicated FIFO blocking collection.
#[async_trait]
pub trait GridQueue: Send + Sync {
    fn offer(&self, item: Bytes) -> Result<()>;

    /// Take the next item, waiting up to `timeout`. `Ok(None)` on timeout.
    /// A zero timeout polls without waiting.
    async fn poll(&self, timeout: Duration) -> Result<Option<Bytes>>;
}

/// Replicated publish/subscribe feed.
///
/// Listeners only observe items published after registration.
pub trait GridTopic: Send + Sync {
    fn publish(&self, item: Bytes) -> Result<()>;
    fn add_listener(&self, tx: mpsc::UnboundedSender<Bytes>) -> ListenerHandle;
    fn remove_listener(&self, handle: ListenerHandle);
}

/// Encode a message into the grid item representation.
pub fn encode_message(message: &Message) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(message)?))
}

/// Decode a grid item back into a message.
pub fn decode_message(item: &Bytes) -> Result<Message> {
    Ok(serde_json::from_slice(item)?)
}
