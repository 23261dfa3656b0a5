//! Channel: one producer/consumer handle bound to a destination.

use super::context::ContextInner;
use crate::grid::{self, GridQueue, GridTopic, ListenerHandle};
use crate::protocol::{now_millis, Destination, DestinationKind, Message};
use crate::{GridMqError, Result};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Send/receive handle on one destination, scoped to one context.
///
/// `receive` has three distinguishable outcomes: `Ok(Some(message))`,
/// `Ok(None)` when the timeout elapses with nothing available, and
/// `Err(GridMqError::ContextClosed)` when the channel or its context is
/// closed - including while a receive is parked.
pub struct Channel {
    inner: Arc<ChannelInner>,
}

pub(crate) struct ChannelInner {
    destination: Destination,
    context: Arc<ContextInner>,
    cancel: CancellationToken,
    closed: AtomicBool,
    binding: Binding,
}

/// Grid-side binding, fixed at channel creation by the destination kind.
enum Binding {
    Queue {
        queue: Arc<dyn GridQueue>,
    },
    Topic {
        topic: Arc<dyn GridTopic>,
        listener: ListenerHandle,
        rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
    },
}

impl Channel {
    pub(crate) fn open(
        destination: Destination,
        context: Arc<ContextInner>,
        cancel: CancellationToken,
    ) -> Self {
        let binding = match destination.kind {
            DestinationKind::Queue => Binding::Queue {
                queue: context.grid().queue(&destination.name),
            },
            DestinationKind::Topic => {
                let topic = context.grid().topic(&destination.name);
                let (tx, rx) = mpsc::unbounded_channel();
                let listener = topic.add_listener(tx);
                Binding::Topic {
                    topic,
                    listener,
                    rx: tokio::sync::Mutex::new(rx),
                }
            }
        };
        Self {
            inner: Arc::new(ChannelInner {
                destination,
                context,
                cancel,
                closed: AtomicBool::new(false),
                binding,
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<ChannelInner> {
        &self.inner
    }

    pub fn destination(&self) -> &Destination {
        &self.inner.destination
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Publish a message to the bound destination.
    ///
    /// The message is stamped with the send time so its time-to-live counts
    /// from here. Queue sends place the item in the shared FIFO collection;
    /// topic sends fan out to all current subscribers.
    pub fn send(&self, message: Message) -> Result<()> {
        if self.inner.is_closed() {
            return Err(GridMqError::ContextClosed);
        }

        let mut message = message;
        message.timestamp_ms = now_millis();
        let item = grid::encode_message(&message)?;

        match &self.inner.binding {
            Binding::Queue { queue } => queue.offer(item),
            Binding::Topic { topic, .. } => topic.publish(item),
        }
    }

    /// Block the calling task up to `timeout` for the next message.
    ///
    /// Queue channels see messages in FIFO order; topic channels see messages
    /// published after the channel was created, in publish order. Expired
    /// messages are dropped, not returned.
    pub async fn receive(&self, timeout: Duration) -> Result<Option<Message>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.inner.is_closed() {
                return Err(GridMqError::ContextClosed);
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());

            let item = match &self.inner.binding {
                Binding::Queue { queue } => {
                    tokio::select! {
                        _ = self.inner.cancel.cancelled() => {
                            return Err(GridMqError::ContextClosed);
                        }
                        polled = queue.poll(remaining) => polled?,
                    }
                }
                Binding::Topic { rx, .. } => {
                    let mut rx = rx.lock().await;
                    tokio::select! {
                        _ = self.inner.cancel.cancelled() => {
                            return Err(GridMqError::ContextClosed);
                        }
                        received = tokio::time::timeout(remaining, rx.recv()) => {
                            match received {
                                Err(_) => None,
                                Ok(Some(item)) => Some(item),
                                // Feed torn down underneath us.
                                Ok(None) => return Err(GridMqError::ContextClosed),
                            }
                        }
                    }
                }
            };

            match item {
                None => return Ok(None),
                Some(item) => {
                    let message = grid::decode_message(&item)?;
                    if message.is_expired(now_millis()) {
                        debug!(
                            "dropping expired message on {} (ttl {} ms)",
                            self.inner.destination, message.time_to_live_ms
                        );
                        continue;
                    }
                    return Ok(Some(message));
                }
            }
        }
    }

    /// `receive` with a zero timeout: returns whatever is immediately
    /// available.
    pub async fn receive_no_wait(&self) -> Result<Option<Message>> {
        self.receive(Duration::ZERO).await
    }

    /// Release the handle. Idempotent. The last handle on a temporary
    /// destination destroys it.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl ChannelInner {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.context.is_closed()
    }

    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        if let Binding::Topic { topic, listener, .. } = &self.binding {
            topic.remove_listener(*listener);
        }
        if self.destination.temporary {
            self.context.release_temporary(&self.destination);
        }
    }
}
