//! Request/reply correlation over channels.
//!
//! A [`RequestReplyCoordinator`] is bound to one [`ChannelContext`]. Each
//! request is stamped with a fresh correlation id and a reply destination,
//! and a single listener task drains that reply destination, completing the
//! matching pending request or discarding uncorrelated replies. Waiting is
//! deadline-bounded: a request whose reply does not arrive in time fails with
//! [`GridMqError::RequestTimeout`] and its pending entry is removed, so a
//! late reply is safely discarded.

use crate::broker::ChannelContext;
use crate::protocol::{Destination, DestinationKind, Message};
use crate::{GridMqError, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

/// How long the reply listener parks in a single receive before re-arming.
/// Context close interrupts the wait regardless, so this only bounds how
/// often an idle listener loops.
const LISTEN_WAIT: Duration = Duration::from_secs(60);

/// Correlation-id issuance, reply-destination management, and
/// deadline-bounded request/reply on one context.
pub struct RequestReplyCoordinator {
    context: ChannelContext,
    pending: Arc<DashMap<String, oneshot::Sender<Message>>>,
    reply_destination: Mutex<Option<Destination>>,
}

impl RequestReplyCoordinator {
    pub fn new(context: ChannelContext) -> Self {
        Self {
            context,
            pending: Arc::new(DashMap::new()),
            reply_destination: Mutex::new(None),
        }
    }

    /// Send `message` to `destination` and wait up to `timeout` for the
    /// correlated reply.
    ///
    /// Concurrent requests on the same coordinator are independent: each owns
    /// its correlation id and is unaffected by the others' outcomes.
    pub async fn send_request(
        &self,
        destination: &Destination,
        message: Message,
        timeout: Duration,
    ) -> Result<Message> {
        if self.context.is_closed() {
            return Err(GridMqError::ContextClosed);
        }

        let reply_destination = self.ensure_reply_listener()?;
        let correlation_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id.clone(), tx);

        let request = message
            .with_correlation_id(correlation_id.clone())
            .with_reply_to(reply_destination);

        let channel = match self.context.create_channel(destination) {
            Ok(channel) => channel,
            Err(err) => {
                self.pending.remove(&correlation_id);
                return Err(err);
            }
        };
        let sent = channel.send(request);
        channel.close();
        if let Err(err) = sent {
            self.pending.remove(&correlation_id);
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                // Listener went away with the context.
                self.pending.remove(&correlation_id);
                Err(GridMqError::ContextClosed)
            }
            Err(_) => {
                self.pending.remove(&correlation_id);
                Err(GridMqError::RequestTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Resolve the reply destination and start the listener task on first
    /// use. The context's configured reply-to wins; otherwise an exclusive
    /// temporary queue is created - never shared across contexts, since the
    /// grid has no selector concept to multiplex a shared reply queue safely.
    fn ensure_reply_listener(&self) -> Result<Destination> {
        let mut guard = self.reply_destination.lock();
        if let Some(destination) = &*guard {
            return Ok(destination.clone());
        }

        let destination = match self.context.reply_to() {
            Some(configured) => configured,
            None => self
                .context
                .create_temporary_destination(DestinationKind::Queue)?,
        };
        let channel = self.context.create_channel(&destination)?;

        let pending = Arc::clone(&self.pending);
        let listener_destination = destination.clone();
        tokio::spawn(async move {
            loop {
                match channel.receive(LISTEN_WAIT).await {
                    Ok(Some(reply)) => {
                        let matched = reply
                            .correlation_id
                            .as_deref()
                            .and_then(|id| pending.remove(id));
                        match matched {
                            Some((_, tx)) => {
                                let _ = tx.send(reply);
                            }
                            None => {
                                debug!(
                                    "discarding uncorrelated reply on {}",
                                    listener_destination
                                );
                            }
                        }
                    }
                    Ok(None) => continue,
                    Err(_) => break,
                }
            }
        });

        *guard = Some(destination.clone());
        Ok(destination)
    }
}
