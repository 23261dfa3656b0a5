//! Channel context: owning scope for channels and temporary destinations.

use super::channel::{Channel, ChannelInner};
use crate::grid::GridConnector;
use crate::protocol::{Destination, DestinationKind};
use crate::{GridMqError, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Owning scope for a set of channels and any temporary destinations they
/// use.
///
/// Cloning the handle is cheap and shares the same underlying scope; the
/// scope is closed once, idempotently, regardless of how many handles exist.
#[derive(Clone)]
pub struct ChannelContext {
    inner: Arc<ContextInner>,
}

pub(crate) struct ContextInner {
    grid: Arc<dyn GridConnector>,
    cancel: CancellationToken,
    closed: AtomicBool,
    channels: Mutex<Vec<Weak<ChannelInner>>>,
    /// Temporary destinations still owned by this context. Destruction
    /// removes the entry, which is what makes destroy exactly-once.
    temporaries: Mutex<Vec<Destination>>,
    temp_refs: DashMap<Destination, usize>,
    reply_to: Mutex<Option<Destination>>,
}

impl ChannelContext {
    pub(crate) fn new(grid: Arc<dyn GridConnector>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                grid,
                cancel: CancellationToken::new(),
                closed: AtomicBool::new(false),
                channels: Mutex::new(Vec::new()),
                temporaries: Mutex::new(Vec::new()),
                temp_refs: DashMap::new(),
                reply_to: Mutex::new(None),
            }),
        }
    }

    /// Open a channel bound to the given destination.
    pub fn create_channel(&self, destination: &Destination) -> Result<Channel> {
        if self.is_closed() {
            return Err(GridMqError::ContextClosed);
        }

        let channel = Channel::open(
            destination.clone(),
            Arc::clone(&self.inner),
            self.inner.cancel.child_token(),
        );

        if destination.temporary {
            *self
                .inner
                .temp_refs
                .entry(destination.clone())
                .or_insert(0) += 1;
        }

        let mut channels = self.inner.channels.lock();
        channels.retain(|weak| weak.strong_count() > 0);
        channels.push(Arc::downgrade(channel.inner()));
        Ok(channel)
    }

    /// Create a uniquely named temporary destination owned by this context.
    ///
    /// The destination is usable immediately and is destroyed when its last
    /// channel closes or when the context closes, whichever comes first.
    pub fn create_temporary_destination(&self, kind: DestinationKind) -> Result<Destination> {
        if self.is_closed() {
            return Err(GridMqError::ContextClosed);
        }

        let destination =
            Destination::temporary(format!("gridmq.tmp.{}", Uuid::new_v4()), kind);
        self.inner.temporaries.lock().push(destination.clone());
        debug!("created temporary destination {}", destination);
        Ok(destination)
    }

    /// Configure a fixed reply destination for request/reply on this context.
    /// When unset, the coordinator creates an exclusive temporary queue.
    pub fn set_reply_to(&self, destination: Destination) {
        *self.inner.reply_to.lock() = Some(destination);
    }

    pub fn reply_to(&self) -> Option<Destination> {
        self.inner.reply_to.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Close the context: cancel in-flight receives, close owned channels
    /// best-effort, destroy owned temporary destinations. Idempotent and safe
    /// to call concurrently with channel operations.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.cancel.cancel();

        let channels: Vec<Weak<ChannelInner>> =
            self.inner.channels.lock().drain(..).collect();
        for weak in channels {
            if let Some(channel) = weak.upgrade() {
                channel.close();
            }
        }

        let temporaries: Vec<Destination> = self.inner.temporaries.lock().clone();
        for destination in temporaries {
            self.inner.destroy_temporary(&destination);
        }
        debug!("channel context closed");
    }
}

impl ContextInner {
    pub(crate) fn grid(&self) -> &Arc<dyn GridConnector> {
        &self.grid
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Called by a closing channel; destroys the temporary destination when
    /// the last handle on it goes away.
    pub(crate) fn release_temporary(&self, destination: &Destination) {
        let destroy = match self.temp_refs.get_mut(destination) {
            Some(mut entry) => {
                *entry = entry.saturating_sub(1);
                let last = *entry == 0;
                drop(entry);
                if last {
                    self.temp_refs.remove(destination);
                }
                last
            }
            None => false,
        };
        if destroy {
            self.destroy_temporary(destination);
        }
    }

    /// Destroy a temporary destination exactly once: removal from the owned
    /// list is the destruction ticket.
    pub(crate) fn destroy_temporary(&self, destination: &Destination) {
        {
            let mut temporaries = self.temporaries.lock();
            match temporaries.iter().position(|d| d == destination) {
                Some(idx) => {
                    temporaries.remove(idx);
                }
                None => return,
            }
        }
        match destination.kind {
            DestinationKind::Queue => self.grid.destroy_queue(&destination.name),
            DestinationKind::Topic => self.grid.destroy_topic(&destination.name),
        }
        debug!("destroyed temporary destination {}", destination);
    }
}
