//! In-process single-node grid.
//!
//! Backs the bundled server binary and the test suites with the same two
//! primitives a real distributed grid exposes: named FIFO queues with
//! timeout-bounded polling and named topics with listener fan-out.

use super::{GridConnector, GridQueue, GridTopic, ListenerHandle};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::debug;

/// In-process grid: named collections indexed lock-free, created on demand.
#[derive(Default)]
pub struct LocalGrid {
    queues: DashMap<String, Arc<LocalQueue>>,
    topics: DashMap<String, Arc<LocalTopic>>,
}

impl LocalGrid {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GridConnector for LocalGrid {
    fn queue(&self, name: &str) -> Arc<dyn GridQueue> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(LocalQueue::new()))
            .clone()
    }

    fn topic(&self, name: &str) -> Arc<dyn GridTopic> {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(LocalTopic::new()))
            .clone()
    }

    fn destroy_queue(&self, name: &str) {
        if let Some((_, queue)) = self.queues.remove(name) {
            let dropped = queue.items.lock().len();
            if dropped > 0 {
                debug!("destroyed queue '{}' with {} undelivered items", name, dropped);
            }
            // Wake any pollers still holding a handle; they will see an empty
            // queue and time out.
            queue.notify.notify_waiters();
        }
    }

    fn destroy_topic(&self, name: &str) {
        if let Some((_, topic)) = self.topics.remove(name) {
            topic.listeners.lock().clear();
        }
    }
}

/// FIFO queue with timeout-bounded async polling.
struct LocalQueue {
    items: Mutex<VecDeque<Bytes>>,
    notify: Notify,
}

impl LocalQueue {
    fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }
}

#[async_trait]
impl GridQueue for LocalQueue {
    fn offer(&self, item: Bytes) -> Result<()> {
        self.items.lock().push_back(item);
        self.notify.notify_one();
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> Result<Option<Bytes>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(item) = self.items.lock().pop_front() {
                return Ok(Some(item));
            }
            let notified = self.notify.notified();
            // Re-check after registering the waiter so an offer racing with
            // the empty check cannot be missed.
            if let Some(item) = self.items.lock().pop_front() {
                return Ok(Some(item));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}

/// Topic feed fanning out to currently registered listeners.
struct LocalTopic {
    listeners: Mutex<Vec<(u64, mpsc::UnboundedSender<Bytes>)>>,
    next_handle: AtomicU64,
}

impl LocalTopic {
    fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_handle: AtomicU64::new(0),
        }
    }
}

impl GridTopic for LocalTopic {
    fn publish(&self, item: Bytes) -> Result<()> {
        // Listeners whose receiver is gone are pruned as part of the send.
        self.listeners
            .lock()
            .retain(|(_, tx)| tx.send(item.clone()).is_ok());
        Ok(())
    }

    fn add_listener(&self, tx: mpsc::UnboundedSender<Bytes>) -> ListenerHandle {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((handle, tx));
        ListenerHandle(handle)
    }

    fn remove_listener(&self, handle: ListenerHandle) {
        self.listeners.lock().retain(|(id, _)| *id != handle.0);
    }
}
