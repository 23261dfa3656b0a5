//! Grid facade tests against the in-process implementation.

#[cfg(test)]
mod tests {
    use crate::grid::*;
    use crate::protocol::Message;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_queue_offer_poll_fifo() {
        let grid = LocalGrid::new();
        let queue = grid.queue("fifo");

        queue.offer(Bytes::from("a")).unwrap();
        queue.offer(Bytes::from("b")).unwrap();
        queue.offer(Bytes::from("c")).unwrap();

        for expected in ["a", "b", "c"] {
            let item = queue.poll(Duration::from_millis(100)).await.unwrap();
            assert_eq!(item, Some(Bytes::from(expected)));
        }
    }

    #[tokio::test]
    async fn test_queue_poll_timeout_on_empty() {
        let grid = LocalGrid::new();
        let queue = grid.queue("empty");

        let start = std::time::Instant::now();
        let item = queue.poll(Duration::from_millis(50)).await.unwrap();
        assert!(item.is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_queue_zero_timeout_does_not_wait() {
        let grid = LocalGrid::new();
        let queue = grid.queue("nowait");

        assert_eq!(queue.poll(Duration::ZERO).await.unwrap(), None);

        queue.offer(Bytes::from("x")).unwrap();
        assert_eq!(
            queue.poll(Duration::ZERO).await.unwrap(),
            Some(Bytes::from("x"))
        );
    }

    #[tokio::test]
    async fn test_queue_poll_wakes_on_offer() {
        let grid = Arc::new(LocalGrid::new());
        let queue = grid.queue("wake");

        let offering = grid.queue("wake");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            offering.offer(Bytes::from("late")).unwrap();
        });

        let item = queue.poll(Duration::from_secs(2)).await.unwrap();
        assert_eq!(item, Some(Bytes::from("late")));
    }

    #[tokio::test]
    async fn test_same_name_returns_same_queue() {
        let grid = LocalGrid::new();
        grid.queue("shared").offer(Bytes::from("v")).unwrap();

        let other = grid.queue("shared");
        assert_eq!(
            other.poll(Duration::ZERO).await.unwrap(),
            Some(Bytes::from("v"))
        );
    }

    #[tokio::test]
    async fn test_topic_fans_out_to_current_listeners_only() {
        let grid = LocalGrid::new();
        let topic = grid.topic("fan");

        topic.publish(Bytes::from("before")).unwrap();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        topic.add_listener(tx1);
        topic.add_listener(tx2);

        topic.publish(Bytes::from("after")).unwrap();

        assert_eq!(rx1.recv().await, Some(Bytes::from("after")));
        assert_eq!(rx2.recv().await, Some(Bytes::from("after")));
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_topic_remove_listener_stops_delivery() {
        let grid = LocalGrid::new();
        let topic = grid.topic("rm");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = topic.add_listener(tx);
        topic.publish(Bytes::from("one")).unwrap();
        topic.remove_listener(handle);
        topic.publish(Bytes::from("two")).unwrap();

        assert_eq!(rx.recv().await, Some(Bytes::from("one")));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_destroyed_queue_items_unobservable_under_same_name() {
        let grid = LocalGrid::new();
        grid.queue("tmp").offer(Bytes::from("stale")).unwrap();
        grid.destroy_queue("tmp");

        let fresh = grid.queue("tmp");
        assert_eq!(fresh.poll(Duration::ZERO).await.unwrap(), None);
    }

    #[test]
    fn test_message_item_encoding_round_trip() {
        let message = Message::new("payload")
            .with_header("app", "inventory")
            .with_correlation_id("c-1")
            .with_ttl_ms(5_000);

        let item = encode_message(&message).unwrap();
        let decoded = decode_message(&item).unwrap();
        assert_eq!(decoded, message);
    }
}
