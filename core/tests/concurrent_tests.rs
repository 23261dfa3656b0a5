use bytes::Bytes;
use gridmq::{
    broker::Broker,
    config::BrokerConfig,
    grid::LocalGrid,
    protocol::{Destination, HeaderValue, Message},
    request_reply::RequestReplyCoordinator,
    GridMqError,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

fn new_broker() -> Arc<Broker> {
    let config = BrokerConfig::default().with_host("127.0.0.1").with_port(0);
    Arc::new(Broker::new(Arc::new(LocalGrid::new()), config))
}

#[tokio::test]
async fn test_concurrent_producers_preserve_per_producer_order() {
    let broker = new_broker();
    let destination = Destination::queue("concurrent.producers");
    let num_producers = 10i64;
    let messages_per_producer = 50i64;

    let mut tasks = JoinSet::new();
    for producer_id in 0..num_producers {
        let broker = Arc::clone(&broker);
        let destination = destination.clone();
        tasks.spawn(async move {
            let context = broker.create_context();
            let channel = context.create_channel(&destination).unwrap();
            for seq in 0..messages_per_producer {
                let message = Message::new(format!("p{}-m{}", producer_id, seq))
                    .with_header("producer", producer_id)
                    .with_header("seq", seq);
                channel.send(message).unwrap();
            }
            context.close();
            producer_id
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.expect("producer task failed");
    }

    // Single consumer drains everything; each producer's messages arrive in
    // its send order even though interleaving across producers is arbitrary.
    let context = broker.create_context();
    let channel = context.create_channel(&destination).unwrap();
    let mut last_seq: HashMap<i64, i64> = HashMap::new();
    let total = num_producers * messages_per_producer;

    for _ in 0..total {
        let message = channel
            .receive(Duration::from_secs(2))
            .await
            .unwrap()
            .expect("queue drained early");
        let producer = match message.headers.get("producer") {
            Some(HeaderValue::Int(p)) => *p,
            other => panic!("bad producer header: {:?}", other),
        };
        let seq = match message.headers.get("seq") {
            Some(HeaderValue::Int(s)) => *s,
            other => panic!("bad seq header: {:?}", other),
        };
        let prev = last_seq.insert(producer, seq);
        assert_eq!(prev.map(|p| p + 1).unwrap_or(0), seq);
    }

    assert!(channel
        .receive(Duration::from_millis(50))
        .await
        .unwrap()
        .is_none());
    context.close();
}

#[tokio::test]
async fn test_two_consumers_split_queue_without_duplication() {
    let broker = new_broker();
    let destination = Destination::queue("concurrent.consumers");
    let total = 100usize;

    let producer_context = broker.create_context();
    let producer = producer_context.create_channel(&destination).unwrap();
    for i in 0..total {
        producer.send(Message::new(format!("m-{}", i))).unwrap();
    }

    let mut tasks = JoinSet::new();
    for _ in 0..2 {
        let broker = Arc::clone(&broker);
        let destination = destination.clone();
        tasks.spawn(async move {
            let context = broker.create_context();
            let channel = context.create_channel(&destination).unwrap();
            let mut seen = Vec::new();
            while let Some(message) = channel.receive(Duration::from_millis(200)).await.unwrap()
            {
                seen.push(String::from_utf8_lossy(&message.payload).to_string());
            }
            context.close();
            seen
        });
    }

    let mut all = Vec::new();
    while let Some(result) = tasks.join_next().await {
        all.extend(result.expect("consumer task failed"));
    }

    // Single-consumer-wins: every message delivered exactly once overall.
    assert_eq!(all.len(), total);
    all.sort();
    all.dedup();
    assert_eq!(all.len(), total);

    producer_context.close();
}

#[tokio::test]
async fn test_concurrent_requests_receive_only_their_reply() {
    let broker = new_broker();
    let service = Destination::queue("svc.batch");
    let num_requests = 8usize;

    // Responder gathers the whole batch, then answers in reverse order so
    // replies arrive out of issuance order.
    let responder_broker = Arc::clone(&broker);
    let responder_service = service.clone();
    tokio::spawn(async move {
        let context = responder_broker.create_context();
        let channel = context.create_channel(&responder_service).unwrap();
        let mut batch = Vec::new();
        while batch.len() < num_requests {
            if let Some(request) = channel.receive(Duration::from_secs(5)).await.unwrap() {
                batch.push(request);
            }
        }
        for request in batch.into_iter().rev() {
            let reply_to = request.reply_to.clone().unwrap();
            let reply_channel = context.create_channel(&reply_to).unwrap();
            let reply = Message::new(format!(
                "ans:{}",
                String::from_utf8_lossy(&request.payload)
            ))
            .with_correlation_id(request.correlation_id.clone().unwrap());
            reply_channel.send(reply).unwrap();
            reply_channel.close();
        }
        context.close();
    });

    let context = broker.create_context();
    let coordinator = Arc::new(RequestReplyCoordinator::new(context.clone()));

    let mut tasks = JoinSet::new();
    for i in 0..num_requests {
        let coordinator = Arc::clone(&coordinator);
        let service = service.clone();
        tasks.spawn(async move {
            let reply = coordinator
                .send_request(
                    &service,
                    Message::new(format!("q{}", i)),
                    Duration::from_secs(5),
                )
                .await
                .expect("request failed");
            (i, reply)
        });
    }

    while let Some(result) = tasks.join_next().await {
        let (i, reply) = result.expect("request task failed");
        assert_eq!(reply.payload, Bytes::from(format!("ans:q{}", i)));
    }

    context.close();
}

#[tokio::test]
async fn test_request_timeout_does_not_disturb_other_requests() {
    let broker = new_broker();
    let answered = Destination::queue("svc.answered");
    let ignored = Destination::queue("svc.ignored");

    let responder_broker = Arc::clone(&broker);
    let responder_service = answered.clone();
    tokio::spawn(async move {
        let context = responder_broker.create_context();
        let channel = context.create_channel(&responder_service).unwrap();
        // Answer slowly: after the sibling request has already timed out.
        let request = channel
            .receive(Duration::from_secs(5))
            .await
            .unwrap()
            .expect("no request");
        tokio::time::sleep(Duration::from_millis(200)).await;
        let reply_to = request.reply_to.clone().unwrap();
        let reply_channel = context.create_channel(&reply_to).unwrap();
        reply_channel
            .send(
                Message::new("slow-but-there")
                    .with_correlation_id(request.correlation_id.clone().unwrap()),
            )
            .unwrap();
        context.close();
    });

    let context = broker.create_context();
    let coordinator = Arc::new(RequestReplyCoordinator::new(context.clone()));

    let doomed_coordinator = Arc::clone(&coordinator);
    let doomed_destination = ignored.clone();
    let doomed = tokio::spawn(async move {
        doomed_coordinator
            .send_request(
                &doomed_destination,
                Message::new("nobody-home"),
                Duration::from_millis(100),
            )
            .await
    });

    let reply = coordinator
        .send_request(&answered, Message::new("anyone"), Duration::from_secs(5))
        .await
        .expect("surviving request failed");
    assert_eq!(reply.payload, Bytes::from("slow-but-there"));

    let doomed_result = doomed.await.unwrap();
    assert!(matches!(
        doomed_result,
        Err(GridMqError::RequestTimeout { timeout_ms: 100 })
    ));

    context.close();
}

#[tokio::test]
async fn test_close_unblocks_parked_receive() {
    let broker = new_broker();
    let context = broker.create_context();
    let channel = context
        .create_channel(&Destination::queue("park.here"))
        .unwrap();

    let receiver = tokio::spawn(async move { channel.receive(Duration::from_secs(30)).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let start = std::time::Instant::now();
    context.close();

    let result = tokio::time::timeout(Duration::from_secs(2), receiver)
        .await
        .expect("receive stayed parked after close")
        .unwrap();
    assert!(matches!(result, Err(GridMqError::ContextClosed)));
    assert!(start.elapsed() < Duration::from_secs(2));
}
