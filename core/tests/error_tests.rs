use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use gridmq::{
    broker::Broker,
    config::BrokerConfig,
    grid::LocalGrid,
    protocol::{Destination, DestinationKind, Message},
    request_reply::RequestReplyCoordinator,
    stomp::{frame::headers, Command, Frame, StompCodec, StompServer},
    GridMqError,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

fn new_broker() -> Arc<Broker> {
    let config = BrokerConfig::default().with_host("127.0.0.1").with_port(0);
    Arc::new(Broker::new(Arc::new(LocalGrid::new()), config))
}

async fn start_server(broker: Arc<Broker>) -> (Arc<StompServer>, SocketAddr) {
    let server = Arc::new(StompServer::new(broker).await.unwrap());
    let addr = server.local_addr().unwrap();
    let runner = Arc::clone(&server);
    tokio::spawn(async move {
        runner.run().await.unwrap();
    });
    (server, addr)
}

async fn raw_client(addr: SocketAddr) -> Framed<TcpStream, StompCodec> {
    let stream = TcpStream::connect(addr).await.unwrap();
    Framed::new(stream, StompCodec::new(1024 * 1024))
}

async fn connected_client(addr: SocketAddr) -> Framed<TcpStream, StompCodec> {
    let mut framed = raw_client(addr).await;
    framed.send(Frame::new(Command::Connect)).await.unwrap();
    let connected = framed.next().await.unwrap().unwrap();
    assert_eq!(connected.command, Command::Connected);
    framed
}

#[tokio::test]
async fn test_operations_on_closed_context_fail() {
    let broker = new_broker();
    let context = broker.create_context();
    let destination = Destination::queue("closed.ops");
    let channel = context.create_channel(&destination).unwrap();

    context.close();
    // Idempotent: a second close is a no-op.
    context.close();

    assert!(matches!(
        context.create_channel(&destination),
        Err(GridMqError::ContextClosed)
    ));
    assert!(matches!(
        context.create_temporary_destination(DestinationKind::Queue),
        Err(GridMqError::ContextClosed)
    ));
    assert!(matches!(
        channel.send(Message::new("late")),
        Err(GridMqError::ContextClosed)
    ));
    assert!(matches!(
        channel.receive(Duration::from_millis(10)).await,
        Err(GridMqError::ContextClosed)
    ));
}

#[tokio::test]
async fn test_closed_channel_is_distinct_from_timeout() {
    let broker = new_broker();
    let context = broker.create_context();
    let channel = context
        .create_channel(&Destination::queue("distinct.results"))
        .unwrap();

    // Timeout on an open channel: Ok(None), not an error.
    let timed_out = channel.receive(Duration::from_millis(50)).await.unwrap();
    assert!(timed_out.is_none());

    channel.close();
    channel.close();
    assert!(matches!(
        channel.receive(Duration::from_millis(50)).await,
        Err(GridMqError::ContextClosed)
    ));

    context.close();
}

#[tokio::test]
async fn test_receive_timeout_is_bounded() {
    let broker = new_broker();
    let context = broker.create_context();
    let channel = context
        .create_channel(&Destination::queue("bounded.wait"))
        .unwrap();

    let start = std::time::Instant::now();
    let result = channel.receive(Duration::from_millis(150)).await.unwrap();
    let elapsed = start.elapsed();

    assert!(result.is_none());
    assert!(elapsed >= Duration::from_millis(150));
    assert!(elapsed < Duration::from_secs(2), "receive overshot: {:?}", elapsed);

    context.close();
}

#[tokio::test]
async fn test_request_timeout_without_responder() {
    let broker = new_broker();
    let context = broker.create_context();
    let coordinator = RequestReplyCoordinator::new(context.clone());

    let start = std::time::Instant::now();
    let result = coordinator
        .send_request(
            &Destination::queue("svc.absent"),
            Message::new("hello?"),
            Duration::from_millis(200),
        )
        .await;
    let elapsed = start.elapsed();

    assert!(matches!(
        result,
        Err(GridMqError::RequestTimeout { timeout_ms: 200 })
    ));
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_secs(2), "timeout overshot: {:?}", elapsed);

    context.close();
}

#[tokio::test]
async fn test_late_reply_is_discarded_and_coordinator_survives() {
    let broker = new_broker();
    let service = Destination::queue("svc.sluggish");

    let responder_broker = Arc::clone(&broker);
    let responder_service = service.clone();
    tokio::spawn(async move {
        let context = responder_broker.create_context();
        let channel = context.create_channel(&responder_service).unwrap();
        loop {
            match channel.receive(Duration::from_secs(5)).await {
                Ok(Some(request)) => {
                    let wait = if request.payload == Bytes::from("slow") {
                        // Reply well after the requester gave up.
                        Duration::from_millis(300)
                    } else {
                        Duration::ZERO
                    };
                    tokio::time::sleep(wait).await;
                    let reply_to = request.reply_to.clone().unwrap();
                    let reply_channel = context.create_channel(&reply_to).unwrap();
                    reply_channel
                        .send(
                            Message::new("reply")
                                .with_correlation_id(
                                    request.correlation_id.clone().unwrap(),
                                ),
                        )
                        .unwrap();
                    reply_channel.close();
                }
                _ => break,
            }
        }
    });

    let context = broker.create_context();
    let coordinator = RequestReplyCoordinator::new(context.clone());

    let timed_out = coordinator
        .send_request(&service, Message::new("slow"), Duration::from_millis(100))
        .await;
    assert!(matches!(timed_out, Err(GridMqError::RequestTimeout { .. })));

    // The stale reply lands while this request is pending; it must be
    // discarded without affecting the fresh correlation.
    let fresh = coordinator
        .send_request(&service, Message::new("fast"), Duration::from_secs(2))
        .await
        .expect("coordinator broken by late reply");
    assert_eq!(fresh.payload, Bytes::from("reply"));

    context.close();
}

#[tokio::test]
async fn test_wire_frame_before_connect_is_rejected() {
    let broker = new_broker();
    let (_server, addr) = start_server(broker).await;
    let mut client = raw_client(addr).await;

    client
        .send(
            Frame::new(Command::Send)
                .with_header(headers::DESTINATION, "/queue/too.soon")
                .with_body("premature"),
        )
        .await
        .unwrap();

    let error = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("no ERROR frame")
        .unwrap()
        .unwrap();
    assert_eq!(error.command, Command::Error);

    let closed = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("connection left open after violation");
    assert!(closed.is_none());
}

#[tokio::test]
async fn test_wire_invalid_destination_disconnects() {
    let broker = new_broker();
    let (_server, addr) = start_server(broker).await;
    let mut client = connected_client(addr).await;

    client
        .send(
            Frame::new(Command::Send)
                .with_header(headers::DESTINATION, "/bogus/path")
                .with_body("lost"),
        )
        .await
        .unwrap();

    let error = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("no ERROR frame")
        .unwrap()
        .unwrap();
    assert_eq!(error.command, Command::Error);

    let closed = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("connection left open after conversion error");
    assert!(closed.is_none());
}

#[tokio::test]
async fn test_wire_duplicate_subscription_id_disconnects() {
    let broker = new_broker();
    let (_server, addr) = start_server(broker).await;
    let mut client = connected_client(addr).await;

    let subscribe = Frame::new(Command::Subscribe)
        .with_header(headers::ID, "dup")
        .with_header(headers::DESTINATION, "/queue/dup.sub");
    client.send(subscribe.clone()).await.unwrap();
    client.send(subscribe).await.unwrap();

    let error = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("no ERROR frame")
        .unwrap()
        .unwrap();
    assert_eq!(error.command, Command::Error);
}

#[tokio::test]
async fn test_wire_nack_requeues_queue_delivery() {
    let broker = new_broker();
    let (_server, addr) = start_server(Arc::clone(&broker)).await;
    let mut client = connected_client(addr).await;

    client
        .send(
            Frame::new(Command::Subscribe)
                .with_header(headers::ID, "nack-sub")
                .with_header(headers::DESTINATION, "/queue/nack.me")
                .with_header(headers::ACK, "client")
                .with_header(headers::RECEIPT, "r-sub"),
        )
        .await
        .unwrap();
    let receipt = client.next().await.unwrap().unwrap();
    assert_eq!(receipt.command, Command::Receipt);

    let context = broker.create_context();
    let producer = context
        .create_channel(&Destination::queue("nack.me"))
        .unwrap();
    producer.send(Message::new("try me")).unwrap();

    let first = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("no first delivery")
        .unwrap()
        .unwrap();
    assert_eq!(first.command, Command::Message);
    let first_id = first.header(headers::MESSAGE_ID).unwrap().to_string();

    client
        .send(Frame::new(Command::Nack).with_header(headers::ID, first_id.clone()))
        .await
        .unwrap();

    // Rejected queue delivery comes around again under a fresh message id.
    let second = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("no redelivery after NACK")
        .unwrap()
        .unwrap();
    assert_eq!(second.command, Command::Message);
    assert_eq!(second.body, Bytes::from("try me"));
    let second_id = second.header(headers::MESSAGE_ID).unwrap().to_string();
    assert_ne!(first_id, second_id);

    client
        .send(Frame::new(Command::Ack).with_header(headers::ID, second_id))
        .await
        .unwrap();

    context.close();
}

#[tokio::test]
async fn test_wire_unacked_delivery_requeued_on_connection_loss() {
    let broker = new_broker();
    let (_server, addr) = start_server(Arc::clone(&broker)).await;
    let mut client = connected_client(addr).await;

    client
        .send(
            Frame::new(Command::Subscribe)
                .with_header(headers::ID, "drop-sub")
                .with_header(headers::DESTINATION, "/queue/orphaned")
                .with_header(headers::ACK, "client")
                .with_header(headers::RECEIPT, "r-sub"),
        )
        .await
        .unwrap();
    let receipt = client.next().await.unwrap().unwrap();
    assert_eq!(receipt.command, Command::Receipt);

    let context = broker.create_context();
    let producer = context
        .create_channel(&Destination::queue("orphaned"))
        .unwrap();
    producer.send(Message::new("keep me")).unwrap();

    let delivered = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("no delivery")
        .unwrap()
        .unwrap();
    assert_eq!(delivered.command, Command::Message);

    // Drop the connection without acknowledging.
    drop(client);

    // Session teardown requeues the unacked delivery for the next consumer.
    let salvage = context
        .create_channel(&Destination::queue("orphaned"))
        .unwrap();
    let recovered = salvage
        .receive(Duration::from_secs(2))
        .await
        .unwrap()
        .expect("unacked delivery lost on connection drop");
    assert_eq!(recovered.payload, Bytes::from("keep me"));

    context.close();
}

#[tokio::test]
async fn test_wire_oversized_frame_rejected() {
    let broker = {
        let config = BrokerConfig::default()
            .with_host("127.0.0.1")
            .with_port(0)
            .with_max_frame_size(256);
        Arc::new(Broker::new(Arc::new(LocalGrid::new()), config))
    };
    let (_server, addr) = start_server(broker).await;

    // Client side uses a larger limit so the oversized frame goes out.
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut client = Framed::new(stream, StompCodec::new(1024 * 1024));
    client.send(Frame::new(Command::Connect)).await.unwrap();
    let connected = client.next().await.unwrap().unwrap();
    assert_eq!(connected.command, Command::Connected);

    client
        .send(
            Frame::new(Command::Send)
                .with_header(headers::DESTINATION, "/queue/big")
                .with_body("x".repeat(1024)),
        )
        .await
        .unwrap();

    let error = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("no ERROR frame")
        .unwrap()
        .unwrap();
    assert_eq!(error.command, Command::Error);

    let closed = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("connection left open after oversized frame");
    assert!(closed.is_none());
}
