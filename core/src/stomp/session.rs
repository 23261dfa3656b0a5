//! Per-connection protocol session.
//!
//! One session per accepted connection, driven by a state machine:
//! `New -> Connected -> Disconnected` (terminal). The frame-reading loop is
//! one task; every subscription gets its own receive-loop task; a writer task
//! owns the outbound sink. All of them hand frames through an mpsc queue -
//! no shared mutable connection state.
//!
//! Connection loss while `Connected` runs the same teardown as an explicit
//! DISCONNECT (context closed, loops stopped, unacked queue deliveries
//! requeued), just without a receipt.

use super::codec::StompCodec;
use super::converter::FrameConverter;
use super::frame::{headers, Command, Frame};
use crate::broker::{Broker, Channel, ChannelContext};
use crate::metrics::BrokerMetrics;
use crate::protocol::{Destination, DestinationKind, Message};
use crate::{GridMqError, Result};
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How long a subscription receive parks before re-arming. Cancellation
/// interrupts the wait, so this only bounds idle loop turnover.
const SUBSCRIPTION_WAIT: Duration = Duration::from_secs(60);

/// Outbound frame queue depth per session.
const OUTBOUND_QUEUE: usize = 64;

/// Session lifecycle. `Disconnected` is terminal; there is no re-entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Connected,
    Disconnected,
}

/// Subscription acknowledgement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Delivery counts as acknowledged immediately.
    Auto,
    /// Explicit ACK/NACK required per delivery.
    Client,
}

impl AckMode {
    /// Parse the `ack` header; absence means auto, anything unrecognized is
    /// a protocol violation.
    fn parse(value: Option<&str>) -> Option<Self> {
        match value {
            None | Some("auto") => Some(AckMode::Auto),
            Some("client") => Some(AckMode::Client),
            Some(_) => None,
        }
    }
}

struct Subscription {
    destination: Destination,
    ack_mode: AckMode,
    cancel: CancellationToken,
}

/// A client-ack delivery awaiting ACK/NACK, keyed by message id.
struct UnackedDelivery {
    destination: Destination,
    message: Message,
}

enum Flow {
    Continue,
    Disconnect,
}

/// State for one wire connection.
pub struct ProtocolSession {
    id: String,
    state: SessionState,
    broker: Arc<Broker>,
    context: Option<ChannelContext>,
    subscriptions: HashMap<String, Subscription>,
    unacked: Arc<DashMap<String, UnackedDelivery>>,
    outbound: mpsc::Sender<Frame>,
    cancel: CancellationToken,
    metrics: Arc<BrokerMetrics>,
}

/// Drive one connection to completion: frame loop, dispatch, teardown.
pub(crate) async fn run_session(
    stream: TcpStream,
    broker: Arc<Broker>,
    metrics: Arc<BrokerMetrics>,
    cancel: CancellationToken,
) -> Result<()> {
    let codec = StompCodec::new(broker.config().max_frame_size);
    let framed = Framed::new(stream, codec);
    let (sink, frames) = framed.split();

    let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let writer = tokio::spawn(write_loop(sink, outbound_rx, Arc::clone(&metrics)));

    let session = ProtocolSession {
        id: Uuid::new_v4().to_string(),
        state: SessionState::New,
        broker,
        context: None,
        subscriptions: HashMap::new(),
        unacked: Arc::new(DashMap::new()),
        outbound,
        cancel,
        metrics,
    };
    let result = session.frame_loop(frames).await;

    // All subscription loops hold outbound senders; teardown cancels them,
    // so the writer drains and exits once the last sender is gone.
    let _ = writer.await;
    result
}

async fn write_loop(
    mut sink: SplitSink<Framed<TcpStream, StompCodec>, Frame>,
    mut outbound_rx: mpsc::Receiver<Frame>,
    metrics: Arc<BrokerMetrics>,
) {
    while let Some(frame) = outbound_rx.recv().await {
        if sink.send(frame).await.is_err() {
            break;
        }
        metrics.frame_sent();
    }
    let _ = sink.close().await;
}

impl ProtocolSession {
    async fn frame_loop(
        mut self,
        mut frames: SplitStream<Framed<TcpStream, StompCodec>>,
    ) -> Result<()> {
        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("session {}: adapter shutting down", self.id);
                    break;
                }
                next = frames.next() => match next {
                    Some(Ok(frame)) => {
                        self.metrics.frame_received();
                        match self.handle_frame(frame).await {
                            Ok(Flow::Continue) => {}
                            Ok(Flow::Disconnect) => break,
                            Err(err) => {
                                // Frame-level failure: report and drop the
                                // connection; framing may be desynchronized.
                                warn!("session {}: {}", self.id, err);
                                let _ = self
                                    .outbound
                                    .send(Frame::error("processing failed", &err.to_string()))
                                    .await;
                                break;
                            }
                        }
                    }
                    Some(Err(err)) => {
                        warn!("session {}: malformed frame: {}", self.id, err);
                        let _ = self
                            .outbound
                            .send(Frame::error("malformed frame", &err.to_string()))
                            .await;
                        break;
                    }
                    None => {
                        debug!("session {}: connection closed by peer", self.id);
                        break;
                    }
                }
            }
        }

        self.teardown();
        Ok(())
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<Flow> {
        let receipt = frame.header(headers::RECEIPT).map(str::to_string);
        let command = frame.command;

        let flow = match (self.state, command) {
            (SessionState::New, Command::Connect) => self.handle_connect().await?,
            (SessionState::New, other) => {
                return self
                    .protocol_violation(&format!("expected CONNECT, got {}", other))
                    .await;
            }
            (SessionState::Connected, Command::Send) => self.handle_send(&frame).await?,
            (SessionState::Connected, Command::Subscribe) => {
                return self.handle_subscribe(&frame, receipt).await;
            }
            (SessionState::Connected, Command::Unsubscribe) => {
                self.handle_unsubscribe(&frame)?
            }
            (SessionState::Connected, Command::Ack) => self.handle_ack(&frame)?,
            (SessionState::Connected, Command::Nack) => self.handle_nack(&frame)?,
            (SessionState::Connected, Command::Disconnect) => Flow::Disconnect,
            (SessionState::Connected, other) => {
                return self
                    .protocol_violation(&format!("unexpected {} frame", other))
                    .await;
            }
            (SessionState::Disconnected, _) => Flow::Disconnect,
        };

        // CONNECT is confirmed by the CONNECTED frame, never by a receipt.
        if command != Command::Connect {
            if let Some(receipt_id) = receipt {
                self.send_receipt(receipt_id).await;
            }
        }
        Ok(flow)
    }

    /// NEW --CONNECT--> CONNECTED: open a context and confirm.
    async fn handle_connect(&mut self) -> Result<Flow> {
        self.context = Some(self.broker.create_context());
        self.state = SessionState::Connected;
        info!("session {} connected", self.id);

        let connected = Frame::new(Command::Connected)
            .with_header(headers::SESSION, self.id.clone())
            .with_header(
                headers::SERVER,
                concat!("gridmq/", env!("CARGO_PKG_VERSION")),
            );
        self.push(connected).await?;
        Ok(Flow::Continue)
    }

    /// SEND: convert and publish through a short-lived channel.
    async fn handle_send(&mut self, frame: &Frame) -> Result<Flow> {
        let (destination, message) = FrameConverter::from_frame(frame)?;
        let channel = self.context()?.create_channel(&destination)?;
        let sent = channel.send(message);
        channel.close();
        sent?;
        self.metrics.message_received();
        Ok(Flow::Continue)
    }

    /// SUBSCRIBE: validate, register, and start the dedicated receive loop.
    ///
    /// Handles its own receipt so the confirmation is queued only after the
    /// subscription is live.
    async fn handle_subscribe(&mut self, frame: &Frame, receipt: Option<String>) -> Result<Flow> {
        let id = match frame.header(headers::ID) {
            Some(id) => id.to_string(),
            None => return self.protocol_violation("SUBSCRIBE requires an id header").await,
        };
        let path = match frame.header(headers::DESTINATION) {
            Some(path) => path.to_string(),
            None => {
                return self
                    .protocol_violation("SUBSCRIBE requires a destination header")
                    .await;
            }
        };
        let destination = match Destination::parse(&path) {
            Some(destination) => destination,
            None => {
                return self
                    .protocol_violation(&format!("invalid destination path: {}", path))
                    .await;
            }
        };
        let ack_mode = match AckMode::parse(frame.header(headers::ACK)) {
            Some(mode) => mode,
            None => {
                return self
                    .protocol_violation(&format!(
                        "invalid ack mode: {}",
                        frame.header(headers::ACK).unwrap_or_default()
                    ))
                    .await;
            }
        };
        if self.subscriptions.contains_key(&id) {
            return self
                .protocol_violation(&format!("subscription id already active: {}", id))
                .await;
        }

        let channel = self.context()?.create_channel(&destination)?;
        let cancel = self.cancel.child_token();
        tokio::spawn(subscription_loop(
            channel,
            id.clone(),
            destination.clone(),
            ack_mode,
            self.outbound.clone(),
            Arc::clone(&self.unacked),
            Arc::clone(&self.metrics),
            cancel.clone(),
            self.id.clone(),
        ));

        debug!(
            "session {}: subscription {} on {} ({:?})",
            self.id, id, destination, ack_mode
        );
        self.subscriptions.insert(
            id,
            Subscription {
                destination,
                ack_mode,
                cancel,
            },
        );

        if let Some(receipt_id) = receipt {
            self.send_receipt(receipt_id).await;
        }
        Ok(Flow::Continue)
    }

    /// UNSUBSCRIBE: stop and remove the subscription's receive loop.
    fn handle_unsubscribe(&mut self, frame: &Frame) -> Result<Flow> {
        let id = frame
            .header(headers::ID)
            .ok_or_else(|| GridMqError::Protocol("UNSUBSCRIBE requires an id header".into()))?;
        match self.subscriptions.remove(id) {
            Some(subscription) => {
                subscription.cancel.cancel();
                debug!(
                    "session {}: subscription {} on {} ({:?}) removed",
                    self.id, id, subscription.destination, subscription.ack_mode
                );
            }
            None => warn!("session {}: UNSUBSCRIBE for unknown id {}", self.id, id),
        }
        Ok(Flow::Continue)
    }

    /// ACK: the referenced delivery is settled.
    fn handle_ack(&mut self, frame: &Frame) -> Result<Flow> {
        let id = frame
            .header(headers::ID)
            .ok_or_else(|| GridMqError::Protocol("ACK requires an id header".into()))?;
        if self.unacked.remove(id).is_none() {
            debug!("session {}: ACK for unknown delivery {}", self.id, id);
        }
        Ok(Flow::Continue)
    }

    /// NACK: the referenced delivery is rejected; queue deliveries are
    /// requeued, topic deliveries are dropped.
    fn handle_nack(&mut self, frame: &Frame) -> Result<Flow> {
        let id = frame
            .header(headers::ID)
            .ok_or_else(|| GridMqError::Protocol("NACK requires an id header".into()))?;
        match self.unacked.remove(id) {
            Some((_, delivery)) => self.redeliver(delivery)?,
            None => debug!("session {}: NACK for unknown delivery {}", self.id, id),
        }
        Ok(Flow::Continue)
    }

    /// Put a rejected or orphaned queue delivery back on its queue.
    /// Topic delivery is fire-and-forget and never redelivered.
    fn redeliver(&self, delivery: UnackedDelivery) -> Result<()> {
        if delivery.destination.kind != DestinationKind::Queue {
            return Ok(());
        }
        let channel = self.context()?.create_channel(&delivery.destination)?;
        let sent = channel.send(delivery.message);
        channel.close();
        sent
    }

    async fn protocol_violation(&mut self, detail: &str) -> Result<Flow> {
        warn!("session {}: protocol violation: {}", self.id, detail);
        let _ = self
            .outbound
            .send(Frame::error("protocol violation", detail))
            .await;
        self.state = SessionState::Disconnected;
        Ok(Flow::Disconnect)
    }

    async fn send_receipt(&self, receipt_id: String) {
        let _ = self
            .outbound
            .send(Frame::new(Command::Receipt).with_header(headers::RECEIPT_ID, receipt_id))
            .await;
    }

    async fn push(&self, frame: Frame) -> Result<()> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| GridMqError::Protocol("connection writer gone".into()))
    }

    fn context(&self) -> Result<&ChannelContext> {
        self.context.as_ref().ok_or(GridMqError::ContextClosed)
    }

    /// Shared cleanup for DISCONNECT and connection loss: stop subscription
    /// loops, requeue unacked queue deliveries, close the context.
    fn teardown(&mut self) {
        for (_, subscription) in self.subscriptions.drain() {
            subscription.cancel.cancel();
        }

        let pending: Vec<String> = self.unacked.iter().map(|e| e.key().clone()).collect();
        for id in pending {
            if let Some((_, delivery)) = self.unacked.remove(&id) {
                if let Err(err) = self.redeliver(delivery) {
                    warn!(
                        "session {}: failed to requeue unacked delivery {}: {}",
                        self.id, id, err
                    );
                }
            }
        }

        if let Some(context) = self.context.take() {
            context.close();
        }
        if self.state != SessionState::Disconnected {
            self.state = SessionState::Disconnected;
        }
        info!("session {} disconnected", self.id);
    }
}

/// Dedicated receive loop for one subscription: pull from the channel,
/// convert, tag with subscription and message ids, hand off to the writer.
#[allow(clippy::too_many_arguments)]
async fn subscription_loop(
    channel: Channel,
    subscription_id: String,
    destination: Destination,
    ack_mode: AckMode,
    outbound: mpsc::Sender<Frame>,
    unacked: Arc<DashMap<String, UnackedDelivery>>,
    metrics: Arc<BrokerMetrics>,
    cancel: CancellationToken,
    session_id: String,
) {
    loop {
        tokio::select! {
            // Cancellation must win over a racing delivery: teardown cancels
            // before it requeues unacked messages, and a requeued message
            // must not be pulled back by the dying loop.
            biased;

            _ = cancel.cancelled() => break,
            received = channel.receive(SUBSCRIPTION_WAIT) => match received {
                Ok(Some(message)) => {
                    let message_id = Uuid::new_v4().to_string();
                    if ack_mode == AckMode::Client {
                        unacked.insert(
                            message_id.clone(),
                            UnackedDelivery {
                                destination: destination.clone(),
                                message: message.clone(),
                            },
                        );
                    }
                    let frame = FrameConverter::to_frame(&destination, &message)
                        .with_header(headers::SUBSCRIPTION, subscription_id.clone())
                        .with_header(headers::MESSAGE_ID, message_id.clone());
                    if outbound.send(frame).await.is_err() {
                        // Writer gone mid-delivery: put the message back so
                        // it is not lost between channel and wire. A client-ack
                        // entry already drained by session teardown was requeued
                        // there; requeueing it again here would duplicate it.
                        let still_tracked = unacked.remove(&message_id).is_some();
                        let owed = ack_mode == AckMode::Auto || still_tracked;
                        if owed && destination.kind == DestinationKind::Queue {
                            let _ = channel.send(message);
                        }
                        break;
                    }
                    metrics.message_sent();
                }
                Ok(None) => continue,
                Err(_) => break,
            }
        }
    }
    channel.close();
    debug!(
        "session {}: subscription {} loop stopped",
        session_id, subscription_id
    );
}
