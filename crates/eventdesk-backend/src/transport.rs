//! Realtime change-feed transport.
//!
//! One websocket carries every topic subscription of the process. Topics are
//! joined with `subscribe` frames and left with `unsubscribe` frames; the
//! server pushes `insert`/`update`/`delete` change frames and `status` frames
//! per topic. The connection reconnects with exponential backoff and re-joins
//! every live topic afterwards, reporting the gap to each topic handler as
//! `Disconnected` followed by `Joined`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use dashmap::{DashMap, DashSet};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};

use crate::BackendError;

/// Interval between heartbeat frames on an open connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// A connection with no inbound traffic for this long is treated as dead.
const READ_TIMEOUT: Duration = Duration::from_secs(90);

/// Callback invoked for every event on a joined topic.
///
/// Handlers run on the transport task and must not block.
pub type TopicHandler = Arc<dyn Fn(TopicEvent) + Send + Sync>;

/// Parameters for joining a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinRequest {
    /// Topic name, unique per subscribed row set.
    pub topic: String,
    /// Table whose changes are wanted.
    pub table: String,
    /// Row filter, e.g. `event_id=eq.<uuid>`.
    pub filter: Option<String>,
}

/// Kind of row change carried by a change frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A single row change on a topic. Rows are untyped at this layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeFrame {
    pub kind: ChangeKind,
    /// New row (insert/update).
    pub record: Option<serde_json::Value>,
    /// Previous row or its primary key (update/delete).
    pub old_record: Option<serde_json::Value>,
}

/// Connection status of one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicStatus {
    /// Join requested, not yet confirmed.
    Joining,
    /// Server confirmed the join; changes will flow.
    Joined,
    /// The connection dropped; changes may be missed until `Joined` again.
    Disconnected,
    /// The server refused or closed the topic.
    Rejected(String),
}

/// Event delivered to a topic handler.
#[derive(Debug, Clone, PartialEq)]
pub enum TopicEvent {
    Change(ChangeFrame),
    Status(TopicStatus),
}

/// Frame sent to the server.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum OutboundFrame {
    Subscribe {
        topic: String,
        table: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
    },
    Unsubscribe {
        topic: String,
    },
    Heartbeat,
}

impl OutboundFrame {
    fn subscribe(join: &JoinRequest) -> Self {
        OutboundFrame::Subscribe {
            topic: join.topic.clone(),
            table: join.table.clone(),
            filter: join.filter.clone(),
        }
    }
}

/// Frame received from the server.
#[derive(Debug, Deserialize)]
struct InboundFrame {
    #[serde(default)]
    topic: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    record: Option<serde_json::Value>,
    #[serde(default)]
    old_record: Option<serde_json::Value>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

struct Registration {
    join: JoinRequest,
    handler: TopicHandler,
}

/// Shared realtime transport.
///
/// Construct through [`RealtimeTransport::spawn`] (or [`crate::Backend`]);
/// subscriptions are registered synchronously and survive reconnects.
pub struct RealtimeTransport {
    endpoint: String,
    registrations: DashMap<u64, Registration>,
    /// Topics the server has confirmed on the current connection.
    joined: DashSet<String>,
    next_id: AtomicU64,
    connected: AtomicBool,
    outbound_tx: mpsc::UnboundedSender<OutboundFrame>,
    shutdown_tx: watch::Sender<bool>,
}

/// Connection task for a [`RealtimeTransport`].
pub struct TransportDriver {
    transport: Arc<RealtimeTransport>,
    outbound_rx: mpsc::UnboundedReceiver<OutboundFrame>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Registration guard. Dropping it leaves the topic.
pub struct TopicGuard {
    transport: Arc<RealtimeTransport>,
    id: u64,
}

impl TopicGuard {
    /// Leave the topic now. Equivalent to dropping the guard.
    pub fn unsubscribe(self) {}
}

impl Drop for TopicGuard {
    fn drop(&mut self) {
        self.transport.unsubscribe(self.id);
    }
}

impl RealtimeTransport {
    /// Create a transport and its (not yet running) connection driver.
    pub fn new(endpoint: impl Into<String>) -> (Arc<Self>, TransportDriver) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let transport = Arc::new(Self {
            endpoint: endpoint.into(),
            registrations: DashMap::new(),
            joined: DashSet::new(),
            next_id: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            outbound_tx,
            shutdown_tx,
        });
        let driver = TransportDriver {
            transport: Arc::clone(&transport),
            outbound_rx,
            shutdown_rx,
        };
        (transport, driver)
    }

    /// Create a transport and spawn its connection task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(endpoint: impl Into<String>) -> Arc<Self> {
        let (transport, driver) = Self::new(endpoint);
        tokio::spawn(driver.run());
        transport
    }

    /// Whether the websocket is currently open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of live topic registrations.
    pub fn registration_count(&self) -> usize {
        self.registrations.len()
    }

    /// Stop the connection task. Registrations are kept but receive nothing.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Join a topic. `handler` receives `Joining` immediately (followed by
    /// `Joined` if the topic is already confirmed), then every status change
    /// and row change until the returned guard is dropped.
    pub fn subscribe(self: &Arc<Self>, join: JoinRequest, handler: TopicHandler) -> TopicGuard {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let first_for_topic = !self.has_topic(&join.topic);

        let frame = OutboundFrame::subscribe(&join);
        let topic = join.topic.clone();
        self.registrations.insert(
            id,
            Registration {
                join,
                handler: Arc::clone(&handler),
            },
        );
        handler(TopicEvent::Status(TopicStatus::Joining));
        if !first_for_topic && self.joined.contains(&topic) {
            handler(TopicEvent::Status(TopicStatus::Joined));
        }

        if first_for_topic && self.is_connected() {
            self.send(frame);
        }
        debug!(id, topic = %topic, "realtime topic registered");

        TopicGuard {
            transport: Arc::clone(self),
            id,
        }
    }

    /// Remove a registration. No handler call for it starts after this returns.
    fn unsubscribe(&self, id: u64) {
        let Some((_, registration)) = self.registrations.remove(&id) else {
            return;
        };
        let topic = registration.join.topic;
        if !self.has_topic(&topic) {
            self.joined.remove(&topic);
            if self.is_connected() {
                self.send(OutboundFrame::Unsubscribe {
                    topic: topic.clone(),
                });
            }
        }
        debug!(id, topic = %topic, "realtime topic unregistered");
    }

    fn has_topic(&self, topic: &str) -> bool {
        self.registrations.iter().any(|r| r.join.topic == topic)
    }

    fn send(&self, frame: OutboundFrame) {
        if self.outbound_tx.send(frame).is_err() {
            trace!("realtime driver gone, dropping outbound frame");
        }
    }

    /// Distinct join requests of every live registration.
    fn live_joins(&self) -> Vec<JoinRequest> {
        let mut joins: Vec<JoinRequest> = Vec::new();
        for r in self.registrations.iter() {
            if !joins.iter().any(|j| j.topic == r.join.topic) {
                joins.push(r.join.clone());
            }
        }
        joins
    }

    /// Deliver `event` to every registration on `topic`.
    fn deliver(&self, topic: &str, event: TopicEvent) {
        // Collect first so handlers never run under a registry lock.
        let targets: Vec<(u64, TopicHandler)> = self
            .registrations
            .iter()
            .filter(|r| r.join.topic == topic)
            .map(|r| (*r.key(), Arc::clone(&r.handler)))
            .collect();

        if targets.is_empty() {
            trace!(topic, "no registrations for realtime frame");
        }
        for (id, handler) in targets {
            if self.registrations.contains_key(&id) {
                handler(event.clone());
            }
        }
    }

    fn deliver_all(&self, status: TopicStatus) {
        let targets: Vec<TopicHandler> = self
            .registrations
            .iter()
            .map(|r| Arc::clone(&r.handler))
            .collect();
        for handler in targets {
            handler(TopicEvent::Status(status.clone()));
        }
    }

    /// Parse one text frame from the server and route it.
    pub fn dispatch_text(&self, text: &str) -> Result<(), BackendError> {
        let frame: InboundFrame = serde_json::from_str(text)?;

        let change = |kind| {
            TopicEvent::Change(ChangeFrame {
                kind,
                record: frame.record.clone(),
                old_record: frame.old_record.clone(),
            })
        };

        let event = match frame.kind.as_str() {
            "insert" => change(ChangeKind::Insert),
            "update" => change(ChangeKind::Update),
            "delete" => change(ChangeKind::Delete),
            "status" => match frame.status.as_deref() {
                Some("subscribed") => TopicEvent::Status(TopicStatus::Joined),
                Some("closed") => TopicEvent::Status(TopicStatus::Disconnected),
                Some("error") => TopicEvent::Status(TopicStatus::Rejected(
                    frame.message.clone().unwrap_or_else(|| "unknown error".to_string()),
                )),
                other => {
                    trace!(status = ?other, topic = %frame.topic, "ignoring realtime status");
                    return Ok(());
                }
            },
            "heartbeat" => return Ok(()),
            other => {
                trace!(kind = %other, "ignoring unknown realtime frame");
                return Ok(());
            }
        };

        if frame.topic.is_empty() {
            return Err(BackendError::Malformed(format!(
                "{} frame without topic",
                frame.kind
            )));
        }

        match &event {
            TopicEvent::Status(TopicStatus::Joined) => {
                self.joined.insert(frame.topic.clone());
            }
            TopicEvent::Status(TopicStatus::Disconnected | TopicStatus::Rejected(_)) => {
                self.joined.remove(&frame.topic);
            }
            _ => {}
        }

        self.deliver(&frame.topic, event);
        Ok(())
    }
}

impl TransportDriver {
    /// Run the connection loop until shutdown.
    pub async fn run(mut self) {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            max_elapsed_time: None, // Retry forever
            ..Default::default()
        };

        loop {
            if *self.shutdown_rx.borrow() {
                info!("realtime transport shutting down");
                return;
            }

            match self.connect_and_process(&mut backoff).await {
                Ok(()) => {
                    info!("realtime transport stopped");
                    return;
                }
                Err(e) => {
                    let was_connected = self.transport.connected.swap(false, Ordering::SeqCst);
                    self.transport.joined.clear();
                    if was_connected {
                        self.transport.deliver_all(TopicStatus::Disconnected);
                    }
                    error!(error = %e, "realtime connection error, reconnecting");

                    let wait = backoff.next_backoff().unwrap_or(Duration::from_secs(60));
                    tokio::select! {
                        _ = self.shutdown_rx.changed() => {
                            if *self.shutdown_rx.borrow() {
                                return;
                            }
                        }
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }
    }

    async fn connect_and_process(
        &mut self,
        backoff: &mut ExponentialBackoff,
    ) -> Result<(), BackendError> {
        let (ws_stream, _) = connect_async(self.transport.endpoint.as_str())
            .await
            .map_err(|e| BackendError::WebSocket(format!("connection failed: {}", e)))?;
        let (mut write, mut read) = ws_stream.split();

        backoff.reset();
        self.transport.connected.store(true, Ordering::SeqCst);

        // Frames queued while offline are superseded by the re-join below.
        while self.outbound_rx.try_recv().is_ok() {}

        let joins = self.transport.live_joins();
        info!(topics = joins.len(), "realtime connected");
        for join in &joins {
            send_frame(&mut write, &OutboundFrame::subscribe(join)).await?;
        }

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;

        // Only inbound traffic pushes the deadline back.
        let idle = tokio::time::sleep(READ_TIMEOUT);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        let _ = write.send(Message::Close(None)).await;
                        self.transport.connected.store(false, Ordering::SeqCst);
                        self.transport.joined.clear();
                        return Ok(());
                    }
                }

                Some(frame) = self.outbound_rx.recv() => {
                    send_frame(&mut write, &frame).await?;
                }

                _ = heartbeat.tick() => {
                    send_frame(&mut write, &OutboundFrame::Heartbeat).await?;
                }

                _ = &mut idle => {
                    warn!("realtime read timeout after {}s", READ_TIMEOUT.as_secs());
                    return Err(BackendError::WebSocket("read timeout".to_string()));
                }

                result = read.next() => {
                    idle.as_mut().reset(Instant::now() + READ_TIMEOUT);
                    match result {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.transport.dispatch_text(&text) {
                                warn!(error = %e, "failed to handle realtime frame");
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            trace!("received ping, sending pong");
                            write
                                .send(Message::Pong(data))
                                .await
                                .map_err(|e| BackendError::WebSocket(format!("pong failed: {}", e)))?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("realtime connection closed by server");
                            return Err(BackendError::WebSocket("connection closed".to_string()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(BackendError::WebSocket(format!("read error: {}", e)));
                        }
                        None => {
                            return Err(BackendError::WebSocket("stream ended".to_string()));
                        }
                    }
                }
            }
        }
    }
}

async fn send_frame<S>(write: &mut S, frame: &OutboundFrame) -> Result<(), BackendError>
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = serde_json::to_string(frame)?;
    write
        .send(Message::Text(text))
        .await
        .map_err(|e| BackendError::WebSocket(format!("send failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording_handler() -> (TopicHandler, Arc<Mutex<Vec<TopicEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: TopicHandler = Arc::new(move |event| sink.lock().unwrap().push(event));
        (handler, seen)
    }

    fn join(topic: &str) -> JoinRequest {
        JoinRequest {
            topic: topic.to_string(),
            table: "attendees".to_string(),
            filter: Some("event_id=eq.1".to_string()),
        }
    }

    #[test]
    fn test_subscribe_reports_joining() {
        let (transport, _driver) = RealtimeTransport::new("ws://localhost");
        let (handler, seen) = recording_handler();

        let _guard = transport.subscribe(join("attendees:1"), handler);

        assert_eq!(transport.registration_count(), 1);
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[TopicEvent::Status(TopicStatus::Joining)]
        );
    }

    #[test]
    fn test_dispatch_routes_by_topic() {
        let (transport, _driver) = RealtimeTransport::new("ws://localhost");
        let (h1, seen1) = recording_handler();
        let (h2, seen2) = recording_handler();
        let _g1 = transport.subscribe(join("attendees:1"), h1);
        let _g2 = transport.subscribe(join("attendees:2"), h2);

        transport
            .dispatch_text(r#"{"topic":"attendees:1","type":"insert","record":{"id":5}}"#)
            .unwrap();

        let seen1 = seen1.lock().unwrap();
        assert_eq!(seen1.len(), 2);
        match &seen1[1] {
            TopicEvent::Change(frame) => {
                assert_eq!(frame.kind, ChangeKind::Insert);
                assert_eq!(frame.record.as_ref().unwrap()["id"], 5);
            }
            other => panic!("expected change, got {:?}", other),
        }
        assert_eq!(seen2.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_dispatch_status_frames() {
        let (transport, _driver) = RealtimeTransport::new("ws://localhost");
        let (handler, seen) = recording_handler();
        let _guard = transport.subscribe(join("t"), handler);

        transport
            .dispatch_text(r#"{"topic":"t","type":"status","status":"subscribed"}"#)
            .unwrap();
        transport
            .dispatch_text(r#"{"topic":"t","type":"status","status":"error","message":"denied"}"#)
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[1], TopicEvent::Status(TopicStatus::Joined));
        assert_eq!(
            seen[2],
            TopicEvent::Status(TopicStatus::Rejected("denied".to_string()))
        );
    }

    #[test]
    fn test_no_delivery_after_guard_dropped() {
        let (transport, _driver) = RealtimeTransport::new("ws://localhost");
        let (handler, seen) = recording_handler();
        let guard = transport.subscribe(join("t"), handler);

        guard.unsubscribe();
        transport
            .dispatch_text(r#"{"topic":"t","type":"delete","old_record":{"id":1}}"#)
            .unwrap();

        assert_eq!(transport.registration_count(), 0);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_late_subscriber_to_confirmed_topic_is_joined() {
        let (transport, _driver) = RealtimeTransport::new("ws://localhost");
        let (h1, seen1) = recording_handler();
        let _g1 = transport.subscribe(join("t"), h1);
        transport
            .dispatch_text(r#"{"topic":"t","type":"status","status":"subscribed"}"#)
            .unwrap();

        let (h2, seen2) = recording_handler();
        let _g2 = transport.subscribe(join("t"), h2);

        let joined = [
            TopicEvent::Status(TopicStatus::Joining),
            TopicEvent::Status(TopicStatus::Joined),
        ];
        assert_eq!(seen1.lock().unwrap().as_slice(), &joined);
        assert_eq!(seen2.lock().unwrap().as_slice(), &joined);
    }

    #[test]
    fn test_joined_topic_forgotten_after_close_or_last_leave() {
        let (transport, _driver) = RealtimeTransport::new("ws://localhost");
        let (h1, _) = recording_handler();
        let g1 = transport.subscribe(join("t"), h1);
        transport
            .dispatch_text(r#"{"topic":"t","type":"status","status":"subscribed"}"#)
            .unwrap();
        transport
            .dispatch_text(r#"{"topic":"t","type":"status","status":"closed"}"#)
            .unwrap();

        let (h2, seen2) = recording_handler();
        let g2 = transport.subscribe(join("t"), h2);
        assert_eq!(
            seen2.lock().unwrap().as_slice(),
            &[TopicEvent::Status(TopicStatus::Joining)]
        );

        transport
            .dispatch_text(r#"{"topic":"t","type":"status","status":"subscribed"}"#)
            .unwrap();
        drop(g1);
        drop(g2);

        let (h3, seen3) = recording_handler();
        let _g3 = transport.subscribe(join("t"), h3);
        assert_eq!(
            seen3.lock().unwrap().as_slice(),
            &[TopicEvent::Status(TopicStatus::Joining)]
        );
    }

    #[test]
    fn test_malformed_frames() {
        let (transport, _driver) = RealtimeTransport::new("ws://localhost");
        assert!(matches!(
            transport.dispatch_text("not json"),
            Err(BackendError::Json(_))
        ));
        assert!(matches!(
            transport.dispatch_text(r#"{"type":"insert","record":{}}"#),
            Err(BackendError::Malformed(_))
        ));
        // Unknown frame kinds are ignored.
        assert!(transport.dispatch_text(r#"{"type":"presence"}"#).is_ok());
    }

    #[test]
    fn test_live_joins_deduplicates_topics() {
        let (transport, _driver) = RealtimeTransport::new("ws://localhost");
        let (h1, _) = recording_handler();
        let (h2, _) = recording_handler();
        let _g1 = transport.subscribe(join("t"), h1);
        let _g2 = transport.subscribe(join("t"), h2);

        assert_eq!(transport.live_joins().len(), 1);
    }

    #[test]
    fn test_outbound_frame_shape() {
        let frame = OutboundFrame::subscribe(&join("attendees:1"));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "subscribe");
        assert_eq!(json["topic"], "attendees:1");
        assert_eq!(json["filter"], "event_id=eq.1");

        let json = serde_json::to_value(OutboundFrame::Unsubscribe {
            topic: "t".to_string(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "unsubscribe", "topic": "t"}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_connection_reported_disconnected() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (transport, driver) = RealtimeTransport::new(format!("ws://{}", addr));
        let (handler, seen) = recording_handler();
        let _guard = transport.subscribe(join("attendees:1"), handler);
        tokio::spawn(driver.run());

        // Accept and confirm the join, then never send anything again while
        // keeping the socket open. Heartbeats keep going out meanwhile.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _ = ws.next().await;
        let _ = ws
            .send(Message::Text(
                r#"{"topic":"attendees:1","type":"status","status":"subscribed"}"#.to_string(),
            ))
            .await;

        let disconnected = TopicEvent::Status(TopicStatus::Disconnected);
        let mut reported = false;
        for _ in 0..60 {
            tokio::time::sleep(Duration::from_secs(5)).await;
            if seen.lock().unwrap().contains(&disconnected) {
                reported = true;
                break;
            }
        }
        transport.shutdown();
        drop(ws);

        assert!(reported, "silent connection was never reported");
    }

    #[tokio::test]
    async fn test_driver_rejoins_and_reports_disconnect() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (transport, driver) = RealtimeTransport::new(format!("ws://{}", addr));
        let (handler, seen) = recording_handler();
        let _guard = transport.subscribe(join("attendees:1"), handler);
        tokio::spawn(driver.run());

        // Accept the connection, read the re-join, confirm it, then hang up.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let first = ws.next().await.unwrap().unwrap();
        let text = first.into_text().unwrap();
        let frame: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(frame["type"], "subscribe");
        assert_eq!(frame["topic"], "attendees:1");

        ws.send(Message::Text(
            r#"{"topic":"attendees:1","type":"status","status":"subscribed"}"#.to_string(),
        ))
        .await
        .unwrap();
        ws.send(Message::Text(
            r#"{"topic":"attendees:1","type":"insert","record":{"id":1}}"#.to_string(),
        ))
        .await
        .unwrap();
        ws.close(None).await.unwrap();
        drop(ws);

        // Wait for the driver to observe the close.
        for _ in 0..100 {
            if seen
                .lock()
                .unwrap()
                .contains(&TopicEvent::Status(TopicStatus::Disconnected))
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        transport.shutdown();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], TopicEvent::Status(TopicStatus::Joining));
        assert_eq!(seen[1], TopicEvent::Status(TopicStatus::Joined));
        assert!(matches!(seen[2], TopicEvent::Change(_)));
        assert_eq!(seen[3], TopicEvent::Status(TopicStatus::Disconnected));
    }
}
