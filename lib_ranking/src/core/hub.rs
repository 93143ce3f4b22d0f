//! # Subscription hub
//!
//! Fan-out of leaderboard snapshots to subscribed clients. A single
//! coordinator task owns the routing table and consumes one command channel,
//! so registrations, subscription changes and broadcasts are serialized
//! without locks.
//!
//! Subscribers are plain `mpsc::Sender<String>` handles onto bounded
//! outbound queues; the transport behind them (websocket write task) lives
//! in the server crate. Delivery is try-send: a full queue drops that
//! subscriber's copy of the message with a warning and the subscriber stays
//! connected. Snapshots are self-contained, so the next broadcast supersedes
//! anything dropped.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::models::LeaderboardEntry;

/// Bound of each subscriber's outbound queue.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

/// Bound of the coordinator's command queue. Broadcasts that find it full
/// are dropped; control commands await their slot.
const COMMAND_QUEUE_CAPACITY: usize = 256;

pub type SubscriberId = Uuid;

/// Outbound message envelope. Every message carries a server-side timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leaderboard_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl WireMessage {
    fn new(message_type: &str, leaderboard_id: Option<String>, data: Option<Value>) -> Self {
        Self {
            message_type: message_type.to_string(),
            leaderboard_id,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn leaderboard_update(
        leaderboard_id: &str,
        entries: &[LeaderboardEntry],
        total_players: i64,
    ) -> Self {
        Self::new(
            "leaderboard_update",
            Some(leaderboard_id.to_string()),
            Some(json!({
                "leaderboard_id": leaderboard_id,
                "entries": entries,
                "total_players": total_players,
            })),
        )
    }

    pub fn player_update(leaderboard_id: &str, entry: &LeaderboardEntry) -> Self {
        Self::new(
            "player_update",
            Some(leaderboard_id.to_string()),
            Some(json!(entry)),
        )
    }

    /// `subscribed` / `unsubscribed` acknowledgements.
    pub fn ack(action: &str, leaderboard_id: &str) -> Self {
        Self::new(
            action,
            Some(leaderboard_id.to_string()),
            Some(json!({"status": "ok"})),
        )
    }

    pub fn pong() -> Self {
        Self::new("pong", None, None)
    }

    pub fn error(message: &str) -> Self {
        Self::new("error", None, Some(json!({"error": message})))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

enum HubCommand {
    Register {
        id: SubscriberId,
        outbound: mpsc::Sender<String>,
    },
    Unregister {
        id: SubscriberId,
    },
    Subscribe {
        id: SubscriberId,
        leaderboard_id: String,
    },
    Unsubscribe {
        id: SubscriberId,
        leaderboard_id: String,
    },
    Broadcast {
        message: WireMessage,
    },
    SubscriberCount {
        leaderboard_id: String,
        reply: oneshot::Sender<usize>,
    },
    Shutdown,
}

/// The coordinator. Owns all routing state; runs until shut down.
pub struct Hub {
    commands: mpsc::Receiver<HubCommand>,
    /// leaderboard id -> subscribed clients
    rooms: HashMap<String, HashSet<SubscriberId>>,
    /// every registered client
    subscribers: HashMap<SubscriberId, mpsc::Sender<String>>,
    connections: Arc<AtomicUsize>,
}

/// Cloneable handle used by the engine and the websocket layer.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
    connections: Arc<AtomicUsize>,
}

impl Hub {
    pub fn new() -> (Hub, HubHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let connections = Arc::new(AtomicUsize::new(0));
        let hub = Hub {
            commands: rx,
            rooms: HashMap::new(),
            subscribers: HashMap::new(),
            connections: Arc::clone(&connections),
        };
        let handle = HubHandle {
            commands: tx,
            connections,
        };
        (hub, handle)
    }

    /// Coordinator loop. Exits on `Shutdown` or when every handle is gone;
    /// on exit all subscriber senders are dropped, which closes the
    /// outbound queues.
    pub async fn run(mut self) {
        log::info!("subscription hub started");
        while let Some(command) = self.commands.recv().await {
            match command {
                HubCommand::Register { id, outbound } => {
                    self.subscribers.insert(id, outbound);
                    self.connections.store(self.subscribers.len(), Ordering::Relaxed);
                    log::debug!("subscriber {id} registered");
                }
                HubCommand::Unregister { id } => {
                    self.drop_subscriber(&id);
                    log::debug!("subscriber {id} unregistered");
                }
                HubCommand::Subscribe { id, leaderboard_id } => {
                    if self.subscribers.contains_key(&id) {
                        self.rooms.entry(leaderboard_id.clone()).or_default().insert(id);
                        log::debug!("subscriber {id} subscribed to {leaderboard_id}");
                    }
                }
                HubCommand::Unsubscribe { id, leaderboard_id } => {
                    if let Some(room) = self.rooms.get_mut(&leaderboard_id) {
                        room.remove(&id);
                        if room.is_empty() {
                            self.rooms.remove(&leaderboard_id);
                        }
                    }
                    log::debug!("subscriber {id} unsubscribed from {leaderboard_id}");
                }
                HubCommand::Broadcast { message } => self.dispatch(message),
                HubCommand::SubscriberCount {
                    leaderboard_id,
                    reply,
                } => {
                    let count = self.rooms.get(&leaderboard_id).map_or(0, HashSet::len);
                    let _ = reply.send(count);
                }
                HubCommand::Shutdown => break,
            }
        }
        log::info!("subscription hub stopping");
    }

    fn drop_subscriber(&mut self, id: &SubscriberId) {
        if self.subscribers.remove(id).is_some() {
            for room in self.rooms.values_mut() {
                room.remove(id);
            }
            self.rooms.retain(|_, room| !room.is_empty());
            self.connections.store(self.subscribers.len(), Ordering::Relaxed);
        }
    }

    /// Serialize once, then try-send to every target. A full outbound queue
    /// drops the message for that subscriber only; a closed queue means the
    /// transport is gone and the subscriber is removed.
    fn dispatch(&mut self, message: WireMessage) {
        let payload = message.to_json();
        let targets: Vec<SubscriberId> = match &message.leaderboard_id {
            Some(leaderboard_id) => self
                .rooms
                .get(leaderboard_id)
                .map(|room| room.iter().copied().collect())
                .unwrap_or_default(),
            None => self.subscribers.keys().copied().collect(),
        };

        let mut disconnected = Vec::new();
        for id in targets {
            let Some(outbound) = self.subscribers.get(&id) else {
                continue;
            };
            match outbound.try_send(payload.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::warn!("subscriber {id} queue full, dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => disconnected.push(id),
            }
        }
        for id in disconnected {
            self.drop_subscriber(&id);
        }
    }
}

impl HubHandle {
    /// Register a subscriber's outbound queue under a fresh id.
    pub async fn register(&self, outbound: mpsc::Sender<String>) -> SubscriberId {
        let id = Uuid::new_v4();
        let _ = self.commands.send(HubCommand::Register { id, outbound }).await;
        id
    }

    pub async fn unregister(&self, id: SubscriberId) {
        let _ = self.commands.send(HubCommand::Unregister { id }).await;
    }

    pub async fn subscribe(&self, id: SubscriberId, leaderboard_id: &str) {
        let _ = self
            .commands
            .send(HubCommand::Subscribe {
                id,
                leaderboard_id: leaderboard_id.to_string(),
            })
            .await;
    }

    pub async fn unsubscribe(&self, id: SubscriberId, leaderboard_id: &str) {
        let _ = self
            .commands
            .send(HubCommand::Unsubscribe {
                id,
                leaderboard_id: leaderboard_id.to_string(),
            })
            .await;
    }

    pub fn broadcast_leaderboard_update(
        &self,
        leaderboard_id: &str,
        entries: &[LeaderboardEntry],
        total_players: i64,
    ) {
        self.broadcast(WireMessage::leaderboard_update(
            leaderboard_id,
            entries,
            total_players,
        ));
    }

    pub fn broadcast_player_update(&self, leaderboard_id: &str, entry: &LeaderboardEntry) {
        self.broadcast(WireMessage::player_update(leaderboard_id, entry));
    }

    /// Non-blocking: a full coordinator queue drops the broadcast so the
    /// write path never stalls on fan-out.
    pub fn broadcast(&self, message: WireMessage) {
        if self
            .commands
            .try_send(HubCommand::Broadcast { message })
            .is_err()
        {
            log::warn!("hub command queue full, dropping broadcast");
        }
    }

    pub async fn subscriber_count(&self, leaderboard_id: &str) -> usize {
        let (reply, rx) = oneshot::channel();
        let sent = self
            .commands
            .send(HubCommand::SubscriberCount {
                leaderboard_id: leaderboard_id.to_string(),
                reply,
            })
            .await;
        if sent.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    pub fn total_connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(HubCommand::Shutdown).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_hub() -> HubHandle {
        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());
        handle
    }

    fn entries() -> Vec<LeaderboardEntry> {
        vec![LeaderboardEntry {
            rank: 1,
            player_id: "p1".into(),
            score: 100,
        }]
    }

    #[tokio::test]
    async fn broadcast_reaches_only_subscribers_of_the_leaderboard() {
        let hub = spawn_hub();

        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let a = hub.register(tx_a).await;
        let _b = hub.register(tx_b).await;
        hub.subscribe(a, "daily").await;
        // Barrier: the count query is processed after the commands above.
        assert_eq!(hub.subscriber_count("daily").await, 1);

        hub.broadcast_leaderboard_update("daily", &entries(), 1);
        assert_eq!(hub.subscriber_count("daily").await, 1);

        let received = rx_a.try_recv().expect("subscriber should receive");
        let value: Value = serde_json::from_str(&received).unwrap();
        assert_eq!(value["type"], "leaderboard_update");
        assert_eq!(value["leaderboard_id"], "daily");
        assert_eq!(value["data"]["total_players"], 1);
        assert_eq!(value["data"]["entries"][0]["player_id"], "p1");
        assert!(value["timestamp"].is_string());

        assert!(rx_b.try_recv().is_err(), "non-subscriber must not receive");
    }

    #[tokio::test]
    async fn untargeted_broadcast_goes_to_everyone() {
        let hub = spawn_hub();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        hub.register(tx_a).await;
        hub.register(tx_b).await;

        hub.broadcast(WireMessage::pong());
        assert_eq!(hub.subscriber_count("-").await, 0);

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn full_queue_drops_message_but_keeps_subscriber() {
        let hub = spawn_hub();
        let (tx, mut rx) = mpsc::channel(1);
        let id = hub.register(tx).await;
        hub.subscribe(id, "g").await;

        hub.broadcast_leaderboard_update("g", &entries(), 1);
        hub.broadcast_leaderboard_update("g", &entries(), 2);
        assert_eq!(hub.subscriber_count("g").await, 1, "subscriber stays");

        // Only the first snapshot fit into the queue.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());

        // Once drained, delivery resumes.
        hub.broadcast_leaderboard_update("g", &entries(), 3);
        assert_eq!(hub.subscriber_count("g").await, 1);
        let next: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(next["data"]["total_players"], 3);
    }

    #[tokio::test]
    async fn unregister_closes_queue_and_clears_subscriptions() {
        let hub = spawn_hub();
        let (tx, mut rx) = mpsc::channel(8);
        let id = hub.register(tx).await;
        hub.subscribe(id, "g").await;
        assert_eq!(hub.subscriber_count("g").await, 1);

        hub.unregister(id).await;
        assert_eq!(hub.subscriber_count("g").await, 0);
        assert_eq!(hub.total_connections(), 0);
        assert!(rx.recv().await.is_none(), "outbound queue must be closed");
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let hub = spawn_hub();
        let (tx, mut rx) = mpsc::channel(8);
        let id = hub.register(tx).await;
        hub.subscribe(id, "g").await;
        hub.unsubscribe(id, "g").await;
        assert_eq!(hub.subscriber_count("g").await, 0);

        hub.broadcast_leaderboard_update("g", &entries(), 1);
        assert_eq!(hub.subscriber_count("g").await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_transport_is_pruned_on_broadcast() {
        let hub = spawn_hub();
        let (tx, rx) = mpsc::channel(8);
        let id = hub.register(tx).await;
        hub.subscribe(id, "g").await;
        drop(rx);

        hub.broadcast_leaderboard_update("g", &entries(), 1);
        assert_eq!(hub.subscriber_count("g").await, 0);
        assert_eq!(hub.total_connections(), 0);
    }
}
