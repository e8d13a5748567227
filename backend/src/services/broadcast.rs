//! Live update fanout
//!
//! Connections register with the [`Broadcaster`] and subscribe to user or
//! device keys. Published messages are encoded once and pushed into each
//! matching connection's bounded channel. A [`Backplane`] optionally relays
//! messages to other instances.

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What a connection subscribes to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionKey {
    User(Uuid),
    Device(String),
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionKey::User(id) => write!(f, "user:{}", id),
            SubscriptionKey::Device(id) => write!(f, "device:{}", id),
        }
    }
}

impl FromStr for SubscriptionKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("user", id)) => Uuid::parse_str(id)
                .map(SubscriptionKey::User)
                .map_err(|_| format!("Invalid user key: {}", s)),
            Some(("device", id)) if !id.is_empty() => Ok(SubscriptionKey::Device(id.to_string())),
            _ => Err(format!("Unknown subscription key: {}", s)),
        }
    }
}

pub type ConnectionId = u64;

#[derive(Clone)]
struct Subscriber {
    tx: mpsc::Sender<Arc<str>>,
    session_filter: Option<Uuid>,
}

impl Subscriber {
    fn accepts(&self, session_id: Option<Uuid>) -> bool {
        match self.session_filter {
            Some(filter) => session_id == Some(filter),
            None => true,
        }
    }
}

/// Message as relayed between instances
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub origin: Uuid,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    pub payload: String,
}

/// Cross-instance transport for live messages
#[async_trait]
pub trait Backplane: Send + Sync {
    async fn publish(&self, envelope: &Envelope) -> anyhow::Result<()>;

    fn name(&self) -> &'static str;
}

/// Single-instance deployments: nothing leaves the process
#[derive(Debug, Default)]
pub struct LocalBackplane;

#[async_trait]
impl Backplane for LocalBackplane {
    async fn publish(&self, _envelope: &Envelope) -> anyhow::Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// Redis pub/sub backplane
pub struct RedisBackplane {
    conn: ConnectionManager,
    channel: String,
}

impl RedisBackplane {
    pub fn new(conn: ConnectionManager, channel: impl Into<String>) -> Self {
        Self {
            conn,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl Backplane for RedisBackplane {
    async fn publish(&self, envelope: &Envelope) -> anyhow::Result<()> {
        let payload = serde_json::to_string(envelope)?;
        let mut conn = self.conn.clone();
        redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(payload)
            .query_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Subscription registry and fanout
pub struct Broadcaster {
    instance_id: Uuid,
    channel_capacity: usize,
    next_id: AtomicU64,
    subscriptions: DashMap<SubscriptionKey, HashMap<ConnectionId, Subscriber>>,
    connections: DashMap<ConnectionId, mpsc::Sender<Arc<str>>>,
    backplane: Arc<dyn Backplane>,
}

impl Broadcaster {
    pub fn new(backplane: Arc<dyn Backplane>, channel_capacity: usize) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            channel_capacity: channel_capacity.max(1),
            next_id: AtomicU64::new(1),
            subscriptions: DashMap::new(),
            connections: DashMap::new(),
            backplane,
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Register a connection and return the receiving end of its outbound channel
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<Arc<str>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        self.connections.insert(id, tx);
        metrics::gauge!("live_subscribers").set(self.connections.len() as f64);
        (id, rx)
    }

    pub fn subscribe(&self, connection: ConnectionId, key: SubscriptionKey, session_filter: Option<Uuid>) -> bool {
        let Some(tx) = self.connections.get(&connection).map(|c| c.clone()) else {
            return false;
        };
        debug!(connection, key = %key, "Subscribed");
        self.subscriptions
            .entry(key)
            .or_default()
            .insert(connection, Subscriber { tx, session_filter });
        true
    }

    pub fn unsubscribe(&self, connection: ConnectionId, key: &SubscriptionKey) {
        if let Some(mut subscribers) = self.subscriptions.get_mut(key) {
            subscribers.remove(&connection);
        }
        self.subscriptions.remove_if(key, |_, subscribers| subscribers.is_empty());
    }

    /// Drop a connection and every subscription it holds
    pub fn disconnect(&self, connection: ConnectionId) {
        self.connections.remove(&connection);
        for mut entry in self.subscriptions.iter_mut() {
            entry.value_mut().remove(&connection);
        }
        self.subscriptions.retain(|_, subscribers| !subscribers.is_empty());
        metrics::gauge!("live_subscribers").set(self.connections.len() as f64);
    }

    /// Fan a message out locally and through the backplane. Never fails.
    pub async fn publish<T: Serialize>(&self, key: &SubscriptionKey, session_id: Option<Uuid>, message: &T) {
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to encode live message");
                return;
            }
        };

        let envelope = Envelope {
            origin: self.instance_id,
            key: key.to_string(),
            session_id,
            payload,
        };
        self.deliver_local(key, session_id, Arc::from(envelope.payload.as_str()));
        metrics::counter!("live_messages_published_total").increment(1);

        if let Err(e) = self.backplane.publish(&envelope).await {
            warn!(backplane = self.backplane.name(), error = %e, "Backplane publish failed");
        }
    }

    /// Deliver to this instance's subscribers; returns how many received it
    pub fn deliver_local(&self, key: &SubscriptionKey, session_id: Option<Uuid>, payload: Arc<str>) -> usize {
        let targets: Vec<(ConnectionId, Subscriber)> = match self.subscriptions.get(key) {
            Some(subscribers) => subscribers
                .iter()
                .filter(|(_, s)| s.accepts(session_id))
                .map(|(id, s)| (*id, s.clone()))
                .collect(),
            None => return 0,
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, subscriber) in targets {
            match subscriber.tx.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    metrics::counter!("live_messages_dropped_total").increment(1);
                    debug!(connection = id, key = %key, "Subscriber channel full, message dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id),
            }
        }

        for id in closed {
            self.disconnect(id);
        }
        delivered
    }

    /// Handle an envelope received from the backplane
    pub fn deliver_remote(&self, envelope: Envelope) -> usize {
        if envelope.origin == self.instance_id {
            return 0;
        }
        match envelope.key.parse::<SubscriptionKey>() {
            Ok(key) => self.deliver_local(&key, envelope.session_id, Arc::from(envelope.payload)),
            Err(e) => {
                warn!(error = %e, "Dropping relayed message");
                0
            }
        }
    }

    /// Remove connections whose receiving task has gone away
    pub fn prune(&self) -> usize {
        let dead: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|c| c.value().is_closed())
            .map(|c| *c.key())
            .collect();
        for id in &dead {
            self.disconnect(*id);
        }
        if !dead.is_empty() {
            debug!(pruned = dead.len(), "Pruned live connections");
        }
        dead.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn subscriber_count(&self, key: &SubscriptionKey) -> usize {
        self.subscriptions.get(key).map(|s| s.len()).unwrap_or(0)
    }
}

/// Subscribe to the backplane channel and deliver remote messages locally
/// until `shutdown` flips.
pub fn spawn_relay(
    client: redis::Client,
    channel: String,
    broadcaster: Arc<Broadcaster>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let conn = match client.get_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "Backplane relay could not connect; remote updates disabled");
                return;
            }
        };
        let mut pubsub = conn.into_pubsub();
        if let Err(e) = pubsub.subscribe(&channel).await {
            warn!(channel = %channel, error = %e, "Backplane subscribe failed");
            return;
        }
        info!(channel = %channel, "Backplane relay started");

        let mut messages = pubsub.on_message();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                message = messages.next() => {
                    let Some(message) = message else {
                        warn!("Backplane relay stream ended");
                        break;
                    };
                    let envelope = message
                        .get_payload::<String>()
                        .map_err(anyhow::Error::from)
                        .and_then(|raw| serde_json::from_str::<Envelope>(&raw).map_err(anyhow::Error::from));
                    match envelope {
                        Ok(envelope) => {
                            broadcaster.deliver_remote(envelope);
                        }
                        Err(e) => warn!(error = %e, "Invalid backplane message"),
                    }
                }
            }
        }
        info!("Backplane relay stopped");
    })
}
