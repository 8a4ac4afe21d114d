// src/services/broker.rs
use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use futures::StreamExt;
use redis::{AsyncCommands, Client};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing;
use uuid::Uuid;

use crate::errors::DispatchError as AppError;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Ride(String),
    DriverPool,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Ride(ride_id) => write!(f, "ride:{}", ride_id),
            Topic::DriverPool => f.write_str("drivers:pool"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Publish error: {0}")]
    PublishError(String),
}

impl From<BrokerError> for AppError {
    fn from(err: BrokerError) -> Self {
        AppError::BroadcastFailed(err.to_string())
    }
}

/// Pub/sub seam between services and whatever carries the messages.
#[async_trait]
pub trait EventBroker: Send + Sync {
    /// Returns how many subscribers the payload reached, where the backend knows.
    async fn publish(&self, topic: &Topic, payload: String) -> Result<usize, BrokerError>;
    async fn subscribe(&self, topic: &Topic) -> Result<broadcast::Receiver<String>, BrokerError>;

    /// Forgets the topic's local channel once no receiver is left on it.
    async fn release(&self, topic: &Topic);
}

// Single-instance broker
#[derive(Default)]
pub struct InProcessBroker {
    channels: DashMap<String, broadcast::Sender<String>>,
}

impl InProcessBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventBroker for InProcessBroker {
    async fn publish(&self, topic: &Topic, payload: String) -> Result<usize, BrokerError> {
        let name = topic.to_string();
        let Some(sender) = self.channels.get(&name).map(|s| s.value().clone()) else {
            return Ok(0);
        };
        // A send error only means nobody is listening right now
        match sender.send(payload) {
            Ok(reached) => Ok(reached),
            Err(_) => {
                self.channels.remove_if(&name, |_, sender| sender.receiver_count() == 0);
                Ok(0)
            }
        }
    }

    async fn subscribe(&self, topic: &Topic) -> Result<broadcast::Receiver<String>, BrokerError> {
        let sender = self
            .channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        Ok(sender.subscribe())
    }

    async fn release(&self, topic: &Topic) {
        self.channels.remove_if(&topic.to_string(), |_, sender| sender.receiver_count() == 0);
    }
}

impl InProcessBroker {
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

// Multi-instance broker: PUBLISH out, one SUBSCRIBE bridge per topic in
pub struct RedisBroker {
    client: Client,
    local: Arc<DashMap<String, Bridge>>,
}

/// Local end of one redis subscription. `generation` tells a bridge apart from its successor.
#[derive(Clone)]
struct Bridge {
    generation: Uuid,
    sender: broadcast::Sender<String>,
}

impl RedisBroker {
    pub async fn new(redis_url: &str) -> Result<Self, BrokerError> {
        let client = Client::open(redis_url).map_err(|e| BrokerError::ConnectionError(e.to_string()))?;

        // Fail at startup rather than on the first publish
        client
            .get_async_connection()
            .await
            .map_err(|e| BrokerError::ConnectionError(e.to_string()))?;

        tracing::info!("Connected to redis broker at {}", redis_url);
        Ok(Self {
            client,
            local: Arc::new(DashMap::new()),
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::Connection, BrokerError> {
        self.client
            .get_async_connection()
            .await
            .map_err(|e| BrokerError::ConnectionError(e.to_string()))
    }
}

#[async_trait]
impl EventBroker for RedisBroker {
    async fn publish(&self, topic: &Topic, payload: String) -> Result<usize, BrokerError> {
        let mut conn = self.get_connection().await?;
        let receivers: i64 = conn
            .publish(topic.to_string(), payload)
            .await
            .map_err(|e| BrokerError::PublishError(e.to_string()))?;
        Ok(receivers.max(0) as usize)
    }

    async fn subscribe(&self, topic: &Topic) -> Result<broadcast::Receiver<String>, BrokerError> {
        let name = topic.to_string();
        if let Some(bridge) = self.local.get(&name) {
            return Ok(bridge.sender.subscribe());
        }

        let mut pubsub = self.get_connection().await?.into_pubsub();
        pubsub
            .subscribe(&name)
            .await
            .map_err(|e| BrokerError::ConnectionError(e.to_string()))?;

        let bridge = match self.local.entry(name.clone()) {
            // Lost the race to another subscriber; their bridge serves us too
            Entry::Occupied(existing) => return Ok(existing.get().sender.subscribe()),
            Entry::Vacant(slot) => slot
                .insert(Bridge {
                    generation: Uuid::new_v4(),
                    sender: broadcast::channel(CHANNEL_CAPACITY).0,
                })
                .value()
                .clone(),
        };
        let receiver = bridge.sender.subscribe();

        let local = self.local.clone();
        tokio::spawn(async move {
            let Bridge { generation, sender } = bridge;
            let mut messages = pubsub.on_message();
            while let Some(msg) = messages.next().await {
                let payload = match msg.get_payload::<String>() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!("Dropping undecodable message on {}: {}", name, e);
                        continue;
                    }
                };
                if sender.send(payload).is_err() {
                    tracing::debug!("No local receivers left on {}, closing bridge", name);
                    break;
                }
            }

            // Later subscribers must open a fresh bridge instead of joining a dead one
            local.remove_if(&name, |_, current| current.generation == generation);
            tracing::info!("Redis subscription for {} closed", name);
        });

        Ok(receiver)
    }

    async fn release(&self, topic: &Topic) {
        // The bridge notices on its next message and unsubscribes
        self.local
            .remove_if(&topic.to_string(), |_, bridge| bridge.sender.receiver_count() == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_names() {
        assert_eq!(Topic::Ride("rid-1".to_string()).to_string(), "ride:rid-1");
        assert_eq!(Topic::DriverPool.to_string(), "drivers:pool");
    }

    #[tokio::test]
    async fn test_in_process_fan_out() {
        let broker = InProcessBroker::new();
        let topic = Topic::Ride("rid-1".to_string());

        let mut first = broker.subscribe(&topic).await.unwrap();
        let mut second = broker.subscribe(&topic).await.unwrap();
        let mut other = broker.subscribe(&Topic::Ride("rid-2".to_string())).await.unwrap();

        let reached = broker.publish(&topic, "hello".to_string()).await.unwrap();
        assert_eq!(reached, 2);
        assert_eq!(first.recv().await.unwrap(), "hello");
        assert_eq!(second.recv().await.unwrap(), "hello");
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_not_an_error() {
        let broker = InProcessBroker::new();
        let reached = broker.publish(&Topic::DriverPool, "nobody".to_string()).await.unwrap();
        assert_eq!(reached, 0);
    }

    #[tokio::test]
    async fn test_unused_channels_are_pruned() {
        let broker = InProcessBroker::new();
        let topic = Topic::Ride("rid-1".to_string());

        let receiver = broker.subscribe(&topic).await.unwrap();
        broker.release(&topic).await;
        assert_eq!(broker.channel_count(), 1);

        drop(receiver);
        broker.release(&topic).await;
        assert_eq!(broker.channel_count(), 0);

        // Publishing into a channel whose receivers are gone drops it too
        let receiver = broker.subscribe(&topic).await.unwrap();
        drop(receiver);
        assert_eq!(broker.publish(&topic, "late".to_string()).await.unwrap(), 0);
        assert_eq!(broker.channel_count(), 0);

        // A fresh subscriber after pruning still hears new events
        let mut again = broker.subscribe(&topic).await.unwrap();
        assert_eq!(broker.publish(&topic, "hello".to_string()).await.unwrap(), 1);
        assert_eq!(again.recv().await.unwrap(), "hello");
    }
}
