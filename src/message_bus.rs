use crate::container::{ContainerError, ContainerResult};
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, Mutex};

const TOPIC_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub topic: String,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub target: Option<String>,
}

impl PublishOptions {
    pub fn to_window(name: impl Into<String>) -> Self {
        Self {
            target: Some(name.into()),
        }
    }
}

pub struct Subscription {
    id: u64,
    topic: String,
    owner: Option<String>,
    receiver: broadcast::Receiver<BusMessage>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) if self.accepts(&message) => return Some(message),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "Subscription {} on '{}' lagged, {} messages skipped",
                        self.id, self.topic, skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.receiver.try_recv() {
                Ok(message) if self.accepts(&message) => return Some(message),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    fn accepts(&self, message: &BusMessage) -> bool {
        match (&message.target, &self.owner) {
            (None, _) => true,
            (Some(target), Some(owner)) => target == owner,
            (Some(_), None) => false,
        }
    }
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn subscribe(&self, topic: &str) -> ContainerResult<Subscription>;

    async fn subscribe_as(&self, topic: &str, window_name: &str) -> ContainerResult<Subscription>;

    async fn unsubscribe(&self, subscription: Subscription) -> ContainerResult<()>;

    async fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
        options: PublishOptions,
    ) -> ContainerResult<usize>;
}

#[derive(Default)]
pub struct LocalMessageBus {
    topics: Mutex<HashMap<String, broadcast::Sender<BusMessage>>>,
    next_id: AtomicU64,
}

impl LocalMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    async fn open(&self, topic: &str, owner: Option<String>) -> ContainerResult<Subscription> {
        if topic.is_empty() {
            return Err(ContainerError::BackendOperationFailed {
                operation: "subscribe",
                message: "topic must not be empty".to_string(),
            });
        }

        let mut topics = self.topics.lock().await;
        let sender = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("Subscription {} opened on '{}'", id, topic);

        Ok(Subscription {
            id,
            topic: topic.to_string(),
            owner,
            receiver: sender.subscribe(),
        })
    }

    pub async fn topic_count(&self) -> usize {
        self.topics.lock().await.len()
    }
}

#[async_trait]
impl MessageBus for LocalMessageBus {
    async fn subscribe(&self, topic: &str) -> ContainerResult<Subscription> {
        self.open(topic, None).await
    }

    async fn subscribe_as(&self, topic: &str, window_name: &str) -> ContainerResult<Subscription> {
        self.open(topic, Some(window_name.to_string())).await
    }

    async fn unsubscribe(&self, subscription: Subscription) -> ContainerResult<()> {
        let Subscription {
            id,
            topic,
            receiver,
            ..
        } = subscription;
        drop(receiver);

        let mut topics = self.topics.lock().await;
        if let Some(sender) = topics.get(&topic) {
            if sender.receiver_count() == 0 {
                topics.remove(&topic);
                debug!("Topic '{}' has no subscribers left, removed", topic);
            }
        }
        debug!("Subscription {} on '{}' closed", id, topic);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
        options: PublishOptions,
    ) -> ContainerResult<usize> {
        let topics = self.topics.lock().await;
        let Some(sender) = topics.get(topic) else {
            debug!("No subscribers on '{}', message dropped", topic);
            return Ok(0);
        };

        let message = BusMessage {
            topic: topic.to_string(),
            payload,
            target: options.target,
        };
        Ok(sender.send(message).unwrap_or(0))
    }
}
