//! Broadcast hub: fans telemetry and alert envelopes out to live subscribers.
//!
//! The subscriber registry lives inside a single task. Everything else talks
//! to it through [`HubHandle`], which only enqueues commands on an unbounded
//! channel, so producers never wait on the registry or on a slow consumer.
//! Each subscriber has a bounded queue; when a delivery finds it full the
//! subscriber is dropped from the registry and its queue closed.

use crate::metrics::{HUB_EVICTIONS_TOTAL, HUB_SUBSCRIBERS};
use crate::model::Role;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Serialized envelope shared by every recipient of one publish
pub type Message = Arc<str>;

/// Outer wire wrapper for every broadcast message
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    pub channel: &'a str,
    pub data: &'a Value,
    pub meta: &'a Value,
}

/// Registry side of a subscription
#[derive(Debug)]
pub struct Subscriber {
    pub id: Uuid,
    pub role: Role,
    tx: mpsc::Sender<Message>,
}

/// Consumer side of a subscription. The receiver yields `None` once the hub
/// has evicted or unregistered the subscriber.
#[derive(Debug)]
pub struct Subscription {
    pub id: Uuid,
    pub role: Role,
    pub receiver: mpsc::Receiver<Message>,
}

impl Subscriber {
    pub fn channel(role: Role, capacity: usize) -> (Subscriber, Subscription) {
        let id = Uuid::new_v4();
        let (tx, receiver) = mpsc::channel(capacity);
        (Subscriber { id, role, tx }, Subscription { id, role, receiver })
    }
}

enum Command {
    Register(Subscriber),
    Unregister(Uuid),
    Publish { message: Message, roles: Vec<Role> },
    Count(oneshot::Sender<usize>),
    Contains(Uuid, oneshot::Sender<bool>),
}

#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<Command>,
    queue_capacity: usize,
}

impl HubHandle {
    /// Creates a subscriber with the hub's queue capacity and registers it
    pub fn subscribe(&self, role: Role) -> Subscription {
        let (subscriber, subscription) = Subscriber::channel(role, self.queue_capacity);
        self.register(subscriber);
        subscription
    }

    /// Adds a subscriber; registering an id that is already present is a no-op
    pub fn register(&self, subscriber: Subscriber) {
        self.send(Command::Register(subscriber));
    }

    /// Removes a subscriber; unknown ids are ignored
    pub fn unregister(&self, id: Uuid) {
        self.send(Command::Unregister(id));
    }

    /// Delivers `{channel, data, meta}` to every subscriber whose role is in
    /// `roles`, or to all subscribers when `roles` is empty. Never blocks.
    pub fn publish(&self, channel: &str, data: Value, meta: Value, roles: &[Role]) {
        let envelope = Envelope {
            channel,
            data: &data,
            meta: &meta,
        };
        let message: Message = match serde_json::to_string(&envelope) {
            Ok(json) => json.into(),
            Err(e) => {
                error!("Failed to serialize {} envelope: {}", channel, e);
                return;
            }
        };
        self.send(Command::Publish {
            message,
            roles: roles.to_vec(),
        });
    }

    /// Number of registered subscribers, as seen after every command sent so far
    pub async fn subscriber_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Count(reply));
        rx.await.unwrap_or(0)
    }

    pub async fn contains(&self, id: Uuid) -> bool {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Contains(id, reply));
        rx.await.unwrap_or(false)
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            debug!("Hub stopped, dropping command");
        }
    }
}

pub struct Hub {
    subscribers: HashMap<Uuid, Subscriber>,
    rx: mpsc::UnboundedReceiver<Command>,
}

impl Hub {
    /// Starts the hub loop. It runs until every handle has been dropped.
    pub fn spawn(queue_capacity: usize) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Hub {
            subscribers: HashMap::new(),
            rx,
        };
        let handle = HubHandle {
            tx,
            queue_capacity: queue_capacity.max(1),
        };
        (handle, tokio::spawn(hub.run()))
    }

    async fn run(mut self) {
        info!("Starting broadcast hub");

        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Register(subscriber) => {
                    if self.subscribers.contains_key(&subscriber.id) {
                        continue;
                    }
                    debug!("Subscriber {} registered as {}", subscriber.id, subscriber.role);
                    self.subscribers.insert(subscriber.id, subscriber);
                }
                Command::Unregister(id) => {
                    if self.subscribers.remove(&id).is_some() {
                        debug!("Subscriber {} unregistered", id);
                    }
                }
                Command::Publish { message, roles } => self.deliver(&message, &roles),
                Command::Count(reply) => {
                    let _ = reply.send(self.subscribers.len());
                }
                Command::Contains(id, reply) => {
                    let _ = reply.send(self.subscribers.contains_key(&id));
                }
            }
            HUB_SUBSCRIBERS.set(self.subscribers.len() as f64);
        }

        // Dropping the senders closes every subscriber queue
        self.subscribers.clear();
        HUB_SUBSCRIBERS.set(0.0);
        info!("Broadcast hub stopped");
    }

    fn deliver(&mut self, message: &Message, roles: &[Role]) {
        self.subscribers.retain(|id, subscriber| {
            if !roles.is_empty() && !roles.contains(&subscriber.role) {
                return true;
            }
            match subscriber.tx.try_send(message.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    HUB_EVICTIONS_TOTAL.inc();
                    warn!("Subscriber {} queue full, evicting", id);
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Subscriber {} disconnected, removing", id);
                    false
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc::error::TryRecvError;

    #[tokio::test]
    async fn test_role_filtering() {
        let (hub, _task) = Hub::spawn(DEFAULT_QUEUE_CAPACITY);
        let mut admin = hub.subscribe(Role::Admin);
        let mut user = hub.subscribe(Role::User);

        hub.publish("alert", json!({"device_id": 1}), json!({}), &[Role::Admin]);
        assert_eq!(hub.subscriber_count().await, 2);

        let msg = admin.receiver.try_recv().unwrap();
        let value: Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(value["channel"], "alert");
        assert_eq!(value["data"]["device_id"], 1);
        assert!(value["meta"].is_object());

        assert!(matches!(user.receiver.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_empty_roles_reach_everyone() {
        let (hub, _task) = Hub::spawn(DEFAULT_QUEUE_CAPACITY);
        let mut admin = hub.subscribe(Role::Admin);
        let mut user = hub.subscribe(Role::User);

        hub.publish("telemetry", json!({"fuel": 40.0}), json!({}), &[]);
        hub.subscriber_count().await;

        assert!(admin.receiver.try_recv().is_ok());
        assert!(user.receiver.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_full_queue_evicts_without_blocking() {
        let (hub, _task) = Hub::spawn(4);
        let mut slow = hub.subscribe(Role::User);
        let bystander = hub.subscribe(Role::Admin);

        let publishing = async {
            for i in 0..10 {
                hub.publish("telemetry", json!({ "seq": i }), json!({}), &[Role::User]);
            }
        };
        tokio::time::timeout(Duration::from_secs(1), publishing)
            .await
            .expect("publishing must never block");

        assert!(!hub.contains(slow.id).await);
        assert!(hub.contains(bystander.id).await);

        // The first four queued messages are still readable, then the queue is closed
        let mut seen = Vec::new();
        while let Some(msg) = slow.receiver.recv().await {
            let value: Value = serde_json::from_str(&msg).unwrap();
            seen.push(value["data"]["seq"].as_i64().unwrap());
        }
        assert_eq!(seen, vec![0, 1, 2, 3]);

        hub.publish("telemetry", json!({ "seq": 99 }), json!({}), &[]);
        hub.subscriber_count().await;
        assert!(slow.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_overflow_at_default_capacity() {
        let (hub, _task) = Hub::spawn(DEFAULT_QUEUE_CAPACITY);
        let sub = hub.subscribe(Role::Admin);

        for i in 0..=DEFAULT_QUEUE_CAPACITY {
            hub.publish("alert", json!({ "seq": i }), json!({}), &[Role::Admin]);
        }

        assert_eq!(hub.subscriber_count().await, 0);
        assert!(!hub.contains(sub.id).await);
    }

    #[tokio::test]
    async fn test_register_and_unregister_are_idempotent() {
        let (hub, _task) = Hub::spawn(DEFAULT_QUEUE_CAPACITY);
        let (subscriber, mut subscription) = Subscriber::channel(Role::Admin, 8);
        let id = subscriber.id;
        let duplicate = Subscriber {
            id,
            role: Role::User,
            tx: subscriber.tx.clone(),
        };

        hub.register(subscriber);
        hub.register(duplicate);
        assert_eq!(hub.subscriber_count().await, 1);

        // The first registration wins, so admin-only traffic still arrives
        hub.publish("alert", json!({}), json!({}), &[Role::Admin]);
        hub.subscriber_count().await;
        assert!(subscription.receiver.try_recv().is_ok());

        hub.unregister(id);
        hub.unregister(id);
        assert_eq!(hub.subscriber_count().await, 0);
        assert!(!hub.contains(id).await);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_removed_on_publish() {
        let (hub, _task) = Hub::spawn(DEFAULT_QUEUE_CAPACITY);
        let sub = hub.subscribe(Role::User);
        let id = sub.id;
        drop(sub);

        assert!(hub.contains(id).await);
        hub.publish("telemetry", json!({}), json!({}), &[]);
        assert!(!hub.contains(id).await);
    }

    #[tokio::test]
    async fn test_concurrent_publishers() {
        let (hub, _task) = Hub::spawn(DEFAULT_QUEUE_CAPACITY);
        let mut sub = hub.subscribe(Role::Admin);

        let mut tasks = Vec::new();
        for producer in 0..8 {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..10 {
                    hub.publish("telemetry", json!({ "p": producer, "i": i }), json!({}), &[]);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(hub.subscriber_count().await, 1);
        let mut received = 0;
        while sub.receiver.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 80);
    }

    #[tokio::test]
    async fn test_hub_stops_when_handles_dropped() {
        let (hub, task) = Hub::spawn(DEFAULT_QUEUE_CAPACITY);
        let mut sub = hub.subscribe(Role::User);
        drop(hub);

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(sub.receiver.recv().await.is_none());
    }
}
