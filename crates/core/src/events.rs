//! In-process Event Bus
//!
//! Publish/subscribe broker decoupling storage mutation, worker lifecycle and
//! notification delivery. Every subscriber owns a bounded queue; `publish`
//! never waits on a subscriber. When a subscriber's queue is full the event
//! being published is dropped for that subscriber only and counted in
//! [`EventBus::dropped`] (drop-newest). Delivery order is FIFO per subscriber
//! and unspecified across subscribers.
//!
//! Subscribers pick the [`Topic`]s they consume, so a flood of presence
//! events cannot crowd lifecycle events out of the reconciler's queue. A
//! listener that still lost events is told so through
//! [`EventHandler::handle_lagged`] and is expected to resynchronise.

use crate::config::NotificationConfig;
use crate::model::Server;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Default per-subscriber queue length
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

// ============================================================================
// Events
// ============================================================================

/// Who joined or left where
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceNotice {
    pub server_id: Uuid,
    pub server_name: String,
    pub player: String,
}

impl PresenceNotice {
    pub fn new(server: &Server, player: impl Into<String>) -> Self {
        Self {
            server_id: server.id,
            server_name: server.name.clone(),
            player: player.into(),
        }
    }
}

/// Coarse event class used for subscription filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// `Init`, `ServerAdded`, `ServerDeleted`
    Lifecycle,
    /// `PlayerJoined`, `PlayerLeft`
    Presence,
    /// `ConfigChanged`
    Config,
}

impl Topic {
    pub const ALL: &'static [Topic] = &[Topic::Lifecycle, Topic::Presence, Topic::Config];
}

/// Everything that travels over the bus
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Reconcile the whole worker set against the store
    Init,
    /// A target was created
    ServerAdded(Server),
    /// A target was deleted
    ServerDeleted(Uuid),
    /// A watchlisted player appeared on a server
    PlayerJoined(PresenceNotice),
    /// A watchlisted player disappeared from a server
    PlayerLeft(PresenceNotice),
    /// The notification-service section of the config was replaced
    ConfigChanged(NotificationConfig),
}

impl Event {
    /// Wire name of the event type
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Init => "init",
            Event::ServerAdded(_) => "server.added",
            Event::ServerDeleted(_) => "server.deleted",
            Event::PlayerJoined(_) => "player.joined",
            Event::PlayerLeft(_) => "player.left",
            Event::ConfigChanged(_) => "config.changed",
        }
    }

    pub fn topic(&self) -> Topic {
        match self {
            Event::Init | Event::ServerAdded(_) | Event::ServerDeleted(_) => Topic::Lifecycle,
            Event::PlayerJoined(_) | Event::PlayerLeft(_) => Topic::Presence,
            Event::ConfigChanged(_) => Topic::Config,
        }
    }

    /// Human-readable notification text for presence events
    pub fn message(&self) -> Option<String> {
        match self {
            Event::PlayerJoined(n) => Some(format!(
                "{} joined the server {}",
                n.player, n.server_name
            )),
            Event::PlayerLeft(n) => Some(format!("{} left the server {}", n.player, n.server_name)),
            _ => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::ServerAdded(server) => write!(f, "{} {}", self.kind(), server.id),
            Event::ServerDeleted(id) => write!(f, "{} {}", self.kind(), id),
            Event::PlayerJoined(_) | Event::PlayerLeft(_) => {
                write!(f, "{} {}", self.kind(), self.message().unwrap_or_default())
            }
            _ => f.write_str(self.kind()),
        }
    }
}

/// Consumer side of the bus
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: Event);

    /// Topics this handler is subscribed to by [`EventBus::listen`]
    fn topics(&self) -> &'static [Topic] {
        Topic::ALL
    }

    /// `missed` events were dropped because this handler's queue was full.
    /// Called once the events that did fit have been handled.
    async fn handle_lagged(&self, missed: u64) {
        tracing::warn!(missed, "event handler lagged, events were lost");
    }
}

// ============================================================================
// Bus
// ============================================================================

pub type SubscriberId = Uuid;

/// Receive side handed out by [`EventBus::subscribe`]
pub type Subscription = mpsc::Receiver<Event>;

struct Subscriber {
    name: String,
    topics: Vec<Topic>,
    tx: mpsc::Sender<Event>,
    /// Events dropped for this subscriber since the listener last looked
    missed: Arc<AtomicU64>,
}

struct BusInner {
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
    capacity: usize,
    dropped: AtomicU64,
}

/// Cheaply cloneable handle to one bus
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(HashMap::new()),
                capacity: capacity.max(1),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Register a subscriber for every topic; each call yields a fresh id and queue
    pub async fn subscribe(&self, name: &str) -> (SubscriberId, Subscription) {
        self.subscribe_topics(name, Topic::ALL).await
    }

    /// Register a subscriber that only receives events of `topics`
    pub async fn subscribe_topics(
        &self,
        name: &str,
        topics: &[Topic],
    ) -> (SubscriberId, Subscription) {
        let (id, rx, _) = self.register(name, topics).await;
        (id, rx)
    }

    async fn register(
        &self,
        name: &str,
        topics: &[Topic],
    ) -> (SubscriberId, Subscription, Arc<AtomicU64>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let missed = Arc::new(AtomicU64::new(0));
        self.inner.subscribers.write().await.insert(
            id,
            Subscriber {
                name: name.to_string(),
                topics: topics.to_vec(),
                tx,
                missed: missed.clone(),
            },
        );
        tracing::info!(subscriber = %id, service = name, ?topics, "service subscribed to event bus");
        (id, rx, missed)
    }

    /// Remove a subscriber. Its queue is closed once drained; unknown ids are ignored.
    pub async fn unsubscribe(&self, id: SubscriberId) {
        if let Some(sub) = self.inner.subscribers.write().await.remove(&id) {
            tracing::info!(subscriber = %id, service = %sub.name, "service unsubscribed from event bus");
        }
    }

    /// Fan an event out to every current subscriber of its topic. Returns how
    /// many accepted it.
    pub async fn publish(&self, event: Event) -> usize {
        let topic = event.topic();
        let subscribers = self.inner.subscribers.read().await;
        let mut delivered = 0;
        for (id, sub) in subscribers.iter().filter(|(_, sub)| sub.topics.contains(&topic)) {
            tracing::debug!(subscriber = %id, event = %event, "publish event");
            match sub.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    sub.missed.fetch_add(1, Ordering::AcqRel);
                    tracing::warn!(
                        subscriber = %id,
                        service = %sub.name,
                        kind = event.kind(),
                        "subscriber queue full, event dropped"
                    );
                }
                // receiver already gone; unsubscribe will catch up
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().await.len()
    }

    /// Events discarded because a subscriber queue was full
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Subscribe to the handler's topics and dispatch events to it until
    /// `token` is cancelled.
    pub async fn listen(&self, handler: Arc<dyn EventHandler>, name: &str, token: CancellationToken) {
        let (id, rx, missed) = self.register(name, handler.topics()).await;
        self.dispatch(id, rx, missed, handler, token).await;
    }

    /// Like [`listen`](Self::listen) but in a background task. The subscription
    /// is registered before this returns, so events published afterwards reach
    /// the handler.
    pub async fn spawn_listener(
        &self,
        handler: Arc<dyn EventHandler>,
        name: &str,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let (id, rx, missed) = self.register(name, handler.topics()).await;
        let bus = self.clone();
        tokio::spawn(async move { bus.dispatch(id, rx, missed, handler, token).await })
    }

    async fn dispatch(
        &self,
        id: SubscriberId,
        mut rx: Subscription,
        missed: Arc<AtomicU64>,
        handler: Arc<dyn EventHandler>,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => handler.handle_event(event).await,
                    None => break,
                },
            }
            // a drop only happens on a full queue, so the queue drains to empty
            // at least once after every loss
            if rx.is_empty() {
                let lost = missed.swap(0, Ordering::AcqRel);
                if lost > 0 {
                    handler.handle_lagged(lost).await;
                }
            }
        }
        self.unsubscribe(id).await;
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingHandler {
        events: Mutex<Vec<Event>>,
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle_event(&self, event: Event) {
            self.events.lock().await.push(event);
        }
    }

    fn joined(player: &str) -> Event {
        Event::PlayerJoined(PresenceNotice {
            server_id: Uuid::nil(),
            server_name: "Island".to_string(),
            player: player.to_string(),
        })
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_receive_once() {
        let bus = EventBus::new(8);
        let mut receivers = Vec::new();
        for i in 0..4 {
            let (_, rx) = bus.subscribe(&format!("service-{}", i)).await;
            receivers.push(rx);
        }

        assert_eq!(bus.publish(Event::Init).await, 4);

        for rx in receivers.iter_mut() {
            assert_eq!(rx.recv().await, Some(Event::Init));
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_unsubscribed_before_publish_receives_nothing() {
        let bus = EventBus::new(8);
        let (kept, mut kept_rx) = bus.subscribe("kept").await;
        let (gone, mut gone_rx) = bus.subscribe("gone").await;
        bus.unsubscribe(gone).await;

        assert_eq!(bus.publish(Event::Init).await, 1);
        assert_eq!(kept_rx.recv().await, Some(Event::Init));
        assert_eq!(gone_rx.recv().await, None);
        assert_ne!(kept, gone);
    }

    #[tokio::test]
    async fn test_full_queue_drops_newest_without_blocking() {
        let bus = EventBus::new(2);
        let (_, mut slow) = bus.subscribe("slow").await;
        let (_, mut fast) = bus.subscribe("fast").await;

        for name in ["a", "b", "c"] {
            bus.publish(joined(name)).await;
            // the fast consumer keeps up
            assert_eq!(fast.recv().await, Some(joined(name)));
        }

        assert_eq!(bus.dropped(), 1);
        assert_eq!(slow.recv().await, Some(joined("a")));
        assert_eq!(slow.recv().await, Some(joined("b")));
        assert!(slow.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_to_dropped_receiver_is_noop() {
        let bus = EventBus::new(2);
        let (_, rx) = bus.subscribe("short-lived").await;
        drop(rx);
        assert_eq!(bus.publish(Event::Init).await, 0);
        assert_eq!(bus.dropped(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_races_publish() {
        let bus = EventBus::new(4);
        let mut tasks = Vec::new();
        for i in 0..16 {
            let bus = bus.clone();
            tasks.push(tokio::spawn(async move {
                let (id, _rx) = bus.subscribe(&format!("churn-{}", i)).await;
                tokio::task::yield_now().await;
                bus.unsubscribe(id).await;
            }));
        }
        for _ in 0..64 {
            bus.publish(Event::Init).await;
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(bus.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_listener_dispatches_until_cancelled() {
        let bus = EventBus::new(8);
        let handler = Arc::new(RecordingHandler::default());
        let token = CancellationToken::new();

        let task = bus
            .spawn_listener(handler.clone(), "recorder", token.clone())
            .await;
        bus.publish(joined("Bob")).await;

        tokio::time::timeout(Duration::from_secs(1), async {
            while handler.events.lock().await.is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("event handled");

        token.cancel();
        task.await.unwrap();
        assert_eq!(bus.subscriber_count().await, 0);

        bus.publish(joined("Alice")).await;
        assert_eq!(handler.events.lock().await.as_slice(), &[joined("Bob")]);
    }

    #[tokio::test]
    async fn test_topic_subscribers_skip_other_events() {
        let bus = EventBus::new(1);
        let (_, mut lifecycle) = bus.subscribe_topics("observer", &[Topic::Lifecycle]).await;
        let (_, mut everything) = bus.subscribe("audit").await;

        // fills the catch-all queue but never touches the lifecycle one
        assert_eq!(bus.publish(joined("Bob")).await, 1);
        let added = Event::ServerAdded(Server::new("Island", "10.0.0.1:1"));
        assert_eq!(bus.publish(added.clone()).await, 1);

        assert_eq!(lifecycle.recv().await, Some(added));
        assert_eq!(everything.recv().await, Some(joined("Bob")));
        assert_eq!(bus.dropped(), 1);
    }

    /// Blocks inside the first event until released
    struct GatedHandler {
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
        events: Mutex<Vec<Event>>,
        lagged: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl EventHandler for GatedHandler {
        async fn handle_event(&self, event: Event) {
            let first = {
                let mut events = self.events.lock().await;
                events.push(event);
                events.len() == 1
            };
            if first {
                self.entered.notify_one();
                self.release.notified().await;
            }
        }

        async fn handle_lagged(&self, missed: u64) {
            self.lagged.lock().await.push(missed);
        }
    }

    #[tokio::test]
    async fn test_listener_is_told_about_lost_events() {
        let bus = EventBus::new(1);
        let handler = Arc::new(GatedHandler {
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
            events: Mutex::new(Vec::new()),
            lagged: Mutex::new(Vec::new()),
        });
        let token = CancellationToken::new();
        let task = bus
            .spawn_listener(handler.clone(), "gated", token.clone())
            .await;

        bus.publish(joined("a")).await;
        handler.entered.notified().await;
        // "b" waits in the queue, "c" and "d" do not fit
        bus.publish(joined("b")).await;
        bus.publish(joined("c")).await;
        bus.publish(joined("d")).await;
        handler.release.notify_one();

        tokio::time::timeout(Duration::from_secs(1), async {
            while handler.lagged.lock().await.is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("lag reported");

        // reported only after the queued event was handled

        assert_eq!(handler.lagged.lock().await.as_slice(), &[2]);
        assert_eq!(
            handler.events.lock().await.as_slice(),
            &[joined("a"), joined("b")]
        );
        token.cancel();
        task.await.unwrap();
    }

    #[test]
    fn test_presence_message_format() {
        assert_eq!(
            joined("Bob").message().as_deref(),
            Some("Bob joined the server Island")
        );
        assert_eq!(Event::Init.message(), None);
        assert_eq!(Event::ServerDeleted(Uuid::nil()).kind(), "server.deleted");
    }
}
