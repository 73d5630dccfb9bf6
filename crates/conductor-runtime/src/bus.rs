//! Coordination Bus
//!
//! Topic-based publish/subscribe with request/reply correlation.
//!
//! - Patterns: `*` matches everything, `prefix.*` matches a topic family,
//!   anything else matches exactly
//! - Delivery is fire-and-forget: every matching handler runs on its own
//!   task, so a failing or panicking handler never blocks the others
//! - `request` waits for the first message on `response.<correlation-id>`
//!   and always removes its one-shot subscription
//!
//! The subscription table is a `DashMap`; `publish` snapshots the matching
//! handlers before dispatch, so concurrent subscribe/unsubscribe is safe.

use conductor_core::config::BusSettings;
use conductor_core::error::{ConductorError, Result};
use conductor_core::message::{topic_matches, topics, Message};
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use uuid::Uuid;

/// Identifier returned by `subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message handler; errors are logged by the bus, never propagated
pub type Handler = Arc<dyn Fn(Message) -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct Subscription {
    pattern: String,
    owner: Option<String>,
    handler: Handler,
}

impl Subscription {
    fn accepts(&self, message: &Message) -> bool {
        if !topic_matches(&self.pattern, &message.topic) {
            return false;
        }
        match (&message.to, &self.owner) {
            (Some(recipient), Some(owner)) => recipient == owner,
            _ => true,
        }
    }
}

/// Publish/subscribe bus shared by the planner, executor and critic
pub struct CoordinationBus {
    subscriptions: DashMap<SubscriptionId, Arc<Subscription>>,

    /// Recently published messages (oldest dropped first)
    history: RwLock<VecDeque<Message>>,

    history_limit: usize,
    default_timeout: Duration,
    closed: AtomicBool,
}

impl CoordinationBus {
    /// Create a bus with default settings
    pub fn new() -> Self {
        Self::with_settings(&BusSettings::default())
    }

    pub fn with_settings(settings: &BusSettings) -> Self {
        Self {
            subscriptions: DashMap::new(),
            history: RwLock::new(VecDeque::with_capacity(settings.history_limit.min(1024))),
            history_limit: settings.history_limit,
            default_timeout: Duration::from_millis(settings.request_timeout_ms),
            closed: AtomicBool::new(false),
        }
    }

    /// Register `handler` for every topic matching `pattern`
    pub fn subscribe<F, Fut>(&self, pattern: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.insert(pattern.into(), None, handler)
    }

    /// Like `subscribe`, but messages addressed to someone else are skipped
    pub fn subscribe_as<F, Fut>(
        &self,
        owner: impl Into<String>,
        pattern: impl Into<String>,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.insert(pattern.into(), Some(owner.into()), handler)
    }

    fn insert<F, Fut>(&self, pattern: String, owner: Option<String>, handler: F) -> SubscriptionId
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let id = SubscriptionId(Uuid::new_v4());
        let handler: Handler = Arc::new(move |message| Box::pin(handler(message)));
        tracing::debug!(subscription = %id, pattern = %pattern, "subscribed");
        self.subscriptions.insert(
            id,
            Arc::new(Subscription {
                pattern,
                owner,
                handler,
            }),
        );
        id
    }

    /// Remove a subscription; unknown ids are ignored
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if self.subscriptions.remove(&id).is_some() {
            tracing::debug!(subscription = %id, "unsubscribed");
        }
    }

    /// Deliver `message` to every matching subscription
    ///
    /// Returns once every handler has been scheduled. Messages whose ttl has
    /// already elapsed are recorded but not delivered.
    ///
    /// The sender owns `id` and `timestamp`, and the ttl counts from that
    /// timestamp, so relayed messages keep their original age. A nil id is
    /// replaced with a fresh one and a timestamp in the future is clamped to
    /// now.
    ///
    /// # Errors
    ///
    /// Returns `MessageBus` carrying the message if the bus is shut down.
    pub async fn publish(&self, mut message: Message) -> Result<Uuid> {
        if self.is_closed() {
            return Err(ConductorError::MessageBus {
                reason: "bus is shut down".to_string(),
                message: Box::new(message),
            });
        }

        let now = conductor_core::types::now();
        if message.id.is_nil() {
            message.id = Uuid::new_v4();
        }
        if message.timestamp > now {
            tracing::debug!(topic = %message.topic, "clamping future message timestamp");
            message.timestamp = now;
        }

        let id = message.id;
        self.record(message.clone()).await;

        if message.is_expired_at(now) {
            tracing::debug!(topic = %message.topic, message_id = %id, "dropping expired message");
            return Ok(id);
        }

        let targets: Vec<Arc<Subscription>> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.value().accepts(&message))
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        tracing::trace!(topic = %message.topic, handlers = targets.len(), "publishing");

        for subscription in targets {
            let message = message.clone();
            tokio::spawn(async move {
                let topic = message.topic.clone();
                if let Err(e) = (subscription.handler)(message).await {
                    tracing::warn!(topic = %topic, pattern = %subscription.pattern, "handler failed: {}", e);
                }
            });
        }

        Ok(id)
    }

    /// Publish `request` and wait for the first reply
    ///
    /// The bus assigns the correlation id; responders answer with
    /// [`CoordinationBus::reply`].
    ///
    /// # Errors
    ///
    /// `RequestTimeout` when nothing answers within `timeout`; `MessageBus`
    /// when the bus shuts down while waiting.
    pub async fn request(&self, request: Message, timeout: Duration) -> Result<Message> {
        let correlation_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel::<Message>();
        let tx = Arc::new(Mutex::new(Some(tx)));

        let subscription = self.subscribe(topics::response(&correlation_id), move |reply| {
            let tx = Arc::clone(&tx);
            async move {
                if let Some(tx) = tx.lock().await.take() {
                    let _ = tx.send(reply);
                }
                Ok(())
            }
        });
        let _guard = SubscriptionGuard {
            bus: self,
            id: subscription,
        };

        let request = request.with_correlation_id(correlation_id);
        let topic = request.topic.clone();
        self.publish(request.clone()).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ConductorError::MessageBus {
                reason: "reply channel closed before a response arrived".to_string(),
                message: Box::new(request),
            }),
            Err(_) => {
                tracing::warn!(topic = %topic, "request timed out");
                Err(ConductorError::RequestTimeout {
                    topic,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// `request` with the configured default deadline
    pub async fn request_default(&self, request: Message) -> Result<Message> {
        self.request(request, self.default_timeout).await
    }

    /// Answer a request carrying `correlation_id`
    pub async fn reply(
        &self,
        correlation_id: &str,
        from: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<Uuid> {
        let message = Message::new(topics::response(correlation_id), from, payload)
            .with_correlation_id(correlation_id);
        self.publish(message).await
    }

    /// Drop every subscription and refuse further publishes
    ///
    /// Calling it again is a no-op.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let removed = self.subscriptions.len();
        self.subscriptions.clear();
        tracing::info!(subscriptions = removed, "coordination bus shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    async fn record(&self, message: Message) {
        if self.history_limit == 0 {
            return;
        }
        let mut history = self.history.write().await;
        history.push_back(message);
        while history.len() > self.history_limit {
            history.pop_front();
        }
    }

    /// Snapshot of recent messages, oldest first
    pub async fn history(&self) -> Vec<Message> {
        self.history.read().await.iter().cloned().collect()
    }

    /// Recent messages on topics matching `pattern`
    pub async fn history_matching(&self, pattern: &str) -> Vec<Message> {
        self.history
            .read()
            .await
            .iter()
            .filter(|m| topic_matches(pattern, &m.topic))
            .cloned()
            .collect()
    }

    pub async fn message_count(&self) -> usize {
        self.history.read().await.len()
    }

    pub async fn clear_history(&self) {
        self.history.write().await.clear();
    }
}

impl Default for CoordinationBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Unsubscribes when dropped, whatever path `request` leaves by
struct SubscriptionGuard<'a> {
    bus: &'a CoordinationBus,
    id: SubscriptionId,
}

impl Drop for SubscriptionGuard<'_> {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    fn msg(topic: &str) -> Message {
        Message::new(topic, "test", json!({}))
    }

    #[tokio::test]
    async fn test_pattern_delivery() {
        let bus = CoordinationBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        for pattern in ["plan.*", "*", "plan.created", "step.*"] {
            let tx = tx.clone();
            bus.subscribe(pattern, move |m: Message| {
                let tx = tx.clone();
                let pattern = pattern.to_string();
                async move {
                    let _ = tx.send((pattern, m.topic));
                    Ok(())
                }
            });
        }

        bus.publish(msg("plan.created")).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(rx.recv().await.unwrap().0);
        }
        seen.sort();
        assert_eq!(seen, vec!["*", "plan.*", "plan.created"]);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_others() {
        let bus = CoordinationBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        bus.subscribe("plan.*", |_m| async {
            Err(ConductorError::Config("handler broke".into()))
        });
        bus.subscribe("plan.*", |m: Message| async move {
            if m.topic.starts_with("plan.") {
                panic!("handler panicked");
            }
            Ok(())
        });
        bus.subscribe("plan.*", move |m: Message| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(m.topic);
                Ok(())
            }
        });

        bus.publish(msg("plan.started")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "plan.started");
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_is_noop() {
        let bus = CoordinationBus::new();
        let id = bus.subscribe("*", |_m| async { Ok(()) });
        bus.unsubscribe(id);
        bus.unsubscribe(id);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_request_reply_round_trip() {
        let bus = Arc::new(CoordinationBus::new());

        let responder = Arc::clone(&bus);
        bus.subscribe("pricing.quote", move |m: Message| {
            let bus = Arc::clone(&responder);
            async move {
                let correlation = m.correlation_id.clone().unwrap_or_default();
                let amount = m.payload["seats"].as_u64().unwrap_or(0) * 10;
                bus.reply(&correlation, "pricing", json!({ "amount": amount }))
                    .await?;
                Ok(())
            }
        });

        let reply = bus
            .request(
                Message::new("pricing.quote", "test", json!({ "seats": 3 })),
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        assert_eq!(reply.payload["amount"], 30);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_request_timeout_cleans_up() {
        let bus = CoordinationBus::new();
        let before = bus.subscriber_count();

        let err = bus
            .request(msg("nobody.listens"), Duration::from_millis(30))
            .await
            .unwrap_err();

        assert!(matches!(err, ConductorError::RequestTimeout { ref topic, .. } if topic == "nobody.listens"));
        assert_eq!(bus.subscriber_count(), before);
    }

    #[tokio::test]
    async fn test_recipient_filtering() {
        let bus = CoordinationBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        bus.subscribe_as("critic", "work.*", move |_m| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        bus.publish(msg("work.item").to("planner")).await.unwrap();
        bus.publish(msg("work.item").to("critic")).await.unwrap();
        bus.publish(msg("work.item")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_message_not_delivered() {
        let bus = CoordinationBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        bus.subscribe("*", move |_m| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let mut stale = msg("plan.created").with_ttl_ms(10);
        stale.timestamp = conductor_core::types::now() - chrono::Duration::seconds(5);
        bus.publish(stale).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(bus.message_count().await, 1);
    }

    #[tokio::test]
    async fn test_publish_stamps_missing_id_and_future_timestamp() {
        let bus = CoordinationBus::new();

        let mut blank = msg("plan.created").with_ttl_ms(1_000);
        blank.id = Uuid::nil();
        blank.timestamp = conductor_core::types::now() + chrono::Duration::days(30);
        let id = bus.publish(blank).await.unwrap();

        assert!(!id.is_nil());
        let recorded = bus.history().await;
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].id, id);
        assert!(recorded[0].timestamp <= conductor_core::types::now());

        // a relayed message keeps its sender's id
        let relayed = msg("plan.started");
        let original = relayed.id;
        assert_eq!(bus.publish(relayed).await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let bus = CoordinationBus::new();
        bus.subscribe("*", |_m| async { Ok(()) });

        bus.shutdown();
        bus.shutdown();

        assert_eq!(bus.subscriber_count(), 0);
        let err = bus.publish(msg("plan.created")).await.unwrap_err();
        match err {
            ConductorError::MessageBus { message, .. } => assert_eq!(message.topic, "plan.created"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let bus = CoordinationBus::with_settings(&BusSettings {
            history_limit: 3,
            ..BusSettings::default()
        });
        for i in 0..5 {
            bus.publish(msg(&format!("tick.{}", i))).await.unwrap();
        }

        let history = bus.history().await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].topic, "tick.2");
        assert_eq!(bus.history_matching("tick.4").await.len(), 1);
    }
}
