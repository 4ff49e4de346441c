//! In-process publish/subscribe event bus.
//!
//! Two subscription sets — typed (keyed by `EventType`) and wildcard — are
//! guarded by one bus-wide lock, mutated only by `subscribe`/`unsubscribe`.
//! `publish` takes a snapshot of matching handlers and awaits all of them
//! concurrently before returning, so a single publish call observes a
//! consistent handler set and never races a concurrent subscribe.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{AggregateType, DomainEvent, EventMetadata, EventType};
use crate::errors::EventBusError;

/// A subscribed handler. Boxed so the subscription maps stay homogeneous
/// regardless of the concrete closure type (SPEC_FULL.md 9).
pub type Handler = Arc<dyn Fn(DomainEvent) -> BoxFuture + Send + Sync>;
pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

struct Subscription {
    id: Uuid,
    handler: Handler,
    once: bool,
}

#[derive(Default)]
struct Subscriptions {
    typed: HashMap<EventType, Vec<Subscription>>,
    wildcard: Vec<Subscription>,
}

/// Options accepted by `publish`, overriding the defaults the bus would
/// otherwise assign.
#[derive(Default, Clone)]
pub struct PublishOptions {
    pub aggregate_id: Option<Uuid>,
    pub aggregate_type: Option<AggregateType>,
    pub metadata: EventMetadata,
}

pub struct EventBus {
    subscriptions: Mutex<Subscriptions>,
    version: AtomicU64,
    max_listeners: usize,
    default_aggregate_id: Uuid,
}

impl EventBus {
    pub fn new(max_listeners: usize) -> Self {
        Self {
            subscriptions: Mutex::new(Subscriptions::default()),
            version: AtomicU64::new(0),
            max_listeners,
            default_aggregate_id: Uuid::nil(),
        }
    }

    /// Subscribe to a single event type. A handler count at or above
    /// `max_listeners` for that type raises `conflict`.
    pub async fn subscribe<F, Fut>(
        &self,
        event_type: EventType,
        handler: F,
    ) -> Result<Uuid, EventBusError>
    where
        F: Fn(DomainEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe_inner(Some(event_type), handler, false).await
    }

    /// Subscribe to every event type.
    pub async fn subscribe_wildcard<F, Fut>(&self, handler: F) -> Result<Uuid, EventBusError>
    where
        F: Fn(DomainEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe_inner(None, handler, false).await
    }

    /// Subscribe for exactly one delivery, then auto-unsubscribe.
    pub async fn once<F, Fut>(
        &self,
        event_type: EventType,
        handler: F,
    ) -> Result<Uuid, EventBusError>
    where
        F: Fn(DomainEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe_inner(Some(event_type), handler, true).await
    }

    async fn subscribe_inner<F, Fut>(
        &self,
        event_type: Option<EventType>,
        handler: F,
        once: bool,
    ) -> Result<Uuid, EventBusError>
    where
        F: Fn(DomainEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let handler: Handler = Arc::new(move |evt| Box::pin(handler(evt)));
        let sub = Subscription { id, handler, once };

        let mut subs = self.subscriptions.lock().await;
        match event_type {
            Some(ty) => {
                let bucket = subs.typed.entry(ty).or_default();
                if bucket.len() >= self.max_listeners {
                    return Err(EventBusError::MaxListenersReached {
                        event_type: ty.as_str().to_string(),
                        max: self.max_listeners,
                    });
                }
                bucket.push(sub);
            }
            None => {
                if subs.wildcard.len() >= self.max_listeners {
                    return Err(EventBusError::MaxListenersReached {
                        event_type: "*".to_string(),
                        max: self.max_listeners,
                    });
                }
                subs.wildcard.push(sub);
            }
        }
        Ok(id)
    }

    /// Remove a subscription by id, from whichever set it lives in.
    pub async fn unsubscribe(&self, id: Uuid) {
        let mut subs = self.subscriptions.lock().await;
        subs.wildcard.retain(|s| s.id != id);
        for bucket in subs.typed.values_mut() {
            bucket.retain(|s| s.id != id);
        }
    }

    /// Total live subscription count, for idempotence tests.
    pub async fn subscription_count(&self) -> usize {
        let subs = self.subscriptions.lock().await;
        subs.wildcard.len() + subs.typed.values().map(Vec::len).sum::<usize>()
    }

    /// Assign a fresh id/version/timestamp and deliver to a snapshot of
    /// matching handlers. Handler panics/errors are isolated; they never
    /// fail this call. Returns the published event.
    pub async fn publish(
        &self,
        event_type: EventType,
        data: HashMap<String, serde_json::Value>,
        opts: PublishOptions,
    ) -> DomainEvent {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let event = DomainEvent {
            id: Uuid::new_v4(),
            aggregate_id: opts.aggregate_id.unwrap_or(self.default_aggregate_id),
            aggregate_type: opts.aggregate_type.unwrap_or(AggregateType::Task),
            event_type,
            data,
            metadata: opts.metadata,
            version,
            timestamp: Utc::now(),
        };
        self.deliver(event.clone()).await;
        event
    }

    /// Publish several events in the order given, each getting a fresh
    /// version, delivering each before moving to the next so ordered
    /// delivery per publisher holds even under batching.
    pub async fn publish_batch(
        &self,
        events: Vec<(EventType, HashMap<String, serde_json::Value>, PublishOptions)>,
    ) -> Vec<DomainEvent> {
        let mut published = Vec::with_capacity(events.len());
        for (ty, data, opts) in events {
            published.push(self.publish(ty, data, opts).await);
        }
        published
    }

    async fn deliver(&self, event: DomainEvent) {
        let (matching, once_ids) = {
            let mut subs = self.subscriptions.lock().await;
            let mut matching: Vec<Handler> = Vec::new();
            let mut once_ids = Vec::new();

            if let Some(bucket) = subs.typed.get(&event.event_type) {
                for s in bucket {
                    matching.push(s.handler.clone());
                    if s.once {
                        once_ids.push(s.id);
                    }
                }
            }
            for s in &subs.wildcard {
                matching.push(s.handler.clone());
                if s.once {
                    once_ids.push(s.id);
                }
            }

            if !once_ids.is_empty() {
                subs.wildcard.retain(|s| !once_ids.contains(&s.id));
                for bucket in subs.typed.values_mut() {
                    bucket.retain(|s| !once_ids.contains(&s.id));
                }
            }
            (matching, once_ids)
        };

        let futures = matching.into_iter().map(|h| {
            let event = event.clone();
            async move {
                // Handler errors/panics are isolated from the publisher;
                // tracing::Span::current() carries task/event context for
                // operators without failing the publish call.
                let _ = tokio::spawn(async move { h(event).await }).await;
            }
        });
        join_all(futures).await;
        let _ = once_ids;
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
