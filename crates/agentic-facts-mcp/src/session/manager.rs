//! Engine ownership and open subscriptions for one server.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use agentic_facts::{Engine, EngineConfig, Subscription, SubscriptionEvent, SubscriptionId};

use crate::types::{McpError, McpResult};

/// Drained events of one subscription.
pub struct PollResult {
    pub events: Vec<SubscriptionEvent>,
    pub lossy: bool,
    pub closed: bool,
}

/// Owns the fact engine and the subscriptions opened through the server.
///
/// The engine synchronizes internally, so tools call it without holding a
/// session-wide lock. Each subscription has its own lock, held only while
/// its buffer is drained.
pub struct FactSession {
    engine: Engine,
    subscriptions: Mutex<HashMap<SubscriptionId, Arc<Mutex<Subscription>>>>,
    schema_path: Option<PathBuf>,
    started_at: DateTime<Utc>,
}

impl FactSession {
    /// Start an engine with `config`. Must run inside a tokio runtime.
    pub fn open(config: EngineConfig) -> McpResult<Self> {
        let schema_path = config.schema_path.clone();
        if let Some(path) = &schema_path {
            tracing::info!("Loading schema: {}", path.display());
        }
        let engine = Engine::new(config)?;

        tracing::info!(
            "Fact session started with {} built-in rule groups",
            engine.list_rules().len()
        );

        Ok(Self {
            engine,
            subscriptions: Mutex::new(HashMap::new()),
            schema_path,
            started_at: Utc::now(),
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn schema_path(&self) -> Option<&PathBuf> {
        self.schema_path.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub async fn subscribe(&self, pattern: &str) -> McpResult<SubscriptionId> {
        let subscription = self.engine.subscribe(pattern)?;
        let id = subscription.id();
        self.subscriptions
            .lock()
            .await
            .insert(id, Arc::new(Mutex::new(subscription)));
        tracing::debug!("Subscription {id} opened on {pattern}");
        Ok(id)
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    /// Drain up to `max_events` events. With nothing buffered, waits up to
    /// `wait` for the first one.
    pub async fn poll(
        &self,
        id: SubscriptionId,
        max_events: usize,
        wait: Duration,
    ) -> McpResult<PollResult> {
        let entry = self
            .subscriptions
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(McpError::SubscriptionNotFound(id))?;

        let mut events = Vec::new();
        let ready = {
            let mut subscription = entry.lock().await;
            drain(&mut subscription, max_events, &mut events);
            subscription.ready()
        };
        // Waiting happens outside the subscription lock.
        if events.is_empty()
            && !wait.is_zero()
            && tokio::time::timeout(wait, ready).await.is_ok()
        {
            drain(&mut *entry.lock().await, max_events, &mut events);
        }

        let closed = events
            .iter()
            .any(|e| matches!(e, SubscriptionEvent::Closed { .. }));
        let lossy = entry.lock().await.is_lossy();

        if closed {
            self.subscriptions.lock().await.remove(&id);
        }
        Ok(PollResult {
            events,
            lossy,
            closed,
        })
    }

    /// Close a subscription. Returns false if it was not open.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.subscriptions.lock().await.remove(&id);
        let closed = self.engine.unsubscribe(id);
        removed.is_some() || closed
    }

    /// Close every subscription and stop the engine.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.subscriptions.lock().await.drain().collect();
        tracing::info!("Closing {} subscriptions", drained.len());
        self.engine.shutdown();
    }
}

fn drain(subscription: &mut Subscription, max_events: usize, events: &mut Vec<SubscriptionEvent>) {
    while events.len() < max_events {
        match subscription.try_next() {
            Some(event) => events.push(event),
            None => break,
        }
    }
}
