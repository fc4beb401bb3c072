//! Edge-triggered subscriptions over a query pattern.
//!
//! A subscriber sees a notification only when the answer set differs from
//! the last one delivered. Undelivered notifications sit in a bounded
//! buffer; on overflow the oldest is dropped and the next one out is
//! marked lossy.

use std::collections::{BTreeSet, VecDeque};
use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::Stream;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;

use crate::dispatch::{Interest, InterestId, InterestKind, Registration};
use crate::engine::Shared;
use crate::eval::Evaluator;
use crate::rules::ast::Atom;
use crate::rules::RuleSet;
use crate::store::Snapshot;
use crate::types::{Binding, EvaluationError, RuleId};

pub type SubscriptionId = u64;

/// Why a subscription stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CloseReason {
    Unsubscribed,
    /// The rule group deriving the watched predicate was removed.
    RuleRemoved { rule: RuleId, predicate: String },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub subscription: SubscriptionId,
    pub bindings: Vec<Binding>,
    /// Rule set generation the answer was computed against.
    pub generation: u64,
    /// Store version the answer was computed against.
    pub version: u64,
    pub at: DateTime<Utc>,
    /// Set on the first notification after buffered ones were dropped.
    pub lossy: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SubscriptionEvent {
    Changed(Notification),
    Closed { reason: CloseReason },
}

type Stamp = (u64, u64);

#[derive(Default)]
struct Outbox {
    queue: VecDeque<Notification>,
    closed: Option<CloseReason>,
    close_delivered: bool,
    overflowed: bool,
    lossy_ever: bool,
    last: Option<(Stamp, BTreeSet<Binding>)>,
}

pub(crate) struct SubscriptionInterest {
    id: InterestId,
    pattern: Atom,
    predicates: Vec<String>,
    capacity: usize,
    scheduled: AtomicBool,
    outbox: Mutex<Outbox>,
    ready: Notify,
}

impl SubscriptionInterest {
    pub(crate) fn new(id: InterestId, pattern: Atom, capacity: usize) -> Self {
        Self {
            id,
            predicates: vec![pattern.predicate.clone()],
            pattern,
            capacity: capacity.max(1),
            scheduled: AtomicBool::new(false),
            outbox: Mutex::new(Outbox::default()),
            ready: Notify::new(),
        }
    }

    pub(crate) fn pattern(&self) -> &Atom {
        &self.pattern
    }

    fn evaluate(&self, snapshot: &Snapshot, rules: &RuleSet) {
        let stamp = (rules.generation(), snapshot.version());
        match Evaluator::new(snapshot, rules).query(&self.pattern) {
            Ok(bindings) => self.offer(stamp, bindings),
            Err(EvaluationError::UnknownPredicate(_)) => self.offer(stamp, Vec::new()),
            Err(e) => {
                tracing::warn!("Subscription {} evaluation failed: {}", self.id, e);
            }
        }
    }

    /// Queue `bindings` if computed from a newer state and different from
    /// the last delivered set.
    fn offer(&self, stamp: Stamp, bindings: Vec<Binding>) {
        let answers: BTreeSet<Binding> = bindings.into_iter().collect();
        {
            let mut outbox = self.outbox.lock();
            if outbox.closed.is_some() {
                return;
            }
            if let Some((last_stamp, last_answers)) = &mut outbox.last {
                if stamp <= *last_stamp {
                    return;
                }
                if *last_answers == answers {
                    *last_stamp = stamp;
                    return;
                }
            } else if answers.is_empty() {
                outbox.last = Some((stamp, answers));
                return;
            }

            outbox.queue.push_back(Notification {
                subscription: self.id,
                bindings: answers.iter().cloned().collect(),
                generation: stamp.0,
                version: stamp.1,
                at: Utc::now(),
                lossy: false,
            });
            if outbox.queue.len() > self.capacity {
                outbox.queue.pop_front();
                if !outbox.overflowed {
                    tracing::debug!("Subscription {} buffer overflowed", self.id);
                }
                outbox.overflowed = true;
                outbox.lossy_ever = true;
            }
            outbox.last = Some((stamp, answers));
        }
        self.ready.notify_waiters();
    }

    /// Resolves once an event is buffered or the interest has closed.
    async fn changed(&self) {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let outbox = self.outbox.lock();
                if !outbox.queue.is_empty() || outbox.closed.is_some() {
                    return;
                }
            }
            notified.await;
        }
    }

    fn try_next(&self) -> Option<SubscriptionEvent> {
        let mut outbox = self.outbox.lock();
        if let Some(mut notification) = outbox.queue.pop_front() {
            if outbox.overflowed {
                notification.lossy = true;
                outbox.overflowed = false;
            }
            return Some(SubscriptionEvent::Changed(notification));
        }
        if outbox.close_delivered {
            return None;
        }
        let reason = outbox.closed.clone()?;
        outbox.close_delivered = true;
        Some(SubscriptionEvent::Closed { reason })
    }

    fn is_finished(&self) -> bool {
        let outbox = self.outbox.lock();
        outbox.close_delivered && outbox.queue.is_empty()
    }
}

impl Interest for SubscriptionInterest {
    fn id(&self) -> InterestId {
        self.id
    }

    fn kind(&self) -> InterestKind {
        InterestKind::Subscription
    }

    fn predicates(&self) -> &[String] {
        &self.predicates
    }

    fn is_active(&self) -> bool {
        self.outbox.lock().closed.is_none()
    }

    fn scheduled(&self) -> &AtomicBool {
        &self.scheduled
    }

    fn reevaluate(&self, snapshot: &Snapshot, rules: &Arc<RuleSet>) {
        self.evaluate(snapshot, rules);
    }

    fn close(&self, reason: CloseReason) {
        {
            let mut outbox = self.outbox.lock();
            if outbox.closed.is_some() {
                return;
            }
            if reason == CloseReason::Unsubscribed {
                outbox.queue.clear();
            }
            tracing::debug!("Subscription {} closed: {:?}", self.id, reason);
            outbox.closed = Some(reason);
        }
        self.ready.notify_waiters();
    }
}

/// Handle to a live subscription. Dropping it unsubscribes.
pub struct Subscription {
    interest: Arc<SubscriptionInterest>,
    registration: Registration,
}

impl Subscription {
    pub(crate) fn open(shared: &Arc<Shared>, pattern: Atom) -> Self {
        let id = shared.interests.next_id();
        let interest = Arc::new(SubscriptionInterest::new(
            id,
            pattern,
            shared.config.subscription_buffer,
        ));
        shared.interests.register(interest.clone());
        let registration = Registration::new(id, shared.clone());

        if shared.shutdown.is_cancelled() {
            interest.close(CloseReason::Shutdown);
        }
        let snapshot = shared.store.snapshot();
        let rules = shared.registry.current();
        interest.evaluate(&snapshot, &rules);
        tracing::debug!("Subscription {} opened on {}", id, interest.pattern);

        Self {
            interest,
            registration,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.interest.id
    }

    pub fn pattern(&self) -> &Atom {
        self.interest.pattern()
    }

    /// Next event, or `None` once the close event has been delivered.
    pub async fn next(&mut self) -> Option<SubscriptionEvent> {
        loop {
            if let Some(event) = self.interest.try_next() {
                return Some(event);
            }
            if self.interest.is_finished() {
                return None;
            }
            self.interest.changed().await;
        }
    }

    /// Resolves once an event is buffered or the subscription has closed.
    /// The future does not borrow the handle, so a caller sharing the
    /// subscription behind a lock can wait without holding it.
    pub fn ready(&self) -> impl Future<Output = ()> + Send + 'static {
        let interest = self.interest.clone();
        async move { interest.changed().await }
    }

    /// Next event if one is buffered.
    pub fn try_next(&mut self) -> Option<SubscriptionEvent> {
        self.interest.try_next()
    }

    /// Whether any notification was ever dropped.
    pub fn is_lossy(&self) -> bool {
        self.interest.outbox.lock().lossy_ever
    }

    pub fn is_closed(&self) -> bool {
        !self.interest.is_active()
    }

    pub fn into_stream(self) -> impl Stream<Item = SubscriptionEvent> {
        futures::stream::unfold(self, |mut subscription| async move {
            let event = subscription.next().await?;
            Some((event, subscription))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.interest.close(CloseReason::Unsubscribed);
        self.registration.release();
    }
}
