//! Change dispatch: turns pushes and rule swaps into coalesced re-evaluations.
//!
//! Producers record changed predicates and wake the dispatcher without
//! waiting for it. The dispatcher drains the pending set, picks the
//! interests whose dependencies intersect it, and runs each on a bounded
//! blocking pool. An interest already queued is not queued again.

use std::collections::{BTreeSet, HashMap};
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{Notify, Semaphore};

use crate::engine::Shared;
use crate::rules::RuleSet;
use crate::store::Snapshot;
use crate::subscribe::CloseReason;

pub(crate) type InterestId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InterestKind {
    Wait,
    Subscription,
}

/// Something that re-evaluates when the facts or rules it depends on change.
pub(crate) trait Interest: Send + Sync {
    fn id(&self) -> InterestId;

    fn kind(&self) -> InterestKind;

    /// Predicates named by the interest's patterns.
    fn predicates(&self) -> &[String];

    fn is_active(&self) -> bool;

    /// Set while queued on the worker pool.
    fn scheduled(&self) -> &AtomicBool;

    fn reevaluate(&self, snapshot: &Snapshot, rules: &Arc<RuleSet>);

    fn close(&self, reason: CloseReason);
}

#[derive(Default)]
pub(crate) struct InterestRegistry {
    interests: RwLock<HashMap<InterestId, Arc<dyn Interest>>>,
    next_id: AtomicU64,
}

impl InterestRegistry {
    pub(crate) fn next_id(&self) -> InterestId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn register(&self, interest: Arc<dyn Interest>) {
        self.interests.write().insert(interest.id(), interest);
    }

    pub(crate) fn deregister(&self, id: InterestId) -> Option<Arc<dyn Interest>> {
        self.interests.write().remove(&id)
    }

    pub(crate) fn get(&self, id: InterestId) -> Option<Arc<dyn Interest>> {
        self.interests.read().get(&id).cloned()
    }

    pub(crate) fn count(&self, kind: InterestKind) -> usize {
        self.interests
            .read()
            .values()
            .filter(|i| i.kind() == kind)
            .count()
    }

    pub(crate) fn list(&self) -> Vec<Arc<dyn Interest>> {
        self.interests.read().values().cloned().collect()
    }

    /// Remove and return every interest.
    pub(crate) fn drain(&self) -> Vec<Arc<dyn Interest>> {
        self.interests.write().drain().map(|(_, i)| i).collect()
    }

    /// Active interests touched by `changes`.
    fn affected(&self, rules: &RuleSet, changes: &PendingChanges) -> Vec<Arc<dyn Interest>> {
        let candidates: Vec<Arc<dyn Interest>> = self
            .list()
            .into_iter()
            .filter(|i| i.is_active())
            .collect();
        if changes.rules_changed {
            return candidates;
        }

        let mut touched: HashMap<String, bool> = HashMap::new();
        candidates
            .into_iter()
            .filter(|interest| {
                interest.predicates().iter().any(|p| {
                    *touched.entry(p.clone()).or_insert_with(|| {
                        rules
                            .dependency_closure(p)
                            .iter()
                            .any(|dep| changes.predicates.contains(dep))
                    })
                })
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct PendingChanges {
    predicates: BTreeSet<String>,
    rules_changed: bool,
}

impl PendingChanges {
    fn is_empty(&self) -> bool {
        self.predicates.is_empty() && !self.rules_changed
    }
}

/// Coalescing queue between producers and the dispatcher.
#[derive(Default)]
pub(crate) struct ChangeQueue {
    pending: Mutex<PendingChanges>,
    wake: Notify,
}

impl ChangeQueue {
    pub(crate) fn facts_changed(&self, predicates: BTreeSet<String>) {
        if predicates.is_empty() {
            return;
        }
        self.pending.lock().predicates.extend(predicates);
        self.wake.notify_one();
    }

    pub(crate) fn rules_changed(&self) {
        self.pending.lock().rules_changed = true;
        self.wake.notify_one();
    }

    fn take(&self) -> PendingChanges {
        mem::take(&mut *self.pending.lock())
    }
}

/// Dispatcher loop. Runs until the engine shuts down.
pub(crate) async fn run(shared: Arc<Shared>) {
    let permits = Arc::new(Semaphore::new(shared.config.workers));

    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = shared.changes.wake.notified() => {}
        }

        let changes = shared.changes.take();
        if changes.is_empty() {
            continue;
        }
        let rules = shared.registry.current();
        let targets = shared.interests.affected(&rules, &changes);
        tracing::debug!(
            "Dispatch round: {} changed predicates, rules changed: {}, {} interests",
            changes.predicates.len(),
            changes.rules_changed,
            targets.len()
        );

        for interest in targets {
            if interest.scheduled().swap(true, Ordering::AcqRel) {
                continue;
            }
            let permit = tokio::select! {
                permit = permits.clone().acquire_owned() => permit,
                _ = shared.shutdown.cancelled() => return,
            };
            let Ok(permit) = permit else {
                return;
            };
            let shared = shared.clone();
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                interest.scheduled().store(false, Ordering::Release);
                if interest.is_active() {
                    let snapshot = shared.store.snapshot();
                    let rules = shared.registry.current();
                    interest.reevaluate(&snapshot, &rules);
                }
            });
        }
    }

    tracing::debug!("Dispatcher stopped");
}

/// Deregisters an interest when dropped.
pub(crate) struct Registration {
    id: InterestId,
    shared: Arc<Shared>,
}

impl Registration {
    pub(crate) fn new(id: InterestId, shared: Arc<Shared>) -> Self {
        Self { id, shared }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub(crate) fn release(&self) {
        self.shared.interests.deregister(self.id);
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.release();
    }
}
