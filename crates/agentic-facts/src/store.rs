//! Bounded, per-predicate fact store with copy-on-write snapshots.
//!
//! Each predicate owns a relation capped at the configured capacity; when a
//! relation is full the oldest fact of that predicate is evicted. Pushes hold
//! the write lock only for the append itself. Snapshots share relations with
//! the live store and are never affected by later pushes.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use rand::Rng;
use serde::Serialize;

use crate::rules::RuleSet;
use crate::types::{Fact, FactInput, PushOutcome, RejectReason, RejectedFact, DEFAULT_ORIGIN};

/// Arrival-ordered facts of one predicate.
#[derive(Debug, Clone)]
pub struct Relation {
    facts: VecDeque<Arc<Fact>>,
    /// Timestamps non-decreasing in arrival order.
    ordered: bool,
}

impl Default for Relation {
    fn default() -> Self {
        Self {
            facts: VecDeque::new(),
            ordered: true,
        }
    }
}

impl Relation {
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Arc<Fact>> {
        self.facts.iter()
    }

    pub(crate) fn facts(&self) -> &VecDeque<Arc<Fact>> {
        &self.facts
    }

    pub(crate) fn is_time_ordered(&self) -> bool {
        self.ordered
    }

    /// Append, returning the evicted fact when over capacity.
    fn push(&mut self, fact: Arc<Fact>, capacity: usize) -> Option<Arc<Fact>> {
        if let Some(last) = self.facts.back() {
            if fact.timestamp < last.timestamp {
                self.ordered = false;
            }
        }
        self.facts.push_back(fact);
        if self.facts.len() > capacity {
            self.facts.pop_front()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    relations: HashMap<String, Arc<Relation>>,
    /// Bumped once per accepted fact; doubles as the arrival sequence.
    version: u64,
}

/// Immutable view of the store at one version.
#[derive(Debug, Clone)]
pub struct Snapshot {
    state: Arc<StoreState>,
}

impl Snapshot {
    pub fn version(&self) -> u64 {
        self.state.version
    }

    pub fn relation(&self, predicate: &str) -> Option<&Relation> {
        self.state.relations.get(predicate).map(Arc::as_ref)
    }

    pub fn contains_predicate(&self, predicate: &str) -> bool {
        self.state
            .relations
            .get(predicate)
            .is_some_and(|r| !r.is_empty())
    }

    pub fn predicates(&self) -> BTreeSet<&str> {
        self.state
            .relations
            .iter()
            .filter(|(_, r)| !r.is_empty())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.relations.values().map(|r| r.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Newest-first facts, optionally for one predicate.
    pub fn recent(&self, predicate: Option<&str>, limit: usize) -> Vec<Arc<Fact>> {
        match predicate {
            Some(p) => self
                .relation(p)
                .map(|r| r.iter().rev().take(limit).cloned().collect())
                .unwrap_or_default(),
            None => {
                let mut all: Vec<Arc<Fact>> = self
                    .state
                    .relations
                    .values()
                    .flat_map(|r| r.iter().cloned())
                    .collect();
                all.sort_unstable_by(|a, b| b.seq.cmp(&a.seq));
                all.truncate(limit);
                all
            }
        }
    }
}

/// Per-predicate counters reported by [`FactStore::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct PredicateStats {
    pub count: usize,
    pub capacity: usize,
    /// Current acceptance probability; 1.0 unless the predicate is sampled.
    pub sampling_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_facts: usize,
    pub version: u64,
    pub evicted: u64,
    pub rejected: u64,
    pub predicates: BTreeMap<String, PredicateStats>,
}

/// Acceptance probability for a sampled predicate at a given fill ratio.
pub fn sampling_rate(fill: f64) -> f64 {
    if fill < 0.5 {
        1.0
    } else if fill < 0.7 {
        0.8
    } else if fill < 0.85 {
        0.5
    } else if fill < 0.95 {
        0.2
    } else {
        0.1
    }
}

pub struct FactStore {
    state: RwLock<Arc<StoreState>>,
    capacity: usize,
    sampled: HashSet<String>,
    evicted: AtomicU64,
    rejected: AtomicU64,
}

impl FactStore {
    pub fn new(capacity: usize, sampled: impl IntoIterator<Item = String>) -> Self {
        Self {
            state: RwLock::new(Arc::new(StoreState::default())),
            capacity: capacity.max(1),
            sampled: sampled.into_iter().collect(),
            evicted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state.read().clone(),
        }
    }

    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    /// Validate and append a batch. Returns the outcome and the predicates
    /// that accepted at least one fact.
    pub fn push(
        &self,
        facts: impl IntoIterator<Item = FactInput>,
        rules: &RuleSet,
    ) -> (PushOutcome, BTreeSet<String>) {
        let mut outcome = PushOutcome::default();
        let mut changed = BTreeSet::new();

        let mut valid = Vec::new();
        for input in facts {
            match check_schema(&input, rules) {
                Ok(()) => valid.push(input),
                Err(reason) => outcome.rejected.push(RejectedFact {
                    fact: input,
                    reason,
                }),
            }
        }

        if !valid.is_empty() {
            let now = Utc::now();
            let mut rng = rand::thread_rng();
            let mut guard = self.state.write();
            let state = Arc::make_mut(&mut guard);

            for input in valid {
                let predicate = input.predicate.clone();
                let relation = Arc::make_mut(state.relations.entry(predicate.clone()).or_default());

                if self.sampled.contains(&input.predicate) {
                    let rate = sampling_rate(relation.len() as f64 / self.capacity as f64);
                    if rate < 1.0 && !rng.gen_bool(rate) {
                        outcome.rejected.push(RejectedFact {
                            fact: input,
                            reason: RejectReason::Sampled,
                        });
                        continue;
                    }
                }

                state.version += 1;
                let fact = Fact {
                    timestamp: input.timestamp.unwrap_or(now),
                    origin: input.origin.unwrap_or_else(|| DEFAULT_ORIGIN.to_string()),
                    seq: state.version,
                    args: input.args,
                    predicate: input.predicate,
                };
                if let Some(evicted) = relation.push(Arc::new(fact), self.capacity) {
                    self.evicted.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Evicted {} fact seq={}", evicted.predicate, evicted.seq);
                }
                changed.insert(predicate);
                outcome.accepted += 1;
            }
        }

        if !outcome.rejected.is_empty() {
            self.rejected
                .fetch_add(outcome.rejected.len() as u64, Ordering::Relaxed);
            for rejected in &outcome.rejected {
                if rejected.reason != RejectReason::Sampled {
                    tracing::warn!(
                        "Rejected fact {:?}: {}",
                        rejected.fact.predicate,
                        rejected.reason
                    );
                }
            }
        }

        (outcome, changed)
    }

    pub fn stats(&self) -> StoreStats {
        let snapshot = self.snapshot();
        let predicates = snapshot
            .state
            .relations
            .iter()
            .filter(|(_, r)| !r.is_empty())
            .map(|(name, relation)| {
                let rate = if self.sampled.contains(name) {
                    sampling_rate(relation.len() as f64 / self.capacity as f64)
                } else {
                    1.0
                };
                (
                    name.clone(),
                    PredicateStats {
                        count: relation.len(),
                        capacity: self.capacity,
                        sampling_rate: rate,
                    },
                )
            })
            .collect();

        StoreStats {
            total_facts: snapshot.len(),
            version: snapshot.version(),
            evicted: self.evicted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            predicates,
        }
    }
}

/// Per-fact admission check against declared schemas.
fn check_schema(input: &FactInput, rules: &RuleSet) -> Result<(), RejectReason> {
    if input.predicate.trim().is_empty() {
        return Err(RejectReason::EmptyPredicate);
    }
    let Some(decl) = rules.decl(&input.predicate) else {
        return Ok(());
    };
    if decl.arity() != input.args.len() {
        return Err(RejectReason::ArityMismatch {
            expected: decl.arity(),
            found: input.args.len(),
        });
    }
    for (position, (field, value)) in decl.fields.iter().zip(&input.args).enumerate() {
        if !field.ty.accepts(value) {
            return Err(RejectReason::TypeMismatch {
                position,
                expected: field.ty.name().to_string(),
                found: value.type_name().to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{RuleOrigin, RuleRegistry};
    use crate::value::Value;

    fn fact(predicate: &str, n: i64) -> FactInput {
        FactInput::new(predicate, vec![Value::Int(n)])
    }

    #[test]
    fn test_push_assigns_seq_and_timestamp() {
        let store = FactStore::new(16, Vec::new());
        let (outcome, changed) = store.push(vec![fact("a", 1), fact("b", 2)], &RuleSet::default());
        assert_eq!(outcome.accepted, 2);
        assert!(outcome.rejected.is_empty());
        assert_eq!(changed.len(), 2);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.version(), 2);
        let recent = snapshot.recent(None, 10);
        assert_eq!(recent[0].predicate, "b");
        assert_eq!(recent[0].seq, 2);
        assert_eq!(recent[1].origin, DEFAULT_ORIGIN);
    }

    #[test]
    fn test_eviction_is_per_predicate() {
        let store = FactStore::new(3, Vec::new());
        let rules = RuleSet::default();
        for n in 0..10 {
            store.push(vec![fact("noisy", n)], &rules);
        }
        store.push(vec![fact("quiet", 1)], &rules);

        let snapshot = store.snapshot();
        let noisy = snapshot.relation("noisy").unwrap();
        assert_eq!(noisy.len(), 3);
        let kept: Vec<Value> = noisy.iter().map(|f| f.args[0].clone()).collect();
        assert_eq!(kept, vec![Value::Int(7), Value::Int(8), Value::Int(9)]);
        assert_eq!(snapshot.relation("quiet").unwrap().len(), 1);
        assert_eq!(store.stats().evicted, 7);
    }

    #[test]
    fn test_snapshot_isolation() {
        let store = FactStore::new(16, Vec::new());
        let rules = RuleSet::default();
        store.push(vec![fact("a", 1)], &rules);
        let before = store.snapshot();
        store.push(vec![fact("a", 2)], &rules);

        assert_eq!(before.relation("a").unwrap().len(), 1);
        assert_eq!(store.snapshot().relation("a").unwrap().len(), 2);
        assert!(store.snapshot().version() > before.version());
    }

    #[test]
    fn test_schema_rejections_are_per_fact() {
        let registry = RuleRegistry::new();
        registry
            .submit("Decl click(ref: string, x: number).", RuleOrigin::Builtin)
            .unwrap();
        let rules = registry.current();
        let store = FactStore::new(16, Vec::new());

        let (outcome, _) = store.push(
            vec![
                FactInput::new("click", vec![Value::from("#ok"), Value::Int(3)]),
                FactInput::new("click", vec![Value::from("#short")]),
                FactInput::new("click", vec![Value::Int(1), Value::Int(3)]),
                FactInput::new("", vec![]),
            ],
            &rules,
        );
        assert_eq!(outcome.accepted, 1);
        let reasons: Vec<&RejectReason> = outcome.rejected.iter().map(|r| &r.reason).collect();
        assert_eq!(
            reasons[0],
            &RejectReason::ArityMismatch {
                expected: 2,
                found: 1
            }
        );
        assert!(matches!(reasons[1], RejectReason::TypeMismatch { position: 0, .. }));
        assert_eq!(reasons[2], &RejectReason::EmptyPredicate);
        assert_eq!(store.stats().rejected, 3);
    }

    #[test]
    fn test_sampling_rates() {
        assert_eq!(sampling_rate(0.0), 1.0);
        assert_eq!(sampling_rate(0.6), 0.8);
        assert_eq!(sampling_rate(0.8), 0.5);
        assert_eq!(sampling_rate(0.9), 0.2);
        assert_eq!(sampling_rate(0.99), 0.1);
    }

    #[test]
    fn test_sampled_predicate_is_thinned_near_capacity() {
        let store = FactStore::new(100, vec!["dom_node".to_string()]);
        let rules = RuleSet::default();
        let batch: Vec<FactInput> = (0..1000).map(|n| fact("dom_node", n)).collect();
        let (outcome, _) = store.push(batch, &rules);
        assert!(outcome.rejected.iter().all(|r| r.reason == RejectReason::Sampled));
        assert!(!outcome.rejected.is_empty());

        let plain: Vec<FactInput> = (0..1000).map(|n| fact("click", n)).collect();
        let (outcome, _) = store.push(plain, &rules);
        assert_eq!(outcome.accepted, 1000);
        assert_eq!(store.snapshot().relation("click").unwrap().len(), 100);
    }
}
