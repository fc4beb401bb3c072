//! The engine handle: one store, one rule registry, one dispatcher.
//!
//! `Engine` is cheap to clone. Dropping the last clone shuts the engine
//! down: the dispatcher stops, waits resolve as cancelled, and every
//! subscription is closed with [`CloseReason::Shutdown`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::dispatch::{self, ChangeQueue, InterestKind, InterestRegistry};
use crate::eval::{Evaluator, QueryOptions};
use crate::rules::ast::Atom;
use crate::rules::{parse_query, RuleOrigin, RuleRegistry, RuleSummary};
use crate::store::{FactStore, Snapshot, StoreStats};
use crate::subscribe::{CloseReason, Subscription, SubscriptionId};
use crate::temporal::TimeWindow;
use crate::types::{
    Binding, EngineError, EngineResult, EvaluationError, Fact, FactInput, PushOutcome, RuleId,
};
use crate::wait::{PendingWait, WaitOutcome, WaitRequest};

pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) store: FactStore,
    pub(crate) registry: RuleRegistry,
    pub(crate) interests: InterestRegistry,
    pub(crate) changes: ChangeQueue,
    pub(crate) shutdown: CancellationToken,
}

impl Shared {
    fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        let interests = self.interests.drain();
        tracing::info!("Engine shutting down, closing {} interests", interests.len());
        for interest in interests {
            interest.close(CloseReason::Shutdown);
        }
    }
}

struct EngineInner {
    shared: Arc<Shared>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub store: StoreStats,
    pub rule_groups: usize,
    pub rules: usize,
    pub generation: u64,
    pub pending_waits: usize,
    pub subscriptions: usize,
}

/// Handle to a running fact engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Build an engine, install built-in rules, and start the dispatcher.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| EngineError::Config(format!("engine requires a tokio runtime: {e}")))?;

        let registry = RuleRegistry::new();
        for source in config.builtin_sources()? {
            registry.submit(&source, RuleOrigin::Builtin)?;
        }

        let shared = Arc::new(Shared {
            store: FactStore::new(config.fact_capacity, config.sampled_predicates.clone()),
            registry,
            interests: InterestRegistry::default(),
            changes: ChangeQueue::default(),
            shutdown: CancellationToken::new(),
            config,
        });
        runtime.spawn(dispatch::run(shared.clone()));

        tracing::info!(
            "Fact engine started: capacity {} per predicate, {} workers, {} built-in rules",
            shared.config.fact_capacity,
            shared.config.workers,
            shared.registry.current().len()
        );
        Ok(Self {
            inner: Arc::new(EngineInner { shared }),
        })
    }

    fn shared(&self) -> &Arc<Shared> {
        &self.inner.shared
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared().config
    }

    // ── Facts ────────────────────────────────────────────────────────

    /// Validate and store a batch; wakes the dispatcher without waiting for it.
    pub fn push(&self, facts: Vec<FactInput>) -> PushOutcome {
        let shared = self.shared();
        let rules = shared.registry.current();
        let (outcome, changed) = shared.store.push(facts, &rules);
        tracing::debug!(
            "Pushed facts: {} accepted, {} rejected",
            outcome.accepted,
            outcome.rejected.len()
        );
        shared.changes.facts_changed(changed);
        outcome
    }

    pub fn snapshot(&self) -> Snapshot {
        self.shared().store.snapshot()
    }

    /// Newest facts first, optionally for one predicate.
    pub fn recent(&self, predicate: Option<&str>, limit: usize) -> Vec<Arc<Fact>> {
        self.snapshot().recent(predicate, limit)
    }

    /// Facts of `predicate` observed inside `window`, oldest first.
    pub fn windowed(&self, predicate: &str, window: &TimeWindow) -> Vec<Arc<Fact>> {
        self.snapshot().windowed(predicate, window)
    }

    pub fn stats(&self) -> EngineStats {
        let shared = self.shared();
        let rules = shared.registry.current();
        EngineStats {
            store: shared.store.stats(),
            rule_groups: rules.groups().count(),
            rules: rules.len(),
            generation: rules.generation(),
            pending_waits: shared.interests.count(InterestKind::Wait),
            subscriptions: shared.interests.count(InterestKind::Subscription),
        }
    }

    // ── Rules ────────────────────────────────────────────────────────

    /// Validate and install a rule submission. All of its clauses share the returned id.
    pub fn submit_rule(&self, text: &str) -> EngineResult<RuleId> {
        let shared = self.shared();
        let (id, _) = shared.registry.submit(text, RuleOrigin::Runtime)?;
        shared.changes.rules_changed();
        Ok(id)
    }

    /// Retract a submission. Subscriptions on predicates that no longer
    /// have any rule, declaration, or stored fact are closed.
    pub fn remove_rule(&self, id: RuleId) -> EngineResult<()> {
        let shared = self.shared();
        let removal = shared.registry.remove(id)?;

        if !removal.orphaned.is_empty() {
            let snapshot = shared.store.snapshot();
            for interest in shared.interests.list() {
                if interest.kind() != InterestKind::Subscription {
                    continue;
                }
                let orphan = interest
                    .predicates()
                    .iter()
                    .find(|p| removal.orphaned.contains(*p) && !snapshot.contains_predicate(p))
                    .cloned();
                if let Some(predicate) = orphan {
                    interest.close(CloseReason::RuleRemoved { rule: id, predicate });
                    shared.interests.deregister(interest.id());
                }
            }
        }

        shared.changes.rules_changed();
        Ok(())
    }

    pub fn list_rules(&self) -> Vec<RuleSummary> {
        self.shared().registry.list()
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// All bindings of `pattern` against the current snapshot and rules.
    pub fn query(&self, pattern: &str) -> EngineResult<Vec<Binding>> {
        self.query_with(pattern, &QueryOptions::default())
    }

    pub fn query_with(&self, pattern: &str, options: &QueryOptions) -> EngineResult<Vec<Binding>> {
        let pattern = parse_query(pattern)?;
        let snapshot = self.snapshot();
        let rules = self.shared().registry.current();
        let mut evaluator = Evaluator::new(&snapshot, &rules);
        if let Some(as_of) = options.as_of {
            evaluator = evaluator.as_of(as_of);
        }
        let bindings = evaluator.query(&pattern)?;
        Ok(options.apply(bindings))
    }

    /// Whether `name` holds for any arguments.
    pub fn evaluate_rule(&self, name: &str) -> EngineResult<bool> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EvaluationError::MalformedPattern("empty rule name".to_string()).into());
        }
        let snapshot = self.snapshot();
        let rules = self.shared().registry.current();
        Ok(Evaluator::new(&snapshot, &rules).holds(name)?)
    }

    // ── Waits ────────────────────────────────────────────────────────

    /// Register a wait and evaluate it once. Resolve with [`PendingWait::outcome`].
    pub fn begin_wait(&self, request: WaitRequest) -> PendingWait {
        PendingWait::submit(self.shared(), request)
    }

    /// Block until `pattern` has at least one binding.
    pub async fn await_fact(
        &self,
        pattern: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> EngineResult<WaitOutcome> {
        let pattern = parse_query(pattern)?;
        let request = WaitRequest::single(pattern, timeout).with_cancel(cancel);
        Ok(self.begin_wait(request).outcome().await)
    }

    /// Block until every pattern holds in one evaluation, shared variables agreeing.
    pub async fn await_conditions<S: AsRef<str>>(
        &self,
        patterns: &[S],
        timeout: Duration,
        cancel: CancellationToken,
    ) -> EngineResult<WaitOutcome> {
        if patterns.is_empty() {
            return Err(EvaluationError::MalformedPattern("no conditions".to_string()).into());
        }
        let atoms = patterns
            .iter()
            .map(|p| parse_query(p.as_ref()))
            .collect::<Result<Vec<Atom>, _>>()?;
        let request = WaitRequest::all(atoms, timeout).with_cancel(cancel);
        Ok(self.begin_wait(request).outcome().await)
    }

    /// Like [`Engine::await_fact`], but polls when the predicate cannot be
    /// tracked yet. `poll_interval` defaults to the configured interval.
    pub async fn wait_for_condition(
        &self,
        pattern: &str,
        timeout: Duration,
        poll_interval: Option<Duration>,
        cancel: CancellationToken,
    ) -> EngineResult<WaitOutcome> {
        let pattern = parse_query(pattern)?;
        let interval = poll_interval.unwrap_or_else(|| self.config().poll_interval());
        let request = WaitRequest::single(pattern, timeout)
            .with_cancel(cancel)
            .with_poll_fallback(interval);
        Ok(self.begin_wait(request).outcome().await)
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Watch `pattern`; a non-empty initial answer is the first notification.
    pub fn subscribe(&self, pattern: &str) -> EngineResult<Subscription> {
        let pattern = parse_query(pattern)?;
        Ok(Subscription::open(self.shared(), pattern))
    }

    /// Close a subscription by id. Returns false if it was not open.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let shared = self.shared();
        match shared.interests.get(id) {
            Some(interest) if interest.kind() == InterestKind::Subscription => {
                interest.close(CloseReason::Unsubscribed);
                shared.interests.deregister(id);
                true
            }
            _ => false,
        }
    }

    /// Stop the dispatcher, cancel waits and close subscriptions. Idempotent.
    pub fn shutdown(&self) {
        self.shared().shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared().shutdown.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscribe::SubscriptionEvent;
    use crate::value::Value;
    use crate::wait::WaitState;
    use chrono::{TimeZone, Utc};

    const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

    fn engine() -> Engine {
        Engine::new(EngineConfig::default()).unwrap()
    }

    fn fact(predicate: &str, args: Vec<Value>) -> FactInput {
        FactInput::new(predicate, args)
    }

    async fn next_event(subscription: &mut Subscription) -> SubscriptionEvent {
        tokio::time::timeout(EVENT_TIMEOUT, subscription.next())
            .await
            .expect("no event in time")
            .expect("subscription ended")
    }

    fn changed_bindings(event: SubscriptionEvent) -> Vec<Binding> {
        match event {
            SubscriptionEvent::Changed(n) => n.bindings,
            other => panic!("expected a change, got {other:?}"),
        }
    }

    #[test]
    fn test_new_requires_runtime() {
        assert!(matches!(
            Engine::new(EngineConfig::default()),
            Err(EngineError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        assert!(Engine::new(EngineConfig::default().with_workers(0)).is_err());
    }

    #[tokio::test]
    async fn test_builtin_rules_are_installed() {
        let engine = Engine::new(
            EngineConfig::default().with_builtin_rules("ready() :- loaded(_)."),
        )
        .unwrap();
        let rules = engine.list_rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].origin, RuleOrigin::Builtin);
        assert!(!engine.evaluate_rule("ready").unwrap());
        engine.push(vec![fact("loaded", vec![Value::Int(1)])]);
        assert!(engine.evaluate_rule("ready").unwrap());
    }

    #[tokio::test]
    async fn test_push_is_visible_to_the_next_query() {
        let engine = engine();
        let before = engine.snapshot().version();
        let outcome = engine.push(vec![fact("user_click", vec![Value::from("#a")])]);
        assert_eq!(outcome.accepted, 1);
        assert!(engine.snapshot().version() > before);
        assert_eq!(engine.query("user_click(R)").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_eviction_keeps_capacity() {
        let engine = Engine::new(EngineConfig::default().with_capacity(3)).unwrap();
        for n in 0..10 {
            engine.push(vec![fact("tick", vec![Value::Int(n)])]);
        }
        let answers = engine
            .query_with(
                "tick(N)",
                &QueryOptions::default().order_by("N", crate::eval::Direction::Asc),
            )
            .unwrap();
        let kept: Vec<Value> = answers.iter().map(|b| b["N"].clone()).collect();
        assert_eq!(kept, vec![Value::Int(7), Value::Int(8), Value::Int(9)]);
        assert_eq!(engine.stats().store.evicted, 7);
    }

    #[tokio::test]
    async fn test_query_as_of() {
        let engine = engine();
        let t = |s: i64| Utc.timestamp_opt(1_700_000_000 + s, 0).unwrap();
        for s in 1..=3 {
            engine.push(vec![fact("step", vec![Value::Int(s)]).at(t(s))]);
        }
        let answers = engine
            .query_with("step(S)", &QueryOptions::default().as_of(t(2)))
            .unwrap();
        assert_eq!(answers.len(), 2);
        let window = engine.windowed("step", &TimeWindow::since(t(3)));
        assert_eq!(window.len(), 1);
    }

    #[tokio::test]
    async fn test_rule_validation_errors_surface() {
        let engine = engine();
        assert!(matches!(
            engine.submit_rule("bad(X) :- not good(X)."),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            engine.submit_rule("p(X) :- not p(X), q(X)."),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            engine.submit_rule("p(X :-"),
            Err(EngineError::Parse(_))
        ));
        assert!(matches!(
            engine.remove_rule(RuleId(99)),
            Err(EngineError::RuleNotFound(RuleId(99)))
        ));
        assert!(engine.list_rules().is_empty());
    }

    #[tokio::test]
    async fn test_and_wait_satisfied_when_both_arrive() {
        let engine = engine();
        let pushing = engine.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            pushing.push(vec![
                fact("user_click", vec![Value::from("#buy")]),
                fact("page_loaded", vec![Value::from("#buy")]),
            ]);
        });

        let outcome = engine
            .await_conditions(
                &["user_click(Ref)", "page_loaded(Ref)"],
                Duration::from_secs(2),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(outcome.is_satisfied());
        assert_eq!(outcome.bindings()[0]["Ref"], Value::from("#buy"));
        assert!(outcome.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_and_wait_times_out_when_one_is_missing() {
        let engine = engine();
        engine.push(vec![fact("user_click", vec![Value::from("#buy")])]);
        let outcome = engine
            .await_conditions(
                &["user_click(Ref)", "page_loaded(Ref)"],
                Duration::from_millis(200),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.state(), WaitState::TimedOut);
        assert!(outcome.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_wait_on_derived_predicate() {
        let engine = engine();
        engine
            .submit_rule("checkout_ready() :- cart_item(_), payment_ok().")
            .unwrap();
        let pushing = engine.clone();
        tokio::spawn(async move {
            pushing.push(vec![fact("cart_item", vec![Value::Int(1)])]);
            tokio::time::sleep(Duration::from_millis(20)).await;
            pushing.push(vec![fact("payment_ok", vec![])]);
        });
        let outcome = engine
            .await_fact("checkout_ready()", Duration::from_secs(2), CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_satisfied());
    }

    #[tokio::test]
    async fn test_wait_for_condition_polls_unknown_predicate() {
        let engine = engine();
        let pushing = engine.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            pushing.push(vec![fact("toast_shown", vec![Value::from("saved")])]);
        });
        let outcome = engine
            .wait_for_condition(
                "toast_shown(_)",
                Duration::from_secs(2),
                Some(Duration::from_millis(20)),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(outcome.is_satisfied());
        assert!(outcome.bindings()[0].contains_key("_0"));
    }

    #[tokio::test]
    async fn test_external_cancellation() {
        let engine = engine();
        let token = CancellationToken::new();
        let cancelling = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancelling.cancel();
        });
        let outcome = engine
            .await_fact("never()", Duration::from_secs(5), token)
            .await
            .unwrap();
        assert_eq!(outcome.state(), WaitState::Cancelled);
        assert_eq!(engine.stats().pending_waits, 0);
    }

    #[tokio::test]
    async fn test_cancelled_waits_leave_no_interest() {
        let engine = engine();
        let waits: Vec<PendingWait> = (0..20)
            .map(|n| {
                engine.begin_wait(WaitRequest::single(
                    parse_query(&format!("slot({n})")).unwrap(),
                    Duration::from_secs(30),
                ))
            })
            .collect();
        assert_eq!(engine.stats().pending_waits, 20);
        for wait in &waits[..10] {
            wait.cancel();
        }
        assert_eq!(engine.stats().pending_waits, 10);
        drop(waits);
        assert_eq!(engine.stats().pending_waits, 0);
    }

    #[tokio::test]
    async fn test_subscription_is_edge_triggered() {
        let engine = engine();
        engine
            .submit_rule("alert(X) :- reading(X), X > 10.")
            .unwrap();
        let mut subscription = engine.subscribe("alert(X)").unwrap();
        assert!(subscription.try_next().is_none());

        engine.push(vec![fact("reading", vec![Value::Int(5)])]);
        engine.push(vec![fact("reading", vec![Value::Int(20)])]);
        let first = changed_bindings(next_event(&mut subscription).await);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0]["X"], Value::Int(20));

        engine.push(vec![fact("reading", vec![Value::Int(3)])]);
        engine.push(vec![fact("reading", vec![Value::Int(30)])]);
        let second = changed_bindings(next_event(&mut subscription).await);
        assert_eq!(second.len(), 2);
        assert!(!subscription.is_lossy());
    }

    #[tokio::test]
    async fn test_initial_answers_are_delivered() {
        let engine = engine();
        engine.push(vec![fact("tab_open", vec![Value::from("inbox")])]);
        let mut subscription = engine.subscribe("tab_open(T)").unwrap();
        let first = changed_bindings(next_event(&mut subscription).await);
        assert_eq!(first[0]["T"], Value::from("inbox"));
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let engine = engine();
        let mut subscription = engine.subscribe("anything(X)").unwrap();
        assert_eq!(engine.stats().subscriptions, 1);
        assert!(engine.unsubscribe(subscription.id()));
        assert!(!engine.unsubscribe(subscription.id()));
        assert_eq!(engine.stats().subscriptions, 0);
        assert!(matches!(
            next_event(&mut subscription).await,
            SubscriptionEvent::Closed {
                reason: CloseReason::Unsubscribed
            }
        ));
        assert!(subscription.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_subscription_deregisters() {
        let engine = engine();
        let subscription = engine.subscribe("anything(X)").unwrap();
        assert_eq!(engine.stats().subscriptions, 1);
        drop(subscription);
        assert_eq!(engine.stats().subscriptions, 0);
    }

    #[tokio::test]
    async fn test_rule_removal_closes_dependent_subscription() {
        let engine = engine();
        let id = engine.submit_rule("busy() :- job(_).").unwrap();
        let mut derived = engine.subscribe("busy()").unwrap();
        let mut base = engine.subscribe("job(J)").unwrap();

        engine.remove_rule(id).unwrap();
        assert_eq!(
            next_event(&mut derived).await,
            SubscriptionEvent::Closed {
                reason: CloseReason::RuleRemoved {
                    rule: id,
                    predicate: "busy".to_string()
                }
            }
        );
        assert!(!base.is_closed());
        assert!(base.try_next().is_none());
        assert_eq!(engine.stats().subscriptions, 1);
    }

    #[tokio::test]
    async fn test_subscription_stream() {
        use futures::StreamExt;

        let engine = engine();
        engine.push(vec![fact("ping", vec![Value::Int(1)])]);
        let subscription = engine.subscribe("ping(N)").unwrap();
        let id = subscription.id();
        let mut stream = Box::pin(subscription.into_stream());
        assert!(matches!(
            stream.next().await,
            Some(SubscriptionEvent::Changed(_))
        ));
        engine.unsubscribe(id);
        assert!(matches!(
            stream.next().await,
            Some(SubscriptionEvent::Closed { .. })
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let engine = engine();
        let mut subscription = engine.subscribe("event(X)").unwrap();
        let pending = engine.begin_wait(WaitRequest::single(
            parse_query("event(X)").unwrap(),
            Duration::from_secs(30),
        ));

        engine.shutdown();
        engine.shutdown();
        assert!(engine.is_shut_down());
        assert_eq!(pending.outcome().await.state(), WaitState::Cancelled);
        assert_eq!(
            next_event(&mut subscription).await,
            SubscriptionEvent::Closed {
                reason: CloseReason::Shutdown
            }
        );
        assert!(subscription.next().await.is_none());

        let late = engine.subscribe("event(X)").unwrap();
        assert!(late.is_closed());
    }

    #[tokio::test]
    async fn test_dropping_last_handle_shuts_down() {
        let engine = engine();
        let mut subscription = engine.subscribe("event(X)").unwrap();
        drop(engine);
        assert_eq!(
            next_event(&mut subscription).await,
            SubscriptionEvent::Closed {
                reason: CloseReason::Shutdown
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_pushes_and_waits() {
        let engine = engine();
        let mut waiters = Vec::new();
        for n in 0..8 {
            let engine = engine.clone();
            waiters.push(tokio::spawn(async move {
                engine
                    .await_fact(
                        &format!("done({n})"),
                        Duration::from_secs(5),
                        CancellationToken::new(),
                    )
                    .await
            }));
        }
        for n in 0..8 {
            engine.push(vec![fact("done", vec![Value::Int(n)])]);
        }
        for waiter in waiters {
            assert!(waiter.await.unwrap().unwrap().is_satisfied());
        }
        assert_eq!(engine.stats().pending_waits, 0);
    }
}
