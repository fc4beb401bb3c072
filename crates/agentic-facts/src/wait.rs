//! Blocking waits on facts or conditions, with timeout and cancellation.
//!
//! A wait registers its interest before its first evaluation, so a fact
//! pushed between the two is never missed. The first terminal transition
//! wins; after it, the wait neither evaluates nor notifies again.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::clamp_poll_interval;
use crate::dispatch::{Interest, InterestId, InterestKind, Registration};
use crate::engine::Shared;
use crate::eval::Evaluator;
use crate::rules::ast::Atom;
use crate::rules::RuleSet;
use crate::store::Snapshot;
use crate::subscribe::CloseReason;
use crate::types::{Binding, EvaluationError};

pub type WaitId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    Pending,
    Satisfied,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// One pattern.
    Single,
    /// Every pattern in one evaluation pass, shared variables agreeing.
    All,
}

#[derive(Debug, Clone)]
pub struct WaitRequest {
    patterns: Vec<Atom>,
    mode: WaitMode,
    timeout: Duration,
    cancel: CancellationToken,
    poll_interval: Option<Duration>,
}

impl WaitRequest {
    pub fn single(pattern: Atom, timeout: Duration) -> Self {
        Self {
            patterns: vec![pattern],
            mode: WaitMode::Single,
            timeout,
            cancel: CancellationToken::new(),
            poll_interval: None,
        }
    }

    pub fn all(patterns: Vec<Atom>, timeout: Duration) -> Self {
        Self {
            patterns,
            mode: WaitMode::All,
            timeout,
            cancel: CancellationToken::new(),
            poll_interval: None,
        }
    }

    /// Cancel the wait when `token` is cancelled.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Re-evaluate periodically when a pattern has no trackable dependency.
    pub fn with_poll_fallback(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn mode(&self) -> WaitMode {
        self.mode
    }

    pub fn patterns(&self) -> &[Atom] {
        &self.patterns
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WaitOutcome {
    Satisfied {
        bindings: Vec<Binding>,
        elapsed_ms: u64,
    },
    TimedOut {
        elapsed_ms: u64,
    },
    Cancelled {
        elapsed_ms: u64,
    },
}

impl WaitOutcome {
    pub fn state(&self) -> WaitState {
        match self {
            WaitOutcome::Satisfied { .. } => WaitState::Satisfied,
            WaitOutcome::TimedOut { .. } => WaitState::TimedOut,
            WaitOutcome::Cancelled { .. } => WaitState::Cancelled,
        }
    }

    pub fn is_satisfied(&self) -> bool {
        matches!(self, WaitOutcome::Satisfied { .. })
    }

    pub fn bindings(&self) -> &[Binding] {
        match self {
            WaitOutcome::Satisfied { bindings, .. } => bindings,
            _ => &[],
        }
    }

    pub fn elapsed(&self) -> Duration {
        let ms = match self {
            WaitOutcome::Satisfied { elapsed_ms, .. }
            | WaitOutcome::TimedOut { elapsed_ms }
            | WaitOutcome::Cancelled { elapsed_ms } => *elapsed_ms,
        };
        Duration::from_millis(ms)
    }
}

struct WaitCell {
    state: WaitState,
    bindings: Vec<Binding>,
}

pub(crate) struct WaitInterest {
    id: InterestId,
    patterns: Vec<Atom>,
    predicates: Vec<String>,
    scheduled: AtomicBool,
    cell: Mutex<WaitCell>,
    done: Notify,
}

impl WaitInterest {
    fn new(id: InterestId, patterns: Vec<Atom>) -> Self {
        let mut predicates: Vec<String> = patterns.iter().map(|p| p.predicate.clone()).collect();
        predicates.sort();
        predicates.dedup();
        Self {
            id,
            patterns,
            predicates,
            scheduled: AtomicBool::new(false),
            cell: Mutex::new(WaitCell {
                state: WaitState::Pending,
                bindings: Vec::new(),
            }),
            done: Notify::new(),
        }
    }

    fn state(&self) -> WaitState {
        self.cell.lock().state
    }

    /// First terminal transition wins.
    fn finish(&self, state: WaitState, bindings: Vec<Binding>) -> bool {
        {
            let mut cell = self.cell.lock();
            if cell.state != WaitState::Pending {
                return false;
            }
            cell.state = state;
            cell.bindings = bindings;
        }
        tracing::debug!("Wait {} -> {:?}", self.id, state);
        self.done.notify_one();
        true
    }

    /// Evaluate once; satisfy the wait when the answer set is non-empty.
    fn check(&self, snapshot: &Snapshot, rules: &RuleSet) -> bool {
        if self.state() != WaitState::Pending {
            return false;
        }
        match Evaluator::new(snapshot, rules).query_all(&self.patterns) {
            Ok(bindings) if !bindings.is_empty() => self.finish(WaitState::Satisfied, bindings),
            Ok(_) | Err(EvaluationError::UnknownPredicate(_)) => false,
            Err(e) => {
                tracing::warn!("Wait {} evaluation failed: {}", self.id, e);
                false
            }
        }
    }
}

impl Interest for WaitInterest {
    fn id(&self) -> InterestId {
        self.id
    }

    fn kind(&self) -> InterestKind {
        InterestKind::Wait
    }

    fn predicates(&self) -> &[String] {
        &self.predicates
    }

    fn is_active(&self) -> bool {
        self.state() == WaitState::Pending
    }

    fn scheduled(&self) -> &AtomicBool {
        &self.scheduled
    }

    fn reevaluate(&self, snapshot: &Snapshot, rules: &Arc<RuleSet>) {
        self.check(snapshot, rules);
    }

    fn close(&self, _reason: CloseReason) {
        self.finish(WaitState::Cancelled, Vec::new());
    }
}

/// A registered wait. Dropping it deregisters the interest.
pub struct PendingWait {
    interest: Arc<WaitInterest>,
    registration: Registration,
    cancel: CancellationToken,
    started: Instant,
    /// `None` when the timeout is too large to represent as an instant.
    deadline: Option<Instant>,
    poll_interval: Option<Duration>,
}

impl PendingWait {
    pub(crate) fn submit(shared: &Arc<Shared>, request: WaitRequest) -> Self {
        let id = shared.interests.next_id();
        let interest = Arc::new(WaitInterest::new(id, request.patterns));
        shared.interests.register(interest.clone());
        let registration = Registration::new(id, shared.clone());

        let started = Instant::now();
        let snapshot = shared.store.snapshot();
        let rules = shared.registry.current();

        let untracked = {
            let evaluator = Evaluator::new(&snapshot, &rules);
            interest
                .predicates
                .iter()
                .any(|p| !evaluator.is_known(p))
        };
        let poll_interval = match request.poll_interval {
            Some(interval) if untracked => Some(clamp_poll_interval(interval)),
            _ => None,
        };

        tracing::debug!(
            "Wait {} registered ({:?}, {} patterns, timeout {:?}, poll {:?})",
            id,
            request.mode,
            interest.patterns.len(),
            request.timeout,
            poll_interval
        );
        if shared.shutdown.is_cancelled() {
            interest.finish(WaitState::Cancelled, Vec::new());
        }
        interest.check(&snapshot, &rules);

        Self {
            interest,
            registration,
            cancel: request.cancel,
            started,
            deadline: started.checked_add(request.timeout),
            poll_interval,
        }
    }

    pub fn id(&self) -> WaitId {
        self.interest.id
    }

    pub fn state(&self) -> WaitState {
        self.interest.state()
    }

    /// Cancel now; the interest is removed immediately.
    pub fn cancel(&self) {
        if self.interest.finish(WaitState::Cancelled, Vec::new()) {
            self.registration.release();
        }
    }

    fn terminal(&self) -> Option<WaitOutcome> {
        let cell = self.interest.cell.lock();
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        match cell.state {
            WaitState::Pending => None,
            WaitState::Satisfied => Some(WaitOutcome::Satisfied {
                bindings: cell.bindings.clone(),
                elapsed_ms,
            }),
            WaitState::TimedOut => Some(WaitOutcome::TimedOut { elapsed_ms }),
            WaitState::Cancelled => Some(WaitOutcome::Cancelled { elapsed_ms }),
        }
    }

    /// Resolve the wait.
    pub async fn outcome(self) -> WaitOutcome {
        let mut ticker = self.poll_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            if let Some(outcome) = self.terminal() {
                self.registration.release();
                return outcome;
            }

            tokio::select! {
                _ = self.interest.done.notified() => {}
                _ = self.cancel.cancelled() => {
                    self.interest.finish(WaitState::Cancelled, Vec::new());
                }
                _ = expire(self.deadline) => {
                    self.interest.finish(WaitState::TimedOut, Vec::new());
                }
                _ = next_tick(&mut ticker) => {
                    let shared = self.registration.shared();
                    let snapshot = shared.store.snapshot();
                    let rules = shared.registry.current();
                    self.interest.check(&snapshot, &rules);
                }
            }
        }
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use crate::rules::parse_query;
    use crate::types::FactInput;
    use crate::value::Value;

    fn engine() -> Engine {
        Engine::new(EngineConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_already_true_is_satisfied_immediately() {
        let engine = engine();
        engine.push(vec![FactInput::new("ready", vec![])]);
        let pending = engine.begin_wait(WaitRequest::single(
            parse_query("ready()").unwrap(),
            Duration::from_secs(1),
        ));
        assert_eq!(pending.state(), WaitState::Satisfied);
        assert!(pending.outcome().await.is_satisfied());
    }

    #[tokio::test]
    async fn test_satisfied_by_later_push() {
        let engine = engine();
        let pushing = engine.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            pushing.push(vec![FactInput::new("user_click", vec![Value::from("#buy")])]);
        });
        let outcome = engine
            .await_fact("user_click(Ref)", Duration::from_secs(2), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.bindings()[0]["Ref"], Value::from("#buy"));
        assert_eq!(engine.stats().pending_waits, 0);
    }

    #[tokio::test]
    async fn test_timeout_with_unknown_predicate() {
        let engine = engine();
        let outcome = engine
            .await_fact("never_pushed(X)", Duration::from_millis(50), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.state(), WaitState::TimedOut);
        assert!(outcome.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_zero_timeout_on_false_condition() {
        let engine = engine();
        let outcome = engine
            .await_fact("nope()", Duration::ZERO, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.state(), WaitState::TimedOut);
    }

    #[tokio::test]
    async fn test_cancel_removes_interest() {
        let engine = engine();
        let pending = engine.begin_wait(WaitRequest::single(
            parse_query("later()").unwrap(),
            Duration::from_secs(5),
        ));
        assert_eq!(engine.stats().pending_waits, 1);
        pending.cancel();
        assert_eq!(engine.stats().pending_waits, 0);
        assert_eq!(pending.outcome().await.state(), WaitState::Cancelled);

        engine.push(vec![FactInput::new("later", vec![])]);
        assert_eq!(engine.stats().pending_waits, 0);
    }

    #[tokio::test]
    async fn test_dropping_the_future_deregisters() {
        let engine = engine();
        let waiting = engine.clone();
        let handle = tokio::spawn(async move {
            waiting
                .await_fact("later()", Duration::from_secs(30), CancellationToken::new())
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(engine.stats().pending_waits, 1);
        handle.abort();
        let _ = handle.await;
        assert_eq!(engine.stats().pending_waits, 0);
    }

    #[tokio::test]
    async fn test_malformed_pattern_fails_before_registration() {
        let engine = engine();
        assert!(engine
            .await_fact("not a pattern(", Duration::from_millis(10), CancellationToken::new())
            .await
            .is_err());
        assert_eq!(engine.stats().pending_waits, 0);
    }

    #[tokio::test]
    async fn test_poll_fallback_is_clamped() {
        let engine = engine();
        let pending = engine.begin_wait(
            WaitRequest::single(parse_query("mystery(X)").unwrap(), Duration::from_millis(100))
                .with_poll_fallback(Duration::from_millis(1)),
        );
        assert_eq!(pending.poll_interval, Some(Duration::from_millis(10)));
        assert_eq!(pending.outcome().await.state(), WaitState::TimedOut);
    }

    #[tokio::test]
    async fn test_unbounded_timeout_waits_for_push() {
        let engine = engine();
        let pending = engine.begin_wait(WaitRequest::single(
            parse_query("eventually()").unwrap(),
            Duration::MAX,
        ));
        assert!(pending.deadline.is_none());
        engine.push(vec![FactInput::new("eventually", vec![])]);
        assert!(pending.outcome().await.is_satisfied());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let outcome = engine
            .await_fact("eventually_not()", Duration::MAX, cancel)
            .await
            .unwrap();
        assert_eq!(outcome.state(), WaitState::Cancelled);
    }

    #[test]
    fn test_repeated_predicates_are_listed_once() {
        let patterns = ["a(X)", "b(X)", "a(Y)"]
            .iter()
            .map(|p| parse_query(p).unwrap())
            .collect();
        let interest = WaitInterest::new(1, patterns);
        assert_eq!(interest.predicates, vec!["a".to_string(), "b".to_string()]);
    }
}
