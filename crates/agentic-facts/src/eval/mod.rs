//! Stratified bottom-up evaluation over one snapshot.
//!
//! An [`Evaluator`] is a pure function of a [`Snapshot`] and a [`RuleSet`]:
//! it holds no locks and any number may run in parallel. Each query
//! restricts the program to the dependency closure of the queried
//! predicates, then saturates strata in order with semi-naive iteration.

mod expr;
mod join;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rules::ast::{Atom, Literal, Rule, Term};
use crate::rules::RuleSet;
use crate::store::Snapshot;
use crate::types::{Binding, EvaluationError};
use crate::value::Value;

pub(crate) type Tuple = Vec<Value>;

/// Materialized relations for one evaluation.
#[derive(Debug, Default)]
struct Database {
    relations: HashMap<String, HashSet<Tuple>>,
}

impl Database {
    fn get(&self, predicate: &str) -> Option<&HashSet<Tuple>> {
        self.relations.get(predicate)
    }

    fn insert(&mut self, predicate: &str, tuple: Tuple) -> bool {
        match self.relations.get_mut(predicate) {
            Some(set) => set.insert(tuple),
            None => {
                self.relations
                    .insert(predicate.to_string(), HashSet::from([tuple]));
                true
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// Ordering and truncation applied after evaluation, plus an optional
/// point in time to evaluate at.
///
/// Without an explicit `order_by`, answer order is unspecified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
    pub as_of: Option<DateTime<Utc>>,
}

impl QueryOptions {
    pub fn as_of(mut self, timestamp: DateTime<Utc>) -> Self {
        self.as_of = Some(timestamp);
        self
    }

    pub fn order_by(mut self, variable: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((variable.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn apply(&self, mut bindings: Vec<Binding>) -> Vec<Binding> {
        if let Some((variable, direction)) = &self.order_by {
            bindings.sort_by(|a, b| {
                let ord = a.get(variable).cmp(&b.get(variable));
                match direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            });
        }
        if let Some(limit) = self.limit {
            bindings.truncate(limit);
        }
        bindings
    }
}

pub struct Evaluator<'a> {
    snapshot: &'a Snapshot,
    rules: &'a RuleSet,
    as_of: Option<DateTime<Utc>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(snapshot: &'a Snapshot, rules: &'a RuleSet) -> Self {
        Self {
            snapshot,
            rules,
            as_of: None,
        }
    }

    /// Only consider base facts observed at or before `timestamp`.
    pub fn as_of(mut self, timestamp: DateTime<Utc>) -> Self {
        self.as_of = Some(timestamp);
        self
    }

    /// Declared, derived by a rule, or present in the snapshot.
    pub fn is_known(&self, predicate: &str) -> bool {
        self.rules.is_derived(predicate)
            || self.rules.is_declared(predicate)
            || self.snapshot.contains_predicate(predicate)
    }

    /// All bindings of `pattern`. Anonymous `_` positions come back as `_0`, `_1`, ...
    pub fn query(&self, pattern: &Atom) -> Result<Vec<Binding>, EvaluationError> {
        self.query_all(std::slice::from_ref(pattern))
    }

    /// Bindings satisfying every pattern at once; shared variables must agree.
    pub fn query_all(&self, patterns: &[Atom]) -> Result<Vec<Binding>, EvaluationError> {
        if patterns.is_empty() {
            return Err(EvaluationError::MalformedPattern(
                "empty conjunction".to_string(),
            ));
        }
        if let Some(unknown) = patterns.iter().find(|p| !self.is_known(&p.predicate)) {
            return Err(EvaluationError::UnknownPredicate(unknown.predicate.clone()));
        }

        let mut next = 0;
        let named: Vec<Atom> = patterns
            .iter()
            .map(|p| p.name_wildcards(&mut next))
            .collect();
        let db = self.materialize(named.iter().map(|a| a.predicate.as_str()))?;

        let mut frames = vec![Binding::new()];
        for atom in &named {
            frames = join::join(frames, atom, db.get(&atom.predicate));
            if frames.is_empty() {
                break;
            }
        }

        let distinct: BTreeSet<Binding> = frames.into_iter().collect();
        Ok(distinct.into_iter().collect())
    }

    /// Whether `predicate` currently holds for any arguments.
    pub fn holds(&self, predicate: &str) -> Result<bool, EvaluationError> {
        if !self.is_known(predicate) {
            return Err(EvaluationError::UnknownPredicate(predicate.to_string()));
        }
        let db = self.materialize(std::iter::once(predicate))?;
        Ok(db.get(predicate).is_some_and(|r| !r.is_empty()))
    }

    fn materialize<'p>(
        &self,
        predicates: impl IntoIterator<Item = &'p str>,
    ) -> Result<Database, EvaluationError> {
        let mut closure = BTreeSet::new();
        for predicate in predicates {
            closure.extend(self.rules.dependency_closure(predicate));
        }

        let mut db = Database::default();
        for predicate in &closure {
            let Some(relation) = self.snapshot.relation(predicate) else {
                continue;
            };
            for fact in relation.iter() {
                if self.as_of.map_or(true, |t| fact.timestamp <= t) {
                    db.insert(predicate, fact.args.clone());
                }
            }
        }

        let mut strata: BTreeMap<usize, Vec<&Rule>> = BTreeMap::new();
        for predicate in &closure {
            for rule in self.rules.rules_for(predicate) {
                strata
                    .entry(self.rules.stratum(predicate))
                    .or_default()
                    .push(rule);
            }
        }

        for (stratum, rules) in strata {
            let derived = saturate(&rules, &mut db)?;
            tracing::trace!("Stratum {} saturated with {} new tuples", stratum, derived);
        }
        Ok(db)
    }
}

/// Run one stratum to fixpoint. Returns the number of new tuples.
fn saturate(rules: &[&Rule], db: &mut Database) -> Result<usize, EvaluationError> {
    let mut derived = 0;
    let mut delta: HashMap<String, HashSet<Tuple>> = HashMap::new();

    for rule in rules {
        for tuple in fire(rule, db, None)? {
            if db.insert(&rule.head.predicate, tuple.clone()) {
                derived += 1;
                delta
                    .entry(rule.head.predicate.clone())
                    .or_default()
                    .insert(tuple);
            }
        }
    }

    while !delta.is_empty() {
        let mut next: HashMap<String, HashSet<Tuple>> = HashMap::new();
        for rule in rules {
            for (index, literal) in rule.body.iter().enumerate() {
                let Literal::Positive(atom) = literal else {
                    continue;
                };
                let Some(changed) = delta.get(&atom.predicate) else {
                    continue;
                };
                for tuple in fire(rule, db, Some((index, changed)))? {
                    if db.insert(&rule.head.predicate, tuple.clone()) {
                        derived += 1;
                        next.entry(rule.head.predicate.clone())
                            .or_default()
                            .insert(tuple);
                    }
                }
            }
        }
        delta = next;
    }

    Ok(derived)
}

/// Evaluate one rule body left to right. With `delta`, the literal at that
/// index reads only the newly derived tuples.
fn fire(
    rule: &Rule,
    db: &Database,
    delta: Option<(usize, &HashSet<Tuple>)>,
) -> Result<Vec<Tuple>, EvaluationError> {
    let mut frames = vec![Binding::new()];

    for (index, literal) in rule.body.iter().enumerate() {
        if frames.is_empty() {
            return Ok(Vec::new());
        }
        frames = match literal {
            Literal::Positive(atom) => {
                let source = match delta {
                    Some((at, changed)) if at == index => Some(changed),
                    _ => db.get(&atom.predicate),
                };
                join::join(frames, atom, source)
            }
            Literal::Negative(atom) => {
                let source = db.get(&atom.predicate);
                frames
                    .into_iter()
                    .filter(|b| !join::matches_any(atom, b, source))
                    .collect()
            }
            Literal::Compare { op, lhs, rhs } => {
                let mut kept = Vec::with_capacity(frames.len());
                for frame in frames {
                    if let Some(b) = expr::compare(*op, lhs, rhs, frame)? {
                        kept.push(b);
                    }
                }
                kept
            }
            Literal::Aggregate(agg) => {
                let mut kept = Vec::with_capacity(frames.len());
                for frame in frames {
                    if let Some(b) = expr::aggregate(agg, frame, &db.relations)? {
                        kept.push(b);
                    }
                }
                kept
            }
        };
    }

    frames
        .iter()
        .map(|b| instantiate(&rule.head, b))
        .collect()
}

fn instantiate(head: &Atom, binding: &Binding) -> Result<Tuple, EvaluationError> {
    head.args
        .iter()
        .map(|term| match term {
            Term::Const(c) => Ok(c.clone()),
            Term::Var(v) => binding.get(v).cloned().ok_or_else(|| {
                EvaluationError::MalformedPattern(format!("head variable {v} unbound in {head}"))
            }),
            Term::Wildcard => Err(EvaluationError::MalformedPattern(format!(
                "anonymous variable in head {head}"
            ))),
        })
        .collect()
}
