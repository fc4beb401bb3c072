//! Active rule set with atomic submit/remove.
//!
//! Readers clone the current `Arc<RuleSet>` and never block writers for
//! longer than the pointer swap. Writers are serialized.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::rules::ast::{Decl, Rule};
use crate::rules::parser::parse_program;
use crate::rules::validate::{self, Stratification};
use crate::types::{EngineError, EngineResult, RuleId, ValidationError};

/// Where a rule group came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOrigin {
    Builtin,
    Runtime,
}

/// All clauses of one submission.
#[derive(Debug, Clone)]
pub struct RuleGroup {
    pub id: RuleId,
    pub origin: RuleOrigin,
    pub source: String,
    pub decls: Vec<Decl>,
    pub rules: Vec<Rule>,
    pub submitted_at: DateTime<Utc>,
}

impl RuleGroup {
    /// Predicates defined by this group's rule heads.
    pub fn heads(&self) -> BTreeSet<String> {
        self.rules.iter().map(|r| r.head.predicate.clone()).collect()
    }
}

/// Listing entry for an installed rule group.
#[derive(Debug, Clone, Serialize)]
pub struct RuleSummary {
    pub id: RuleId,
    pub origin: RuleOrigin,
    pub source: String,
    pub heads: Vec<String>,
    pub declares: Vec<String>,
    pub submitted_at: DateTime<Utc>,
}

/// An immutable, validated program.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    generation: u64,
    groups: BTreeMap<RuleId, Arc<RuleGroup>>,
    decls: BTreeMap<String, Decl>,
    rules: Vec<Rule>,
    by_head: HashMap<String, Vec<usize>>,
    strata: Stratification,
}

impl RuleSet {
    /// Merge and validate a candidate set of groups.
    fn build(generation: u64, groups: BTreeMap<RuleId, Arc<RuleGroup>>) -> Result<Self, ValidationError> {
        let mut decls: BTreeMap<String, Decl> = BTreeMap::new();
        for group in groups.values() {
            for decl in &group.decls {
                match decls.get(&decl.predicate) {
                    Some(existing) if !existing.same_shape(decl) => {
                        return Err(ValidationError::ConflictingDecl {
                            predicate: decl.predicate.clone(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        decls.insert(decl.predicate.clone(), decl.clone());
                    }
                }
            }
        }

        let rules: Vec<Rule> = groups
            .values()
            .flat_map(|g| g.rules.iter().cloned())
            .collect();

        for rule in &rules {
            validate::check_safety(rule)?;
        }
        validate::check_arities(&decls, &rules)?;
        let strata = validate::stratify(&rules)?;

        let mut by_head: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, rule) in rules.iter().enumerate() {
            by_head
                .entry(rule.head.predicate.clone())
                .or_default()
                .push(index);
        }

        Ok(Self {
            generation,
            groups,
            decls,
            rules,
            by_head,
            strata,
        })
    }

    /// Bumped on every successful install or removal.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn decl(&self, predicate: &str) -> Option<&Decl> {
        self.decls.get(predicate)
    }

    pub fn decls(&self) -> impl Iterator<Item = &Decl> {
        self.decls.values()
    }

    pub fn is_derived(&self, predicate: &str) -> bool {
        self.by_head.contains_key(predicate)
    }

    pub fn is_declared(&self, predicate: &str) -> bool {
        self.decls.contains_key(predicate)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Rules whose head is `predicate`.
    pub fn rules_for<'a>(&'a self, predicate: &str) -> impl Iterator<Item = &'a Rule> + 'a {
        self.by_head
            .get(predicate)
            .into_iter()
            .flatten()
            .map(move |&i| &self.rules[i])
    }

    pub fn stratum(&self, predicate: &str) -> usize {
        self.strata.stratum(predicate)
    }

    /// Arity known from a declaration or a rule head.
    pub fn arity(&self, predicate: &str) -> Option<usize> {
        self.decls
            .get(predicate)
            .map(Decl::arity)
            .or_else(|| self.rules_for(predicate).next().map(|r| r.head.arity()))
    }

    /// Every predicate whose contents can influence `predicate`, itself included.
    pub fn dependency_closure(&self, predicate: &str) -> BTreeSet<String> {
        let mut closure = BTreeSet::new();
        let mut stack = vec![predicate.to_string()];
        while let Some(current) = stack.pop() {
            if !closure.insert(current.clone()) {
                continue;
            }
            for rule in self.rules_for(&current) {
                for (dep, _) in validate::dependencies(rule) {
                    if !closure.contains(dep) {
                        stack.push(dep.to_string());
                    }
                }
            }
        }
        closure
    }

    pub fn groups(&self) -> impl Iterator<Item = &Arc<RuleGroup>> {
        self.groups.values()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// What a successful removal changed.
#[derive(Debug, Clone)]
pub struct Removal {
    pub group: Arc<RuleGroup>,
    /// Predicates the removed group derived that nothing derives or declares any more.
    pub orphaned: BTreeSet<String>,
    pub rules: Arc<RuleSet>,
}

/// Holder of the active rule set.
pub struct RuleRegistry {
    current: RwLock<Arc<RuleSet>>,
    writer: Mutex<()>,
    next_id: AtomicU64,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(RuleSet::default())),
            writer: Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The active rule set. Cheap: clones an `Arc`.
    pub fn current(&self) -> Arc<RuleSet> {
        self.current.read().clone()
    }

    /// Parse, validate against the full active set, and install atomically.
    pub fn submit(&self, text: &str, origin: RuleOrigin) -> EngineResult<(RuleId, Arc<RuleSet>)> {
        let program = parse_program(text)?;
        let _writer = self.writer.lock();
        let current = self.current();

        let id = RuleId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let group = RuleGroup {
            id,
            origin,
            source: text.trim().to_string(),
            decls: program.decls,
            rules: program.rules,
            submitted_at: Utc::now(),
        };

        let mut groups = current.groups.clone();
        groups.insert(id, Arc::new(group));
        let next = Arc::new(RuleSet::build(current.generation + 1, groups)?);
        *self.current.write() = next.clone();

        tracing::info!(
            "Installed rule group {} ({:?}): {} rules, generation {}",
            id,
            origin,
            next.groups.get(&id).map_or(0, |g| g.rules.len()),
            next.generation
        );
        Ok((id, next))
    }

    /// Retract every clause of submission `id`.
    pub fn remove(&self, id: RuleId) -> EngineResult<Removal> {
        let _writer = self.writer.lock();
        let current = self.current();

        let mut groups = current.groups.clone();
        let group = groups.remove(&id).ok_or(EngineError::RuleNotFound(id))?;
        let next = Arc::new(RuleSet::build(current.generation + 1, groups)?);
        *self.current.write() = next.clone();

        let orphaned = group
            .heads()
            .into_iter()
            .filter(|p| !next.is_derived(p) && !next.is_declared(p))
            .collect();

        tracing::info!(
            "Removed rule group {}, generation {}",
            id,
            next.generation
        );
        Ok(Removal {
            group,
            orphaned,
            rules: next,
        })
    }

    pub fn list(&self) -> Vec<RuleSummary> {
        self.current()
            .groups()
            .map(|g| RuleSummary {
                id: g.id,
                origin: g.origin,
                source: g.source.clone(),
                heads: g.heads().into_iter().collect(),
                declares: g.decls.iter().map(|d| d.predicate.clone()).collect(),
                submitted_at: g.submitted_at,
            })
            .collect()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_assigns_one_id_per_submission() {
        let registry = RuleRegistry::new();
        let (id, set) = registry
            .submit("a(X) :- base(X).\nb(X) :- a(X).", RuleOrigin::Runtime)
            .unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.generation(), 1);
        let listed = registry.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
        assert_eq!(listed[0].heads, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_failed_submission_leaves_set_untouched() {
        let registry = RuleRegistry::new();
        registry
            .submit("p(X) :- base(X), not q(X).", RuleOrigin::Runtime)
            .unwrap();
        let before = registry.current();

        let err = registry
            .submit("q(X) :- base(X), not p(X).", RuleOrigin::Runtime)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::Unstratifiable { .. })
        ));
        assert!(Arc::ptr_eq(&before, &registry.current()));

        assert!(matches!(
            registry.submit("bad(X) :- not other(Y).", RuleOrigin::Runtime),
            Err(EngineError::Validation(ValidationError::Unsafe { .. }))
        ));
        assert!(matches!(
            registry.submit("broken(", RuleOrigin::Runtime),
            Err(EngineError::Parse(_))
        ));
        assert_eq!(registry.current().len(), 1);
    }

    #[test]
    fn test_remove_reports_orphans() {
        let registry = RuleRegistry::new();
        let (first, _) = registry
            .submit("ready() :- loaded().", RuleOrigin::Runtime)
            .unwrap();
        let (second, _) = registry
            .submit("ready() :- cached().\nwarm() :- cached().", RuleOrigin::Runtime)
            .unwrap();

        let removal = registry.remove(second).unwrap();
        assert_eq!(removal.orphaned, BTreeSet::from(["warm".to_string()]));
        assert!(removal.rules.is_derived("ready"));

        let removal = registry.remove(first).unwrap();
        assert!(removal.orphaned.contains("ready"));
        assert!(registry.current().is_empty());

        assert!(matches!(
            registry.remove(first),
            Err(EngineError::RuleNotFound(id)) if id == first
        ));
    }

    #[test]
    fn test_dependency_closure() {
        let registry = RuleRegistry::new();
        let (_, set) = registry
            .submit(
                "path(X, Y) :- edge(X, Y).\npath(X, Z) :- path(X, Y), edge(Y, Z).\nlonely(X) :- node(X), not path(X, _).",
                RuleOrigin::Builtin,
            )
            .unwrap();
        let closure = set.dependency_closure("lonely");
        let expected: BTreeSet<String> = ["lonely", "node", "path", "edge"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(closure, expected);
        assert_eq!(set.dependency_closure("edge"), BTreeSet::from(["edge".to_string()]));
    }

    #[test]
    fn test_conflicting_declarations() {
        let registry = RuleRegistry::new();
        registry
            .submit("Decl click(ref: string).", RuleOrigin::Builtin)
            .unwrap();
        registry
            .submit("Decl click(target: string).", RuleOrigin::Runtime)
            .unwrap();
        assert!(matches!(
            registry.submit("Decl click(ref: number).", RuleOrigin::Runtime),
            Err(EngineError::Validation(ValidationError::ConflictingDecl { .. }))
        ));
        assert_eq!(registry.current().arity("click"), Some(1));
    }
}
