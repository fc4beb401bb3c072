//! Static checks on rule programs: safety, arity, and stratification.
//!
//! Everything here is a pure function of the rules passed in.

use std::collections::{BTreeMap, HashMap, HashSet};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::rules::ast::{Atom, CmpOp, Decl, Literal, Rule};
use crate::types::ValidationError;

/// How a rule body depends on a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Positive,
    Negative,
    Aggregate,
}

impl EdgeKind {
    /// Negated and aggregated dependencies must sit in a lower stratum.
    pub fn is_strict(self) -> bool {
        !matches!(self, EdgeKind::Positive)
    }
}

/// Predicate → stratum assignment for a stratifiable program.
#[derive(Debug, Clone, Default)]
pub struct Stratification {
    strata: HashMap<String, usize>,
    max: usize,
}

impl Stratification {
    pub fn stratum(&self, predicate: &str) -> usize {
        self.strata.get(predicate).copied().unwrap_or(0)
    }

    pub fn max_stratum(&self) -> usize {
        self.max
    }
}

/// Check that every variable is bound before use and that the head is covered.
pub fn check_safety(rule: &Rule) -> Result<(), ValidationError> {
    let unsafe_var = |variable: &str, context: String| ValidationError::Unsafe {
        rule: rule.to_string(),
        variable: variable.to_string(),
        context,
    };

    if rule.head.has_wildcard() {
        return Err(unsafe_var("_", "is not allowed in a rule head".to_string()));
    }

    let mut bound: HashSet<&str> = HashSet::new();

    for (index, literal) in rule.body.iter().enumerate() {
        match literal {
            Literal::Positive(atom) => bound.extend(atom.variables()),
            Literal::Negative(atom) => {
                if let Some(v) = atom.variables().find(|v| !bound.contains(v)) {
                    return Err(unsafe_var(
                        v,
                        format!("appears in negated literal `not {atom}` before being bound"),
                    ));
                }
            }
            Literal::Compare { op, lhs, rhs } => {
                let lhs_vars = lhs.variables();
                let rhs_vars = rhs.variables();
                let all_bound = |vars: &[&str]| vars.iter().all(|v| bound.contains(v));

                if *op == CmpOp::Eq {
                    if let Some(v) = lhs.as_var().filter(|v| !bound.contains(v)) {
                        if all_bound(&rhs_vars) {
                            bound.insert(v);
                            continue;
                        }
                    }
                    if let Some(v) = rhs.as_var().filter(|v| !bound.contains(v)) {
                        if all_bound(&lhs_vars) {
                            bound.insert(v);
                            continue;
                        }
                    }
                }

                if let Some(v) = lhs_vars
                    .iter()
                    .chain(rhs_vars.iter())
                    .copied()
                    .find(|v| !bound.contains(v))
                {
                    return Err(unsafe_var(
                        v,
                        format!("is used in `{literal}` before being bound"),
                    ));
                }
            }
            Literal::Aggregate(agg) => {
                let inner: HashSet<&str> = agg.inner_variables().collect();

                if let Some(target) = &agg.target {
                    if !inner.contains(target.as_str()) {
                        return Err(unsafe_var(
                            target,
                            "is aggregated but never bound inside the aggregate body".to_string(),
                        ));
                    }
                }
                if inner.contains(agg.result.as_str()) {
                    return Err(unsafe_var(
                        &agg.result,
                        "is both the aggregate result and bound inside its body".to_string(),
                    ));
                }

                // Group-by variables: shared with the rest of the rule.
                let outside: HashSet<&str> = rule
                    .head
                    .variables()
                    .chain(
                        rule.body
                            .iter()
                            .enumerate()
                            .filter(|(i, _)| *i != index)
                            .flat_map(|(_, lit)| lit.variables()),
                    )
                    .collect();
                let mut shared: Vec<&str> = inner.intersection(&outside).copied().collect();
                shared.sort_unstable();
                if let Some(v) = shared.into_iter().find(|v| !bound.contains(v)) {
                    return Err(unsafe_var(
                        v,
                        format!("groups aggregate `{literal}` but is not bound before it"),
                    ));
                }

                bound.insert(&agg.result);
            }
        }
    }

    if let Some(v) = rule.head.variables().find(|v| !bound.contains(v)) {
        return Err(unsafe_var(
            v,
            "appears in the head but is not bound by the body".to_string(),
        ));
    }

    Ok(())
}

/// Check that each predicate is used with one arity, matching its declaration.
pub fn check_arities<'a>(
    decls: &BTreeMap<String, Decl>,
    rules: impl IntoIterator<Item = &'a Rule>,
) -> Result<(), ValidationError> {
    let mut seen: HashMap<&str, usize> = decls
        .iter()
        .map(|(name, decl)| (name.as_str(), decl.arity()))
        .collect();

    for rule in rules {
        for atom in rule_atoms(rule) {
            match seen.get(atom.predicate.as_str()) {
                Some(&expected) if expected != atom.arity() => {
                    return Err(ValidationError::ArityMismatch {
                        predicate: atom.predicate.clone(),
                        expected,
                        found: atom.arity(),
                        rule: rule.to_string(),
                    });
                }
                Some(_) => {}
                None => {
                    seen.insert(&atom.predicate, atom.arity());
                }
            }
        }
    }
    Ok(())
}

/// Every atom in a rule: head, body, negated, and aggregate bodies.
pub fn rule_atoms(rule: &Rule) -> impl Iterator<Item = &Atom> {
    std::iter::once(&rule.head).chain(rule.body.iter().flat_map(|lit| {
        match lit {
            Literal::Positive(a) | Literal::Negative(a) => vec![a],
            Literal::Aggregate(agg) => agg.body.iter().collect::<Vec<_>>(),
            Literal::Compare { .. } => Vec::new(),
        }
    }))
}

/// Body dependencies of a rule with their edge kind.
pub fn dependencies(rule: &Rule) -> impl Iterator<Item = (&str, EdgeKind)> {
    rule.body.iter().flat_map(|lit| {
        match lit {
            Literal::Positive(a) => vec![(a.predicate.as_str(), EdgeKind::Positive)],
            Literal::Negative(a) => vec![(a.predicate.as_str(), EdgeKind::Negative)],
            Literal::Aggregate(agg) => agg
                .body
                .iter()
                .map(|a| (a.predicate.as_str(), EdgeKind::Aggregate))
                .collect::<Vec<_>>(),
            Literal::Compare { .. } => Vec::new(),
        }
    })
}

/// Assign strata, rejecting recursion through negation or aggregation.
pub fn stratify<'a>(
    rules: impl IntoIterator<Item = &'a Rule>,
) -> Result<Stratification, ValidationError> {
    let rules: Vec<&Rule> = rules.into_iter().collect();
    let mut graph: DiGraph<&str, EdgeKind> = DiGraph::new();
    let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();

    let mut node = |graph: &mut DiGraph<&'a str, EdgeKind>, name: &'a str| {
        *nodes.entry(name).or_insert_with(|| graph.add_node(name))
    };

    // Edges point from head to body, so sinks are base relations.
    let mut edges: Vec<(NodeIndex, NodeIndex, EdgeKind, &Rule)> = Vec::new();
    for rule in rules.iter().copied() {
        let head = node(&mut graph, rule.head.predicate.as_str());
        for (dep, kind) in dependencies(rule) {
            let target = node(&mut graph, dep);
            graph.add_edge(head, target, kind);
            edges.push((head, target, kind, rule));
        }
    }

    // Components come back in reverse topological order: dependencies first.
    let components = tarjan_scc(&graph);
    let mut component_of: HashMap<NodeIndex, usize> = HashMap::new();
    for (index, component) in components.iter().enumerate() {
        for n in component {
            component_of.insert(*n, index);
        }
    }

    for (head, target, kind, rule) in &edges {
        if kind.is_strict() && component_of[head] == component_of[target] {
            return Err(ValidationError::Unstratifiable {
                rule: rule.to_string(),
                predicate: graph[*target].to_string(),
            });
        }
    }

    let mut component_stratum = vec![0usize; components.len()];
    for (index, component) in components.iter().enumerate() {
        let mut stratum = 0;
        for n in component {
            for edge in graph.edges(*n) {
                let target = component_of[&edge.target()];
                if target == index {
                    continue;
                }
                let bump = usize::from(edge.weight().is_strict());
                stratum = stratum.max(component_stratum[target] + bump);
            }
        }
        component_stratum[index] = stratum;
    }

    let mut strata = HashMap::new();
    let mut max = 0;
    for (name, index) in &nodes {
        let stratum = component_stratum[component_of[index]];
        max = max.max(stratum);
        strata.insert(name.to_string(), stratum);
    }

    Ok(Stratification { strata, max })
}
