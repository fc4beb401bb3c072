//! Unification of atoms against tuples, and left-to-right joins.

use std::collections::{HashMap, HashSet};

use crate::eval::Tuple;
use crate::rules::ast::{Atom, Term};
use crate::types::Binding;
use crate::value::Value;

/// Extend `binding` so that `atom` matches `tuple`, if possible.
pub(crate) fn unify(atom: &Atom, tuple: &[Value], binding: &Binding) -> Option<Binding> {
    if atom.args.len() != tuple.len() {
        return None;
    }
    let mut extended: Option<Binding> = None;
    for (term, value) in atom.args.iter().zip(tuple) {
        match term {
            Term::Wildcard => {}
            Term::Const(c) => {
                if c != value {
                    return None;
                }
            }
            Term::Var(name) => {
                let bound = match &extended {
                    Some(b) => b.get(name),
                    None => binding.get(name),
                };
                match bound {
                    Some(existing) if existing != value => return None,
                    Some(_) => {}
                    None => {
                        extended
                            .get_or_insert_with(|| binding.clone())
                            .insert(name.clone(), value.clone());
                    }
                }
            }
        }
    }
    Some(extended.unwrap_or_else(|| binding.clone()))
}

/// Join every frame with the tuples of `source` matching `atom`.
pub(crate) fn join(frames: Vec<Binding>, atom: &Atom, source: Option<&HashSet<Tuple>>) -> Vec<Binding> {
    let Some(source) = source else {
        return Vec::new();
    };
    if frames.is_empty() || source.is_empty() {
        return Vec::new();
    }

    // Every frame binds the same variables, so the first one decides the key.
    let key_position = atom.args.iter().position(|t| match t {
        Term::Const(_) => true,
        Term::Var(v) => frames[0].contains_key(v),
        Term::Wildcard => false,
    });

    let mut out = Vec::new();
    let Some(position) = key_position else {
        for frame in &frames {
            for tuple in source {
                if let Some(b) = unify(atom, tuple, frame) {
                    out.push(b);
                }
            }
        }
        return out;
    };

    let mut index: HashMap<&Value, Vec<&Tuple>> = HashMap::new();
    for tuple in source {
        if tuple.len() == atom.arity() {
            index.entry(&tuple[position]).or_default().push(tuple);
        }
    }

    for frame in &frames {
        let key = match &atom.args[position] {
            Term::Const(c) => Some(c),
            Term::Var(v) => frame.get(v),
            Term::Wildcard => None,
        };
        match key {
            Some(key) => {
                for tuple in index.get(key).into_iter().flatten() {
                    if let Some(b) = unify(atom, tuple, frame) {
                        out.push(b);
                    }
                }
            }
            None => {
                for tuple in source {
                    if let Some(b) = unify(atom, tuple, frame) {
                        out.push(b);
                    }
                }
            }
        }
    }
    out
}

/// Whether any tuple of `source` matches `atom` under `binding`.
pub(crate) fn matches_any(atom: &Atom, binding: &Binding, source: Option<&HashSet<Tuple>>) -> bool {
    source.is_some_and(|s| s.iter().any(|t| unify(atom, t, binding).is_some()))
}
