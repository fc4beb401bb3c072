//! Arithmetic, comparisons, and aggregates inside rule bodies.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::eval::join::join;
use crate::eval::Tuple;
use crate::rules::ast::{AggFunc, Aggregate, ArithOp, Atom, CmpOp, Expr, Term};
use crate::types::{Binding, EvaluationError};
use crate::value::Value;

pub(crate) fn eval(expr: &Expr, binding: &Binding) -> Result<Value, EvaluationError> {
    match expr {
        Expr::Term(Term::Const(c)) => Ok(c.clone()),
        Expr::Term(Term::Var(v)) => binding
            .get(v)
            .cloned()
            .ok_or_else(|| EvaluationError::MalformedPattern(format!("unbound variable {v}"))),
        Expr::Term(Term::Wildcard) => Err(EvaluationError::MalformedPattern(
            "`_` in expression".to_string(),
        )),
        Expr::Binary { op, lhs, rhs } => {
            let l = eval(lhs, binding)?;
            let r = eval(rhs, binding)?;
            arith(*op, l, r, expr)
        }
    }
}

fn arith(op: ArithOp, lhs: Value, rhs: Value, expr: &Expr) -> Result<Value, EvaluationError> {
    let overflow = || EvaluationError::Overflow(expr.to_string());
    let by_zero = || EvaluationError::DivisionByZero(expr.to_string());

    match (&lhs, &rhs) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            let result = match op {
                ArithOp::Add => a.checked_add(b),
                ArithOp::Sub => a.checked_sub(b),
                ArithOp::Mul => a.checked_mul(b),
                ArithOp::Div => {
                    if b == 0 {
                        return Err(by_zero());
                    }
                    if a % b != 0 {
                        return Ok(Value::Float(a as f64 / b as f64));
                    }
                    a.checked_div(b)
                }
                ArithOp::Mod => {
                    if b == 0 {
                        return Err(by_zero());
                    }
                    a.checked_rem(b)
                }
            };
            result.map(Value::Int).ok_or_else(overflow)
        }
        (Value::String(a), Value::String(b)) if op == ArithOp::Add => {
            Ok(Value::String(format!("{a}{b}")))
        }
        _ => {
            let a = lhs.as_f64().ok_or_else(|| EvaluationError::NonNumeric {
                expr: expr.to_string(),
                value: lhs.to_string(),
            })?;
            let b = rhs.as_f64().ok_or_else(|| EvaluationError::NonNumeric {
                expr: expr.to_string(),
                value: rhs.to_string(),
            })?;
            let result = match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div | ArithOp::Mod if b == 0.0 => return Err(by_zero()),
                ArithOp::Div => a / b,
                ArithOp::Mod => a % b,
            };
            if result.is_finite() {
                Ok(Value::Float(result))
            } else {
                Err(overflow())
            }
        }
    }
}

/// Filter or extend a frame with a comparison literal.
///
/// `X = expr` with `X` unbound binds `X`.
pub(crate) fn compare(
    op: CmpOp,
    lhs: &Expr,
    rhs: &Expr,
    mut binding: Binding,
) -> Result<Option<Binding>, EvaluationError> {
    if op == CmpOp::Eq {
        if let Some(v) = lhs.as_var().filter(|v| !binding.contains_key(*v)) {
            let value = eval(rhs, &binding)?;
            binding.insert(v.to_string(), value);
            return Ok(Some(binding));
        }
        if let Some(v) = rhs.as_var().filter(|v| !binding.contains_key(*v)) {
            let value = eval(lhs, &binding)?;
            binding.insert(v.to_string(), value);
            return Ok(Some(binding));
        }
    }

    let l = eval(lhs, &binding)?;
    let r = eval(rhs, &binding)?;
    let holds = match op {
        CmpOp::Eq => l == r,
        CmpOp::Ne => l != r,
        CmpOp::Lt => l < r,
        CmpOp::Le => l <= r,
        CmpOp::Gt => l > r,
        CmpOp::Ge => l >= r,
    };
    Ok(holds.then_some(binding))
}

/// Evaluate an aggregate for one outer frame.
///
/// The group is the set of distinct body matches consistent with the frame.
/// An empty group yields `count = 0` and `sum = 0`, and no row otherwise.
pub(crate) fn aggregate(
    agg: &Aggregate,
    binding: Binding,
    relations: &HashMap<String, HashSet<Tuple>>,
) -> Result<Option<Binding>, EvaluationError> {
    // Anonymous positions count towards distinctness, so name them.
    let mut next = 0;
    let body: Vec<Atom> = agg.body.iter().map(|a| a.name_wildcards(&mut next)).collect();

    let mut inner = vec![binding.clone()];
    for atom in &body {
        inner = join(inner, atom, relations.get(&atom.predicate));
    }

    let vars: BTreeSet<&str> = body.iter().flat_map(Atom::variables).collect();
    let rows: BTreeSet<Vec<Value>> = inner
        .iter()
        .map(|b| vars.iter().filter_map(|v| b.get(*v).cloned()).collect())
        .collect();

    let target_position = agg
        .target
        .as_deref()
        .and_then(|target| vars.iter().position(|v| *v == target));
    let values: Vec<&Value> = match target_position {
        Some(position) => rows.iter().filter_map(|row| row.get(position)).collect(),
        None => Vec::new(),
    };

    let numeric = |value: &Value| {
        value.as_f64().ok_or_else(|| EvaluationError::Aggregation {
            function: agg.func.name().to_string(),
            value: value.to_string(),
        })
    };

    let result = match agg.func {
        AggFunc::Count => Value::Int(rows.len() as i64),
        AggFunc::Sum => {
            if values.iter().all(|v| matches!(v, Value::Int(_))) {
                let mut total: i64 = 0;
                for v in &values {
                    if let Value::Int(i) = v {
                        total = total.checked_add(*i).ok_or_else(|| {
                            EvaluationError::Overflow(format!("sum over {}", agg.result))
                        })?;
                    }
                }
                Value::Int(total)
            } else {
                let mut total = 0.0;
                for v in values.iter().copied() {
                    total += numeric(v)?;
                }
                Value::Float(total)
            }
        }
        AggFunc::Min => match values.iter().copied().min() {
            Some(v) => v.clone(),
            None => return Ok(None),
        },
        AggFunc::Max => match values.iter().copied().max() {
            Some(v) => v.clone(),
            None => return Ok(None),
        },
        AggFunc::Avg => {
            if values.is_empty() {
                return Ok(None);
            }
            let mut total = 0.0;
            for v in values.iter().copied() {
                total += numeric(v)?;
            }
            Value::Float(total / values.len() as f64)
        }
    };

    let mut binding = binding;
    match binding.get(&agg.result) {
        Some(existing) if *existing != result => Ok(None),
        Some(_) => Ok(Some(binding)),
        None => {
            binding.insert(agg.result.clone(), result);
            Ok(Some(binding))
        }
    }
}
