//! Syntax tree for rules, declarations, and query patterns.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Var(String),
    /// Anonymous `_`: matches anything, binds nothing.
    Wildcard,
    Const(Value),
}

impl Term {
    pub fn var(&self) -> Option<&str> {
        match self {
            Term::Var(name) => Some(name),
            _ => None,
        }
    }
}

/// `predicate(term, ...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    pub predicate: String,
    pub args: Vec<Term>,
}

impl Atom {
    pub fn new(predicate: impl Into<String>, args: Vec<Term>) -> Self {
        Self {
            predicate: predicate.into(),
            args,
        }
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// Named variables in argument order, repeats included.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.args.iter().filter_map(Term::var)
    }

    pub fn has_wildcard(&self) -> bool {
        self.args.iter().any(|t| matches!(t, Term::Wildcard))
    }

    /// Replace every `_` with a fresh `_N` variable, numbering from `*next`.
    pub fn name_wildcards(&self, next: &mut usize) -> Atom {
        let args = self
            .args
            .iter()
            .map(|t| match t {
                Term::Wildcard => {
                    let named = Term::Var(format!("_{next}"));
                    *next += 1;
                    named
                }
                other => other.clone(),
            })
            .collect();
        Atom::new(self.predicate.clone(), args)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithOp {
    fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Mod => "%",
        }
    }

    fn precedence(self) -> u8 {
        match self {
            ArithOp::Add | ArithOp::Sub => 1,
            ArithOp::Mul | ArithOp::Div | ArithOp::Mod => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Term(Term),
    Binary {
        op: ArithOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Term(t) => out.extend(t.var()),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_variables(out);
                rhs.collect_variables(out);
            }
        }
    }

    /// The variable, when the expression is exactly one variable.
    pub fn as_var(&self) -> Option<&str> {
        match self {
            Expr::Term(Term::Var(v)) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggFunc {
    pub fn name(self) -> &'static str {
        match self {
            AggFunc::Count => "count",
            AggFunc::Sum => "sum",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::Avg => "avg",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "count" => Some(AggFunc::Count),
            "sum" => Some(AggFunc::Sum),
            "min" => Some(AggFunc::Min),
            "max" => Some(AggFunc::Max),
            "avg" => Some(AggFunc::Avg),
            _ => None,
        }
    }
}

/// `Result = func(Target) { atom, ... }`.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub result: String,
    pub func: AggFunc,
    /// Aggregated variable; absent for `count`.
    pub target: Option<String>,
    pub body: Vec<Atom>,
}

impl Aggregate {
    /// Variables bound inside the aggregate body.
    pub fn inner_variables(&self) -> impl Iterator<Item = &str> {
        self.body.iter().flat_map(Atom::variables)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Positive(Atom),
    Negative(Atom),
    Compare { op: CmpOp, lhs: Expr, rhs: Expr },
    Aggregate(Aggregate),
}

impl Literal {
    pub fn variables(&self) -> Vec<&str> {
        match self {
            Literal::Positive(a) | Literal::Negative(a) => a.variables().collect(),
            Literal::Compare { lhs, rhs, .. } => {
                let mut vars = lhs.variables();
                vars.extend(rhs.variables());
                vars
            }
            Literal::Aggregate(agg) => {
                let mut vars: Vec<&str> = agg.inner_variables().collect();
                vars.push(&agg.result);
                vars
            }
        }
    }
}

/// `head :- body.`; a fact when the body is empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub head: Atom,
    pub body: Vec<Literal>,
}

/// Field type in a predicate declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Any,
    String,
    Number,
    Atom,
    Bool,
    List,
    Map,
}

impl ValueType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "any" => Some(ValueType::Any),
            "string" => Some(ValueType::String),
            "number" => Some(ValueType::Number),
            "atom" => Some(ValueType::Atom),
            "bool" => Some(ValueType::Bool),
            "list" => Some(ValueType::List),
            "map" => Some(ValueType::Map),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueType::Any => "any",
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Atom => "atom",
            ValueType::Bool => "bool",
            ValueType::List => "list",
            ValueType::Map => "map",
        }
    }

    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ValueType::Any => true,
            ValueType::String => matches!(value, Value::String(_)),
            ValueType::Number => value.is_number(),
            ValueType::Atom => matches!(value, Value::Atom(_)),
            ValueType::Bool => matches!(value, Value::Bool(_)),
            ValueType::List => matches!(value, Value::List(_)),
            ValueType::Map => matches!(value, Value::Map(_)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: Option<String>,
    pub ty: ValueType,
}

/// `Decl name(field: type, ...).`
#[derive(Debug, Clone, PartialEq)]
pub struct Decl {
    pub predicate: String,
    pub fields: Vec<FieldDecl>,
}

impl Decl {
    pub fn arity(&self) -> usize {
        self.fields.len()
    }

    /// Same shape: arity and field types. Field names are documentation only.
    pub fn same_shape(&self, other: &Decl) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(&other.fields)
                .all(|(a, b)| a.ty == b.ty)
    }
}

/// A parsed source text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub decls: Vec<Decl>,
    pub rules: Vec<Rule>,
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Var(v) => write!(f, "{v}"),
            Term::Wildcard => write!(f, "_"),
            Term::Const(c) => write!(f, "{c}"),
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.predicate)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ")")
    }
}

impl Expr {
    fn fmt_prec(&self, f: &mut fmt::Formatter<'_>, parent: u8) -> fmt::Result {
        match self {
            Expr::Term(t) => write!(f, "{t}"),
            Expr::Binary { op, lhs, rhs } => {
                let prec = op.precedence();
                if prec < parent {
                    write!(f, "(")?;
                }
                lhs.fmt_prec(f, prec)?;
                write!(f, " {} ", op.symbol())?;
                rhs.fmt_prec(f, prec + 1)?;
                if prec < parent {
                    write!(f, ")")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_prec(f, 0)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Positive(a) => write!(f, "{a}"),
            Literal::Negative(a) => write!(f, "not {a}"),
            Literal::Compare { op, lhs, rhs } => write!(f, "{lhs} {} {rhs}", op.symbol()),
            Literal::Aggregate(agg) => {
                write!(f, "{} = {}", agg.result, agg.func.name())?;
                if let Some(target) = &agg.target {
                    write!(f, "({target})")?;
                }
                write!(f, "{{")?;
                for (i, atom) in agg.body.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{atom}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.head)?;
        if !self.body.is_empty() {
            write!(f, " :- ")?;
            for (i, lit) in self.body.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{lit}")?;
            }
        }
        write!(f, ".")
    }
}

impl fmt::Display for Decl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Decl {}(", self.predicate)?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match &field.name {
                Some(name) => write!(f, "{name}: {}", field.ty.name())?,
                None => write!(f, "{}", field.ty.name())?,
            }
        }
        write!(f, ").")
    }
}
