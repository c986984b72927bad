//! Value expressions appearing inside tuple operators (conditions, computed
//! bindings, order keys, aggregates).

use super::TupleExpr;
use crate::value::Value;
use std::collections::BTreeSet;

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Count,
    Sum,
    Min,
    Max,
    Avg,
    Sample,
}

/// An aggregate call; `arg == None` is `COUNT(*)`
#[derive(Debug, Clone)]
pub struct AggregateOp {
    pub kind: AggregateKind,
    pub arg: Option<Box<ValueExpr>>,
    pub distinct: bool,
}

/// Scalar expression tree
#[derive(Debug, Clone)]
pub enum ValueExpr {
    Var(String),
    Constant(Value),
    Bound(String),
    Not(Box<ValueExpr>),
    And(Box<ValueExpr>, Box<ValueExpr>),
    Or(Box<ValueExpr>, Box<ValueExpr>),
    Compare {
        op: CompareOp,
        left: Box<ValueExpr>,
        right: Box<ValueExpr>,
    },
    Math {
        op: MathOp,
        left: Box<ValueExpr>,
        right: Box<ValueExpr>,
    },
    /// Lexical form as a simple literal
    Str(Box<ValueExpr>),
    /// Query start time, stable within one query
    Now,
    /// Only meaningful inside a Group; skipped by Extension
    Aggregate(AggregateOp),
    /// Sub-query value operator
    Exists(TupleExpr),
}

impl ValueExpr {
    pub fn var(name: impl Into<String>) -> Self {
        ValueExpr::Var(name.into())
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        ValueExpr::Constant(value.into())
    }

    pub fn compare(op: CompareOp, left: ValueExpr, right: ValueExpr) -> Self {
        ValueExpr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn math(op: MathOp, left: ValueExpr, right: ValueExpr) -> Self {
        ValueExpr::Math {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, ValueExpr::Aggregate(_))
    }

    /// Every variable name the expression mentions, sub-queries included
    pub fn collect_var_names(&self, out: &mut BTreeSet<String>) {
        match self {
            ValueExpr::Var(name) | ValueExpr::Bound(name) => {
                out.insert(name.clone());
            }
            ValueExpr::Constant(_) | ValueExpr::Now => {}
            ValueExpr::Not(inner) | ValueExpr::Str(inner) => inner.collect_var_names(out),
            ValueExpr::And(l, r)
            | ValueExpr::Or(l, r)
            | ValueExpr::Compare { left: l, right: r, .. }
            | ValueExpr::Math { left: l, right: r, .. } => {
                l.collect_var_names(out);
                r.collect_var_names(out);
            }
            ValueExpr::Aggregate(op) => {
                if let Some(arg) = &op.arg {
                    arg.collect_var_names(out);
                }
            }
            ValueExpr::Exists(expr) => out.extend(expr.var_names()),
        }
    }

    pub fn var_names(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_var_names(&mut out);
        out
    }
}
