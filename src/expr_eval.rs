//! Built-in value expression evaluation and batch aggregation.
//!
//! `SimpleValueEvaluator` covers the `ValueExpr` operators defined in
//! [`crate::algebra`]. Type mismatches, unbound variables and division by
//! zero are reported as `ExprError::Type`, which Filter, LeftJoin and
//! Extension recover from. Failures of nested sub-queries are passed
//! through as `ExprError::Query`.

use crate::algebra::{AggregateKind, AggregateOp, CompareOp, Group, MathOp, ValueExpr};
use crate::binding::BindingSet;
use crate::collaborators::{GroupEvaluator, SubQueryEvaluator, ValueEvaluator};
use crate::execution::{ExprError, QueryResult};
use crate::iteration::{BindingSetIteration, BoxedIteration, VecIteration};
use crate::value::{xsd, Value};
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

fn type_error(msg: impl Into<String>) -> ExprError {
    ExprError::Type(msg.into())
}

/// SPARQL effective boolean value
pub fn effective_boolean_value(value: &Value) -> Result<bool, ExprError> {
    match value {
        Value::Boolean(b) => Ok(*b),
        Value::Integer(i) => Ok(*i != 0),
        Value::Double(d) => Ok(*d != 0.0 && !d.is_nan()),
        Value::String(s) | Value::LangString { value: s, .. } => Ok(!s.is_empty()),
        other => Err(type_error(format!("no boolean value for {other}"))),
    }
}

/// Evaluator for the built-in expression operators
#[derive(Debug, Default)]
pub struct SimpleValueEvaluator {
    now: Mutex<Option<Value>>,
}

impl SimpleValueEvaluator {
    pub fn new() -> Self {
        SimpleValueEvaluator::default()
    }

    fn now(&self) -> Value {
        self.now
            .lock()
            .get_or_insert_with(|| {
                Value::typed(
                    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                    xsd::DATE_TIME,
                )
            })
            .clone()
    }
}

impl ValueEvaluator for SimpleValueEvaluator {
    fn evaluate(
        &self,
        expr: &ValueExpr,
        bindings: &BindingSet,
        subqueries: &dyn SubQueryEvaluator,
    ) -> Result<Value, ExprError> {
        match expr {
            ValueExpr::Var(name) => bindings
                .get(name)
                .cloned()
                .ok_or_else(|| type_error(format!("unbound variable ?{name}"))),
            ValueExpr::Constant(value) => Ok(value.clone()),
            ValueExpr::Bound(name) => Ok(Value::Boolean(bindings.has_binding(name))),
            ValueExpr::Not(inner) => Ok(Value::Boolean(
                !self.is_true(inner, bindings, subqueries)?,
            )),
            ValueExpr::And(l, r) => {
                let left = self.is_true(l, bindings, subqueries);
                if matches!(left, Ok(false)) {
                    return Ok(Value::Boolean(false));
                }
                let right = self.is_true(r, bindings, subqueries);
                match (left, right) {
                    (_, Ok(false)) => Ok(Value::Boolean(false)),
                    (Ok(_), Ok(_)) => Ok(Value::Boolean(true)),
                    (Err(e), _) | (_, Err(e)) => Err(e),
                }
            }
            ValueExpr::Or(l, r) => {
                let left = self.is_true(l, bindings, subqueries);
                if matches!(left, Ok(true)) {
                    return Ok(Value::Boolean(true));
                }
                let right = self.is_true(r, bindings, subqueries);
                match (left, right) {
                    (_, Ok(true)) => Ok(Value::Boolean(true)),
                    (Ok(_), Ok(_)) => Ok(Value::Boolean(false)),
                    (Err(e), _) | (_, Err(e)) => Err(e),
                }
            }
            ValueExpr::Compare { op, left, right } => {
                let l = self.evaluate(left, bindings, subqueries)?;
                let r = self.evaluate(right, bindings, subqueries)?;
                compare(*op, &l, &r).map(Value::Boolean)
            }
            ValueExpr::Math { op, left, right } => {
                let l = self.evaluate(left, bindings, subqueries)?;
                let r = self.evaluate(right, bindings, subqueries)?;
                math(*op, &l, &r)
            }
            ValueExpr::Str(inner) => match self.evaluate(inner, bindings, subqueries)? {
                Value::BlankNode(label) => Err(type_error(format!("STR of blank node _:{label}"))),
                other => Ok(Value::string(other.lexical())),
            },
            ValueExpr::Now => Ok(self.now()),
            ValueExpr::Aggregate(_) => Err(type_error("aggregate outside of a group")),
            ValueExpr::Exists(tuple) => {
                let mut results = subqueries.evaluate_subquery(tuple, bindings)?;
                let first = results.next();
                results.close();
                match first {
                    Some(Ok(_)) => Ok(Value::Boolean(true)),
                    Some(Err(e)) => Err(e.into()),
                    None => Ok(Value::Boolean(false)),
                }
            }
        }
    }

    fn reset_query_time(&self) {
        *self.now.lock() = None;
    }
}

fn compare(op: CompareOp, l: &Value, r: &Value) -> Result<bool, ExprError> {
    let ordering = match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (l, r) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (
                Value::LangString { value: a, language: la },
                Value::LangString { value: b, language: lb },
            ) if la == lb => Some(a.cmp(b)),
            (
                Value::Typed { value: a, datatype: da },
                Value::Typed { value: b, datatype: db },
            ) if da == db => Some(a.cmp(b)),
            _ => None,
        },
    };
    match (op, ordering) {
        (CompareOp::Eq, Some(o)) => Ok(o == Ordering::Equal),
        (CompareOp::Ne, Some(o)) => Ok(o != Ordering::Equal),
        (CompareOp::Eq, None) => Ok(l == r),
        (CompareOp::Ne, None) => Ok(l != r),
        (CompareOp::Lt, Some(o)) => Ok(o == Ordering::Less),
        (CompareOp::Le, Some(o)) => Ok(o != Ordering::Greater),
        (CompareOp::Gt, Some(o)) => Ok(o == Ordering::Greater),
        (CompareOp::Ge, Some(o)) => Ok(o != Ordering::Less),
        (_, None) => Err(type_error(format!("cannot order {l} and {r}"))),
    }
}

fn math(op: MathOp, l: &Value, r: &Value) -> Result<Value, ExprError> {
    if let (Value::Integer(a), Value::Integer(b)) = (l, r) {
        let result = match op {
            MathOp::Add => a.checked_add(*b),
            MathOp::Sub => a.checked_sub(*b),
            MathOp::Mul => a.checked_mul(*b),
            MathOp::Div if *b == 0 => return Err(type_error("division by zero")),
            MathOp::Div => return Ok(Value::Double(*a as f64 / *b as f64)),
        };
        return result
            .map(Value::Integer)
            .ok_or_else(|| type_error("integer overflow"));
    }
    let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) else {
        return Err(type_error(format!("non-numeric operands {l} and {r}")));
    };
    Ok(Value::Double(match op {
        MathOp::Add => a + b,
        MathOp::Sub => a - b,
        MathOp::Mul => a * b,
        MathOp::Div if b == 0.0 => return Err(type_error("division by zero")),
        MathOp::Div => a / b,
    }))
}

/// In-memory grouping with COUNT, SUM, AVG, MIN, MAX and SAMPLE
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleGroupEvaluator;

impl GroupEvaluator for SimpleGroupEvaluator {
    fn evaluate(
        &self,
        group: &Group,
        mut input: BoxedIteration,
        bindings: &BindingSet,
        values: &dyn ValueEvaluator,
        subqueries: &dyn SubQueryEvaluator,
    ) -> QueryResult<BoxedIteration> {
        let mut index: HashMap<Vec<Option<Value>>, usize> = HashMap::new();
        let mut groups: Vec<(Vec<Option<Value>>, Vec<BindingSet>)> = Vec::new();
        for row in input.by_ref() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    input.close();
                    return Err(e);
                }
            };
            let key: Vec<Option<Value>> = group
                .group_names
                .iter()
                .map(|name| row.get(name).cloned())
                .collect();
            let slot = *index.entry(key.clone()).or_insert_with(|| {
                groups.push((key, Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(row);
        }
        input.close();
        if groups.is_empty() && group.group_names.is_empty() {
            groups.push((Vec::new(), Vec::new()));
        }

        let mut results = Vec::with_capacity(groups.len());
        for (key, rows) in groups {
            let mut result = bindings.clone();
            for (name, value) in group.group_names.iter().zip(key) {
                if let Some(value) = value {
                    result = result.with(name.clone(), value);
                }
            }
            for elem in &group.elements {
                if let Some(value) = aggregate(&elem.operator, &rows, values, subqueries)? {
                    result = result.with(elem.name.clone(), value);
                }
            }
            results.push(result);
        }
        Ok(VecIteration::new(results).boxed())
    }
}

/// `Ok(None)` leaves the aggregate unbound
fn aggregate(
    op: &AggregateOp,
    rows: &[BindingSet],
    values: &dyn ValueEvaluator,
    subqueries: &dyn SubQueryEvaluator,
) -> QueryResult<Option<Value>> {
    let Some(arg) = &op.arg else {
        let count = if op.distinct {
            rows.iter().collect::<HashSet<_>>().len()
        } else {
            rows.len()
        };
        return Ok(Some(Value::Integer(count as i64)));
    };
    let mut seen = HashSet::new();
    let mut inputs = Vec::with_capacity(rows.len());
    for row in rows {
        match values.evaluate(arg, row, subqueries) {
            Ok(value) => {
                if !op.distinct || seen.insert(value.clone()) {
                    inputs.push(value);
                }
            }
            Err(ExprError::Type(_)) => {}
            Err(ExprError::Query(e)) => return Err(e),
        }
    }
    Ok(match op.kind {
        AggregateKind::Count => Some(Value::Integer(inputs.len() as i64)),
        AggregateKind::Sum => sum(&inputs),
        AggregateKind::Avg => match sum(&inputs) {
            _ if inputs.is_empty() => Some(Value::Integer(0)),
            Some(total) => total.as_f64().map(|t| Value::Double(t / inputs.len() as f64)),
            None => None,
        },
        AggregateKind::Min => inputs.into_iter().min(),
        AggregateKind::Max => inputs.into_iter().max(),
        AggregateKind::Sample => inputs.into_iter().next(),
    })
}

fn sum(inputs: &[Value]) -> Option<Value> {
    let mut total = Value::Integer(0);
    for value in inputs {
        total = math(MathOp::Add, &total, value).ok()?;
    }
    Some(total)
}
