//! Per-row operators: Projection, MultiProjection, Filter, Extension,
//! Slice, Distinct and Reduced.

use super::pipe::{BindingSetPipe, EvalContext, Modifier, PipeRef};
use super::{Evaluator, SubQueries};
use crate::algebra::{Extension, Filter, MultiProjection, Projection, Slice, TupleExpr};
use crate::binding::BindingSet;
use crate::collections::{BigHashSet, SpillError};
use crate::execution::{ExprError, QueryError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

struct ProjectionPipe {
    parent: PipeRef,
    projection: Arc<Projection>,
    bindings: BindingSet,
}

impl BindingSetPipe for ProjectionPipe {
    fn push(&self, bs: Option<BindingSet>) -> bool {
        let projected = bs.map(|bs| self.projection.elements.project(&bs, &self.bindings, true));
        self.parent.push(projected)
    }

    fn parent(&self) -> Option<&PipeRef> {
        Some(&self.parent)
    }
}

/// Applies every projection to each row; a projection's output is dropped
/// when it repeats that projection's previous output
struct MultiProjectionPipe {
    parent: PipeRef,
    projection: Arc<MultiProjection>,
    bindings: BindingSet,
    previous: Mutex<Vec<Option<BindingSet>>>,
}

impl BindingSetPipe for MultiProjectionPipe {
    fn push(&self, bs: Option<BindingSet>) -> bool {
        let Some(bs) = bs else {
            return self.parent.push(None);
        };
        for (slot, list) in self.projection.projections.iter().enumerate() {
            let projected = list.project(&bs, &self.bindings, false);
            let fresh = {
                let mut previous = self.previous.lock();
                if previous[slot].as_ref() == Some(&projected) {
                    false
                } else {
                    previous[slot] = Some(projected.clone());
                    true
                }
            };
            if fresh && !self.parent.push(Some(projected)) {
                return false;
            }
        }
        true
    }

    fn parent(&self) -> Option<&PipeRef> {
        Some(&self.parent)
    }
}

struct FilterPipe {
    parent: PipeRef,
    evaluator: Arc<Evaluator>,
    filter: Arc<Filter>,
    /// Names the condition may see; `None` inside sub-queries
    scope: Option<HashSet<String>>,
}

impl BindingSetPipe for FilterPipe {
    fn push(&self, bs: Option<BindingSet>) -> bool {
        let Some(bs) = bs else {
            return self.parent.push(None);
        };
        let scoped = match &self.scope {
            Some(scope) => bs.retain(scope),
            None => bs.clone(),
        };
        let subqueries = SubQueries::new(&self.evaluator, Some(&self.parent));
        match self
            .evaluator
            .values
            .is_true(&self.filter.condition, &scoped, &subqueries)
        {
            Ok(true) => self.parent.push(Some(bs)),
            Ok(false) | Err(ExprError::Type(_)) => true,
            Err(ExprError::Query(err)) => {
                self.handle_error(err);
                false
            }
        }
    }

    fn parent(&self) -> Option<&PipeRef> {
        Some(&self.parent)
    }
}

struct ExtensionPipe {
    parent: PipeRef,
    evaluator: Arc<Evaluator>,
    extension: Arc<Extension>,
}

impl BindingSetPipe for ExtensionPipe {
    fn push(&self, bs: Option<BindingSet>) -> bool {
        let Some(mut target) = bs else {
            return self.parent.push(None);
        };
        let subqueries = SubQueries::new(&self.evaluator, Some(&self.parent));
        for elem in &self.extension.elements {
            // aggregates were computed by the enclosed Group
            if elem.expr.is_aggregate() {
                continue;
            }
            match self.evaluator.values.evaluate(&elem.expr, &target, &subqueries) {
                Ok(value) => target = target.with(elem.name.clone(), value),
                Err(ExprError::Type(msg)) => {
                    trace!(name = %elem.name, error = %msg, "extension_binding_skipped");
                }
                Err(ExprError::Query(err)) => {
                    self.handle_error(err);
                    return false;
                }
            }
        }
        self.parent.push(Some(target))
    }

    fn parent(&self) -> Option<&PipeRef> {
        Some(&self.parent)
    }
}

/// Forwards rows `offset + 1 ..= end`, counted across all producers.
///
/// The row numbered `end` is pushed together with the end of stream under
/// the write side of `gate`, so no earlier row can still be in flight
/// when the stream is ended.
struct SlicePipe {
    parent: PipeRef,
    offset: u64,
    end: u64,
    count: AtomicU64,
    done: AtomicBool,
    gate: RwLock<()>,
}

impl SlicePipe {
    fn finish(&self) -> bool {
        let _gate = self.gate.write();
        if self.done.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.parent.push(None)
    }
}

impl BindingSetPipe for SlicePipe {
    fn push(&self, bs: Option<BindingSet>) -> bool {
        let Some(bs) = bs else {
            return self.finish();
        };
        if self.done.load(Ordering::Acquire) {
            return false;
        }
        let n = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        if n <= self.offset {
            return true;
        }
        if n < self.end {
            let _gate = self.gate.read();
            if self.done.load(Ordering::Acquire) {
                return false;
            }
            let more = self.parent.push(Some(bs));
            if !more {
                self.done.store(true, Ordering::Release);
            }
            return more;
        }
        if n == self.end {
            let _gate = self.gate.write();
            if !self.done.swap(true, Ordering::AcqRel) && self.parent.push(Some(bs)) {
                trace!(end = self.end, "slice_complete");
                self.parent.push(None);
            }
        }
        false
    }

    fn parent(&self) -> Option<&PipeRef> {
        Some(&self.parent)
    }
}

struct DistinctPipe {
    parent: PipeRef,
    seen: BigHashSet<BindingSet>,
}

impl BindingSetPipe for DistinctPipe {
    fn push(&self, bs: Option<BindingSet>) -> bool {
        let Some(bs) = bs else {
            self.seen.close();
            return self.parent.push(None);
        };
        match self.seen.add(bs.clone()) {
            Ok(true) => self.parent.push(Some(bs)),
            Ok(false) => true,
            Err(SpillError::Closed) => false,
            Err(err) => {
                self.handle_error(err.into());
                false
            }
        }
    }

    fn parent(&self) -> Option<&PipeRef> {
        Some(&self.parent)
    }

    fn handle_error(&self, err: QueryError) {
        self.seen.close();
        self.parent.handle_error(err);
    }
}

/// Drops a row equal to the one right before it
struct ReducedPipe {
    parent: PipeRef,
    previous: Mutex<Option<BindingSet>>,
}

impl BindingSetPipe for ReducedPipe {
    fn push(&self, bs: Option<BindingSet>) -> bool {
        if let Some(bs) = &bs {
            let mut previous = self.previous.lock();
            if previous.as_ref() == Some(bs) {
                return true;
            }
            *previous = Some(bs.clone());
        }
        self.parent.push(bs)
    }

    fn parent(&self) -> Option<&PipeRef> {
        Some(&self.parent)
    }
}

impl Evaluator {
    pub(super) fn evaluate_projection(
        self: &Arc<Self>,
        parent: PipeRef,
        projection: &Arc<Projection>,
        bindings: BindingSet,
        ctx: &EvalContext,
    ) {
        let pipe = Arc::new(ProjectionPipe {
            parent,
            projection: Arc::clone(projection),
            bindings: bindings.clone(),
        });
        self.evaluate_expr(pipe, &projection.arg, bindings, &ctx.descend());
    }

    pub(super) fn evaluate_multi_projection(
        self: &Arc<Self>,
        parent: PipeRef,
        projection: &Arc<MultiProjection>,
        bindings: BindingSet,
        ctx: &EvalContext,
    ) {
        let pipe = Arc::new(MultiProjectionPipe {
            parent,
            projection: Arc::clone(projection),
            bindings: bindings.clone(),
            previous: Mutex::new(vec![None; projection.projections.len()]),
        });
        self.evaluate_expr(pipe, &projection.arg, bindings, &ctx.descend());
    }

    pub(super) fn evaluate_filter(
        self: &Arc<Self>,
        parent: PipeRef,
        filter: &Arc<Filter>,
        bindings: BindingSet,
        ctx: &EvalContext,
    ) {
        let scope = (!ctx.in_subquery()).then(|| filter.arg.binding_names().into_iter().collect());
        let pipe = Arc::new(FilterPipe {
            parent,
            evaluator: Arc::clone(self),
            filter: Arc::clone(filter),
            scope,
        });
        self.evaluate_expr(pipe, &filter.arg, bindings, &ctx.descend());
    }

    pub(super) fn evaluate_extension(
        self: &Arc<Self>,
        parent: PipeRef,
        extension: &Arc<Extension>,
        bindings: BindingSet,
        ctx: &EvalContext,
    ) {
        let pipe = Arc::new(ExtensionPipe {
            parent,
            evaluator: Arc::clone(self),
            extension: Arc::clone(extension),
        });
        self.evaluate_expr(pipe, &extension.arg, bindings, &ctx.descend());
    }

    pub(super) fn evaluate_slice(
        self: &Arc<Self>,
        parent: PipeRef,
        slice: &Arc<Slice>,
        bindings: BindingSet,
        ctx: &EvalContext,
    ) {
        if slice.limit == Some(0) {
            parent.push(None);
            return;
        }
        let offset = slice.offset.unwrap_or(0);
        let end = slice
            .limit
            .map_or(u64::MAX, |limit| offset.saturating_add(limit));
        let pipe = Arc::new(SlicePipe {
            parent,
            offset,
            end,
            count: AtomicU64::new(0),
            done: AtomicBool::new(false),
            gate: RwLock::new(()),
        });
        let ctx = ctx.enter(Modifier::Slice {
            offset: slice.offset,
            limit: slice.limit,
        });
        self.evaluate_expr(pipe, &slice.arg, bindings, &ctx);
    }

    pub(super) fn evaluate_distinct(
        self: &Arc<Self>,
        parent: PipeRef,
        arg: &TupleExpr,
        bindings: BindingSet,
        ctx: &EvalContext,
    ) {
        let pipe = Arc::new(DistinctPipe {
            parent,
            seen: BigHashSet::new(&self.spill),
        });
        self.evaluate_expr(pipe, arg, bindings, ctx);
    }

    pub(super) fn evaluate_reduced(
        self: &Arc<Self>,
        parent: PipeRef,
        arg: &TupleExpr,
        bindings: BindingSet,
        ctx: &EvalContext,
    ) {
        let pipe = Arc::new(ReducedPipe {
            parent,
            previous: Mutex::new(None),
        });
        self.evaluate_expr(pipe, arg, bindings, ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{ints, run, values};
    use super::*;
    use crate::algebra::{
        CompareOp, ExtensionElem, MathOp, OrderElem, ProjectionElem, ProjectionElemList, ValueExpr,
    };
    use crate::value::Value;

    fn numbered(n: i64) -> TupleExpr {
        let rows: Vec<Vec<(&str, i64)>> = (1..=n).map(|i| vec![("i", i)]).collect();
        let slices: Vec<&[(&str, i64)]> = rows.iter().map(Vec::as_slice).collect();
        values(&["i"], &slices)
    }

    #[test]
    fn test_slice_offset_and_limit() {
        let expr = TupleExpr::slice(numbered(10), Some(2), Some(3));
        let out = run(&expr, BindingSet::empty());
        assert_eq!(
            out.rows,
            vec![ints(&[("i", 3)]), ints(&[("i", 4)]), ints(&[("i", 5)])]
        );
        assert_eq!(out.ends, 1);
    }

    #[test]
    fn test_slice_offset_past_end() {
        let out = run(&TupleExpr::slice(numbered(3), Some(5), None), BindingSet::empty());
        assert!(out.rows.is_empty());
        assert_eq!(out.ends, 1);
    }

    #[test]
    fn test_slice_zero_limit_skips_argument() {
        let out = run(&TupleExpr::slice(numbered(3), None, Some(0)), BindingSet::empty());
        assert!(out.rows.is_empty());
        assert_eq!(out.ends, 1);
    }

    #[test]
    fn test_slice_limit_over_join_ends_once() {
        let join = TupleExpr::join(numbered(5), TupleExpr::SingletonSet);
        let out = run(&TupleExpr::slice(join, None, Some(2)), BindingSet::empty());
        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.ends, 1);
    }

    #[test]
    fn test_distinct_keeps_first_occurrences() {
        let arg = values(&["x"], &[&[("x", 1)], &[("x", 2)], &[("x", 1)], &[("x", 3)]]);
        let out = run(&TupleExpr::distinct(arg), BindingSet::empty());
        assert_eq!(
            out.rows,
            vec![ints(&[("x", 1)]), ints(&[("x", 2)]), ints(&[("x", 3)])]
        );
    }

    #[test]
    fn test_reduced_drops_adjacent_duplicates_only() {
        let arg = values(&["x"], &[&[("x", 1)], &[("x", 1)], &[("x", 2)], &[("x", 1)]]);
        let out = run(&TupleExpr::reduced(arg), BindingSet::empty());
        assert_eq!(
            out.rows,
            vec![ints(&[("x", 1)]), ints(&[("x", 2)]), ints(&[("x", 1)])]
        );
    }

    #[test]
    fn test_distinct_over_order_keeps_every_distinct_row() {
        let arg = values(&["x"], &[&[("x", 2)], &[("x", 1)], &[("x", 2)], &[("x", 1)]]);
        let order = TupleExpr::order(arg, vec![OrderElem::asc(ValueExpr::var("x"))]);
        let expr = TupleExpr::slice(TupleExpr::distinct(order), None, Some(2));
        let out = run(&expr, BindingSet::empty());
        assert_eq!(out.rows, vec![ints(&[("x", 1)]), ints(&[("x", 2)])]);
    }

    #[test]
    fn test_projection_renames() {
        let arg = values(&["x", "y"], &[&[("x", 1), ("y", 2)]]);
        let list = ProjectionElemList::new(vec![ProjectionElem::aliased("x", "a")]);
        let out = run(&TupleExpr::projection(arg, list), BindingSet::empty());
        assert_eq!(out.rows, vec![ints(&[("a", 1)])]);
    }

    #[test]
    fn test_multi_projection_suppresses_repeats_per_slot() {
        let arg = values(&["x", "y"], &[&[("x", 1), ("y", 1)], &[("x", 1), ("y", 2)]]);
        let expr = TupleExpr::multi_projection(
            arg,
            vec![ProjectionElemList::of(["x"]), ProjectionElemList::of(["y"])],
        );
        let out = run(&expr, BindingSet::empty());
        assert_eq!(
            out.rows,
            vec![ints(&[("x", 1)]), ints(&[("y", 1)]), ints(&[("y", 2)])]
        );
    }

    #[test]
    fn test_filter_restricts_scope() {
        // ?outer comes from the incoming bindings, not from the argument
        let arg = values(&["x"], &[&[("x", 1)]]);
        let condition = ValueExpr::Bound("outer".into());
        let out = run(&TupleExpr::filter(arg, condition), ints(&[("outer", 1)]));
        assert!(out.rows.is_empty());
        assert_eq!(out.ends, 1);
    }

    #[test]
    fn test_filter_type_error_filters_row() {
        let arg = values(&["x"], &[&[("x", 1)], &[("x", 20)]]);
        let condition = ValueExpr::compare(
            CompareOp::Gt,
            ValueExpr::var("x"),
            ValueExpr::var("missing"),
        );
        let out = run(&TupleExpr::filter(arg, condition), BindingSet::empty());
        assert!(out.rows.is_empty());
        assert!(out.errors.is_empty());
    }

    #[test]
    fn test_extension_chains_and_skips_type_errors() {
        let arg = values(&["x"], &[&[("x", 2)]]);
        let elements = vec![
            ExtensionElem::new(
                "y",
                ValueExpr::math(
                    MathOp::Mul,
                    ValueExpr::var("x"),
                    ValueExpr::constant(Value::Integer(10)),
                ),
            ),
            ExtensionElem::new(
                "z",
                ValueExpr::math(
                    MathOp::Add,
                    ValueExpr::var("y"),
                    ValueExpr::constant(Value::Integer(1)),
                ),
            ),
            ExtensionElem::new("w", ValueExpr::var("nowhere")),
        ];
        let out = run(&TupleExpr::extension(arg, elements), BindingSet::empty());
        assert_eq!(out.rows, vec![ints(&[("x", 2), ("y", 20), ("z", 21)])]);
        assert!(out.rows[0].get("w").is_none());
        assert_eq!(out.rows[0].get("z"), Some(&Value::Integer(21)));
    }
}
