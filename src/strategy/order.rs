//! ORDER BY through the disk-spillable [`Sorter`].
//!
//! Every incoming row becomes an [`OrderKey`]: the evaluated order values,
//! their directions, and an arrival counter that keeps equal keys in input
//! order. When an enclosing Distinct or Reduced allows it, repeated rows are
//! dropped before they reach the sorter, so the first arrival is the one
//! kept. Rows are released sorted once the argument ends.

use super::pipe::{BindingSetPipe, EvalContext, PipeRef};
use super::{Evaluator, SubQueries};
use crate::algebra::Order;
use crate::binding::BindingSet;
use crate::collections::{BigHashSet, SpillError, Sorter};
use crate::execution::{ExprError, QueryError, QueryResult};
use crate::value::{compare_optional, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::atomic::{self, AtomicU64};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SortComponent {
    /// `None` when the order expression could not be evaluated
    value: Option<Value>,
    ascending: bool,
}

/// Sort key of one row; `minor` makes every key unique and breaks ties by
/// arrival
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderKey {
    components: Vec<SortComponent>,
    minor: u64,
    bindings: BindingSet,
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.components.iter().zip(&other.components) {
            let cmp = compare_optional(a.value.as_ref(), b.value.as_ref());
            let cmp = if a.ascending { cmp } else { cmp.reverse() };
            if cmp != Ordering::Equal {
                return cmp;
            }
        }
        self.minor.cmp(&other.minor)
    }
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for OrderKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderKey {}

struct OrderPipe {
    parent: PipeRef,
    evaluator: Arc<Evaluator>,
    order: Arc<Order>,
    sorter: Sorter<OrderKey>,
    /// Rows seen so far, when duplicates may be dropped
    seen: Option<BigHashSet<BindingSet>>,
    minor: AtomicU64,
}

impl OrderPipe {
    fn key(&self, bindings: BindingSet) -> QueryResult<OrderKey> {
        let subqueries = SubQueries::new(&self.evaluator, Some(&self.parent));
        let mut components = Vec::with_capacity(self.order.elements.len());
        for elem in &self.order.elements {
            let value = match self.evaluator.values.evaluate(&elem.expr, &bindings, &subqueries) {
                Ok(value) => Some(value),
                Err(ExprError::Type(_)) => None,
                Err(ExprError::Query(err)) => return Err(err),
            };
            components.push(SortComponent {
                value,
                ascending: elem.ascending,
            });
        }
        Ok(OrderKey {
            components,
            minor: self.minor.fetch_add(1, atomic::Ordering::Relaxed),
            bindings,
        })
    }

    /// Whether `bs` has not been seen before; always true without dedup
    fn first_occurrence(&self, bs: &BindingSet) -> Result<bool, SpillError> {
        match &self.seen {
            Some(seen) => seen.add(bs.clone()),
            None => Ok(true),
        }
    }

    fn close(&self) {
        self.sorter.close();
        if let Some(seen) = &self.seen {
            seen.close();
        }
    }

    /// Push the sorted rows, then the end of stream
    fn release(&self) -> bool {
        if let Some(seen) = &self.seen {
            seen.close();
        }
        let entries = match self.sorter.drain() {
            Ok(entries) => entries,
            Err(SpillError::Closed) => return false,
            Err(err) => {
                self.handle_error(err.into());
                return false;
            }
        };
        for entry in entries {
            let (key, count) = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    self.handle_error(err.into());
                    return false;
                }
            };
            for _ in 0..count {
                if !self.parent.push(Some(key.bindings.clone())) {
                    self.sorter.close();
                    return false;
                }
            }
        }
        self.sorter.close();
        self.parent.push(None)
    }
}

impl BindingSetPipe for OrderPipe {
    fn push(&self, bs: Option<BindingSet>) -> bool {
        let Some(bs) = bs else {
            return self.release();
        };
        match self.first_occurrence(&bs) {
            Ok(true) => {}
            Ok(false) => return true,
            Err(SpillError::Closed) => return false,
            Err(err) => {
                self.handle_error(err.into());
                return false;
            }
        }
        let key = match self.key(bs) {
            Ok(key) => key,
            Err(err) => {
                self.handle_error(err);
                return false;
            }
        };
        match self.sorter.add(key) {
            Ok(()) => true,
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
        self.close();
        self.parent.handle_error(err);
    }
}

impl Evaluator {
    pub(super) fn evaluate_order(
        self: &Arc<Self>,
        parent: PipeRef,
        order: &Arc<Order>,
        bindings: BindingSet,
        ctx: &EvalContext,
    ) {
        let limit = ctx.sort_limit();
        let distinct = ctx.sort_distinct();
        debug!(
            keys = order.elements.len(),
            limit = (limit < u64::MAX).then_some(limit),
            distinct,
            "order_started"
        );
        let pipe = Arc::new(OrderPipe {
            parent,
            evaluator: Arc::clone(self),
            order: Arc::clone(order),
            sorter: Sorter::new(limit, &self.spill),
            seen: distinct.then(|| BigHashSet::new(&self.spill)),
            minor: AtomicU64::new(0),
        });
        self.evaluate_expr(pipe, &order.arg, bindings, &ctx.descend());
    }
}
