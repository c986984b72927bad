//! Union, Intersection and Difference.
//!
//! Union fans in two concurrent branches. Intersection and Difference
//! buffer the whole right argument in a [`BigHashSet`] and only then start
//! the left argument, filtering it against the buffer.

use super::join::Completion;
use super::pipe::{BindingSetPipe, EvalContext, PipeRef};
use super::Evaluator;
use crate::algebra::SetOperands;
use crate::binding::BindingSet;
use crate::collections::{BigHashSet, SpillError, SpillResult};
use crate::execution::QueryError;
use std::sync::Arc;
use tracing::debug;

struct UnionPipe {
    parent: PipeRef,
    completion: Arc<Completion>,
}

impl BindingSetPipe for UnionPipe {
    fn push(&self, bs: Option<BindingSet>) -> bool {
        match bs {
            Some(bs) => self.completion.forward(&self.parent, bs),
            None => {
                if self.completion.finish() {
                    self.parent.push(None);
                }
                false
            }
        }
    }

    fn parent(&self) -> Option<&PipeRef> {
        Some(&self.parent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetOp {
    Intersection,
    Difference,
}

impl SetOp {
    fn name(self) -> &'static str {
        match self {
            SetOp::Intersection => "Intersection",
            SetOp::Difference => "Difference",
        }
    }

    /// Whether a left result survives against the buffered right results
    fn keeps(self, buffered: &BigHashSet<BindingSet>, bs: &BindingSet) -> SpillResult<bool> {
        match self {
            SetOp::Intersection => buffered.contains(bs),
            SetOp::Difference => buffered
                .any(|excluded| excluded.shares_variable(bs) && excluded.is_compatible(bs))
                .map(|excluded| !excluded),
        }
    }
}

/// Collects the right argument, then evaluates the left one
struct BufferPipe {
    parent: PipeRef,
    op: SetOp,
    buffered: Arc<BigHashSet<BindingSet>>,
    evaluator: Arc<Evaluator>,
    operands: Arc<SetOperands>,
    bindings: BindingSet,
    ctx: EvalContext,
}

impl BindingSetPipe for BufferPipe {
    fn push(&self, bs: Option<BindingSet>) -> bool {
        match bs {
            Some(bs) => match self.buffered.add(bs) {
                Ok(_) => true,
                Err(SpillError::Closed) => false,
                Err(err) => {
                    self.handle_error(err.into());
                    false
                }
            },
            None => {
                debug!(op = self.op.name(), buffered = self.buffered.len(), "set_buffered");
                let filter = Arc::new(FilterPipe {
                    parent: Arc::clone(&self.parent),
                    op: self.op,
                    buffered: Arc::clone(&self.buffered),
                });
                self.evaluator.evaluate_expr(
                    filter,
                    &self.operands.left,
                    self.bindings.clone(),
                    &self.ctx,
                );
                false
            }
        }
    }

    fn parent(&self) -> Option<&PipeRef> {
        Some(&self.parent)
    }

    fn handle_error(&self, err: QueryError) {
        self.buffered.close();
        self.parent.handle_error(err);
    }
}

struct FilterPipe {
    parent: PipeRef,
    op: SetOp,
    buffered: Arc<BigHashSet<BindingSet>>,
}

impl BindingSetPipe for FilterPipe {
    fn push(&self, bs: Option<BindingSet>) -> bool {
        let Some(bs) = bs else {
            self.buffered.close();
            return self.parent.push(None);
        };
        match self.op.keeps(&self.buffered, &bs) {
            Ok(true) => self.parent.push(Some(bs)),
            Ok(false) => true,
            // closed after a failure elsewhere
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
        self.buffered.close();
        self.parent.handle_error(err);
    }
}

impl Evaluator {
    pub(super) fn evaluate_union(
        self: &Arc<Self>,
        parent: PipeRef,
        union: &Arc<SetOperands>,
        bindings: BindingSet,
        ctx: &EvalContext,
    ) {
        let pipe: PipeRef = Arc::new(UnionPipe {
            parent,
            completion: Completion::new(2),
        });
        let ctx = ctx.descend();
        self.evaluate_expr(Arc::clone(&pipe), &union.left, bindings.clone(), &ctx);
        self.evaluate_expr(pipe, &union.right, bindings, &ctx);
    }

    pub(super) fn evaluate_intersection(
        self: &Arc<Self>,
        parent: PipeRef,
        operands: &Arc<SetOperands>,
        bindings: BindingSet,
        ctx: &EvalContext,
    ) {
        self.evaluate_buffered(SetOp::Intersection, parent, operands, bindings, ctx);
    }

    pub(super) fn evaluate_difference(
        self: &Arc<Self>,
        parent: PipeRef,
        operands: &Arc<SetOperands>,
        bindings: BindingSet,
        ctx: &EvalContext,
    ) {
        self.evaluate_buffered(SetOp::Difference, parent, operands, bindings, ctx);
    }

    fn evaluate_buffered(
        self: &Arc<Self>,
        op: SetOp,
        parent: PipeRef,
        operands: &Arc<SetOperands>,
        bindings: BindingSet,
        ctx: &EvalContext,
    ) {
        let ctx = ctx.descend();
        let pipe = Arc::new(BufferPipe {
            parent,
            op,
            buffered: Arc::new(BigHashSet::new(&self.spill)),
            evaluator: Arc::clone(self),
            operands: Arc::clone(operands),
            bindings: bindings.clone(),
            ctx: ctx.clone(),
        });
        self.evaluate_expr(pipe, &operands.right, bindings, &ctx);
    }
}
