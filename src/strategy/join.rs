//! Join and LeftJoin.
//!
//! Both are nested loops without materialisation: every left result starts
//! an evaluation of the right argument seeded with that result. A shared
//! [`Completion`] counts the open streams (the left one plus one per right
//! branch) and the end of stream is forwarded when the count drops to zero.
//!
//! ```text
//!   left arg ──► LeftPipe ──(per result)──► evaluate(right arg) ──► RightPipe ──► parent
//!                   │                                                   ▲
//!                   └──────────────────── end ──────────────────────────┘
//! ```

use super::pipe::{BindingSetPipe, EvalContext, PipeRef};
use super::{Evaluator, SubQueries};
use crate::algebra::{Join, LeftJoin};
use crate::binding::BindingSet;
use crate::execution::ExprError;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Open-stream counter of a fan-out site.
///
/// `stopped` is set once the parent refused a result; the parent has then
/// ended its own stream and must not receive another end.
#[derive(Debug)]
pub(super) struct Completion {
    open: AtomicU64,
    stopped: AtomicBool,
}

impl Completion {
    pub(super) fn new(open: u64) -> Arc<Self> {
        Arc::new(Completion {
            open: AtomicU64::new(open),
            stopped: AtomicBool::new(false),
        })
    }

    pub(super) fn begin(&self) {
        self.open.fetch_add(1, Ordering::AcqRel);
    }

    /// Close one stream; true when this end of stream should be forwarded
    pub(super) fn finish(&self) -> bool {
        self.open.fetch_sub(1, Ordering::AcqRel) == 1 && !self.is_stopped()
    }

    pub(super) fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub(super) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Push a result to `parent`, remembering a refusal
    pub(super) fn forward(&self, parent: &PipeRef, bs: BindingSet) -> bool {
        if self.is_stopped() {
            return false;
        }
        let more = parent.push(Some(bs));
        if !more {
            self.stop();
        }
        more
    }
}

struct JoinRightPipe {
    parent: PipeRef,
    completion: Arc<Completion>,
}

impl BindingSetPipe for JoinRightPipe {
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

struct JoinLeftPipe {
    right: PipeRef,
    evaluator: Arc<Evaluator>,
    join: Arc<Join>,
    completion: Arc<Completion>,
    ctx: EvalContext,
}

impl BindingSetPipe for JoinLeftPipe {
    fn push(&self, bs: Option<BindingSet>) -> bool {
        let Some(bs) = bs else {
            return self.right.push(None);
        };
        if self.completion.is_stopped() || self.is_closed() {
            return false;
        }
        self.completion.begin();
        trace!(left = %bs, "join_fan_out");
        self.evaluator
            .evaluate_expr(Arc::clone(&self.right), &self.join.right, bs, &self.ctx);
        true
    }

    fn parent(&self) -> Option<&PipeRef> {
        Some(&self.right)
    }
}

/// Keeps results compatible with the incoming bindings and restores the
/// variables stripped from the left seed
struct CorrectionPipe {
    parent: PipeRef,
    bindings: BindingSet,
    problem_vars: Vec<String>,
}

impl BindingSetPipe for CorrectionPipe {
    fn push(&self, bs: Option<BindingSet>) -> bool {
        let Some(mut bs) = bs else {
            return self.parent.push(None);
        };
        if !self.bindings.is_compatible(&bs) {
            return true;
        }
        for name in &self.problem_vars {
            if bs.has_binding(name) {
                continue;
            }
            if let Some(value) = self.bindings.get(name) {
                bs = bs.with(name.clone(), value.clone());
            }
        }
        self.parent.push(Some(bs))
    }

    fn parent(&self) -> Option<&PipeRef> {
        Some(&self.parent)
    }
}

struct LeftJoinLeftPipe {
    top: PipeRef,
    evaluator: Arc<Evaluator>,
    join: Arc<LeftJoin>,
    scope: Arc<HashSet<String>>,
    completion: Arc<Completion>,
    ctx: EvalContext,
}

impl BindingSetPipe for LeftJoinLeftPipe {
    fn push(&self, bs: Option<BindingSet>) -> bool {
        let Some(left) = bs else {
            if self.completion.finish() {
                self.top.push(None);
            }
            return false;
        };
        if self.completion.is_stopped() || self.is_closed() {
            return false;
        }
        self.completion.begin();
        trace!(left = %left, "left_join_fan_out");
        let optional = Arc::new(OptionalPipe {
            top: Arc::clone(&self.top),
            evaluator: Arc::clone(&self.evaluator),
            join: Arc::clone(&self.join),
            scope: Arc::clone(&self.scope),
            completion: Arc::clone(&self.completion),
            left: left.clone(),
            failed: AtomicBool::new(true),
        });
        self.evaluator
            .evaluate_expr(optional, &self.join.right, left, &self.ctx);
        true
    }

    fn parent(&self) -> Option<&PipeRef> {
        Some(&self.top)
    }
}

/// Right side of one left result; emits the left result alone when no
/// right result survives the condition
struct OptionalPipe {
    top: PipeRef,
    evaluator: Arc<Evaluator>,
    join: Arc<LeftJoin>,
    scope: Arc<HashSet<String>>,
    completion: Arc<Completion>,
    left: BindingSet,
    failed: AtomicBool,
}

impl BindingSetPipe for OptionalPipe {
    fn push(&self, bs: Option<BindingSet>) -> bool {
        let Some(right) = bs else {
            if self.failed.load(Ordering::Acquire) {
                self.completion.forward(&self.top, self.left.clone());
            }
            if self.completion.finish() {
                self.top.push(None);
            }
            return false;
        };
        if self.completion.is_stopped() {
            return false;
        }
        let Some(condition) = &self.join.condition else {
            self.failed.store(false, Ordering::Release);
            return self.completion.forward(&self.top, right);
        };
        let scoped = right.retain(&self.scope);
        let subqueries = SubQueries::new(&self.evaluator, Some(&self.top));
        match self.evaluator.values.is_true(condition, &scoped, &subqueries) {
            Ok(true) => {
                self.failed.store(false, Ordering::Release);
                self.completion.forward(&self.top, right)
            }
            Ok(false) | Err(ExprError::Type(_)) => true,
            Err(ExprError::Query(err)) => {
                self.handle_error(err);
                false
            }
        }
    }

    fn parent(&self) -> Option<&PipeRef> {
        Some(&self.top)
    }
}

impl Evaluator {
    pub(super) fn evaluate_join(
        self: &Arc<Self>,
        parent: PipeRef,
        join: &Arc<Join>,
        bindings: BindingSet,
        ctx: &EvalContext,
    ) {
        let completion = Completion::new(1);
        let right: PipeRef = Arc::new(JoinRightPipe {
            parent,
            completion: Arc::clone(&completion),
        });
        let ctx = ctx.descend();
        let left = Arc::new(JoinLeftPipe {
            right,
            evaluator: Arc::clone(self),
            join: Arc::clone(join),
            completion,
            ctx: ctx.clone(),
        });
        self.evaluate_expr(left, &join.left, bindings, &ctx);
    }

    pub(super) fn evaluate_left_join(
        self: &Arc<Self>,
        parent: PipeRef,
        join: &Arc<LeftJoin>,
        bindings: BindingSet,
        ctx: &EvalContext,
    ) {
        let mut optional_vars = join.right.var_names();
        if let Some(condition) = &join.condition {
            optional_vars.extend(condition.var_names());
        }
        let left_names = join.left.binding_names();
        let problem_vars: Vec<String> = optional_vars
            .into_iter()
            .filter(|name| !left_names.contains(name) && bindings.has_binding(name))
            .collect();

        let (top, seed): (PipeRef, BindingSet) = if problem_vars.is_empty() {
            (parent, bindings)
        } else {
            debug!(problem_vars = ?problem_vars, "badly_designed_left_join");
            let stripped: HashSet<&str> = problem_vars.iter().map(String::as_str).collect();
            let seed = bindings.without(&stripped);
            let correction = CorrectionPipe {
                parent,
                bindings,
                problem_vars,
            };
            (Arc::new(correction), seed)
        };

        let scope = condition_scope(join);
        let ctx = ctx.descend();
        let left = Arc::new(LeftJoinLeftPipe {
            top,
            evaluator: Arc::clone(self),
            join: Arc::clone(join),
            scope: Arc::new(scope),
            completion: Completion::new(1),
            ctx: ctx.clone(),
        });
        self.evaluate_expr(left, &join.left, seed, &ctx);
    }
}

/// Binding names visible to a left join condition
fn condition_scope(join: &LeftJoin) -> HashSet<String> {
    let mut names: HashSet<String> = join.left.binding_names().into_iter().collect();
    names.extend(join.right.binding_names());
    names
}
