//! Leaf evaluation.
//!
//! Leaves that produce a pull iteration are drained on the worker pool:
//! the job opens the iteration, pushes each element until the pipe refuses
//! or closes, pushes the end of stream after the last element and always
//! closes the iteration. Collaborator calls happen inside the job, so a slow
//! store lookup never blocks the thread that dispatched the leaf.

use super::pipe::{EvalContext, PipeRef};
use super::{Evaluator, SubQueries};
use crate::algebra::{
    ArbitraryLengthPath, BindingSetAssignment, Describe, Group, PatternScope, Service,
    StatementPattern, Var, ZeroLengthPath,
};
use crate::binding::BindingSet;
use crate::collaborators::{ExternalSet, Statement, StatementIter};
use crate::execution::{QueryError, QueryResult};
use crate::iteration::{BindingSetIteration, BoxedIteration, VecIteration};
use crate::value::Value;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, trace};

impl Evaluator {
    /// Schedule `produce` on the worker pool and drain its iteration into
    /// `parent`
    pub(super) fn enqueue<F>(self: &Arc<Self>, parent: PipeRef, kind: &'static str, produce: F)
    where
        F: FnOnce() -> QueryResult<BoxedIteration> + Send + 'static,
    {
        let job_parent = Arc::clone(&parent);
        let scheduled = self.pool.execute(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                if job_parent.is_closed() {
                    return;
                }
                match produce() {
                    Ok(iter) => drain(&job_parent, iter),
                    Err(err) => Evaluator::fail(&job_parent, err),
                }
            }));
            if let Err(payload) = outcome {
                let message = panic_message(payload.as_ref());
                error!(kind, message = %message, "leaf_panicked");
                Evaluator::fail(
                    &job_parent,
                    QueryError::Evaluation(format!("{kind} evaluation panicked: {message}")),
                );
            }
        });
        if !scheduled {
            Evaluator::fail(
                &parent,
                QueryError::Interrupted(format!("{kind} could not be scheduled")),
            );
        }
    }

    pub(super) fn evaluate_statement_pattern(
        self: &Arc<Self>,
        parent: PipeRef,
        sp: &Arc<StatementPattern>,
        bindings: BindingSet,
    ) {
        let source = Arc::clone(&self.triple_source);
        let sp = Arc::clone(sp);
        self.enqueue(parent, "StatementPattern", move || {
            let subject = sp.subject.resolve(&bindings);
            let predicate = sp.predicate.resolve(&bindings);
            let object = sp.object.resolve(&bindings);
            let context = sp.context.as_ref().and_then(|c| c.resolve(&bindings));
            trace!(
                subject = subject.is_some(),
                predicate = predicate.is_some(),
                object = object.is_some(),
                context = context.is_some(),
                "statement_lookup"
            );
            let statements = source.statements(
                subject.as_ref(),
                predicate.as_ref(),
                object.as_ref(),
                context.as_ref(),
            )?;
            let iter: BoxedIteration = Box::new(PatternIteration {
                statements: Some(statements),
                pattern: sp,
                bindings,
            });
            Ok(iter)
        });
    }

    pub(super) fn evaluate_external_set(
        self: &Arc<Self>,
        parent: PipeRef,
        ext: &Arc<dyn ExternalSet>,
        bindings: BindingSet,
    ) {
        let ext = Arc::clone(ext);
        self.enqueue(parent, "ExternalSet", move || ext.evaluate(&bindings));
    }

    pub(super) fn evaluate_binding_set_assignment(
        self: &Arc<Self>,
        parent: PipeRef,
        bsa: &Arc<BindingSetAssignment>,
        bindings: BindingSet,
    ) {
        let bsa = Arc::clone(bsa);
        self.enqueue(parent, "BindingSetAssignment", move || {
            let rows = if bindings.is_empty() {
                bsa.binding_sets.clone()
            } else {
                bsa.binding_sets
                    .iter()
                    .filter_map(|row| assign(row, &bindings))
                    .collect()
            };
            Ok(VecIteration::new(rows).boxed())
        });
    }

    pub(super) fn evaluate_zero_length_path(
        self: &Arc<Self>,
        parent: PipeRef,
        zlp: &Arc<ZeroLengthPath>,
        bindings: BindingSet,
    ) {
        let subject = zlp.subject.resolve(&bindings);
        let object = zlp.object.resolve(&bindings);
        if let (Some(s), Some(o)) = (&subject, &object) {
            if s != o {
                parent.push(None);
                return;
            }
            let row = bind_free(&bindings, [(&zlp.subject, s), (&zlp.object, o)]);
            if parent.push(Some(row)) {
                parent.push(None);
            }
            return;
        }
        let Some(paths) = self.path.clone() else {
            Evaluator::fail(&parent, unsupported("ZeroLengthPath", "path evaluator"));
            return;
        };
        let zlp = Arc::clone(zlp);
        self.enqueue(parent, "ZeroLengthPath", move || {
            paths.zero_length(&zlp, subject, object, &bindings)
        });
    }

    pub(super) fn evaluate_arbitrary_length_path(
        self: &Arc<Self>,
        parent: PipeRef,
        alp: &Arc<ArbitraryLengthPath>,
        bindings: BindingSet,
    ) {
        let Some(paths) = self.path.clone() else {
            Evaluator::fail(&parent, unsupported("ArbitraryLengthPath", "path evaluator"));
            return;
        };
        let evaluator = Arc::clone(self);
        let outer = Arc::clone(&parent);
        let alp = Arc::clone(alp);
        self.enqueue(parent, "ArbitraryLengthPath", move || {
            let subqueries = SubQueries::new(&evaluator, Some(&outer));
            paths.arbitrary_length(&alp, &bindings, &subqueries)
        });
    }

    pub(super) fn evaluate_group(
        self: &Arc<Self>,
        parent: PipeRef,
        group: &Arc<Group>,
        bindings: BindingSet,
        ctx: &EvalContext,
    ) {
        let Some(groups) = self.group.clone() else {
            Evaluator::fail(&parent, unsupported("Group", "group evaluator"));
            return;
        };
        let evaluator = Arc::clone(self);
        let outer = Arc::clone(&parent);
        let group = Arc::clone(group);
        let ctx = ctx.descend();
        self.enqueue(parent, "Group", move || {
            let input = evaluator.bridge(&group.arg, bindings.clone(), &ctx, Some(Arc::clone(&outer)));
            let subqueries = SubQueries::new(&evaluator, Some(&outer));
            groups.evaluate(
                &group,
                Box::new(input),
                &bindings,
                evaluator.values.as_ref(),
                &subqueries,
            )
        });
    }

    pub(super) fn evaluate_describe(
        self: &Arc<Self>,
        parent: PipeRef,
        describe: &Arc<Describe>,
        bindings: BindingSet,
        ctx: &EvalContext,
    ) {
        let Some(describer) = self.describe.clone() else {
            Evaluator::fail(&parent, unsupported("Describe", "describe evaluator"));
            return;
        };
        let evaluator = Arc::clone(self);
        let outer = Arc::clone(&parent);
        let describe = Arc::clone(describe);
        let ctx = ctx.descend();
        self.enqueue(parent, "Describe", move || {
            let input = evaluator.bridge(&describe.arg, bindings.clone(), &ctx, Some(outer));
            describer.describe(&describe, Box::new(input), &bindings)
        });
    }

    pub(super) fn evaluate_service(
        self: &Arc<Self>,
        parent: PipeRef,
        service: &Arc<Service>,
        bindings: BindingSet,
    ) {
        let Some(services) = self.service.clone() else {
            Evaluator::fail(&parent, unsupported("Service", "service evaluator"));
            return;
        };
        let Some(endpoint) = service.service_ref.resolve(&bindings) else {
            if service.silent {
                if parent.push(Some(bindings)) {
                    parent.push(None);
                }
            } else {
                Evaluator::fail(
                    &parent,
                    QueryError::Evaluation(format!(
                        "SERVICE variable ?{} is not bound",
                        service.service_ref.name
                    )),
                );
            }
            return;
        };
        let service = Arc::clone(service);
        self.enqueue(parent, "Service", move || {
            match services.evaluate(&service, &endpoint, &bindings) {
                Err(err) if service.silent => {
                    trace!(endpoint = %endpoint, error = %err, "silent_service_failed");
                    Ok(VecIteration::new(vec![bindings]).boxed())
                }
                other => other,
            }
        });
    }
}

/// Push every element of `iter` into `parent`, then the end of stream
fn drain(parent: &PipeRef, mut iter: BoxedIteration) {
    loop {
        if parent.is_closed() {
            break;
        }
        match iter.next() {
            Some(Ok(bs)) => {
                if !parent.push(Some(bs)) {
                    break;
                }
            }
            Some(Err(err)) => {
                Evaluator::fail(parent, err);
                break;
            }
            None => {
                parent.push(None);
                break;
            }
        }
    }
    iter.close();
}

fn unsupported(kind: &str, collaborator: &str) -> QueryError {
    QueryError::Unsupported(format!("{kind} requires a {collaborator}"))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Merge one VALUES row into the incoming bindings. Absent names are UNDEF;
/// a conflicting value drops the row, and so does a row with no value at all.
fn assign(row: &BindingSet, bindings: &BindingSet) -> Option<BindingSet> {
    let mut result: Option<BindingSet> = None;
    for (name, value) in row.iter() {
        let current = result.get_or_insert_with(|| bindings.clone());
        match bindings.get(name) {
            Some(bound) if bound != value => return None,
            Some(_) => {}
            None => *current = current.with(name, value.clone()),
        }
    }
    result
}

/// Bind the non-constant vars among `pairs` that `bindings` leaves free
fn bind_free<'a>(
    bindings: &BindingSet,
    pairs: impl IntoIterator<Item = (&'a Var, &'a Value)>,
) -> BindingSet {
    pairs
        .into_iter()
        .filter(|(var, _)| !var.is_constant() && !bindings.has_binding(&var.name))
        .fold(bindings.clone(), |bs, (var, value)| {
            bs.with(var.name.clone(), value.clone())
        })
}

/// Turns matching statements into binding sets for one pattern
struct PatternIteration {
    statements: Option<StatementIter>,
    pattern: Arc<StatementPattern>,
    bindings: BindingSet,
}

impl PatternIteration {
    fn bind(&self, st: &Statement) -> Option<BindingSet> {
        let p = &self.pattern;
        if p.scope == PatternScope::NamedContexts && st.context.is_none() {
            return None;
        }
        let terms = [
            (&p.subject, Some(&st.subject)),
            (&p.predicate, Some(&st.predicate)),
            (&p.object, Some(&st.object)),
        ];
        let mut bs = self.bindings.clone();
        let context = p.context.as_ref().map(|c| (c, st.context.as_ref()));
        for (var, value) in terms.into_iter().chain(context) {
            // the default graph leaves the context var unbound
            let Some(value) = value else {
                continue;
            };
            if let Some(constant) = &var.value {
                if constant != value {
                    return None;
                }
                continue;
            }
            match bs.get(&var.name) {
                Some(existing) if existing != value => return None,
                Some(_) => {}
                None => bs = bs.with(var.name.clone(), value.clone()),
            }
        }
        Some(bs)
    }
}

impl Iterator for PatternIteration {
    type Item = QueryResult<BindingSet>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let statement = match self.statements.as_mut()?.next()? {
                Ok(statement) => statement,
                Err(err) => return Some(Err(err)),
            };
            if let Some(bs) = self.bind(&statement) {
                return Some(Ok(bs));
            }
        }
    }
}

impl BindingSetIteration for PatternIteration {
    fn close(&mut self) {
        self.statements = None;
    }
}
