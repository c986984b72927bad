//! # Evaluation Strategy
//!
//! Push-based evaluation of a [`TupleExpr`] tree.
//!
//! For every algebra node the dispatcher builds one pipe that wraps the
//! pipe of its parent node, then starts the node's children with that pipe
//! as their consumer. Leaves push their results from worker threads; each
//! pipe filters, transforms or buffers what it receives and pushes onward.
//! At the top sits the [`BindingSetPipeIterator`], a bounded queue that the
//! caller pulls from.
//!
//! ```text
//!                  caller
//!                    ▲ next()
//!          BindingSetPipeIterator (bounded queue, timeout)
//!                    ▲ push
//!            Projection pipe
//!                    ▲ push
//!              Join right pipe ◄── right branch, once per left result
//!                    ▲
//!              Join left pipe
//!                    ▲ push
//!       StatementPattern leaf (worker thread)
//! ```
//!
//! ## Module Structure
//!
//! - `pipe`: the [`BindingSetPipe`] contract and the ancestry context
//! - `leaves`: leaf evaluation and the worker-pool drain loop
//! - `join`: Join and LeftJoin
//! - `set_ops`: Union, Intersection, Difference
//! - `order`: Order through the spillable sorter
//! - `modifiers`: Projection, MultiProjection, Filter, Extension, Slice,
//!   Distinct, Reduced
//! - `bridge`: the pull iterator at the root

mod bridge;
mod join;
mod leaves;
mod modifiers;
mod order;
mod pipe;
mod set_ops;

pub use bridge::BindingSetPipeIterator;
pub use pipe::{BindingSetPipe, PipeRef};

use crate::algebra::TupleExpr;
use crate::binding::BindingSet;
use crate::collaborators::{
    DescribeEvaluator, GroupEvaluator, PathEvaluator, ServiceEvaluator, SubQueryEvaluator,
    TripleSource, ValueEvaluator,
};
use crate::collections::SpillOptions;
use crate::config::{Config, EvaluationConfig};
use crate::execution::{QueryError, QueryResult, QueryTimeout, WorkerPool};
use crate::expr_eval::SimpleValueEvaluator;
use crate::iteration::BoxedIteration;
use bridge::BridgeSettings;
use pipe::{EvalContext, Modifier};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Shared state of one evaluation strategy; pipes hold it to evaluate
/// child expressions from whichever thread pushes to them.
pub(crate) struct Evaluator {
    triple_source: Arc<dyn TripleSource>,
    values: Arc<dyn ValueEvaluator>,
    group: Option<Arc<dyn GroupEvaluator>>,
    path: Option<Arc<dyn PathEvaluator>>,
    describe: Option<Arc<dyn DescribeEvaluator>>,
    service: Option<Arc<dyn ServiceEvaluator>>,
    pool: Arc<WorkerPool>,
    spill: SpillOptions,
    bridge: BridgeSettings,
    timeout: Option<Duration>,
    start_time: Instant,
}

impl Evaluator {
    /// Start evaluating `expr` into `parent`; returns once the work is
    /// scheduled, results arrive later through `parent.push`.
    pub(crate) fn evaluate_expr(
        self: &Arc<Self>,
        parent: PipeRef,
        expr: &TupleExpr,
        bindings: BindingSet,
        ctx: &EvalContext,
    ) {
        match expr {
            TupleExpr::StatementPattern(sp) => self.evaluate_statement_pattern(parent, sp, bindings),
            TupleExpr::ExternalSet(ext) => self.evaluate_external_set(parent, ext, bindings),
            TupleExpr::ZeroLengthPath(p) => self.evaluate_zero_length_path(parent, p, bindings),
            TupleExpr::ArbitraryLengthPath(p) => {
                self.evaluate_arbitrary_length_path(parent, p, bindings);
            }
            TupleExpr::BindingSetAssignment(bsa) => {
                self.evaluate_binding_set_assignment(parent, bsa, bindings);
            }
            TupleExpr::SingletonSet => {
                if parent.push(Some(bindings)) {
                    parent.push(None);
                }
            }
            TupleExpr::EmptySet => {
                parent.push(None);
            }
            TupleExpr::QueryRoot(root) => {
                self.values.reset_query_time();
                self.evaluate_expr(parent, &root.arg, bindings, &ctx.descend());
            }
            TupleExpr::Projection(p) => self.evaluate_projection(parent, p, bindings, ctx),
            TupleExpr::MultiProjection(p) => {
                self.evaluate_multi_projection(parent, p, bindings, ctx);
            }
            TupleExpr::Filter(f) => self.evaluate_filter(parent, f, bindings, ctx),
            TupleExpr::Extension(e) => self.evaluate_extension(parent, e, bindings, ctx),
            TupleExpr::Slice(s) => self.evaluate_slice(parent, s, bindings, ctx),
            TupleExpr::Distinct(d) => {
                let ctx = ctx.enter(Modifier::Distinct);
                self.evaluate_distinct(parent, &d.arg, bindings, &ctx);
            }
            TupleExpr::Reduced(r) => {
                let ctx = ctx.enter(Modifier::Reduced);
                self.evaluate_reduced(parent, &r.arg, bindings, &ctx);
            }
            TupleExpr::Group(g) => self.evaluate_group(parent, g, bindings, ctx),
            TupleExpr::Order(o) => self.evaluate_order(parent, o, bindings, ctx),
            TupleExpr::Service(s) => self.evaluate_service(parent, s, bindings),
            TupleExpr::Describe(d) => self.evaluate_describe(parent, d, bindings, ctx),
            TupleExpr::Join(j) => self.evaluate_join(parent, j, bindings, ctx),
            TupleExpr::LeftJoin(j) => self.evaluate_left_join(parent, j, bindings, ctx),
            TupleExpr::Union(u) => self.evaluate_union(parent, u, bindings, ctx),
            TupleExpr::Intersection(i) => self.evaluate_intersection(parent, i, bindings, ctx),
            TupleExpr::Difference(d) => self.evaluate_difference(parent, d, bindings, ctx),
        }
    }

    /// Evaluate into a fresh pull bridge. `outer` links the bridge to an
    /// enclosing evaluation so that closing the outer one stops this one.
    pub(crate) fn bridge(
        self: &Arc<Self>,
        expr: &TupleExpr,
        bindings: BindingSet,
        ctx: &EvalContext,
        outer: Option<PipeRef>,
    ) -> BindingSetPipeIterator {
        let timeout = QueryTimeout::starting_at(self.start_time, self.timeout);
        let (iter, root) = BindingSetPipeIterator::new(self.bridge, timeout, outer);
        self.evaluate_expr(root, expr, bindings, ctx);
        iter
    }

    /// Report `err` unless the evaluation has already been abandoned
    fn fail(parent: &PipeRef, err: QueryError) {
        if !parent.is_closed() {
            parent.handle_error(err);
        }
    }
}

/// Sub-query entry used by value expressions evaluated inside a pipe
pub(crate) struct SubQueries<'a> {
    evaluator: &'a Arc<Evaluator>,
    outer: Option<&'a PipeRef>,
}

impl<'a> SubQueries<'a> {
    pub(crate) fn new(evaluator: &'a Arc<Evaluator>, outer: Option<&'a PipeRef>) -> Self {
        SubQueries { evaluator, outer }
    }
}

impl SubQueryEvaluator for SubQueries<'_> {
    fn evaluate_subquery(
        &self,
        expr: &TupleExpr,
        bindings: &BindingSet,
    ) -> QueryResult<BoxedIteration> {
        Ok(Box::new(self.evaluator.bridge(
            expr,
            bindings.clone(),
            &EvalContext::subquery(),
            self.outer.cloned(),
        )))
    }
}

/// Evaluates tuple expressions against a triple source.
///
/// The query wall-clock budget is counted from [`TupleExprEvaluationBuilder::build`],
/// so build one evaluation per query. Evaluations can share a worker pool
/// through [`TupleExprEvaluationBuilder::worker_pool`].
///
/// ```rust,ignore
/// let evaluation = TupleExprEvaluation::builder(Arc::new(store))
///     .query_timeout(Duration::from_secs(30))
///     .build()?;
/// for result in evaluation.evaluate(&expr, BindingSet::empty()) {
///     println!("{}", result?);
/// }
/// ```
pub struct TupleExprEvaluation {
    evaluator: Arc<Evaluator>,
}

impl TupleExprEvaluation {
    pub fn builder(triple_source: Arc<dyn TripleSource>) -> TupleExprEvaluationBuilder {
        TupleExprEvaluationBuilder::new(triple_source)
    }

    /// Evaluate `expr` starting from `bindings`; results are pulled from
    /// the returned iterator
    pub fn evaluate(&self, expr: &TupleExpr, bindings: BindingSet) -> BindingSetPipeIterator {
        debug!(root = expr.kind(), bound = bindings.len(), "evaluate");
        self.evaluator
            .bridge(expr, bindings, &EvalContext::root(), None)
    }

    /// Evaluate `expr` pushing results into a caller-supplied pipe
    pub fn evaluate_into(&self, expr: &TupleExpr, bindings: BindingSet, pipe: PipeRef) {
        self.evaluator
            .evaluate_expr(pipe, expr, bindings, &EvalContext::root());
    }

    /// Evaluate a tuple expression nested in a value expression (EXISTS,
    /// IN); filters inside it see every outer binding
    pub fn evaluate_subquery(&self, expr: &TupleExpr, bindings: BindingSet) -> BindingSetPipeIterator {
        self.evaluator
            .bridge(expr, bindings, &EvalContext::subquery(), None)
    }

    /// Time elapsed since this evaluation was built
    pub fn elapsed(&self) -> Duration {
        self.evaluator.start_time.elapsed()
    }

    pub fn worker_pool(&self) -> &Arc<WorkerPool> {
        &self.evaluator.pool
    }
}

impl SubQueryEvaluator for TupleExprEvaluation {
    fn evaluate_subquery(
        &self,
        expr: &TupleExpr,
        bindings: &BindingSet,
    ) -> QueryResult<BoxedIteration> {
        Ok(Box::new(TupleExprEvaluation::evaluate_subquery(
            self,
            expr,
            bindings.clone(),
        )))
    }
}

impl std::fmt::Debug for TupleExprEvaluation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TupleExprEvaluation")
            .field("pool", &self.evaluator.pool)
            .field("timeout", &self.evaluator.timeout)
            .field("queue_capacity", &self.evaluator.bridge.queue_capacity)
            .finish_non_exhaustive()
    }
}

/// Builder for [`TupleExprEvaluation`]
pub struct TupleExprEvaluationBuilder {
    triple_source: Arc<dyn TripleSource>,
    values: Option<Arc<dyn ValueEvaluator>>,
    group: Option<Arc<dyn GroupEvaluator>>,
    path: Option<Arc<dyn PathEvaluator>>,
    describe: Option<Arc<dyn DescribeEvaluator>>,
    service: Option<Arc<dyn ServiceEvaluator>>,
    pool: Option<Arc<WorkerPool>>,
    evaluation: EvaluationConfig,
    spill: SpillOptions,
    timeout: Option<Duration>,
}

impl TupleExprEvaluationBuilder {
    fn new(triple_source: Arc<dyn TripleSource>) -> Self {
        TupleExprEvaluationBuilder {
            triple_source,
            values: None,
            group: None,
            path: None,
            describe: None,
            service: None,
            pool: None,
            evaluation: EvaluationConfig::default(),
            spill: SpillOptions::default(),
            timeout: None,
        }
    }

    /// Take evaluation and spill settings from a loaded configuration
    pub fn config(mut self, config: &Config) -> Self {
        self.evaluation = config.evaluation.clone();
        self.spill = config.spill.options();
        self
    }

    pub fn value_evaluator(mut self, values: Arc<dyn ValueEvaluator>) -> Self {
        self.values = Some(values);
        self
    }

    pub fn group_evaluator(mut self, group: Arc<dyn GroupEvaluator>) -> Self {
        self.group = Some(group);
        self
    }

    pub fn path_evaluator(mut self, path: Arc<dyn PathEvaluator>) -> Self {
        self.path = Some(path);
        self
    }

    pub fn describe_evaluator(mut self, describe: Arc<dyn DescribeEvaluator>) -> Self {
        self.describe = Some(describe);
        self
    }

    pub fn service_evaluator(mut self, service: Arc<dyn ServiceEvaluator>) -> Self {
        self.service = Some(service);
        self
    }

    /// Run leaves on an existing pool instead of starting a new one
    pub fn worker_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Wall-clock budget of the query (zero = unlimited)
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.evaluation.queue_capacity = capacity;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.evaluation.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn spill_options(mut self, spill: SpillOptions) -> Self {
        self.spill = spill;
        self
    }

    /// Start the worker pool (unless one was given) and the query clock
    pub fn build(self) -> std::io::Result<TupleExprEvaluation> {
        let pool = match self.pool {
            Some(pool) => pool,
            None => Arc::new(WorkerPool::new(self.evaluation.worker_count())?),
        };
        let timeout = match self.timeout {
            Some(t) if t.is_zero() => None,
            Some(t) => Some(t),
            None => self.evaluation.query_timeout(),
        };
        debug!(
            workers = pool.size(),
            timeout_ms = timeout.map(|t| t.as_millis() as u64),
            queue_capacity = self.evaluation.queue_capacity,
            "evaluation_built"
        );
        let evaluator = Evaluator {
            triple_source: self.triple_source,
            values: self
                .values
                .unwrap_or_else(|| Arc::new(SimpleValueEvaluator::new())),
            group: self.group,
            path: self.path,
            describe: self.describe,
            service: self.service,
            pool,
            spill: self.spill,
            bridge: BridgeSettings {
                queue_capacity: self.evaluation.queue_capacity,
                poll_interval: Duration::from_millis(self.evaluation.poll_interval_ms),
            },
            timeout,
            start_time: Instant::now(),
        };
        Ok(TupleExprEvaluation {
            evaluator: Arc::new(evaluator),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Helpers for operator tests: VALUES leaves and a pipe that records
    //! everything pushed into it.

    use super::*;
    use crate::store::MemoryTripleSource;
    use crate::value::Value;
    use parking_lot::{Condvar, Mutex};

    pub(crate) fn ints(pairs: &[(&str, i64)]) -> BindingSet {
        pairs.iter().map(|(n, v)| (*n, Value::Integer(*v))).collect()
    }

    pub(crate) fn values(names: &[&str], rows: &[&[(&str, i64)]]) -> TupleExpr {
        TupleExpr::values(names.iter().copied(), rows.iter().map(|r| ints(r)).collect())
    }

    #[derive(Debug, Clone, Default)]
    pub(crate) struct Collected {
        pub rows: Vec<BindingSet>,
        pub ends: usize,
        pub errors: Vec<String>,
    }

    #[derive(Default)]
    pub(crate) struct Collector {
        state: Mutex<Collected>,
        changed: Condvar,
    }

    impl Collector {
        /// Wait for an end of stream or an error, then a little longer so
        /// that a duplicate end would be counted
        pub(crate) fn wait(&self) -> Collected {
            {
                let mut state = self.state.lock();
                while state.ends == 0 && state.errors.is_empty() {
                    if self
                        .changed
                        .wait_for(&mut state, Duration::from_secs(5))
                        .timed_out()
                    {
                        break;
                    }
                }
            }
            std::thread::sleep(Duration::from_millis(30));
            self.state.lock().clone()
        }
    }

    impl BindingSetPipe for Collector {
        fn push(&self, bs: Option<BindingSet>) -> bool {
            let mut state = self.state.lock();
            let more = match bs {
                Some(bs) => {
                    state.rows.push(bs);
                    true
                }
                None => {
                    state.ends += 1;
                    false
                }
            };
            self.changed.notify_all();
            more
        }

        fn parent(&self) -> Option<&PipeRef> {
            None
        }

        fn handle_error(&self, err: QueryError) {
            self.state.lock().errors.push(err.to_string());
            self.changed.notify_all();
        }

        fn is_closed(&self) -> bool {
            false
        }
    }

    pub(crate) fn evaluation() -> TupleExprEvaluation {
        TupleExprEvaluation::builder(Arc::new(MemoryTripleSource::new()))
            .spill_options(SpillOptions {
                memory_threshold: 4,
                temp_dir: None,
            })
            .build()
            .unwrap()
    }

    /// Evaluate `expr` into a collector and return what it saw
    pub(crate) fn run(expr: &TupleExpr, bindings: BindingSet) -> Collected {
        run_with(&evaluation(), expr, bindings)
    }

    pub(crate) fn run_with(
        evaluation: &TupleExprEvaluation,
        expr: &TupleExpr,
        bindings: BindingSet,
    ) -> Collected {
        let collector = Arc::new(Collector::default());
        evaluation.evaluate_into(expr, bindings, Arc::clone(&collector) as PipeRef);
        collector.wait()
    }
}
