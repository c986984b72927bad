//! # Tuplex: Push-Based Tuple Expression Evaluation
//!
//! Evaluates SPARQL-style query algebra trees (joins, optional joins, set
//! operations, projections, aggregation, ordering, slicing, property paths)
//! over a triple source and streams the resulting binding sets.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! TupleExpr + initial BindingSet
//!     ↓
//! [Dispatcher]              → one pipe per algebra node, wrapping its parent's pipe
//!     ↓
//! [Leaves on WorkerPool]    → statement lookups, VALUES, paths, group, service
//!     ↓ push
//! [Operator pipes]          → join fan-out, filters, spillable set / sort buffers
//!     ↓ push
//! [Pull bridge]             → bounded queue, first-error reporting, query timeout
//!     ↓ next()
//! Caller
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tuplex::{BindingSet, MemoryTripleSource, TupleExpr, TupleExprEvaluation, Value};
//!
//! let store = MemoryTripleSource::new();
//! store.insert(Value::iri("urn:a"), Value::iri("urn:knows"), Value::iri("urn:b"));
//!
//! let evaluation = TupleExprEvaluation::builder(Arc::new(store)).build()?;
//! let expr = TupleExpr::pattern("?s", "urn:knows", "?o");
//! for row in evaluation.evaluate(&expr, BindingSet::empty()) {
//!     println!("{}", row?);
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `value` | RDF term values and their ORDER BY ordering |
//! | `binding` | Immutable binding sets, compatibility and merge |
//! | `algebra` | Tuple and value expression trees |
//! | `iteration` | Closeable pull iterations |
//! | `collaborators` | Triple source, value/group/path/describe/service evaluators |
//! | `expr_eval` | Built-in value and group evaluators |
//! | `store` | In-memory triple source |
//! | `collections` | Disk-spillable hash set and sorter |
//! | `execution` | Errors, timeouts, worker pool |
//! | `strategy` | Pipes, operators, dispatcher, pull bridge |
//! | `config` | Layered configuration |
//! | `logging` | Tracing subscriber setup |

pub mod algebra;
pub mod binding;
pub mod collaborators;
pub mod collections;
pub mod config;
pub mod execution;
pub mod expr_eval;
pub mod iteration;
pub mod logging;
pub mod store;
pub mod strategy;
pub mod value;

pub use algebra::{TupleExpr, ValueExpr};
pub use binding::BindingSet;
pub use collaborators::{Statement, SubQueryEvaluator, TripleSource, ValueEvaluator};
pub use config::Config;
pub use execution::{ExprError, QueryError, QueryResult, WorkerPool};
pub use expr_eval::{SimpleGroupEvaluator, SimpleValueEvaluator};
pub use iteration::{BindingSetIteration, BoxedIteration, VecIteration};
pub use store::MemoryTripleSource;
pub use strategy::{
    BindingSetPipe, BindingSetPipeIterator, PipeRef, TupleExprEvaluation,
    TupleExprEvaluationBuilder,
};
pub use value::Value;
