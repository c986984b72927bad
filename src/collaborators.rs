//! Collaborator Interfaces
//!
//! Services the evaluator consumes but does not implement itself:
//!
//! | Trait | Called for |
//! |-------|-----------|
//! | [`TripleSource`] | StatementPattern leaves |
//! | [`ValueEvaluator`] | Filter, LeftJoin conditions, Extension, Order keys |
//! | [`GroupEvaluator`] | Group |
//! | [`PathEvaluator`] | ZeroLengthPath, ArbitraryLengthPath |
//! | [`DescribeEvaluator`] | Describe |
//! | [`ServiceEvaluator`] | Service |
//! | [`ExternalSet`] | pre-evaluated subtrees embedded in the algebra |
//!
//! Only the triple source and the value evaluator are mandatory; the
//! builder installs [`crate::expr_eval::SimpleValueEvaluator`] when no
//! value evaluator is given. A tree that reaches a missing optional
//! collaborator fails with `QueryError::Unsupported`.

use crate::algebra::{ArbitraryLengthPath, Describe, Group, Service, TupleExpr, ValueExpr, ZeroLengthPath};
use crate::binding::BindingSet;
use crate::execution::{ExprError, QueryResult};
use crate::iteration::BoxedIteration;
use crate::value::Value;
use std::collections::BTreeSet;
use std::fmt;

/// One quad as returned by a triple source
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Statement {
    pub subject: Value,
    pub predicate: Value,
    pub object: Value,
    /// Named graph, `None` for the default graph
    pub context: Option<Value>,
}

impl Statement {
    pub fn new(subject: Value, predicate: Value, object: Value) -> Self {
        Statement {
            subject,
            predicate,
            object,
            context: None,
        }
    }

    pub fn in_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// Owned stream of matching statements
pub type StatementIter = Box<dyn Iterator<Item = QueryResult<Statement>> + Send>;

/// Statement lookup against the store; `None` arguments are wildcards
pub trait TripleSource: Send + Sync {
    fn statements(
        &self,
        subject: Option<&Value>,
        predicate: Option<&Value>,
        object: Option<&Value>,
        context: Option<&Value>,
    ) -> QueryResult<StatementIter>;
}

/// Evaluates tuple expressions nested inside value expressions (EXISTS)
pub trait SubQueryEvaluator: Send + Sync {
    fn evaluate_subquery(&self, expr: &TupleExpr, bindings: &BindingSet)
        -> QueryResult<BoxedIteration>;
}

/// Scalar expression evaluation
pub trait ValueEvaluator: Send + Sync {
    /// `ExprError::Type` marks a recoverable evaluation error
    fn evaluate(
        &self,
        expr: &ValueExpr,
        bindings: &BindingSet,
        subqueries: &dyn SubQueryEvaluator,
    ) -> Result<Value, ExprError>;

    /// Effective boolean value of `expr`
    fn is_true(
        &self,
        expr: &ValueExpr,
        bindings: &BindingSet,
        subqueries: &dyn SubQueryEvaluator,
    ) -> Result<bool, ExprError> {
        let value = self.evaluate(expr, bindings, subqueries)?;
        crate::expr_eval::effective_boolean_value(&value)
    }

    /// Start of a new query; time-dependent functions pick a fresh instant
    fn reset_query_time(&self) {}
}

/// Batch aggregation over the full result of a Group's argument
pub trait GroupEvaluator: Send + Sync {
    fn evaluate(
        &self,
        group: &Group,
        input: BoxedIteration,
        bindings: &BindingSet,
        values: &dyn ValueEvaluator,
        subqueries: &dyn SubQueryEvaluator,
    ) -> QueryResult<BoxedIteration>;
}

/// Property path closure
pub trait PathEvaluator: Send + Sync {
    /// `subject` / `object` are the already-known end points, if any
    fn zero_length(
        &self,
        path: &ZeroLengthPath,
        subject: Option<Value>,
        object: Option<Value>,
        bindings: &BindingSet,
    ) -> QueryResult<BoxedIteration>;

    fn arbitrary_length(
        &self,
        path: &ArbitraryLengthPath,
        bindings: &BindingSet,
        subqueries: &dyn SubQueryEvaluator,
    ) -> QueryResult<BoxedIteration>;
}

/// DESCRIBE expansion of the argument's resources
pub trait DescribeEvaluator: Send + Sync {
    fn describe(
        &self,
        describe: &Describe,
        input: BoxedIteration,
        bindings: &BindingSet,
    ) -> QueryResult<BoxedIteration>;
}

/// Federated execution of a SERVICE clause against `endpoint`
pub trait ServiceEvaluator: Send + Sync {
    fn evaluate(
        &self,
        service: &Service,
        endpoint: &Value,
        bindings: &BindingSet,
    ) -> QueryResult<BoxedIteration>;
}

/// Subtree evaluated outside the pipe tree
pub trait ExternalSet: Send + Sync + fmt::Debug {
    fn evaluate(&self, bindings: &BindingSet) -> QueryResult<BoxedIteration>;

    fn binding_names(&self) -> BTreeSet<String>;
}
