//! Closeable pull sequences of binding sets.
//!
//! Leaves and delegated operators hand their results to the evaluator as a
//! [`BindingSetIteration`]; the worker that drains one always calls
//! [`BindingSetIteration::close`] when it stops, whether the sequence was
//! exhausted, abandoned or failed.

use crate::binding::BindingSet;
use crate::execution::QueryResult;

/// Lazy, error-propagating sequence of binding sets that owns resources
pub trait BindingSetIteration: Iterator<Item = QueryResult<BindingSet>> + Send {
    /// Release resources early; further `next` calls return `None`
    fn close(&mut self) {}
}

/// Owned, type-erased iteration
pub type BoxedIteration = Box<dyn BindingSetIteration>;

impl BindingSetIteration for BoxedIteration {
    fn close(&mut self) {
        (**self).close();
    }
}

/// Iteration over results that are already materialised
pub struct VecIteration {
    items: std::vec::IntoIter<QueryResult<BindingSet>>,
}

impl VecIteration {
    pub fn new(sets: Vec<BindingSet>) -> Self {
        VecIteration::from_results(sets.into_iter().map(Ok).collect())
    }

    pub fn from_results(results: Vec<QueryResult<BindingSet>>) -> Self {
        VecIteration {
            items: results.into_iter(),
        }
    }

    pub fn empty() -> Self {
        VecIteration::new(Vec::new())
    }

    pub fn boxed(self) -> BoxedIteration {
        Box::new(self)
    }
}

impl Iterator for VecIteration {
    type Item = QueryResult<BindingSet>;

    fn next(&mut self) -> Option<Self::Item> {
        self.items.next()
    }
}

impl BindingSetIteration for VecIteration {
    fn close(&mut self) {
        self.items = Vec::new().into_iter();
    }
}
