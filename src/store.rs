//! In-memory triple source.
//!
//! Quads are kept in insertion order; adding a quad twice has no effect.
//! Lookups scan and copy the matches, so the returned iterator does not
//! hold the lock while the worker drains it.

use crate::collaborators::{Statement, StatementIter, TripleSource};
use crate::execution::QueryResult;
use crate::value::Value;
use parking_lot::RwLock;
use std::collections::HashSet;

#[derive(Default)]
struct Quads {
    ordered: Vec<Statement>,
    present: HashSet<Statement>,
}

/// Triple source backed by a vector of quads
#[derive(Default)]
pub struct MemoryTripleSource {
    quads: RwLock<Quads>,
}

impl MemoryTripleSource {
    pub fn new() -> Self {
        MemoryTripleSource::default()
    }

    pub fn from_statements(statements: impl IntoIterator<Item = Statement>) -> Self {
        let source = MemoryTripleSource::new();
        for statement in statements {
            source.add(statement);
        }
        source
    }

    /// Returns false if the quad was already present
    pub fn add(&self, statement: Statement) -> bool {
        let mut quads = self.quads.write();
        if !quads.present.insert(statement.clone()) {
            return false;
        }
        quads.ordered.push(statement);
        true
    }

    /// Add a triple to the default graph
    pub fn insert(&self, subject: Value, predicate: Value, object: Value) -> bool {
        self.add(Statement::new(subject, predicate, object))
    }

    pub fn len(&self) -> usize {
        self.quads.read().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn matches(term: &Value, wanted: Option<&Value>) -> bool {
    wanted.map_or(true, |w| w == term)
}

impl TripleSource for MemoryTripleSource {
    fn statements(
        &self,
        subject: Option<&Value>,
        predicate: Option<&Value>,
        object: Option<&Value>,
        context: Option<&Value>,
    ) -> QueryResult<StatementIter> {
        let quads = self.quads.read();
        let found: Vec<QueryResult<Statement>> = quads
            .ordered
            .iter()
            .filter(|st| {
                matches(&st.subject, subject)
                    && matches(&st.predicate, predicate)
                    && matches(&st.object, object)
                    && context.map_or(true, |c| st.context.as_ref() == Some(c))
            })
            .cloned()
            .map(Ok)
            .collect();
        Ok(Box::new(found.into_iter()))
    }
}

impl std::fmt::Debug for MemoryTripleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTripleSource")
            .field("statements", &self.len())
            .finish()
    }
}
