//! The push contract shared by every operator, and the ancestry context
//! the dispatcher threads through the recursion.

use crate::binding::BindingSet;
use crate::execution::QueryError;
use std::sync::Arc;

/// Consumer of a binding-set stream.
///
/// `push(Some(bs))` delivers one result; `push(None)` signals that no more
/// results follow. The return value tells the producer whether to keep
/// going. A pipe that returns `false` has taken care of forwarding the end
/// of stream to its own parent, so the producer simply stops.
///
/// `push` may be called concurrently from several producer threads.
pub trait BindingSetPipe: Send + Sync {
    fn push(&self, bs: Option<BindingSet>) -> bool;

    /// Next pipe towards the root, `None` for the root itself
    fn parent(&self) -> Option<&PipeRef>;

    /// Report a failure towards the root
    fn handle_error(&self, err: QueryError) {
        if let Some(parent) = self.parent() {
            parent.handle_error(err);
        }
    }

    /// Whether the consumer at the root has gone away
    fn is_closed(&self) -> bool {
        self.parent().is_some_and(|parent| parent.is_closed())
    }
}

/// Shared handle to a pipe
pub type PipeRef = Arc<dyn BindingSetPipe>;

/// Enclosing solution modifier, as seen from a descendant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Modifier {
    Distinct,
    Reduced,
    Slice {
        offset: Option<u64>,
        limit: Option<u64>,
    },
}

/// Where in the tree an expression is being evaluated.
///
/// `modifiers` holds the unbroken chain of Distinct / Reduced / Slice
/// nodes directly above the current node, outermost first. Any other
/// operator clears it.
#[derive(Debug, Clone, Default)]
pub(crate) struct EvalContext {
    modifiers: Vec<Modifier>,
    in_subquery: bool,
}

impl EvalContext {
    pub(crate) fn root() -> Self {
        EvalContext::default()
    }

    /// Context for a tuple expression nested in a value expression
    pub(crate) fn subquery() -> Self {
        EvalContext {
            modifiers: Vec::new(),
            in_subquery: true,
        }
    }

    pub(crate) fn in_subquery(&self) -> bool {
        self.in_subquery
    }

    /// Context for the argument of a solution modifier
    pub(crate) fn enter(&self, modifier: Modifier) -> Self {
        let mut modifiers = self.modifiers.clone();
        modifiers.push(modifier);
        EvalContext {
            modifiers,
            in_subquery: self.in_subquery,
        }
    }

    /// Context for the arguments of any other operator
    pub(crate) fn descend(&self) -> Self {
        EvalContext {
            modifiers: Vec::new(),
            in_subquery: self.in_subquery,
        }
    }

    /// Number of rows an Order at this position must keep
    /// (`u64::MAX` = all of them)
    pub(crate) fn sort_limit(&self) -> u64 {
        limit_of(&self.modifiers)
    }

    /// Whether an Order at this position may drop duplicates while sorting
    pub(crate) fn sort_distinct(&self) -> bool {
        self.modifiers
            .iter()
            .rev()
            .find(|m| !matches!(m, Modifier::Slice { .. }))
            .is_some_and(|m| matches!(m, Modifier::Distinct | Modifier::Reduced))
    }
}

fn limit_of(modifiers: &[Modifier]) -> u64 {
    let Some((nearest, outer)) = modifiers.split_last() else {
        return u64::MAX;
    };
    let mut offset = 0;
    if let Modifier::Slice { offset: o, limit: l } = *nearest {
        match (o, l) {
            (Some(o), Some(l)) => return o.saturating_add(l),
            (None, Some(l)) => return l,
            (Some(o), None) => offset = o,
            (None, None) => {}
        }
    }
    let limit = limit_of(outer);
    if offset > 0 && limit < u64::MAX {
        offset.saturating_add(limit)
    } else {
        limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice(offset: Option<u64>, limit: Option<u64>) -> Modifier {
        Modifier::Slice { offset, limit }
    }

    fn ctx(modifiers: &[Modifier]) -> EvalContext {
        modifiers
            .iter()
            .fold(EvalContext::root(), |c, m| c.enter(*m))
    }

    #[test]
    fn test_no_modifiers_means_unlimited() {
        let c = EvalContext::root();
        assert_eq!(c.sort_limit(), u64::MAX);
        assert!(!c.sort_distinct());
    }

    #[test]
    fn test_slice_limit_and_offset() {
        assert_eq!(ctx(&[slice(Some(2), Some(3))]).sort_limit(), 5);
        assert_eq!(ctx(&[slice(None, Some(3))]).sort_limit(), 3);
        assert_eq!(ctx(&[slice(Some(4), None)]).sort_limit(), u64::MAX);
    }

    #[test]
    fn test_offset_adds_to_outer_limit() {
        let c = ctx(&[slice(None, Some(10)), slice(Some(4), None)]);
        assert_eq!(c.sort_limit(), 14);
    }

    #[test]
    fn test_distinct_keeps_full_cap() {
        let c = ctx(&[Modifier::Distinct]);
        assert_eq!(c.sort_limit(), u64::MAX);
        assert!(c.sort_distinct());
    }

    #[test]
    fn test_distinct_above_slice_sets_dedup() {
        let c = ctx(&[Modifier::Reduced, slice(None, Some(5))]);
        assert_eq!(c.sort_limit(), 5);
        assert!(c.sort_distinct());
    }

    #[test]
    fn test_descend_clears_chain_but_keeps_subquery_flag() {
        let c = EvalContext::subquery().enter(Modifier::Distinct).descend();
        assert!(c.in_subquery());
        assert!(!c.sort_distinct());
    }
}
