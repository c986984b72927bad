//! End-to-end evaluation tests over an in-memory triple source.
//!
//! Tests for:
//! - Statement patterns, joins and optional joins
//! - Set operations
//! - Filters, projections, ordering and slicing
//! - Delegated grouping and missing collaborators

use std::collections::BTreeSet;
use std::sync::Arc;
use tuplex::algebra::{
    AggregateKind, AggregateOp, CompareOp, ExtensionElem, GroupElem, MathOp, OrderElem,
    ProjectionElemList,
};
use tuplex::{
    BindingSet, MemoryTripleSource, QueryError, SimpleGroupEvaluator, TupleExpr,
    TupleExprEvaluation, Value, ValueExpr,
};

// ============================================================================
// Test Helpers
// ============================================================================

const KNOWS: &str = "urn:knows";
const AGE: &str = "urn:age";

fn iri(s: &str) -> Value {
    Value::iri(s)
}

/// alice knows bob and carol, bob knows carol; alice and bob have an age
fn social_graph() -> Arc<MemoryTripleSource> {
    let store = MemoryTripleSource::new();
    store.insert(iri("urn:alice"), iri(KNOWS), iri("urn:bob"));
    store.insert(iri("urn:alice"), iri(KNOWS), iri("urn:carol"));
    store.insert(iri("urn:bob"), iri(KNOWS), iri("urn:carol"));
    store.insert(iri("urn:alice"), iri(AGE), Value::Integer(31));
    store.insert(iri("urn:bob"), iri(AGE), Value::Integer(25));
    Arc::new(store)
}

fn evaluation() -> TupleExprEvaluation {
    TupleExprEvaluation::builder(social_graph())
        .group_evaluator(Arc::new(SimpleGroupEvaluator))
        .build()
        .unwrap()
}

fn collect(expr: &TupleExpr) -> Vec<BindingSet> {
    evaluation()
        .evaluate(expr, BindingSet::empty())
        .collect::<Result<_, _>>()
        .unwrap()
}

fn sorted(mut rows: Vec<BindingSet>) -> Vec<BindingSet> {
    rows.sort();
    rows
}

fn row(pairs: &[(&str, Value)]) -> BindingSet {
    BindingSet::from_pairs(pairs.iter().cloned())
}

fn ints(name: &str, values: &[i64]) -> TupleExpr {
    TupleExpr::values(
        [name],
        values
            .iter()
            .map(|v| row(&[(name, Value::Integer(*v))]))
            .collect(),
    )
}

// ============================================================================
// Patterns and Joins
// ============================================================================

#[test]
fn test_statement_pattern_binds_variables() {
    let rows = collect(&TupleExpr::pattern("?s", KNOWS, "?o"));
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.len() == 2));
}

#[test]
fn test_statement_pattern_respects_incoming_bindings() {
    let expr = TupleExpr::pattern("?s", KNOWS, "?o");
    let rows: Vec<BindingSet> = evaluation()
        .evaluate(&expr, row(&[("s", iri("urn:bob"))]))
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rows, vec![row(&[("s", iri("urn:bob")), ("o", iri("urn:carol"))])]);
}

#[test]
fn test_join_chains_patterns() {
    // ?a knows ?b . ?b knows ?c
    let expr = TupleExpr::join(
        TupleExpr::pattern("?a", KNOWS, "?b"),
        TupleExpr::pattern("?b", KNOWS, "?c"),
    );
    let rows = collect(&expr);
    assert_eq!(
        rows,
        vec![row(&[
            ("a", iri("urn:alice")),
            ("b", iri("urn:bob")),
            ("c", iri("urn:carol")),
        ])]
    );
}

#[test]
fn test_join_and_left_join_over_values() {
    let a = ints("x", &[1, 2]);
    let b = TupleExpr::values(
        ["x", "y"],
        vec![row(&[("x", Value::Integer(1)), ("y", Value::Integer(10))])],
    );
    let x1y10 = row(&[("x", Value::Integer(1)), ("y", Value::Integer(10))]);

    let joined = collect(&TupleExpr::join(a.clone(), b.clone()));
    assert_eq!(joined, vec![x1y10.clone()]);

    let optional = sorted(collect(&TupleExpr::left_join(a, b, None)));
    assert_eq!(optional, sorted(vec![x1y10, row(&[("x", Value::Integer(2))])]));
}

#[test]
fn test_join_with_empty_side_is_empty() {
    let expr = TupleExpr::join(
        TupleExpr::pattern("?a", KNOWS, "?b"),
        TupleExpr::pattern("?b", "urn:missing", "?c"),
    );
    assert!(collect(&expr).is_empty());
}

#[test]
fn test_left_join_keeps_unmatched_rows() {
    // ?s knows ?o OPTIONAL { ?o age ?age }
    let expr = TupleExpr::left_join(
        TupleExpr::pattern("?s", KNOWS, "?o"),
        TupleExpr::pattern("?o", AGE, "?age"),
        None,
    );
    let rows = sorted(collect(&expr));
    assert_eq!(rows.len(), 3);
    let with_age: Vec<&BindingSet> = rows.iter().filter(|r| r.has_binding("age")).collect();
    assert_eq!(with_age.len(), 1);
    assert_eq!(with_age[0].get("o"), Some(&iri("urn:bob")));
    assert_eq!(with_age[0].get("age"), Some(&Value::Integer(25)));
}

#[test]
fn test_left_join_condition_filters_optional_part() {
    // ?s age ?a OPTIONAL { ?s knows ?o FILTER(?a > 30) }
    let expr = TupleExpr::left_join(
        TupleExpr::pattern("?s", AGE, "?a"),
        TupleExpr::pattern("?s", KNOWS, "?o"),
        Some(ValueExpr::compare(
            CompareOp::Gt,
            ValueExpr::var("a"),
            ValueExpr::constant(Value::Integer(30)),
        )),
    );
    let rows = collect(&expr);
    let alice: Vec<&BindingSet> = rows
        .iter()
        .filter(|r| r.get("s") == Some(&iri("urn:alice")))
        .collect();
    let bob: Vec<&BindingSet> = rows
        .iter()
        .filter(|r| r.get("s") == Some(&iri("urn:bob")))
        .collect();
    assert_eq!(alice.len(), 2);
    assert!(alice.iter().all(|r| r.has_binding("o")));
    assert_eq!(bob.len(), 1);
    assert!(!bob[0].has_binding("o"));
}

// ============================================================================
// Set Operations
// ============================================================================

#[test]
fn test_union_emits_both_sides() {
    let expr = TupleExpr::union(ints("x", &[1, 2]), ints("x", &[2, 3]));
    let xs: Vec<Value> = sorted(collect(&expr))
        .iter()
        .filter_map(|r| r.get("x").cloned())
        .collect();
    assert_eq!(
        xs,
        vec![
            Value::Integer(1),
            Value::Integer(2),
            Value::Integer(2),
            Value::Integer(3)
        ]
    );
}

#[test]
fn test_intersection_keeps_common_rows() {
    let expr = TupleExpr::intersection(ints("x", &[1, 2, 3, 4]), ints("x", &[4, 2, 9]));
    let rows = sorted(collect(&expr));
    assert_eq!(
        rows,
        vec![row(&[("x", Value::Integer(2))]), row(&[("x", Value::Integer(4))])]
    );
}

#[test]
fn test_difference_removes_compatible_rows() {
    let expr = TupleExpr::difference(ints("x", &[1, 2, 3]), ints("x", &[2]));
    let rows = sorted(collect(&expr));
    assert_eq!(
        rows,
        vec![row(&[("x", Value::Integer(1))]), row(&[("x", Value::Integer(3))])]
    );
}

#[test]
fn test_difference_without_shared_variables_keeps_everything() {
    let expr = TupleExpr::difference(ints("x", &[1, 2]), ints("y", &[1]));
    assert_eq!(collect(&expr).len(), 2);
}

// ============================================================================
// Modifiers
// ============================================================================

#[test]
fn test_filter_project_order_slice() {
    // SELECT ?o WHERE { ?s knows ?o } ORDER BY ?o LIMIT 2 with DISTINCT
    let expr = TupleExpr::slice(
        TupleExpr::distinct(TupleExpr::projection(
            TupleExpr::order(
                TupleExpr::pattern("?s", KNOWS, "?o"),
                vec![OrderElem::asc(ValueExpr::var("o"))],
            ),
            ProjectionElemList::of(["o"]),
        )),
        None,
        Some(2),
    );
    let rows = collect(&expr);
    assert_eq!(
        rows,
        vec![row(&[("o", iri("urn:bob"))]), row(&[("o", iri("urn:carol"))])]
    );
}

#[test]
fn test_filter_drops_rows() {
    let expr = TupleExpr::filter(
        TupleExpr::pattern("?s", AGE, "?a"),
        ValueExpr::compare(
            CompareOp::Lt,
            ValueExpr::var("a"),
            ValueExpr::constant(Value::Integer(30)),
        ),
    );
    let rows = collect(&expr);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("s"), Some(&iri("urn:bob")));
}

#[test]
fn test_extension_computes_values() {
    let expr = TupleExpr::extension(
        TupleExpr::pattern("?s", AGE, "?a"),
        vec![ExtensionElem::new(
            "next",
            ValueExpr::math(
                MathOp::Add,
                ValueExpr::var("a"),
                ValueExpr::constant(Value::Integer(1)),
            ),
        )],
    );
    let nexts: BTreeSet<Value> = collect(&expr)
        .iter()
        .filter_map(|r| r.get("next").cloned())
        .collect();
    assert_eq!(
        nexts,
        BTreeSet::from([Value::Integer(26), Value::Integer(32)])
    );
}

#[test]
fn test_offset_and_limit() {
    let expr = TupleExpr::slice(ints("x", &[0, 1, 2, 3, 4, 5]), Some(2), Some(3));
    assert_eq!(collect(&expr).len(), 3);

    let expr = TupleExpr::slice(ints("x", &[0, 1, 2]), Some(5), None);
    assert!(collect(&expr).is_empty());
}

#[test]
fn test_query_root_is_transparent() {
    let expr = TupleExpr::query_root(TupleExpr::pattern("?s", AGE, "?a"));
    assert_eq!(collect(&expr).len(), 2);
}

// ============================================================================
// Grouping and Collaborators
// ============================================================================

#[test]
fn test_group_counts_per_subject() {
    let expr = TupleExpr::group(
        TupleExpr::pattern("?s", KNOWS, "?o"),
        BTreeSet::from(["s".to_string()]),
        vec![GroupElem {
            name: "n".to_string(),
            operator: AggregateOp {
                kind: AggregateKind::Count,
                arg: None,
                distinct: false,
            },
        }],
    );
    let rows = sorted(collect(&expr));
    assert_eq!(
        rows,
        sorted(vec![
            row(&[("s", iri("urn:alice")), ("n", Value::Integer(2))]),
            row(&[("s", iri("urn:bob")), ("n", Value::Integer(1))]),
        ])
    );
}

#[test]
fn test_missing_path_evaluator_is_unsupported() {
    let expr = TupleExpr::zero_length_path(
        tuplex::algebra::Var::new("a"),
        tuplex::algebra::Var::new("b"),
    );
    let results: Vec<_> = evaluation().evaluate(&expr, BindingSet::empty()).collect();
    assert_eq!(results.len(), 1);
    assert!(matches!(
        results[0].as_ref().map_err(QueryError::root),
        Err(QueryError::Unsupported(_))
    ));
}

#[test]
fn test_zero_length_path_with_equal_endpoints() {
    let a = tuplex::algebra::Var::constant("a", iri("urn:alice"));
    let b = tuplex::algebra::Var::constant("b", iri("urn:alice"));
    let rows: Vec<BindingSet> = evaluation()
        .evaluate(&TupleExpr::zero_length_path(a, b), BindingSet::empty())
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rows.len(), 1);
}
