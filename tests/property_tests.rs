//! Property-based operator tests (proptest).

use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tuplex::{BindingSet, MemoryTripleSource, TupleExpr, TupleExprEvaluation, Value};

/// One evaluation shared by every case so the worker pool is reused
fn evaluation() -> &'static TupleExprEvaluation {
    static EVALUATION: OnceLock<TupleExprEvaluation> = OnceLock::new();
    EVALUATION.get_or_init(|| {
        TupleExprEvaluation::builder(Arc::new(MemoryTripleSource::new()))
            .spill_options(tuplex::collections::SpillOptions {
                memory_threshold: 8,
                temp_dir: None,
            })
            .build()
            .unwrap()
    })
}

fn rows(expr: &TupleExpr) -> Vec<BindingSet> {
    evaluation()
        .evaluate(expr, BindingSet::empty())
        .collect::<Result<_, _>>()
        .unwrap()
}

fn table(columns: &[&str], data: &[Vec<i64>]) -> TupleExpr {
    TupleExpr::values(
        columns.iter().copied(),
        data.iter()
            .map(|r| {
                BindingSet::from_pairs(
                    columns
                        .iter()
                        .zip(r)
                        .map(|(c, v)| (*c, Value::Integer(*v))),
                )
            })
            .collect(),
    )
}

fn pairs() -> impl Strategy<Value = Vec<Vec<i64>>> {
    prop::collection::vec(prop::collection::vec(0i64..5, 2), 0..20)
}

fn singles() -> impl Strategy<Value = Vec<Vec<i64>>> {
    prop::collection::vec(prop::collection::vec(0i64..8, 1), 0..30)
}

fn sorted(mut rows: Vec<BindingSet>) -> Vec<BindingSet> {
    rows.sort();
    rows
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Join on ?k matches a nested-loop reference
    #[test]
    fn join_matches_nested_loop(left in pairs(), right in pairs()) {
        let expr = TupleExpr::join(table(&["a", "k"], &left), table(&["k", "b"], &right));
        let mut expected = Vec::new();
        for l in &left {
            for r in &right {
                if l[1] == r[0] {
                    expected.push(BindingSet::from_pairs([
                        ("a", Value::Integer(l[0])),
                        ("k", Value::Integer(l[1])),
                        ("b", Value::Integer(r[1])),
                    ]));
                }
            }
        }
        prop_assert_eq!(sorted(rows(&expr)), sorted(expected));
    }

    /// Left join keeps every left row at least once
    #[test]
    fn left_join_covers_left(left in pairs(), right in pairs()) {
        let expr = TupleExpr::left_join(table(&["a", "k"], &left), table(&["k", "b"], &right), None);
        let out = rows(&expr);
        let mut counts: HashMap<(i64, i64), usize> = HashMap::new();
        for l in &left {
            *counts.entry((l[0], l[1])).or_default() += 1;
        }
        for ((a, k), n) in counts {
            let seen = out
                .iter()
                .filter(|r| {
                    r.get("a") == Some(&Value::Integer(a)) && r.get("k") == Some(&Value::Integer(k))
                })
                .count();
            prop_assert!(seen >= n);
        }
    }

    /// Union is a bag concatenation
    #[test]
    fn union_count_is_sum(left in singles(), right in singles()) {
        let expr = TupleExpr::union(table(&["x"], &left), table(&["x"], &right));
        prop_assert_eq!(rows(&expr).len(), left.len() + right.len());
    }

    /// Distinct emits each row once, and applying it twice changes nothing
    #[test]
    fn distinct_is_idempotent(data in singles()) {
        let once = sorted(rows(&TupleExpr::distinct(table(&["x"], &data))));
        let twice = sorted(rows(&TupleExpr::distinct(TupleExpr::distinct(table(&["x"], &data)))));
        let mut expected: Vec<i64> = data.iter().map(|r| r[0]).collect();
        expected.sort_unstable();
        expected.dedup();
        prop_assert_eq!(once.len(), expected.len());
        prop_assert_eq!(once, twice);
    }

    /// Slice emits exactly min(limit, max(0, n - offset)) rows
    #[test]
    fn slice_boundaries(data in singles(), offset in 0u64..40, limit in prop::option::of(0u64..40)) {
        let expr = TupleExpr::slice(table(&["x"], &data), Some(offset), limit);
        let available = (data.len() as u64).saturating_sub(offset);
        let expected = limit.map_or(available, |l| l.min(available));
        prop_assert_eq!(rows(&expr).len() as u64, expected);
    }

    /// Intersection and difference partition the left side when the right
    /// side shares all of its variables
    #[test]
    fn intersection_and_difference_partition(left in singles(), right in singles()) {
        let inter = rows(&TupleExpr::intersection(table(&["x"], &left), table(&["x"], &right)));
        let diff = rows(&TupleExpr::difference(table(&["x"], &left), table(&["x"], &right)));
        prop_assert_eq!(inter.len() + diff.len(), left.len());
    }
}
