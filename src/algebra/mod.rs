//! # Query Algebra
//!
//! The tuple-expression tree handed to the evaluator. It is produced by a
//! query parser/planner upstream and only read here.
//!
//! `TupleExpr` is a closed enum with one variant per operator. Operator
//! parameters live in node structs behind `Arc`, so cloning a subtree (for
//! example to re-evaluate the right side of a join once per left result)
//! is cheap.
//!
//! ```text
//! leaves   : StatementPattern, ExternalSet, ZeroLengthPath,
//!            ArbitraryLengthPath, BindingSetAssignment, SingletonSet, EmptySet
//! unary    : QueryRoot, Projection, MultiProjection, Filter, Extension, Slice,
//!            Distinct, Reduced, Group, Order, Service, Describe
//! binary   : Join, LeftJoin, Union, Intersection, Difference
//! ```

mod expr;

pub use expr::{AggregateKind, AggregateOp, CompareOp, MathOp, ValueExpr};

use crate::binding::BindingSet;
use crate::collaborators::ExternalSet;
use crate::value::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Variable slot of a pattern; `value` is set for constants
#[derive(Debug, Clone, PartialEq)]
pub struct Var {
    pub name: String,
    pub value: Option<Value>,
}

impl Var {
    pub fn new(name: impl Into<String>) -> Self {
        Var {
            name: name.into(),
            value: None,
        }
    }

    pub fn constant(name: impl Into<String>, value: Value) -> Self {
        Var {
            name: name.into(),
            value: Some(value),
        }
    }

    pub fn is_constant(&self) -> bool {
        self.value.is_some()
    }

    /// The constant value, or the value bound to this variable
    pub fn resolve(&self, bindings: &BindingSet) -> Option<Value> {
        self.value
            .clone()
            .or_else(|| bindings.get(&self.name).cloned())
    }
}

/// Which graphs a pattern ranges over when its context is unconstrained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatternScope {
    #[default]
    DefaultContexts,
    NamedContexts,
}

#[derive(Debug, Clone)]
pub struct StatementPattern {
    pub scope: PatternScope,
    pub subject: Var,
    pub predicate: Var,
    pub object: Var,
    pub context: Option<Var>,
}

impl StatementPattern {
    pub fn vars(&self) -> impl Iterator<Item = &Var> {
        [&self.subject, &self.predicate, &self.object]
            .into_iter()
            .chain(self.context.as_ref())
    }
}

#[derive(Debug, Clone)]
pub struct ZeroLengthPath {
    pub scope: PatternScope,
    pub subject: Var,
    pub object: Var,
    pub context: Option<Var>,
}

#[derive(Debug, Clone)]
pub struct ArbitraryLengthPath {
    pub scope: PatternScope,
    pub subject: Var,
    pub path: TupleExpr,
    pub object: Var,
    pub context: Option<Var>,
    pub min_length: u64,
}

/// Inline VALUES rows; an absent name in a row is UNDEF
#[derive(Debug, Clone)]
pub struct BindingSetAssignment {
    pub binding_names: BTreeSet<String>,
    pub binding_sets: Vec<BindingSet>,
}

/// Rename of one variable on its way out of a projection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionElem {
    pub source: String,
    pub target: String,
}

impl ProjectionElem {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        ProjectionElem {
            target: name.clone(),
            source: name,
        }
    }

    pub fn aliased(source: impl Into<String>, target: impl Into<String>) -> Self {
        ProjectionElem {
            source: source.into(),
            target: target.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionElemList {
    pub elements: Vec<ProjectionElem>,
}

impl ProjectionElemList {
    pub fn new(elements: Vec<ProjectionElem>) -> Self {
        ProjectionElemList { elements }
    }

    /// Plain projection of the given names, no renaming
    pub fn of<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ProjectionElemList {
            elements: names.into_iter().map(ProjectionElem::new).collect(),
        }
    }

    pub fn target_names(&self) -> BTreeSet<String> {
        self.elements.iter().map(|e| e.target.clone()).collect()
    }

    /// Build the projected binding set.
    ///
    /// With `include_all_parent` the result starts from every binding of
    /// `parent` and projected values overwrite them. Without it the result
    /// starts empty, and a projected name missing from `source` falls back
    /// to the parent's value for the target name.
    pub fn project(
        &self,
        source: &BindingSet,
        parent: &BindingSet,
        include_all_parent: bool,
    ) -> BindingSet {
        let mut result = if include_all_parent {
            parent.clone()
        } else {
            BindingSet::empty()
        };
        for elem in &self.elements {
            let value = source.get(&elem.source).or_else(|| {
                if include_all_parent {
                    None
                } else {
                    parent.get(&elem.target)
                }
            });
            if let Some(value) = value {
                result = result.with(elem.target.clone(), value.clone());
            }
        }
        result
    }
}

#[derive(Debug, Clone)]
pub struct QueryRoot {
    pub arg: TupleExpr,
}

#[derive(Debug, Clone)]
pub struct Projection {
    pub arg: TupleExpr,
    pub elements: ProjectionElemList,
}

#[derive(Debug, Clone)]
pub struct MultiProjection {
    pub arg: TupleExpr,
    pub projections: Vec<ProjectionElemList>,
}

#[derive(Debug, Clone)]
pub struct Filter {
    pub arg: TupleExpr,
    pub condition: ValueExpr,
}

/// One computed binding `(expr AS ?name)`
#[derive(Debug, Clone)]
pub struct ExtensionElem {
    pub name: String,
    pub expr: ValueExpr,
}

impl ExtensionElem {
    pub fn new(name: impl Into<String>, expr: ValueExpr) -> Self {
        ExtensionElem {
            name: name.into(),
            expr,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Extension {
    pub arg: TupleExpr,
    pub elements: Vec<ExtensionElem>,
}

#[derive(Debug, Clone)]
pub struct Slice {
    pub arg: TupleExpr,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Distinct {
    pub arg: TupleExpr,
}

#[derive(Debug, Clone)]
pub struct Reduced {
    pub arg: TupleExpr,
}

/// One aggregate `(op AS ?name)` of a grouping
#[derive(Debug, Clone)]
pub struct GroupElem {
    pub name: String,
    pub operator: AggregateOp,
}

#[derive(Debug, Clone)]
pub struct Group {
    pub arg: TupleExpr,
    pub group_names: BTreeSet<String>,
    pub elements: Vec<GroupElem>,
}

#[derive(Debug, Clone)]
pub struct OrderElem {
    pub expr: ValueExpr,
    pub ascending: bool,
}

impl OrderElem {
    pub fn asc(expr: ValueExpr) -> Self {
        OrderElem {
            expr,
            ascending: true,
        }
    }

    pub fn desc(expr: ValueExpr) -> Self {
        OrderElem {
            expr,
            ascending: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Order {
    pub arg: TupleExpr,
    pub elements: Vec<OrderElem>,
}

/// Federated sub-query sent to `service_ref`
#[derive(Debug, Clone)]
pub struct Service {
    pub service_ref: Var,
    pub arg: TupleExpr,
    pub silent: bool,
}

#[derive(Debug, Clone)]
pub struct Describe {
    pub arg: TupleExpr,
}

#[derive(Debug, Clone)]
pub struct Join {
    pub left: TupleExpr,
    pub right: TupleExpr,
}

#[derive(Debug, Clone)]
pub struct LeftJoin {
    pub left: TupleExpr,
    pub right: TupleExpr,
    pub condition: Option<ValueExpr>,
}

/// Operands shared by Union, Intersection and Difference
#[derive(Debug, Clone)]
pub struct SetOperands {
    pub left: TupleExpr,
    pub right: TupleExpr,
}

/// Algebra tree node
#[derive(Clone)]
pub enum TupleExpr {
    StatementPattern(Arc<StatementPattern>),
    ExternalSet(Arc<dyn ExternalSet>),
    ZeroLengthPath(Arc<ZeroLengthPath>),
    ArbitraryLengthPath(Arc<ArbitraryLengthPath>),
    BindingSetAssignment(Arc<BindingSetAssignment>),
    SingletonSet,
    EmptySet,

    QueryRoot(Arc<QueryRoot>),
    Projection(Arc<Projection>),
    MultiProjection(Arc<MultiProjection>),
    Filter(Arc<Filter>),
    Extension(Arc<Extension>),
    Slice(Arc<Slice>),
    Distinct(Arc<Distinct>),
    Reduced(Arc<Reduced>),
    Group(Arc<Group>),
    Order(Arc<Order>),
    Service(Arc<Service>),
    Describe(Arc<Describe>),

    Join(Arc<Join>),
    LeftJoin(Arc<LeftJoin>),
    Union(Arc<SetOperands>),
    Intersection(Arc<SetOperands>),
    Difference(Arc<SetOperands>),
}

fn var_names_of<'a>(vars: impl IntoIterator<Item = &'a Var>) -> BTreeSet<String> {
    vars.into_iter()
        .filter(|v| !v.is_constant())
        .map(|v| v.name.clone())
        .collect()
}

impl TupleExpr {
    /// Operator name used in logs and error messages
    pub fn kind(&self) -> &'static str {
        match self {
            TupleExpr::StatementPattern(_) => "StatementPattern",
            TupleExpr::ExternalSet(_) => "ExternalSet",
            TupleExpr::ZeroLengthPath(_) => "ZeroLengthPath",
            TupleExpr::ArbitraryLengthPath(_) => "ArbitraryLengthPath",
            TupleExpr::BindingSetAssignment(_) => "BindingSetAssignment",
            TupleExpr::SingletonSet => "SingletonSet",
            TupleExpr::EmptySet => "EmptySet",
            TupleExpr::QueryRoot(_) => "QueryRoot",
            TupleExpr::Projection(_) => "Projection",
            TupleExpr::MultiProjection(_) => "MultiProjection",
            TupleExpr::Filter(_) => "Filter",
            TupleExpr::Extension(_) => "Extension",
            TupleExpr::Slice(_) => "Slice",
            TupleExpr::Distinct(_) => "Distinct",
            TupleExpr::Reduced(_) => "Reduced",
            TupleExpr::Group(_) => "Group",
            TupleExpr::Order(_) => "Order",
            TupleExpr::Service(_) => "Service",
            TupleExpr::Describe(_) => "Describe",
            TupleExpr::Join(_) => "Join",
            TupleExpr::LeftJoin(_) => "LeftJoin",
            TupleExpr::Union(_) => "Union",
            TupleExpr::Intersection(_) => "Intersection",
            TupleExpr::Difference(_) => "Difference",
        }
    }

    /// Names this expression may bind in its results
    pub fn binding_names(&self) -> BTreeSet<String> {
        match self {
            TupleExpr::StatementPattern(sp) => var_names_of(sp.vars()),
            TupleExpr::ExternalSet(ext) => ext.binding_names(),
            TupleExpr::ZeroLengthPath(p) => {
                var_names_of([&p.subject, &p.object].into_iter().chain(p.context.as_ref()))
            }
            TupleExpr::ArbitraryLengthPath(p) => {
                var_names_of([&p.subject, &p.object].into_iter().chain(p.context.as_ref()))
            }
            TupleExpr::BindingSetAssignment(bsa) => bsa.binding_names.clone(),
            TupleExpr::SingletonSet | TupleExpr::EmptySet => BTreeSet::new(),
            TupleExpr::QueryRoot(n) => n.arg.binding_names(),
            TupleExpr::Projection(p) => p.elements.target_names(),
            TupleExpr::MultiProjection(p) => p
                .projections
                .iter()
                .flat_map(ProjectionElemList::target_names)
                .collect(),
            TupleExpr::Filter(f) => f.arg.binding_names(),
            TupleExpr::Extension(e) => {
                let mut names = e.arg.binding_names();
                names.extend(e.elements.iter().map(|el| el.name.clone()));
                names
            }
            TupleExpr::Slice(s) => s.arg.binding_names(),
            TupleExpr::Distinct(d) => d.arg.binding_names(),
            TupleExpr::Reduced(r) => r.arg.binding_names(),
            TupleExpr::Group(g) => {
                let mut names = g.group_names.clone();
                names.extend(g.elements.iter().map(|el| el.name.clone()));
                names
            }
            TupleExpr::Order(o) => o.arg.binding_names(),
            TupleExpr::Service(s) => {
                let mut names = s.arg.binding_names();
                names.extend(var_names_of([&s.service_ref]));
                names
            }
            TupleExpr::Describe(d) => d.arg.binding_names(),
            TupleExpr::Join(j) => {
                let mut names = j.left.binding_names();
                names.extend(j.right.binding_names());
                names
            }
            TupleExpr::LeftJoin(j) => {
                let mut names = j.left.binding_names();
                names.extend(j.right.binding_names());
                names
            }
            TupleExpr::Union(u) => {
                let mut names = u.left.binding_names();
                names.extend(u.right.binding_names());
                names
            }
            TupleExpr::Intersection(i) => {
                let right = i.right.binding_names();
                i.left
                    .binding_names()
                    .into_iter()
                    .filter(|n| right.contains(n))
                    .collect()
            }
            TupleExpr::Difference(d) => d.left.binding_names(),
        }
    }

    /// Every variable name mentioned anywhere in this subtree, including
    /// variables only referenced from value expressions
    pub fn var_names(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_var_names(&mut out);
        out
    }

    fn collect_var_names(&self, out: &mut BTreeSet<String>) {
        match self {
            TupleExpr::StatementPattern(_)
            | TupleExpr::ExternalSet(_)
            | TupleExpr::ZeroLengthPath(_)
            | TupleExpr::BindingSetAssignment(_)
            | TupleExpr::SingletonSet
            | TupleExpr::EmptySet => out.extend(self.binding_names()),
            TupleExpr::ArbitraryLengthPath(p) => {
                out.extend(self.binding_names());
                p.path.collect_var_names(out);
            }
            TupleExpr::QueryRoot(n) => n.arg.collect_var_names(out),
            TupleExpr::Projection(p) => {
                out.extend(p.elements.elements.iter().map(|e| e.source.clone()));
                p.arg.collect_var_names(out);
            }
            TupleExpr::MultiProjection(p) => {
                for list in &p.projections {
                    out.extend(list.elements.iter().map(|e| e.source.clone()));
                }
                p.arg.collect_var_names(out);
            }
            TupleExpr::Filter(f) => {
                f.condition.collect_var_names(out);
                f.arg.collect_var_names(out);
            }
            TupleExpr::Extension(e) => {
                for elem in &e.elements {
                    elem.expr.collect_var_names(out);
                }
                e.arg.collect_var_names(out);
            }
            TupleExpr::Slice(s) => s.arg.collect_var_names(out),
            TupleExpr::Distinct(d) => d.arg.collect_var_names(out),
            TupleExpr::Reduced(r) => r.arg.collect_var_names(out),
            TupleExpr::Group(g) => {
                out.extend(g.group_names.iter().cloned());
                for elem in &g.elements {
                    if let Some(arg) = &elem.operator.arg {
                        arg.collect_var_names(out);
                    }
                }
                g.arg.collect_var_names(out);
            }
            TupleExpr::Order(o) => {
                for elem in &o.elements {
                    elem.expr.collect_var_names(out);
                }
                o.arg.collect_var_names(out);
            }
            TupleExpr::Service(s) => {
                out.extend(var_names_of([&s.service_ref]));
                s.arg.collect_var_names(out);
            }
            TupleExpr::Describe(d) => d.arg.collect_var_names(out),
            TupleExpr::Join(j) => {
                j.left.collect_var_names(out);
                j.right.collect_var_names(out);
            }
            TupleExpr::LeftJoin(j) => {
                j.left.collect_var_names(out);
                j.right.collect_var_names(out);
                if let Some(condition) = &j.condition {
                    condition.collect_var_names(out);
                }
            }
            TupleExpr::Union(s) | TupleExpr::Intersection(s) | TupleExpr::Difference(s) => {
                s.left.collect_var_names(out);
                s.right.collect_var_names(out);
            }
        }
    }

    // Constructors

    /// Triple pattern over the default graphs; `?name` strings become
    /// variables, anything else is used as an IRI constant
    pub fn pattern(subject: &str, predicate: &str, object: &str) -> Self {
        TupleExpr::statement(StatementPattern {
            scope: PatternScope::DefaultContexts,
            subject: pattern_var(subject),
            predicate: pattern_var(predicate),
            object: pattern_var(object),
            context: None,
        })
    }

    pub fn statement(pattern: StatementPattern) -> Self {
        TupleExpr::StatementPattern(Arc::new(pattern))
    }

    pub fn external(set: Arc<dyn ExternalSet>) -> Self {
        TupleExpr::ExternalSet(set)
    }

    pub fn values<I, S>(binding_names: I, binding_sets: Vec<BindingSet>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TupleExpr::BindingSetAssignment(Arc::new(BindingSetAssignment {
            binding_names: binding_names.into_iter().map(Into::into).collect(),
            binding_sets,
        }))
    }

    pub fn zero_length_path(subject: Var, object: Var) -> Self {
        TupleExpr::ZeroLengthPath(Arc::new(ZeroLengthPath {
            scope: PatternScope::DefaultContexts,
            subject,
            object,
            context: None,
        }))
    }

    pub fn query_root(arg: TupleExpr) -> Self {
        TupleExpr::QueryRoot(Arc::new(QueryRoot { arg }))
    }

    pub fn projection(arg: TupleExpr, elements: ProjectionElemList) -> Self {
        TupleExpr::Projection(Arc::new(Projection { arg, elements }))
    }

    pub fn multi_projection(arg: TupleExpr, projections: Vec<ProjectionElemList>) -> Self {
        TupleExpr::MultiProjection(Arc::new(MultiProjection { arg, projections }))
    }

    pub fn filter(arg: TupleExpr, condition: ValueExpr) -> Self {
        TupleExpr::Filter(Arc::new(Filter { arg, condition }))
    }

    pub fn extension(arg: TupleExpr, elements: Vec<ExtensionElem>) -> Self {
        TupleExpr::Extension(Arc::new(Extension { arg, elements }))
    }

    pub fn slice(arg: TupleExpr, offset: Option<u64>, limit: Option<u64>) -> Self {
        TupleExpr::Slice(Arc::new(Slice { arg, offset, limit }))
    }

    pub fn distinct(arg: TupleExpr) -> Self {
        TupleExpr::Distinct(Arc::new(Distinct { arg }))
    }

    pub fn reduced(arg: TupleExpr) -> Self {
        TupleExpr::Reduced(Arc::new(Reduced { arg }))
    }

    pub fn order(arg: TupleExpr, elements: Vec<OrderElem>) -> Self {
        TupleExpr::Order(Arc::new(Order { arg, elements }))
    }

    pub fn group(arg: TupleExpr, group_names: BTreeSet<String>, elements: Vec<GroupElem>) -> Self {
        TupleExpr::Group(Arc::new(Group {
            arg,
            group_names,
            elements,
        }))
    }

    pub fn join(left: TupleExpr, right: TupleExpr) -> Self {
        TupleExpr::Join(Arc::new(Join { left, right }))
    }

    pub fn left_join(left: TupleExpr, right: TupleExpr, condition: Option<ValueExpr>) -> Self {
        TupleExpr::LeftJoin(Arc::new(LeftJoin {
            left,
            right,
            condition,
        }))
    }

    pub fn union(left: TupleExpr, right: TupleExpr) -> Self {
        TupleExpr::Union(Arc::new(SetOperands { left, right }))
    }

    pub fn intersection(left: TupleExpr, right: TupleExpr) -> Self {
        TupleExpr::Intersection(Arc::new(SetOperands { left, right }))
    }

    pub fn difference(left: TupleExpr, right: TupleExpr) -> Self {
        TupleExpr::Difference(Arc::new(SetOperands { left, right }))
    }
}

fn pattern_var(term: &str) -> Var {
    match term.strip_prefix('?') {
        Some(name) => Var::new(name),
        None => Var::constant(format!("_const_{term}"), Value::iri(term)),
    }
}

impl fmt::Debug for TupleExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TupleExpr::StatementPattern(n) => fmt::Debug::fmt(n, f),
            TupleExpr::ExternalSet(n) => fmt::Debug::fmt(n, f),
            TupleExpr::ZeroLengthPath(n) => fmt::Debug::fmt(n, f),
            TupleExpr::ArbitraryLengthPath(n) => fmt::Debug::fmt(n, f),
            TupleExpr::BindingSetAssignment(n) => fmt::Debug::fmt(n, f),
            TupleExpr::SingletonSet => f.write_str("SingletonSet"),
            TupleExpr::EmptySet => f.write_str("EmptySet"),
            TupleExpr::QueryRoot(n) => fmt::Debug::fmt(n, f),
            TupleExpr::Projection(n) => fmt::Debug::fmt(n, f),
            TupleExpr::MultiProjection(n) => fmt::Debug::fmt(n, f),
            TupleExpr::Filter(n) => fmt::Debug::fmt(n, f),
            TupleExpr::Extension(n) => fmt::Debug::fmt(n, f),
            TupleExpr::Slice(n) => fmt::Debug::fmt(n, f),
            TupleExpr::Distinct(n) => fmt::Debug::fmt(n, f),
            TupleExpr::Reduced(n) => fmt::Debug::fmt(n, f),
            TupleExpr::Group(n) => fmt::Debug::fmt(n, f),
            TupleExpr::Order(n) => fmt::Debug::fmt(n, f),
            TupleExpr::Service(n) => fmt::Debug::fmt(n, f),
            TupleExpr::Describe(n) => fmt::Debug::fmt(n, f),
            TupleExpr::Join(n) => fmt::Debug::fmt(n, f),
            TupleExpr::LeftJoin(n) => fmt::Debug::fmt(n, f),
            TupleExpr::Union(n) => f.debug_tuple("Union").field(n).finish(),
            TupleExpr::Intersection(n) => f.debug_tuple("Intersection").field(n).finish(),
            TupleExpr::Difference(n) => f.debug_tuple("Difference").field(n).finish(),
        }
    }
}
