//! # Value Space
//!
//! The values a query variable can be bound to: IRIs, blank nodes and
//! literals, as they come out of the triple store.
//!
//! ## Ordering
//!
//! `Value` implements a total order used by ORDER BY:
//!
//! ```text
//! blank node  <  IRI  <  literal
//!                         ├── numeric (by numeric value)
//!                         ├── boolean (false < true)
//!                         └── strings (lexical, then language tag / datatype)
//! ```
//!
//! Unbound order keys sort before every value, see [`compare_optional`].
//! Numeric ties between an integer and a double of the same magnitude are
//! broken by variant so that the order stays consistent with `Eq`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// XSD datatype IRIs used for plain numeric and boolean literals
pub mod xsd {
    pub const INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
    pub const DOUBLE: &str = "http://www.w3.org/2001/XMLSchema#double";
    pub const BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
    pub const STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
    pub const DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";
}

/// A term from the store's value space
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// Named resource
    Iri(Arc<str>),
    /// Anonymous resource, identified by its label
    BlankNode(Arc<str>),
    Boolean(bool),
    Integer(i64),
    Double(f64),
    /// Simple literal (`xsd:string`)
    String(Arc<str>),
    /// Language-tagged literal
    LangString { value: Arc<str>, language: Arc<str> },
    /// Literal with any other datatype
    Typed { value: Arc<str>, datatype: Arc<str> },
}

impl Value {
    pub fn iri(iri: impl AsRef<str>) -> Self {
        Value::Iri(Arc::from(iri.as_ref()))
    }

    pub fn blank(label: impl AsRef<str>) -> Self {
        Value::BlankNode(Arc::from(label.as_ref()))
    }

    pub fn string(value: impl AsRef<str>) -> Self {
        Value::String(Arc::from(value.as_ref()))
    }

    pub fn lang_string(value: impl AsRef<str>, language: impl AsRef<str>) -> Self {
        Value::LangString {
            value: Arc::from(value.as_ref()),
            language: Arc::from(language.as_ref()),
        }
    }

    pub fn typed(value: impl AsRef<str>, datatype: impl AsRef<str>) -> Self {
        Value::Typed {
            value: Arc::from(value.as_ref()),
            datatype: Arc::from(datatype.as_ref()),
        }
    }

    pub fn is_literal(&self) -> bool {
        !matches!(self, Value::Iri(_) | Value::BlankNode(_))
    }

    /// Numeric view of the value, if it is a numeric literal
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Lexical form of a literal, or the IRI / label of a resource
    pub fn lexical(&self) -> String {
        match self {
            Value::Iri(s) | Value::BlankNode(s) | Value::String(s) => s.to_string(),
            Value::LangString { value, .. } | Value::Typed { value, .. } => value.to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Double(d) => d.to_string(),
        }
    }

    /// Datatype IRI of a literal (`None` for resources and language strings)
    pub fn datatype(&self) -> Option<&str> {
        match self {
            Value::Boolean(_) => Some(xsd::BOOLEAN),
            Value::Integer(_) => Some(xsd::INTEGER),
            Value::Double(_) => Some(xsd::DOUBLE),
            Value::String(_) => Some(xsd::STRING),
            Value::Typed { datatype, .. } => Some(&**datatype),
            Value::Iri(_) | Value::BlankNode(_) | Value::LangString { .. } => None,
        }
    }

    fn term_rank(&self) -> u8 {
        match self {
            Value::BlankNode(_) => 0,
            Value::Iri(_) => 1,
            _ => 2,
        }
    }

    fn literal_rank(&self) -> u8 {
        match self {
            Value::Integer(_) | Value::Double(_) => 0,
            Value::Boolean(_) => 1,
            _ => 2,
        }
    }

    fn variant_rank(&self) -> u8 {
        match self {
            Value::Iri(_) => 0,
            Value::BlankNode(_) => 1,
            Value::Boolean(_) => 2,
            Value::Integer(_) => 3,
            Value::Double(_) => 4,
            Value::String(_) => 5,
            Value::LangString { .. } => 6,
            Value::Typed { .. } => 7,
        }
    }

    fn tag(&self) -> &str {
        match self {
            Value::LangString { language, .. } => &**language,
            Value::Typed { datatype, .. } => &**datatype,
            _ => "",
        }
    }
}

/// Compares two optional order keys; unbound keys sort first
pub fn compare_optional(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.cmp(b),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Iri(a), Value::Iri(b))
            | (Value::BlankNode(a), Value::BlankNode(b))
            | (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (
                Value::LangString { value: v1, language: l1 },
                Value::LangString { value: v2, language: l2 },
            ) => v1 == v2 && l1 == l2,
            (
                Value::Typed { value: v1, datatype: d1 },
                Value::Typed { value: v2, datatype: d2 },
            ) => v1 == v2 && d1 == d2,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.variant_rank().hash(state);
        match self {
            Value::Iri(s) | Value::BlankNode(s) | Value::String(s) => s.hash(state),
            Value::Boolean(b) => b.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Double(d) => d.to_bits().hash(state),
            Value::LangString { value, language } => {
                value.hash(state);
                language.hash(state);
            }
            Value::Typed { value, datatype } => {
                value.hash(state);
                datatype.hash(state);
            }
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_term = self.term_rank().cmp(&other.term_rank());
        if by_term != Ordering::Equal {
            return by_term;
        }
        if !self.is_literal() {
            return self
                .variant_rank()
                .cmp(&other.variant_rank())
                .then_with(|| self.lexical().cmp(&other.lexical()));
        }
        let by_kind = self.literal_rank().cmp(&other.literal_rank());
        if by_kind != Ordering::Equal {
            return by_kind;
        }
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::Integer(i), Value::Double(d)) => {
                compare_integer_double(*i, *d).then(Ordering::Less)
            }
            (Value::Double(d), Value::Integer(i)) => compare_integer_double(*i, *d)
                .reverse()
                .then(Ordering::Greater),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (a, b) => a
                .lexical()
                .cmp(&b.lexical())
                .then_with(|| a.variant_rank().cmp(&b.variant_rank()))
                .then_with(|| a.tag().cmp(b.tag())),
        }
    }
}

/// Exact ordering of an integer against a double; NaN falls back to `total_cmp`
fn compare_integer_double(i: i64, d: f64) -> Ordering {
    // 2^63, the first double above i64::MAX
    const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
    if d.is_nan() {
        return (i as f64).total_cmp(&d);
    }
    if d >= TWO_POW_63 {
        return Ordering::Less;
    }
    if d < -TWO_POW_63 {
        return Ordering::Greater;
    }
    let whole = d.trunc();
    i.cmp(&(whole as i64)).then_with(|| 0.0f64.total_cmp(&(d - whole)))
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Iri(iri) => write!(f, "<{iri}>"),
            Value::BlankNode(label) => write!(f, "_:{label}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d:e}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::LangString { value, language } => write!(f, "{value:?}@{language}"),
            Value::Typed { value, datatype } => write!(f, "{value:?}^^<{datatype}>"),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}
