//! Binding Sets
//!
//! A `BindingSet` maps query variable names to values. It is immutable and
//! cheap to clone: the mapping lives behind an `Arc`, and every "modifying"
//! operation returns a new set. Pipes on different threads may hold the same
//! binding set at once.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Immutable variable → value mapping
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BindingSet {
    bindings: Arc<BTreeMap<String, Value>>,
}

impl BindingSet {
    /// The empty binding set
    pub fn empty() -> Self {
        BindingSet::default()
    }

    /// Build a binding set from `(name, value)` pairs; later pairs win
    pub fn from_pairs<N, I>(pairs: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, Value)>,
    {
        BindingSet {
            bindings: Arc::new(pairs.into_iter().map(|(n, v)| (n.into(), v)).collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn has_binding(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Bound variable names, in name order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Copy of this set with `name` bound to `value` (overwrites)
    pub fn with(&self, name: impl Into<String>, value: Value) -> Self {
        let mut map = (*self.bindings).clone();
        map.insert(name.into(), value);
        BindingSet { bindings: Arc::new(map) }
    }

    /// Copy of this set without any of `names`
    pub fn without<S>(&self, names: &HashSet<S>) -> Self
    where
        S: std::hash::Hash + Eq + std::borrow::Borrow<str>,
    {
        self.filtered(|name| !names.contains(name))
    }

    /// Copy of this set restricted to `names`
    pub fn retain<S>(&self, names: &HashSet<S>) -> Self
    where
        S: std::hash::Hash + Eq + std::borrow::Borrow<str>,
    {
        self.filtered(|name| names.contains(name))
    }

    fn filtered(&self, keep: impl Fn(&str) -> bool) -> Self {
        if self.bindings.keys().all(|k| keep(k.as_str())) {
            return self.clone();
        }
        BindingSet {
            bindings: Arc::new(
                self.bindings
                    .iter()
                    .filter(|(k, _)| keep(k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
        }
    }

    /// Two binding sets are compatible iff they agree on every shared variable
    pub fn is_compatible(&self, other: &BindingSet) -> bool {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small
            .iter()
            .all(|(name, value)| large.get(name).map_or(true, |v| v == value))
    }

    /// Whether the two sets bind at least one variable name in common
    pub fn shares_variable(&self, other: &BindingSet) -> bool {
        self.names().any(|name| other.has_binding(name))
    }

    /// Union of two compatible sets, `None` if they conflict
    pub fn merge(&self, other: &BindingSet) -> Option<BindingSet> {
        if !self.is_compatible(other) {
            return None;
        }
        if other.is_empty() {
            return Some(self.clone());
        }
        if self.is_empty() {
            return Some(other.clone());
        }
        let mut map = (*self.bindings).clone();
        for (name, value) in other.iter() {
            map.entry(name.to_string()).or_insert_with(|| value.clone());
        }
        Some(BindingSet { bindings: Arc::new(map) })
    }
}

impl fmt::Debug for BindingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.bindings.iter().map(|(k, v)| (format!("?{k}"), v.to_string())))
            .finish()
    }
}

impl fmt::Display for BindingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            write!(f, "{name}={value}")?;
        }
        write!(f, "]")
    }
}

impl<N: Into<String>> FromIterator<(N, Value)> for BindingSet {
    fn from_iter<T: IntoIterator<Item = (N, Value)>>(iter: T) -> Self {
        BindingSet::from_pairs(iter)
    }
}
