//! Diagnostic tallies recorded by the passes.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// What a tally entry counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Inplacifier rewrites, keyed `inplace` or `out`.
    Optimizations,
    /// Mutations the functionalizer could not remove, keyed by long name.
    Mutation,
    /// Mutations of graph inputs, left in place by the functionalizer.
    InputMutation,
    /// Nodes producing a non-tensor value, keyed by long name.
    Nontensor,
    /// `dtype`/`device` reads folded into literals.
    ResolvedGetattr,
    /// Other attribute reads through `getattr`.
    Getattr,
    /// True divisions left as operator calls because an operand is a scalar literal.
    UnconvertedDivision,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Optimizations => "optimizations",
            Category::Mutation => "mutation",
            Category::InputMutation => "input_mutation",
            Category::Nontensor => "nontensor",
            Category::ResolvedGetattr => "resolved_getattr",
            Category::Getattr => "getattr",
            Category::UnconvertedDivision => "unconverted_division",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of the in-place rewrite tally under [`Category::Optimizations`].
pub const INPLACE: &str = "inplace";

/// Key of the output-buffer rewrite tally under [`Category::Optimizations`].
pub const OUT: &str = "out";

/// Two-level tally: category, then key, then count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Counters {
    counts: BTreeMap<Category, BTreeMap<String, usize>>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&mut self, category: Category, key: impl Into<String>) {
        *self
            .counts
            .entry(category)
            .or_default()
            .entry(key.into())
            .or_insert(0) += 1;
    }

    pub fn get(&self, category: Category, key: &str) -> usize {
        self.counts
            .get(&category)
            .and_then(|keys| keys.get(key))
            .copied()
            .unwrap_or(0)
    }

    /// Sum over every key of `category`.
    pub fn total(&self, category: Category) -> usize {
        self.counts
            .get(&category)
            .map_or(0, |keys| keys.values().sum())
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, &str, usize)> + '_ {
        self.counts.iter().flat_map(|(category, keys)| {
            keys.iter()
                .map(move |(key, count)| (*category, key.as_str(), *count))
        })
    }

    /// Adds every tally of `other` into `self`.
    pub fn merge(&mut self, other: &Counters) {
        for (category, key, count) in other.iter() {
            *self
                .counts
                .entry(category)
                .or_default()
                .entry(key.to_string())
                .or_insert(0) += count;
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (category, key, count) in self.iter() {
            writeln!(f, "{category:<22} {key:<40} {count}")?;
        }
        Ok(())
    }
}
