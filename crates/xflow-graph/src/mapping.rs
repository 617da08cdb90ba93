//! Channel mappings and the filter/compute string grammars.
//!
//! A mapping associates data channel names with positions (an order
//! mapping, written `a,b,c`) or with other names (a name mapping, written
//! `{dest: src, ...}`). Filter and compute attributes embed a mapping body:
//!
//! ```text
//! filter  := ("keep" | "remove" | "rename") "(" body ")"
//! compute := [output "="] operator "(" [body] ")"
//! ```
//!
//! A parenthesized output (`(x,y)=op(a)`) loses one layer of parens before
//! it is parsed. Parsing is best effort: anything that does not match
//! degrades to an empty order mapping instead of failing.

use std::fmt;
use xflow_core::{FilterType, NodeId};

/// Ordered list of channel names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderMapping {
    owner: Option<NodeId>,
    names: Vec<String>,
}

impl OrderMapping {
    #[must_use]
    pub fn new(names: Vec<String>) -> Self {
        Self { owner: None, names }
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// One `dest: src` association
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamePair {
    pub dest: String,
    pub src: String,
}

/// Set of `dest: src` associations, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameMapping {
    owner: Option<NodeId>,
    pairs: Vec<NamePair>,
}

impl NameMapping {
    #[must_use]
    pub fn new(pairs: Vec<NamePair>) -> Self {
        Self { owner: None, pairs }
    }

    #[must_use]
    pub fn pairs(&self) -> &[NamePair] {
        &self.pairs
    }

    /// Destination name given to `src`, if it is mapped
    #[must_use]
    pub fn dest_for(&self, src: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|pair| pair.src == src)
            .map(|pair| pair.dest.as_str())
    }
}

/// Association between channel names and positions or other names
///
/// A mapping installed on a data node records that node as its owner. When
/// the node replaces the mapping, the displaced one is handed back with
/// the owner cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mapping {
    Order(OrderMapping),
    Name(NameMapping),
}

impl Default for Mapping {
    fn default() -> Self {
        Self::Order(OrderMapping::default())
    }
}

impl Mapping {
    /// Empty order mapping owned by `owner`
    #[must_use]
    pub fn empty(owner: NodeId) -> Self {
        let mut mapping = Self::default();
        mapping.set_owner(Some(owner));
        mapping
    }

    /// Parse a mapping body
    ///
    /// Returns `None` when the body matches neither grammar.
    #[must_use]
    pub fn parse(body: &str) -> Option<Self> {
        let body = body.trim();
        if let Some(names) = parse_order(body) {
            return Some(Self::Order(OrderMapping::new(names)));
        }
        let inner = body.strip_prefix('{')?.strip_suffix('}')?;
        parse_pairs(inner).map(|pairs| Self::Name(NameMapping::new(pairs)))
    }

    #[must_use]
    pub fn owner(&self) -> Option<NodeId> {
        match self {
            Self::Order(mapping) => mapping.owner,
            Self::Name(mapping) => mapping.owner,
        }
    }

    pub(crate) fn set_owner(&mut self, owner: Option<NodeId>) {
        match self {
            Self::Order(mapping) => mapping.owner = owner,
            Self::Name(mapping) => mapping.owner = owner,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Order(mapping) => mapping.names.len(),
            Self::Name(mapping) => mapping.pairs.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names on the destination side, in order
    ///
    /// For an order mapping these are simply its names.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries().into_iter().map(|(dest, _)| dest).collect()
    }

    /// `(dest, src)` pairs in order; order mappings map each name to itself
    #[must_use]
    pub fn entries(&self) -> Vec<(&str, &str)> {
        match self {
            Self::Order(mapping) => mapping
                .names
                .iter()
                .map(|name| (name.as_str(), name.as_str()))
                .collect(),
            Self::Name(mapping) => mapping
                .pairs
                .iter()
                .map(|pair| (pair.dest.as_str(), pair.src.as_str()))
                .collect(),
        }
    }
}

impl fmt::Display for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Order(mapping) => f.write_str(&mapping.names.join(",")),
            Self::Name(mapping) => {
                let pairs: Vec<String> = mapping
                    .pairs
                    .iter()
                    .map(|pair| format!("{}:{}", pair.dest, pair.src))
                    .collect();
                write!(f, "{{{}}}", pairs.join(","))
            }
        }
    }
}

/// `a,b,c`: every item non-empty and free of `:,{}`
fn parse_order(body: &str) -> Option<Vec<String>> {
    if body.is_empty() || body.contains(['{', '}', ':']) {
        return None;
    }
    let names: Vec<String> = body.split(',').map(|item| item.trim().to_string()).collect();
    if names.iter().any(String::is_empty) {
        return None;
    }
    Some(names)
}

/// `dest: src, ...` without the surrounding braces
fn parse_pairs(inner: &str) -> Option<Vec<NamePair>> {
    if inner.contains(['{', '}']) {
        return None;
    }
    inner
        .split(',')
        .map(|item| {
            let (dest, src) = item.split_once(':')?;
            let (dest, src) = (dest.trim(), src.trim());
            if dest.is_empty() || src.is_empty() || src.contains(':') {
                return None;
            }
            Some(NamePair {
                dest: dest.to_string(),
                src: src.to_string(),
            })
        })
        .collect()
}

/// Result of parsing a filter attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSpec {
    pub filter_type: FilterType,
    pub mapping: Option<Mapping>,
}

/// Parse `type(body)`; unknown or missing types fall back to rename
#[must_use]
pub fn parse_filter(filter: &str) -> FilterSpec {
    let mut spec = FilterSpec {
        filter_type: FilterType::Rename,
        mapping: None,
    };
    let filter = filter.trim();
    let Some((keyword, rest)) = filter.split_once('(') else {
        return spec;
    };
    let Some(body) = rest.strip_suffix(')') else {
        return spec;
    };
    if !keyword.chars().all(|c| c.is_ascii_alphabetic())
        || body.is_empty()
        || body.contains(['(', ')'])
    {
        return spec;
    }
    if let Some(filter_type) = FilterType::from_keyword(keyword) {
        spec.filter_type = filter_type;
    }
    spec.mapping = Mapping::parse(body);
    spec
}

/// Result of parsing a compute attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeSpec {
    pub operator: String,
    pub input: Option<Mapping>,
    pub output: Option<Mapping>,
}

/// Parse `[output=]operator(input)`
///
/// An unmatched string yields an empty operator and no mappings.
#[must_use]
pub fn parse_compute(compute: &str) -> ComputeSpec {
    let compute = compute.trim();
    let matched = compute
        .split_once('=')
        .and_then(|(output, call)| {
            if output.is_empty() {
                return None;
            }
            split_call(call).map(|(operator, input)| (output, operator, input))
        })
        .or_else(|| split_call(compute).map(|(operator, input)| ("", operator, input)));

    let Some((output, operator, input)) = matched else {
        return ComputeSpec {
            operator: String::new(),
            input: None,
            output: None,
        };
    };

    let output = output.trim();
    let output = output
        .strip_prefix('(')
        .and_then(|inner| inner.strip_suffix(')'))
        .filter(|inner| !inner.contains(['(', ')']))
        .unwrap_or(output);

    ComputeSpec {
        operator: operator.trim().to_string(),
        input: Mapping::parse(input),
        output: Mapping::parse(output),
    }
}

/// `operator(input)` with a non-empty operator and a paren-free input
fn split_call(call: &str) -> Option<(&str, &str)> {
    let (operator, rest) = call.split_once('(')?;
    let input = rest.strip_suffix(')')?;
    if operator.is_empty() || input.contains(['(', ')']) {
        return None;
    }
    Some((operator, input))
}
