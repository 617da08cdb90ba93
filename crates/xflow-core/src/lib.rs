//! Core types shared across the xflow crates.
//!
//! This crate provides the identifiers and enumerations every other xflow
//! crate depends on: node ids, change severities, filter types and the
//! data types carried by input buffers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a node inside a `Graph`
///
/// Ids are handed out by the graph that created the node and are never
/// reused within that graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl NodeId {
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Severity of a modification, ordered from least to most severe
///
/// A data node keeps the highest severity it has seen since the last
/// flush. A notification is only forwarded when it raises that level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Modification {
    /// Nothing changed since the last flush
    #[default]
    None = 0,
    /// Only the payload of an input buffer changed
    DataChanged = 1,
    /// Topology or node configuration changed
    StructureChanged = 2,
}

impl Modification {
    /// Whether a node currently at `self` accepts an incoming `change`
    #[inline]
    #[must_use]
    pub fn is_raised_by(self, change: Self) -> bool {
        change > self
    }
}

/// Filter applied to the data a node exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FilterType {
    /// Keep only the provided names
    #[default]
    Keep,
    /// Remove the provided names (name mappings contribute their source side)
    Remove,
    /// Only apply the name mapping
    Rename,
}

impl FilterType {
    /// Parse the keyword used in filter strings and markup
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "keep" => Some(Self::Keep),
            "remove" => Some(Self::Remove),
            "rename" => Some(Self::Rename),
            _ => None,
        }
    }

    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Keep => "keep",
            Self::Remove => "remove",
            Self::Rename => "rename",
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Signal delivered to requests subscribed on a data node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RequestNotification {
    /// The node's resolved data must be requested again
    ChangedStructure,
}

/// Element type of an input buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Float,
    Float2,
    Float3,
    Float4,
    Float4x4,
    Int,
    Int4,
    Bool,
}

impl DataType {
    /// Number of scalar values that make up one element
    #[must_use]
    pub const fn tuple_size(self) -> usize {
        match self {
            Self::Float | Self::Int | Self::Bool => 1,
            Self::Float2 => 2,
            Self::Float3 => 3,
            Self::Float4 | Self::Int4 => 4,
            Self::Float4x4 => 16,
        }
    }
}

/// Common error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Buffer contents do not match the declared element type
    #[error("Buffer error: {0}")]
    Buffer(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;
