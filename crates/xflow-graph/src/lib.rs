//! Xflow dataflow graph.
//!
//! This crate provides the graph of input and data nodes, the filter and
//! compute mapping grammar, change propagation between nodes, resolution of
//! the data a node exposes, and RON scene documents.

pub mod graph;
pub mod mapping;
pub mod node;
pub mod resolve;
pub mod scene;

pub use graph::{Graph, GraphError};
pub use mapping::{ComputeSpec, FilterSpec, Mapping, NameMapping, NamePair, OrderMapping};
pub use node::{DataNode, InputNode, Node, ParentLinks, RequestId};
pub use resolve::{Channel, DataTable};
pub use scene::{SceneDataNode, SceneDocument, SceneError, SceneGraph, SceneInput};
