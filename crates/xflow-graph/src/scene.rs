//! Scene document format for saving/loading xflow graphs.
//!
//! Uses RON (Rust Object Notation) for a human-readable description of the
//! input and data nodes, their wiring and their filter/compute attributes.
//! Node ids in a document are local to it; `to_graph` reports how they map
//! onto the ids of the constructed graph.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use xflow_core::{FilterType, NodeId};
use xflow_observer::{BufferEntry, BufferSnapshot, DataBuffer};

use crate::graph::{Graph, GraphError};
use crate::node::Node;

/// Current document format version
pub const SCENE_VERSION: u32 = 1;

/// An input node in the document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneInput {
    /// Document-local id, shared with data nodes
    pub id: usize,

    pub name: String,

    #[serde(default)]
    pub seqnr: u32,

    #[serde(default)]
    pub param: bool,

    /// Inline buffer contents
    #[serde(default)]
    pub data: Option<BufferSnapshot>,
}

/// A data node in the document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneDataNode {
    /// Document-local id, shared with inputs
    pub id: usize,

    #[serde(default)]
    pub children: Vec<usize>,

    #[serde(default)]
    pub source: Option<usize>,

    #[serde(default)]
    pub proto: Option<usize>,

    #[serde(default)]
    pub prototype: bool,

    /// Filter attribute, e.g. `keep(position, normal)`
    #[serde(default)]
    pub filter: Option<String>,

    /// Filter type of a node whose filter has no mapping
    #[serde(default)]
    pub filter_type: Option<FilterType>,

    /// Compute attribute, e.g. `position=xflow.morph(position, posAdd, weight)`
    #[serde(default)]
    pub compute: Option<String>,
}

/// Top-level scene document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDocument {
    /// Format version for future compatibility
    pub version: u32,

    /// Human-readable scene name
    pub name: String,

    #[serde(default)]
    pub inputs: Vec<SceneInput>,

    #[serde(default)]
    pub nodes: Vec<SceneDataNode>,
}

/// Graph built from a document, with the id translation
pub struct SceneGraph {
    pub graph: Graph,
    pub ids: HashMap<usize, NodeId>,
}

impl SceneGraph {
    /// Graph id of a document id
    #[must_use]
    pub fn node_id(&self, document_id: usize) -> Option<NodeId> {
        self.ids.get(&document_id).copied()
    }

    /// Graph id of the first input named `name`
    #[must_use]
    pub fn input_named(&self, name: &str) -> Option<NodeId> {
        self.graph.node_ids().into_iter().find(|&id| {
            self.graph
                .input(id)
                .is_ok_and(|input| input.name() == name)
        })
    }
}

impl SceneDocument {
    /// Create a new empty document
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: SCENE_VERSION,
            name: name.into(),
            inputs: Vec::new(),
            nodes: Vec::new(),
        }
    }

    /// Save the document to a RON file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be written or serialization fails
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SceneError> {
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| SceneError::SerializationFailed(e.to_string()))?;

        std::fs::write(path.as_ref(), ron_string)
            .map_err(|e| SceneError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Load a document from a RON file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, deserialization fails or the
    /// version is newer than this crate understands
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SceneError> {
        let ron_string = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SceneError::IoError(e.to_string()))?;
        Self::from_ron(&ron_string)
    }

    /// Parse a document from RON text
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails or the version is unsupported
    pub fn from_ron(text: &str) -> Result<Self, SceneError> {
        let document: Self =
            ron::from_str(text).map_err(|e| SceneError::DeserializationFailed(e.to_string()))?;

        if document.version > SCENE_VERSION {
            return Err(SceneError::UnsupportedVersion(document.version));
        }

        Ok(document)
    }

    /// Describe an existing graph
    ///
    /// Document ids are the graph's node indices.
    ///
    /// # Errors
    ///
    /// Returns error if an input references a buffer that cannot be
    /// snapshotted
    pub fn from_graph(graph: &Graph, name: impl Into<String>) -> Result<Self, SceneError> {
        let mut document = Self::new(name);

        for id in graph.node_ids() {
            match graph.node(id) {
                Some(Node::Input(input)) => {
                    let data = match input.data() {
                        Some(buffer) => Some(buffer.snapshot().ok_or_else(|| {
                            SceneError::InvalidData(format!(
                                "Input {id} references a buffer that cannot be serialized"
                            ))
                        })?),
                        None => None,
                    };
                    document.inputs.push(SceneInput {
                        id: id.index(),
                        name: input.name().to_string(),
                        seqnr: input.seqnr(),
                        param: input.param(),
                        data,
                    });
                }
                Some(Node::Data(node)) => {
                    let (filter, filter_type) = if node.filter_mapping().is_empty() {
                        let filter_type = node.filter_type();
                        (None, (filter_type != FilterType::default()).then_some(filter_type))
                    } else {
                        let filter = format!("{}({})", node.filter_type(), node.filter_mapping());
                        (Some(filter), None)
                    };
                    let compute = (!node.compute_operator().is_empty()).then(|| {
                        let output = node.compute_output_mapping();
                        let call = format!(
                            "{}({})",
                            node.compute_operator(),
                            node.compute_input_mapping()
                        );
                        if output.is_empty() {
                            call
                        } else {
                            format!("({output})={call}")
                        }
                    });
                    document.nodes.push(SceneDataNode {
                        id: id.index(),
                        children: node.children().iter().copied().map(NodeId::index).collect(),
                        source: node.source_node().map(NodeId::index),
                        proto: node.proto_node().map(NodeId::index),
                        prototype: node.prototype(),
                        filter,
                        filter_type,
                        compute,
                    });
                }
                None => {}
            }
        }

        Ok(document)
    }

    /// Build a graph from this document
    ///
    /// The returned graph starts in a clean epoch: the modifications caused
    /// by construction are flushed.
    ///
    /// # Errors
    ///
    /// Returns error on duplicate ids, dangling references, malformed
    /// buffers, or references the graph rejects
    pub fn to_graph(&self) -> Result<SceneGraph, SceneError> {
        let mut graph = Graph::new();
        let mut ids = HashMap::new();

        for input in &self.inputs {
            let id = graph.create_input_node();
            if ids.insert(input.id, id).is_some() {
                return Err(SceneError::InvalidData(format!(
                    "Duplicate node id {}",
                    input.id
                )));
            }
        }
        for node in &self.nodes {
            let id = graph.create_data_node();
            if ids.insert(node.id, id).is_some() {
                return Err(SceneError::InvalidData(format!(
                    "Duplicate node id {}",
                    node.id
                )));
            }
        }

        let lookup = |document_id: usize| {
            ids.get(&document_id).copied().ok_or_else(|| {
                SceneError::InvalidData(format!("Reference to unknown node {document_id}"))
            })
        };

        for input in &self.inputs {
            let id = lookup(input.id)?;
            graph.set_input_name(id, input.name.clone())?;
            graph.set_input_seqnr(id, input.seqnr)?;
            graph.set_input_param(id, input.param)?;
            if let Some(snapshot) = &input.data {
                let buffer = BufferEntry::new(snapshot.data_type, snapshot.values.clone())
                    .map_err(|e| SceneError::InvalidData(format!("Input {}: {e}", input.id)))?;
                graph.set_input_data(id, Some(Arc::new(buffer) as Arc<dyn DataBuffer>))?;
            }
        }

        for node in &self.nodes {
            let id = lookup(node.id)?;
            graph.set_prototype(id, node.prototype)?;
            if let Some(filter) = &node.filter {
                graph.set_filter(id, filter)?;
            }
            if let Some(filter_type) = node.filter_type {
                graph.set_filter_type(id, filter_type)?;
            }
            if let Some(compute) = &node.compute {
                graph.set_compute(id, compute)?;
            }
            if let Some(source) = node.source {
                graph.set_source_node(id, Some(lookup(source)?))?;
            }
            if let Some(proto) = node.proto {
                graph.set_proto_node(id, Some(lookup(proto)?))?;
            }
            for &child in &node.children {
                graph.append_child(id, lookup(child)?)?;
            }
        }

        graph.flush();
        tracing::debug!(
            "Built scene {:?}: {} inputs, {} data nodes",
            self.name,
            self.inputs.len(),
            self.nodes.len()
        );
        Ok(SceneGraph { graph, ids })
    }
}

/// Errors that can occur during scene operations
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Unsupported scene version: {0}")]
    UnsupportedVersion(u32),

    #[error("Invalid scene data: {0}")]
    InvalidData(String),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use xflow_core::DataType;

    fn morph_scene() -> SceneDocument {
        let mut document = SceneDocument::new("Morph");
        document.inputs.push(SceneInput {
            id: 0,
            name: "position".to_string(),
            seqnr: 0,
            param: false,
            data: Some(BufferSnapshot {
                data_type: DataType::Float3,
                values: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0],
            }),
        });
        document.inputs.push(SceneInput {
            id: 1,
            name: "weight".to_string(),
            seqnr: 0,
            param: true,
            data: Some(BufferSnapshot {
                data_type: DataType::Float,
                values: vec![0.5],
            }),
        });
        document.nodes.push(SceneDataNode {
            id: 10,
            children: vec![0, 1],
            compute: Some("position=xflow.morph(position, weight)".to_string()),
            ..SceneDataNode::default()
        });
        document.nodes.push(SceneDataNode {
            id: 11,
            children: vec![10],
            filter: Some("keep(position)".to_string()),
            ..SceneDataNode::default()
        });
        document
    }

    #[test]
    fn test_scene_creation() {
        let document = SceneDocument::new("Test Scene");
        assert_eq!(document.version, SCENE_VERSION);
        assert_eq!(document.name, "Test Scene");
        assert!(document.inputs.is_empty());
        assert!(document.nodes.is_empty());
    }

    #[test]
    fn test_to_graph_wires_nodes() {
        let mut scene = morph_scene().to_graph().unwrap();
        let morph = scene.node_id(10).unwrap();
        let mesh = scene.node_id(11).unwrap();
        let weight = scene.input_named("weight").unwrap();

        let graph = &scene.graph;
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.data(mesh).unwrap().children(), &[morph]);
        assert_eq!(graph.data(mesh).unwrap().filter_type(), FilterType::Keep);
        assert_eq!(graph.data(morph).unwrap().compute_operator(), "xflow.morph");
        assert!(graph.input(weight).unwrap().param());
        assert_eq!(graph.resolve(mesh).unwrap().names(), vec!["position"]);

        // Construction does not leak into the first epoch
        assert!(scene.graph.flush().is_empty());
    }

    #[test]
    fn test_to_graph_rejects_dangling_reference() {
        let mut document = morph_scene();
        document.nodes[1].children.push(99);
        assert!(matches!(
            document.to_graph(),
            Err(SceneError::InvalidData(_))
        ));
    }

    #[test]
    fn test_to_graph_rejects_duplicate_ids() {
        let mut document = morph_scene();
        document.nodes[1].id = 0;
        assert!(matches!(
            document.to_graph(),
            Err(SceneError::InvalidData(_))
        ));
    }

    #[test]
    fn test_to_graph_rejects_input_as_source() {
        let mut document = morph_scene();
        document.nodes[1].source = Some(0);
        assert!(matches!(
            document.to_graph(),
            Err(SceneError::Graph(GraphError::NotADataNode(_)))
        ));
    }

    #[test]
    fn test_from_graph_describes_configuration() {
        let scene = morph_scene().to_graph().unwrap();
        let document = SceneDocument::from_graph(&scene.graph, "Copy").unwrap();

        assert_eq!(document.inputs.len(), 2);
        assert_eq!(document.nodes.len(), 2);
        let morph = document
            .nodes
            .iter()
            .find(|node| node.compute.is_some())
            .unwrap();
        assert_eq!(
            morph.compute.as_deref(),
            Some("(position)=xflow.morph(position,weight)")
        );
        let mesh = document
            .nodes
            .iter()
            .find(|node| node.filter.is_some())
            .unwrap();
        assert_eq!(mesh.filter.as_deref(), Some("keep(position)"));
        assert_eq!(mesh.children, vec![morph.id]);

        // The description builds an equivalent graph
        let rebuilt = document.to_graph().unwrap();
        let rebuilt_mesh = rebuilt.node_id(mesh.id).unwrap();
        assert_eq!(
            rebuilt.graph.resolve(rebuilt_mesh).unwrap().names(),
            vec!["position"]
        );
    }

    #[test]
    fn test_filter_type_without_mapping_survives() {
        let mut graph = Graph::new();
        let plain = graph.create_data_node();
        let removing = graph.create_data_node();
        graph.set_filter_type(removing, FilterType::Remove).unwrap();

        let document = SceneDocument::from_graph(&graph, "Filters").unwrap();
        let described = |id: NodeId| {
            document
                .nodes
                .iter()
                .find(|node| node.id == id.index())
                .unwrap()
        };
        assert_eq!(described(plain).filter_type, None);
        assert_eq!(described(removing).filter_type, Some(FilterType::Remove));
        assert_eq!(described(removing).filter, None);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filters.ron");
        document.save(&path).unwrap();
        let rebuilt = SceneDocument::load(&path).unwrap().to_graph().unwrap();
        let rebuilt_removing = rebuilt.node_id(removing.index()).unwrap();
        let rebuilt_plain = rebuilt.node_id(plain.index()).unwrap();
        assert_eq!(
            rebuilt.graph.data(rebuilt_removing).unwrap().filter_type(),
            FilterType::Remove
        );
        assert_eq!(
            rebuilt.graph.data(rebuilt_plain).unwrap().filter_type(),
            FilterType::Keep
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.ron");
        let document = morph_scene();

        document.save(&path).unwrap();
        let loaded = SceneDocument::load(&path).unwrap();
        assert_eq!(loaded, document);
    }

    #[test]
    fn test_minimal_ron_uses_defaults() {
        let text = r#"(
            version: 1,
            name: "Minimal",
            inputs: [(id: 0, name: "position")],
            nodes: [(id: 1, children: [0])],
        )"#;
        let document = SceneDocument::from_ron(text).unwrap();
        assert_eq!(document.inputs[0].seqnr, 0);
        assert!(document.inputs[0].data.is_none());
        assert!(document.nodes[0].filter.is_none());
    }

    #[test]
    fn test_newer_version_rejected() {
        let text = r#"(version: 2, name: "Future")"#;
        assert!(matches!(
            SceneDocument::from_ron(text),
            Err(SceneError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            SceneDocument::load("/nonexistent/scene.ron"),
            Err(SceneError::IoError(_))
        ));
    }
}
