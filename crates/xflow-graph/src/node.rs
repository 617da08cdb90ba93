//! Graph node types.
//!
//! Both node kinds embed [`ParentLinks`], the bookkeeping of which data
//! nodes reference them. Nodes are only edited through `Graph`, which keeps
//! the links symmetric with the referencing slots.

use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use xflow_core::{FilterType, Modification, NodeId};
use xflow_observer::{DataBuffer, Request};

use crate::mapping::Mapping;

/// Handle of a request subscribed on a data node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub usize);

/// Data nodes referencing a node as child, source or prototype
///
/// This is a multiset: a parent holding two references to the node (for
/// example as source and as child) is recorded twice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParentLinks {
    parents: SmallVec<[NodeId; 2]>,
}

impl ParentLinks {
    pub(crate) fn add(&mut self, parent: NodeId) {
        self.parents.push(parent);
    }

    /// Remove one occurrence of `parent`
    pub(crate) fn remove(&mut self, parent: NodeId) -> bool {
        if let Some(pos) = self.parents.iter().position(|&id| id == parent) {
            self.parents.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.parents.iter().copied()
    }

    #[must_use]
    pub fn contains(&self, parent: NodeId) -> bool {
        self.parents.contains(&parent)
    }

    /// How many references `parent` holds to the node
    #[must_use]
    pub fn count(&self, parent: NodeId) -> usize {
        self.parents.iter().filter(|&&id| id == parent).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    /// Owned copy of the links, for iterating while the graph is edited
    pub(crate) fn snapshot(&self) -> SmallVec<[NodeId; 2]> {
        self.parents.clone()
    }
}

/// Leaf node holding one named data channel
pub struct InputNode {
    pub(crate) links: ParentLinks,
    pub(crate) name: String,
    pub(crate) seqnr: u32,
    pub(crate) data: Option<Arc<dyn DataBuffer>>,
    pub(crate) param: bool,
}

impl InputNode {
    pub(crate) fn new() -> Self {
        Self {
            links: ParentLinks::default(),
            name: String::new(),
            seqnr: 0,
            data: None,
            param: false,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordering hint among inputs sharing a name
    #[must_use]
    pub fn seqnr(&self) -> u32 {
        self.seqnr
    }

    #[must_use]
    pub fn data(&self) -> Option<&Arc<dyn DataBuffer>> {
        self.data.as_ref()
    }

    /// Whether the channel is an operator/shader parameter rather than bulk data
    #[must_use]
    pub fn param(&self) -> bool {
        self.param
    }

    #[must_use]
    pub fn parents(&self) -> &ParentLinks {
        &self.links
    }
}

impl fmt::Debug for InputNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputNode")
            .field("name", &self.name)
            .field("seqnr", &self.seqnr)
            .field("param", &self.param)
            .field("has_data", &self.data.is_some())
            .field("parents", &self.links)
            .finish()
    }
}

/// Composite node aggregating children, a source and a prototype
pub struct DataNode {
    pub(crate) links: ParentLinks,
    pub(crate) children: Vec<NodeId>,
    pub(crate) source_node: Option<NodeId>,
    pub(crate) proto_node: Option<NodeId>,
    pub(crate) prototype: bool,
    pub(crate) filter_type: FilterType,
    pub(crate) filter_mapping: Mapping,
    pub(crate) compute_operator: String,
    pub(crate) compute_input_mapping: Mapping,
    pub(crate) compute_output_mapping: Mapping,
    pub(crate) state: Modification,
    pub(crate) requests: Vec<(RequestId, Box<dyn Request>)>,
}

impl DataNode {
    pub(crate) fn new(id: NodeId) -> Self {
        Self {
            links: ParentLinks::default(),
            children: Vec::new(),
            source_node: None,
            proto_node: None,
            prototype: false,
            filter_type: FilterType::default(),
            filter_mapping: Mapping::empty(id),
            compute_operator: String::new(),
            compute_input_mapping: Mapping::empty(id),
            compute_output_mapping: Mapping::empty(id),
            state: Modification::None,
            requests: Vec::new(),
        }
    }

    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    #[must_use]
    pub fn source_node(&self) -> Option<NodeId> {
        self.source_node
    }

    #[must_use]
    pub fn proto_node(&self) -> Option<NodeId> {
        self.proto_node
    }

    /// Whether this node may serve as another node's prototype
    #[must_use]
    pub fn prototype(&self) -> bool {
        self.prototype
    }

    #[must_use]
    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    #[must_use]
    pub fn filter_mapping(&self) -> &Mapping {
        &self.filter_mapping
    }

    #[must_use]
    pub fn compute_operator(&self) -> &str {
        &self.compute_operator
    }

    #[must_use]
    pub fn compute_input_mapping(&self) -> &Mapping {
        &self.compute_input_mapping
    }

    #[must_use]
    pub fn compute_output_mapping(&self) -> &Mapping {
        &self.compute_output_mapping
    }

    /// Highest modification seen since the last flush
    #[must_use]
    pub fn state(&self) -> Modification {
        self.state
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    #[must_use]
    pub fn parents(&self) -> &ParentLinks {
        &self.links
    }

    /// Number of slots (children, source, proto) referencing `child`
    #[must_use]
    pub fn reference_count(&self, child: NodeId) -> usize {
        self.children.iter().filter(|&&id| id == child).count()
            + usize::from(self.source_node == Some(child))
            + usize::from(self.proto_node == Some(child))
    }
}

impl fmt::Debug for DataNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataNode")
            .field("children", &self.children)
            .field("source_node", &self.source_node)
            .field("proto_node", &self.proto_node)
            .field("prototype", &self.prototype)
            .field("filter_type", &self.filter_type)
            .field("filter_mapping", &self.filter_mapping)
            .field("compute_operator", &self.compute_operator)
            .field("state", &self.state)
            .field("requests", &self.requests.len())
            .field("parents", &self.links)
            .finish()
    }
}

/// A node owned by the graph
#[derive(Debug)]
pub enum Node {
    Input(InputNode),
    Data(DataNode),
}

impl Node {
    #[must_use]
    pub fn parents(&self) -> &ParentLinks {
        match self {
            Self::Input(node) => &node.links,
            Self::Data(node) => &node.links,
        }
    }

    pub(crate) fn links_mut(&mut self) -> &mut ParentLinks {
        match self {
            Self::Input(node) => &mut node.links,
            Self::Data(node) => &mut node.links,
        }
    }

    #[must_use]
    pub fn as_input(&self) -> Option<&InputNode> {
        match self {
            Self::Input(node) => Some(node),
            Self::Data(_) => None,
        }
    }

    #[must_use]
    pub fn as_data(&self) -> Option<&DataNode> {
        match self {
            Self::Data(node) => Some(node),
            Self::Input(_) => None,
        }
    }

    #[must_use]
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_links_are_a_multiset() {
        let mut links = ParentLinks::default();
        links.add(NodeId(1));
        links.add(NodeId(2));
        links.add(NodeId(1));
        assert_eq!(links.count(NodeId(1)), 2);

        assert!(links.remove(NodeId(1)));
        assert_eq!(links.count(NodeId(1)), 1);
        assert!(links.contains(NodeId(2)));
        assert!(!links.remove(NodeId(9)));
        assert_eq!(links.len(), 2);
    }

    #[test]
    fn test_parent_links_snapshot_is_detached() {
        let mut links = ParentLinks::default();
        links.add(NodeId(3));
        links.add(NodeId(5));
        let snapshot = links.snapshot();

        links.remove(NodeId(3));
        assert_eq!(snapshot.as_slice(), &[NodeId(3), NodeId(5)]);
        assert_eq!(links.iter().collect::<Vec<_>>(), vec![NodeId(5)]);
    }

    #[test]
    fn test_new_data_node_defaults() {
        let node = DataNode::new(NodeId(4));
        assert_eq!(node.filter_type(), FilterType::Keep);
        assert!(node.filter_mapping().is_empty());
        assert_eq!(node.filter_mapping().owner(), Some(NodeId(4)));
        assert_eq!(node.compute_input_mapping().owner(), Some(NodeId(4)));
        assert_eq!(node.compute_output_mapping().owner(), Some(NodeId(4)));
        assert!(node.compute_operator().is_empty());
        assert_eq!(node.state(), Modification::None);
        assert!(!node.prototype());
    }

    #[test]
    fn test_reference_count_covers_every_slot() {
        let mut node = DataNode::new(NodeId(0));
        node.children = vec![NodeId(1), NodeId(2), NodeId(1)];
        node.source_node = Some(NodeId(1));
        node.proto_node = Some(NodeId(2));
        assert_eq!(node.reference_count(NodeId(1)), 3);
        assert_eq!(node.reference_count(NodeId(2)), 2);
        assert_eq!(node.reference_count(NodeId(3)), 0);
    }
}
