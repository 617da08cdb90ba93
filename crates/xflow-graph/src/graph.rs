//! Xflow dataflow graph.

use std::collections::HashMap;
use std::sync::Arc;
use xflow_core::{FilterType, Modification, NodeId, RequestNotification};
use xflow_observer::{ComputeCache, DataBuffer, Request};

use crate::mapping::{self, Mapping};
use crate::node::{DataNode, InputNode, Node, RequestId};

/// Errors raised by graph edits
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("Node {0} not found")]
    UnknownNode(NodeId),

    #[error("Node {0} is not a data node")]
    NotADataNode(NodeId),

    #[error("Node {0} is not an input node")]
    NotAnInputNode(NodeId),

    #[error("Node {child} is not a child of {parent}")]
    NotAChild { parent: NodeId, child: NodeId },

    #[error("Node {0} cannot reference itself")]
    SelfReference(NodeId),

    #[error("Cycle detected through node {0}")]
    Cycle(NodeId),

    #[error("Request {request:?} is not subscribed on node {node}")]
    UnknownRequest { node: NodeId, request: RequestId },

    #[error("Attribute {0} is read-only")]
    ReadOnly(String),

    #[error("Unknown attribute {attribute} on node {node}")]
    UnknownAttribute { node: NodeId, attribute: String },

    #[error("Invalid value {value:?} for attribute {attribute}")]
    InvalidValue { attribute: String, value: String },
}

/// The dataflow graph
///
/// Owns every node it creates and performs all edits, so the parent links
/// of a node always mirror the slots referencing it. Nodes are never removed
/// from the graph; `detach_from_parents` only unwires them.
pub struct Graph {
    pub(crate) nodes: HashMap<NodeId, Node>,
    next_id: usize,
    next_request_id: usize,
    compute_cache: Option<Box<dyn ComputeCache>>,
}

impl Graph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            next_id: 0,
            next_request_id: 0,
            compute_cache: None,
        }
    }

    /// Install the hook invalidated on every accepted state transition
    ///
    /// Returns the previously installed hook.
    pub fn set_compute_cache(
        &mut self,
        cache: Box<dyn ComputeCache>,
    ) -> Option<Box<dyn ComputeCache>> {
        self.compute_cache.replace(cache)
    }

    /// Create a new input node
    pub fn create_input_node(&mut self) -> NodeId {
        let id = self.allocate_id();
        self.nodes.insert(id, Node::Input(InputNode::new()));
        tracing::debug!("Created input node {}", id);
        id
    }

    /// Create a new data node with empty mappings
    pub fn create_data_node(&mut self) -> NodeId {
        let id = self.allocate_id();
        self.nodes.insert(id, Node::Data(DataNode::new(id)));
        tracing::debug!("Created data node {}", id);
        id
    }

    fn allocate_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    // ------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn input(&self, id: NodeId) -> Result<&InputNode, GraphError> {
        match self.nodes.get(&id) {
            Some(Node::Input(node)) => Ok(node),
            Some(Node::Data(_)) => Err(GraphError::NotAnInputNode(id)),
            None => Err(GraphError::UnknownNode(id)),
        }
    }

    pub fn data(&self, id: NodeId) -> Result<&DataNode, GraphError> {
        match self.nodes.get(&id) {
            Some(Node::Data(node)) => Ok(node),
            Some(Node::Input(_)) => Err(GraphError::NotADataNode(id)),
            None => Err(GraphError::UnknownNode(id)),
        }
    }

    /// All nodes, in no particular order
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().map(|(&id, node)| (id, node))
    }

    /// All node ids in creation order
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Current modification level of a data node
    pub fn state(&self, id: NodeId) -> Result<Modification, GraphError> {
        self.data(id).map(DataNode::state)
    }

    fn input_mut(&mut self, id: NodeId) -> Result<&mut InputNode, GraphError> {
        match self.nodes.get_mut(&id) {
            Some(Node::Input(node)) => Ok(node),
            Some(Node::Data(_)) => Err(GraphError::NotAnInputNode(id)),
            None => Err(GraphError::UnknownNode(id)),
        }
    }

    fn data_mut(&mut self, id: NodeId) -> Result<&mut DataNode, GraphError> {
        match self.nodes.get_mut(&id) {
            Some(Node::Data(node)) => Ok(node),
            Some(Node::Input(_)) => Err(GraphError::NotADataNode(id)),
            None => Err(GraphError::UnknownNode(id)),
        }
    }

    /// Validate a prospective `parent -> child` reference
    fn check_reference(&self, parent: NodeId, child: NodeId) -> Result<(), GraphError> {
        self.data(parent)?;
        if !self.contains(child) {
            return Err(GraphError::UnknownNode(child));
        }
        if parent == child {
            return Err(GraphError::SelfReference(parent));
        }
        Ok(())
    }

    fn add_parent(&mut self, parent: NodeId, child: NodeId) {
        if let Some(node) = self.nodes.get_mut(&child) {
            node.links_mut().add(parent);
        }
    }

    fn remove_parent(&mut self, parent: NodeId, child: NodeId) {
        if let Some(node) = self.nodes.get_mut(&child) {
            node.links_mut().remove(parent);
        }
    }

    // ------------------------------------------------------------------
    // Input nodes
    // ------------------------------------------------------------------

    /// Rename an input; always a structural change for its parents
    pub fn set_input_name(
        &mut self,
        id: NodeId,
        name: impl Into<String>,
    ) -> Result<(), GraphError> {
        self.input_mut(id)?.name = name.into();
        self.notify_parents(id, Modification::StructureChanged, None);
        Ok(())
    }

    pub fn set_input_seqnr(&mut self, id: NodeId, seqnr: u32) -> Result<(), GraphError> {
        self.input_mut(id)?.seqnr = seqnr;
        self.notify_parents(id, Modification::StructureChanged, None);
        Ok(())
    }

    pub fn set_input_param(&mut self, id: NodeId, param: bool) -> Result<(), GraphError> {
        self.input_mut(id)?.param = param;
        self.notify_parents(id, Modification::StructureChanged, None);
        Ok(())
    }

    /// Point an input at a new buffer (or none)
    ///
    /// The input leaves the listener set of the old buffer and joins the
    /// new one. Parents see a data change carrying the input's name.
    pub fn set_input_data(
        &mut self,
        id: NodeId,
        data: Option<Arc<dyn DataBuffer>>,
    ) -> Result<(), GraphError> {
        let input = self.input_mut(id)?;
        if let Some(old) = input.data.take() {
            old.remove_listener(id);
        }
        if let Some(new) = &data {
            new.add_listener(id);
        }
        input.data = data;
        let name = input.name.clone();
        self.notify_parents(id, Modification::DataChanged, Some(&name));
        Ok(())
    }

    /// Deliver an external update of `buffer` to every input listening on it
    ///
    /// Listener ids that do not belong to an input of this graph holding
    /// `buffer` are skipped. Returns the number of inputs notified.
    pub fn buffer_changed(&mut self, buffer: &dyn DataBuffer) -> usize {
        let mut notified = 0;
        for listener in buffer.listeners() {
            let name = match self.nodes.get(&listener) {
                Some(Node::Input(input))
                    if input.data.as_ref().is_some_and(|data| {
                        std::ptr::addr_eq(Arc::as_ptr(data), std::ptr::from_ref(buffer))
                    }) =>
                {
                    input.name.clone()
                }
                _ => continue,
            };
            self.notify_parents(listener, Modification::DataChanged, Some(&name));
            notified += 1;
        }
        notified
    }

    // ------------------------------------------------------------------
    // Data nodes: structure
    // ------------------------------------------------------------------

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), GraphError> {
        self.check_reference(parent, child)?;
        self.data_mut(parent)?.children.push(child);
        self.add_parent(parent, child);
        tracing::debug!("Appended {} to {}", child, parent);
        self.propagate(parent, Modification::StructureChanged, None);
        Ok(())
    }

    /// Insert `child` before `before`, or append when `before` is not a child
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        before: NodeId,
    ) -> Result<(), GraphError> {
        self.check_reference(parent, child)?;
        let node = self.data_mut(parent)?;
        match node.children.iter().position(|&id| id == before) {
            Some(idx) => node.children.insert(idx, child),
            None => {
                tracing::debug!(
                    "{} is not a child of {}, appending {} instead",
                    before,
                    parent,
                    child
                );
                node.children.push(child);
            }
        }
        self.add_parent(parent, child);
        self.propagate(parent, Modification::StructureChanged, None);
        Ok(())
    }

    /// Remove the first occurrence of `child`
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), GraphError> {
        let node = self.data_mut(parent)?;
        let pos = node
            .children
            .iter()
            .position(|&id| id == child)
            .ok_or(GraphError::NotAChild { parent, child })?;
        node.children.remove(pos);
        self.remove_parent(parent, child);
        tracing::debug!("Removed {} from {}", child, parent);
        self.propagate(parent, Modification::StructureChanged, None);
        Ok(())
    }

    pub fn clear_children(&mut self, parent: NodeId) -> Result<(), GraphError> {
        let children = std::mem::take(&mut self.data_mut(parent)?.children);
        for &child in &children {
            self.remove_parent(parent, child);
        }
        tracing::debug!("Cleared {} children of {}", children.len(), parent);
        self.propagate(parent, Modification::StructureChanged, None);
        Ok(())
    }

    /// Replace the source node
    ///
    /// Unlike `set_proto_node` this does not notify on its own; callers that
    /// need the change to surface follow up with `notify`.
    pub fn set_source_node(
        &mut self,
        id: NodeId,
        source: Option<NodeId>,
    ) -> Result<(), GraphError> {
        self.replace_reference(id, source, |node| &mut node.source_node)?;
        tracing::debug!("Source of {} set to {:?}", id, source);
        Ok(())
    }

    /// Replace the prototype node; always a structural change
    pub fn set_proto_node(
        &mut self,
        id: NodeId,
        proto: Option<NodeId>,
    ) -> Result<(), GraphError> {
        self.replace_reference(id, proto, |node| &mut node.proto_node)?;
        tracing::debug!("Proto of {} set to {:?}", id, proto);
        self.propagate(id, Modification::StructureChanged, None);
        Ok(())
    }

    fn replace_reference(
        &mut self,
        id: NodeId,
        target: Option<NodeId>,
        slot: impl FnOnce(&mut DataNode) -> &mut Option<NodeId>,
    ) -> Result<(), GraphError> {
        self.data(id)?;
        if let Some(target) = target {
            self.check_reference(id, target)?;
            self.data(target)?;
        }
        let old = std::mem::replace(slot(self.data_mut(id)?), target);
        if let Some(old) = old {
            self.remove_parent(id, old);
        }
        if let Some(new) = target {
            self.add_parent(id, new);
        }
        Ok(())
    }

    /// Mark a node as usable prototype; a query flag, never notifies
    pub fn set_prototype(&mut self, id: NodeId, prototype: bool) -> Result<(), GraphError> {
        self.data_mut(id)?.prototype = prototype;
        Ok(())
    }

    /// Unwire a node from every parent and drop its own children
    ///
    /// Each parent occurrence clears whichever slot it used: the source
    /// slot, else the proto slot, else one child entry, with the same
    /// notifications those edits produce on their own. The node's own
    /// children are then dropped and unlinked without any notification.
    pub fn detach_from_parents(&mut self, id: NodeId) -> Result<(), GraphError> {
        let parents = self
            .nodes
            .get(&id)
            .ok_or(GraphError::UnknownNode(id))?
            .parents()
            .snapshot();

        for parent in parents {
            let (is_source, is_proto) = {
                let node = self.data(parent)?;
                (node.source_node == Some(id), node.proto_node == Some(id))
            };
            if is_source {
                self.set_source_node(parent, None)?;
            } else if is_proto {
                self.set_proto_node(parent, None)?;
            } else {
                self.remove_child(parent, id)?;
            }
        }

        if let Some(Node::Data(node)) = self.nodes.get_mut(&id) {
            let children = std::mem::take(&mut node.children);
            for child in children {
                self.remove_parent(id, child);
            }
        }
        tracing::debug!("Detached {} from its parents", id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Data nodes: filter and compute
    // ------------------------------------------------------------------

    pub fn set_filter_type(
        &mut self,
        id: NodeId,
        filter_type: FilterType,
    ) -> Result<(), GraphError> {
        self.data_mut(id)?.filter_type = filter_type;
        self.propagate(id, Modification::StructureChanged, None);
        Ok(())
    }

    /// Configure the filter from a `type(mapping)` string
    ///
    /// Never fails on malformed input: the type falls back to rename and
    /// the mapping to an empty order mapping. Returns the displaced
    /// mapping, no longer owned by the node.
    pub fn set_filter(&mut self, id: NodeId, filter: &str) -> Result<Mapping, GraphError> {
        self.data(id)?;
        let spec = mapping::parse_filter(filter);
        if spec.mapping.is_none() && !filter.trim().is_empty() {
            tracing::warn!(
                "Filter {:?} on node {} did not parse, using an empty mapping",
                filter,
                id
            );
        }
        let mut new_mapping = spec.mapping.unwrap_or_default();
        new_mapping.set_owner(Some(id));

        let node = self.data_mut(id)?;
        let mut old = std::mem::replace(&mut node.filter_mapping, new_mapping);
        old.set_owner(None);
        node.filter_type = spec.filter_type;
        tracing::debug!("Filter of {} set to {:?}", id, filter);
        self.propagate(id, Modification::StructureChanged, None);
        Ok(old)
    }

    pub fn set_compute_operator(
        &mut self,
        id: NodeId,
        operator: impl Into<String>,
    ) -> Result<(), GraphError> {
        self.data_mut(id)?.compute_operator = operator.into();
        self.propagate(id, Modification::StructureChanged, None);
        Ok(())
    }

    /// Configure the compute operator from an `output=operator(input)` string
    ///
    /// Returns the displaced `(input, output)` mappings, no longer owned by
    /// the node.
    pub fn set_compute(
        &mut self,
        id: NodeId,
        compute: &str,
    ) -> Result<(Mapping, Mapping), GraphError> {
        self.data(id)?;
        let spec = mapping::parse_compute(compute);
        if spec.operator.is_empty() && !compute.trim().is_empty() {
            tracing::warn!("Compute {:?} on node {} did not parse", compute, id);
        }
        let mut input = spec.input.unwrap_or_default();
        let mut output = spec.output.unwrap_or_default();
        input.set_owner(Some(id));
        output.set_owner(Some(id));

        let node = self.data_mut(id)?;
        let mut old_input = std::mem::replace(&mut node.compute_input_mapping, input);
        let mut old_output = std::mem::replace(&mut node.compute_output_mapping, output);
        old_input.set_owner(None);
        old_output.set_owner(None);
        node.compute_operator = spec.operator;
        tracing::debug!("Compute of {} set to {:?}", id, compute);
        self.propagate(id, Modification::StructureChanged, None);
        Ok((old_input, old_output))
    }

    /// Set an attribute by its markup name
    ///
    /// Inputs accept `name`, `seqnr` and `param`. Data nodes accept
    /// `filter`, `compute`, `filterType`, `computeOperator` and
    /// `prototype`; their mapping attributes are read-only.
    pub fn set_attribute(
        &mut self,
        id: NodeId,
        attribute: &str,
        value: &str,
    ) -> Result<(), GraphError> {
        let is_data = self
            .nodes
            .get(&id)
            .ok_or(GraphError::UnknownNode(id))?
            .is_data();

        match (is_data, attribute) {
            (false, "name") => self.set_input_name(id, value),
            (false, "seqnr") => {
                let seqnr = value
                    .trim()
                    .parse()
                    .map_err(|_| invalid_value(attribute, value))?;
                self.set_input_seqnr(id, seqnr)
            }
            (false, "param") => self.set_input_param(id, parse_bool(attribute, value)?),
            (true, "filter") => self.set_filter(id, value).map(drop),
            (true, "compute") => self.set_compute(id, value).map(drop),
            (true, "filterType") => {
                let filter_type = FilterType::from_keyword(value.trim())
                    .ok_or_else(|| invalid_value(attribute, value))?;
                self.set_filter_type(id, filter_type)
            }
            (true, "computeOperator") => self.set_compute_operator(id, value.trim()),
            (true, "prototype") => self.set_prototype(id, parse_bool(attribute, value)?),
            (true, "filterMapping" | "computeInputMapping" | "computeOutputMapping") => {
                Err(GraphError::ReadOnly(attribute.to_string()))
            }
            _ => Err(GraphError::UnknownAttribute {
                node: id,
                attribute: attribute.to_string(),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Requests and notification
    // ------------------------------------------------------------------

    /// Subscribe a request on a data node
    pub fn add_request(
        &mut self,
        id: NodeId,
        request: Box<dyn Request>,
    ) -> Result<RequestId, GraphError> {
        let request_id = RequestId(self.next_request_id);
        self.data_mut(id)?.requests.push((request_id, request));
        self.next_request_id += 1;
        Ok(request_id)
    }

    pub fn remove_request(
        &mut self,
        id: NodeId,
        request: RequestId,
    ) -> Result<Box<dyn Request>, GraphError> {
        let node = self.data_mut(id)?;
        let pos = node
            .requests
            .iter()
            .position(|(rid, _)| *rid == request)
            .ok_or(GraphError::UnknownRequest { node: id, request })?;
        Ok(node.requests.remove(pos).1)
    }

    /// Notify a data node about a change
    ///
    /// The change is accepted only if it raises the node's state. An
    /// accepted change is forwarded to every parent, then invalidates the
    /// compute cache, then reaches the node's requests.
    pub fn notify(
        &mut self,
        id: NodeId,
        change: Modification,
        name: Option<&str>,
    ) -> Result<(), GraphError> {
        self.data(id)?;
        self.propagate(id, change, name);
        Ok(())
    }

    fn notify_parents(&mut self, id: NodeId, change: Modification, name: Option<&str>) {
        let parents = self
            .nodes
            .get(&id)
            .map(|node| node.parents().snapshot())
            .unwrap_or_default();
        for parent in parents {
            self.propagate(parent, change, name);
        }
    }

    /// Returns whether the change was accepted
    ///
    /// Cyclic wiring terminates because the state is raised before the
    /// parents are visited.
    fn propagate(&mut self, id: NodeId, change: Modification, name: Option<&str>) -> bool {
        let Some(Node::Data(node)) = self.nodes.get_mut(&id) else {
            return false;
        };
        if !node.state.is_raised_by(change) {
            tracing::trace!("Node {} absorbed {:?} (state {:?})", id, change, node.state);
            return false;
        }
        node.state = change;
        tracing::debug!("Node {} raised to {:?} (channel {:?})", id, change, name);

        self.notify_parents(id, change, name);

        if let Some(cache) = self.compute_cache.as_mut() {
            cache.update(id, change);
        }
        if let Some(Node::Data(node)) = self.nodes.get_mut(&id) {
            for (_, request) in &mut node.requests {
                request.notify(id, RequestNotification::ChangedStructure);
            }
        }
        true
    }

    /// End the current epoch
    ///
    /// Returns every data node with a pending modification, in id order, and
    /// resets them all to `Modification::None`.
    pub fn flush(&mut self) -> Vec<(NodeId, Modification)> {
        let mut dirty: Vec<(NodeId, Modification)> = self
            .nodes
            .iter_mut()
            .filter_map(|(&id, node)| match node {
                Node::Data(node) if node.state != Modification::None => {
                    Some((id, std::mem::take(&mut node.state)))
                }
                _ => None,
            })
            .collect();
        dirty.sort_unstable_by_key(|&(id, _)| id);
        tracing::debug!("Flushed {} dirty nodes", dirty.len());
        dirty
    }

    /// Reset a single node's state, returning the previous level
    pub fn reset_state(&mut self, id: NodeId) -> Result<Modification, GraphError> {
        Ok(std::mem::take(&mut self.data_mut(id)?.state))
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid_value(attribute: &str, value: &str) -> GraphError {
    GraphError::InvalidValue {
        attribute: attribute.to_string(),
        value: value.to_string(),
    }
}

fn parse_bool(attribute: &str, value: &str) -> Result<bool, GraphError> {
    match value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(invalid_value(attribute, value)),
    }
}
