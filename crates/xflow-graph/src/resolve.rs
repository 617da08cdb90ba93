//! Resolution of the named channels a data node exposes.
//!
//! A node's table is assembled in four steps:
//!
//! 1. the prototype's table provides defaults;
//! 2. the source node's table, or else every child in order, is merged on
//!    top (later entries replace earlier ones under the same name);
//! 3. a compute operator publishes its outputs under the names of the
//!    output mapping;
//! 4. the filter keeps, removes or renames channels.
//!
//! An empty filter mapping leaves the table untouched whatever the type.

use std::collections::HashMap;
use xflow_core::{FilterType, NodeId};

use crate::graph::{Graph, GraphError};
use crate::mapping::Mapping;
use crate::node::Node;

/// Where a channel's data comes from
#[derive(Debug, Clone, PartialEq)]
pub enum Channel {
    /// Data held by an input node
    Input {
        node: NodeId,
        seqnr: u32,
        param: bool,
    },
    /// Output of a compute operator configured on `node`
    Compute {
        node: NodeId,
        operator: String,
        /// Operator-side name of the output
        output: String,
        /// Operator-side parameter names with the channels bound to them
        inputs: Vec<(String, Option<Channel>)>,
    },
}

impl Channel {
    /// Node that owns the channel's data
    #[must_use]
    pub fn node(&self) -> NodeId {
        match self {
            Self::Input { node, .. } | Self::Compute { node, .. } => *node,
        }
    }
}

/// Ordered table of named channels
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataTable {
    entries: Vec<(String, Channel)>,
}

impl DataTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; a replaced entry keeps its position
    pub fn insert(&mut self, name: impl Into<String>, channel: Channel) {
        let name = name.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = channel,
            None => self.entries.push((name, channel)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Channel> {
        let pos = self.entries.iter().position(|(existing, _)| existing == name)?;
        Some(self.entries.remove(pos).1)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, channel)| channel)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Channel)> {
        self.entries.iter().map(|(name, channel)| (name.as_str(), channel))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn merge(&mut self, other: Self) {
        for (name, channel) in other.entries {
            self.insert(name, channel);
        }
    }
}

impl Graph {
    /// Resolve the channels exposed by a data node
    ///
    /// Unnamed inputs contribute nothing. Fails with `GraphError::Cycle` if
    /// the node is reachable from itself through children, source or proto
    /// references. A node shared along several paths is resolved once.
    pub fn resolve(&self, id: NodeId) -> Result<DataTable, GraphError> {
        self.data(id)?;
        Resolver::new(self).resolve(id)
    }

    /// Resolve every data node, in id order
    ///
    /// Tables of shared nodes are computed once for the whole pass.
    pub fn resolve_all(&self) -> Vec<(NodeId, Result<DataTable, GraphError>)> {
        let mut resolver = Resolver::new(self);
        self.node_ids()
            .into_iter()
            .filter(|&id| self.data(id).is_ok())
            .map(|id| {
                let result = resolver.resolve(id);
                resolver.stack.clear();
                (id, result)
            })
            .collect()
    }
}

/// State of one resolution pass
struct Resolver<'a> {
    graph: &'a Graph,
    /// Nodes currently being resolved, for cycle detection
    stack: Vec<NodeId>,
    resolved: HashMap<NodeId, DataTable>,
}

impl<'a> Resolver<'a> {
    fn new(graph: &'a Graph) -> Self {
        Self {
            graph,
            stack: Vec::new(),
            resolved: HashMap::new(),
        }
    }

    fn resolve(&mut self, id: NodeId) -> Result<DataTable, GraphError> {
        if let Some(table) = self.resolved.get(&id) {
            return Ok(table.clone());
        }
        if self.stack.contains(&id) {
            return Err(GraphError::Cycle(id));
        }
        let graph = self.graph;
        let node = graph.data(id)?;
        self.stack.push(id);

        let mut table = DataTable::new();
        if let Some(proto) = node.proto_node() {
            table.merge(self.resolve(proto)?);
        }

        if let Some(source) = node.source_node() {
            table.merge(self.resolve(source)?);
        } else {
            for &child in node.children() {
                match graph.nodes.get(&child) {
                    Some(Node::Input(input)) if !input.name().is_empty() => {
                        table.insert(
                            input.name(),
                            Channel::Input {
                                node: child,
                                seqnr: input.seqnr(),
                                param: input.param(),
                            },
                        );
                    }
                    Some(Node::Input(_)) => {}
                    Some(Node::Data(_)) => table.merge(self.resolve(child)?),
                    None => return Err(GraphError::UnknownNode(child)),
                }
            }
        }

        if !node.compute_operator().is_empty() {
            let inputs: Vec<(String, Option<Channel>)> = node
                .compute_input_mapping()
                .entries()
                .into_iter()
                .map(|(param, data_name)| (param.to_string(), table.get(data_name).cloned()))
                .collect();
            for (data_name, output) in node.compute_output_mapping().entries() {
                table.insert(
                    data_name,
                    Channel::Compute {
                        node: id,
                        operator: node.compute_operator().to_string(),
                        output: output.to_string(),
                        inputs: inputs.clone(),
                    },
                );
            }
        }

        self.stack.pop();
        let table = apply_filter(node.filter_type(), node.filter_mapping(), table);
        self.resolved.insert(id, table.clone());
        Ok(table)
    }
}

fn apply_filter(filter_type: FilterType, mapping: &Mapping, table: DataTable) -> DataTable {
    if mapping.is_empty() {
        return table;
    }
    match filter_type {
        FilterType::Keep => {
            let mut kept = DataTable::new();
            for (dest, src) in mapping.entries() {
                if let Some(channel) = table.get(src) {
                    kept.insert(dest, channel.clone());
                }
            }
            kept
        }
        FilterType::Remove => {
            let mut table = table;
            for (_, src) in mapping.entries() {
                table.remove(src);
            }
            table
        }
        FilterType::Rename => match mapping {
            Mapping::Order(_) => table,
            Mapping::Name(names) => {
                let mut renamed = DataTable::new();
                for (name, channel) in table.entries {
                    match names.dest_for(&name) {
                        Some(dest) => renamed.insert(dest, channel),
                        None => renamed.insert(name, channel),
                    }
                }
                renamed
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(graph: &mut Graph, parent: NodeId, name: &str) -> NodeId {
        let id = graph.create_input_node();
        graph.set_input_name(id, name).unwrap();
        graph.append_child(parent, id).unwrap();
        id
    }

    #[test]
    fn test_children_merge_in_order() {
        let mut graph = Graph::new();
        let mesh = graph.create_data_node();
        let position = input(&mut graph, mesh, "position");
        let normal = input(&mut graph, mesh, "normal");
        let override_position = input(&mut graph, mesh, "position");

        let table = graph.resolve(mesh).unwrap();
        assert_eq!(table.names(), vec!["position", "normal"]);
        assert_eq!(table.get("position").unwrap().node(), override_position);
        assert_eq!(table.get("normal").unwrap().node(), normal);
        assert_ne!(table.get("position").unwrap().node(), position);
    }

    #[test]
    fn test_unnamed_inputs_are_skipped() {
        let mut graph = Graph::new();
        let mesh = graph.create_data_node();
        let unnamed = graph.create_input_node();
        graph.append_child(mesh, unnamed).unwrap();
        assert!(graph.resolve(mesh).unwrap().is_empty());
    }

    #[test]
    fn test_proto_provides_defaults() {
        let mut graph = Graph::new();
        let proto = graph.create_data_node();
        input(&mut graph, proto, "color");
        let proto_weight = input(&mut graph, proto, "weight");
        let mesh = graph.create_data_node();
        let weight = input(&mut graph, mesh, "weight");
        graph.set_proto_node(mesh, Some(proto)).unwrap();

        let table = graph.resolve(mesh).unwrap();
        assert_eq!(table.names(), vec!["color", "weight"]);
        assert_eq!(table.get("weight").unwrap().node(), weight);
        assert_ne!(table.get("weight").unwrap().node(), proto_weight);
    }

    #[test]
    fn test_source_replaces_children() {
        let mut graph = Graph::new();
        let source = graph.create_data_node();
        input(&mut graph, source, "position");
        let mesh = graph.create_data_node();
        input(&mut graph, mesh, "normal");
        graph.set_source_node(mesh, Some(source)).unwrap();

        assert_eq!(graph.resolve(mesh).unwrap().names(), vec!["position"]);
    }

    #[test]
    fn test_keep_filter_with_renames() {
        let mut graph = Graph::new();
        let mesh = graph.create_data_node();
        let position = input(&mut graph, mesh, "position");
        input(&mut graph, mesh, "normal");
        input(&mut graph, mesh, "texcoord");

        graph.set_filter(mesh, "keep(texcoord, position)").unwrap();
        assert_eq!(graph.resolve(mesh).unwrap().names(), vec!["texcoord", "position"]);

        graph.set_filter(mesh, "keep({pos: position})").unwrap();
        let table = graph.resolve(mesh).unwrap();
        assert_eq!(table.names(), vec!["pos"]);
        assert_eq!(table.get("pos").unwrap().node(), position);
    }

    #[test]
    fn test_remove_filter() {
        let mut graph = Graph::new();
        let mesh = graph.create_data_node();
        input(&mut graph, mesh, "position");
        input(&mut graph, mesh, "normal");

        graph.set_filter(mesh, "remove(normal, missing)").unwrap();
        assert_eq!(graph.resolve(mesh).unwrap().names(), vec!["position"]);

        graph.set_filter(mesh, "remove({n: position})").unwrap();
        assert_eq!(graph.resolve(mesh).unwrap().names(), vec!["normal"]);
    }

    #[test]
    fn test_rename_filter() {
        let mut graph = Graph::new();
        let mesh = graph.create_data_node();
        input(&mut graph, mesh, "position");
        input(&mut graph, mesh, "normal");

        graph.set_filter(mesh, "rename({pos: position})").unwrap();
        assert_eq!(graph.resolve(mesh).unwrap().names(), vec!["pos", "normal"]);

        graph.set_filter(mesh, "rename(position)").unwrap();
        assert_eq!(graph.resolve(mesh).unwrap().names(), vec!["position", "normal"]);
    }

    #[test]
    fn test_malformed_filter_is_a_no_op() {
        let mut graph = Graph::new();
        let mesh = graph.create_data_node();
        input(&mut graph, mesh, "position");
        graph.set_filter(mesh, "keep(").unwrap();
        assert_eq!(graph.resolve(mesh).unwrap().names(), vec!["position"]);
    }

    #[test]
    fn test_compute_outputs() {
        let mut graph = Graph::new();
        let mesh = graph.create_data_node();
        let position = input(&mut graph, mesh, "position");
        input(&mut graph, mesh, "weight");
        graph
            .set_compute(mesh, "(position, bounds)=xflow.morph({pos: position, w: missing})")
            .unwrap();

        let table = graph.resolve(mesh).unwrap();
        assert_eq!(table.names(), vec!["position", "weight", "bounds"]);

        let Some(Channel::Compute {
            node,
            operator,
            output,
            inputs,
        }) = table.get("position")
        else {
            panic!("position should be computed");
        };
        assert_eq!(*node, mesh);
        assert_eq!(operator, "xflow.morph");
        assert_eq!(output, "position");
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].0, "pos");
        assert_eq!(inputs[0].1.as_ref().map(Channel::node), Some(position));
        assert_eq!(inputs[1], ("w".to_string(), None));
    }

    #[test]
    fn test_filter_applies_after_compute() {
        let mut graph = Graph::new();
        let mesh = graph.create_data_node();
        input(&mut graph, mesh, "position");
        graph.set_compute(mesh, "result=xflow.add(position)").unwrap();
        graph.set_filter(mesh, "keep(result)").unwrap();

        let table = graph.resolve(mesh).unwrap();
        assert_eq!(table.names(), vec!["result"]);
        assert!(matches!(table.get("result"), Some(Channel::Compute { .. })));
    }

    #[test]
    fn test_nested_data_nodes() {
        let mut graph = Graph::new();
        let root = graph.create_data_node();
        let inner = graph.create_data_node();
        graph.append_child(root, inner).unwrap();
        input(&mut graph, inner, "position");
        input(&mut graph, root, "color");
        graph.set_filter(inner, "rename({p: position})").unwrap();

        assert_eq!(graph.resolve(root).unwrap().names(), vec!["p", "color"]);
    }

    #[test]
    fn test_cycle_is_reported() {
        let mut graph = Graph::new();
        let a = graph.create_data_node();
        let b = graph.create_data_node();
        graph.append_child(a, b).unwrap();
        graph.set_proto_node(b, Some(a)).unwrap();

        assert_eq!(graph.resolve(a).unwrap_err(), GraphError::Cycle(a));
    }

    #[test]
    fn test_shared_child_is_not_a_cycle() {
        let mut graph = Graph::new();
        let root = graph.create_data_node();
        let shared = graph.create_data_node();
        input(&mut graph, shared, "position");
        graph.append_child(root, shared).unwrap();
        graph.set_proto_node(root, Some(shared)).unwrap();

        assert_eq!(graph.resolve(root).unwrap().names(), vec!["position"]);
    }

    #[test]
    fn test_shared_chain_resolves_each_node_once() {
        // Every level reaches the previous one twice, as child and as proto
        let mut graph = Graph::new();
        let mut previous = graph.create_data_node();
        input(&mut graph, previous, "position");
        for level in 0..64 {
            let node = graph.create_data_node();
            graph.append_child(node, previous).unwrap();
            graph.set_proto_node(node, Some(previous)).unwrap();
            input(&mut graph, node, &format!("level{level}"));
            previous = node;
        }

        let table = graph.resolve(previous).unwrap();
        assert_eq!(table.len(), 65);
        assert_eq!(table.names()[0], "position");
        assert!(table.contains("level63"));
    }

    #[test]
    fn test_resolve_all_reports_each_data_node() {
        let mut graph = Graph::new();
        let shared = graph.create_data_node();
        input(&mut graph, shared, "position");
        let a = graph.create_data_node();
        graph.append_child(a, shared).unwrap();
        let b = graph.create_data_node();
        graph.set_source_node(b, Some(shared)).unwrap();
        let looped = graph.create_data_node();
        let back = graph.create_data_node();
        graph.append_child(looped, back).unwrap();
        graph.append_child(back, looped).unwrap();

        let results = graph.resolve_all();
        let ids: Vec<NodeId> = results.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![shared, a, b, looped, back]);
        for (id, result) in &results[..3] {
            assert_eq!(result.as_ref().unwrap().names(), vec!["position"], "node {id}");
        }
        assert!(matches!(results[3].1, Err(GraphError::Cycle(_))));
        assert!(matches!(results[4].1, Err(GraphError::Cycle(_))));
    }
}
