//! Collaborator abstractions for the xflow graph.
//!
//! The graph talks to three kinds of external objects, each behind a trait
//! defined here so the graph stays independent of any renderer:
//!
//! - [`DataBuffer`]: externally owned data referenced by input nodes. Input
//!   nodes register themselves as listeners on the buffer they hold.
//! - [`Request`]: a consumer subscribed on a data node, told when the node's
//!   data must be fetched again.
//! - [`ComputeCache`]: the operator execution layer, invalidated on every
//!   accepted state transition.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use xflow_core::{DataType, Error, Modification, NodeId, RequestNotification, Result};

/// Externally owned data referenced by an input node
pub trait DataBuffer: Send + Sync {
    /// Register an input node that wants to hear about updates
    fn add_listener(&self, node: NodeId);

    /// Unregister a previously added listener (one registration)
    fn remove_listener(&self, node: NodeId);

    /// Nodes currently listening, in registration order
    fn listeners(&self) -> Vec<NodeId>;

    /// Serializable copy of the contents, if the buffer supports it
    fn snapshot(&self) -> Option<BufferSnapshot> {
        None
    }
}

/// Subscriber on a data node
pub trait Request: Send {
    /// Called on every accepted state transition of `node`
    fn notify(&mut self, node: NodeId, signal: RequestNotification);
}

/// Operator execution layer invalidated by state transitions
///
/// Implementations get no access to the graph, so they cannot trigger
/// another notification while one is being delivered.
pub trait ComputeCache: Send {
    /// Invalidate whatever was cached for `node`
    fn update(&mut self, node: NodeId, change: Modification);
}

/// Typed contents of a buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferSnapshot {
    pub data_type: DataType,
    pub values: Vec<f32>,
}

/// Plain in-memory buffer of typed values
///
/// Values are stored flat; an element spans `data_type.tuple_size()`
/// scalars.
pub struct BufferEntry {
    data_type: DataType,
    values: Mutex<Vec<f32>>,
    listeners: Mutex<SmallVec<[NodeId; 2]>>,
}

impl BufferEntry {
    /// Create a buffer, checking that `values` holds whole elements
    pub fn new(data_type: DataType, values: Vec<f32>) -> Result<Self> {
        check_length(data_type, &values)?;
        Ok(Self {
            data_type,
            values: Mutex::new(values),
            listeners: Mutex::new(SmallVec::new()),
        })
    }

    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Number of elements (not scalars)
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.lock().len() / self.data_type.tuple_size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }

    /// Copy of the current values
    #[must_use]
    pub fn values(&self) -> Vec<f32> {
        self.values.lock().clone()
    }

    /// Replace the contents
    ///
    /// The buffer does not reach into the graph itself; after a successful
    /// update the owner hands the buffer to `Graph::buffer_changed` so every
    /// listening input propagates the change.
    pub fn set_values(&self, values: Vec<f32>) -> Result<()> {
        check_length(self.data_type, &values)?;
        *self.values.lock() = values;
        Ok(())
    }
}

impl std::fmt::Debug for BufferEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferEntry")
            .field("data_type", &self.data_type)
            .field("len", &self.len())
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

impl DataBuffer for BufferEntry {
    fn add_listener(&self, node: NodeId) {
        self.listeners.lock().push(node);
    }

    fn remove_listener(&self, node: NodeId) {
        let mut listeners = self.listeners.lock();
        if let Some(pos) = listeners.iter().position(|&id| id == node) {
            listeners.remove(pos);
        }
    }

    fn listeners(&self) -> Vec<NodeId> {
        self.listeners.lock().to_vec()
    }

    fn snapshot(&self) -> Option<BufferSnapshot> {
        Some(BufferSnapshot {
            data_type: self.data_type,
            values: self.values(),
        })
    }
}

fn check_length(data_type: DataType, values: &[f32]) -> Result<()> {
    let tuple = data_type.tuple_size();
    if values.len() % tuple != 0 {
        return Err(Error::Buffer(format!(
            "{} values do not form whole {:?} elements (tuple size {})",
            values.len(),
            data_type,
            tuple
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_entry_rejects_partial_elements() {
        assert!(matches!(
            BufferEntry::new(DataType::Float3, vec![0.0; 7]),
            Err(Error::Buffer(_))
        ));
        let entry = BufferEntry::new(DataType::Float3, vec![0.0; 9]).unwrap();
        assert_eq!(entry.len(), 3);
        assert!(entry.set_values(vec![1.0; 4]).is_err());
        assert_eq!(entry.values(), vec![0.0; 9]);
    }

    #[test]
    fn test_listener_registration_is_counted() {
        let entry = BufferEntry::new(DataType::Float, vec![1.0]).unwrap();
        entry.add_listener(NodeId(1));
        entry.add_listener(NodeId(2));
        entry.add_listener(NodeId(1));
        entry.remove_listener(NodeId(1));
        assert_eq!(entry.listeners(), vec![NodeId(2), NodeId(1)]);
        entry.remove_listener(NodeId(7));
        assert_eq!(entry.listeners().len(), 2);
    }

    #[test]
    fn test_snapshot_copies_contents() {
        let entry = BufferEntry::new(DataType::Float2, vec![1.0, 2.0]).unwrap();
        let snapshot = entry.snapshot().unwrap();
        assert_eq!(snapshot.data_type, DataType::Float2);
        assert_eq!(snapshot.values, vec![1.0, 2.0]);
    }
}
