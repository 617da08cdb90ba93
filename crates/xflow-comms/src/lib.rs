//! Cross-thread delivery of graph notifications.
//!
//! The graph calls its requests synchronously while a change propagates.
//! [`ChannelRequest`] turns those calls into messages, so a consumer on
//! another thread (a renderer, a mesh adapter) can drain them at its own
//! pace.

use crossbeam_channel::{Receiver, Sender};
use xflow_core::{NodeId, RequestNotification};
use xflow_observer::Request;

/// A request signal together with the data node it was raised on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    /// Data node whose state was raised
    pub node: NodeId,
    /// Signal delivered to the request
    pub signal: RequestNotification,
}

/// Sender side, owned by the graph through a `ChannelRequest`
pub type NotificationSender = Sender<Notification>;
/// Receiver side (consumer thread)
pub type NotificationReceiver = Receiver<Notification>;

/// Request forwarding every signal over a channel
///
/// Sending never blocks. Once the receiver is dropped, signals are
/// discarded.
#[derive(Debug, Clone)]
pub struct ChannelRequest {
    tx: NotificationSender,
}

impl ChannelRequest {
    pub fn new(tx: NotificationSender) -> Self {
        Self { tx }
    }
}

impl Request for ChannelRequest {
    fn notify(&mut self, node: NodeId, signal: RequestNotification) {
        if self.tx.send(Notification { node, signal }).is_err() {
            tracing::trace!("Dropped notification for node {}: receiver gone", node);
        }
    }
}

/// Create an unbounded request/receiver pair
pub fn create_notification_channel() -> (ChannelRequest, NotificationReceiver) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (ChannelRequest::new(tx), rx)
}
