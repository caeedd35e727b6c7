use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use hive_codec::{decode_frame, encode_frame, Message};
use hive_core::{Guid, NodeAddress};
use parking_lot::RwLock;
use tracing::trace;

use crate::adapter::{MessageHandler, Transmitter};
use crate::error::TransportError;

#[derive(Default)]
struct NetworkInner {
    handlers: HashMap<Guid, Weak<dyn MessageHandler>>,
    down: HashSet<Guid>,
    calls: HashMap<Guid, u64>,
}

/// In-process network for simulations and tests.
///
/// Messages are routed by node id and pass through the frame codec in both
/// directions, so payloads arrive as raw bytes exactly as they would over TCP.
/// Handlers are held weakly; a dropped node behaves like an unreachable peer.
#[derive(Default)]
pub struct InMemoryNetwork {
    inner: RwLock<NetworkInner>,
}

impl InMemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attaches `handler` as the receiver for messages sent to `node_id`.
    pub fn register(&self, node_id: Guid, handler: Weak<dyn MessageHandler>) {
        self.inner.write().handlers.insert(node_id, handler);
    }

    pub fn unregister(&self, node_id: &Guid) {
        self.inner.write().handlers.remove(node_id);
    }

    /// Marks a node unreachable (`true`) or reachable again (`false`).
    pub fn set_down(&self, node_id: Guid, down: bool) {
        let mut inner = self.inner.write();
        if down {
            inner.down.insert(node_id);
        } else {
            inner.down.remove(&node_id);
        }
    }

    /// Number of transmit attempts addressed to `node_id`, reachable or not.
    pub fn calls_to(&self, node_id: &Guid) -> u64 {
        self.inner.read().calls.get(node_id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u64 {
        self.inner.read().calls.values().sum()
    }

    pub fn reset_calls(&self) {
        self.inner.write().calls.clear();
    }
}

impl Transmitter for InMemoryNetwork {
    fn transmit(
        &self,
        address: &NodeAddress,
        message: &Message,
    ) -> Result<Message, TransportError> {
        let handler = {
            let mut inner = self.inner.write();
            *inner.calls.entry(address.node_id).or_insert(0) += 1;
            if inner.down.contains(&address.node_id) {
                None
            } else {
                inner
                    .handlers
                    .get(&address.node_id)
                    .and_then(Weak::upgrade)
            }
        };
        let handler = handler.ok_or_else(|| TransportError::Unreachable(address.to_string()))?;

        trace!(%address, message_id = %message.message_id, "in-memory transmit");
        let request = decode_frame(&encode_frame(message)?)?;
        let reply = handler
            .handle(request)
            .ok_or_else(|| TransportError::NoReply(address.to_string()))?;
        Ok(decode_frame(&encode_frame(&reply)?)?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hive_codec::{Message, MessageType, Payload};
    use hive_core::{Guid, NodeAddress};

    use super::InMemoryNetwork;
    use crate::adapter::{MessageHandler, Transmitter};
    use crate::error::TransportError;

    struct Echo {
        address: NodeAddress,
    }

    impl MessageHandler for Echo {
        fn handle(&self, message: Message) -> Option<Message> {
            let payload = message.payload.clone();
            Some(message.reply_ok(&self.address, payload))
        }
    }

    fn request(destination: Guid) -> Message {
        Message::new(
            MessageType::RouteToNode,
            NodeAddress::new(Guid::random(), "client", 1),
            destination,
            None,
            "ping",
            "ping",
            Payload::empty(),
        )
        .expect("request should build")
    }

    #[test]
    fn delivers_to_registered_handler_and_counts_calls() {
        let network = InMemoryNetwork::new();
        let address = NodeAddress::new(Guid::random(), "node", 1);
        let echo: Arc<dyn MessageHandler> = Arc::new(Echo {
            address: address.clone(),
        });
        network.register(address.node_id, Arc::downgrade(&echo));

        let reply = network
            .transmit(&address, &request(address.node_id))
            .expect("echo should reply");
        assert_eq!(reply.source, address);
        assert_eq!(network.calls_to(&address.node_id), 1);
    }

    #[test]
    fn down_or_dropped_nodes_are_unreachable() {
        let network = InMemoryNetwork::new();
        let address = NodeAddress::new(Guid::random(), "node", 1);
        let echo: Arc<dyn MessageHandler> = Arc::new(Echo {
            address: address.clone(),
        });
        network.register(address.node_id, Arc::downgrade(&echo));

        network.set_down(address.node_id, true);
        let err = network
            .transmit(&address, &request(address.node_id))
            .expect_err("down node should be unreachable");
        assert!(matches!(err, TransportError::Unreachable(_)));
        assert!(err.is_dead());

        network.set_down(address.node_id, false);
        drop(echo);
        assert!(network
            .transmit(&address, &request(address.node_id))
            .is_err());
        assert_eq!(network.total_calls(), 2);
    }

    #[test]
    fn closure_handlers_can_decline_to_reply() {
        let network = InMemoryNetwork::new();
        let address = NodeAddress::new(Guid::random(), "node", 1);
        let silent: Arc<dyn MessageHandler> =
            Arc::new(|_message: Message| -> Option<Message> { None });
        network.register(address.node_id, Arc::downgrade(&silent));
        let err = network
            .transmit(&address, &request(address.node_id))
            .expect_err("silent handler should not reply");
        assert!(matches!(err, TransportError::NoReply(_)));
    }
}
