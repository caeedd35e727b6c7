use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use hive_codec::{
    Message, MessageType, ObjectMetadata, Payload, PublishRecord, PublishRequest,
    RemoteErrorKind, Status, UnpublishRequest,
};
use hive_core::{Guid, NodeAddress};
use hive_node::builtin::{
    PUBLISH_OBJECT, PUBLISH_SERVICE, RETRIEVE_OBJECT, RETRIEVE_SERVICE, UNPUBLISH_OBJECT,
};
use hive_node::{NeighbourMap, Node, NodeBuilder, NodeConfig, NodeError, Router};
use hive_transport::{InMemoryNetwork, MessageHandler, Transmitter, TransportError};

fn guid(hex_prefix: &str) -> Guid {
    let hex = format!("{hex_prefix}{}", "0".repeat(64 - hex_prefix.len()));
    Guid::from_hex(&hex).expect("hex should parse")
}

struct Peer {
    node: Arc<Node>,
    map: Arc<NeighbourMap>,
    _handler: Arc<dyn MessageHandler>,
}

struct Overlay {
    network: Arc<InMemoryNetwork>,
    peers: Vec<Peer>,
}

impl Overlay {
    /// Fully connected overlay with one node per id prefix.
    fn mesh(prefixes: &[&str]) -> Self {
        let network = InMemoryNetwork::new();
        let transport: Arc<dyn Transmitter> = network.clone();
        let addresses: Vec<NodeAddress> = prefixes
            .iter()
            .enumerate()
            .map(|(i, prefix)| NodeAddress::new(guid(prefix), "sim", 12_000 + i as u16))
            .collect();

        let peers = addresses
            .iter()
            .map(|address| {
                let map = Arc::new(NeighbourMap::new(address.clone()));
                for other in &addresses {
                    map.add(other.clone());
                }
                let node = Arc::new(
                    NodeBuilder::new(address.clone(), Arc::clone(&transport))
                        .router(map.clone())
                        .build(),
                );
                let handler: Arc<dyn MessageHandler> = node.clone();
                network.register(address.node_id, Arc::downgrade(&handler));
                Peer {
                    node,
                    map,
                    _handler: handler,
                }
            })
            .collect();
        Self { network, peers }
    }

    fn node(&self, prefix: &str) -> &Arc<Node> {
        &self.peer(prefix).node
    }

    fn peer(&self, prefix: &str) -> &Peer {
        let id = guid(prefix);
        self.peers
            .iter()
            .find(|peer| peer.node.node_id() == id)
            .expect("peer should exist")
    }
}

fn store(node: &Node, object_id: Guid, data: &'static [u8]) {
    node.objects()
        .put(object_id, Bytes::from_static(data))
        .expect("object should be stored");
    let reply = node
        .publish_object(object_id, ObjectMetadata::new())
        .expect("publish should reply");
    assert!(reply.status.is_successful(), "publish failed: {}", reply.status);
}

#[test]
fn message_for_self_is_dispatched_without_network() {
    let overlay = Overlay::mesh(&["1"]);
    let node = overlay.node("1");
    let pong = node.ping(node.node_id()).expect("self ping should succeed");
    assert_eq!(pong.responder, *node.address());
    assert_eq!(overlay.network.total_calls(), 0);
    assert_eq!(node.stats().dispatched, 1);
}

/// Message from `source` addressed to `node` itself.
fn self_addressed(
    node: &Node,
    source: &NodeAddress,
    kind: MessageType,
    subject: Guid,
    class: &str,
    method: &str,
    payload: Payload,
) -> Message {
    Message::new(
        kind,
        source.clone(),
        node.node_id(),
        Some(subject),
        class,
        method,
        payload,
    )
    .expect("message should build")
}

#[test]
fn self_addressed_publish_is_dispatched_without_forwarding() {
    let overlay = Overlay::mesh(&["1", "9"]);
    let node = overlay.node("1");
    let publisher = overlay.node("9").address().clone();
    let object_id = guid("6");
    let body = PublishRequest {
        publisher: publisher.clone(),
        objects: BTreeMap::from([(object_id, ObjectMetadata::new())]),
        seconds_to_live: 60,
    };
    let message = self_addressed(
        node,
        &publisher,
        MessageType::PublishObject,
        object_id,
        PUBLISH_SERVICE,
        PUBLISH_OBJECT,
        Payload::encode(body).expect("payload should encode"),
    )
    .with_multicast(true);

    let reply = node.receive(message).expect("local dispatch should reply");
    assert_eq!(reply.status, Status::Ok);
    let stats = node.stats();
    assert_eq!(stats.dispatched, 1);
    assert_eq!(stats.forwarded, 0);
    assert_eq!(overlay.network.total_calls(), 0);
}

#[test]
fn self_addressed_unpublish_is_dispatched_without_network() {
    let overlay = Overlay::mesh(&["1", "9"]);
    let node = overlay.node("1");
    let publisher = overlay.node("9").address().clone();
    let object_id = guid("6");
    let body = UnpublishRequest {
        publisher: publisher.clone(),
        object_ids: vec![object_id],
    };
    let message = self_addressed(
        node,
        &publisher,
        MessageType::UnpublishObject,
        object_id,
        PUBLISH_SERVICE,
        UNPUBLISH_OBJECT,
        Payload::encode(body).expect("payload should encode"),
    );

    let reply = node.receive(message).expect("local dispatch should reply");
    assert_eq!(reply.status, Status::Ok);
    let stats = node.stats();
    assert_eq!(stats.dispatched, 1);
    assert_eq!(stats.forwarded, 0);
    assert_eq!(overlay.network.total_calls(), 0);
}

#[test]
fn self_addressed_route_to_object_ignores_back_pointers() {
    let overlay = Overlay::mesh(&["1", "9"]);
    let node = overlay.node("1");
    let holder = overlay.node("9").address().clone();
    let object_id = guid("6");
    node.publishers()
        .update(PublishRecord::new(
            object_id,
            holder.clone(),
            ObjectMetadata::new(),
            i64::MAX,
        ))
        .expect("back-pointer should be recorded");

    let message = self_addressed(
        node,
        &holder,
        MessageType::RouteToObject,
        object_id,
        RETRIEVE_SERVICE,
        RETRIEVE_OBJECT,
        Payload::empty(),
    );
    let reply = node.receive(message).expect("local dispatch should reply");
    assert_eq!(reply.source.node_id, guid("1"));
    assert_eq!(reply.status, Status::NotFound);
    let stats = node.stats();
    assert_eq!(stats.dispatched, 1);
    assert_eq!(stats.proxied, 0);
    assert_eq!(overlay.network.total_calls(), 0);
}

#[test]
fn exact_route_to_absent_node_ends_in_no_such_node() {
    let overlay = Overlay::mesh(&["1", "4", "9", "C"]);
    let reply = overlay
        .node("1")
        .route_to_node(guid("6"), "ping", "ping", Payload::empty(), true)
        .expect("root should reply");
    assert_eq!(reply.status, Status::NoSuchNode);
    assert_eq!(reply.source.node_id, guid("9"));
    assert_eq!(
        reply.remote_error().map(|e| e.kind),
        Some(RemoteErrorKind::NoSuchNode)
    );

    let err = overlay
        .node("1")
        .ping(guid("6"))
        .expect_err("absent node should not answer a ping");
    assert!(matches!(
        err,
        NodeError::Failed {
            status: Status::NoSuchNode,
            ..
        }
    ));
}

#[test]
fn inexact_route_is_answered_by_surrogate_root() {
    let overlay = Overlay::mesh(&["1", "4", "9", "C"]);
    let reply = overlay
        .node("1")
        .route_to_node(guid("6"), "ping", "ping", Payload::empty(), false)
        .expect("root should reply");
    assert_eq!(reply.status, Status::Ok);
    assert_eq!(reply.source.node_id, guid("9"));
}

#[test]
fn publish_leaves_back_pointers_on_path_and_root() {
    let overlay = Overlay::mesh(&["1", "4", "9", "C"]);
    let object_id = guid("6A");
    store(overlay.node("C"), object_id, b"hello hive");

    for prefix in ["C", "9"] {
        let publishers = overlay.node(prefix).publishers().get_publishers(&object_id);
        assert_eq!(publishers.len(), 1, "node {prefix} should hold a back-pointer");
        assert!(publishers
            .iter()
            .all(|record| record.publisher_id() == guid("C")));
    }
    for prefix in ["1", "4"] {
        assert!(overlay
            .node(prefix)
            .publishers()
            .get_publishers(&object_id)
            .is_empty());
    }

    let data = overlay
        .node("4")
        .retrieve_object(object_id)
        .expect("object should be found through the root");
    assert_eq!(data.as_ref(), b"hello hive");
    assert_eq!(overlay.node("9").stats().proxied, 1);
}

#[test]
fn stale_publisher_is_skipped_for_a_valid_one() {
    let overlay = Overlay::mesh(&["1", "4", "9", "C"]);
    let object_id = guid("6B");
    // 4 announces the object without holding it; C holds it.
    overlay
        .node("4")
        .publish_object(object_id, ObjectMetadata::new())
        .expect("publish should reply");
    store(overlay.node("C"), object_id, b"real bytes");

    let data = overlay
        .node("1")
        .retrieve_object(object_id)
        .expect("valid publisher should answer");
    assert_eq!(data.as_ref(), b"real bytes");

    let root = overlay.node("9");
    assert_eq!(root.stats().proxied, 2);
    assert_eq!(root.stats().proxy_failures, 1);
    // The stale back-pointer stays until its publisher withdraws it.
    assert_eq!(root.publishers().get_publishers(&object_id).len(), 2);
}

#[test]
fn removing_local_object_unpublishes_it() {
    let overlay = Overlay::mesh(&["1", "4", "9", "C"]);
    let object_id = guid("6C");
    store(overlay.node("C"), object_id, b"short lived");

    assert!(overlay
        .node("C")
        .remove_local_object(object_id)
        .expect("unpublish should succeed"));
    for prefix in ["C", "9"] {
        assert!(overlay
            .node(prefix)
            .publishers()
            .get_publishers(&object_id)
            .is_empty());
    }

    let err = overlay
        .node("1")
        .retrieve_object(object_id)
        .expect_err("unpublished object should be gone");
    assert!(matches!(
        err,
        NodeError::Failed {
            status: Status::NotFound,
            ..
        }
    ));
    assert!(!overlay
        .node("C")
        .remove_local_object(object_id)
        .expect("second removal should be a no-op"));
}

#[test]
fn store_and_publish_names_object_by_content() {
    let overlay = Overlay::mesh(&["1", "4", "9", "C"]);
    let object_id = overlay
        .node("4")
        .store_and_publish(Bytes::from_static(b"content addressed"), ObjectMetadata::new())
        .expect("store and publish should succeed");
    assert_eq!(object_id, Guid::from_content(b"content addressed"));

    let data = overlay
        .node("C")
        .retrieve_object(object_id)
        .expect("object should be retrievable");
    assert_eq!(data.as_ref(), b"content addressed");
}

#[test]
fn dead_next_hop_is_evicted_and_routing_continues() {
    let overlay = Overlay::mesh(&["1", "4", "9", "C"]);
    overlay.network.set_down(guid("9"), true);

    let reply = overlay
        .node("1")
        .route_to_node(guid("6"), "ping", "ping", Payload::empty(), false)
        .expect("surviving node should answer");
    assert_eq!(reply.status, Status::Ok);
    assert_eq!(reply.source.node_id, guid("C"));

    assert!(!overlay.peer("1").map.contains(&guid("9")));
    assert!(!overlay.peer("C").map.contains(&guid("9")));
    assert_eq!(overlay.node("1").stats().neighbours_evicted, 1);
    assert!(overlay.peer("4").map.contains(&guid("9")));
}

/// Transport that evicts the victim from the sender's map itself before
/// reporting it unreachable, as a concurrent request would.
struct ConcurrentEviction {
    inner: Arc<dyn Transmitter>,
    map: Arc<NeighbourMap>,
    victim: NodeAddress,
}

impl Transmitter for ConcurrentEviction {
    fn transmit(&self, address: &NodeAddress, message: &Message) -> Result<Message, TransportError> {
        if *address == self.victim {
            self.map.remove(&self.victim);
            return Err(TransportError::Unreachable(address.to_string()));
        }
        self.inner.transmit(address, message)
    }
}

#[test]
fn already_evicted_dead_hop_still_falls_through_to_next_candidate() {
    let overlay = Overlay::mesh(&["4", "9", "C"]);
    overlay.network.set_down(guid("9"), true);
    let victim = overlay.node("9").address().clone();

    let address = NodeAddress::new(guid("1"), "sim", 12_100);
    let map = Arc::new(NeighbourMap::new(address.clone()));
    for peer in &overlay.peers {
        map.add(peer.node.address().clone());
    }
    let transport = Arc::new(ConcurrentEviction {
        inner: overlay.network.clone(),
        map: map.clone(),
        victim,
    });
    let node = NodeBuilder::new(address, transport)
        .router(map.clone())
        .build();

    let reply = node
        .route_to_node(guid("6"), "ping", "ping", Payload::empty(), false)
        .expect("next candidate should answer");
    assert_eq!(reply.status, Status::Ok);
    assert_eq!(reply.source.node_id, guid("C"));
    assert!(!map.contains(&guid("9")));
    assert_eq!(node.stats().neighbours_evicted, 0);
    assert_eq!(node.stats().forwarded, 1);
}

#[test]
fn hop_bound_drops_message() {
    let overlay = Overlay::mesh(&["1", "9"]);
    let node = overlay.node("1");
    let mut message = Message::new(
        MessageType::RouteToNode,
        node.address().clone(),
        guid("9"),
        None,
        "ping",
        "ping",
        Payload::empty(),
    )
    .expect("message should build");
    message.ttl = NodeConfig::default().max_hops - 1;

    assert!(node.transmit(&message).is_none());
    assert_eq!(node.stats().ttl_exceeded, 1);
    assert_eq!(overlay.network.total_calls(), 0);
}

#[test]
fn malformed_unpublish_payload_becomes_throwable_reply() {
    let overlay = Overlay::mesh(&["1", "9"]);
    let node = overlay.node("1");
    let message = Message::new(
        MessageType::UnpublishObject,
        NodeAddress::new(Guid::random(), "client", 1),
        guid("6"),
        Some(guid("6")),
        "publish",
        "unpublishObject",
        Payload::empty(),
    )
    .expect("message should build");

    let reply = node.receive(message).expect("fault should still reply");
    assert_eq!(reply.status, Status::Throwable);
    assert_eq!(
        reply.remote_error().map(|e| e.kind),
        Some(RemoteErrorKind::PayloadType)
    );
    assert_eq!(node.stats().payload_faults, 1);
}

#[test]
fn dropped_router_entries_leave_lone_node_as_root() {
    let overlay = Overlay::mesh(&["1", "9"]);
    let peer = overlay.peer("1");
    let nine = overlay.node("9").address().clone();
    assert!(peer.map.remove(&nine));
    assert!(peer.node.router().is_root(&guid("9")));
    let pong = peer
        .node
        .route_to_node(guid("9"), "ping", "ping", Payload::empty(), false)
        .expect("lone node should answer itself");
    assert_eq!(pong.source.node_id, guid("1"));
}
