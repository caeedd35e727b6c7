use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use hive_codec::{
    Message, MessageType, ObjectData, ObjectMetadata, Payload, PayloadError, Pong, PublishRecord,
    PublishRequest, RemoteErrorKind, Status, UnpublishRequest,
};
use hive_core::{Guid, NodeAddress};
use hive_transport::{MessageHandler, Transmitter};
use tracing::{debug, error, info, trace, warn};

use crate::builtin::{
    PING, PING_SERVICE, PUBLISH_OBJECT, PUBLISH_SERVICE, RETRIEVE_OBJECT, RETRIEVE_SERVICE,
    UNPUBLISH_OBJECT,
};
use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::objects::{MemoryObjectStore, ObjectStore};
use crate::publishers::Publishers;
use crate::routing::{NeighbourMap, Router};
use crate::service::{Service, ServiceContext, ServiceError, ServiceRegistry};

/// Point-in-time routing counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub received: u64,
    /// Messages answered by a local service.
    pub dispatched: u64,
    /// Replies obtained from a next hop.
    pub forwarded: u64,
    pub proxied: u64,
    pub proxy_failures: u64,
    pub ttl_exceeded: u64,
    pub neighbours_evicted: u64,
    pub payload_faults: u64,
}

#[derive(Debug, Default)]
struct NodeMetrics {
    received: AtomicU64,
    dispatched: AtomicU64,
    forwarded: AtomicU64,
    proxied: AtomicU64,
    proxy_failures: AtomicU64,
    ttl_exceeded: AtomicU64,
    neighbours_evicted: AtomicU64,
    payload_faults: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Assembles a [`Node`] from its collaborators.
pub struct NodeBuilder {
    address: NodeAddress,
    transport: Arc<dyn Transmitter>,
    config: NodeConfig,
    router: Option<Arc<dyn Router>>,
    objects: Option<Arc<dyn ObjectStore>>,
    publishers: Option<Arc<Publishers>>,
    services: ServiceRegistry,
}

impl NodeBuilder {
    pub fn new(address: NodeAddress, transport: Arc<dyn Transmitter>) -> Self {
        Self {
            address,
            transport,
            config: NodeConfig::default(),
            router: None,
            objects: None,
            publishers: None,
            services: ServiceRegistry::with_builtins(),
        }
    }

    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to an empty [`NeighbourMap`].
    pub fn router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    /// Defaults to a [`MemoryObjectStore`] bounded by `object_store_capacity`.
    pub fn object_store(mut self, objects: Arc<dyn ObjectStore>) -> Self {
        self.objects = Some(objects);
        self
    }

    /// Defaults to an in-memory table.
    pub fn publishers(mut self, publishers: Arc<Publishers>) -> Self {
        self.publishers = Some(publishers);
        self
    }

    /// Adds or replaces a service alongside the builtins.
    pub fn service(mut self, service: Arc<dyn Service>) -> Self {
        self.services.register(service);
        self
    }

    pub fn build(self) -> Node {
        let router = self
            .router
            .unwrap_or_else(|| Arc::new(NeighbourMap::new(self.address.clone())));
        let objects = self.objects.unwrap_or_else(|| {
            Arc::new(MemoryObjectStore::new(self.config.object_store_capacity))
        });
        Node {
            address: self.address,
            config: self.config,
            router,
            objects,
            publishers: self.publishers.unwrap_or_default(),
            services: self.services,
            transport: self.transport,
            metrics: NodeMetrics::default(),
        }
    }
}

/// Routing engine of one overlay node.
///
/// Messages move hop by hop toward the node whose id is closest to their destination.
/// Publish traffic leaves back-pointers at every node it passes, and object lookups
/// divert to a known publisher as soon as one is found along the path. Every path
/// ends in a reply or, for a broken topology, in `None`.
pub struct Node {
    address: NodeAddress,
    config: NodeConfig,
    router: Arc<dyn Router>,
    objects: Arc<dyn ObjectStore>,
    publishers: Arc<Publishers>,
    services: ServiceRegistry,
    transport: Arc<dyn Transmitter>,
    metrics: NodeMetrics,
}

impl Node {
    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    pub fn node_id(&self) -> Guid {
        self.address.node_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<dyn Router> {
        &self.router
    }

    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    pub fn publishers(&self) -> &Arc<Publishers> {
        &self.publishers
    }

    pub fn add_neighbour(&self, address: NodeAddress) -> bool {
        self.router.add(address)
    }

    pub fn stats(&self) -> NodeStats {
        let m = &self.metrics;
        NodeStats {
            received: m.received.load(Ordering::Relaxed),
            dispatched: m.dispatched.load(Ordering::Relaxed),
            forwarded: m.forwarded.load(Ordering::Relaxed),
            proxied: m.proxied.load(Ordering::Relaxed),
            proxy_failures: m.proxy_failures.load(Ordering::Relaxed),
            ttl_exceeded: m.ttl_exceeded.load(Ordering::Relaxed),
            neighbours_evicted: m.neighbours_evicted.load(Ordering::Relaxed),
            payload_faults: m.payload_faults.load(Ordering::Relaxed),
        }
    }

    /// Handles a message arriving at this node and returns the reply to send back.
    ///
    /// Payload faults become `Throwable` replies here and never escape as errors.
    pub fn receive(&self, message: Message) -> Option<Message> {
        bump(&self.metrics.received);
        if message.trace {
            info!(node = %self.address, "receive {}", message.trace_report());
        } else {
            trace!(message_id = %message.message_id, kind = ?message.kind, "receive");
        }

        match self.route_message(&message) {
            Ok(reply) => reply,
            Err(err) => {
                bump(&self.metrics.payload_faults);
                debug!(message_id = %message.message_id, error = %err, "payload fault");
                Some(ServiceError::Payload(err).into_reply(&self.address, &message))
            }
        }
    }

    /// Sends `message` one hop closer to its destination.
    ///
    /// Dead next hops are evicted from the router and the next candidate is tried.
    /// Returns `None` when the hop bound is reached or the message cannot be sent.
    pub fn transmit(&self, message: &Message) -> Option<Message> {
        let mut message = message.clone();
        let ttl = message.increment_ttl();
        if ttl >= self.config.max_hops {
            bump(&self.metrics.ttl_exceeded);
            error!(
                node = %self.address,
                ttl,
                "hop bound exceeded, dropping {}",
                message.trace_report()
            );
            return None;
        }
        if message.destination == self.address.node_id {
            return self.receive(message);
        }

        let mut dead_hops: i16 = 0;
        loop {
            let Some(hop) = self.router.route(&message.destination) else {
                if message.exact {
                    return Some(message.reply_error(
                        &self.address,
                        Status::NotFound,
                        RemoteErrorKind::NotFound,
                        format!("no route from {} to {}", self.address, message.destination),
                    ));
                }
                return self.receive(message);
            };

            if message.trace {
                info!(node = %self.address, %hop, ttl, "forward {}", message.trace_report());
            }
            match self.transport.transmit(&hop, &message) {
                Ok(reply) => {
                    bump(&self.metrics.forwarded);
                    return Some(reply);
                }
                Err(err) if err.is_dead() => {
                    warn!(%hop, error = %err, "next hop unreachable, evicting neighbour");
                    // Another thread may have evicted it already.
                    if self.router.remove(&hop) {
                        bump(&self.metrics.neighbours_evicted);
                    }
                    dead_hops += 1;
                    if dead_hops >= self.config.max_hops {
                        warn!(
                            node = %self.address,
                            dead_hops,
                            message_id = %message.message_id,
                            "too many dead next hops, giving up"
                        );
                        return None;
                    }
                }
                Err(err) => {
                    warn!(%hop, error = %err, message_id = %message.message_id, "transmit failed");
                    return None;
                }
            }
        }
    }

    fn route_message(&self, message: &Message) -> Result<Option<Message>, PayloadError> {
        if message.destination == self.address.node_id {
            return Ok(Some(self.dispatch(message)));
        }
        match message.kind {
            MessageType::PublishObject => Ok(self.receive_publish_object(message)),
            MessageType::UnpublishObject => self.receive_unpublish_object(message),
            MessageType::RouteToObject => Ok(self.receive_route_to_object(message)),
            MessageType::RouteToNode | MessageType::Reply => {
                if self.router.route(&message.destination).is_some() {
                    return Ok(self.transmit(message));
                }
                if message.exact {
                    return Ok(Some(message.reply_error(
                        &self.address,
                        Status::NoSuchNode,
                        RemoteErrorKind::NoSuchNode,
                        format!("{} is root for {}", self.address, message.destination),
                    )));
                }
                Ok(Some(self.dispatch(message)))
            }
        }
    }

    fn dispatch(&self, message: &Message) -> Message {
        bump(&self.metrics.dispatched);
        let ctx = ServiceContext {
            local: &self.address,
            publishers: &self.publishers,
            objects: self.objects.as_ref(),
        };
        self.services.dispatch(&ctx, message)
    }

    /// Forwards or answers a publish, then records back-pointers if it succeeded.
    fn receive_publish_object(&self, message: &Message) -> Option<Message> {
        let reply = if self.router.route(&message.destination).is_some() {
            self.transmit(message)?
        } else {
            self.dispatch(message)
        };
        if reply.status.is_successful() {
            self.record_back_pointers(message);
        }
        Some(reply)
    }

    fn record_back_pointers(&self, message: &Message) {
        let request = match message.payload.decode::<PublishRequest>() {
            Ok(request) => request,
            Err(err) => {
                warn!(message_id = %message.message_id, error = %err, "unreadable publish request");
                return;
            }
        };
        for (object_id, metadata) in &request.objects {
            let record = PublishRecord::with_ttl(
                *object_id,
                request.publisher.clone(),
                metadata.clone(),
                request.seconds_to_live,
            );
            if let Err(err) = self.publishers.update(record) {
                warn!(%object_id, error = %err, "back-pointer update failed, dropping key");
                if let Err(err) = self.publishers.remove_object(object_id) {
                    error!(%object_id, error = %err, "failed to drop publisher key");
                }
            }
        }
    }

    fn receive_unpublish_object(&self, message: &Message) -> Result<Option<Message>, PayloadError> {
        let request = message.payload_as::<UnpublishRequest>()?;
        let publisher_id = message.source.node_id;
        for object_id in &request.object_ids {
            if let Err(err) = self.publishers.remove(object_id, &publisher_id) {
                warn!(%object_id, error = %err, "back-pointer removal failed, dropping key");
                if let Err(err) = self.publishers.remove_object(object_id) {
                    error!(%object_id, error = %err, "failed to drop publisher key");
                }
            }
        }
        if self.router.route(&message.destination).is_some() {
            return Ok(self.transmit(message));
        }
        Ok(Some(self.dispatch(message)))
    }

    /// Answers locally when the object is here, otherwise tries each known publisher
    /// before continuing toward the object's root.
    fn receive_route_to_object(&self, message: &Message) -> Option<Message> {
        let subject = message.subject_id.unwrap_or(message.destination);
        if subject == self.address.node_id || self.objects.contains(&subject) {
            return Some(self.dispatch(message));
        }

        let mut publishers: Vec<PublishRecord> =
            self.publishers.get_publishers(&subject).into_iter().collect();
        publishers.sort_by_key(|record| record.publisher_id());
        for record in publishers {
            bump(&self.metrics.proxied);
            let proxy = message.proxy_to(record.publisher_id());
            match self.transmit(&proxy) {
                Some(reply) if reply.status.is_successful() => return Some(reply),
                Some(reply) => {
                    bump(&self.metrics.proxy_failures);
                    info!(
                        object_id = %subject,
                        publisher = %record.publisher,
                        status = %reply.status,
                        "publisher could not answer"
                    );
                }
                None => {
                    bump(&self.metrics.proxy_failures);
                    info!(object_id = %subject, publisher = %record.publisher, "publisher unreachable");
                }
            }
        }

        if self.router.route(&message.destination).is_some() {
            return self.transmit(message);
        }
        Some(self.dispatch(message))
    }

    fn request(
        &self,
        kind: MessageType,
        destination: Guid,
        subject_id: Option<Guid>,
        class: &str,
        method: &str,
        payload: Payload,
    ) -> Result<Message, NodeError> {
        Ok(Message::new(
            kind,
            self.address.clone(),
            destination,
            subject_id,
            class,
            method,
            payload,
        )?)
    }

    fn deliver(&self, request: Message) -> Result<Message, NodeError> {
        let destination = request.destination;
        self.receive(request)
            .ok_or(NodeError::NoReply { destination })
    }

    /// Announces that this node holds `object_id`.
    pub fn publish_object(
        &self,
        object_id: Guid,
        metadata: ObjectMetadata,
    ) -> Result<Message, NodeError> {
        let body = PublishRequest {
            publisher: self.address.clone(),
            objects: BTreeMap::from([(object_id, metadata)]),
            seconds_to_live: self.config.publish_ttl_seconds,
        };
        let request = self
            .request(
                MessageType::PublishObject,
                object_id,
                Some(object_id),
                PUBLISH_SERVICE,
                PUBLISH_OBJECT,
                Payload::encode(body)?,
            )?
            .with_multicast(true);
        self.deliver(request)
    }

    /// Withdraws this node's back-pointers for `object_id` along the publish path.
    pub fn unpublish_object(&self, object_id: Guid) -> Result<Message, NodeError> {
        let body = UnpublishRequest {
            publisher: self.address.clone(),
            object_ids: vec![object_id],
        };
        let request = self
            .request(
                MessageType::UnpublishObject,
                object_id,
                Some(object_id),
                PUBLISH_SERVICE,
                UNPUBLISH_OBJECT,
                Payload::encode(body)?,
            )?
            .with_multicast(true);
        self.deliver(request)
    }

    /// Stores `data` locally under its content hash and publishes it.
    pub fn store_and_publish(
        &self,
        data: Bytes,
        metadata: ObjectMetadata,
    ) -> Result<Guid, NodeError> {
        let object_id = Guid::from_content(&data);
        self.objects.put(object_id, data)?;
        ensure_success(self.publish_object(object_id, metadata)?)?;
        Ok(object_id)
    }

    /// Deletes a local object and unpublishes it. Returns whether it was stored here.
    pub fn remove_local_object(&self, object_id: Guid) -> Result<bool, NodeError> {
        if !self.objects.remove(&object_id) {
            return Ok(false);
        }
        ensure_success(self.unpublish_object(object_id)?)?;
        Ok(true)
    }

    /// Sends a request to the node with id `node_id`.
    ///
    /// With `exact` unset the closest node answers when `node_id` is not live.
    pub fn route_to_node(
        &self,
        node_id: Guid,
        class: &str,
        method: &str,
        payload: Payload,
        exact: bool,
    ) -> Result<Message, NodeError> {
        let request = self
            .request(MessageType::RouteToNode, node_id, None, class, method, payload)?
            .with_exact_routing(exact);
        self.deliver(request)
    }

    /// Sends a request to whichever node can answer for `object_id`.
    pub fn route_to_object(
        &self,
        object_id: Guid,
        class: &str,
        method: &str,
        payload: Payload,
    ) -> Result<Message, NodeError> {
        let request = self
            .request(
                MessageType::RouteToObject,
                object_id,
                Some(object_id),
                class,
                method,
                payload,
            )?
            .with_multicast(true);
        self.deliver(request)
    }

    /// Fetches the bytes of `object_id` from wherever the overlay finds them.
    pub fn retrieve_object(&self, object_id: Guid) -> Result<Bytes, NodeError> {
        let reply = ensure_success(self.route_to_object(
            object_id,
            RETRIEVE_SERVICE,
            RETRIEVE_OBJECT,
            Payload::empty(),
        )?)?;
        let data = reply.payload_as::<ObjectData>()?;
        Ok(data.data.clone())
    }

    /// Round trip to `node_id`, which must be live.
    pub fn ping(&self, node_id: Guid) -> Result<Pong, NodeError> {
        let reply = ensure_success(self.route_to_node(
            node_id,
            PING_SERVICE,
            PING,
            Payload::empty(),
            true,
        )?)?;
        Ok(reply.payload_as::<Pong>()?.as_ref().clone())
    }
}

impl MessageHandler for Node {
    fn handle(&self, message: Message) -> Option<Message> {
        self.receive(message)
    }
}

fn ensure_success(reply: Message) -> Result<Message, NodeError> {
    if reply.status.is_successful() {
        return Ok(reply);
    }
    Err(NodeError::Failed {
        status: reply.status,
        error: reply.remote_error(),
    })
}
