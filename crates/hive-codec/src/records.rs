use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use bytes::Bytes;
use hive_core::time::unix_seconds;
use hive_core::{Guid, NodeAddress};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::payload::PayloadBody;

/// Free-form attributes published alongside an object id.
pub type ObjectMetadata = BTreeMap<String, String>;

/// Payload carrying no data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty;

impl PayloadBody for Empty {
    const KIND: &'static str = "empty";
}

/// Announces that `publisher` holds every object in `objects`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub publisher: NodeAddress,
    pub objects: BTreeMap<Guid, ObjectMetadata>,
    pub seconds_to_live: i64,
}

impl PayloadBody for PublishRequest {
    const KIND: &'static str = "publish-request";
}

/// Withdraws `publisher`'s claim on every object in `object_ids`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpublishRequest {
    pub publisher: NodeAddress,
    pub object_ids: Vec<Guid>,
}

impl PayloadBody for UnpublishRequest {
    const KIND: &'static str = "unpublish-request";
}

/// Bytes of one stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectData {
    pub object_id: Guid,
    pub data: Bytes,
}

impl PayloadBody for ObjectData {
    const KIND: &'static str = "object-data";
}

/// Back-pointers known to the answering node for one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherList {
    pub object_id: Guid,
    pub publishers: Vec<PublishRecord>,
}

impl PayloadBody for PublisherList {
    const KIND: &'static str = "publisher-list";
}

/// Liveness answer from `responder`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub responder: NodeAddress,
    pub timestamp: i64,
}

impl PayloadBody for Pong {
    const KIND: &'static str = "pong";
}

/// Failure category reported in a `Throwable` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    /// Exact routing ended on a node other than the destination.
    NoSuchNode,
    /// Requested object or route does not exist.
    NotFound,
    /// Payload held a different record than the handler expected.
    PayloadType,
    /// Payload bytes could not be decoded.
    PayloadDecode,
    /// No service is registered for the subject class or method.
    ServiceNotFound,
    /// Service-specific failure.
    Application,
}

impl RemoteErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoSuchNode => "no such node",
            Self::NotFound => "not found",
            Self::PayloadType => "payload type",
            Self::PayloadDecode => "payload decode",
            Self::ServiceNotFound => "service not found",
            Self::Application => "application",
        }
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error value carried as the payload of a failure reply.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl PayloadBody for RemoteError {
    const KIND: &'static str = "remote-error";
}

/// Back-pointer from an object id to a node that holds the object.
///
/// Identity is the `(publisher node id, object id)` pair, so a set holds at most one
/// record per publisher for each object and re-publishing replaces the old record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRecord {
    pub object_id: Guid,
    pub publisher: NodeAddress,
    pub metadata: ObjectMetadata,
    pub expire_time_seconds: i64,
}

impl PublishRecord {
    pub fn new(
        object_id: Guid,
        publisher: NodeAddress,
        metadata: ObjectMetadata,
        expire_time_seconds: i64,
    ) -> Self {
        Self {
            object_id,
            publisher,
            metadata,
            expire_time_seconds,
        }
    }

    /// Record expiring `seconds_to_live` seconds from now.
    pub fn with_ttl(
        object_id: Guid,
        publisher: NodeAddress,
        metadata: ObjectMetadata,
        seconds_to_live: i64,
    ) -> Self {
        Self::new(
            object_id,
            publisher,
            metadata,
            unix_seconds().saturating_add(seconds_to_live),
        )
    }

    pub fn publisher_id(&self) -> Guid {
        self.publisher.node_id
    }

    pub fn is_live(&self, now_seconds: i64) -> bool {
        self.expire_time_seconds > now_seconds
    }
}

impl PartialEq for PublishRecord {
    fn eq(&self, other: &Self) -> bool {
        self.publisher.node_id == other.publisher.node_id && self.object_id == other.object_id
    }
}

impl Eq for PublishRecord {}

impl Hash for PublishRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.publisher.node_id.hash(state);
        self.object_id.hash(state);
    }
}
