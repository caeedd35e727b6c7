use std::fmt;
use std::sync::Arc;

use hive_core::time::unix_millis;
use hive_core::{Guid, NodeAddress};

use crate::error::CodecError;
use crate::payload::{Payload, PayloadBody, PayloadError};
use crate::records::{RemoteError, RemoteErrorKind};
use crate::status::{MessageType, Status};

/// Envelope version written by this implementation.
pub const MESSAGE_VERSION: u8 = 2;

/// One request or reply travelling through the overlay.
///
/// The header fields are plain data. The payload stays as raw bytes until a terminus
/// calls [`Message::payload_as`].
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub version: u8,
    pub kind: MessageType,
    pub trace: bool,
    pub status: Status,
    pub message_id: Guid,
    pub source: NodeAddress,
    pub destination: Guid,
    /// Object of interest. Absent on replies.
    pub subject_id: Option<Guid>,
    /// Service name the terminus dispatches to.
    pub subject_class: String,
    /// Operation within `subject_class`. Never empty.
    pub subject_method: String,
    /// Hops taken so far.
    pub ttl: i16,
    /// Creation time in Unix milliseconds.
    pub timestamp: i64,
    pub multicast: bool,
    pub exact: bool,
    pub payload: Payload,
}

impl Message {
    /// Builds a request with a fresh message id, `Ok` status, and zero hops.
    pub fn new(
        kind: MessageType,
        source: NodeAddress,
        destination: Guid,
        subject_id: Option<Guid>,
        subject_class: impl Into<String>,
        subject_method: impl Into<String>,
        payload: Payload,
    ) -> Result<Self, CodecError> {
        let message = Self {
            version: MESSAGE_VERSION,
            kind,
            trace: false,
            status: Status::Ok,
            message_id: Guid::random(),
            source,
            destination,
            subject_id,
            subject_class: subject_class.into(),
            subject_method: subject_method.into(),
            ttl: 0,
            timestamp: unix_millis(),
            multicast: false,
            exact: false,
            payload,
        };
        message.validate()?;
        Ok(message)
    }

    /// Checks envelope invariants shared by construction and decoding.
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.version != MESSAGE_VERSION {
            return Err(CodecError::InvalidMessage("unsupported message version"));
        }
        if self.subject_method.is_empty() {
            return Err(CodecError::InvalidMessage("subject method must not be empty"));
        }
        Ok(())
    }

    pub fn with_exact_routing(mut self, exact: bool) -> Self {
        self.exact = exact;
        self
    }

    pub fn with_multicast(mut self, multicast: bool) -> Self {
        self.multicast = multicast;
        self
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn increment_ttl(&mut self) -> i16 {
        self.ttl = self.ttl.saturating_add(1);
        self.ttl
    }

    pub fn set_timestamp(&mut self, millis: i64) {
        self.timestamp = millis;
    }

    pub fn is_reply(&self) -> bool {
        self.kind == MessageType::Reply
    }

    /// Builds a reply addressed to this message's source.
    ///
    /// The reply keeps the subject class and method and the routing flags so the
    /// requester can correlate it; it carries no subject id.
    pub fn compose_reply(&self, source: &NodeAddress, status: Status, payload: Payload) -> Self {
        Self {
            version: MESSAGE_VERSION,
            kind: MessageType::Reply,
            trace: self.trace,
            status,
            message_id: Guid::random(),
            source: source.clone(),
            destination: self.source.node_id,
            subject_id: None,
            subject_class: self.subject_class.clone(),
            subject_method: self.subject_method.clone(),
            ttl: 0,
            timestamp: unix_millis(),
            multicast: self.multicast,
            exact: self.exact,
            payload,
        }
    }

    /// `Ok` reply carrying `payload`.
    pub fn reply_ok(&self, source: &NodeAddress, payload: Payload) -> Self {
        self.compose_reply(source, Status::Ok, payload)
    }

    /// Failure reply whose payload is a [`RemoteError`].
    pub fn reply_error(
        &self,
        source: &NodeAddress,
        status: Status,
        kind: RemoteErrorKind,
        message: impl Into<String>,
    ) -> Self {
        let error = RemoteError::new(kind, message);
        let payload = Payload::encode(error).unwrap_or_default();
        self.compose_reply(source, status, payload)
    }

    /// Copy of this message re-addressed exactly to `destination` as a `RouteToNode`.
    ///
    /// Used when proxying toward a publisher. The payload bytes are shared, not decoded.
    pub fn proxy_to(&self, destination: Guid) -> Self {
        let mut proxy = self.clone();
        proxy.kind = MessageType::RouteToNode;
        proxy.destination = destination;
        proxy.multicast = false;
        proxy.exact = true;
        proxy
    }

    /// Decodes the payload as `T`.
    ///
    /// A `Throwable` reply yields [`PayloadError::Remote`] with the reported error instead.
    pub fn payload_as<T: PayloadBody>(&self) -> Result<Arc<T>, PayloadError> {
        if self.status == Status::Throwable {
            let remote = self.payload.decode::<RemoteError>()?;
            return Err(PayloadError::Remote((*remote).clone()));
        }
        self.payload.decode::<T>()
    }

    /// Remote error carried by a failure reply, if any.
    pub fn remote_error(&self) -> Option<RemoteError> {
        if self.status.is_successful() {
            return None;
        }
        self.payload
            .decode::<RemoteError>()
            .ok()
            .map(|error| (*error).clone())
    }

    /// One-line summary used in trace logging.
    pub fn trace_report(&self) -> String {
        let id = self.message_id.to_hex();
        let dest = self.destination.to_hex();
        format!(
            "{}.. {:?} {} -> {}.. {}.{} ttl={} status={}",
            &id[..5],
            self.kind,
            self.source,
            &dest[..8],
            self.subject_class,
            self.subject_method,
            self.ttl,
            self.status.code()
        )
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.trace_report())
    }
}
