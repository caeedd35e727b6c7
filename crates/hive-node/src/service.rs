use std::collections::HashMap;
use std::sync::Arc;

use hive_codec::{Message, PayloadError, RemoteErrorKind, Status};
use hive_core::NodeAddress;
use thiserror::Error;
use tracing::debug;

use crate::objects::ObjectStore;
use crate::publishers::Publishers;

/// Errors a service reports instead of a reply. The registry turns them into
/// failure replies.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("no service named {0:?}")]
    UnknownService(String),
    #[error("service {service:?} has no method {method:?}")]
    UnknownMethod { service: String, method: String },
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("{0}")]
    Application(String),
}

impl ServiceError {
    /// Reply status and error kind reported to the requester.
    pub fn classify(&self) -> (Status, RemoteErrorKind) {
        match self {
            Self::UnknownService(_) => (Status::NotFound, RemoteErrorKind::ServiceNotFound),
            Self::UnknownMethod { .. } => {
                (Status::MethodNotAllowed, RemoteErrorKind::ServiceNotFound)
            }
            Self::BadRequest(_) => (Status::BadRequest, RemoteErrorKind::Application),
            Self::Payload(err) => (Status::Throwable, payload_error_kind(err)),
            Self::Application(_) => (Status::Throwable, RemoteErrorKind::Application),
        }
    }

    /// Failure reply to `request` describing this error.
    pub fn into_reply(self, local: &NodeAddress, request: &Message) -> Message {
        let (status, kind) = self.classify();
        match self {
            Self::Payload(PayloadError::Remote(remote)) => {
                request.reply_error(local, status, remote.kind, remote.message)
            }
            other => request.reply_error(local, status, kind, other.to_string()),
        }
    }
}

/// Error kind matching a payload fault.
pub fn payload_error_kind(err: &PayloadError) -> RemoteErrorKind {
    match err {
        PayloadError::Type { .. } => RemoteErrorKind::PayloadType,
        PayloadError::Decode(_) => RemoteErrorKind::PayloadDecode,
        PayloadError::Encode(_) => RemoteErrorKind::Application,
        PayloadError::Remote(remote) => remote.kind,
    }
}

/// Node state a service may read or change while handling a request.
pub struct ServiceContext<'a> {
    pub local: &'a NodeAddress,
    pub publishers: &'a Publishers,
    pub objects: &'a dyn ObjectStore,
}

/// Terminus handler for one subject class.
pub trait Service: Send + Sync {
    /// Subject class this service answers.
    fn name(&self) -> &str;
    fn handle(&self, ctx: &ServiceContext<'_>, request: &Message) -> Result<Message, ServiceError>;
}

/// Dispatch table from subject class to [`Service`].
#[derive(Default, Clone)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn Service>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `publish`, `retrieve` and `ping` services installed.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::builtin::PublishService));
        registry.register(Arc::new(crate::builtin::RetrieveService));
        registry.register(Arc::new(crate::builtin::PingService));
        registry
    }

    /// Installs `service`, replacing any service with the same name.
    pub fn register(&mut self, service: Arc<dyn Service>) {
        self.services.insert(service.name().to_string(), service);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.keys().cloned().collect();
        names.sort();
        names
    }

    /// Runs the service named by `request.subject_class`. Always produces a reply.
    pub fn dispatch(&self, ctx: &ServiceContext<'_>, request: &Message) -> Message {
        let outcome = match self.services.get(&request.subject_class) {
            Some(service) => service.handle(ctx, request),
            None => Err(ServiceError::UnknownService(request.subject_class.clone())),
        };
        outcome.unwrap_or_else(|err| {
            debug!(
                message_id = %request.message_id,
                class = %request.subject_class,
                method = %request.subject_method,
                error = %err,
                "service failed"
            );
            err.into_reply(ctx.local, request)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hive_codec::{Message, MessageType, Payload, RemoteErrorKind, Status};
    use hive_core::{Guid, NodeAddress};

    use super::{Service, ServiceContext, ServiceError, ServiceRegistry};
    use crate::objects::MemoryObjectStore;
    use crate::publishers::Publishers;

    struct Failing;

    impl Service for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn handle(
            &self,
            _ctx: &ServiceContext<'_>,
            _request: &Message,
        ) -> Result<Message, ServiceError> {
            Err(ServiceError::Application("disk on fire".into()))
        }
    }

    fn request(class: &str) -> Message {
        Message::new(
            MessageType::RouteToNode,
            NodeAddress::new(Guid::random(), "client", 1),
            Guid::random(),
            None,
            class,
            "anything",
            Payload::empty(),
        )
        .expect("request should build")
    }

    #[test]
    fn unknown_class_yields_not_found_reply() {
        let local = NodeAddress::new(Guid::random(), "node", 1);
        let publishers = Publishers::default();
        let objects = MemoryObjectStore::default();
        let ctx = ServiceContext {
            local: &local,
            publishers: &publishers,
            objects: &objects,
        };
        let reply = ServiceRegistry::with_builtins().dispatch(&ctx, &request("nope"));
        assert_eq!(reply.status, Status::NotFound);
        let error = reply.remote_error().expect("reply should carry an error");
        assert_eq!(error.kind, RemoteErrorKind::ServiceNotFound);
    }

    #[test]
    fn service_errors_become_throwable_replies() {
        let local = NodeAddress::new(Guid::random(), "node", 1);
        let publishers = Publishers::default();
        let objects = MemoryObjectStore::default();
        let ctx = ServiceContext {
            local: &local,
            publishers: &publishers,
            objects: &objects,
        };
        let mut registry = ServiceRegistry::new();
        registry.register(Arc::new(Failing));
        let req = request("failing");
        let reply = registry.dispatch(&ctx, &req);
        assert_eq!(reply.status, Status::Throwable);
        assert_eq!(reply.destination, req.source.node_id);
        let error = reply.remote_error().expect("reply should carry an error");
        assert_eq!(error.kind, RemoteErrorKind::Application);
        assert_eq!(error.message, "disk on fire");
    }

    #[test]
    fn builtins_are_registered() {
        assert_eq!(
            ServiceRegistry::with_builtins().names(),
            vec!["ping", "publish", "retrieve"]
        );
    }
}
