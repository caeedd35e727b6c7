//! Services every node answers: back-pointer bookkeeping, object retrieval and ping.

use hive_codec::{
    Message, ObjectData, Payload, Pong, PublishRequest, PublisherList, RemoteErrorKind,
    Status, UnpublishRequest,
};
use hive_core::time::unix_millis;
use hive_core::Guid;

use crate::service::{Service, ServiceContext, ServiceError};

pub const PUBLISH_SERVICE: &str = "publish";
pub const PUBLISH_OBJECT: &str = "publishObject";
pub const UNPUBLISH_OBJECT: &str = "unpublishObject";
pub const GET_PUBLISHERS: &str = "getPublishers";
pub const RETRIEVE_SERVICE: &str = "retrieve";
pub const RETRIEVE_OBJECT: &str = "retrieveObject";
pub const PING_SERVICE: &str = "ping";
pub const PING: &str = "ping";

fn unknown_method(service: &str, request: &Message) -> ServiceError {
    ServiceError::UnknownMethod {
        service: service.to_string(),
        method: request.subject_method.clone(),
    }
}

fn subject(request: &Message) -> Result<Guid, ServiceError> {
    request
        .subject_id
        .ok_or_else(|| ServiceError::BadRequest("request names no subject object".into()))
}

/// Terminus for publish and unpublish traffic.
///
/// Back-pointers are recorded by the routing engine on every hop; the root only
/// acknowledges a well-formed request.
pub struct PublishService;

impl Service for PublishService {
    fn name(&self) -> &str {
        PUBLISH_SERVICE
    }

    fn handle(&self, ctx: &ServiceContext<'_>, request: &Message) -> Result<Message, ServiceError> {
        match request.subject_method.as_str() {
            PUBLISH_OBJECT => {
                request.payload_as::<PublishRequest>()?;
                Ok(request.reply_ok(ctx.local, Payload::empty()))
            }
            UNPUBLISH_OBJECT => {
                request.payload_as::<UnpublishRequest>()?;
                Ok(request.reply_ok(ctx.local, Payload::empty()))
            }
            GET_PUBLISHERS => {
                let object_id = subject(request)?;
                let mut publishers: Vec<_> =
                    ctx.publishers.get_publishers(&object_id).into_iter().collect();
                publishers.sort_by_key(|record| record.publisher_id());
                let list = PublisherList {
                    object_id,
                    publishers,
                };
                Ok(request.reply_ok(ctx.local, Payload::encode(list)?))
            }
            _ => Err(unknown_method(PUBLISH_SERVICE, request)),
        }
    }
}

/// Answers object reads from the local object store.
pub struct RetrieveService;

impl Service for RetrieveService {
    fn name(&self) -> &str {
        RETRIEVE_SERVICE
    }

    fn handle(&self, ctx: &ServiceContext<'_>, request: &Message) -> Result<Message, ServiceError> {
        if request.subject_method != RETRIEVE_OBJECT {
            return Err(unknown_method(RETRIEVE_SERVICE, request));
        }
        let object_id = subject(request)?;
        let Some(data) = ctx.objects.get(&object_id) else {
            return Ok(request.reply_error(
                ctx.local,
                Status::NotFound,
                RemoteErrorKind::NotFound,
                format!("{object_id} is not stored at {}", ctx.local),
            ));
        };
        let payload = Payload::encode(ObjectData { object_id, data })?;
        Ok(request.reply_ok(ctx.local, payload))
    }
}

pub struct PingService;

impl Service for PingService {
    fn name(&self) -> &str {
        PING_SERVICE
    }

    fn handle(&self, ctx: &ServiceContext<'_>, request: &Message) -> Result<Message, ServiceError> {
        if request.subject_method != PING {
            return Err(unknown_method(PING_SERVICE, request));
        }
        let pong = Pong {
            responder: ctx.local.clone(),
            timestamp: unix_millis(),
        };
        Ok(request.reply_ok(ctx.local, Payload::encode(pong)?))
    }
}
