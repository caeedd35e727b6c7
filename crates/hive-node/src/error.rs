use hive_codec::{CodecError, PayloadError, RemoteError, Status};
use hive_core::Guid;
use thiserror::Error;

use crate::objects::ObjectStoreError;

/// Errors returned by the node's client operations.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
    /// Routing produced no reply at all.
    #[error("no reply from the overlay for {destination}")]
    NoReply { destination: Guid },
    /// The overlay answered with a failure status.
    #[error("request failed with status {status}")]
    Failed {
        status: Status,
        error: Option<RemoteError>,
    },
}
