//! HIVE wire codec.
//!
//! Defines the message envelope, status codes, lazily decoded payloads, the known
//! payload records, and the length-prefixed frame format used between nodes.

pub mod error;
pub mod frame;
pub mod header;
pub mod message;
pub mod payload;
pub mod records;
pub mod status;

pub use error::CodecError;
pub use frame::{
    decode_frame, encode_frame, read_message, write_message, FrameDecoder, MAX_HEADER_LEN,
    MAX_PAYLOAD_LEN,
};
pub use message::{Message, MESSAGE_VERSION};
pub use payload::{Payload, PayloadBody, PayloadError};
pub use records::{
    Empty, ObjectData, ObjectMetadata, Pong, PublishRecord, PublishRequest, PublisherList,
    RemoteError, RemoteErrorKind, UnpublishRequest,
};
pub use status::{MessageType, Status};
