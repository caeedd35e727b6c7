use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::records::{Empty, RemoteError};

/// A record type that can travel as a message payload.
///
/// `KIND` is written in front of the CBOR body so a receiver can tell which record it
/// holds before decoding it.
pub trait PayloadBody: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: &'static str;
}

/// Errors returned when materializing a payload as a concrete record.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// Payload holds a different record kind than requested.
    #[error("payload type mismatch: expected {expected}, found {found}")]
    Type {
        expected: &'static str,
        found: String,
    },
    /// Payload bytes are malformed for the requested record.
    #[error("payload decode error: {0}")]
    Decode(String),
    /// Record could not be serialized.
    #[error("payload encode error: {0}")]
    Encode(String),
    /// The reply reports a failure at the remote end.
    #[error("remote error: {0}")]
    Remote(RemoteError),
}

type Decoded = Arc<dyn Any + Send + Sync>;

/// Opaque payload bytes with a single-assignment decode cache.
///
/// Relaying a payload only clones the byte handle. Decoding happens at most once per
/// payload instance and is shared by every clone.
#[derive(Clone)]
pub struct Payload {
    raw: Bytes,
    decoded: Arc<OnceLock<Decoded>>,
}

impl Payload {
    /// Wraps bytes received off the wire without inspecting them.
    pub fn from_raw(raw: Bytes) -> Self {
        Self {
            raw,
            decoded: Arc::new(OnceLock::new()),
        }
    }

    /// Serializes `value` and seeds the decode cache with it.
    pub fn encode<T: PayloadBody>(value: T) -> Result<Self, PayloadError> {
        let mut body = Vec::new();
        ciborium::ser::into_writer(&value, &mut body)
            .map_err(|e| PayloadError::Encode(e.to_string()))?;

        let kind = T::KIND.as_bytes();
        let mut raw = BytesMut::with_capacity(2 + kind.len() + body.len());
        raw.put_u16(kind.len() as u16);
        raw.put_slice(kind);
        raw.put_slice(&body);

        let payload = Self::from_raw(raw.freeze());
        let _ = payload.decoded.set(Arc::new(value));
        Ok(payload)
    }

    /// The [`Empty`] record.
    pub fn empty() -> Self {
        let kind = Empty::KIND.as_bytes();
        let mut raw = BytesMut::with_capacity(3 + kind.len());
        raw.put_u16(kind.len() as u16);
        raw.put_slice(kind);
        // CBOR `null`, the encoding of a unit struct.
        raw.put_u8(0xf6);
        Self::from_raw(raw.freeze())
    }

    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Reads the record kind tag without decoding the body.
    pub fn kind(&self) -> Result<&str, PayloadError> {
        self.split().map(|(kind, _)| kind)
    }

    pub fn is<T: PayloadBody>(&self) -> bool {
        matches!(self.kind(), Ok(kind) if kind == T::KIND)
    }

    /// Materializes the payload as `T`, reusing the cached value when present.
    pub fn decode<T: PayloadBody>(&self) -> Result<Arc<T>, PayloadError> {
        if let Some(cached) = self.decoded.get() {
            if let Ok(value) = Arc::clone(cached).downcast::<T>() {
                return Ok(value);
            }
        }

        let (kind, body) = self.split()?;
        if kind != T::KIND {
            return Err(PayloadError::Type {
                expected: T::KIND,
                found: kind.to_string(),
            });
        }
        let value: Arc<T> = Arc::new(
            ciborium::de::from_reader(body).map_err(|e| PayloadError::Decode(e.to_string()))?,
        );
        let _ = self.decoded.set(value.clone());
        Ok(value)
    }

    fn split(&self) -> Result<(&str, &[u8]), PayloadError> {
        let raw = self.raw.as_ref();
        if raw.len() < 2 {
            return Err(PayloadError::Decode("missing payload kind".to_string()));
        }
        let kind_len = u16::from_be_bytes([raw[0], raw[1]]) as usize;
        let rest = &raw[2..];
        if rest.len() < kind_len {
            return Err(PayloadError::Decode("truncated payload kind".to_string()));
        }
        let (kind, body) = rest.split_at(kind_len);
        let kind = std::str::from_utf8(kind)
            .map_err(|_| PayloadError::Decode("payload kind is not utf-8".to_string()))?;
        Ok((kind, body))
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("kind", &self.kind().unwrap_or("?"))
            .field("len", &self.raw.len())
            .field("decoded", &self.decoded.get().is_some())
            .finish()
    }
}

/// Byte-level equality; the decode cache does not participate.
impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Payload {}

impl From<RemoteError> for PayloadError {
    fn from(value: RemoteError) -> Self {
        Self::Remote(value)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use hive_core::{Guid, NodeAddress};

    use super::{Payload, PayloadError};
    use crate::records::{Empty, ObjectData, Pong, UnpublishRequest};

    #[test]
    fn empty_payload_decodes_as_empty() {
        let payload = Payload::empty();
        assert_eq!(payload.kind().expect("kind should read"), "empty");
        payload.decode::<Empty>().expect("empty should decode");
    }

    #[test]
    fn raw_bytes_decode_once_and_share_cache() {
        let source = Payload::encode(ObjectData {
            object_id: Guid::from_content(b"x"),
            data: Bytes::from_static(b"hello"),
        })
        .expect("payload should encode");

        let relayed = Payload::from_raw(source.raw().clone());
        let copy = relayed.clone();
        let first = relayed.decode::<ObjectData>().expect("payload should decode");
        let second = copy.decode::<ObjectData>().expect("payload should decode");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.data.as_ref(), b"hello");
    }

    #[test]
    fn wrong_kind_is_a_type_error() {
        let payload = Payload::empty();
        match payload.decode::<UnpublishRequest>() {
            Err(PayloadError::Type { expected, found }) => {
                assert_eq!(expected, "unpublish-request");
                assert_eq!(found, "empty");
            }
            other => panic!("expected type error, got {other:?}"),
        }
    }

    #[test]
    fn corrupt_body_is_a_decode_error() {
        let good = Payload::encode(Empty).expect("payload should encode");
        let mut raw = good.raw().to_vec();
        raw.pop();
        raw.extend_from_slice(&[0xff, 0xff]);
        let corrupt = Payload::from_raw(Bytes::from(raw));
        assert!(matches!(
            corrupt.decode::<Empty>(),
            Err(PayloadError::Decode(_))
        ));

        let truncated = Payload::from_raw(Bytes::from_static(&[0x00]));
        assert!(matches!(truncated.kind(), Err(PayloadError::Decode(_))));
    }

    #[test]
    fn cache_mismatch_falls_back_to_kind_check() {
        let payload = Payload::encode(Pong {
            responder: NodeAddress::new(Guid::random(), "127.0.0.1", 12001),
            timestamp: 1,
        })
        .expect("payload should encode");
        assert!(payload.is::<Pong>());
        assert!(matches!(
            payload.decode::<Empty>(),
            Err(PayloadError::Type { .. })
        ));
    }
}
