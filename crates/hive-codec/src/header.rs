//! Binary layout of the message header.
//!
//! All integers are big-endian. Strings are a `u16` byte length followed by UTF-8.
//! Field order:
//!
//! ```text
//! version u8 | type u8 | trace u8 | status i16 | message_id [32]
//! source: node_id [32] host str port u16
//! destination [32] | ttl i16 | timestamp i64 | multicast u8 | exact u8
//! subject_class str | subject_method str | subject_id: present u8 [+ 32]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use hive_core::{Guid, NodeAddress, GUID_LEN};

use crate::error::CodecError;
use crate::message::Message;
use crate::payload::Payload;
use crate::status::{MessageType, Status};

/// Appends the encoded header of `message` to `out`.
pub fn encode_header(message: &Message, out: &mut BytesMut) -> Result<(), CodecError> {
    out.put_u8(message.version);
    out.put_u8(message.kind.tag());
    out.put_u8(u8::from(message.trace));
    out.put_i16(message.status.code());
    out.put_slice(message.message_id.as_bytes());
    out.put_slice(message.source.node_id.as_bytes());
    put_str(out, &message.source.host, "source host")?;
    out.put_u16(message.source.port);
    out.put_slice(message.destination.as_bytes());
    out.put_i16(message.ttl);
    out.put_i64(message.timestamp);
    out.put_u8(u8::from(message.multicast));
    out.put_u8(u8::from(message.exact));
    put_str(out, &message.subject_class, "subject class")?;
    put_str(out, &message.subject_method, "subject method")?;
    match message.subject_id {
        Some(id) => {
            out.put_u8(1);
            out.put_slice(id.as_bytes());
        }
        None => out.put_u8(0),
    }
    Ok(())
}

/// Decodes a complete header and pairs it with `payload`.
///
/// Every field read is bounds-checked and trailing bytes are rejected.
pub fn decode_header(header: &[u8], payload: Bytes) -> Result<Message, CodecError> {
    let mut buf = header;
    let version = take_u8(&mut buf, "version")?;
    let kind = MessageType::from_tag(take_u8(&mut buf, "type")?)?;
    let trace = take_bool(&mut buf, "trace")?;
    let status = Status::from_code(take_i16(&mut buf, "status")?)?;
    let message_id = take_guid(&mut buf, "message id")?;
    let source_id = take_guid(&mut buf, "source id")?;
    let host = take_str(&mut buf, "source host")?;
    let port = take_u16(&mut buf, "source port")?;
    let destination = take_guid(&mut buf, "destination")?;
    let ttl = take_i16(&mut buf, "ttl")?;
    let timestamp = take_i64(&mut buf, "timestamp")?;
    let multicast = take_bool(&mut buf, "multicast")?;
    let exact = take_bool(&mut buf, "exact")?;
    let subject_class = take_str(&mut buf, "subject class")?;
    let subject_method = take_str(&mut buf, "subject method")?;
    let subject_id = if take_bool(&mut buf, "subject id flag")? {
        Some(take_guid(&mut buf, "subject id")?)
    } else {
        None
    };
    if buf.has_remaining() {
        return Err(CodecError::InvalidMessage("trailing bytes after header"));
    }

    let message = Message {
        version,
        kind,
        trace,
        status,
        message_id,
        source: NodeAddress::new(source_id, host, port),
        destination,
        subject_id,
        subject_class,
        subject_method,
        ttl,
        timestamp,
        multicast,
        exact,
        payload: Payload::from_raw(payload),
    };
    message.validate()?;
    Ok(message)
}

fn put_str(out: &mut BytesMut, value: &str, field: &'static str) -> Result<(), CodecError> {
    let len = u16::try_from(value.len()).map_err(|_| CodecError::TooLarge {
        section: field,
        len: value.len(),
        max: u16::MAX as usize,
    })?;
    out.put_u16(len);
    out.put_slice(value.as_bytes());
    Ok(())
}

fn need(buf: &[u8], n: usize, field: &'static str) -> Result<(), CodecError> {
    if buf.remaining() < n {
        return Err(CodecError::Truncated(field));
    }
    Ok(())
}

fn take_u8(buf: &mut &[u8], field: &'static str) -> Result<u8, CodecError> {
    need(buf, 1, field)?;
    Ok(buf.get_u8())
}

fn take_bool(buf: &mut &[u8], field: &'static str) -> Result<bool, CodecError> {
    match take_u8(buf, field)? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(CodecError::InvalidMessage("boolean field out of range")),
    }
}

fn take_u16(buf: &mut &[u8], field: &'static str) -> Result<u16, CodecError> {
    need(buf, 2, field)?;
    Ok(buf.get_u16())
}

fn take_i16(buf: &mut &[u8], field: &'static str) -> Result<i16, CodecError> {
    need(buf, 2, field)?;
    Ok(buf.get_i16())
}

fn take_i64(buf: &mut &[u8], field: &'static str) -> Result<i64, CodecError> {
    need(buf, 8, field)?;
    Ok(buf.get_i64())
}

fn take_guid(buf: &mut &[u8], field: &'static str) -> Result<Guid, CodecError> {
    need(buf, GUID_LEN, field)?;
    let mut bytes = [0_u8; GUID_LEN];
    buf.copy_to_slice(&mut bytes);
    Ok(Guid::from_raw(bytes))
}

fn take_str(buf: &mut &[u8], field: &'static str) -> Result<String, CodecError> {
    let len = take_u16(buf, field)? as usize;
    need(buf, len, field)?;
    let current: &[u8] = *buf;
    let (text, rest) = current.split_at(len);
    let text = std::str::from_utf8(text)
        .map_err(|_| CodecError::InvalidMessage("string field is not utf-8"))?
        .to_string();
    *buf = rest;
    Ok(text)
}
