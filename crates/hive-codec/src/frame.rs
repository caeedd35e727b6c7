//! Length-prefixed framing: `[u32 header_len][u32 payload_len][header][payload]`.

use std::io::{self, Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::header::{decode_header, encode_header};
use crate::message::Message;

/// Largest header accepted from a peer.
pub const MAX_HEADER_LEN: usize = 64 * 1024;
/// Largest payload accepted from a peer.
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

const PREFIX_LEN: usize = 4;

/// Encodes `message` as one complete frame.
pub fn encode_frame(message: &Message) -> Result<Bytes, CodecError> {
    let mut header = BytesMut::with_capacity(256);
    encode_header(message, &mut header)?;
    let payload = message.payload.raw();
    check_len("header", header.len(), MAX_HEADER_LEN)?;
    check_len("payload", payload.len(), MAX_PAYLOAD_LEN)?;

    let mut out = BytesMut::with_capacity(2 * PREFIX_LEN + header.len() + payload.len());
    out.put_u32(header.len() as u32);
    out.put_u32(payload.len() as u32);
    out.put_slice(&header);
    out.put_slice(payload);
    Ok(out.freeze())
}

/// Decodes exactly one frame occupying all of `bytes`.
pub fn decode_frame(bytes: &[u8]) -> Result<Message, CodecError> {
    let mut decoder = FrameDecoder::new();
    decoder.extend(bytes);
    let message = decoder.next_message()?.ok_or(CodecError::UnexpectedEof)?;
    if decoder.buffered() != 0 {
        return Err(CodecError::InvalidMessage("trailing bytes after frame"));
    }
    Ok(message)
}

/// Writes one frame and flushes the writer.
pub fn write_message<W: Write>(writer: &mut W, message: &Message) -> Result<(), CodecError> {
    let frame = encode_frame(message)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Reads one frame with blocking reads.
///
/// Returns `Ok(None)` when the stream ends cleanly before the first byte of a frame.
pub fn read_message<R: Read>(reader: &mut R) -> Result<Option<Message>, CodecError> {
    let mut prefix = [0_u8; 2 * PREFIX_LEN];
    let mut filled = 0;
    while filled < prefix.len() {
        match reader.read(&mut prefix[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(CodecError::UnexpectedEof),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    let mut lengths = &prefix[..];
    let header_len = lengths.get_u32() as usize;
    let payload_len = lengths.get_u32() as usize;
    check_len("header", header_len, MAX_HEADER_LEN)?;
    check_len("payload", payload_len, MAX_PAYLOAD_LEN)?;

    let mut header = vec![0_u8; header_len];
    read_exact(reader, &mut header)?;
    let mut payload = vec![0_u8; payload_len];
    read_exact(reader, &mut payload)?;
    decode_header(&header, Bytes::from(payload)).map(Some)
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), CodecError> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            CodecError::UnexpectedEof
        } else {
            CodecError::Io(e)
        }
    })
}

fn check_len(section: &'static str, len: usize, max: usize) -> Result<(), CodecError> {
    if len > max {
        return Err(CodecError::TooLarge { section, len, max });
    }
    Ok(())
}

#[derive(Debug)]
enum DecodeState {
    HeaderLength,
    PayloadLength {
        header_len: usize,
    },
    Header {
        header_len: usize,
        payload_len: usize,
    },
    Payload {
        header: Bytes,
        payload_len: usize,
    },
}

/// Incremental frame parser for bytes arriving in arbitrary chunks.
///
/// Feed bytes with [`FrameDecoder::extend`] and drain completed messages with
/// [`FrameDecoder::next_message`]. A decode error leaves the decoder unusable for the
/// rest of the stream, since frame boundaries are lost.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    state: DecodeState,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            state: DecodeState::HeaderLength,
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes received but not yet consumed by a completed state.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// True between frames with nothing buffered.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, DecodeState::HeaderLength) && self.buf.is_empty()
    }

    /// Advances the state machine as far as buffered bytes allow.
    pub fn next_message(&mut self) -> Result<Option<Message>, CodecError> {
        loop {
            match &self.state {
                DecodeState::HeaderLength => {
                    if self.buf.len() < PREFIX_LEN {
                        return Ok(None);
                    }
                    let header_len = self.buf.get_u32() as usize;
                    check_len("header", header_len, MAX_HEADER_LEN)?;
                    self.state = DecodeState::PayloadLength { header_len };
                }
                DecodeState::PayloadLength { header_len } => {
                    if self.buf.len() < PREFIX_LEN {
                        return Ok(None);
                    }
                    let header_len = *header_len;
                    let payload_len = self.buf.get_u32() as usize;
                    check_len("payload", payload_len, MAX_PAYLOAD_LEN)?;
                    self.state = DecodeState::Header {
                        header_len,
                        payload_len,
                    };
                }
                DecodeState::Header {
                    header_len,
                    payload_len,
                } => {
                    if self.buf.len() < *header_len {
                        return Ok(None);
                    }
                    let payload_len = *payload_len;
                    let header = self.buf.split_to(*header_len).freeze();
                    self.state = DecodeState::Payload {
                        header,
                        payload_len,
                    };
                }
                DecodeState::Payload {
                    header,
                    payload_len,
                } => {
                    if self.buf.len() < *payload_len {
                        return Ok(None);
                    }
                    let payload = self.buf.split_to(*payload_len).freeze();
                    let header = header.clone();
                    self.state = DecodeState::HeaderLength;
                    return decode_header(&header, payload).map(Some);
                }
            }
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
