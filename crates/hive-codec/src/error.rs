use thiserror::Error;

/// Errors returned by header, frame, and message construction helpers.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Socket or stream failure while reading or writing a frame.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// Header bytes ended before a field could be read.
    #[error("truncated header: missing {0}")]
    Truncated(&'static str),
    /// A length prefix exceeded the configured frame limit.
    #[error("{section} length {len} exceeds limit {max}")]
    TooLarge {
        section: &'static str,
        len: usize,
        max: usize,
    },
    /// Stream closed in the middle of a frame.
    #[error("connection closed mid-frame")]
    UnexpectedEof,
    /// Message-type tag is not one of the known variants.
    #[error("unknown message type tag {0}")]
    UnknownType(u8),
    /// Status code is not one of the known variants.
    #[error("unknown status code {0}")]
    UnknownStatus(i16),
    /// Envelope-level schema validation failure.
    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),
}

#[cfg(test)]
mod tests {
    use super::CodecError;

    #[test]
    fn error_messages_are_stable() {
        assert_eq!(
            CodecError::Truncated("ttl").to_string(),
            "truncated header: missing ttl"
        );
        assert_eq!(
            CodecError::TooLarge {
                section: "header",
                len: 10,
                max: 5
            }
            .to_string(),
            "header length 10 exceeds limit 5"
        );
        assert_eq!(
            CodecError::UnknownStatus(7).to_string(),
            "unknown status code 7"
        );
        assert_eq!(
            CodecError::InvalidMessage("empty method").to_string(),
            "invalid message: empty method"
        );
    }
}
