use thiserror::Error;

/// Errors returned when parsing or converting a [`crate::Guid`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GuidError {
    /// Input did not carry exactly the expected number of hex digits or bytes.
    #[error("invalid guid length: expected {expected}, found {found}")]
    Length { expected: usize, found: usize },
    /// Input contained a character outside `[0-9a-fA-F]`.
    #[error("invalid guid format: {0}")]
    Format(String),
}

/// Errors returned when parsing a [`crate::NodeAddress`] from text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    /// Text is not of the form `GUID@host:port`.
    #[error("malformed node address: {0}")]
    Malformed(String),
    /// Node id portion did not parse.
    #[error("invalid node id: {0}")]
    NodeId(#[from] GuidError),
    /// Port portion did not parse as a 16-bit integer.
    #[error("invalid port: {0}")]
    Port(String),
}
