use std::fmt;

use crate::error::CodecError;

/// Routing mode of a [`crate::Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Reply,
    RouteToNode,
    RouteToObject,
    PublishObject,
    UnpublishObject,
}

impl MessageType {
    pub const fn tag(self) -> u8 {
        match self {
            Self::Reply => 0,
            Self::RouteToNode => 1,
            Self::RouteToObject => 2,
            Self::PublishObject => 3,
            Self::UnpublishObject => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, CodecError> {
        match tag {
            0 => Ok(Self::Reply),
            1 => Ok(Self::RouteToNode),
            2 => Ok(Self::RouteToObject),
            3 => Ok(Self::PublishObject),
            4 => Ok(Self::UnpublishObject),
            other => Err(CodecError::UnknownType(other)),
        }
    }
}

/// Reply status carried in every message header.
///
/// Codes follow HTTP conventions where a counterpart exists. `Throwable` marks a reply
/// whose payload is a [`crate::RemoteError`] rather than the requested record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Throwable,
    Ok,
    Created,
    Accepted,
    NotModified,
    TemporaryRedirect,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    NotAcceptable,
    Conflict,
    Gone,
    PreconditionFailed,
    RangeNotSatisfiable,
    ExpectationFailed,
    InternalServerError,
    NotImplemented,
    BadGateway,
    ServiceUnavailable,
    NoSuchNode,
}

const ALL_STATUSES: [Status; 22] = [
    Status::Throwable,
    Status::Ok,
    Status::Created,
    Status::Accepted,
    Status::NotModified,
    Status::TemporaryRedirect,
    Status::BadRequest,
    Status::Unauthorized,
    Status::Forbidden,
    Status::NotFound,
    Status::MethodNotAllowed,
    Status::NotAcceptable,
    Status::Conflict,
    Status::Gone,
    Status::PreconditionFailed,
    Status::RangeNotSatisfiable,
    Status::ExpectationFailed,
    Status::InternalServerError,
    Status::NotImplemented,
    Status::BadGateway,
    Status::ServiceUnavailable,
    Status::NoSuchNode,
];

impl Status {
    pub const fn code(self) -> i16 {
        match self {
            Self::Throwable => -1,
            Self::Ok => 200,
            Self::Created => 201,
            Self::Accepted => 202,
            Self::NotModified => 304,
            Self::TemporaryRedirect => 307,
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::MethodNotAllowed => 405,
            Self::NotAcceptable => 406,
            Self::Conflict => 409,
            Self::Gone => 410,
            Self::PreconditionFailed => 412,
            Self::RangeNotSatisfiable => 416,
            Self::ExpectationFailed => 417,
            Self::InternalServerError => 500,
            Self::NotImplemented => 501,
            Self::BadGateway => 502,
            Self::ServiceUnavailable => 503,
            Self::NoSuchNode => 901,
        }
    }

    pub fn from_code(code: i16) -> Result<Self, CodecError> {
        ALL_STATUSES
            .iter()
            .copied()
            .find(|status| status.code() == code)
            .ok_or(CodecError::UnknownStatus(code))
    }

    /// True for the 2xx family.
    pub const fn is_successful(self) -> bool {
        let code = self.code();
        code >= 0 && code / 100 == 2
    }

    pub const fn reason(self) -> &'static str {
        match self {
            Self::Throwable => "Throwable",
            Self::Ok => "OK",
            Self::Created => "Created",
            Self::Accepted => "Accepted",
            Self::NotModified => "Not Modified",
            Self::TemporaryRedirect => "Temporary Redirect",
            Self::BadRequest => "Bad Request",
            Self::Unauthorized => "Unauthorized",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::NotAcceptable => "Not Acceptable",
            Self::Conflict => "Conflict",
            Self::Gone => "Gone",
            Self::PreconditionFailed => "Precondition Failed",
            Self::RangeNotSatisfiable => "Requested Range Not Satisfiable",
            Self::ExpectationFailed => "Expectation Failed",
            Self::InternalServerError => "Internal Server Error",
            Self::NotImplemented => "Not Implemented",
            Self::BadGateway => "Bad Gateway",
            Self::ServiceUnavailable => "Service Unavailable",
            Self::NoSuchNode => "No Such Node",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}

#[cfg(test)]
mod tests {
    use super::{MessageType, Status, ALL_STATUSES};

    #[test]
    fn codes_round_trip() {
        for status in ALL_STATUSES {
            assert_eq!(
                Status::from_code(status.code()).expect("known code should parse"),
                status
            );
        }
        assert!(Status::from_code(299).is_err());
    }

    #[test]
    fn only_2xx_is_successful() {
        assert!(Status::Ok.is_successful());
        assert!(Status::Created.is_successful());
        assert!(Status::Accepted.is_successful());
        assert!(!Status::NotModified.is_successful());
        assert!(!Status::NotFound.is_successful());
        assert!(!Status::NoSuchNode.is_successful());
        assert!(!Status::Throwable.is_successful());
    }

    #[test]
    fn display_includes_code_and_reason() {
        assert_eq!(Status::NoSuchNode.to_string(), "901 No Such Node");
    }

    #[test]
    fn type_tags_round_trip() {
        for kind in [
            MessageType::Reply,
            MessageType::RouteToNode,
            MessageType::RouteToObject,
            MessageType::PublishObject,
            MessageType::UnpublishObject,
        ] {
            assert_eq!(
                MessageType::from_tag(kind.tag()).expect("known tag should parse"),
                kind
            );
        }
        assert!(MessageType::from_tag(9).is_err());
    }
}
