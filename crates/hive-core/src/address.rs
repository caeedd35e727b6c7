use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AddressError;
use crate::guid::Guid;

/// Identity and message endpoint of one overlay node.
///
/// Two addresses are the same node when their ids match, regardless of endpoint, so
/// equality, hashing, and ordering all look at `node_id` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAddress {
    pub node_id: Guid,
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(node_id: Guid, host: impl Into<String>, port: u16) -> Self {
        Self {
            node_id,
            host: host.into(),
            port,
        }
    }

    /// `host:port` string suitable for socket connection helpers.
    pub fn endpoint(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl PartialEq for NodeAddress {
    fn eq(&self, other: &Self) -> bool {
        self.node_id == other.node_id
    }
}

impl Eq for NodeAddress {}

impl Hash for NodeAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node_id.hash(state);
    }
}

impl PartialOrd for NodeAddress {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeAddress {
    fn cmp(&self, other: &Self) -> Ordering {
        self.node_id.cmp(&other.node_id)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.node_id, self.endpoint())
    }
}

/// Parses `GUID@host:port`. IPv6 hosts may be bracketed.
impl FromStr for NodeAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, endpoint) = s
            .trim()
            .split_once('@')
            .ok_or_else(|| AddressError::Malformed(s.to_string()))?;
        let (host, port) = endpoint
            .rsplit_once(':')
            .ok_or_else(|| AddressError::Malformed(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(AddressError::Malformed(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| AddressError::Port(port.to_string()))?;
        Ok(Self::new(id.parse::<Guid>()?, host, port))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::NodeAddress;
    use crate::error::AddressError;
    use crate::guid::Guid;

    #[test]
    fn identity_is_node_id_only() {
        let id = Guid::random();
        let a = NodeAddress::new(id, "10.0.0.1", 12001);
        let b = NodeAddress::new(id, "10.0.0.2", 13001);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(!set.insert(b));
    }

    #[test]
    fn text_form_round_trips() {
        let address = NodeAddress::new(Guid::random(), "127.0.0.1", 12001);
        let parsed: NodeAddress = address.to_string().parse().expect("address should parse");
        assert_eq!(parsed, address);
        assert_eq!(parsed.host, "127.0.0.1");
        assert_eq!(parsed.port, 12001);
    }

    #[test]
    fn bracketed_ipv6_host_round_trips() {
        let address = NodeAddress::new(Guid::random(), "::1", 9000);
        assert!(address.endpoint().starts_with("[::1]"));
        let parsed: NodeAddress = address.to_string().parse().expect("address should parse");
        assert_eq!(parsed.host, "::1");
        assert_eq!(parsed.port, 9000);
    }

    #[test]
    fn malformed_text_is_rejected() {
        assert!(matches!(
            "no-separator".parse::<NodeAddress>(),
            Err(AddressError::Malformed(_))
        ));
        let text = format!("{}@host:port", Guid::random());
        assert!(matches!(
            text.parse::<NodeAddress>(),
            Err(AddressError::Port(_))
        ));
        assert!(matches!(
            "abc@host:1".parse::<NodeAddress>(),
            Err(AddressError::NodeId(_))
        ));
    }
}
