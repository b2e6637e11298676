use std::fmt::{Debug, Display, Formatter};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::error::ConfigError;


/// A node's identity in the mesh. It is an opaque token as far as mesh formation and the ping
///  protocol are concerned: it is compared, hashed and printed, nothing else.
///
/// NB: Identities are the only equality key that is safe across processes - two hosts must never
///      be considered the same based on their position in some list.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Result<NodeId, ConfigError> {
        let id = id.into();
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::InvalidNodeId(id));
        }
        Ok(NodeId(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last `len` characters of the id (or the whole id if it is shorter) - short enough to
    ///  be readable in logs and ping messages
    pub fn suffix(&self, len: usize) -> &str {
        // ids are ASCII, so byte offsets are char offsets
        &self.0[self.0.len().saturating_sub(len)..]
    }
}

impl Debug for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.0)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeId::new(s)
    }
}


/// A transport level address a host listens on, tagged with the transport it belongs to.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ListenAddr {
    Tcp(SocketAddr),
    /// in-process endpoint, identified by a number that is unique per in-memory network
    Memory(u64),
}

impl Debug for ListenAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl Display for ListenAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenAddr::Tcp(SocketAddr::V4(a)) => write!(f, "/ip4/{}/tcp/{}", a.ip(), a.port()),
            ListenAddr::Tcp(SocketAddr::V6(a)) => write!(f, "/ip6/{}/tcp/{}", a.ip(), a.port()),
            ListenAddr::Memory(n) => write!(f, "/memory/{}", n),
        }
    }
}

impl FromStr for ListenAddr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidAddress(s.to_string());

        let parts = s.split('/').collect::<Vec<_>>();
        match parts.as_slice() {
            ["", "ip4", ip, "tcp", port] | ["", "ip6", ip, "tcp", port] => {
                let ip = IpAddr::from_str(ip).map_err(|_| invalid())?;
                if ip.is_ipv4() != (parts[1] == "ip4") {
                    return Err(invalid());
                }
                let port = u16::from_str(port).map_err(|_| invalid())?;
                Ok(ListenAddr::Tcp(SocketAddr::new(ip, port)))
            }
            ["", "memory", n] => {
                let n = u64::from_str(n).map_err(|_| invalid())?;
                Ok(ListenAddr::Memory(n))
            }
            _ => Err(invalid()),
        }
    }
}

impl From<SocketAddr> for ListenAddr {
    fn from(addr: SocketAddr) -> Self {
        ListenAddr::Tcp(addr)
    }
}


/// Identifies the application protocol a stream carries. Both sides of a stream must agree on it,
///  and a host only accepts inbound streams for tags it registered a handler for.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ProtocolTag(String);

impl ProtocolTag {
    pub fn new(tag: impl Into<String>) -> Result<ProtocolTag, ConfigError> {
        let tag = tag.into();
        if tag.is_empty() || tag.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ConfigError::InvalidProtocol(tag));
        }
        Ok(ProtocolTag(tag))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Debug for ProtocolTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl Display for ProtocolTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProtocolTag {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProtocolTag::new(s)
    }
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::v4("/ip4/127.0.0.1/tcp/4001", ListenAddr::Tcp(SocketAddr::from(([127, 0, 0, 1], 4001))))]
    #[case::v6("/ip6/::1/tcp/80", ListenAddr::Tcp("[::1]:80".parse().unwrap()))]
    #[case::memory("/memory/17", ListenAddr::Memory(17))]
    fn test_listen_addr_parse(#[case] s: &str, #[case] expected: ListenAddr) {
        let parsed = ListenAddr::from_str(s).unwrap();
        assert_eq!(parsed, expected);
        assert_eq!(parsed.to_string(), s);
    }

    #[rstest]
    #[case::empty("")]
    #[case::no_transport("/ip4/127.0.0.1")]
    #[case::wrong_family("/ip4/::1/tcp/80")]
    #[case::bad_port("/ip4/127.0.0.1/tcp/99999")]
    #[case::unknown("/dns/example.com/tcp/80")]
    #[case::ws_suffix("/ip4/127.0.0.1/tcp/80/ws")]
    fn test_listen_addr_parse_invalid(#[case] s: &str) {
        assert_eq!(ListenAddr::from_str(s), Err(ConfigError::InvalidAddress(s.to_string())));
    }

    #[rstest]
    #[case::long("QmPeer1234", 2, "34")]
    #[case::exact("ab", 2, "ab")]
    #[case::short("a", 2, "a")]
    #[case::zero("abc", 0, "")]
    fn test_node_id_suffix(#[case] id: &str, #[case] len: usize, #[case] expected: &str) {
        assert_eq!(NodeId::new(id).unwrap().suffix(len), expected);
    }

    #[rstest]
    #[case::empty("")]
    #[case::space("ab cd")]
    #[case::bracket("ab[")]
    #[case::non_ascii("äb")]
    fn test_node_id_invalid(#[case] id: &str) {
        assert_eq!(NodeId::new(id), Err(ConfigError::InvalidNodeId(id.to_string())));
    }

    #[test]
    fn test_protocol_tag() {
        assert_eq!(ProtocolTag::new("ping/1.0").unwrap().as_str(), "ping/1.0");
        assert!(ProtocolTag::new("").is_err());
        assert!(ProtocolTag::new("ping 1.0").is_err());
        assert!(ProtocolTag::new("ping\n").is_err());
    }
}
