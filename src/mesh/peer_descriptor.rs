use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::error::ConfigError;
use crate::host::node_id::{ListenAddr, NodeId};
use crate::host::transport_host::TransportHost;


/// Everything needed to reach a peer from the outside: its identity and the addresses it listens
///  on. The textual form is `<node id>[<address> <address> ...]`, e.g.
///  `3fa2[/ip4/127.0.0.1/tcp/4001 /ip6/::1/tcp/4001]`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PeerDescriptor {
    pub id: NodeId,
    pub addrs: Vec<ListenAddr>,
}

impl PeerDescriptor {
    pub fn for_host(host: &dyn TransportHost) -> PeerDescriptor {
        PeerDescriptor {
            id: host.id(),
            addrs: host.addrs(),
        }
    }
}

impl Display for PeerDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let addrs = self.addrs.iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>();
        write!(f, "{}[{}]", self.id, addrs.join(" "))
    }
}

impl FromStr for PeerDescriptor {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidDescriptor(s.to_string());

        let (id, addrs) = s.trim()
            .strip_suffix(']')
            .and_then(|s| s.split_once('['))
            .ok_or_else(invalid)?;

        let id = NodeId::from_str(id)?;
        let addrs = addrs.split_whitespace()
            .map(ListenAddr::from_str)
            .collect::<Result<Vec<_>, _>>()?;

        // a peer without addresses can not be dialed
        if addrs.is_empty() {
            return Err(invalid());
        }

        Ok(PeerDescriptor { id, addrs })
    }
}


#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use rstest::rstest;

    use super::*;

    #[test]
    fn test_parse() {
        let descriptor = PeerDescriptor::from_str("abc123[/ip4/127.0.0.1/tcp/4001 /ip6/::1/tcp/4001]").unwrap();
        assert_eq!(descriptor.id, NodeId::new("abc123").unwrap());
        assert_eq!(descriptor.addrs, vec![
            ListenAddr::Tcp(SocketAddr::from(([127, 0, 0, 1], 4001))),
            ListenAddr::Tcp("[::1]:4001".parse().unwrap()),
        ]);
        assert_eq!(descriptor.to_string(), "abc123[/ip4/127.0.0.1/tcp/4001 /ip6/::1/tcp/4001]");
    }

    #[test]
    fn test_parse_memory() {
        let descriptor = PeerDescriptor::from_str(" node7[ /memory/7 ] ").unwrap();
        assert_eq!(descriptor.addrs, vec![ListenAddr::Memory(7)]);
    }

    #[rstest]
    #[case::no_brackets("abc123", ConfigError::InvalidDescriptor("abc123".to_string()))]
    #[case::unclosed("abc123[/memory/1", ConfigError::InvalidDescriptor("abc123[/memory/1".to_string()))]
    #[case::no_addrs("abc123[]", ConfigError::InvalidDescriptor("abc123[]".to_string()))]
    #[case::bad_id("abc-123[/memory/1]", ConfigError::InvalidNodeId("abc-123".to_string()))]
    #[case::empty_id("[/memory/1]", ConfigError::InvalidNodeId("".to_string()))]
    #[case::bad_addr("abc123[/memory/x]", ConfigError::InvalidAddress("/memory/x".to_string()))]
    fn test_parse_invalid(#[case] s: &str, #[case] expected: ConfigError) {
        assert_eq!(PeerDescriptor::from_str(s), Err(expected));
    }
}
