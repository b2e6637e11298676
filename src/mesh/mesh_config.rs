use crate::host::node_id::ProtocolTag;
use crate::host::peerstore::AddrTtl;
use crate::ping::ping_config::PingConfig;


pub const DEFAULT_PROTOCOL: &str = "ping/1.0";

#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// the protocol tag all of the mesh's streams are opened for
    pub protocol: ProtocolTag,
    /// TTL of the peer addresses registered during mesh formation
    pub peer_ttl: AddrTtl,
    pub ping: PingConfig,
}

impl MeshConfig {
    pub fn new() -> MeshConfig {
        MeshConfig {
            protocol: ProtocolTag::new(DEFAULT_PROTOCOL)
                .expect("default protocol tag is valid"),
            peer_ttl: AddrTtl::Permanent,
            ping: PingConfig::new(),
        }
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self::new()
    }
}
