use std::fmt::{Display, Formatter};
use std::io;

use thiserror::Error;

use crate::host::node_id::NodeId;
use crate::host::stream::StreamInfo;


/// Identifies which of a stream's two protocol loops an error or event refers to.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum LoopSide {
    Sender,
    Receiver,
}
impl Display for LoopSide {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopSide::Sender => write!(f, "write side"),
            LoopSide::Receiver => write!(f, "read side"),
        }
    }
}

#[derive(Debug, Error)]
pub enum MeshError {
    /// Dialing, connecting or listening failed while forming the mesh
    #[error("could not open stream from {from} to {to}: {source}")]
    Setup {
        from: NodeId,
        to: NodeId,
        #[source]
        source: io::Error,
    },

    /// Reading or writing failed on an already established stream
    #[error("{side} of stream {stream:?} failed: {source}")]
    ProtocolIo {
        side: LoopSide,
        stream: StreamInfo,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Problems with externally provided node identities, addresses or peer descriptors
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    #[error("invalid node id {0:?}: expected a non-empty alphanumeric string")]
    InvalidNodeId(String),

    #[error("invalid listen address {0:?}")]
    InvalidAddress(String),

    #[error("invalid peer descriptor {0:?}: expected <node id>[<address> <address> ...]")]
    InvalidDescriptor(String),

    #[error("invalid protocol tag {0:?}")]
    InvalidProtocol(String),

    #[error("invalid node key: {0}")]
    InvalidKey(String),

    #[error("invalid ping token {0:?}: expected a non-empty token without whitespace, '>' or '#'")]
    InvalidPingToken(String),
}
