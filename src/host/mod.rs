//! Everything a node needs to take part in the mesh at the transport level: its identity, its
//!  peer store, streams, and the [transport_host::TransportHost] abstraction with a TCP based
//!  implementation.

pub mod identity;
pub mod node_id;
pub mod peerstore;
pub mod stream;
pub mod tcp_host;
pub mod transport_host;
