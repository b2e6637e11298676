use std::io;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;

use crate::host::node_id::{ListenAddr, NodeId, ProtocolTag};
use crate::host::peerstore::AddrTtl;
use crate::host::stream::Stream;


/// The capability a node's transport provides to mesh formation and the ping protocol: identity,
///  listening addresses, an address book of peers, and opening / accepting streams.
///
/// Everything below this interface (sockets, handshakes, multiplexing) is the implementation's
///  business. Mesh formation and the protocol only ever talk to hosts through this trait, which
///  allows substituting in-memory implementations or mocks for testing.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TransportHost: Send + Sync + 'static {
    fn id(&self) -> NodeId;

    fn addrs(&self) -> Vec<ListenAddr>;

    /// Registers a handler that is called once per inbound stream that a remote peer opens for
    ///  the given protocol. This must happen before any dial that could race with an inbound
    ///  stream; streams for protocols without a handler are refused.
    async fn set_stream_handler(&self, protocol: ProtocolTag, handler: Arc<dyn StreamHandler>);

    /// Opens a stream to a peer, connecting to it first if necessary. The peer's addresses are
    ///  taken from the peer store.
    async fn new_stream(&self, peer: &NodeId, protocol: &ProtocolTag) -> io::Result<Stream>;

    async fn add_peer_addrs(&self, peer: NodeId, addrs: Vec<ListenAddr>, ttl: AddrTtl);

    /// all peers in the peer store, including this host itself
    async fn peers(&self) -> Vec<NodeId>;

    /// human readable dump of the peer store, for logging
    async fn describe_peers(&self) -> String;
}

/// Called by a [TransportHost] for every inbound stream of the protocol it is registered for.
///
/// It is passed around as an `Arc<dyn ...>` to minimize dependencies of [TransportHost]
///  implementations. Handlers must not block for long: implementations typically hand the stream
///  off to spawned tasks.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn handle_stream(&self, stream: Stream);
}
