use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::host::node_id::{ListenAddr, NodeId, ProtocolTag};
use crate::host::peerstore::{AddrTtl, Peerstore};
use crate::host::stream::{Stream, StreamId, StreamInfo};
use crate::host::transport_host::{StreamHandler, TransportHost};

type HandlerRegistry = Arc<RwLock<FxHashMap<ProtocolTag, Arc<dyn StreamHandler>>>>;

/// buffer size of the in-memory pipes backing streams
const PIPE_CAPACITY: usize = 64 * 1024;


#[derive(Default)]
struct NetworkState {
    endpoints: FxHashMap<u64, (NodeId, HandlerRegistry)>,
    unreachable: FxHashSet<NodeId>,
    dials: Vec<(NodeId, NodeId)>,
}

/// An in-process 'network' connecting [InMemoryHost]s, for testing mesh formation and the ping
///  protocol without sockets.
///
/// Streams are pairs of in-memory pipes, so they behave like real byte streams: ordered,
///  full-duplex, and closing one end is seen as end-of-stream at the other. The network keeps a
///  log of all dials, and individual hosts can be made unreachable to inject setup failures.
#[derive(Default)]
pub struct InMemoryNetwork {
    state: Mutex<NetworkState>,
    next_addr: AtomicU64,
    next_stream_id: AtomicU64,
}

impl InMemoryNetwork {
    pub fn new() -> Arc<InMemoryNetwork> {
        Default::default()
    }

    /// Creates a host with a fresh address on this network. Like any host, it knows itself in its
    ///  peer store.
    pub async fn new_host(self: &Arc<Self>, id: NodeId) -> Arc<InMemoryHost> {
        let addr = self.next_addr.fetch_add(1, Ordering::Relaxed) + 1;
        let handlers: HandlerRegistry = Default::default();

        self.state.lock().unwrap()
            .endpoints.insert(addr, (id.clone(), handlers.clone()));

        let peerstore = Peerstore::new();
        peerstore.add_addrs(id.clone(), &[ListenAddr::Memory(addr)], AddrTtl::Permanent).await;

        Arc::new(InMemoryHost {
            myself: id,
            addr: ListenAddr::Memory(addr),
            network: self.clone(),
            peerstore,
            handlers,
        })
    }

    /// all dials in the order they happened, as (dialing node, dialed node)
    pub fn dials(&self) -> Vec<(NodeId, NodeId)> {
        self.state.lock().unwrap().dials.clone()
    }

    /// Dials to the given node fail from now on
    pub fn set_unreachable(&self, id: &NodeId) {
        let _ = self.state.lock().unwrap()
            .unreachable.insert(id.clone());
    }

    async fn connect(&self, from: &NodeId, addr: u64, peer: &NodeId, protocol: &ProtocolTag) -> io::Result<Stream> {
        let handlers = {
            let mut state = self.state.lock().unwrap();
            state.dials.push((from.clone(), peer.clone()));

            if state.unreachable.contains(peer) {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, format!("peer {} is unreachable", peer)));
            }
            match state.endpoints.get(&addr) {
                None => return Err(io::Error::new(io::ErrorKind::ConnectionRefused, format!("nothing listening at /memory/{}", addr))),
                Some((found, _)) if found != peer => {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, format!("expected peer {} at /memory/{}, found {}", peer, addr, found)));
                }
                Some((_, handlers)) => handlers.clone(),
            }
        };

        let handler = handlers.read().await
            .get(protocol)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, format!("peer {} does not support protocol {}", peer, protocol)))?;

        let info = StreamInfo {
            id: StreamId(self.next_stream_id.fetch_add(1, Ordering::Relaxed) + 1),
            initiator: from.clone(),
            responder: peer.clone(),
            protocol: protocol.clone(),
        };
        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);

        let remote = Stream::new(info.clone(), peer.clone(), remote);
        tokio::spawn(async move {
            handler.handle_stream(remote).await;
        });

        Ok(Stream::new(info, from.clone(), local))
    }
}


/// A [TransportHost] living on an [InMemoryNetwork]
pub struct InMemoryHost {
    myself: NodeId,
    addr: ListenAddr,
    network: Arc<InMemoryNetwork>,
    peerstore: Peerstore,
    handlers: HandlerRegistry,
}

#[async_trait]
impl TransportHost for InMemoryHost {
    fn id(&self) -> NodeId {
        self.myself.clone()
    }

    fn addrs(&self) -> Vec<ListenAddr> {
        vec![self.addr]
    }

    async fn set_stream_handler(&self, protocol: ProtocolTag, handler: Arc<dyn StreamHandler>) {
        trace!("listening for streams of protocol {} on {}", protocol, self.myself);
        if self.handlers.write().await
            .insert(protocol.clone(), handler)
            .is_some()
        {
            debug!("replaced previous stream handler for protocol {} on {}", protocol, self.myself);
        }
    }

    async fn new_stream(&self, peer: &NodeId, protocol: &ProtocolTag) -> io::Result<Stream> {
        let mut last_error = io::Error::new(io::ErrorKind::NotFound, format!("no in-memory address known for peer {}", peer));
        for addr in self.peerstore.addrs(peer).await {
            if let ListenAddr::Memory(addr) = addr {
                match self.network.connect(&self.myself, addr, peer, protocol).await {
                    Ok(stream) => {
                        debug!("opened stream {:?}", stream.info());
                        return Ok(stream);
                    }
                    Err(e) => last_error = e,
                }
            }
        }
        Err(last_error)
    }

    async fn add_peer_addrs(&self, peer: NodeId, addrs: Vec<ListenAddr>, ttl: AddrTtl) {
        self.peerstore.add_addrs(peer, &addrs, ttl).await;
    }

    async fn peers(&self) -> Vec<NodeId> {
        self.peerstore.peers().await
    }

    async fn describe_peers(&self) -> String {
        self.peerstore.describe().await
    }
}
