use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::error::MeshError;
use crate::host::node_id::{NodeId, ProtocolTag};
use crate::host::peerstore::AddrTtl;
use crate::host::stream::{Stream, StreamInfo};
use crate::host::transport_host::{StreamHandler, TransportHost};
use crate::mesh::peer_descriptor::PeerDescriptor;
use crate::mesh::stream_matrix::StreamMatrix;


/// How a mesh is formed
pub enum MeshMode {
    /// All hosts live in this process, and every pair of them is connected by exactly one stream.
    ///  Hosts are dialed in the order of the list: for every pair (i, j) with i < j, host i dials
    ///  host j.
    FullMesh { hosts: Vec<Arc<dyn TransportHost>> },
    /// A single local host that accepts inbound streams and dials every known peer once.
    Connect {
        local: Arc<dyn TransportHost>,
        peers: Vec<PeerDescriptor>,
    },
}

/// A dial that failed in [MeshMode::Connect], where failures do not abort mesh formation
#[derive(Debug)]
pub struct DialFailure {
    pub peer: NodeId,
    pub error: MeshError,
}

/// The result of mesh formation.
#[derive(Debug)]
pub struct Mesh {
    /// node identities by their index in [Mesh::matrix]. For a full mesh this is the order of the
    ///  hosts; in connect mode the local node comes first, followed by the dialed peers sorted by
    ///  identity.
    pub nodes: Vec<NodeId>,
    pub matrix: StreamMatrix,
    /// the initiating end of every stream that was opened, in dial order
    pub streams: Vec<Stream>,
    pub dial_failures: Vec<DialFailure>,
}

impl Mesh {
    pub fn index_of(&self, id: &NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| n == id)
    }

    pub fn stream_of(&self, i: usize, j: usize) -> Option<&StreamInfo> {
        self.matrix.get(i, j)
    }

    /// the stream between two nodes, identified by their identities
    pub fn stream_between(&self, a: &NodeId, b: &NodeId) -> Option<&StreamInfo> {
        self.matrix.get(self.index_of(a)?, self.index_of(b)?)
    }

    pub fn stream_count(&self) -> usize {
        self.matrix.stream_count()
    }
}

/// Mesh formation was aborted by a failing dial.
///
/// Streams opened before the failure are not rolled back: their initiating ends are in `partial`,
///  and they stay open for as long as it is kept.
#[derive(Debug, Error)]
#[error("mesh formation failed")]
pub struct MeshSetupFailure {
    #[source]
    pub error: MeshError,
    pub partial: Mesh,
}


/// Establishes the streams required by a [MeshMode] for a given protocol.
///
/// `handler` is registered for the protocol on every participating host before the first dial,
///  so no inbound stream can arrive at a host that is not ready for it. Peer addresses are added
///  to the hosts' peer stores with the given TTL.
///
/// In full mesh mode, the first failing dial aborts mesh formation with [MeshError::Setup]. The
///  streams that were opened up to that point are handed back in [MeshSetupFailure::partial]. In
///  connect mode, failing dials are logged and collected in [Mesh::dial_failures].
#[instrument(skip_all, fields(protocol = %protocol))]
pub async fn orchestrate(mode: MeshMode, protocol: &ProtocolTag, handler: Arc<dyn StreamHandler>, ttl: AddrTtl) -> Result<Mesh, MeshSetupFailure> {
    match mode {
        MeshMode::FullMesh { hosts } => full_mesh(hosts, protocol, handler, ttl).await,
        MeshMode::Connect { local, peers } => connect(local, peers, protocol, handler, ttl).await,
    }
}

async fn full_mesh(hosts: Vec<Arc<dyn TransportHost>>, protocol: &ProtocolTag, handler: Arc<dyn StreamHandler>, ttl: AddrTtl) -> Result<Mesh, MeshSetupFailure> {
    let nodes = hosts.iter()
        .map(|h| h.id())
        .collect::<Vec<_>>();
    info!("forming full mesh of {} nodes", nodes.len());

    for host in &hosts {
        host.set_stream_handler(protocol.clone(), handler.clone()).await;
    }

    for (i, host) in hosts.iter().enumerate() {
        for (j, other) in hosts.iter().enumerate() {
            if nodes[i] != nodes[j] {
                host.add_peer_addrs(nodes[j].clone(), other.addrs(), ttl).await;
            }
        }
        debug!("peer store of {}: {}", nodes[i], host.describe_peers().await);
    }

    let mut matrix = StreamMatrix::new(hosts.len());
    let mut streams = Vec::new();
    for i in 0..hosts.len() {
        for j in i+1..hosts.len() {
            if nodes[i] == nodes[j] {
                warn!("host #{} and host #{} have the same identity {} - not connecting them", i, j, nodes[i]);
                continue;
            }

            let stream = match hosts[i].new_stream(&nodes[j], protocol).await {
                Ok(stream) => stream,
                Err(source) => {
                    warn!("could not connect {} to {}, aborting mesh formation with {} streams open", nodes[i], nodes[j], streams.len());
                    let error = MeshError::Setup {
                        from: nodes[i].clone(),
                        to: nodes[j].clone(),
                        source,
                    };
                    return Err(MeshSetupFailure {
                        error,
                        partial: Mesh {
                            nodes,
                            matrix,
                            streams,
                            dial_failures: Vec::new(),
                        },
                    });
                }
            };
            debug!("connected {} to {}", nodes[i], nodes[j]);

            matrix.insert(i, j, stream.info().clone());
            streams.push(stream);
        }
    }

    info!("full mesh complete: {} streams between {} nodes", streams.len(), nodes.len());
    Ok(Mesh {
        nodes,
        matrix,
        streams,
        dial_failures: Vec::new(),
    })
}

async fn connect(local: Arc<dyn TransportHost>, peers: Vec<PeerDescriptor>, protocol: &ProtocolTag, handler: Arc<dyn StreamHandler>, ttl: AddrTtl) -> Result<Mesh, MeshSetupFailure> {
    let myself = local.id();

    local.set_stream_handler(protocol.clone(), handler).await;

    for peer in peers {
        if peer.id == myself {
            debug!("skipping descriptor of this node {}", peer);
            continue;
        }
        local.add_peer_addrs(peer.id, peer.addrs, ttl).await;
    }
    info!("peer store of {}: {}", myself, local.describe_peers().await);

    let mut remotes = local.peers().await
        .into_iter()
        .filter(|p| p != &myself)
        .collect::<Vec<_>>();
    remotes.sort();

    let mut nodes = vec![myself.clone()];
    nodes.extend(remotes.iter().cloned());

    let mut matrix = StreamMatrix::new(nodes.len());
    let mut streams = Vec::new();
    let mut dial_failures = Vec::new();

    for (idx, peer) in remotes.into_iter().enumerate() {
        match local.new_stream(&peer, protocol).await {
            Ok(stream) => {
                info!("connected to {}", peer);
                matrix.insert(0, idx + 1, stream.info().clone());
                streams.push(stream);
            }
            Err(source) => {
                warn!("could not connect to {}, continuing without it: {}", peer, source);
                dial_failures.push(DialFailure {
                    peer: peer.clone(),
                    error: MeshError::Setup {
                        from: myself.clone(),
                        to: peer,
                        source,
                    },
                });
            }
        }
    }

    Ok(Mesh {
        nodes,
        matrix,
        streams,
        dial_failures,
    })
}
