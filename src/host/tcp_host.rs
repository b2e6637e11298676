use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::RngCore;
use rustc_hash::FxHashMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::{broadcast, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, instrument, trace, warn, Instrument};

use crate::host::identity::NodeKey;
use crate::host::node_id::{ListenAddr, NodeId, ProtocolTag};
use crate::host::peerstore::{AddrTtl, Peerstore};
use crate::host::stream::{Stream, StreamId, StreamInfo};
use crate::host::transport_host::{StreamHandler, TransportHost};

type HandlerRegistry = Arc<RwLock<FxHashMap<ProtocolTag, Arc<dyn StreamHandler>>>>;


#[derive(Debug, Clone)]
pub struct TcpHostConfig {
    /// upper bound for connecting to a peer and negotiating the stream's protocol
    pub dial_timeout: Duration,
    pub max_handshake_line_len: usize,
}

impl TcpHostConfig {
    pub fn new() -> TcpHostConfig {
        TcpHostConfig {
            dial_timeout: Duration::from_secs(10),
            max_handshake_line_len: 256,
        }
    }
}

impl Default for TcpHostConfig {
    fn default() -> Self {
        Self::new()
    }
}


/// A [TransportHost] on top of plain TCP: every stream is a TCP connection of its own.
///
/// When a stream is opened, the dialing side sends the protocol tag, its own node id and the new
///  stream's id, one per line. The accepting side answers with `ok <its node id>` if it has a
///  handler for the protocol, or `na` if it does not (and closes the connection). After that the
///  connection belongs to the application protocol.
pub struct TcpHost {
    myself: NodeId,
    addrs: Vec<ListenAddr>,
    config: Arc<TcpHostConfig>,
    peerstore: Peerstore,
    handlers: HandlerRegistry,
    cancel_sender: broadcast::Sender<()>,
}

impl TcpHost {
    /// Binds all given addresses and starts accepting streams on them. Port 0 binds to an
    ///  ephemeral port, [TransportHost::addrs] reports the actual ports.
    pub async fn new(key: &NodeKey, listen_addrs: &[SocketAddr], config: TcpHostConfig) -> io::Result<TcpHost> {
        let myself = key.node_id();
        debug!("starting host {} at {:?}", myself, listen_addrs);

        let config = Arc::new(config);
        let handlers: HandlerRegistry = Default::default();
        let (cancel_sender, _) = broadcast::channel(1);

        let mut addrs = Vec::new();
        for addr in listen_addrs {
            let listener = TcpListener::bind(addr).await
                .map_err(|e| io::Error::new(e.kind(), format!("could not listen on {}: {}", addr, e)))?;
            let local_addr = listener.local_addr()?;
            addrs.push(ListenAddr::Tcp(local_addr));

            tokio::spawn(accept_loop(
                listener,
                myself.clone(),
                config.clone(),
                handlers.clone(),
                cancel_sender.subscribe(),
            ).instrument(tracing::info_span!("tcp_host", node = %myself, addr = %local_addr)));
        }

        let peerstore = Peerstore::new();
        peerstore.add_addrs(myself.clone(), &addrs, AddrTtl::Permanent).await;

        info!("started host {} at {:?}", myself, addrs);
        Ok(TcpHost {
            myself,
            addrs,
            config,
            peerstore,
            handlers,
            cancel_sender,
        })
    }

    /// Stops accepting new streams. Established streams are not affected.
    pub fn close(&self) {
        if self.cancel_sender.send(()).is_err() {
            trace!("no accept loops running");
        }
    }

    async fn open_stream_at(&self, addr: SocketAddr, peer: &NodeId, protocol: &ProtocolTag) -> io::Result<Stream> {
        let socket = TcpStream::connect(addr).await?;
        let mut socket = BufReader::new(socket);

        let stream_id = StreamId(rand::thread_rng().next_u64());
        let request = format!("{}\n{}\n{}\n", protocol, self.myself, stream_id.0);
        socket.write_all(request.as_bytes()).await?;

        let response = read_handshake_line(&mut socket, self.config.max_handshake_line_len).await?;
        if response == "na" {
            return Err(io::Error::new(io::ErrorKind::Unsupported, format!("peer {} does not support protocol {}", peer, protocol)));
        }

        match response.strip_prefix("ok ") {
            Some(responder) if responder == peer.as_str() => {
                let info = StreamInfo {
                    id: stream_id,
                    initiator: self.myself.clone(),
                    responder: peer.clone(),
                    protocol: protocol.clone(),
                };
                Ok(Stream::new(info, self.myself.clone(), socket))
            }
            Some(responder) => {
                Err(io::Error::new(io::ErrorKind::InvalidData, format!("expected peer {} at {}, found {}", peer, addr, responder)))
            }
            None => {
                Err(io::Error::new(io::ErrorKind::InvalidData, format!("invalid handshake response {:?}", response)))
            }
        }
    }
}

impl Drop for TcpHost {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl TransportHost for TcpHost {
    fn id(&self) -> NodeId {
        self.myself.clone()
    }

    fn addrs(&self) -> Vec<ListenAddr> {
        self.addrs.clone()
    }

    async fn set_stream_handler(&self, protocol: ProtocolTag, handler: Arc<dyn StreamHandler>) {
        debug!("listening for streams of protocol {} on {}", protocol, self.myself);
        if self.handlers.write().await
            .insert(protocol.clone(), handler)
            .is_some()
        {
            debug!("replaced previous stream handler for protocol {} on {}", protocol, self.myself);
        }
    }

    async fn new_stream(&self, peer: &NodeId, protocol: &ProtocolTag) -> io::Result<Stream> {
        let tcp_addrs = self.peerstore.addrs(peer).await
            .into_iter()
            .filter_map(|a| match a {
                ListenAddr::Tcp(addr) => Some(addr),
                ListenAddr::Memory(_) => None,
            })
            .collect::<Vec<_>>();

        let mut last_error = io::Error::new(io::ErrorKind::NotFound, format!("no TCP address known for peer {}", peer));
        for addr in tcp_addrs {
            trace!("dialing {} at {}", peer, addr);
            match timeout(self.config.dial_timeout, self.open_stream_at(addr, peer, protocol)).await {
                Ok(Ok(stream)) => {
                    debug!("opened stream {:?}", stream.info());
                    return Ok(stream);
                }
                Ok(Err(e)) => {
                    debug!("could not open stream to {} at {}: {}", peer, addr, e);
                    last_error = e;
                }
                Err(_) => {
                    debug!("timeout opening stream to {} at {}", peer, addr);
                    last_error = io::Error::new(io::ErrorKind::TimedOut, format!("timeout dialing {} at {}", peer, addr));
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


async fn accept_loop(
    listener: TcpListener,
    myself: NodeId,
    config: Arc<TcpHostConfig>,
    handlers: HandlerRegistry,
    mut cancel_receiver: broadcast::Receiver<()>,
) {
    trace!("starting TCP accept loop");

    loop {
        select! {
            r = listener.accept() => {
                match r {
                    Ok((socket, addr)) => {
                        let myself = myself.clone();
                        let config = config.clone();
                        let handlers = handlers.clone();
                        tokio::spawn(async move {
                            if let Err(e) = accept_stream(socket, addr, myself, config, handlers).await {
                                warn!("inbound stream from {} failed during handshake: {}", addr, e);
                            }
                        }.in_current_span());
                    }
                    Err(e) => {
                        warn!(error = ?e, "error accepting connection");
                    }
                }
            }
            _ = cancel_receiver.recv() => break,
        }
    }

    debug!("stopped accepting streams");
}

#[instrument(name="inbound_stream", skip_all, fields(addr = %_addr))]
async fn accept_stream(
    socket: TcpStream,
    _addr: SocketAddr,
    myself: NodeId,
    config: Arc<TcpHostConfig>,
    handlers: HandlerRegistry,
) -> io::Result<()> {
    let mut socket = BufReader::new(socket);

    let (protocol, initiator, stream_id) = timeout(config.dial_timeout, read_stream_request(&mut socket, config.max_handshake_line_len)).await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "timeout waiting for stream request"))??;

    let handler = handlers.read().await
        .get(&protocol)
        .cloned();

    match handler {
        None => {
            debug!("refusing stream from {} for unsupported protocol {}", initiator, protocol);
            socket.write_all(b"na\n").await?;
            socket.shutdown().await?;
        }
        Some(handler) => {
            socket.write_all(format!("ok {}\n", myself).as_bytes()).await?;
            let info = StreamInfo {
                id: stream_id,
                initiator,
                responder: myself.clone(),
                protocol,
            };
            debug!("accepted stream {:?}", info);
            handler.handle_stream(Stream::new(info, myself, socket)).await;
        }
    }
    Ok(())
}

async fn read_stream_request<R: AsyncBufRead + Unpin>(socket: &mut R, max_line_len: usize) -> io::Result<(ProtocolTag, NodeId, StreamId)> {
    let invalid = |e: String| io::Error::new(io::ErrorKind::InvalidData, e);

    let protocol = ProtocolTag::new(read_handshake_line(socket, max_line_len).await?)
        .map_err(|e| invalid(e.to_string()))?;
    let initiator = NodeId::new(read_handshake_line(socket, max_line_len).await?)
        .map_err(|e| invalid(e.to_string()))?;
    let stream_id = read_handshake_line(socket, max_line_len).await?
        .parse::<u64>()
        .map_err(|e| invalid(format!("invalid stream id: {}", e)))?;

    Ok((protocol, initiator, StreamId(stream_id)))
}

/// Reads a single `\n` terminated line, stripping the delimiter
async fn read_handshake_line<R: AsyncBufRead + Unpin>(socket: &mut R, max_line_len: usize) -> io::Result<String> {
    let mut line = String::new();
    let num_read = AsyncReadExt::take(&mut *socket, max_line_len as u64)
        .read_line(&mut line).await?;

    if !line.ends_with('\n') {
        return if num_read >= max_line_len {
            Err(io::Error::new(io::ErrorKind::InvalidData, "handshake line exceeds maximum length"))
        }
        else {
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed during handshake"))
        };
    }
    line.pop();
    Ok(line)
}
