use std::fmt::{Debug, Formatter};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::host::node_id::{NodeId, ProtocolTag};


/// Transport specific byte channel underlying a [Stream]
pub trait StreamIo: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static {}
impl <T: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static> StreamIo for T {}

/// Identifies a stream within the initiator's streams. It is chosen by the initiator and shared
///  with the responder, so both ends of a stream agree on it.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct StreamId(pub u64);

/// Describes a stream independently of which end is looking at it: both ends of a stream have
///  equal [StreamInfo]s, which makes it the stream's handle for bookkeeping.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct StreamInfo {
    pub id: StreamId,
    pub initiator: NodeId,
    pub responder: NodeId,
    pub protocol: ProtocolTag,
}

impl Debug for StreamInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}#{}({})", self.initiator, self.responder, self.id.0, self.protocol)
    }
}

impl StreamInfo {
    /// the peer at the other end, as seen from `local`
    pub fn peer_of(&self, local: &NodeId) -> &NodeId {
        if &self.initiator == local {
            &self.responder
        }
        else {
            &self.initiator
        }
    }

    /// true if the stream connects the two given nodes, regardless of direction
    pub fn connects(&self, a: &NodeId, b: &NodeId) -> bool {
        (&self.initiator == a && &self.responder == b) || (&self.initiator == b && &self.responder == a)
    }
}


/// One end of a full-duplex, ordered byte channel between two hosts, bound to a protocol.
///
/// Either end may read and write after establishment. Reads deliver bytes in the order the peer
///  wrote them.
pub struct Stream {
    info: StreamInfo,
    local: NodeId,
    io: Box<dyn StreamIo>,
}

impl Debug for Stream {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Stream{{{:?} @ {}}}", self.info, self.local)
    }
}

impl Stream {
    pub fn new(info: StreamInfo, local: NodeId, io: impl StreamIo) -> Stream {
        Stream {
            info,
            local,
            io: Box::new(io),
        }
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    pub fn local_peer(&self) -> &NodeId {
        &self.local
    }

    pub fn remote_peer(&self) -> &NodeId {
        self.info.peer_of(&self.local)
    }

    pub fn is_initiator(&self) -> bool {
        self.info.initiator == self.local
    }
}

impl AsyncRead for Stream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_read(cx, buf)
    }
}

impl AsyncWrite for Stream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().io).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_shutdown(cx)
    }
}


#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use super::*;
    use crate::test_util::node::{test_node_id_from_number, test_stream_info};

    #[tokio::test]
    async fn test_stream_pair() {
        let info = test_stream_info(1, 2, 7);
        let (a, b) = tokio::io::duplex(64);
        let mut initiator = Stream::new(info.clone(), test_node_id_from_number(1), a);
        let mut responder = Stream::new(info.clone(), test_node_id_from_number(2), b);

        assert!(initiator.is_initiator());
        assert!(!responder.is_initiator());
        assert_eq!(initiator.remote_peer(), &test_node_id_from_number(2));
        assert_eq!(responder.remote_peer(), &test_node_id_from_number(1));
        assert_eq!(initiator.info(), responder.info());

        initiator.write_all(b"abc").await.unwrap();
        responder.write_all(b"xy").await.unwrap();

        let mut buf = [0u8; 3];
        responder.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abc");

        let mut buf = [0u8; 2];
        initiator.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"xy");
    }

    #[test]
    fn test_connects() {
        let info = test_stream_info(1, 2, 7);
        assert!(info.connects(&test_node_id_from_number(1), &test_node_id_from_number(2)));
        assert!(info.connects(&test_node_id_from_number(2), &test_node_id_from_number(1)));
        assert!(!info.connects(&test_node_id_from_number(1), &test_node_id_from_number(3)));
    }
}
