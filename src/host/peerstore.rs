use std::fmt::{Display, Formatter};
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::host::node_id::{ListenAddr, NodeId};


/// How long a peer's addresses remain valid in the peer store.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AddrTtl {
    /// valid for the lifetime of the host - this is what mesh formation uses
    Permanent,
    For(Duration),
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PeerRecord {
    pub id: NodeId,
    pub addrs: Vec<ListenAddr>,
    pub expires: Option<Instant>,
}
impl PeerRecord {
    fn is_live(&self, now: Instant) -> bool {
        match self.expires {
            None => true,
            Some(expires) => now < expires,
        }
    }
}

impl Display for PeerRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{peer: {}, addresses: {:?}}}", self.id, self.addrs)
    }
}

/// A host's address book: which peers it knows, and where to reach them.
///
/// The peer store is filled during mesh formation and only read afterwards, but hosts share it
///  between their dialing and accepting sides, so it is guarded by a lock nonetheless.
#[derive(Default)]
pub struct Peerstore {
    records: RwLock<FxHashMap<NodeId, PeerRecord>>,
}

impl Peerstore {
    pub fn new() -> Peerstore {
        Default::default()
    }

    /// Adds addresses for a peer, merging them with addresses that are already known. A longer
    ///  TTL replaces a shorter one, never the other way round.
    pub async fn add_addrs(&self, id: NodeId, addrs: &[ListenAddr], ttl: AddrTtl) {
        let expires = match ttl {
            AddrTtl::Permanent => None,
            AddrTtl::For(ttl) => Some(Instant::now() + ttl),
        };

        let mut records = self.records.write().await;
        let record = records.entry(id.clone())
            .or_insert_with(|| PeerRecord {
                id,
                addrs: Vec::new(),
                expires,
            });

        for addr in addrs {
            if !record.addrs.contains(addr) {
                record.addrs.push(*addr);
            }
        }

        record.expires = match (record.expires, expires) {
            (None, _) | (_, None) => None,
            (Some(a), Some(b)) => Some(a.max(b)),
        };
    }

    /// Known addresses of a given peer - empty if the peer is unknown or its addresses expired
    pub async fn addrs(&self, id: &NodeId) -> Vec<ListenAddr> {
        let now = Instant::now();
        self.records.read().await
            .get(id)
            .filter(|r| r.is_live(now))
            .map(|r| r.addrs.clone())
            .unwrap_or_default()
    }

    /// All peers with live addresses, in no particular order
    pub async fn peers(&self) -> Vec<NodeId> {
        let now = Instant::now();
        self.records.read().await
            .values()
            .filter(|r| r.is_live(now))
            .map(|r| r.id.clone())
            .collect()
    }

    /// Human readable summary of the peer store's content, sorted by peer id
    pub async fn describe(&self) -> String {
        let mut records = self.records.read().await
            .values()
            .cloned()
            .collect::<Vec<_>>();
        records.sort_by(|a, b| a.id.cmp(&b.id));

        let records = records.iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>();
        format!("[{}]", records.join(", "))
    }
}
