use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};

use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::host::node_id::NodeId;

const SECRET_LEN: usize = 32;
const NODE_ID_BYTES: usize = 20;


/// A node's secret key. The node's [NodeId] is derived from it, so persisting the key allows a
///  node to keep its identity across restarts.
#[derive(Clone)]
pub struct NodeKey {
    secret: [u8; SECRET_LEN],
}

impl Debug for NodeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeKey{{{}}}", self.node_id())
    }
}

impl NodeKey {
    pub fn generate() -> NodeKey {
        let mut secret = [0u8; SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut secret);
        NodeKey { secret }
    }

    pub fn from_hex(s: &str) -> Result<NodeKey, ConfigError> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| ConfigError::InvalidKey(e.to_string()))?;
        let secret: [u8; SECRET_LEN] = bytes.try_into()
            .map_err(|b: Vec<u8>| ConfigError::InvalidKey(format!("expected {} bytes, was {}", SECRET_LEN, b.len())))?;
        Ok(NodeKey { secret })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.secret)
    }

    pub fn node_id(&self) -> NodeId {
        let digest = Sha256::digest(self.secret);
        NodeId::new(hex::encode(&digest[..NODE_ID_BYTES]))
            .expect("hex encoding is alphanumeric")
    }

    pub fn key_file(dir: &Path, id: &NodeId) -> PathBuf {
        dir.join(format!("{}.key", id))
    }

    /// Stores the key in `<dir>/<node id>.key`, returning the file's path
    pub fn save(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        let path = Self::key_file(dir, &self.node_id());
        debug!(?path, "storing node key");
        std::fs::write(&path, self.to_hex())?;
        info!("stored identity of {} to {:?}", self.node_id(), path);
        Ok(path)
    }

    /// Loads a node's key that was previously stored with [NodeKey::save], verifying that it
    ///  actually belongs to the given node
    pub fn load(dir: &Path, id: &NodeId) -> anyhow::Result<NodeKey> {
        let path = Self::key_file(dir, id);
        debug!(?path, "loading node key");
        let key = NodeKey::from_hex(&std::fs::read_to_string(&path)?)?;
        if &key.node_id() != id {
            return Err(ConfigError::InvalidKey(format!("{:?} does not contain the key for {}", path, id)).into());
        }
        Ok(key)
    }
}
