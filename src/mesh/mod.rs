//! Mesh formation: bringing a set of hosts into a state where every pair of them that should talk
//!  to each other has exactly one stream for the mesh's protocol.

pub mod mesh_config;
pub mod orchestrator;
pub mod peer_descriptor;
pub mod stream_matrix;
