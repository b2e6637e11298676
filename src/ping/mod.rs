//! The ping protocol: every stream carries pings in both directions, each a single text line
//!  with a per-stream sequence number.

pub mod ping_config;
pub mod ping_engine;
pub mod ping_message;
