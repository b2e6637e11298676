//! A small mesh of peer-to-peer nodes that exchange line delimited "ping" messages over
//!  bidirectional streams.
//!
//! [mesh::orchestrator::orchestrate] connects a set of hosts (see [host::transport_host::TransportHost])
//!  so that there is exactly one stream per pair of peers, [ping::ping_engine::PingEngine] runs the
//!  ping protocol on each stream, and [driver::run_mesh] puts the two together.

pub mod driver;
pub mod error;
pub mod host;
pub mod mesh;
pub mod ping;
pub mod util;
pub mod test_util;
