use crate::host::node_id::{NodeId, ProtocolTag};
use crate::host::stream::{StreamId, StreamInfo};


/// convenience method for unit test code: create a [NodeId] based on a number, the same number
///  generating the same id and different numbers different ids
pub fn test_node_id_from_number(number: u16) -> NodeId {
    NodeId::new(format!("node{}", number))
        .expect("generated ids are alphanumeric")
}

pub fn test_protocol() -> ProtocolTag {
    ProtocolTag::new("ping/1.0")
        .expect("valid protocol tag")
}

/// [StreamInfo] for a stream initiated by node `from` to node `to`
pub fn test_stream_info(from: u16, to: u16, id: u64) -> StreamInfo {
    StreamInfo {
        id: StreamId(id),
        initiator: test_node_id_from_number(from),
        responder: test_node_id_from_number(to),
        protocol: test_protocol(),
    }
}
