use std::sync::Mutex;
use std::time::Duration;

use tokio::time::sleep;

use crate::error::LoopSide;
use crate::host::node_id::NodeId;
use crate::host::stream::StreamInfo;
use crate::ping::ping_engine::{LoopOutcome, PingObserver};
use crate::ping::ping_message::PingMessage;


#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PingEvent {
    Sent { local: NodeId, stream: StreamInfo, ping: PingMessage },
    Received { local: NodeId, stream: StreamInfo, ping: PingMessage },
    Terminated { local: NodeId, stream: StreamInfo, side: LoopSide, cancelled: bool },
}

/// A [PingObserver] that records all events for later inspection by test code
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<PingEvent>>,
}

impl RecordingObserver {
    pub fn new() -> RecordingObserver {
        Default::default()
    }

    pub fn events(&self) -> Vec<PingEvent> {
        self.events.lock().unwrap().clone()
    }

    /// sequence numbers sent on a stream (by either end), in the order they were sent
    pub fn sent_seqs(&self, stream: &StreamInfo) -> Vec<u64> {
        self.events().into_iter()
            .filter_map(|e| match e {
                PingEvent::Sent { stream: s, ping, .. } if &s == stream => Some(ping.seq()),
                _ => None,
            })
            .collect()
    }

    /// sequence numbers received on a stream (by either end), in the order they were received
    pub fn received_seqs(&self, stream: &StreamInfo) -> Vec<u64> {
        self.events().into_iter()
            .filter_map(|e| match e {
                PingEvent::Received { stream: s, ping, .. } if &s == stream => Some(ping.seq()),
                _ => None,
            })
            .collect()
    }

    /// all pings received by a given node
    pub fn received_by(&self, local: &NodeId) -> Vec<PingMessage> {
        self.events().into_iter()
            .filter_map(|e| match e {
                PingEvent::Received { local: l, ping, .. } if &l == local => Some(ping),
                _ => None,
            })
            .collect()
    }

    /// (stream, side, was cancelled) for every loop that terminated
    pub fn terminations(&self) -> Vec<(StreamInfo, LoopSide, bool)> {
        self.events().into_iter()
            .filter_map(|e| match e {
                PingEvent::Terminated { stream, side, cancelled, .. } => Some((stream, side, cancelled)),
                _ => None,
            })
            .collect()
    }

    /// polls until the condition holds - tests guard this with a timeout or paused time
    pub async fn wait_until(&self, condition: impl Fn(&RecordingObserver) -> bool) {
        while !condition(self) {
            sleep(Duration::from_millis(1)).await;
        }
    }

    fn record(&self, event: PingEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl PingObserver for RecordingObserver {
    fn on_ping_sent(&self, local: &NodeId, stream: &StreamInfo, ping: &PingMessage) {
        self.record(PingEvent::Sent { local: local.clone(), stream: stream.clone(), ping: ping.clone() });
    }

    fn on_ping_received(&self, local: &NodeId, stream: &StreamInfo, ping: &PingMessage) {
        self.record(PingEvent::Received { local: local.clone(), stream: stream.clone(), ping: ping.clone() });
    }

    fn on_loop_terminated(&self, local: &NodeId, stream: &StreamInfo, side: LoopSide, outcome: &LoopOutcome) {
        self.record(PingEvent::Terminated {
            local: local.clone(),
            stream: stream.clone(),
            side,
            cancelled: outcome.is_cancelled(),
        });
    }
}
