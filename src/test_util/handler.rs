use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::host::stream::Stream;
use crate::host::transport_host::StreamHandler;


/// A [StreamHandler] that hands inbound streams to test code through a channel
pub struct ChannelStreamHandler {
    sender: mpsc::UnboundedSender<Stream>,
}

impl ChannelStreamHandler {
    pub fn new() -> (Arc<ChannelStreamHandler>, mpsc::UnboundedReceiver<Stream>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(ChannelStreamHandler { sender }), receiver)
    }
}

#[async_trait]
impl StreamHandler for ChannelStreamHandler {
    async fn handle_stream(&self, stream: Stream) {
        if let Err(e) = self.sender.send(stream) {
            warn!("inbound stream {:?} dropped: receiver is gone", e.0.info());
        }
    }
}
